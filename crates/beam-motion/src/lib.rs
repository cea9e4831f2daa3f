//! # beam-motion
//!
//! Everything that happens once two devices can hear each other on the radio:
//! estimating how close they are from signal strength, streaming gyroscope
//! samples over the link, and deciding whether both devices moved together.

pub mod gesture;
pub mod proximity;
pub mod sensor;
pub mod telemetry;

pub use gesture::GestureMatcher;
pub use proximity::ProximityModel;
pub use sensor::{MotionSlot, ScriptedMotionSource};
pub use telemetry::{decode_sample, encode_sample};
