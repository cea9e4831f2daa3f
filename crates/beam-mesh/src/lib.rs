//! # beam-mesh
//!
//! Turns a mesh connection between two devices into a direct radio link.
//!
//! Each discovered peer gets a [`Negotiator`]: both sides swap the endpoint ids
//! the mesh assigned them, elect a server and a client from those ids, swap
//! radio names, and only then does exactly one side become discoverable on the
//! radio while the other scans for it. The [`ConnectionManager`] runs one
//! negotiator per peer, executes what they ask for against the transports,
//! and hands established links to the motion telemetry.
//!
//! The [`sim`] module provides in-memory mesh and radio backends so the whole
//! flow runs without hardware.

pub mod manager;
pub mod negotiator;
pub mod protocol;
pub mod registry;
pub mod sim;

pub use manager::{ConnectionManager, ManagerHandle, SessionInfo};
pub use negotiator::{Action, Input, NegotiationState, Negotiator};
pub use protocol::NegotiationMessage;
pub use registry::ActiveConnectionSet;
