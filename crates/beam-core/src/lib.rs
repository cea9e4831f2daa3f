//! # beam-core
//!
//! Core types, traits, and primitives shared by every Beam crate: the peer and
//! endpoint identifiers, the negotiated [`Role`], the motion sample slot, the
//! collaborator traits for the mesh and radio transports, and the event bus the
//! UI layer listens on.

pub mod error;
pub mod event;
pub mod transport;
pub mod types;

pub use error::{BeamError, Result};
pub use event::{Event, EventBus};
pub use transport::{MeshEvent, MeshEvents, MeshTransport, RadioConnection, RadioLink, RadioTransport};
pub use types::*;
