//! Boundaries to the two black-box transports.
//!
//! The mesh transport finds peers and carries small control payloads; the radio
//! transport is the direct point-to-point link used once roles are known. Both
//! are consumed through these traits so the negotiation logic never touches a
//! platform API directly.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;

use crate::types::{EndpointId, PeerHandle};

/// Notifications from the mesh transport, delivered in order on one channel.
///
/// Payloads for a given peer arrive in the order the peer sent them.
#[derive(Debug, Clone)]
pub enum MeshEvent {
    /// A peer advertising our service id was found.
    PeerDiscovered {
        peer: PeerHandle,
        display_name: String,
    },
    /// A previously discovered peer is no longer visible.
    PeerLost { peer: PeerHandle },
    /// Outcome of a connection, whichever side requested it. On success it
    /// carries the endpoint id the transport assigned to us for this connection.
    ConnectionResult {
        peer: PeerHandle,
        result: std::result::Result<EndpointId, String>,
    },
    /// A payload received from a connected peer.
    Payload { peer: PeerHandle, bytes: Bytes },
    /// The connection to a peer was torn down.
    Disconnected { peer: PeerHandle },
}

/// Receiving end of a mesh transport's event stream.
pub type MeshEvents = tokio::sync::mpsc::UnboundedReceiver<MeshEvent>;

/// Discovery/advertising mesh transport.
#[async_trait]
pub trait MeshTransport: Send + Sync {
    /// Make this device visible to peers discovering `service_id`.
    async fn advertise(&self, service_id: &str, display_name: &str) -> crate::Result<()>;

    /// Start reporting peers that advertise `service_id`.
    async fn discover(&self, service_id: &str) -> crate::Result<()>;

    /// Stop advertising and discovering. Existing connections stay up.
    async fn stop_discovery(&self) -> crate::Result<()>;

    /// Request a connection. The outcome arrives as a
    /// [`MeshEvent::ConnectionResult`].
    async fn connect(&self, peer: &PeerHandle) -> crate::Result<()>;

    /// Send a payload to a connected peer.
    async fn send(&self, peer: &PeerHandle, payload: Bytes) -> crate::Result<()>;

    /// Tear down the connection to a peer.
    async fn disconnect(&self, peer: &PeerHandle) -> crate::Result<()>;
}

/// An established radio link offering a reliable, ordered byte stream.
#[async_trait]
pub trait RadioLink: Send + Sync {
    /// Send one frame.
    async fn send(&self, frame: &[u8]) -> crate::Result<()>;

    /// Receive the next frame. `Ok(None)` means the remote side closed.
    async fn recv(&self) -> crate::Result<Option<Vec<u8>>>;

    /// Close the link. Pending `recv` calls on either side return `None`.
    async fn close(&self) -> crate::Result<()>;
}

/// A link produced by [`RadioTransport::listen`] or [`RadioTransport::discover`].
#[derive(Clone)]
pub struct RadioConnection {
    pub link: Arc<dyn RadioLink>,
    /// Signal strength observed while scanning, if the platform reported one.
    pub rssi: Option<i16>,
}

impl std::fmt::Debug for RadioConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RadioConnection")
            .field("rssi", &self.rssi)
            .finish_non_exhaustive()
    }
}

/// The point-to-point radio used after role election.
#[async_trait]
pub trait RadioTransport: Send + Sync {
    /// The name this device advertises on the radio.
    fn local_identity(&self) -> String;

    /// Become discoverable and wait for one incoming link. Fails with
    /// [`crate::BeamError::RadioTimeout`] once `window` elapses.
    async fn listen(&self, window: Duration) -> crate::Result<RadioConnection>;

    /// Scan for a device advertising `target` and connect to it. Fails with
    /// [`crate::BeamError::RadioTimeout`] if nothing matches within `window`.
    async fn discover(&self, target: &str, window: Duration) -> crate::Result<RadioConnection>;
}
