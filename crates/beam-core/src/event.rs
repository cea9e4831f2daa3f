use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use std::sync::Arc;
use tokio::sync::broadcast;

use crate::types::{PeerHandle, Role};

/// Events pushed to the UI layer as negotiation and telemetry progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Event {
    // ── Mesh lifecycle ─────────────────────────────────────────
    PeerDiscovered {
        peer: PeerHandle,
        display_name: String,
    },
    MeshConnected {
        peer: PeerHandle,
    },
    MeshConnectFailed {
        peer: PeerHandle,
        reason: String,
    },
    PeerDisconnected {
        peer: PeerHandle,
    },

    // ── Negotiation ────────────────────────────────────────────
    RoleElected {
        peer: PeerHandle,
        role: Role,
        target_identity: String,
    },
    RadioBridged {
        peer: PeerHandle,
        role: Role,
    },
    NegotiationAbandoned {
        peer: PeerHandle,
        reason: String,
    },

    // ── Radio / motion ─────────────────────────────────────────
    ProximityEstimated {
        peer: PeerHandle,
        rssi: i16,
        very_close: bool,
    },
    GestureMatched {
        peer: PeerHandle,
        at: DateTime<Utc>,
    },

    Shutdown,
}

impl Event {
    /// One-line text for the status display.
    pub fn status_line(&self) -> String {
        match self {
            Event::PeerDiscovered { peer, display_name } => {
                format!("found {display_name} ({peer}), requesting connection")
            }
            Event::MeshConnected { peer } => format!("connected to {peer}, negotiating radio"),
            Event::MeshConnectFailed { peer, reason } => {
                format!("connection to {peer} failed: {reason}")
            }
            Event::PeerDisconnected { peer } => format!("disconnected from {peer}"),
            Event::RoleElected {
                peer,
                role,
                target_identity,
            } => format!(
                "connected to {peer}, looking for radio device {target_identity}, I am {role}"
            ),
            Event::RadioBridged { peer, role } => {
                format!("radio link to {peer} established as {role}")
            }
            Event::NegotiationAbandoned { peer, reason } => {
                format!("gave up on radio hand-off with {peer}: {reason}")
            }
            Event::ProximityEstimated {
                peer,
                rssi,
                very_close,
            } => format!("{peer} at {rssi} dBm, very close: {very_close}"),
            Event::GestureMatched { peer, .. } => format!("bumped with {peer}!"),
            Event::Shutdown => "shutting down".to_string(),
        }
    }
}

/// A broadcast-based event bus for the UI collaborator.
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<Event>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn publish(&self, event: Event) {
        // Ignore send errors (no subscribers).
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
