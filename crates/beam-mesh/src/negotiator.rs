//! Per-peer handshake state machine.
//!
//! The negotiator does no I/O. The connection manager feeds it [`Input`]s in
//! the order they happen and carries out the [`Action`]s it returns, which
//! keeps every transition testable without a transport.
//!
//! Handshake, as seen from either side:
//!
//! ```text
//!   mesh connected ──► send EndpointIdExchange(mine)
//!   recv EndpointIdExchange(theirs) ──► elect role, send SecondTransportNameExchange(my radio)
//!   recv SecondTransportNameExchange(their radio)
//!       client ──► start scanning for their radio, send ClientReady
//!       server ──► wait
//!   recv ClientReady (server) ──► become discoverable
//!   radio link up ──► bridged
//! ```

use std::fmt;

use beam_core::{EndpointId, Event, PeerHandle, Role};
use tracing::{debug, info, warn};

use crate::protocol::NegotiationMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NegotiationState {
    Idle,
    MeshConnecting,
    MeshConnected,
    IdExchanged,
    RoleKnown,
    AwaitingSecondTransportReady,
    SecondTransportBridged,
}

impl fmt::Display for NegotiationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NegotiationState::Idle => "idle",
            NegotiationState::MeshConnecting => "mesh_connecting",
            NegotiationState::MeshConnected => "mesh_connected",
            NegotiationState::IdExchanged => "id_exchanged",
            NegotiationState::RoleKnown => "role_known",
            NegotiationState::AwaitingSecondTransportReady => "awaiting_second_transport_ready",
            NegotiationState::SecondTransportBridged => "second_transport_bridged",
        };
        f.write_str(s)
    }
}

/// Something that happened to this peer.
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    /// The mesh reported the peer; we should connect.
    PeerDiscovered,
    /// The mesh connection is up and the transport gave us `local_endpoint`.
    MeshConnected { local_endpoint: EndpointId },
    MeshConnectFailed { reason: String },
    /// A decoded control message from the peer.
    Message(NegotiationMessage),
    /// The radio produced a link to the peer.
    RadioLinked,
    /// The radio window closed without a link.
    RadioTimedOut { reason: String },
}

/// Something the negotiator needs done.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    RequestMeshConnection,
    /// Add the peer to the active connection set.
    MarkActive,
    Send(NegotiationMessage),
    /// Scan the radio for `target` and connect when found.
    StartRadioDiscovery { target: String },
    /// Become discoverable on the radio and accept one link.
    StartRadioListen,
    /// The link is ours; start streaming telemetry.
    Bridged { role: Role },
    /// Drop all state for this peer.
    Discard { reason: String },
    /// Stop negotiating but keep the mesh connection.
    Abandon { reason: String },
    /// Tell the UI.
    Notify(Event),
}

/// Handshake state for a single peer.
#[derive(Debug, Clone)]
pub struct Negotiator {
    peer: PeerHandle,
    local_radio_identity: String,
    state: NegotiationState,
    history: Vec<NegotiationState>,
    local_endpoint: Option<EndpointId>,
    peer_endpoint: Option<EndpointId>,
    role: Option<Role>,
    target_identity: Option<String>,
    abandoned: Option<String>,
}

impl Negotiator {
    pub fn new(peer: PeerHandle, local_radio_identity: impl Into<String>) -> Self {
        Self {
            peer,
            local_radio_identity: local_radio_identity.into(),
            state: NegotiationState::Idle,
            history: vec![NegotiationState::Idle],
            local_endpoint: None,
            peer_endpoint: None,
            role: None,
            target_identity: None,
            abandoned: None,
        }
    }

    pub fn peer(&self) -> &PeerHandle {
        &self.peer
    }

    pub fn state(&self) -> NegotiationState {
        self.state
    }

    /// Every state entered so far, starting with `Idle`.
    pub fn history(&self) -> &[NegotiationState] {
        &self.history
    }

    pub fn role(&self) -> Option<Role> {
        self.role
    }

    pub fn local_endpoint(&self) -> Option<&EndpointId> {
        self.local_endpoint.as_ref()
    }

    pub fn peer_endpoint(&self) -> Option<&EndpointId> {
        self.peer_endpoint.as_ref()
    }

    /// Radio name of the peer, once exchanged.
    pub fn target_identity(&self) -> Option<&str> {
        self.target_identity.as_deref()
    }

    /// Why the negotiation was given up, if it was.
    pub fn abandoned(&self) -> Option<&str> {
        self.abandoned.as_deref()
    }

    pub fn is_bridged(&self) -> bool {
        self.state == NegotiationState::SecondTransportBridged
    }

    /// Advance the state machine. Inputs the current state doesn't expect are
    /// dropped and produce no actions.
    pub fn handle(&mut self, input: Input) -> Vec<Action> {
        if let Some(reason) = &self.abandoned {
            debug!(peer = %self.peer, reason = %reason, ?input, "negotiation abandoned, ignoring input");
            return Vec::new();
        }

        use NegotiationState as S;
        match (self.state, input) {
            (S::Idle, Input::PeerDiscovered) => {
                self.enter(S::MeshConnecting);
                vec![Action::RequestMeshConnection]
            }

            (S::Idle | S::MeshConnecting, Input::MeshConnected { local_endpoint }) => {
                info!(peer = %self.peer, local_endpoint = %local_endpoint, "mesh connected, exchanging endpoint ids");
                self.local_endpoint = Some(local_endpoint.clone());
                self.enter(S::MeshConnected);
                vec![
                    Action::MarkActive,
                    Action::Send(NegotiationMessage::EndpointIdExchange(local_endpoint)),
                    Action::Notify(Event::MeshConnected {
                        peer: self.peer.clone(),
                    }),
                ]
            }

            (S::Idle | S::MeshConnecting, Input::MeshConnectFailed { reason }) => {
                warn!(peer = %self.peer, reason = %reason, "mesh connection failed");
                vec![
                    Action::Notify(Event::MeshConnectFailed {
                        peer: self.peer.clone(),
                        reason: reason.clone(),
                    }),
                    Action::Discard { reason },
                ]
            }

            (S::MeshConnected, Input::Message(NegotiationMessage::EndpointIdExchange(peer_id))) => {
                self.on_peer_endpoint(peer_id)
            }

            (
                S::IdExchanged,
                Input::Message(NegotiationMessage::SecondTransportNameExchange(name)),
            ) => self.on_peer_radio_name(name),

            (S::RoleKnown, Input::Message(NegotiationMessage::ClientReady))
                if self.role == Some(Role::Server) =>
            {
                info!(peer = %self.peer, "client is scanning, becoming discoverable");
                self.enter(S::AwaitingSecondTransportReady);
                vec![Action::StartRadioListen]
            }

            (S::AwaitingSecondTransportReady, Input::RadioLinked)
                if self.role == Some(Role::Server) =>
            {
                self.bridge()
            }
            (S::RoleKnown, Input::RadioLinked) if self.role == Some(Role::Client) => self.bridge(),

            (S::RoleKnown | S::AwaitingSecondTransportReady, Input::RadioTimedOut { reason }) => {
                self.abandon(reason)
            }

            (state, input) => {
                debug!(peer = %self.peer, %state, ?input, "unexpected input for state, ignoring");
                Vec::new()
            }
        }
    }

    fn on_peer_endpoint(&mut self, peer_id: EndpointId) -> Vec<Action> {
        let Some(local) = self.local_endpoint.clone() else {
            return Vec::new();
        };
        self.peer_endpoint = Some(peer_id.clone());

        if local == peer_id {
            // Election relies on the mesh handing out unique ids; with a tie
            // both sides would pick Client and wait forever.
            return self.abandon(format!("endpoint id collision on '{local}'"));
        }

        let role = Role::elect(&local, &peer_id);
        info!(peer = %self.peer, local = %local, remote = %peer_id, %role, "role elected");
        self.role = Some(role);
        self.enter(NegotiationState::IdExchanged);
        vec![Action::Send(NegotiationMessage::SecondTransportNameExchange(
            self.local_radio_identity.clone(),
        ))]
    }

    fn on_peer_radio_name(&mut self, name: String) -> Vec<Action> {
        let Some(role) = self.role else {
            return Vec::new();
        };
        info!(peer = %self.peer, target = %name, %role, "radio identities exchanged");
        self.target_identity = Some(name.clone());
        self.enter(NegotiationState::RoleKnown);

        let mut actions = vec![Action::Notify(Event::RoleElected {
            peer: self.peer.clone(),
            role,
            target_identity: name.clone(),
        })];
        if role == Role::Client {
            actions.push(Action::StartRadioDiscovery { target: name });
            actions.push(Action::Send(NegotiationMessage::ClientReady));
        }
        actions
    }

    fn bridge(&mut self) -> Vec<Action> {
        let role = self.role.unwrap_or(Role::Client);
        info!(peer = %self.peer, %role, "radio link established");
        self.enter(NegotiationState::SecondTransportBridged);
        vec![
            Action::Bridged { role },
            Action::Notify(Event::RadioBridged {
                peer: self.peer.clone(),
                role,
            }),
        ]
    }

    fn abandon(&mut self, reason: String) -> Vec<Action> {
        warn!(peer = %self.peer, state = %self.state, reason = %reason, "abandoning radio hand-off");
        self.abandoned = Some(reason.clone());
        vec![
            Action::Abandon {
                reason: reason.clone(),
            },
            Action::Notify(Event::NegotiationAbandoned {
                peer: self.peer.clone(),
                reason,
            }),
        ]
    }

    fn enter(&mut self, next: NegotiationState) {
        debug!(peer = %self.peer, from = %self.state, to = %next, "negotiation state change");
        self.state = next;
        self.history.push(next);
    }
}
