//! Runs one [`Negotiator`] per peer against the real transports.
//!
//! The manager owns every session and is driven from a single task, so
//! negotiation state is never shared. Work that has to wait (radio scans,
//! the discoverable window, telemetry) runs on spawned tasks tied to the
//! session's cancellation token and reports back over a channel.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use beam_config::BeamConfig;
use beam_core::{
    BeamError, Event, EventBus, MeshEvent, MeshEvents, MeshTransport, PeerHandle, RadioConnection,
    RadioLink, RadioTransport, Role,
};
use beam_motion::telemetry::{run_receiver, run_sender};
use beam_motion::{GestureMatcher, MotionSlot, ProximityModel};
use chrono::Utc;
use parking_lot::RwLock;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::negotiator::{Action, Input, NegotiationState, Negotiator};
use crate::protocol::NegotiationMessage;
use crate::registry::ActiveConnectionSet;

/// Point-in-time view of one peer's negotiation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub state: NegotiationState,
    pub role: Option<Role>,
    pub target_identity: Option<String>,
    pub abandoned: Option<String>,
}

impl SessionInfo {
    pub fn is_bridged(&self) -> bool {
        self.state == NegotiationState::SecondTransportBridged
    }
}

impl From<&Negotiator> for SessionInfo {
    fn from(n: &Negotiator) -> Self {
        Self {
            state: n.state(),
            role: n.role(),
            target_identity: n.target_identity().map(str::to_owned),
            abandoned: n.abandoned().map(str::to_owned),
        }
    }
}

/// Cloneable handle for observing and stopping a running manager.
#[derive(Clone)]
pub struct ManagerHandle {
    shutdown: CancellationToken,
    sessions: Arc<RwLock<HashMap<PeerHandle, SessionInfo>>>,
    registry: ActiveConnectionSet,
    events: EventBus,
}

impl ManagerHandle {
    /// Stop the manager. Every session is torn down before `run` returns.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn session(&self, peer: &PeerHandle) -> Option<SessionInfo> {
        self.sessions.read().get(peer).cloned()
    }

    /// All sessions, sorted by peer.
    pub fn sessions(&self) -> Vec<(PeerHandle, SessionInfo)> {
        let mut all: Vec<_> = self
            .sessions
            .read()
            .iter()
            .map(|(p, s)| (p.clone(), s.clone()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    pub fn active_connections(&self) -> &ActiveConnectionSet {
        &self.registry
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }
}

enum RadioRequest {
    Listen,
    Discover(String),
}

enum RadioEvent {
    Linked {
        peer: PeerHandle,
        connection: RadioConnection,
    },
    Failed {
        peer: PeerHandle,
        error: BeamError,
    },
}

struct Session {
    negotiator: Negotiator,
    /// Child of the manager's shutdown token; cancels everything spawned for
    /// this peer.
    cancel: CancellationToken,
    link: Option<Arc<dyn RadioLink>>,
    tasks: Vec<JoinHandle<()>>,
}

/// Drives mesh discovery, per-peer negotiation, the radio hand-off and
/// telemetry for one device.
pub struct ConnectionManager {
    mesh: Arc<dyn MeshTransport>,
    radio: Arc<dyn RadioTransport>,
    config: BeamConfig,
    registry: ActiveConnectionSet,
    motion: MotionSlot,
    events: EventBus,
    sessions: HashMap<PeerHandle, Session>,
    info: Arc<RwLock<HashMap<PeerHandle, SessionInfo>>>,
    radio_tx: mpsc::UnboundedSender<RadioEvent>,
    radio_rx: mpsc::UnboundedReceiver<RadioEvent>,
    shutdown: CancellationToken,
    discovery_active: bool,
}

impl ConnectionManager {
    pub fn new(
        mesh: Arc<dyn MeshTransport>,
        radio: Arc<dyn RadioTransport>,
        config: BeamConfig,
        motion: MotionSlot,
    ) -> Self {
        let (radio_tx, radio_rx) = mpsc::unbounded_channel();
        Self {
            mesh,
            radio,
            config,
            registry: ActiveConnectionSet::new(),
            motion,
            events: EventBus::default(),
            sessions: HashMap::new(),
            info: Arc::new(RwLock::new(HashMap::new())),
            radio_tx,
            radio_rx,
            shutdown: CancellationToken::new(),
            discovery_active: false,
        }
    }

    pub fn handle(&self) -> ManagerHandle {
        ManagerHandle {
            shutdown: self.shutdown.clone(),
            sessions: self.info.clone(),
            registry: self.registry.clone(),
            events: self.events.clone(),
        }
    }

    /// Start advertising/discovering and process events until shutdown or
    /// until the mesh event stream ends. Fails before touching the mesh if
    /// the config doesn't validate.
    pub async fn run(mut self, mut mesh_events: MeshEvents) -> beam_core::Result<()> {
        for w in self.config.validate().map_err(BeamError::Config)? {
            warn!("{}", w);
        }
        let mesh_cfg = self.config.mesh.clone();
        info!(
            service_id = %mesh_cfg.service_id,
            radio = %self.radio.local_identity(),
            "connection manager starting"
        );

        if mesh_cfg.advertise {
            self.mesh
                .advertise(&mesh_cfg.service_id, &mesh_cfg.display_name)
                .await?;
        }
        if mesh_cfg.discover {
            self.mesh.discover(&mesh_cfg.service_id).await?;
        }
        self.discovery_active = mesh_cfg.advertise || mesh_cfg.discover;

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("shutdown requested");
                    break;
                }
                event = mesh_events.recv() => match event {
                    Some(event) => self.on_mesh_event(event).await,
                    None => {
                        info!("mesh event stream closed");
                        break;
                    }
                },
                Some(event) = self.radio_rx.recv() => self.on_radio_event(event).await,
            }
        }

        self.teardown_all().await;
        Ok(())
    }

    async fn on_mesh_event(&mut self, event: MeshEvent) {
        match event {
            MeshEvent::PeerDiscovered { peer, display_name } => {
                if self.sessions.contains_key(&peer) {
                    debug!(peer = %peer, "already negotiating with peer");
                    return;
                }
                info!(peer = %peer, display_name = %display_name, "peer discovered");
                self.events.publish(Event::PeerDiscovered {
                    peer: peer.clone(),
                    display_name,
                });
                self.ensure_session(&peer);
                self.drive(&peer, Input::PeerDiscovered).await;
            }

            MeshEvent::ConnectionResult {
                peer,
                result: Ok(local_endpoint),
            } => {
                // Connections the peer initiated arrive without a discovery.
                self.ensure_session(&peer);
                self.drive(&peer, Input::MeshConnected { local_endpoint }).await;
            }

            MeshEvent::ConnectionResult {
                peer,
                result: Err(reason),
            } => {
                if !self.sessions.contains_key(&peer) {
                    debug!(peer = %peer, reason = %reason, "connection failure for unknown peer");
                    return;
                }
                let error = mesh_connect_error(&peer, reason);
                self.drive(
                    &peer,
                    Input::MeshConnectFailed {
                        reason: error.to_string(),
                    },
                )
                .await;
            }

            MeshEvent::Payload { peer, bytes } => match NegotiationMessage::decode(&bytes) {
                Ok(message) if self.sessions.contains_key(&peer) => {
                    debug!(peer = %peer, kind = message.kind(), "negotiation message received");
                    self.drive(&peer, Input::Message(message)).await;
                }
                Ok(message) => {
                    debug!(peer = %peer, kind = message.kind(), "message from peer without a session");
                }
                Err(e) => {
                    warn!(peer = %peer, error = %e, len = bytes.len(), "dropping malformed payload");
                }
            },

            MeshEvent::Disconnected { peer } => {
                info!(peer = %peer, "mesh connection closed");
                if self.teardown(&peer).await {
                    self.events.publish(Event::PeerDisconnected { peer });
                }
            }

            MeshEvent::PeerLost { peer } => {
                if self.registry.contains(&peer) {
                    debug!(peer = %peer, "peer left discovery but is still connected");
                    return;
                }
                debug!(peer = %peer, "peer lost before connecting");
                self.teardown(&peer).await;
            }
        }
    }

    async fn on_radio_event(&mut self, event: RadioEvent) {
        match event {
            RadioEvent::Linked { peer, connection } => {
                let Some(session) = self.sessions.get_mut(&peer) else {
                    debug!(peer = %peer, "radio link for a finished session, closing");
                    close_link(&peer, connection.link.as_ref()).await;
                    return;
                };
                session.link = Some(connection.link.clone());

                self.drive(&peer, Input::RadioLinked).await;

                let Some(session) = self.sessions.get_mut(&peer) else {
                    return;
                };
                if !session.negotiator.is_bridged() {
                    debug!(peer = %peer, "negotiation didn't take the link, closing");
                    if let Some(link) = session.link.take() {
                        close_link(&peer, link.as_ref()).await;
                    }
                    return;
                }

                if let Some(rssi) = connection.rssi {
                    let model = ProximityModel::from(&self.config.proximity);
                    let very_close = model.is_very_close(rssi);
                    debug!(peer = %peer, rssi, distance = ?model.estimate_distance(rssi), very_close, "proximity estimated");
                    self.events.publish(Event::ProximityEstimated {
                        peer: peer.clone(),
                        rssi,
                        very_close,
                    });
                }
            }

            RadioEvent::Failed { peer, error } => {
                if !self.sessions.contains_key(&peer) {
                    return;
                }
                self.drive(
                    &peer,
                    Input::RadioTimedOut {
                        reason: error.to_string(),
                    },
                )
                .await;
            }
        }
    }

    fn ensure_session(&mut self, peer: &PeerHandle) {
        if self.sessions.contains_key(peer) {
            return;
        }
        let session = Session {
            negotiator: Negotiator::new(peer.clone(), self.radio.local_identity()),
            cancel: self.shutdown.child_token(),
            link: None,
            tasks: Vec::new(),
        };
        self.sessions.insert(peer.clone(), session);
        self.sync_info(peer);
    }

    /// Feed one input to the peer's negotiator and carry out everything it
    /// asks for, including inputs that those actions produce.
    async fn drive(&mut self, peer: &PeerHandle, input: Input) {
        let mut pending = VecDeque::from([input]);
        while let Some(input) = pending.pop_front() {
            let Some(session) = self.sessions.get_mut(peer) else {
                break;
            };
            let actions = session.negotiator.handle(input);
            self.sync_info(peer);
            for action in actions {
                if let Some(next) = self.execute(peer, action).await {
                    pending.push_back(next);
                }
            }
        }
    }

    async fn execute(&mut self, peer: &PeerHandle, action: Action) -> Option<Input> {
        match action {
            Action::RequestMeshConnection => match self.mesh.connect(peer).await {
                Ok(()) => None,
                Err(e) => Some(Input::MeshConnectFailed {
                    reason: mesh_connect_error(peer, e.to_string()).to_string(),
                }),
            },
            Action::MarkActive => {
                self.registry.insert(peer.clone());
                self.stop_discovery().await;
                None
            }
            Action::Send(message) => {
                debug!(peer = %peer, kind = message.kind(), "sending negotiation message");
                if let Err(e) = self.mesh.send(peer, message.encode()).await {
                    warn!(peer = %peer, kind = message.kind(), error = %e, "failed to send negotiation message");
                }
                None
            }
            Action::StartRadioDiscovery { target } => {
                self.spawn_radio(peer, RadioRequest::Discover(target));
                None
            }
            Action::StartRadioListen => {
                self.spawn_radio(peer, RadioRequest::Listen);
                None
            }
            Action::Bridged { role } => {
                self.start_telemetry(peer, role);
                None
            }
            // The mesh connection stays up; nothing else to undo.
            Action::Abandon { .. } => None,
            Action::Discard { reason } => {
                debug!(peer = %peer, reason = %reason, "discarding session");
                self.teardown(peer).await;
                None
            }
            Action::Notify(event) => {
                self.events.publish(event);
                None
            }
        }
    }

    /// Advertising and discovery stop after the first connection.
    async fn stop_discovery(&mut self) {
        if !self.discovery_active {
            return;
        }
        self.discovery_active = false;
        match self.mesh.stop_discovery().await {
            Ok(()) => info!("connected, stopped advertising and discovery"),
            Err(e) => warn!(error = %e, "failed to stop discovery"),
        }
    }

    fn spawn_radio(&mut self, peer: &PeerHandle, request: RadioRequest) {
        let radio = self.radio.clone();
        let tx = self.radio_tx.clone();
        let scan_window = self.config.radio.scan_window();
        let listen_window = self.config.radio.discoverable_window();
        let Some(session) = self.sessions.get_mut(peer) else {
            return;
        };
        let cancel = session.cancel.clone();
        let peer = peer.clone();

        let task = tokio::spawn(async move {
            let attempt = async move {
                match request {
                    RadioRequest::Listen => radio.listen(listen_window).await,
                    RadioRequest::Discover(target) => radio.discover(&target, scan_window).await,
                }
            };
            let outcome = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(peer = %peer, "radio attempt cancelled");
                    return;
                }
                outcome = attempt => outcome,
            };
            let event = match outcome {
                Ok(connection) => RadioEvent::Linked { peer, connection },
                Err(error) => RadioEvent::Failed { peer, error },
            };
            // The manager may already be gone.
            let _ = tx.send(event);
        });
        session.tasks.push(task);
    }

    fn start_telemetry(&mut self, peer: &PeerHandle, role: Role) {
        let period = self.config.telemetry.period();
        let matcher = GestureMatcher::new(self.config.gesture.match_threshold);
        let registry = self.registry.clone();
        let events = self.events.clone();
        let motion = self.motion.clone();
        let Some(session) = self.sessions.get_mut(peer) else {
            return;
        };
        let Some(link) = session.link.clone() else {
            warn!(peer = %peer, "bridged without a radio link");
            return;
        };
        info!(peer = %peer, %role, period_ms = period.as_millis() as u64, "starting motion telemetry");

        let sender = {
            let link = link.clone();
            let slot = motion.clone();
            let cancel = session.cancel.clone();
            let peer = peer.clone();
            tokio::spawn(async move {
                let member = peer.clone();
                let sent = run_sender(link, slot, period, cancel, move || registry.contains(&member)).await;
                debug!(peer = %peer, sent, "telemetry sender finished");
            })
        };

        let receiver = {
            let cancel = session.cancel.clone();
            let peer = peer.clone();
            tokio::spawn(async move {
                let matched = peer.clone();
                let summary = run_receiver(link, motion, matcher, cancel, move |_, _| {
                    events.publish(Event::GestureMatched {
                        peer: matched,
                        at: Utc::now(),
                    });
                })
                .await;
                debug!(peer = %peer, ?summary, "telemetry receiver finished");
            })
        };

        session.tasks.extend([sender, receiver]);
    }

    /// Drop everything held for `peer`. Returns `false` if there was no
    /// session.
    async fn teardown(&mut self, peer: &PeerHandle) -> bool {
        self.registry.remove(peer);
        let Some(session) = self.sessions.remove(peer) else {
            self.sync_info(peer);
            return false;
        };
        session.cancel.cancel();
        if let Some(link) = &session.link {
            close_link(peer, link.as_ref()).await;
        }
        for task in session.tasks {
            if let Err(e) = task.await {
                warn!(peer = %peer, error = %e, "session task failed");
            }
        }
        self.sync_info(peer);
        debug!(peer = %peer, "session torn down");
        true
    }

    async fn teardown_all(&mut self) {
        let peers: Vec<PeerHandle> = self.sessions.keys().cloned().collect();
        for peer in peers {
            if self.registry.contains(&peer)
                && let Err(e) = self.mesh.disconnect(&peer).await
            {
                warn!(peer = %peer, error = %e, "failed to disconnect");
            }
            self.teardown(&peer).await;
        }
        self.events.publish(Event::Shutdown);
        info!("connection manager stopped");
    }

    fn sync_info(&self, peer: &PeerHandle) {
        let mut info = self.info.write();
        match self.sessions.get(peer) {
            Some(session) => {
                info.insert(peer.clone(), SessionInfo::from(&session.negotiator));
            }
            None => {
                info.remove(peer);
            }
        }
    }
}

fn mesh_connect_error(peer: &PeerHandle, reason: String) -> BeamError {
    BeamError::MeshConnect {
        peer: peer.to_string(),
        reason,
    }
}

async fn close_link(peer: &PeerHandle, link: &dyn RadioLink) {
    if let Err(e) = link.close().await {
        let e = BeamError::SocketClose(e.to_string());
        warn!(peer = %peer, error = %e, "radio link did not close cleanly");
    }
}
