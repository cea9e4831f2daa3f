//! In-memory mesh and radio backends.
//!
//! A [`SimMesh`] is a shared broker: every device that joins it gets a
//! [`SimMeshTransport`] plus the receiving end of its mesh event stream.
//! [`SimRadio`] does the same for the point-to-point radio, handing out pairs
//! of [`SimLinkEnd`]s once a scanner finds a listener.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use beam_core::{
    BeamError, EndpointId, MeshEvent, MeshEvents, MeshTransport, PeerHandle, RadioConnection,
    RadioLink, RadioTransport,
};
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};
use uuid::Uuid;

/// How often a scanning radio looks for its target.
const SCAN_POLL: Duration = Duration::from_millis(20);

// ── Mesh ───────────────────────────────────────────────────────

struct MeshNode {
    endpoint: EndpointId,
    display_name: String,
    advertising: Option<String>,
    discovering: Option<String>,
    reject_connections: bool,
    links: HashSet<PeerHandle>,
    events: mpsc::UnboundedSender<MeshEvent>,
}

#[derive(Default)]
struct MeshBroker {
    nodes: HashMap<PeerHandle, MeshNode>,
}

impl MeshBroker {
    fn emit(&self, to: &PeerHandle, event: MeshEvent) {
        if let Some(node) = self.nodes.get(to) {
            trace!(to = %to, ?event, "sim mesh event");
            // The device may have stopped listening; that's its business.
            let _ = node.events.send(event);
        }
    }

    /// Tell `discoverer` about every node advertising `service`.
    fn announce_advertisers(&self, discoverer: &PeerHandle, service: &str) {
        for (handle, node) in &self.nodes {
            if handle != discoverer && node.advertising.as_deref() == Some(service) {
                self.emit(
                    discoverer,
                    MeshEvent::PeerDiscovered {
                        peer: handle.clone(),
                        display_name: node.display_name.clone(),
                    },
                );
            }
        }
    }

    /// Tell every node discovering `service` about `advertiser`.
    fn announce_to_discoverers(&self, advertiser: &PeerHandle, service: &str) {
        let Some(display_name) = self.nodes.get(advertiser).map(|n| n.display_name.clone()) else {
            return;
        };
        for (handle, node) in &self.nodes {
            if handle != advertiser && node.discovering.as_deref() == Some(service) {
                self.emit(
                    handle,
                    MeshEvent::PeerDiscovered {
                        peer: advertiser.clone(),
                        display_name: display_name.clone(),
                    },
                );
            }
        }
    }
}

/// Shared in-memory mesh. Cheap to clone.
#[derive(Clone, Default)]
pub struct SimMesh {
    broker: Arc<Mutex<MeshBroker>>,
}

impl SimMesh {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a device under `handle` with a random endpoint id.
    pub fn join(&self, handle: &str) -> (SimMeshTransport, MeshEvents) {
        let endpoint = Uuid::new_v4().simple().to_string()[..8].to_uppercase();
        self.join_with_endpoint(handle, endpoint)
    }

    /// Add a device with a fixed endpoint id, for deterministic role election.
    pub fn join_with_endpoint(
        &self,
        handle: &str,
        endpoint: impl Into<String>,
    ) -> (SimMeshTransport, MeshEvents) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = PeerHandle::from(handle);
        let node = MeshNode {
            endpoint: EndpointId::new(endpoint),
            display_name: handle.to_string(),
            advertising: None,
            discovering: None,
            reject_connections: false,
            links: HashSet::new(),
            events: tx,
        };
        debug!(handle = %handle, endpoint = %node.endpoint, "device joined sim mesh");
        self.broker.lock().nodes.insert(handle.clone(), node);
        (
            SimMeshTransport {
                mesh: self.clone(),
                handle,
            },
            rx,
        )
    }

    /// Make connection requests to `handle` fail.
    pub fn set_reject_connections(&self, handle: &str, reject: bool) {
        if let Some(node) = self.broker.lock().nodes.get_mut(&PeerHandle::from(handle)) {
            node.reject_connections = reject;
        }
    }

    /// Remove a device: discoverers see it lost, linked peers see it disconnect.
    pub fn leave(&self, handle: &str) {
        let handle = PeerHandle::from(handle);
        let mut broker = self.broker.lock();
        let Some(node) = broker.nodes.remove(&handle) else {
            return;
        };
        for other in broker.nodes.values_mut() {
            other.links.remove(&handle);
        }
        for (other, peer) in &broker.nodes {
            let event = if node.links.contains(other) {
                MeshEvent::Disconnected {
                    peer: handle.clone(),
                }
            } else {
                MeshEvent::PeerLost {
                    peer: handle.clone(),
                }
            };
            let _ = peer.events.send(event);
        }
    }

    /// Whether two devices currently share a mesh connection.
    pub fn is_linked(&self, a: &str, b: &str) -> bool {
        self.broker
            .lock()
            .nodes
            .get(&PeerHandle::from(a))
            .is_some_and(|n| n.links.contains(&PeerHandle::from(b)))
    }
}

/// One device's view of a [`SimMesh`].
#[derive(Clone)]
pub struct SimMeshTransport {
    mesh: SimMesh,
    handle: PeerHandle,
}

impl SimMeshTransport {
    pub fn handle(&self) -> &PeerHandle {
        &self.handle
    }
}

#[async_trait]
impl MeshTransport for SimMeshTransport {
    async fn advertise(&self, service_id: &str, display_name: &str) -> beam_core::Result<()> {
        let mut broker = self.mesh.broker.lock();
        let node = broker
            .nodes
            .get_mut(&self.handle)
            .ok_or_else(|| BeamError::Transport(format!("{} left the mesh", self.handle)))?;
        node.advertising = Some(service_id.to_string());
        node.display_name = display_name.to_string();
        broker.announce_to_discoverers(&self.handle, service_id);
        Ok(())
    }

    async fn discover(&self, service_id: &str) -> beam_core::Result<()> {
        let mut broker = self.mesh.broker.lock();
        let node = broker
            .nodes
            .get_mut(&self.handle)
            .ok_or_else(|| BeamError::Transport(format!("{} left the mesh", self.handle)))?;
        node.discovering = Some(service_id.to_string());
        broker.announce_advertisers(&self.handle, service_id);
        Ok(())
    }

    async fn stop_discovery(&self) -> beam_core::Result<()> {
        if let Some(node) = self.mesh.broker.lock().nodes.get_mut(&self.handle) {
            node.advertising = None;
            node.discovering = None;
        }
        Ok(())
    }

    async fn connect(&self, peer: &PeerHandle) -> beam_core::Result<()> {
        let mut broker = self.mesh.broker.lock();
        let (reject, remote_endpoint) = match broker.nodes.get(peer) {
            Some(node) => (node.reject_connections, node.endpoint.clone()),
            None => return Err(BeamError::PeerUnreachable(peer.to_string())),
        };
        let local_endpoint = match broker.nodes.get(&self.handle) {
            Some(node) if node.links.contains(peer) => {
                debug!(from = %self.handle, to = %peer, "already connected");
                return Ok(());
            }
            Some(node) => node.endpoint.clone(),
            None => return Err(BeamError::Transport(format!("{} left the mesh", self.handle))),
        };

        if reject {
            broker.emit(
                &self.handle,
                MeshEvent::ConnectionResult {
                    peer: peer.clone(),
                    result: Err(format!("{peer} rejected the connection")),
                },
            );
            return Ok(());
        }

        if let Some(node) = broker.nodes.get_mut(&self.handle) {
            node.links.insert(peer.clone());
        }
        if let Some(node) = broker.nodes.get_mut(peer) {
            node.links.insert(self.handle.clone());
        }
        broker.emit(
            &self.handle,
            MeshEvent::ConnectionResult {
                peer: peer.clone(),
                result: Ok(local_endpoint),
            },
        );
        broker.emit(
            peer,
            MeshEvent::ConnectionResult {
                peer: self.handle.clone(),
                result: Ok(remote_endpoint),
            },
        );
        Ok(())
    }

    async fn send(&self, peer: &PeerHandle, payload: Bytes) -> beam_core::Result<()> {
        let broker = self.mesh.broker.lock();
        let linked = broker
            .nodes
            .get(&self.handle)
            .is_some_and(|n| n.links.contains(peer));
        if !linked {
            return Err(BeamError::PeerUnreachable(peer.to_string()));
        }
        broker.emit(
            peer,
            MeshEvent::Payload {
                peer: self.handle.clone(),
                bytes: payload,
            },
        );
        Ok(())
    }

    async fn disconnect(&self, peer: &PeerHandle) -> beam_core::Result<()> {
        let mut broker = self.mesh.broker.lock();
        let was_linked = broker
            .nodes
            .get_mut(&self.handle)
            .is_some_and(|n| n.links.remove(peer));
        if !was_linked {
            return Ok(());
        }
        if let Some(node) = broker.nodes.get_mut(peer) {
            node.links.remove(&self.handle);
        }
        broker.emit(peer, MeshEvent::Disconnected { peer: self.handle.clone() });
        broker.emit(&self.handle, MeshEvent::Disconnected { peer: peer.clone() });
        Ok(())
    }
}

// ── Radio ──────────────────────────────────────────────────────

/// One end of an in-memory radio link.
pub struct SimLinkEnd {
    tx: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    closed: CancellationToken,
}

impl SimLinkEnd {
    /// Two connected ends. Closing either one ends the link for both.
    pub fn pair() -> (SimLinkEnd, SimLinkEnd) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        let closed = CancellationToken::new();
        (
            SimLinkEnd {
                tx: Mutex::new(Some(a_tx)),
                rx: tokio::sync::Mutex::new(b_rx),
                closed: closed.clone(),
            },
            SimLinkEnd {
                tx: Mutex::new(Some(b_tx)),
                rx: tokio::sync::Mutex::new(a_rx),
                closed,
            },
        )
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

#[async_trait]
impl RadioLink for SimLinkEnd {
    async fn send(&self, frame: &[u8]) -> beam_core::Result<()> {
        if self.closed.is_cancelled() {
            return Err(BeamError::LinkClosed);
        }
        let tx = self.tx.lock().clone();
        match tx {
            Some(tx) => tx.send(frame.to_vec()).map_err(|_| BeamError::LinkClosed),
            None => Err(BeamError::LinkClosed),
        }
    }

    async fn recv(&self) -> beam_core::Result<Option<Vec<u8>>> {
        let mut rx = self.rx.lock().await;
        tokio::select! {
            biased;
            frame = rx.recv() => Ok(frame),
            _ = self.closed.cancelled() => Ok(None),
        }
    }

    async fn close(&self) -> beam_core::Result<()> {
        self.tx.lock().take();
        self.closed.cancel();
        Ok(())
    }
}

#[derive(Default)]
struct RadioBroker {
    listeners: HashMap<String, oneshot::Sender<SimLinkEnd>>,
    blocked: HashSet<String>,
    rssi: HashMap<(String, String), i16>,
}

/// Shared in-memory radio. Cheap to clone.
#[derive(Clone, Default)]
pub struct SimRadio {
    broker: Arc<Mutex<RadioBroker>>,
}

impl SimRadio {
    pub fn new() -> Self {
        Self::default()
    }

    /// A radio advertising under `identity`.
    pub fn transport(&self, identity: impl Into<String>) -> SimRadioTransport {
        SimRadioTransport {
            radio: self.clone(),
            identity: identity.into(),
        }
    }

    /// Signal strength `scanner` observes when it finds `target`.
    pub fn set_rssi(&self, scanner: &str, target: &str, rssi: i16) {
        self.broker
            .lock()
            .rssi
            .insert((scanner.to_string(), target.to_string()), rssi);
    }

    /// A blocked identity can listen but is never found by scanners.
    pub fn set_blocked(&self, identity: &str, blocked: bool) {
        let mut broker = self.broker.lock();
        if blocked {
            broker.blocked.insert(identity.to_string());
        } else {
            broker.blocked.remove(identity);
        }
    }
}

/// One device's view of a [`SimRadio`].
#[derive(Clone)]
pub struct SimRadioTransport {
    radio: SimRadio,
    identity: String,
}

#[async_trait]
impl RadioTransport for SimRadioTransport {
    fn local_identity(&self) -> String {
        self.identity.clone()
    }

    async fn listen(&self, window: Duration) -> beam_core::Result<RadioConnection> {
        let (tx, rx) = oneshot::channel();
        {
            let mut broker = self.radio.broker.lock();
            if !broker.blocked.contains(&self.identity) {
                broker.listeners.insert(self.identity.clone(), tx);
            }
        }
        debug!(identity = %self.identity, ?window, "radio discoverable");

        match tokio::time::timeout(window, rx).await {
            Ok(Ok(end)) => Ok(RadioConnection {
                link: Arc::new(end),
                rssi: None,
            }),
            Ok(Err(_)) => Err(BeamError::LinkClosed),
            Err(_) => {
                self.radio.broker.lock().listeners.remove(&self.identity);
                Err(BeamError::RadioTimeout {
                    window_secs: window.as_secs(),
                })
            }
        }
    }

    async fn discover(&self, target: &str, window: Duration) -> beam_core::Result<RadioConnection> {
        let deadline = tokio::time::Instant::now() + window;
        debug!(identity = %self.identity, target, ?window, "radio scanning");

        loop {
            let found = {
                let mut broker = self.radio.broker.lock();
                broker.listeners.remove(target).map(|tx| {
                    let rssi = broker
                        .rssi
                        .get(&(self.identity.clone(), target.to_string()))
                        .copied();
                    (tx, rssi)
                })
            };
            if let Some((tx, rssi)) = found {
                let (mine, theirs) = SimLinkEnd::pair();
                if tx.send(theirs).is_ok() {
                    return Ok(RadioConnection {
                        link: Arc::new(mine),
                        rssi,
                    });
                }
                // The listener gave up between registering and being found.
                continue;
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(BeamError::RadioTimeout {
                    window_secs: window.as_secs(),
                });
            }
            tokio::time::sleep(SCAN_POLL).await;
        }
    }
}
