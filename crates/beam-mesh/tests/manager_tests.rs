#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use beam_config::BeamConfig;
    use beam_core::{
        BeamError, Event, MeshEvent, MeshEvents, MeshTransport, MotionSample, PeerHandle, Role,
    };
    use beam_mesh::sim::{SimMesh, SimMeshTransport, SimRadio};
    use beam_mesh::{ConnectionManager, ManagerHandle, NegotiationMessage, NegotiationState};
    use beam_motion::MotionSlot;
    use tokio::sync::broadcast;
    use tokio::task::JoinHandle;

    const WAIT: Duration = Duration::from_secs(5);

    struct Device {
        handle: ManagerHandle,
        events: broadcast::Receiver<Event>,
        motion: MotionSlot,
        mesh: SimMeshTransport,
        task: JoinHandle<beam_core::Result<()>>,
    }

    fn fast_config() -> BeamConfig {
        let mut config = BeamConfig::default();
        config.radio.discoverable_secs = 2;
        config.radio.scan_secs = 2;
        config.telemetry.period_ms = 10;
        config
    }

    fn spawn_device(
        mesh: &SimMesh,
        radio: &SimRadio,
        name: &str,
        endpoint: &str,
        config: BeamConfig,
    ) -> Device {
        let (transport, rx) = mesh.join_with_endpoint(name, endpoint);
        let motion = MotionSlot::new();
        let manager = ConnectionManager::new(
            Arc::new(transport.clone()),
            Arc::new(radio.transport(format!("radio-{name}"))),
            config,
            motion.clone(),
        );
        let handle = manager.handle();
        let events = handle.subscribe();
        let task = tokio::spawn(manager.run(rx));
        Device {
            handle,
            events,
            motion,
            mesh: transport,
            task,
        }
    }

    async fn wait_for<F>(rx: &mut broadcast::Receiver<Event>, pred: F) -> Event
    where
        F: Fn(&Event) -> bool,
    {
        tokio::time::timeout(WAIT, async {
            loop {
                match rx.recv().await {
                    Ok(event) if pred(&event) => return event,
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(e) => panic!("event bus closed: {e}"),
                }
            }
        })
        .await
        .expect("timed out waiting for event")
    }

    async fn next_payload(rx: &mut MeshEvents) -> NegotiationMessage {
        tokio::time::timeout(WAIT, async {
            loop {
                match rx.recv().await {
                    Some(MeshEvent::Payload { bytes, .. }) => {
                        return NegotiationMessage::decode(&bytes).unwrap();
                    }
                    Some(_) => continue,
                    None => panic!("mesh stream closed"),
                }
            }
        })
        .await
        .expect("timed out waiting for payload")
    }

    /// Sim mesh whose outgoing connection requests always fail.
    struct RefusingMesh(SimMeshTransport);

    #[async_trait]
    impl MeshTransport for RefusingMesh {
        async fn advertise(&self, service_id: &str, display_name: &str) -> beam_core::Result<()> {
            self.0.advertise(service_id, display_name).await
        }

        async fn discover(&self, service_id: &str) -> beam_core::Result<()> {
            self.0.discover(service_id).await
        }

        async fn stop_discovery(&self) -> beam_core::Result<()> {
            self.0.stop_discovery().await
        }

        async fn connect(&self, peer: &PeerHandle) -> beam_core::Result<()> {
            Err(BeamError::PeerUnreachable(peer.to_string()))
        }

        async fn send(&self, peer: &PeerHandle, payload: bytes::Bytes) -> beam_core::Result<()> {
            self.0.send(peer, payload).await
        }

        async fn disconnect(&self, peer: &PeerHandle) -> beam_core::Result<()> {
            self.0.disconnect(peer).await
        }
    }

    async fn bridged_pair(mesh: &SimMesh, radio: &SimRadio) -> (Device, Device) {
        let mut a = spawn_device(mesh, radio, "a", "AAAA", fast_config());
        let mut b = spawn_device(mesh, radio, "b", "BBBB", fast_config());
        wait_for(&mut a.events, |e| matches!(e, Event::RadioBridged { .. })).await;
        wait_for(&mut b.events, |e| matches!(e, Event::RadioBridged { .. })).await;
        (a, b)
    }

    // ── Happy path ─────────────────────────────────────────────

    #[tokio::test]
    async fn test_two_devices_bridge_with_complementary_roles() {
        let mesh = SimMesh::new();
        let radio = SimRadio::new();
        let mut a = spawn_device(&mesh, &radio, "a", "AAAA", fast_config());
        let mut b = spawn_device(&mesh, &radio, "b", "BBBB", fast_config());

        let a_role = wait_for(&mut a.events, |e| matches!(e, Event::RoleElected { .. })).await;
        assert_eq!(
            a_role,
            Event::RoleElected {
                peer: PeerHandle::from("b"),
                role: Role::Server,
                target_identity: "radio-b".into(),
            }
        );
        let b_bridge = wait_for(&mut b.events, |e| matches!(e, Event::RadioBridged { .. })).await;
        assert_eq!(
            b_bridge,
            Event::RadioBridged {
                peer: PeerHandle::from("a"),
                role: Role::Client,
            }
        );
        wait_for(&mut a.events, |e| matches!(e, Event::RadioBridged { role: Role::Server, .. })).await;

        let a_view = a.handle.session(&PeerHandle::from("b")).unwrap();
        assert!(a_view.is_bridged());
        assert_eq!(a_view.role, Some(Role::Server));
        let b_view = b.handle.session(&PeerHandle::from("a")).unwrap();
        assert_eq!(b_view.role, Some(Role::Client));
        assert_eq!(b_view.target_identity.as_deref(), Some("radio-a"));

        assert!(a.handle.active_connections().contains(&PeerHandle::from("b")));
        assert!(b.handle.active_connections().contains(&PeerHandle::from("a")));
        assert!(mesh.is_linked("a", "b"));
    }

    #[tokio::test]
    async fn test_client_reports_proximity_from_scan() {
        let mesh = SimMesh::new();
        let radio = SimRadio::new();
        radio.set_rssi("radio-b", "radio-a", -30);
        let mut a = spawn_device(&mesh, &radio, "a", "AAAA", fast_config());
        let mut b = spawn_device(&mesh, &radio, "b", "BBBB", fast_config());

        let event = wait_for(&mut b.events, |e| matches!(e, Event::ProximityEstimated { .. })).await;
        assert_eq!(
            event,
            Event::ProximityEstimated {
                peer: PeerHandle::from("a"),
                rssi: -30,
                very_close: true,
            }
        );
        wait_for(&mut a.events, |e| matches!(e, Event::RadioBridged { .. })).await;
    }

    #[tokio::test]
    async fn test_proximity_follows_bridge() {
        let mesh = SimMesh::new();
        let radio = SimRadio::new();
        radio.set_rssi("radio-b", "radio-a", -30);
        let _a = spawn_device(&mesh, &radio, "a", "AAAA", fast_config());
        let mut b = spawn_device(&mesh, &radio, "b", "BBBB", fast_config());

        let mut bridged = false;
        tokio::time::timeout(WAIT, async {
            loop {
                match b.events.recv().await.unwrap() {
                    Event::RadioBridged { .. } => bridged = true,
                    Event::ProximityEstimated { .. } => break,
                    _ => {}
                }
            }
        })
        .await
        .expect("timed out waiting for proximity");
        assert!(bridged, "proximity reported before the link was bridged");
    }

    #[tokio::test]
    async fn test_shared_bump_matches_on_both_sides() {
        let mesh = SimMesh::new();
        let radio = SimRadio::new();
        let (mut a, mut b) = bridged_pair(&mesh, &radio).await;

        let jolt = MotionSample::new(0.8, 0.8, 0.0);
        a.motion.publish(jolt);
        b.motion.publish(jolt);

        let a_match = wait_for(&mut a.events, |e| matches!(e, Event::GestureMatched { .. })).await;
        let b_match = wait_for(&mut b.events, |e| matches!(e, Event::GestureMatched { .. })).await;
        assert!(matches!(a_match, Event::GestureMatched { peer, .. } if peer == PeerHandle::from("b")));
        assert!(matches!(b_match, Event::GestureMatched { peer, .. } if peer == PeerHandle::from("a")));
    }

    // ── Failure paths ──────────────────────────────────────────

    #[tokio::test]
    async fn test_rejected_connection_discards_session() {
        let mesh = SimMesh::new();
        let radio = SimRadio::new();

        let mut advertiser = fast_config();
        advertiser.mesh.discover = false;
        let mut discoverer = fast_config();
        discoverer.mesh.advertise = false;

        let _b = spawn_device(&mesh, &radio, "b", "BBBB", advertiser);
        mesh.set_reject_connections("b", true);
        let mut a = spawn_device(&mesh, &radio, "a", "AAAA", discoverer);

        let event = wait_for(&mut a.events, |e| matches!(e, Event::MeshConnectFailed { .. })).await;
        assert!(event.status_line().contains("rejected"));
        match event {
            Event::MeshConnectFailed { reason, .. } => {
                assert!(reason.starts_with("mesh connection failed: b:"), "{reason}");
            }
            other => panic!("unexpected event {other:?}"),
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(a.handle.session(&PeerHandle::from("b")).is_none());
        assert!(a.handle.active_connections().is_empty());
    }

    #[tokio::test]
    async fn test_failed_connect_request_is_reported_as_mesh_connect() {
        let mesh = SimMesh::new();
        let radio = SimRadio::new();

        let mut advertiser = fast_config();
        advertiser.mesh.discover = false;
        let _b = spawn_device(&mesh, &radio, "b", "BBBB", advertiser);

        let mut discoverer = fast_config();
        discoverer.mesh.advertise = false;
        let (transport, rx) = mesh.join_with_endpoint("a", "AAAA");
        let manager = ConnectionManager::new(
            Arc::new(RefusingMesh(transport)),
            Arc::new(radio.transport("radio-a")),
            discoverer,
            MotionSlot::new(),
        );
        let handle = manager.handle();
        let mut events = handle.subscribe();
        let _task = tokio::spawn(manager.run(rx));

        let event = wait_for(&mut events, |e| matches!(e, Event::MeshConnectFailed { .. })).await;
        assert_eq!(
            event,
            Event::MeshConnectFailed {
                peer: PeerHandle::from("b"),
                reason: "mesh connection failed: b: mesh peer unreachable: b".into(),
            }
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(handle.session(&PeerHandle::from("b")).is_none());
    }

    #[tokio::test]
    async fn test_invalid_config_fails_before_advertising() {
        let mesh = SimMesh::new();
        let radio = SimRadio::new();
        let mut config = fast_config();
        config.telemetry.period_ms = 0;
        let a = spawn_device(&mesh, &radio, "a", "AAAA", config);

        let err = a.task.await.unwrap().unwrap_err();
        assert!(
            matches!(&err, BeamError::Config(msg) if msg.contains("telemetry.period_ms")),
            "{err}"
        );

        let mut observer = fast_config();
        observer.mesh.advertise = false;
        let mut b = spawn_device(&mesh, &radio, "b", "BBBB", observer);
        tokio::time::sleep(Duration::from_millis(50)).await;
        while let Ok(event) = b.events.try_recv() {
            assert!(!matches!(event, Event::PeerDiscovered { .. }), "{event:?}");
        }
    }

    #[tokio::test]
    async fn test_radio_timeout_abandons_but_keeps_mesh() {
        let mesh = SimMesh::new();
        let radio = SimRadio::new();
        radio.set_blocked("radio-a", true);

        let mut config = fast_config();
        config.radio.scan_secs = 1;
        config.radio.discoverable_secs = 1;
        let mut a = spawn_device(&mesh, &radio, "a", "AAAA", config.clone());
        let mut b = spawn_device(&mesh, &radio, "b", "BBBB", config);

        wait_for(&mut b.events, |e| matches!(e, Event::NegotiationAbandoned { .. })).await;
        wait_for(&mut a.events, |e| matches!(e, Event::NegotiationAbandoned { .. })).await;

        let b_view = b.handle.session(&PeerHandle::from("a")).unwrap();
        assert_eq!(b_view.state, NegotiationState::RoleKnown);
        assert!(b_view.abandoned.is_some());
        let a_view = a.handle.session(&PeerHandle::from("b")).unwrap();
        assert_eq!(a_view.state, NegotiationState::AwaitingSecondTransportReady);

        assert!(mesh.is_linked("a", "b"));
        assert!(a.handle.active_connections().contains(&PeerHandle::from("b")));
    }

    #[tokio::test]
    async fn test_malformed_payload_is_dropped() {
        let mesh = SimMesh::new();
        let radio = SimRadio::new();
        let mut config = fast_config();
        config.mesh.discover = false;
        let a = spawn_device(&mesh, &radio, "a", "AAAA", config);

        let (raw, mut raw_rx) = mesh.join_with_endpoint("x", "ZZZZ");
        raw.connect(&PeerHandle::from("a")).await.unwrap();
        let peer_a = PeerHandle::from("a");

        assert_eq!(
            next_payload(&mut raw_rx).await,
            NegotiationMessage::EndpointIdExchange("AAAA".into())
        );

        raw.send(&peer_a, bytes::Bytes::from_static(b"\x7fgarbage"))
            .await
            .unwrap();
        raw.send(&peer_a, NegotiationMessage::EndpointIdExchange("ZZZZ".into()).encode())
            .await
            .unwrap();

        assert_eq!(
            next_payload(&mut raw_rx).await,
            NegotiationMessage::SecondTransportNameExchange("radio-a".into())
        );
        let view = a.handle.session(&PeerHandle::from("x")).unwrap();
        assert_eq!(view.state, NegotiationState::IdExchanged);
        assert_eq!(view.role, Some(Role::Server));
    }

    // ── Teardown ───────────────────────────────────────────────

    #[tokio::test]
    async fn test_disconnect_tears_down_both_sessions() {
        let mesh = SimMesh::new();
        let radio = SimRadio::new();
        let (mut a, mut b) = bridged_pair(&mesh, &radio).await;

        b.mesh.disconnect(&PeerHandle::from("a")).await.unwrap();

        wait_for(&mut a.events, |e| matches!(e, Event::PeerDisconnected { .. })).await;
        wait_for(&mut b.events, |e| matches!(e, Event::PeerDisconnected { .. })).await;
        assert!(a.handle.session(&PeerHandle::from("b")).is_none());
        assert!(a.handle.active_connections().is_empty());
        assert!(b.handle.sessions().is_empty());
    }

    #[tokio::test]
    async fn test_removed_peer_stops_receiving_telemetry() {
        let mesh = SimMesh::new();
        let radio = SimRadio::new();
        let (mut a, mut b) = bridged_pair(&mesh, &radio).await;

        // Only a's sender consults a's active set.
        assert!(a.handle.active_connections().remove(&PeerHandle::from("b")));
        tokio::time::sleep(Duration::from_millis(50)).await;

        let jolt = MotionSample::new(0.8, 0.8, 0.0);
        a.motion.publish(jolt);
        b.motion.publish(jolt);

        wait_for(&mut a.events, |e| matches!(e, Event::GestureMatched { .. })).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        while let Ok(event) = b.events.try_recv() {
            assert!(!matches!(event, Event::GestureMatched { .. }), "{event:?}");
        }
    }

    #[tokio::test]
    async fn test_shutdown_disconnects_peer() {
        let mesh = SimMesh::new();
        let radio = SimRadio::new();
        let (mut a, mut b) = bridged_pair(&mesh, &radio).await;

        a.handle.shutdown();
        wait_for(&mut a.events, |e| matches!(e, Event::Shutdown)).await;
        a.task.await.unwrap().unwrap();

        wait_for(&mut b.events, |e| matches!(e, Event::PeerDisconnected { .. })).await;
        assert!(!mesh.is_linked("a", "b"));
        assert!(a.handle.sessions().is_empty());
    }
}
