#[cfg(test)]
mod tests {
    use std::time::Duration;

    use beam_core::{BeamError, MeshEvent, MeshTransport, PeerHandle, RadioLink, RadioTransport};
    use beam_mesh::sim::{SimLinkEnd, SimMesh, SimRadio};
    use bytes::Bytes;

    // ── Mesh ───────────────────────────────────────────────────

    #[tokio::test]
    async fn test_late_advertiser_is_still_discovered() {
        let mesh = SimMesh::new();
        let (a, mut a_rx) = mesh.join("a");
        let (b, _b_rx) = mesh.join("b");

        a.discover("svc").await.unwrap();
        assert!(a_rx.try_recv().is_err());
        b.advertise("svc", "Bee").await.unwrap();

        match a_rx.recv().await.unwrap() {
            MeshEvent::PeerDiscovered { peer, display_name } => {
                assert_eq!(peer, PeerHandle::from("b"));
                assert_eq!(display_name, "Bee");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_other_services_are_invisible() {
        let mesh = SimMesh::new();
        let (a, mut a_rx) = mesh.join("a");
        let (b, _b_rx) = mesh.join("b");
        b.advertise("other", "b").await.unwrap();
        a.discover("svc").await.unwrap();
        assert!(a_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_connect_reports_each_sides_endpoint() {
        let mesh = SimMesh::new();
        let (a, mut a_rx) = mesh.join_with_endpoint("a", "E-A");
        let (_b, mut b_rx) = mesh.join_with_endpoint("b", "E-B");

        a.connect(&PeerHandle::from("b")).await.unwrap();
        assert!(matches!(
            a_rx.recv().await.unwrap(),
            MeshEvent::ConnectionResult { result: Ok(id), .. } if id.as_str() == "E-A"
        ));
        assert!(matches!(
            b_rx.recv().await.unwrap(),
            MeshEvent::ConnectionResult { peer, result: Ok(id) } if id.as_str() == "E-B" && peer.as_str() == "a"
        ));

        // A second request for the same pair is a no-op.
        a.connect(&PeerHandle::from("b")).await.unwrap();
        assert!(a_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_connect_to_unknown_peer_fails() {
        let mesh = SimMesh::new();
        let (a, _rx) = mesh.join("a");
        let err = a.connect(&PeerHandle::from("ghost")).await.unwrap_err();
        assert!(matches!(err, BeamError::PeerUnreachable(_)));
    }

    #[tokio::test]
    async fn test_send_requires_connection_and_keeps_order() {
        let mesh = SimMesh::new();
        let (a, _a_rx) = mesh.join("a");
        let (_b, mut b_rx) = mesh.join("b");
        let peer_b = PeerHandle::from("b");

        assert!(a.send(&peer_b, Bytes::from_static(b"x")).await.is_err());

        a.connect(&peer_b).await.unwrap();
        b_rx.recv().await.unwrap();
        for i in 0u8..5 {
            a.send(&peer_b, Bytes::from(vec![i])).await.unwrap();
        }
        for i in 0u8..5 {
            match b_rx.recv().await.unwrap() {
                MeshEvent::Payload { bytes, .. } => assert_eq!(&bytes[..], &[i]),
                other => panic!("unexpected event {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_leave_reports_lost_or_disconnected() {
        let mesh = SimMesh::new();
        let (a, mut a_rx) = mesh.join("a");
        let (_b, _b_rx) = mesh.join("b");
        let (_c, mut c_rx) = mesh.join("c");
        a.connect(&PeerHandle::from("b")).await.unwrap();
        a_rx.recv().await.unwrap();

        mesh.leave("b");
        assert!(matches!(a_rx.recv().await.unwrap(), MeshEvent::Disconnected { .. }));
        assert!(matches!(c_rx.recv().await.unwrap(), MeshEvent::PeerLost { .. }));
        assert!(!mesh.is_linked("a", "b"));
    }

    // ── Radio ──────────────────────────────────────────────────

    #[tokio::test]
    async fn test_link_pair_carries_frames_both_ways() {
        let (left, right) = SimLinkEnd::pair();
        left.send(b"ping").await.unwrap();
        right.send(b"pong").await.unwrap();
        assert_eq!(right.recv().await.unwrap().unwrap(), b"ping");
        assert_eq!(left.recv().await.unwrap().unwrap(), b"pong");
    }

    #[tokio::test]
    async fn test_closing_one_end_ends_both() {
        let (left, right) = SimLinkEnd::pair();
        left.close().await.unwrap();
        assert!(right.recv().await.unwrap().is_none());
        assert!(left.recv().await.unwrap().is_none());
        assert!(matches!(right.send(b"x").await, Err(BeamError::LinkClosed)));
        assert!(right.is_closed());
    }

    #[tokio::test]
    async fn test_scanner_finds_listener() {
        let radio = SimRadio::new();
        radio.set_rssi("scanner", "server", -42);
        let server = radio.transport("server");
        let scanner = radio.transport("scanner");

        let listening = tokio::spawn(async move { server.listen(Duration::from_secs(2)).await });
        let found = scanner.discover("server", Duration::from_secs(2)).await.unwrap();
        let accepted = listening.await.unwrap().unwrap();

        assert_eq!(found.rssi, Some(-42));
        assert_eq!(accepted.rssi, None);
        found.link.send(b"G0;0;0").await.unwrap();
        assert_eq!(accepted.link.recv().await.unwrap().unwrap(), b"G0;0;0");
    }

    #[tokio::test]
    async fn test_scan_times_out_without_listener() {
        let radio = SimRadio::new();
        let scanner = radio.transport("scanner");
        let err = scanner
            .discover("nobody", Duration::from_millis(60))
            .await
            .unwrap_err();
        assert!(matches!(err, BeamError::RadioTimeout { .. }));
    }

    #[tokio::test]
    async fn test_blocked_listener_times_out() {
        let radio = SimRadio::new();
        radio.set_blocked("server", true);
        let server = radio.transport("server");
        let err = server.listen(Duration::from_millis(50)).await.unwrap_err();
        assert!(matches!(err, BeamError::RadioTimeout { .. }));
        assert_eq!(server.local_identity(), "server");
    }
}
