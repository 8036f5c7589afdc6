//! Handshake scenarios over real framed streams: acceptance, legacy
//! replies, the handshake gate, timeouts, and fatal version checks.

mod common;

use std::time::Duration;

use common::{TestBridge, hello};
use tether_daemon::config::BridgeConfig;
use tether_daemon::session::SessionError;
use tether_proto::envelope::envelope::Payload;
use tether_proto::{Capability, CapabilitySet, ErrorCode, PeerRole, TelemetryFrame};

#[tokio::test]
async fn happy_handshake_negotiates_capability_intersection() {
    let mut config = BridgeConfig::default();
    config.server.capabilities = CapabilitySet::try_from(vec![
        "TELEMETRY_V1".to_string(),
        "HELLO_ACK_V1".to_string(),
        "ACTION_V1".to_string(),
    ])
    .unwrap();
    let bridge = TestBridge::with_config(config);

    let mut peer = bridge.connect();
    peer.send(Payload::Hello(hello(
        "gamepc",
        PeerRole::GameClient,
        &[Capability::TelemetryV1, Capability::HelloAckV1],
    )))
    .await;

    let reply = peer.recv().await;
    assert_eq!(reply.seq, 1, "first server envelope");
    assert_eq!(reply.ack, 1, "server acks the hello");

    let Some(Payload::HelloAck(ack)) = reply.payload else {
        panic!("expected hello_ack");
    };
    assert!(ack.accepted);
    assert!(!ack.handshake_id.is_empty());

    // capabilities = client ∩ server, a subset of both sides.
    let negotiated = CapabilitySet::from_wire(&ack.capabilities);
    assert!(negotiated.contains(Capability::TelemetryV1));
    assert!(negotiated.contains(Capability::HelloAckV1));
    assert!(!negotiated.contains(Capability::ActionV1), "client did not advertise it");
    assert!(!negotiated.contains(Capability::TimesyncV1), "server did not offer it");
}

#[tokio::test]
async fn server_assigns_its_own_handshake_id() {
    let bridge = TestBridge::new();
    let mut peer = bridge.connect();

    let mut proposal = hello("gamepc", PeerRole::GameClient, &[Capability::HelloAckV1]);
    proposal.handshake_id = "client-proposed-id".to_string();
    peer.send(Payload::Hello(proposal)).await;

    match peer.recv_payload().await {
        Payload::HelloAck(ack) => {
            assert!(ack.accepted);
            assert_ne!(ack.handshake_id, "client-proposed-id");
        }
        other => panic!("expected hello_ack, got {}", other.kind()),
    }
}

#[tokio::test]
async fn legacy_client_gets_a_hello_reply() {
    let bridge = TestBridge::new();
    let mut peer = bridge.connect();

    // No HELLO_ACK_V1: the reply is a legacy Hello from the bridge.
    let reply = peer
        .handshake("gamepc", PeerRole::GameClient, &[Capability::TelemetryV1])
        .await;

    match reply.payload {
        Some(Payload::Hello(h)) => {
            assert_eq!(h.role(), PeerRole::BridgeServer);
            assert_eq!(h.agent_id, "bridge");
            assert!(h.client_version.starts_with("tether-daemon/"));
        }
        other => panic!(
            "expected legacy hello reply, got {}",
            other.map_or("none", |p| p.kind())
        ),
    }
}

#[tokio::test(start_paused = true)]
async fn silent_client_times_out_with_error_frame() {
    let bridge = TestBridge::new();
    let mut peer = bridge.connect();

    // Send nothing; the 3 s hello budget elapses.
    match peer.recv_payload().await {
        Payload::Error(e) => assert_eq!(e.code(), ErrorCode::HelloTimeout),
        other => panic!("expected error frame, got {}", other.kind()),
    }
    peer.assert_closed().await;

    let result = peer.task.await.unwrap();
    assert!(matches!(result, Err(SessionError::HelloTimeout { .. })));
}

#[tokio::test]
async fn handshake_gate_rejects_payloads_before_hello() {
    let bridge = TestBridge::new();
    let mut peer = bridge.connect();

    peer.send(Payload::Telemetry(TelemetryFrame {
        state_version: 1,
        ..TelemetryFrame::default()
    }))
    .await;

    match peer.recv_payload().await {
        Payload::Error(e) => assert_eq!(e.code(), ErrorCode::HandshakeRequired),
        other => panic!("expected error frame, got {}", other.kind()),
    }
    peer.assert_closed().await;
    assert_eq!(bridge.metrics().telemetry_dropped_count("stale"), 0.0);
}

#[tokio::test]
async fn version_mismatch_at_hello_is_fatal() {
    let bridge = TestBridge::new();
    let mut peer = bridge.connect();

    peer.send_version(
        99,
        Payload::Hello(hello("gamepc", PeerRole::GameClient, &[Capability::HelloAckV1])),
    )
    .await;

    match peer.recv_payload().await {
        Payload::Error(e) => assert_eq!(e.code(), ErrorCode::VersionMismatch),
        other => panic!("expected error frame, got {}", other.kind()),
    }
    peer.assert_closed().await;

    let result = peer.task.await.unwrap();
    assert!(matches!(result, Err(SessionError::VersionMismatch { got: 99 })));
}

#[tokio::test]
async fn unspecified_role_is_rejected() {
    let bridge = TestBridge::new();
    let mut peer = bridge.connect();

    let reply = peer
        .handshake("mystery", PeerRole::Unspecified, &[Capability::HelloAckV1])
        .await;
    match reply.payload {
        Some(Payload::HelloAck(ack)) => {
            assert!(!ack.accepted);
            assert_eq!(ack.reason, "unsupported peer role");
            assert!(ack.capabilities.is_empty());
        }
        other => panic!(
            "expected rejecting hello_ack, got {}",
            other.map_or("none", |p| p.kind())
        ),
    }
}

#[tokio::test]
async fn orchestrator_cap_rejects_the_surplus_subscriber() {
    let mut config = BridgeConfig::default();
    config.limits.max_orchestrators = 1;
    let bridge = TestBridge::with_config(config);

    let mut first = bridge.connect();
    first
        .establish("orch-1", PeerRole::Orchestrator, &[Capability::HelloAckV1])
        .await;

    let mut second = bridge.connect();
    let reply = second
        .handshake("orch-2", PeerRole::Orchestrator, &[Capability::HelloAckV1])
        .await;
    match reply.payload {
        Some(Payload::HelloAck(ack)) => {
            assert!(!ack.accepted);
            assert!(ack.reason.contains("orchestrator limit"));
        }
        other => panic!(
            "expected rejecting hello_ack, got {}",
            other.map_or("none", |p| p.kind())
        ),
    }
}

#[tokio::test]
async fn duplicate_agent_identity_is_rejected() {
    let bridge = TestBridge::new();

    let mut first = bridge.connect();
    first
        .establish("gamepc", PeerRole::GameClient, &[Capability::HelloAckV1])
        .await;

    let mut second = bridge.connect();
    let reply = second
        .handshake("gamepc", PeerRole::GameClient, &[Capability::HelloAckV1])
        .await;
    match reply.payload {
        Some(Payload::HelloAck(ack)) => {
            assert!(!ack.accepted);
            assert!(ack.reason.contains("already connected"));
        }
        other => panic!(
            "expected rejecting hello_ack, got {}",
            other.map_or("none", |p| p.kind())
        ),
    }

    // The first session is unaffected.
    first
        .send(Payload::TimeSyncReq(tether_proto::TimeSyncRequest {
            t_client_mono_ms: 7,
        }))
        .await;
    match first.recv_payload().await {
        Payload::TimeSyncRes(res) => assert_eq!(res.echo.unwrap().t_client_mono_ms, 7),
        other => panic!("expected timesync reply, got {}", other.kind()),
    }
}

#[tokio::test]
async fn hello_after_establishment_is_unexpected_but_not_fatal() {
    let bridge = TestBridge::new();
    let mut peer = bridge.connect();
    peer.establish("gamepc", PeerRole::GameClient, &[Capability::HelloAckV1])
        .await;

    peer.send(Payload::Hello(hello(
        "gamepc",
        PeerRole::GameClient,
        &[Capability::HelloAckV1],
    )))
    .await;
    match peer.recv_payload().await {
        Payload::Error(e) => assert_eq!(e.code(), ErrorCode::UnexpectedPayload),
        other => panic!("expected error frame, got {}", other.kind()),
    }

    // Still established: timesync round-trips.
    peer.send(Payload::TimeSyncReq(tether_proto::TimeSyncRequest {
        t_client_mono_ms: 11,
    }))
    .await;
    match peer.recv_payload().await {
        Payload::TimeSyncRes(res) => assert_eq!(res.echo.unwrap().t_client_mono_ms, 11),
        other => panic!("expected timesync reply, got {}", other.kind()),
    }
    peer.assert_quiet(Duration::from_millis(100)).await;
}
