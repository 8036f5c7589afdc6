//! Shared harness for bridge integration tests.
//!
//! Sessions are generic over the transport, so tests drive the real
//! session/router/correlator stack over in-memory duplex streams with
//! real framed envelopes; only the TLS layer is absent.

// Each integration test binary compiles its own copy of this module and
// uses a different subset of it.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tether_daemon::config::BridgeConfig;
use tether_daemon::correlator::{self, CorrelatorConfig};
use tether_daemon::metrics::{BridgeMetrics, MetricsRegistry};
use tether_daemon::registry::SessionRegistry;
use tether_daemon::session::{SessionContext, SessionError, run_session};
use tether_proto::envelope::envelope::Payload;
use tether_proto::{
    Capability, Envelope, EnvelopeCodec, Hello, HelloAck, PROTOCOL_VERSION, PeerRole,
};
use tokio::io::DuplexStream;
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;

/// Transport buffer for the in-memory duplex pair.
const DUPLEX_BUFFER: usize = 64 * 1024;

/// Generous receive budget; paused-clock tests auto-advance through it.
pub const RECV_BUDGET: Duration = Duration::from_secs(5);

/// One bridge instance: shared context plus per-test handles.
pub struct TestBridge {
    ctx: SessionContext,
    metrics: BridgeMetrics,
}

impl TestBridge {
    /// Bridge with default configuration.
    pub fn new() -> Self {
        Self::with_config(BridgeConfig::default())
    }

    /// Bridge with a customized configuration.
    pub fn with_config(config: BridgeConfig) -> Self {
        let config = Arc::new(config);
        let metrics = MetricsRegistry::new()
            .expect("metrics registry")
            .bridge_metrics()
            .clone();
        let registry = Arc::new(SessionRegistry::new(config.limits.max_orchestrators));
        let correlator = correlator::spawn(CorrelatorConfig::from_bridge(&config), metrics.clone());
        let ctx = SessionContext {
            config,
            registry,
            correlator,
            metrics: metrics.clone(),
        };
        Self { ctx, metrics }
    }

    /// Metrics handle for assertions.
    pub fn metrics(&self) -> &BridgeMetrics {
        &self.metrics
    }

    /// Session context, for tests that spawn sessions by hand.
    pub fn ctx(&self) -> SessionContext {
        self.ctx.clone()
    }

    /// Opens a connection to the bridge.
    pub fn connect(&self) -> TestPeer {
        self.connect_buffered(DUPLEX_BUFFER)
    }

    /// Opens a connection with a custom transport buffer, for
    /// backpressure scenarios.
    pub fn connect_buffered(&self, buffer: usize) -> TestPeer {
        let (client, server) = tokio::io::duplex(buffer);
        let task = tokio::spawn(run_session(server, self.ctx.clone()));
        TestPeer {
            framed: Framed::new(client, EnvelopeCodec::new()),
            seq: 0,
            task,
        }
    }
}

/// A connected test peer speaking real framed envelopes.
pub struct TestPeer {
    framed: Framed<DuplexStream, EnvelopeCodec>,
    seq: u64,
    /// The server-side session task.
    pub task: JoinHandle<Result<(), SessionError>>,
}

impl TestPeer {
    /// Sends a payload with auto-incremented `seq`.
    pub async fn send(&mut self, payload: Payload) {
        self.seq += 1;
        let seq = self.seq;
        self.send_raw(PROTOCOL_VERSION, seq, payload).await;
    }

    /// Sends a payload with an explicit `seq` (for rewind scenarios).
    pub async fn send_seq(&mut self, seq: u64, payload: Payload) {
        self.seq = seq;
        self.send_raw(PROTOCOL_VERSION, seq, payload).await;
    }

    /// Sends a payload with an explicit protocol version.
    pub async fn send_version(&mut self, version: u32, payload: Payload) {
        self.seq += 1;
        let seq = self.seq;
        self.send_raw(version, seq, payload).await;
    }

    async fn send_raw(&mut self, version: u32, seq: u64, payload: Payload) {
        let envelope = Envelope {
            protocol_version: version,
            session_id: String::new(),
            seq,
            ack: 0,
            mono_ms: 0,
            wall_unix_ms: 0,
            payload: Some(payload),
        };
        self.framed.send(envelope).await.expect("send envelope");
    }

    /// Receives the next envelope, panicking on timeout or close.
    pub async fn recv(&mut self) -> Envelope {
        tokio::time::timeout(RECV_BUDGET, self.framed.next())
            .await
            .expect("envelope should arrive within budget")
            .expect("stream should not be closed")
            .expect("envelope should decode")
    }

    /// Receives the next payload, panicking on timeout or close.
    pub async fn recv_payload(&mut self) -> Payload {
        self.recv().await.payload.expect("payload should be present")
    }

    /// Asserts that no further frame arrives within `budget`.
    pub async fn assert_quiet(&mut self, budget: Duration) {
        let got = tokio::time::timeout(budget, self.framed.next()).await;
        assert!(got.is_err(), "expected no frame, got {got:?}");
    }

    /// Waits for the peer-visible end of stream.
    pub async fn assert_closed(&mut self) {
        loop {
            match tokio::time::timeout(RECV_BUDGET, self.framed.next()).await {
                Ok(None) => return,
                Ok(Some(Ok(env))) => {
                    panic!("expected close, got {} frame", env.payload_kind())
                }
                Ok(Some(Err(_))) => return,
                Err(_) => panic!("stream did not close within budget"),
            }
        }
    }

    /// Sends `Hello` and returns the raw handshake reply envelope.
    pub async fn handshake(
        &mut self,
        agent_id: &str,
        role: PeerRole,
        capabilities: &[Capability],
    ) -> Envelope {
        self.send(Payload::Hello(hello(agent_id, role, capabilities)))
            .await;
        self.recv().await
    }

    /// Sends `Hello` for a `HELLO_ACK_V1` peer and expects acceptance.
    pub async fn establish(
        &mut self,
        agent_id: &str,
        role: PeerRole,
        capabilities: &[Capability],
    ) -> HelloAck {
        assert!(
            capabilities.contains(&Capability::HelloAckV1),
            "establish() is for HELLO_ACK_V1 peers"
        );
        let reply = self.handshake(agent_id, role, capabilities).await;
        match reply.payload {
            Some(Payload::HelloAck(ack)) => {
                assert!(ack.accepted, "handshake rejected: {}", ack.reason);
                ack
            }
            other => panic!(
                "expected hello_ack, got {}",
                other.map_or("none", |p| p.kind())
            ),
        }
    }
}

/// Builds a `Hello` payload.
pub fn hello(agent_id: &str, role: PeerRole, capabilities: &[Capability]) -> Hello {
    Hello {
        agent_id: agent_id.to_string(),
        role: role as i32,
        capabilities: capabilities.iter().map(|c| *c as i32).collect(),
        client_version: "test-peer/0.1".to_string(),
        handshake_id: String::new(),
    }
}
