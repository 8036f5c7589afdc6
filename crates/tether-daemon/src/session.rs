//! Per-connection session lifecycle.
//!
//! Every accepted stream runs one session through a forward-only state
//! machine:
//!
//! ```text
//!   AwaitingHello ──hello──▶ Established ──eof / fatal──▶ Closing
//! ```
//!
//! While `AwaitingHello`, the only acceptable payload is `Hello`; anything
//! else (or silence past the hello budget) closes the connection. Once
//! `Established`, the session splits into an inbound task (decode, header
//! checks, routing) and an outbound writer task that owns the monotonic
//! `seq` counter and echoes `ack = peer_seq_last`. `Closing` deregisters
//! the session, notifies the correlator, and cancels the writer.
//!
//! The session is generic over the transport so tests can drive it with
//! in-memory duplex streams; production wraps TLS streams.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tether_proto::envelope::envelope::Payload;
use tether_proto::{
    Capability, CapabilitySet, Envelope, EnvelopeCodec, ErrorCode, ErrorFrame, Hello, HelloAck,
    PROTOCOL_VERSION, PeerRole, ProtocolError, TelemetryFrame,
};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::channel::{OrderedReceiver, TelemetryReader, ordered_channel, telemetry_channel};
use crate::clock::{mono_ms, wall_unix_ms};
use crate::config::BridgeConfig;
use crate::correlator::CorrelatorHandle;
use crate::metrics::BridgeMetrics;
use crate::registry::{SessionHandle, SessionRegistry};
use crate::router::Router;

/// Shared dependencies handed to every session task.
#[derive(Clone)]
pub struct SessionContext {
    /// Validated bridge configuration.
    pub config: Arc<BridgeConfig>,
    /// Session registry.
    pub registry: Arc<SessionRegistry>,
    /// Correlator handle.
    pub correlator: CorrelatorHandle,
    /// Metrics handle.
    pub metrics: BridgeMetrics,
}

/// How a session ended. Fatal protocol conditions are errors; a peer
/// closing cleanly is not.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The peer closed the stream before sending `Hello`.
    #[error("peer closed before hello")]
    ClosedBeforeHello,

    /// No `Hello` arrived within the handshake budget.
    #[error("no hello within {budget_ms} ms")]
    HelloTimeout {
        /// The budget that elapsed.
        budget_ms: u64,
    },

    /// The handshake was rejected.
    #[error("handshake rejected: {reason}")]
    HandshakeRejected {
        /// Why the handshake failed.
        reason: String,
    },

    /// The peer spoke an unsupported protocol version.
    #[error("protocol version {got} is not supported")]
    VersionMismatch {
        /// The version the peer sent.
        got: u32,
    },

    /// The peer's sequence numbers went backwards.
    #[error("inbound sequence rewound from {last} to {got}")]
    SequenceRewind {
        /// Highest sequence previously observed.
        last: u64,
        /// The rewound value.
        got: u64,
    },

    /// The transport refused writes past the stall budget.
    #[error("transport stalled past {budget_ms} ms")]
    TransportStalled {
        /// The budget that elapsed.
        budget_ms: u64,
    },

    /// Framing or I/O failure.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Bridge software identity sent in handshake replies.
fn server_version() -> String {
    format!("tether-daemon/{}", env!("CARGO_PKG_VERSION"))
}

/// Stamps outbound envelope headers: strictly increasing `seq`, `ack`
/// echoing the last observed peer sequence, both clocks.
struct Stamper {
    session_id: String,
    next_seq: u64,
    peer_seq: Arc<AtomicU64>,
}

impl Stamper {
    fn new(session_id: String, peer_seq: Arc<AtomicU64>) -> Self {
        Self {
            session_id,
            next_seq: 0,
            peer_seq,
        }
    }

    fn stamp(&mut self, payload: Payload) -> Envelope {
        self.next_seq += 1;
        Envelope {
            protocol_version: PROTOCOL_VERSION,
            session_id: self.session_id.clone(),
            seq: self.next_seq,
            ack: self.peer_seq.load(Ordering::Relaxed),
            mono_ms: mono_ms(),
            wall_unix_ms: wall_unix_ms(),
            payload: Some(payload),
        }
    }
}

/// Runs one session to completion.
///
/// # Errors
///
/// Returns [`SessionError`] for fatal protocol conditions; a peer that
/// closes cleanly yields `Ok(())`.
pub async fn run_session<S>(stream: S, ctx: SessionContext) -> Result<(), SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let codec = EnvelopeCodec::with_max_frame_bytes(ctx.config.limits.max_frame_bytes);
    let mut framed = Framed::new(stream, codec);

    let session_id = Uuid::new_v4().to_string();
    let peer_seq = Arc::new(AtomicU64::new(0));
    let mut stamper = Stamper::new(session_id.clone(), Arc::clone(&peer_seq));
    let transport_budget = Duration::from_millis(ctx.config.timeouts.transport_send_ms);
    debug!(session_id = %session_id, phase = "AwaitingHello", "connection accepted");

    let hello = await_hello(&mut framed, &ctx, &mut stamper, &peer_seq).await?;

    let role = hello.role();
    let client_caps = CapabilitySet::from_wire(&hello.capabilities);
    let supports_hello_ack = client_caps.contains(Capability::HelloAckV1);
    let negotiated = client_caps.intersect(&ctx.config.server.capabilities);

    // The handshake id is always server-owned; a client proposal is
    // recorded for diagnostics but never echoed.
    let handshake_id = Uuid::new_v4().to_string();
    if !hello.handshake_id.trim().is_empty() {
        warn!(
            session_id = %session_id,
            agent_id = %hello.agent_id,
            proposed = %hello.handshake_id,
            "ignored client-proposed handshake_id"
        );
    }

    if !matches!(role, PeerRole::GameClient | PeerRole::Orchestrator) {
        ctx.metrics.handshake_failed("unsupported_role");
        reject_handshake(
            &mut framed,
            &mut stamper,
            supports_hello_ack,
            &handshake_id,
            "unsupported peer role",
            transport_budget,
        )
        .await?;
        return Err(SessionError::HandshakeRejected {
            reason: "unsupported peer role".to_string(),
        });
    }

    let (outbound, outbound_rx) = ordered_channel(ctx.config.queues.action_depth);
    let (telemetry_writer, telemetry_reader) = if role == PeerRole::Orchestrator {
        let (writer, reader) = telemetry_channel();
        (Some(writer), Some(reader))
    } else {
        (None, None)
    };
    let handle = SessionHandle {
        session_id: session_id.clone(),
        role,
        agent_id: hello.agent_id.clone(),
        outbound,
        telemetry: telemetry_writer,
    };

    if let Err(e) = ctx.registry.register(handle.clone()) {
        ctx.metrics.handshake_failed("registry");
        let reason = e.to_string();
        reject_handshake(
            &mut framed,
            &mut stamper,
            supports_hello_ack,
            &handshake_id,
            &reason,
            transport_budget,
        )
        .await?;
        return Err(SessionError::HandshakeRejected { reason });
    }

    // From here on the session must pass through Closing: deregister,
    // sweep the correlator, balance the session gauge.
    let result = established(
        framed,
        &ctx,
        &handle,
        stamper,
        peer_seq,
        outbound_rx,
        telemetry_reader,
        supports_hello_ack,
        &handshake_id,
        &negotiated,
        &hello,
    )
    .await;

    info!(session_id = %session_id, phase = "Closing", "session closing");
    ctx.registry.deregister(&session_id);
    ctx.correlator.session_closed(session_id.clone()).await;
    ctx.metrics.session_closed(role.as_str_name());
    result
}

/// Waits for the opening `Hello`, enforcing the hello budget and the
/// handshake gate: nothing routes before a valid `Hello`.
async fn await_hello<S>(
    framed: &mut Framed<S, EnvelopeCodec>,
    ctx: &SessionContext,
    stamper: &mut Stamper,
    peer_seq: &AtomicU64,
) -> Result<Hello, SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let hello_budget = Duration::from_millis(ctx.config.timeouts.hello_ms);
    let transport_budget = Duration::from_millis(ctx.config.timeouts.transport_send_ms);

    let first = match timeout(hello_budget, framed.next()).await {
        Err(_) => {
            ctx.metrics.handshake_failed("hello_timeout");
            send_error_direct(
                framed,
                stamper,
                ErrorCode::HelloTimeout,
                "no hello within the handshake budget",
                transport_budget,
            )
            .await;
            return Err(SessionError::HelloTimeout {
                budget_ms: ctx.config.timeouts.hello_ms,
            });
        }
        Ok(None) => {
            ctx.metrics.handshake_failed("closed_before_hello");
            return Err(SessionError::ClosedBeforeHello);
        }
        Ok(Some(Err(e))) => {
            ctx.metrics.handshake_failed("decode");
            send_error_direct(
                framed,
                stamper,
                ErrorCode::CodecError,
                "invalid hello envelope",
                transport_budget,
            )
            .await;
            return Err(e.into());
        }
        Ok(Some(Ok(envelope))) => envelope,
    };

    peer_seq.store(first.seq, Ordering::Relaxed);

    if first.protocol_version != PROTOCOL_VERSION {
        ctx.metrics.handshake_failed("version");
        send_error_direct(
            framed,
            stamper,
            ErrorCode::VersionMismatch,
            "protocol_version mismatch",
            transport_budget,
        )
        .await;
        return Err(SessionError::VersionMismatch {
            got: first.protocol_version,
        });
    }

    match first.payload {
        Some(Payload::Hello(hello)) => Ok(hello),
        other => {
            ctx.metrics.handshake_failed("handshake_required");
            send_error_direct(
                framed,
                stamper,
                ErrorCode::HandshakeRequired,
                "hello required before any other payload",
                transport_budget,
            )
            .await;
            let kind = other.as_ref().map_or("none", Payload::kind);
            Err(SessionError::HandshakeRejected {
                reason: format!("expected hello, got {kind}"),
            })
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn established<S>(
    mut framed: Framed<S, EnvelopeCodec>,
    ctx: &SessionContext,
    handle: &SessionHandle,
    mut stamper: Stamper,
    peer_seq: Arc<AtomicU64>,
    outbound_rx: OrderedReceiver,
    telemetry_reader: Option<TelemetryReader>,
    supports_hello_ack: bool,
    handshake_id: &str,
    negotiated: &CapabilitySet,
    hello: &Hello,
) -> Result<(), SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let transport_budget = Duration::from_millis(ctx.config.timeouts.transport_send_ms);

    let reply = if supports_hello_ack {
        Payload::HelloAck(HelloAck {
            accepted: true,
            reason: "ok".to_string(),
            handshake_id: handshake_id.to_string(),
            capabilities: negotiated.to_wire(),
            server_version: server_version(),
        })
    } else {
        // Legacy peers predate HelloAck; they expect a mirrored Hello.
        Payload::Hello(Hello {
            agent_id: "bridge".to_string(),
            role: PeerRole::BridgeServer as i32,
            capabilities: negotiated.to_wire(),
            client_version: server_version(),
            handshake_id: handshake_id.to_string(),
        })
    };
    send_direct(&mut framed, &mut stamper, reply, transport_budget).await?;

    info!(
        session_id = %handle.session_id,
        agent_id = %hello.agent_id,
        role = %handle.role.as_str_name(),
        client_version = %hello.client_version,
        capabilities = %negotiated,
        phase = "Established",
        "session established"
    );
    ctx.metrics.session_opened(handle.role.as_str_name());

    let (sink, stream) = framed.split();
    let cancel = CancellationToken::new();
    let writer = tokio::spawn(run_writer(
        sink,
        outbound_rx,
        telemetry_reader,
        stamper,
        WriterBudgets {
            telemetry: Duration::from_millis(ctx.config.timeouts.send_telemetry_ms),
            transport: transport_budget,
        },
        cancel.clone(),
        ctx.metrics.clone(),
        handle.session_id.clone(),
    ));

    let mut router = Router::new(
        handle.clone(),
        Arc::clone(&ctx.registry),
        ctx.correlator.clone(),
        ctx.metrics.clone(),
        &ctx.config,
    );
    let inbound_result = inbound_loop(stream, ctx, handle, &mut router, &peer_seq, &cancel).await;

    cancel.cancel();
    let writer_result = match writer.await {
        Ok(result) => result,
        Err(e) => {
            warn!(session_id = %handle.session_id, error = %e, "writer task failed");
            Ok(())
        }
    };
    inbound_result.and(writer_result)
}

/// Inbound half of an established session: header checks, then routing.
async fn inbound_loop<S>(
    mut stream: SplitStream<Framed<S, EnvelopeCodec>>,
    ctx: &SessionContext,
    handle: &SessionHandle,
    router: &mut Router,
    peer_seq: &AtomicU64,
    cancel: &CancellationToken,
) -> Result<(), SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let reply_budget = Duration::from_millis(ctx.config.timeouts.send_action_ms);

    loop {
        let item = tokio::select! {
            () = cancel.cancelled() => return Ok(()),
            item = stream.next() => item,
        };

        let envelope = match item {
            None => {
                debug!(session_id = %handle.session_id, "peer closed stream");
                return Ok(());
            }
            Some(Err(e @ (ProtocolError::FrameTooLarge { .. } | ProtocolError::Decode(_)))) => {
                // Codec errors surface on the offending session without
                // closing it; the codec has already resynchronized.
                warn!(session_id = %handle.session_id, error = %e, "codec error");
                enqueue_error(handle, ErrorCode::CodecError, &e.to_string(), reply_budget).await;
                continue;
            }
            Some(Err(e)) => return Err(e.into()),
            Some(Ok(envelope)) => envelope,
        };

        if envelope.protocol_version != PROTOCOL_VERSION {
            enqueue_error(
                handle,
                ErrorCode::VersionMismatch,
                "protocol_version mismatch",
                reply_budget,
            )
            .await;
            return Err(SessionError::VersionMismatch {
                got: envelope.protocol_version,
            });
        }

        // Gaps are tolerated (and equal values, for retransmissions);
        // a rewind is a protocol error and fatal.
        let last = peer_seq.load(Ordering::Relaxed);
        if envelope.seq < last {
            enqueue_error(
                handle,
                ErrorCode::BadSequence,
                "inbound seq rewound",
                reply_budget,
            )
            .await;
            return Err(SessionError::SequenceRewind {
                last,
                got: envelope.seq,
            });
        }
        peer_seq.store(envelope.seq, Ordering::Relaxed);

        ctx.metrics.frame_received(envelope.payload_kind());
        router.route(envelope.payload).await;
    }
}

struct WriterBudgets {
    telemetry: Duration,
    transport: Duration,
}

/// Outbound half of an established session. Owns the `seq` counter and
/// the sink; drains the ordered queue and, for orchestrators, the
/// latest-only telemetry slot.
async fn run_writer<S>(
    mut sink: SplitSink<Framed<S, EnvelopeCodec>, Envelope>,
    mut outbound: OrderedReceiver,
    mut telemetry: Option<TelemetryReader>,
    mut stamper: Stamper,
    budgets: WriterBudgets,
    cancel: CancellationToken,
    metrics: BridgeMetrics,
    session_id: String,
) -> Result<(), SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let result = loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break Ok(()),
            maybe = outbound.recv() => {
                let Some(payload) = maybe else { break Ok(()) };
                let envelope = stamper.stamp(payload);
                match timeout(budgets.transport, sink.send(envelope)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => break Err(SessionError::Protocol(e)),
                    Err(_) => {
                        warn!(session_id = %session_id, "transport stalled on ordered send");
                        break Err(SessionError::TransportStalled {
                            budget_ms: u64::try_from(budgets.transport.as_millis())
                                .unwrap_or(u64::MAX),
                        });
                    }
                }
            }
            frame = next_telemetry(&mut telemetry) => {
                let Some(frame) = frame else {
                    // Every telemetry writer is gone; disable the branch.
                    telemetry = None;
                    continue;
                };
                match send_telemetry(&mut sink, &mut stamper, frame, &budgets, &metrics).await {
                    Ok(()) => {}
                    Err(e) => break Err(e),
                }
            }
        }
    };

    if result.is_ok() {
        // Flush frames that were queued before the close decision, the
        // farewell error frame included.
        while let Some(payload) = outbound.try_recv() {
            let envelope = stamper.stamp(payload);
            if timeout(budgets.transport, sink.send(envelope)).await.is_err() {
                break;
            }
        }
    } else {
        // A stalled writer must also stop the inbound half.
        cancel.cancel();
    }
    result
}

async fn send_telemetry<S>(
    sink: &mut SplitSink<Framed<S, EnvelopeCodec>, Envelope>,
    stamper: &mut Stamper,
    frame: TelemetryFrame,
    budgets: &WriterBudgets,
    metrics: &BridgeMetrics,
) -> Result<(), SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let envelope = stamper.stamp(Payload::Telemetry(frame));
    match timeout(budgets.telemetry, sink.send(envelope)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(SessionError::Protocol(e)),
        Err(_) => {
            // The sample missed its freshness budget; count it dropped
            // and give the transport its stall budget to come back.
            metrics.telemetry_dropped("backpressure");
            match timeout(budgets.transport, sink.flush()).await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(SessionError::Protocol(e)),
                Err(_) => Err(SessionError::TransportStalled {
                    budget_ms: u64::try_from(budgets.transport.as_millis()).unwrap_or(u64::MAX),
                }),
            }
        }
    }
}

async fn next_telemetry(slot: &mut Option<TelemetryReader>) -> Option<TelemetryFrame> {
    match slot {
        Some(reader) => reader.next().await,
        None => std::future::pending().await,
    }
}

async fn send_direct<S>(
    framed: &mut Framed<S, EnvelopeCodec>,
    stamper: &mut Stamper,
    payload: Payload,
    budget: Duration,
) -> Result<(), SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let envelope = stamper.stamp(payload);
    match timeout(budget, framed.send(envelope)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Err(SessionError::TransportStalled {
            budget_ms: u64::try_from(budget.as_millis()).unwrap_or(u64::MAX),
        }),
    }
}

/// Best-effort pre-handshake error frame; failures only get logged since
/// the session is closing anyway.
async fn send_error_direct<S>(
    framed: &mut Framed<S, EnvelopeCodec>,
    stamper: &mut Stamper,
    code: ErrorCode,
    message: &str,
    budget: Duration,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let payload = Payload::Error(ErrorFrame {
        code: code as i32,
        message: message.to_string(),
        correlation_id: format!("handshake-{}", Uuid::new_v4()),
    });
    if let Err(e) = send_direct(framed, stamper, payload, budget).await {
        debug!(error = %e, "failed to send pre-handshake error frame");
    }
}

async fn reject_handshake<S>(
    framed: &mut Framed<S, EnvelopeCodec>,
    stamper: &mut Stamper,
    supports_hello_ack: bool,
    handshake_id: &str,
    reason: &str,
    budget: Duration,
) -> Result<(), SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if supports_hello_ack {
        let payload = Payload::HelloAck(HelloAck {
            accepted: false,
            reason: reason.to_string(),
            handshake_id: handshake_id.to_string(),
            capabilities: Vec::new(),
            server_version: server_version(),
        });
        send_direct(framed, stamper, payload, budget).await
    } else {
        send_error_direct(framed, stamper, ErrorCode::Unspecified, reason, budget).await;
        Ok(())
    }
}

/// Fatal-path error frame routed through the session's own outbound
/// queue so it is stamped and ordered like any other reply.
async fn enqueue_error(handle: &SessionHandle, code: ErrorCode, message: &str, budget: Duration) {
    let payload = Payload::Error(ErrorFrame {
        code: code as i32,
        message: message.to_string(),
        correlation_id: format!("session-{}", Uuid::new_v4()),
    });
    if let Err(e) = handle.outbound.send_timeout(payload, budget).await {
        warn!(
            session_id = %handle.session_id,
            error = %e,
            "error frame dropped; outbound queue unavailable"
        );
    }
}
