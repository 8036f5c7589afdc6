//! Frame routing for established sessions.
//!
//! Envelope header checks (protocol version, sequence monotonicity) are
//! the session loop's job; the router dispatches payloads:
//!
//! | Payload | Required role | Action |
//! |---|---|---|
//! | `Telemetry` | game client | publish to orchestrator latest-only slots |
//! | `ActionReq` | orchestrator | admit + relay via the target's ordered queue |
//! | `ActionAck` / `ActionRes` | game client | route through the correlator |
//! | `TimeSyncReq` | any | reply in-session |
//! | `Error` | any | log, surface to the originator if correlated |
//! | `Hello` / `HelloAck` | — | protocol error after the handshake |
//!
//! A role mismatch produces an `ErrorFrame{ROLE_VIOLATION}` and drops the
//! payload; the session stays up. No routing outcome closes a session.

use std::sync::Arc;
use std::time::Duration;

use tether_proto::envelope::envelope::Payload;
use tether_proto::{
    ActionAck, ActionRequest, ActionResult, ActionStatus, ErrorCode, ErrorFrame, PeerRole,
    TelemetryFrame, TimeSyncRequest, TimeSyncResponse,
};
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::clock::{mono_ms, wall_unix_ms};
use crate::config::BridgeConfig;
use crate::correlator::{AdmitOutcome, CorrelatorHandle};
use crate::metrics::BridgeMetrics;
use crate::registry::{SessionHandle, SessionRegistry, TargetResolveError};

/// Per-session payload router. Holds the small amount of mutable relay
/// state a session accumulates (telemetry monotonicity, throttle clock).
pub struct Router {
    self_handle: SessionHandle,
    registry: Arc<SessionRegistry>,
    correlator: CorrelatorHandle,
    metrics: BridgeMetrics,
    send_budget: Duration,
    min_telemetry_interval: Duration,
    last_state_version: u64,
    last_publish: Option<Instant>,
}

impl Router {
    /// Creates a router for one established session.
    #[must_use]
    pub fn new(
        self_handle: SessionHandle,
        registry: Arc<SessionRegistry>,
        correlator: CorrelatorHandle,
        metrics: BridgeMetrics,
        config: &BridgeConfig,
    ) -> Self {
        Self {
            self_handle,
            registry,
            correlator,
            metrics,
            send_budget: Duration::from_millis(config.timeouts.send_action_ms),
            min_telemetry_interval: Duration::from_millis(config.limits.min_telemetry_interval_ms),
            last_state_version: 0,
            last_publish: None,
        }
    }

    /// Dispatches one inbound payload. `None` means the envelope carried
    /// no recognizable payload variant.
    pub async fn route(&mut self, payload: Option<Payload>) {
        match payload {
            Some(Payload::Telemetry(frame)) => self.on_telemetry(frame).await,
            Some(Payload::ActionReq(request)) => self.on_action_request(request).await,
            Some(Payload::ActionAck(ack)) => self.on_action_ack(ack).await,
            Some(Payload::ActionRes(result)) => self.on_action_result(result).await,
            Some(Payload::TimeSyncReq(request)) => self.on_timesync(request).await,
            Some(Payload::Error(error)) => self.on_error(error).await,
            Some(Payload::Hello(_) | Payload::HelloAck(_) | Payload::TimeSyncRes(_)) => {
                self.send_error(
                    ErrorCode::UnexpectedPayload,
                    "payload not valid after handshake",
                    "post-handshake",
                )
                .await;
            }
            None => {
                self.send_error(
                    ErrorCode::UnsupportedPayload,
                    "envelope carried no recognizable payload",
                    "unsupported",
                )
                .await;
            }
        }
    }

    async fn on_telemetry(&mut self, frame: TelemetryFrame) {
        if self.self_handle.role != PeerRole::GameClient {
            self.role_violation("telemetry from non-game-client").await;
            return;
        }

        // state_version must strictly increase per session; stale samples
        // are dropped at this boundary rather than treated as protocol
        // errors.
        if frame.state_version <= self.last_state_version {
            self.metrics.telemetry_dropped("stale");
            debug!(
                session_id = %self.self_handle.session_id,
                state_version = frame.state_version,
                last = self.last_state_version,
                "stale telemetry dropped"
            );
            return;
        }
        self.last_state_version = frame.state_version;

        if !self.min_telemetry_interval.is_zero() {
            if let Some(last) = self.last_publish {
                if last.elapsed() < self.min_telemetry_interval {
                    self.metrics.telemetry_dropped("throttle");
                    return;
                }
            }
        }

        let writers = self.registry.telemetry_writers();
        for writer in &writers {
            writer.publish(frame.clone());
        }
        self.last_publish = Some(Instant::now());
    }

    async fn on_action_request(&mut self, request: ActionRequest) {
        if self.self_handle.role != PeerRole::Orchestrator {
            self.role_violation("action request from non-orchestrator")
                .await;
            return;
        }

        let request_id = request.request_id.clone();
        let target = match self.registry.resolve_game_client(&request.target_agent_id) {
            Ok(target) => target,
            Err(e) => {
                let reason = match e {
                    TargetResolveError::NoGameClient | TargetResolveError::MultipleGameClients => {
                        "no unique target".to_string()
                    }
                    TargetResolveError::UnknownAgent { .. } => e.to_string(),
                };
                self.metrics.action_outcome("unroutable");
                self.reject(&request_id, &reason).await;
                return;
            }
        };

        let outcome = self
            .correlator
            .admit(request.clone(), self.self_handle.clone(), target.clone())
            .await;
        match outcome {
            Err(_) => {
                self.reject(&request_id, "bridge is shutting down").await;
            }
            Ok(AdmitOutcome::Invalid { reason }) => {
                // Pre-enqueue validation failure: a nack is enough, no
                // entry exists to go terminal.
                self.send_ack(&request_id, false, reason).await;
            }
            Ok(AdmitOutcome::Duplicate) => {
                self.reject(&request_id, "duplicate").await;
            }
            Ok(AdmitOutcome::Admitted) => {
                let enqueue = target
                    .outbound
                    .send_timeout(Payload::ActionReq(request), self.send_budget)
                    .await;
                if let Err(e) = enqueue {
                    debug!(
                        request_id = %request_id,
                        target = %target.agent_id,
                        error = %e,
                        "relay enqueue failed"
                    );
                    self.correlator
                        .relay_failed(request_id, "relay congested".to_string())
                        .await;
                }
            }
        }
    }

    async fn on_action_ack(&mut self, ack: ActionAck) {
        if self.self_handle.role != PeerRole::GameClient {
            self.role_violation("action ack from non-game-client").await;
            return;
        }
        self.correlator.ack_observed(ack).await;
    }

    async fn on_action_result(&mut self, result: ActionResult) {
        if self.self_handle.role != PeerRole::GameClient {
            self.role_violation("action result from non-game-client")
                .await;
            return;
        }
        self.correlator.result_observed(result).await;
    }

    async fn on_timesync(&mut self, request: TimeSyncRequest) {
        let response = TimeSyncResponse {
            t_server_mono_ms: mono_ms(),
            t_server_wall_unix_ms: wall_unix_ms(),
            echo: Some(request),
        };
        self.enqueue_reply(Payload::TimeSyncRes(response)).await;
    }

    async fn on_error(&mut self, error: ErrorFrame) {
        warn!(
            session_id = %self.self_handle.session_id,
            code = %error.code().as_str_name(),
            correlation_id = %error.correlation_id,
            message = %error.message,
            "peer error frame"
        );
        if !error.correlation_id.is_empty() {
            self.correlator.error_observed(error).await;
        }
    }

    /// Sends `ActionAck{accepted=false}` plus a synthetic terminal
    /// `ActionResult{REJECTED}` back to this session.
    async fn reject(&mut self, request_id: &str, reason: &str) {
        self.send_ack(request_id, false, reason).await;
        self.enqueue_reply(Payload::ActionRes(ActionResult {
            request_id: request_id.to_string(),
            status: ActionStatus::Rejected as i32,
            detail: reason.to_string(),
            final_state_version: 0,
        }))
        .await;
    }

    async fn send_ack(&mut self, request_id: &str, accepted: bool, reason: &str) {
        self.enqueue_reply(Payload::ActionAck(ActionAck {
            request_id: request_id.to_string(),
            accepted,
            reason: reason.to_string(),
        }))
        .await;
    }

    async fn role_violation(&mut self, message: &str) {
        warn!(
            session_id = %self.self_handle.session_id,
            role = %self.self_handle.role.as_str_name(),
            message,
            "role violation"
        );
        self.send_error(ErrorCode::RoleViolation, message, "role").await;
    }

    async fn send_error(&mut self, code: ErrorCode, message: &str, hint: &str) {
        self.enqueue_reply(Payload::Error(ErrorFrame {
            code: code as i32,
            message: message.to_string(),
            correlation_id: format!("{hint}-{}", Uuid::new_v4()),
        }))
        .await;
    }

    async fn enqueue_reply(&mut self, payload: Payload) {
        let kind = payload.kind();
        if let Err(e) = self
            .self_handle
            .outbound
            .send_timeout(payload, self.send_budget)
            .await
        {
            warn!(
                session_id = %self.self_handle.session_id,
                kind,
                error = %e,
                "reply dropped; outbound queue unavailable"
            );
        }
    }
}
