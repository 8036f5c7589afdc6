//! Action correlator.
//!
//! The correlator is a single-writer actor: it alone owns the
//! `request_id → ActionEntry` map, and every session task talks to it
//! through a command channel. That discipline makes the at-most-once
//! entry invariant structural: there is no lock ordering between the
//! registry and the correlator, and no session mutates another session's
//! state directly.
//!
//! Lifecycle of an admitted request:
//!
//! ```text
//! Admit ──▶ AwaitingAck ──ack──▶ AwaitingResult ──result──▶ (terminal)
//!              │                      │
//!              └──────── deadline ────┴──▶ synthetic TIMEOUT + STOP_ALL
//! ```
//!
//! An ack never cancels the deadline; only a terminal `ActionResult`
//! does. Deadlines for every live entry share one timer wheel
//! ([`DelayQueue`]) rather than one sleep task per entry.

use std::collections::{HashMap, VecDeque};
use std::future::poll_fn;
use std::time::Duration;

use tether_proto::envelope::envelope::Payload;
use tether_proto::{ActionAck, ActionRequest, ActionResult, ActionStatus, ErrorFrame, PeerRole};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::time::delay_queue::{DelayQueue, Key};
use tracing::{debug, info, warn};

use crate::channel::EnqueueError;
use crate::clock::wall_unix_ms;
use crate::config::BridgeConfig;
use crate::estop;
use crate::metrics::BridgeMetrics;
use crate::registry::SessionHandle;

/// How many recently terminal request ids are remembered for duplicate
/// suppression.
pub const TERMINAL_LRU_CAPACITY: usize = 1024;

/// How long a terminal request id keeps rejecting retries.
pub const TERMINAL_HORIZON: Duration = Duration::from_secs(60);

/// Depth of the correlator command channel.
const COMMAND_DEPTH: usize = 256;

/// Correlator tuning derived from the bridge configuration.
#[derive(Debug, Clone)]
pub struct CorrelatorConfig {
    /// Deadline applied when a request carries no TTL, and the cap when
    /// it does. Milliseconds.
    pub default_ttl_ms: u64,
    /// Budget for enqueueing relay frames toward the originator.
    pub send_budget: Duration,
}

impl CorrelatorConfig {
    /// Derives correlator tuning from the bridge configuration.
    #[must_use]
    pub fn from_bridge(config: &BridgeConfig) -> Self {
        Self {
            default_ttl_ms: config.timeouts.action_default_ttl_ms,
            send_budget: Duration::from_millis(config.timeouts.send_action_ms),
        }
    }
}

/// Admission decision for an `ActionRequest`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmitOutcome {
    /// Entry created; the router should relay the request to the target.
    Admitted,
    /// The id already has a live or recently terminal entry. No entry
    /// was created.
    Duplicate,
    /// The request failed validation. No entry was created.
    Invalid {
        /// Why validation failed.
        reason: &'static str,
    },
}

/// The correlator task is gone; the bridge is shutting down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("correlator task is gone")]
pub struct CorrelatorClosed;

enum Command {
    Admit {
        request: ActionRequest,
        originator: SessionHandle,
        target: SessionHandle,
        reply: oneshot::Sender<AdmitOutcome>,
    },
    RelayFailed {
        request_id: String,
        reason: String,
    },
    AckObserved {
        ack: ActionAck,
    },
    ResultObserved {
        result: ActionResult,
    },
    ErrorObserved {
        error: ErrorFrame,
    },
    SessionClosed {
        session_id: String,
    },
}

/// Cloneable handle for talking to the correlator actor.
#[derive(Clone)]
pub struct CorrelatorHandle {
    tx: mpsc::Sender<Command>,
}

impl CorrelatorHandle {
    /// Asks the correlator to admit a request for relay.
    ///
    /// # Errors
    ///
    /// Returns [`CorrelatorClosed`] when the actor has shut down.
    pub async fn admit(
        &self,
        request: ActionRequest,
        originator: SessionHandle,
        target: SessionHandle,
    ) -> Result<AdmitOutcome, CorrelatorClosed> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Admit {
                request,
                originator,
                target,
                reply,
            })
            .await
            .map_err(|_| CorrelatorClosed)?;
        rx.await.map_err(|_| CorrelatorClosed)
    }

    /// Reports that relaying an admitted request to its target failed.
    /// The entry goes terminal with a rejection toward the originator.
    pub async fn relay_failed(&self, request_id: String, reason: String) {
        let _ = self
            .tx
            .send(Command::RelayFailed { request_id, reason })
            .await;
    }

    /// Routes an `ActionAck` observed from a game client.
    pub async fn ack_observed(&self, ack: ActionAck) {
        let _ = self.tx.send(Command::AckObserved { ack }).await;
    }

    /// Routes an `ActionResult` observed from a game client.
    pub async fn result_observed(&self, result: ActionResult) {
        let _ = self.tx.send(Command::ResultObserved { result }).await;
    }

    /// Surfaces a correlated `ErrorFrame` toward the originator.
    pub async fn error_observed(&self, error: ErrorFrame) {
        let _ = self.tx.send(Command::ErrorObserved { error }).await;
    }

    /// Reports a session leaving `Established`. Entries it originated are
    /// destroyed; entries targeting it are failed fast.
    pub async fn session_closed(&self, session_id: String) {
        let _ = self.tx.send(Command::SessionClosed { session_id }).await;
    }
}

/// Spawns the correlator actor and returns its handle.
#[must_use]
pub fn spawn(config: CorrelatorConfig, metrics: BridgeMetrics) -> CorrelatorHandle {
    let (tx, rx) = mpsc::channel(COMMAND_DEPTH);
    tokio::spawn(run(config, metrics, rx));
    CorrelatorHandle { tx }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ActionPhase {
    AwaitingAck,
    AwaitingResult,
}

struct ActionEntry {
    /// `None` for bridge-synthesized requests (`STOP_ALL`); their
    /// terminal results go to the log instead of a session.
    originator: Option<SessionHandle>,
    target: SessionHandle,
    phase: ActionPhase,
    deadline_unix_ms: u64,
    timer: Key,
}

struct Correlator {
    config: CorrelatorConfig,
    metrics: BridgeMetrics,
    entries: HashMap<String, ActionEntry>,
    timers: DelayQueue<String>,
    terminal: TerminalLru,
}

async fn run(config: CorrelatorConfig, metrics: BridgeMetrics, mut rx: mpsc::Receiver<Command>) {
    let mut actor = Correlator {
        config,
        metrics,
        entries: HashMap::new(),
        timers: DelayQueue::new(),
        terminal: TerminalLru::new(TERMINAL_LRU_CAPACITY, TERMINAL_HORIZON),
    };

    loop {
        tokio::select! {
            command = rx.recv() => match command {
                Some(command) => actor.handle(command).await,
                None => break,
            },
            expired = poll_fn(|cx| actor.timers.poll_expired(cx)), if !actor.timers.is_empty() => {
                if let Some(expired) = expired {
                    actor.on_deadline(expired.into_inner()).await;
                }
            }
        }
    }
    debug!("correlator stopped");
}

impl Correlator {
    async fn handle(&mut self, command: Command) {
        match command {
            Command::Admit {
                request,
                originator,
                target,
                reply,
            } => {
                let outcome = self.admit(request, originator, target);
                let _ = reply.send(outcome);
            }
            Command::RelayFailed { request_id, reason } => {
                self.relay_failed(&request_id, &reason).await;
            }
            Command::AckObserved { ack } => self.on_ack(ack).await,
            Command::ResultObserved { result } => self.on_result(result).await,
            Command::ErrorObserved { error } => self.on_error(error).await,
            Command::SessionClosed { session_id } => self.on_session_closed(&session_id).await,
        }
    }

    fn admit(
        &mut self,
        request: ActionRequest,
        originator: SessionHandle,
        target: SessionHandle,
    ) -> AdmitOutcome {
        let request_id = request.request_id.clone();
        if request_id.trim().is_empty() {
            return AdmitOutcome::Invalid {
                reason: "request_id must not be empty",
            };
        }
        if self.entries.contains_key(&request_id) || self.terminal.contains(&request_id) {
            self.metrics.action_outcome("duplicate");
            return AdmitOutcome::Duplicate;
        }

        let deadline_unix_ms = self.compute_deadline(request.expires_at_unix_ms);
        let timer = self.arm_timer(&request_id, deadline_unix_ms);
        self.entries.insert(
            request_id.clone(),
            ActionEntry {
                originator: Some(originator),
                target,
                phase: ActionPhase::AwaitingAck,
                deadline_unix_ms,
                timer,
            },
        );
        self.metrics.action_outcome("relayed");
        debug!(request_id = %request_id, deadline_unix_ms, "action admitted");
        AdmitOutcome::Admitted
    }

    fn compute_deadline(&self, expires_at_unix_ms: u64) -> u64 {
        let cap = wall_unix_ms().saturating_add(self.config.default_ttl_ms);
        if expires_at_unix_ms == 0 {
            cap
        } else {
            expires_at_unix_ms.min(cap)
        }
    }

    fn arm_timer(&mut self, request_id: &str, deadline_unix_ms: u64) -> Key {
        let delay_ms = deadline_unix_ms.saturating_sub(wall_unix_ms());
        self.timers
            .insert(request_id.to_string(), Duration::from_millis(delay_ms))
    }

    async fn relay_failed(&mut self, request_id: &str, reason: &str) {
        let Some(entry) = self.entries.remove(request_id) else {
            return;
        };
        self.timers.try_remove(&entry.timer);

        self.deliver(
            entry.originator.as_ref(),
            Payload::ActionAck(ActionAck {
                request_id: request_id.to_string(),
                accepted: false,
                reason: reason.to_string(),
            }),
            request_id,
        )
        .await;
        self.deliver(
            entry.originator.as_ref(),
            Payload::ActionRes(ActionResult {
                request_id: request_id.to_string(),
                status: ActionStatus::Rejected as i32,
                detail: reason.to_string(),
                final_state_version: 0,
            }),
            request_id,
        )
        .await;

        self.terminal.insert(request_id.to_string());
        self.metrics.action_outcome("congested");
        warn!(request_id = %request_id, reason = %reason, "relay failed; entry terminal");
    }

    async fn on_ack(&mut self, ack: ActionAck) {
        let Some(entry) = self.entries.get_mut(&ack.request_id) else {
            debug!(request_id = %ack.request_id, "ack for unknown request dropped");
            return;
        };
        // An unaccepted ack still waits for the executor's terminal
        // result or the deadline; the deadline is never cancelled here.
        entry.phase = ActionPhase::AwaitingResult;
        let originator = entry.originator.clone();
        let request_id = ack.request_id.clone();
        self.deliver(originator.as_ref(), Payload::ActionAck(ack), &request_id)
            .await;
    }

    async fn on_result(&mut self, result: ActionResult) {
        let Some(entry) = self.entries.remove(&result.request_id) else {
            debug!(request_id = %result.request_id, "result for unknown request dropped");
            return;
        };
        self.timers.try_remove(&entry.timer);

        let outcome = match result.status() {
            ActionStatus::Ok => "completed",
            ActionStatus::Rejected => "rejected",
            ActionStatus::Failed => "failed",
            ActionStatus::Timeout => "timeout",
            ActionStatus::Unspecified => "unspecified",
        };
        self.metrics.action_outcome(outcome);

        let request_id = result.request_id.clone();
        self.deliver(
            entry.originator.as_ref(),
            Payload::ActionRes(result),
            &request_id,
        )
        .await;
        self.terminal.insert(request_id);
    }

    async fn on_error(&mut self, error: ErrorFrame) {
        if error.correlation_id.is_empty() {
            return;
        }
        let Some(entry) = self.entries.get(&error.correlation_id) else {
            debug!(correlation_id = %error.correlation_id, "uncorrelated error frame");
            return;
        };
        let originator = entry.originator.clone();
        let request_id = error.correlation_id.clone();
        self.deliver(originator.as_ref(), Payload::Error(error), &request_id)
            .await;
    }

    async fn on_session_closed(&mut self, session_id: &str) {
        // Entries this session originated: destroyed with logged loss,
        // since there is nowhere left to deliver a terminal result.
        let orphaned: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| {
                e.originator
                    .as_ref()
                    .is_some_and(|o| o.session_id == session_id)
            })
            .map(|(id, _)| id.clone())
            .collect();
        for request_id in orphaned {
            if let Some(entry) = self.entries.remove(&request_id) {
                self.timers.try_remove(&entry.timer);
                self.terminal.insert(request_id.clone());
                info!(
                    request_id = %request_id,
                    session_id = %session_id,
                    "in-flight action destroyed; originator disconnected"
                );
            }
        }

        // Entries targeting this session: fail fast toward the
        // originator instead of waiting for the deadline.
        let stranded: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| e.target.session_id == session_id)
            .map(|(id, _)| id.clone())
            .collect();
        for request_id in stranded {
            if let Some(entry) = self.entries.remove(&request_id) {
                self.timers.try_remove(&entry.timer);
                self.deliver(
                    entry.originator.as_ref(),
                    Payload::ActionRes(ActionResult {
                        request_id: request_id.clone(),
                        status: ActionStatus::Timeout as i32,
                        detail: "target disconnected".to_string(),
                        final_state_version: 0,
                    }),
                    &request_id,
                )
                .await;
                self.terminal.insert(request_id);
                self.metrics.action_outcome("timeout");
            }
        }
    }

    async fn on_deadline(&mut self, request_id: String) {
        let Some(entry) = self.entries.remove(&request_id) else {
            // Raced with a terminal result; nothing to do.
            return;
        };

        warn!(
            request_id = %request_id,
            phase = ?entry.phase,
            deadline_unix_ms = entry.deadline_unix_ms,
            "action deadline exceeded"
        );
        self.deliver(
            entry.originator.as_ref(),
            Payload::ActionRes(ActionResult {
                request_id: request_id.clone(),
                status: ActionStatus::Timeout as i32,
                detail: "ack/result deadline exceeded".to_string(),
                final_state_version: 0,
            }),
            &request_id,
        )
        .await;
        self.terminal.insert(request_id);
        self.metrics.action_outcome("timeout");

        // Hand off to the emergency stop path. Bridge-originated entries
        // (a STOP_ALL that itself timed out) do not recurse.
        if entry.target.role == PeerRole::GameClient && entry.originator.is_some() {
            self.synthesize_stop_all(&entry.target);
        }
    }

    fn synthesize_stop_all(&mut self, target: &SessionHandle) {
        let stop = estop::stop_all_request(&target.agent_id);
        let stop_id = stop.request_id.clone();
        let deadline_unix_ms = stop.expires_at_unix_ms;

        let timer = self.arm_timer(&stop_id, deadline_unix_ms);
        self.entries.insert(
            stop_id.clone(),
            ActionEntry {
                originator: None,
                target: target.clone(),
                phase: ActionPhase::AwaitingAck,
                deadline_unix_ms,
                timer,
            },
        );
        self.metrics.estop_synthesized();

        match target.outbound.try_send(Payload::ActionReq(stop)) {
            Ok(()) => {
                warn!(
                    request_id = %stop_id,
                    target = %target.agent_id,
                    "emergency STOP_ALL enqueued"
                );
            }
            Err(e) => {
                // The emergency queue is full or the client is gone;
                // nothing further can reach this target.
                if let Some(entry) = self.entries.remove(&stop_id) {
                    self.timers.try_remove(&entry.timer);
                }
                self.terminal.insert(stop_id.clone());
                warn!(
                    request_id = %stop_id,
                    target = %target.agent_id,
                    error = %e,
                    "emergency STOP_ALL could not be enqueued"
                );
            }
        }
    }

    async fn deliver(&self, originator: Option<&SessionHandle>, payload: Payload, request_id: &str) {
        let kind = payload.kind();
        match originator {
            None => {
                debug!(request_id = %request_id, kind, "bridge-originated frame not delivered");
            }
            Some(handle) => {
                if let Err(e) = handle
                    .outbound
                    .send_timeout(payload, self.config.send_budget)
                    .await
                {
                    let dropped = matches!(e, EnqueueError::Congested);
                    warn!(
                        request_id = %request_id,
                        session_id = %handle.session_id,
                        kind,
                        dropped,
                        error = %e,
                        "failed to deliver relay frame to originator"
                    );
                }
            }
        }
    }
}

/// Bounded memory of recently terminal request ids.
///
/// Insertion order doubles as timestamp order (ids are never refreshed),
/// so pruning and capacity eviction both pop from the front.
struct TerminalLru {
    capacity: usize,
    horizon: Duration,
    entries: HashMap<String, Instant>,
    order: VecDeque<String>,
}

impl TerminalLru {
    fn new(capacity: usize, horizon: Duration) -> Self {
        Self {
            capacity,
            horizon,
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn insert(&mut self, request_id: String) {
        self.prune();
        if self.entries.contains_key(&request_id) {
            return;
        }
        self.entries.insert(request_id.clone(), Instant::now());
        self.order.push_back(request_id);
        while self.entries.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
    }

    fn contains(&mut self, request_id: &str) -> bool {
        self.prune();
        self.entries.contains_key(request_id)
    }

    fn prune(&mut self) {
        let now = Instant::now();
        while let Some(front) = self.order.front() {
            match self.entries.get(front) {
                Some(inserted) if now.duration_since(*inserted) > self.horizon => {
                    self.entries.remove(front.as_str());
                    self.order.pop_front();
                }
                Some(_) => break,
                None => {
                    self.order.pop_front();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tether_proto::ActionType;

    use super::*;
    use crate::channel::{ordered_channel, OrderedReceiver};
    use crate::metrics::MetricsRegistry;

    fn test_config() -> CorrelatorConfig {
        CorrelatorConfig {
            default_ttl_ms: 10_000,
            send_budget: Duration::from_millis(500),
        }
    }

    fn test_metrics() -> BridgeMetrics {
        MetricsRegistry::new().unwrap().bridge_metrics().clone()
    }

    fn session(session_id: &str, role: PeerRole, agent_id: &str) -> (SessionHandle, OrderedReceiver) {
        let (outbound, rx) = ordered_channel(16);
        (
            SessionHandle {
                session_id: session_id.to_string(),
                role,
                agent_id: agent_id.to_string(),
                outbound,
                telemetry: None,
            },
            rx,
        )
    }

    fn request(id: &str, expires_at_unix_ms: u64) -> ActionRequest {
        ActionRequest {
            request_id: id.to_string(),
            action_type: ActionType::BaritoneGoto as i32,
            target_agent_id: "gamepc".to_string(),
            expires_at_unix_ms,
            params: None,
        }
    }

    async fn recv_payload(rx: &mut OrderedReceiver) -> Payload {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("relay frame should arrive")
            .expect("channel should stay open")
    }

    #[tokio::test(start_paused = true)]
    async fn happy_path_forwards_ack_then_result() {
        let handle = spawn(test_config(), test_metrics());
        let (orch, mut orch_rx) = session("orch", PeerRole::Orchestrator, "orch");
        let (game, _game_rx) = session("game", PeerRole::GameClient, "gamepc");

        let outcome = handle
            .admit(request("R1", 0), orch.clone(), game.clone())
            .await
            .unwrap();
        assert_eq!(outcome, AdmitOutcome::Admitted);

        handle
            .ack_observed(ActionAck {
                request_id: "R1".to_string(),
                accepted: true,
                reason: "accepted".to_string(),
            })
            .await;
        handle
            .result_observed(ActionResult {
                request_id: "R1".to_string(),
                status: ActionStatus::Ok as i32,
                detail: "goto complete".to_string(),
                final_state_version: 42,
            })
            .await;

        match recv_payload(&mut orch_rx).await {
            Payload::ActionAck(a) => {
                assert_eq!(a.request_id, "R1");
                assert!(a.accepted);
            }
            other => panic!("expected ack first, got {}", other.kind()),
        }
        match recv_payload(&mut orch_rx).await {
            Payload::ActionRes(r) => {
                assert_eq!(r.request_id, "R1");
                assert_eq!(r.status(), ActionStatus::Ok);
            }
            other => panic!("expected result second, got {}", other.kind()),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn live_and_recently_terminal_ids_are_duplicates() {
        let handle = spawn(test_config(), test_metrics());
        let (orch, mut orch_rx) = session("orch", PeerRole::Orchestrator, "orch");
        let (game, _game_rx) = session("game", PeerRole::GameClient, "gamepc");

        assert_eq!(
            handle
                .admit(request("R1", 0), orch.clone(), game.clone())
                .await
                .unwrap(),
            AdmitOutcome::Admitted
        );
        // Live entry.
        assert_eq!(
            handle
                .admit(request("R1", 0), orch.clone(), game.clone())
                .await
                .unwrap(),
            AdmitOutcome::Duplicate
        );

        handle
            .result_observed(ActionResult {
                request_id: "R1".to_string(),
                status: ActionStatus::Ok as i32,
                detail: String::new(),
                final_state_version: 0,
            })
            .await;
        let _ = recv_payload(&mut orch_rx).await;

        // Recently terminal.
        assert_eq!(
            handle
                .admit(request("R1", 0), orch.clone(), game.clone())
                .await
                .unwrap(),
            AdmitOutcome::Duplicate
        );

        // Past the suppression horizon the id is admissible again.
        tokio::time::advance(TERMINAL_HORIZON + Duration::from_secs(1)).await;
        assert_eq!(
            handle
                .admit(request("R1", 0), orch.clone(), game.clone())
                .await
                .unwrap(),
            AdmitOutcome::Admitted
        );
    }

    #[tokio::test(start_paused = true)]
    async fn empty_request_id_is_invalid() {
        let handle = spawn(test_config(), test_metrics());
        let (orch, _orch_rx) = session("orch", PeerRole::Orchestrator, "orch");
        let (game, _game_rx) = session("game", PeerRole::GameClient, "gamepc");

        let outcome = handle
            .admit(request("  ", 0), orch, game)
            .await
            .unwrap();
        assert!(matches!(outcome, AdmitOutcome::Invalid { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_synthesizes_timeout_and_stop_all() {
        let metrics = test_metrics();
        let handle = spawn(test_config(), metrics.clone());
        let (orch, mut orch_rx) = session("orch", PeerRole::Orchestrator, "orch");
        let (game, mut game_rx) = session("game", PeerRole::GameClient, "gamepc");

        let expires = wall_unix_ms() + 1000;
        handle
            .admit(request("R2", expires), orch.clone(), game.clone())
            .await
            .unwrap();

        tokio::time::advance(Duration::from_millis(1100)).await;

        match recv_payload(&mut orch_rx).await {
            Payload::ActionRes(r) => {
                assert_eq!(r.request_id, "R2");
                assert_eq!(r.status(), ActionStatus::Timeout);
                assert!(r.detail.contains("deadline"));
            }
            other => panic!("expected timeout result, got {}", other.kind()),
        }

        match recv_payload(&mut game_rx).await {
            Payload::ActionReq(req) => {
                assert_eq!(req.action_type(), ActionType::StopAll);
                assert_eq!(req.target_agent_id, "gamepc");
                assert_ne!(req.request_id, "R2");
            }
            other => panic!("expected STOP_ALL, got {}", other.kind()),
        }
        assert_eq!(metrics.estop_count(), 1);

        // The STOP_ALL entry's own deadline expires without recursing
        // into another STOP_ALL.
        tokio::time::advance(Duration::from_millis(1500)).await;
        let extra = tokio::time::timeout(Duration::from_millis(100), game_rx.recv()).await;
        assert!(extra.is_err(), "no second STOP_ALL expected");
        assert_eq!(metrics.estop_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn an_ack_does_not_cancel_the_deadline() {
        let handle = spawn(test_config(), test_metrics());
        let (orch, mut orch_rx) = session("orch", PeerRole::Orchestrator, "orch");
        let (game, _game_rx) = session("game", PeerRole::GameClient, "gamepc");

        let expires = wall_unix_ms() + 1000;
        handle
            .admit(request("R3", expires), orch.clone(), game.clone())
            .await
            .unwrap();
        handle
            .ack_observed(ActionAck {
                request_id: "R3".to_string(),
                accepted: true,
                reason: String::new(),
            })
            .await;
        let _ack = recv_payload(&mut orch_rx).await;

        tokio::time::advance(Duration::from_millis(1100)).await;
        match recv_payload(&mut orch_rx).await {
            Payload::ActionRes(r) => assert_eq!(r.status(), ActionStatus::Timeout),
            other => panic!("expected timeout result, got {}", other.kind()),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn relay_failure_is_immediately_terminal() {
        let handle = spawn(test_config(), test_metrics());
        let (orch, mut orch_rx) = session("orch", PeerRole::Orchestrator, "orch");
        let (game, _game_rx) = session("game", PeerRole::GameClient, "gamepc");

        handle
            .admit(request("R4", 0), orch.clone(), game.clone())
            .await
            .unwrap();
        handle
            .relay_failed("R4".to_string(), "relay congested".to_string())
            .await;

        match recv_payload(&mut orch_rx).await {
            Payload::ActionAck(a) => {
                assert!(!a.accepted);
                assert_eq!(a.reason, "relay congested");
            }
            other => panic!("expected nack, got {}", other.kind()),
        }
        match recv_payload(&mut orch_rx).await {
            Payload::ActionRes(r) => assert_eq!(r.status(), ActionStatus::Rejected),
            other => panic!("expected rejection, got {}", other.kind()),
        }

        // Terminal: the deadline never fires a second result.
        tokio::time::advance(Duration::from_secs(11)).await;
        let extra = tokio::time::timeout(Duration::from_millis(100), orch_rx.recv()).await;
        assert!(extra.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn target_disconnect_fails_in_flight_entries_fast() {
        let handle = spawn(test_config(), test_metrics());
        let (orch, mut orch_rx) = session("orch", PeerRole::Orchestrator, "orch");
        let (game, _game_rx) = session("game", PeerRole::GameClient, "gamepc");

        handle
            .admit(request("R5", 0), orch.clone(), game.clone())
            .await
            .unwrap();
        handle.session_closed("game".to_string()).await;

        match recv_payload(&mut orch_rx).await {
            Payload::ActionRes(r) => {
                assert_eq!(r.status(), ActionStatus::Timeout);
                assert_eq!(r.detail, "target disconnected");
            }
            other => panic!("expected timeout result, got {}", other.kind()),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn originator_disconnect_destroys_entries_silently() {
        let handle = spawn(test_config(), test_metrics());
        let (orch, orch_rx) = session("orch", PeerRole::Orchestrator, "orch");
        let (game, mut game_rx) = session("game", PeerRole::GameClient, "gamepc");

        handle
            .admit(request("R6", 0), orch.clone(), game.clone())
            .await
            .unwrap();
        drop(orch_rx);
        handle.session_closed("orch".to_string()).await;

        // The deadline has nothing left to fire against: no STOP_ALL.
        tokio::time::advance(Duration::from_secs(11)).await;
        let extra = tokio::time::timeout(Duration::from_millis(100), game_rx.recv()).await;
        assert!(extra.is_err(), "destroyed entry must not reach the target");
    }

    #[test]
    fn terminal_lru_caps_and_expires() {
        tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .start_paused(true)
            .build()
            .unwrap()
            .block_on(async {
                let mut lru = TerminalLru::new(2, Duration::from_secs(60));
                lru.insert("a".to_string());
                lru.insert("b".to_string());
                assert!(lru.contains("a"));

                // Capacity eviction drops the oldest.
                lru.insert("c".to_string());
                assert!(!lru.contains("a"));
                assert!(lru.contains("b"));
                assert!(lru.contains("c"));

                // Horizon expiry clears the rest.
                tokio::time::advance(Duration::from_secs(61)).await;
                assert!(!lru.contains("b"));
                assert!(!lru.contains("c"));
            });
    }
}
