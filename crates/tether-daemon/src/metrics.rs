//! Prometheus metrics for bridge observability.
//!
//! Drop counts, relay outcomes, and session churn are operational signals
//! only; none of them appear on the wire. The registry is exported in
//! Prometheus text format at the `/metrics` endpoint.
//!
//! | Metric | Type | Labels |
//! |--------|------|--------|
//! | `tether_sessions_active` | Gauge | `role` |
//! | `tether_frames_rx_total` | Counter | `payload` |
//! | `tether_telemetry_dropped_total` | Counter | `reason` |
//! | `tether_actions_total` | Counter | `outcome` |
//! | `tether_estop_total` | Counter | — |
//! | `tether_handshake_failures_total` | Counter | `reason` |

use std::sync::Arc;

use prometheus::{CounterVec, Encoder, GaugeVec, IntCounter, Opts, Registry, TextEncoder};
use thiserror::Error;

/// Errors that can occur during metrics operations.
#[derive(Debug, Error)]
pub enum MetricsError {
    /// Failed to register a metric with Prometheus.
    #[error("failed to register metric: {0}")]
    RegistrationFailed(#[from] prometheus::Error),

    /// Failed to encode metrics output.
    #[error("failed to encode metrics: {0}")]
    EncodingFailed(String),
}

/// Result type for metrics operations.
pub type MetricsResult<T> = Result<T, MetricsError>;

/// Bridge health metrics.
///
/// All metrics use interior mutability and are safe to share across
/// tasks. The struct is `Clone`, `Send`, and `Sync`.
#[derive(Clone)]
pub struct BridgeMetrics {
    /// Currently established sessions, labeled by role.
    sessions_active: GaugeVec,

    /// Inbound envelopes, labeled by payload kind.
    frames_rx_total: CounterVec,

    /// Telemetry samples not relayed, labeled by reason
    /// (`backpressure`, `stale`, `throttle`).
    telemetry_dropped_total: CounterVec,

    /// Action relay outcomes, labeled by outcome
    /// (`relayed`, `completed`, `duplicate`, `congested`, `unroutable`,
    /// `timeout`, `failed`).
    actions_total: CounterVec,

    /// Emergency STOP_ALL requests synthesized.
    estop_total: IntCounter,

    /// Handshake failures, labeled by reason.
    handshake_failures_total: CounterVec,
}

impl BridgeMetrics {
    /// Creates bridge metrics and registers them with the given registry.
    ///
    /// # Errors
    ///
    /// Returns an error if any metric fails to register.
    pub fn new(registry: &Registry) -> MetricsResult<Self> {
        let sessions_active = GaugeVec::new(
            Opts::new("tether_sessions_active", "Currently established sessions"),
            &["role"],
        )?;
        registry.register(Box::new(sessions_active.clone()))?;

        let frames_rx_total = CounterVec::new(
            Opts::new("tether_frames_rx_total", "Inbound envelopes by payload"),
            &["payload"],
        )?;
        registry.register(Box::new(frames_rx_total.clone()))?;

        let telemetry_dropped_total = CounterVec::new(
            Opts::new(
                "tether_telemetry_dropped_total",
                "Telemetry samples not relayed",
            ),
            &["reason"],
        )?;
        registry.register(Box::new(telemetry_dropped_total.clone()))?;

        let actions_total = CounterVec::new(
            Opts::new("tether_actions_total", "Action relay outcomes"),
            &["outcome"],
        )?;
        registry.register(Box::new(actions_total.clone()))?;

        let estop_total = IntCounter::new(
            "tether_estop_total",
            "Emergency STOP_ALL requests synthesized",
        )?;
        registry.register(Box::new(estop_total.clone()))?;

        let handshake_failures_total = CounterVec::new(
            Opts::new("tether_handshake_failures_total", "Handshake failures"),
            &["reason"],
        )?;
        registry.register(Box::new(handshake_failures_total.clone()))?;

        Ok(Self {
            sessions_active,
            frames_rx_total,
            telemetry_dropped_total,
            actions_total,
            estop_total,
            handshake_failures_total,
        })
    }

    /// Records a session entering `Established`.
    pub fn session_opened(&self, role: &str) {
        self.sessions_active.with_label_values(&[role]).inc();
    }

    /// Records an established session closing.
    pub fn session_closed(&self, role: &str) {
        self.sessions_active.with_label_values(&[role]).dec();
    }

    /// Records an inbound envelope.
    pub fn frame_received(&self, payload: &str) {
        self.frames_rx_total.with_label_values(&[payload]).inc();
    }

    /// Records a telemetry sample that was not relayed.
    pub fn telemetry_dropped(&self, reason: &str) {
        self.telemetry_dropped_total
            .with_label_values(&[reason])
            .inc();
    }

    /// Records an action relay outcome.
    pub fn action_outcome(&self, outcome: &str) {
        self.actions_total.with_label_values(&[outcome]).inc();
    }

    /// Records a synthesized emergency stop.
    pub fn estop_synthesized(&self) {
        self.estop_total.inc();
    }

    /// Records a handshake failure.
    pub fn handshake_failed(&self, reason: &str) {
        self.handshake_failures_total
            .with_label_values(&[reason])
            .inc();
    }

    /// Current value of the dropped-telemetry counter for `reason`.
    /// Intended for tests and diagnostics.
    #[must_use]
    pub fn telemetry_dropped_count(&self, reason: &str) -> f64 {
        self.telemetry_dropped_total
            .with_label_values(&[reason])
            .get()
    }

    /// Current value of the action-outcome counter for `outcome`.
    /// Intended for tests and diagnostics.
    #[must_use]
    pub fn action_outcome_count(&self, outcome: &str) -> f64 {
        self.actions_total.with_label_values(&[outcome]).get()
    }

    /// Current value of the emergency-stop counter. Intended for tests
    /// and diagnostics.
    #[must_use]
    pub fn estop_count(&self) -> u64 {
        self.estop_total.get()
    }
}

/// Owns the Prometheus registry and the bridge metrics handle.
#[derive(Clone)]
pub struct MetricsRegistry {
    registry: Arc<Registry>,
    bridge: BridgeMetrics,
}

impl MetricsRegistry {
    /// Creates a registry with all bridge metrics registered.
    ///
    /// # Errors
    ///
    /// Returns an error if metric registration fails.
    pub fn new() -> MetricsResult<Self> {
        let registry = Arc::new(Registry::new());
        let bridge = BridgeMetrics::new(&registry)?;
        Ok(Self { registry, bridge })
    }

    /// Returns the bridge metrics handle.
    #[must_use]
    pub fn bridge_metrics(&self) -> &BridgeMetrics {
        &self.bridge
    }

    /// Encodes all metrics in Prometheus text format.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    pub fn encode_text(&self) -> MetricsResult<String> {
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        let mut buf = Vec::new();
        encoder
            .encode(&families, &mut buf)
            .map_err(|e| MetricsError::EncodingFailed(e.to_string()))?;
        String::from_utf8(buf).map_err(|e| MetricsError::EncodingFailed(e.to_string()))
    }
}
