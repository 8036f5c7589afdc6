//! tether-daemon - secure telemetry-and-control bridge.
//!
//! Binds the mutual-TLS endpoint, spawns one session task per accepted
//! connection, runs the correlator actor, and serves Prometheus metrics.
//!
//! Exit codes: `0` clean shutdown, `1` bind failure, `2` TLS material
//! load failure, `3` configuration error.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use axum::http::StatusCode;
use axum::routing::get;
use clap::Parser;
use tether_daemon::config::{BridgeConfig, ConfigError};
use tether_daemon::correlator::{self, CorrelatorConfig};
use tether_daemon::metrics::MetricsRegistry;
use tether_daemon::registry::SessionRegistry;
use tether_daemon::session::{SessionContext, run_session};
use tether_daemon::tls::{self, TlsError};
use tokio::net::TcpListener;
use tokio::signal::unix::{SignalKind, signal};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// tether bridge daemon.
#[derive(Parser, Debug)]
#[command(name = "tether-daemon")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the bridge configuration file.
    #[arg(short, long, default_value = "config/tether.toml")]
    config: PathBuf,

    /// Listen address override (host:port).
    #[arg(long)]
    bind_addr: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Port for the Prometheus metrics HTTP endpoint.
    #[arg(long, default_value_t = 9464)]
    metrics_port: u16,

    /// Disable the metrics HTTP endpoint.
    #[arg(long)]
    no_metrics: bool,
}

/// Startup failures mapped to operational exit codes.
#[derive(Debug, thiserror::Error)]
enum StartupError {
    /// Exit code 3.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Exit code 2.
    #[error(transparent)]
    Tls(#[from] TlsError),

    /// Exit code 1.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Exit code 1.
    #[error(transparent)]
    Runtime(#[from] anyhow::Error),
}

impl StartupError {
    const fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => 3,
            Self::Tls(_) => 2,
            Self::Bind { .. } | Self::Runtime(_) => 1,
        }
    }
}

fn main() {
    let args = Args::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(args.log_level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(e) = run(args) {
        error!(error = %e, "bridge startup failed");
        std::process::exit(e.exit_code());
    }
}

#[tokio::main]
async fn run(args: Args) -> Result<(), StartupError> {
    let mut config = BridgeConfig::load(&args.config)?;
    if let Some(bind_addr) = args.bind_addr {
        config.bind_addr = bind_addr;
        config.validate()?;
    }
    let config = Arc::new(config);

    let tls_config = tls::make_server_config(&config.tls)?;
    let acceptor = TlsAcceptor::from(tls_config);

    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .map_err(|source| StartupError::Bind {
            addr: config.bind_addr.clone(),
            source,
        })?;
    info!(bind_addr = %config.bind_addr, "bridge listening");

    let metrics_registry =
        MetricsRegistry::new().context("failed to build metrics registry")?;
    if !args.no_metrics {
        serve_metrics(metrics_registry.clone(), args.metrics_port).await;
    }

    let metrics = metrics_registry.bridge_metrics().clone();
    let registry = Arc::new(SessionRegistry::new(config.limits.max_orchestrators));
    let correlator = correlator::spawn(CorrelatorConfig::from_bridge(&config), metrics.clone());
    let ctx = SessionContext {
        config: Arc::clone(&config),
        registry,
        correlator,
        metrics,
    };

    let mut sigint =
        signal(SignalKind::interrupt()).context("failed to install SIGINT handler")?;
    let mut sigterm =
        signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (tcp, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        continue;
                    }
                };
                let acceptor = acceptor.clone();
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    // Connections failing mutual TLS are dropped without
                    // a protocol reply.
                    let tls_stream = match acceptor.accept(tcp).await {
                        Ok(stream) => stream,
                        Err(e) => {
                            debug!(peer = %peer, error = %e, "tls accept failed");
                            return;
                        }
                    };
                    if let Err(e) = run_session(tls_stream, ctx).await {
                        warn!(peer = %peer, error = %e, "session ended with error");
                    }
                });
            }
            _ = sigint.recv() => {
                info!("SIGINT received; shutting down");
                break;
            }
            _ = sigterm.recv() => {
                info!("SIGTERM received; shutting down");
                break;
            }
        }
    }

    Ok(())
}

/// Serves the Prometheus text endpoint on its own listener.
async fn serve_metrics(registry: MetricsRegistry, port: u16) {
    let app = Router::new().route(
        "/metrics",
        get(move || {
            let registry = registry.clone();
            async move {
                match registry.encode_text() {
                    Ok(body) => (StatusCode::OK, body),
                    Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
                }
            }
        }),
    );

    match TcpListener::bind(("0.0.0.0", port)).await {
        Ok(listener) => {
            info!(port, "metrics endpoint listening");
            tokio::spawn(async move {
                if let Err(e) = axum::serve(listener, app).await {
                    warn!(error = %e, "metrics endpoint failed");
                }
            });
        }
        Err(e) => {
            // Metrics are an operational surface, not the product; a
            // bind failure here does not stop the bridge.
            warn!(port, error = %e, "failed to bind metrics endpoint");
        }
    }
}
