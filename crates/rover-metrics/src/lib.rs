//! ---
//! rover_section: "03-observability"
//! rover_subsection: "module"
//! rover_type: "source"
//! rover_scope: "code"
//! rover_description: "Metrics collection and export for the link."
//! rover_version: "v0.0.0-prealpha"
//! rover_owner: "tbd"
//! ---
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::{header, HeaderValue, StatusCode};
use axum::routing::get;
use axum::response::{IntoResponse, Response};
use axum::Router;
use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Shared registry type used across services.
pub type SharedRegistry = Arc<Registry>;

/// Produce a new shared registry.
pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Spawn an HTTP server that exposes the registry at `/metrics`.
pub fn spawn_http_server(registry: SharedRegistry, addr: SocketAddr) -> Result<MetricsServer> {
    let app = Router::new().route(
        "/metrics",
        get({
            let registry = registry.clone();
            move || metrics_handler(registry.clone())
        }),
    );

    let std_listener = StdTcpListener::bind(addr)
        .with_context(|| format!("failed to bind metrics listener {}", addr))?;
    std_listener
        .set_nonblocking(true)
        .with_context(|| "failed to configure metrics listener as non-blocking")?;
    let addr = std_listener
        .local_addr()
        .with_context(|| "failed to read metrics listener address")?;
    let listener = TcpListener::from_std(std_listener)
        .with_context(|| "failed to convert std listener into tokio listener")?;

    info!(address = %addr, "metrics server starting");

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let service = app.into_make_service();
    let handle: JoinHandle<Result<()>> = tokio::spawn(async move {
        axum::serve(listener, service)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
            .context("metrics server encountered an error")?;
        Ok(())
    });

    Ok(MetricsServer {
        addr,
        shutdown: Some(shutdown_tx),
        task: handle,
    })
}

/// Prometheus scrape endpoint.
async fn metrics_handler(registry: SharedRegistry) -> Response {
    let encoder = TextEncoder::new();
    match encoder.encode_to_string(&registry.gather()) {
        Ok(body) => (
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_static(prometheus::TEXT_FORMAT),
            )],
            body,
        )
            .into_response(),
        Err(err) => {
            error!(error = %err, "failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding error").into_response()
        }
    }
}

/// Handle to the running HTTP exporter.
#[derive(Debug)]
pub struct MetricsServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl MetricsServer {
    /// Return the bound address for convenience.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Signal shutdown and await task completion.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.task.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(err),
            Err(join_err) => Err(anyhow::Error::new(join_err)),
        }
    }
}

/// Counters and gauges describing the operator link.
#[derive(Clone, Debug)]
pub struct LinkMetrics {
    registry: SharedRegistry,
    commands_sent: IntCounterVec,
    commands_dropped: IntCounterVec,
    frames_received: IntCounter,
    frames_rejected: IntCounter,
    connection_state: IntGauge,
    reconnect_attempts: IntCounter,
}

impl LinkMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let commands_sent = IntCounterVec::new(
            Opts::new(
                "rover_commands_sent_total",
                "Commands written to the link by kind",
            ),
            &["kind"],
        )?;
        registry.register(Box::new(commands_sent.clone()))?;

        let commands_dropped = IntCounterVec::new(
            Opts::new(
                "rover_commands_dropped_total",
                "Commands not written to the link by kind and reason",
            ),
            &["kind", "reason"],
        )?;
        registry.register(Box::new(commands_dropped.clone()))?;

        let frames_received = IntCounter::with_opts(Opts::new(
            "rover_frames_received_total",
            "Telemetry frames read from the link",
        ))?;
        registry.register(Box::new(frames_received.clone()))?;

        let frames_rejected = IntCounter::with_opts(Opts::new(
            "rover_frames_rejected_total",
            "Telemetry frames dropped by the decoder",
        ))?;
        registry.register(Box::new(frames_rejected.clone()))?;

        let connection_state = IntGauge::with_opts(Opts::new(
            "rover_connection_state",
            "Link state (0 disconnected, 1 connecting, 2 connected)",
        ))?;
        registry.register(Box::new(connection_state.clone()))?;

        let reconnect_attempts = IntCounter::with_opts(Opts::new(
            "rover_reconnect_attempts_total",
            "Reconnect attempts started by the retry timer",
        ))?;
        registry.register(Box::new(reconnect_attempts.clone()))?;

        Ok(Self {
            registry,
            commands_sent,
            commands_dropped,
            frames_received,
            frames_rejected,
            connection_state,
            reconnect_attempts,
        })
    }

    /// Metrics bound to a private registry, for tests and embedders that do
    /// not scrape.
    pub fn unregistered() -> Self {
        Self::new(new_registry()).expect("fresh registry accepts link metrics")
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn record_sent(&self, kind: &str) {
        self.commands_sent.with_label_values(&[kind]).inc();
    }

    pub fn record_dropped(&self, kind: &str, reason: &str) {
        self.commands_dropped.with_label_values(&[kind, reason]).inc();
    }

    pub fn record_frame(&self) {
        self.frames_received.inc();
    }

    pub fn record_rejected(&self) {
        self.frames_rejected.inc();
    }

    pub fn set_connection_state(&self, code: i64) {
        self.connection_state.set(code);
    }

    pub fn record_reconnect(&self) {
        self.reconnect_attempts.inc();
    }

    pub fn sent(&self, kind: &str) -> u64 {
        self.commands_sent.with_label_values(&[kind]).get()
    }

    pub fn dropped(&self, kind: &str, reason: &str) -> u64 {
        self.commands_dropped.with_label_values(&[kind, reason]).get()
    }

    pub fn frames_received(&self) -> u64 {
        self.frames_received.get()
    }

    pub fn frames_rejected(&self) -> u64 {
        self.frames_rejected.get()
    }

    pub fn connection_state(&self) -> i64 {
        self.connection_state.get()
    }

    pub fn reconnect_attempts(&self) -> u64 {
        self.reconnect_attempts.get()
    }
}


pub use prometheus;
