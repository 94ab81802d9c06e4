//! ---
//! rover_section: "01-core-functionality"
//! rover_subsection: "module"
//! rover_type: "source"
//! rover_scope: "code"
//! rover_description: "Operator intent, dispatch and telemetry reconciliation."
//! rover_version: "v0.0.0-prealpha"
//! rover_owner: "tbd"
//! ---
//! Transport session lifecycle.
//!
//! The manager runs as a single actor task. Every state transition happens
//! inside one turn of its loop, so check-then-act on the connection state is
//! race free. Each connect attempt is stamped with a generation; events from
//! an older generation (a late connect result, a reader noticing a socket we
//! already tore down) are discarded. A single [`RetryTimer`] drives reconnects
//! while the link is down and the operator still wants it up.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use rover_metrics::LinkMetrics;
use rover_rt::RetryTimer;
use rover_transport::{Connector, Link, LinkSink, LinkStream, TransportError};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    /// Gauge value exported as `rover_connection_state`.
    pub const fn code(self) -> i64 {
        match self {
            ConnectionState::Disconnected => 0,
            ConnectionState::Connecting => 1,
            ConnectionState::Connected => 2,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        })
    }
}

/// Why a frame was not written.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("link is not connected")]
    NotConnected,
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),
    #[error("connection manager stopped")]
    Stopped,
}

#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    pub reconnect_interval: Duration,
    pub request_capacity: usize,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            reconnect_interval: Duration::from_secs(5),
            request_capacity: 64,
        }
    }
}

enum Request {
    Connect,
    Close(oneshot::Sender<()>),
    Send {
        text: String,
        reply: oneshot::Sender<Result<(), SendError>>,
    },
    Shutdown,
}

enum LinkEvent {
    Opened { generation: u64, link: Link },
    Failed { generation: u64, error: TransportError },
    Inbound { generation: u64, payload: Vec<u8> },
    Lost { generation: u64, error: Option<TransportError> },
}

/// Cloneable front end to the manager task.
#[derive(Clone)]
pub struct ConnectionHandle {
    requests: mpsc::Sender<Request>,
    state: watch::Receiver<ConnectionState>,
}

impl ConnectionHandle {
    /// Open a session unless one is open or pending.
    pub async fn connect(&self) {
        let _ = self.requests.send(Request::Connect).await;
    }

    /// Tear down the session and cancel any pending reconnect. Resolves once
    /// the manager has processed the request.
    pub async fn close(&self) {
        let (tx, rx) = oneshot::channel();
        if self.requests.send(Request::Close(tx)).await.is_ok() {
            let _ = rx.await;
        }
    }

    /// Write one frame. Fails fast unless the link is connected.
    pub async fn send(&self, text: String) -> Result<(), SendError> {
        let (reply, rx) = oneshot::channel();
        self.requests
            .send(Request::Send { text, reply })
            .await
            .map_err(|_| SendError::Stopped)?;
        rx.await.map_err(|_| SendError::Stopped)?
    }

    /// Stop the manager task after closing the session.
    pub async fn shutdown(&self) {
        let _ = self.requests.send(Request::Shutdown).await;
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }
}

pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    metrics: LinkMetrics,
    requests: mpsc::Receiver<Request>,
    events_tx: mpsc::UnboundedSender<LinkEvent>,
    events: mpsc::UnboundedReceiver<LinkEvent>,
    state: watch::Sender<ConnectionState>,
    inbound: mpsc::Sender<Vec<u8>>,
    generation: u64,
    wanted: bool,
    sink: Option<Box<dyn LinkSink>>,
    attempt: Option<JoinHandle<()>>,
    reader: Option<JoinHandle<()>>,
    retry: RetryTimer,
}

impl ConnectionManager {
    /// Build the manager and its handle. Inbound payloads from the current
    /// session are forwarded to `inbound` in delivery order.
    pub fn new(
        connector: Arc<dyn Connector>,
        options: &ConnectionOptions,
        metrics: LinkMetrics,
        inbound: mpsc::Sender<Vec<u8>>,
    ) -> (Self, ConnectionHandle) {
        let (requests_tx, requests) = mpsc::channel(options.request_capacity.max(1));
        let (events_tx, events) = mpsc::unbounded_channel();
        let (state, state_rx) = watch::channel(ConnectionState::Disconnected);
        metrics.set_connection_state(ConnectionState::Disconnected.code());
        let manager = Self {
            connector,
            metrics,
            requests,
            events_tx,
            events,
            state,
            inbound,
            generation: 0,
            wanted: false,
            sink: None,
            attempt: None,
            reader: None,
            retry: RetryTimer::new(options.reconnect_interval),
        };
        let handle = ConnectionHandle {
            requests: requests_tx,
            state: state_rx,
        };
        (manager, handle)
    }

    /// Actor loop. Exits on shutdown or once every handle is dropped.
    pub async fn run(mut self) -> Result<()> {
        info!(transport = self.connector.name(), "connection manager started");
        loop {
            tokio::select! {
                request = self.requests.recv() => match request {
                    Some(Request::Shutdown) | None => break,
                    Some(request) => self.handle_request(request).await,
                },
                Some(event) = self.events.recv() => self.handle_event(event).await,
                _ = self.retry.fired() => self.on_retry(),
            }
        }
        self.teardown().await;
        info!("connection manager stopped");
        Ok(())
    }

    fn current(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn set_state(&mut self, next: ConnectionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            info!(from = %previous, to = %next, "connection state changed");
            self.metrics.set_connection_state(next.code());
        }
    }

    async fn handle_request(&mut self, request: Request) {
        match request {
            Request::Connect => {
                self.wanted = true;
                self.begin_connect();
            }
            Request::Close(ack) => {
                self.teardown().await;
                let _ = ack.send(());
            }
            Request::Send { text, reply } => {
                let outcome = self.write(text).await;
                let _ = reply.send(outcome);
            }
            Request::Shutdown => {}
        }
    }

    fn begin_connect(&mut self) {
        if self.current() != ConnectionState::Disconnected {
            debug!(state = %self.current(), "connect ignored, session already open or pending");
            return;
        }
        self.retry.cancel();
        self.generation += 1;
        let generation = self.generation;
        self.set_state(ConnectionState::Connecting);

        let connector = self.connector.clone();
        let events = self.events_tx.clone();
        self.attempt = Some(tokio::spawn(async move {
            let event = match connector.connect().await {
                Ok(link) => LinkEvent::Opened { generation, link },
                Err(error) => LinkEvent::Failed { generation, error },
            };
            let _ = events.send(event);
        }));
    }

    async fn write(&mut self, text: String) -> Result<(), SendError> {
        if self.current() != ConnectionState::Connected {
            return Err(SendError::NotConnected);
        }
        let Some(sink) = self.sink.as_mut() else {
            return Err(SendError::NotConnected);
        };
        match sink.send(text).await {
            Ok(()) => Ok(()),
            Err(err) => {
                warn!(error = %err, "send failed, dropping session");
                self.on_lost();
                Err(SendError::Transport(err))
            }
        }
    }

    async fn handle_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Opened { generation, link } if generation == self.generation => {
                self.attempt = None;
                self.on_opened(link);
            }
            LinkEvent::Opened { generation, link } => {
                debug!(generation, "discarding session from superseded attempt");
                let (mut sink, _stream) = link;
                tokio::spawn(async move {
                    let _ = sink.close().await;
                });
            }
            LinkEvent::Failed { generation, error } if generation == self.generation => {
                self.attempt = None;
                debug!(error = %error, "connect attempt failed");
                self.on_lost();
            }
            LinkEvent::Inbound {
                generation,
                payload,
            } if generation == self.generation => {
                if self.inbound.send(payload).await.is_err() {
                    debug!("inbound consumer gone, dropping frame");
                }
            }
            LinkEvent::Lost { generation, error } if generation == self.generation => {
                match error {
                    Some(err) => warn!(error = %err, "link lost"),
                    None => info!("link closed by peer"),
                }
                self.reader = None;
                self.on_lost();
            }
            LinkEvent::Failed { .. } | LinkEvent::Inbound { .. } | LinkEvent::Lost { .. } => {
                debug!("discarding event from superseded session");
            }
        }
    }

    fn on_opened(&mut self, (sink, stream): Link) {
        self.sink = Some(sink);
        self.reader = Some(spawn_reader(
            self.generation,
            stream,
            self.events_tx.clone(),
        ));
        self.set_state(ConnectionState::Connected);
    }

    fn on_lost(&mut self) {
        self.generation += 1;
        self.sink = None;
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        self.set_state(ConnectionState::Disconnected);
        if self.wanted && self.retry.arm() {
            debug!("reconnect timer armed");
        }
    }

    fn on_retry(&mut self) {
        if self.current() != ConnectionState::Disconnected || !self.wanted {
            self.retry.cancel();
            return;
        }
        self.metrics.record_reconnect();
        info!("attempting reconnect");
        self.begin_connect();
    }

    async fn teardown(&mut self) {
        self.wanted = false;
        self.retry.cancel();
        self.generation += 1;
        if let Some(attempt) = self.attempt.take() {
            attempt.abort();
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        if let Some(mut sink) = self.sink.take() {
            if let Err(err) = sink.close().await {
                debug!(error = %err, "error while closing session");
            }
        }
        self.set_state(ConnectionState::Disconnected);
    }
}

fn spawn_reader(
    generation: u64,
    mut stream: Box<dyn LinkStream>,
    events: mpsc::UnboundedSender<LinkEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = match stream.next_frame().await {
                Some(Ok(payload)) => LinkEvent::Inbound {
                    generation,
                    payload,
                },
                Some(Err(error)) => LinkEvent::Lost {
                    generation,
                    error: Some(error),
                },
                None => LinkEvent::Lost {
                    generation,
                    error: None,
                },
            };
            let last = matches!(event, LinkEvent::Lost { .. });
            if events.send(event).is_err() || last {
                break;
            }
        }
    })
}
