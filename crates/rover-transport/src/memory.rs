//! ---
//! rover_section: "02-messaging-wire-model"
//! rover_subsection: "module"
//! rover_type: "source"
//! rover_scope: "code"
//! rover_description: "Transport implementations for the rover link."
//! rover_version: "v0.0.0-prealpha"
//! rover_owner: "tbd"
//! ---
//! In-process connector for tests and single-process integration.
//!
//! The connector records every frame written to the currently open link and
//! lets the test inject inbound payloads or sever the link from the "device"
//! side. Connects can be refused or held open-ended to exercise the
//! connecting state.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};

use crate::{Connector, Link, LinkSink, LinkStream, TransportError};

enum Inbound {
    Frame(Vec<u8>),
    Fail(String),
}

#[derive(Default)]
struct State {
    accept: bool,
    attempts: usize,
    next_link: u64,
    active: Option<ActiveLink>,
    sent: Vec<String>,
    closes: usize,
    fail_sends: bool,
}

struct ActiveLink {
    id: u64,
    inbound: mpsc::UnboundedSender<Inbound>,
}

/// Shared handle to an in-memory link endpoint. Clones observe the same state.
#[derive(Clone)]
pub struct InMemoryConnector {
    state: Arc<Mutex<State>>,
    gate: Arc<watch::Sender<bool>>,
}

impl Default for InMemoryConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryConnector {
    /// Connector that accepts connects immediately.
    pub fn new() -> Self {
        let (gate, _) = watch::channel(false);
        Self {
            state: Arc::new(Mutex::new(State {
                accept: true,
                ..State::default()
            })),
            gate: Arc::new(gate),
        }
    }

    /// Accept or refuse subsequent connect attempts.
    pub fn set_accept(&self, accept: bool) {
        self.state.lock().accept = accept;
    }

    /// Park subsequent connect attempts until [`InMemoryConnector::release_connects`].
    pub fn hold_connects(&self) {
        self.gate.send_replace(true);
    }

    pub fn release_connects(&self) {
        self.gate.send_replace(false);
    }

    /// Make writes on the open link fail while it stays registered, as a
    /// socket that accepts no more data would.
    pub fn fail_sends(&self, fail: bool) {
        self.state.lock().fail_sends = fail;
    }

    /// Number of connect attempts observed, including refused and parked ones.
    pub fn attempts(&self) -> usize {
        self.state.lock().attempts
    }

    /// Number of times a link was closed from the client side.
    pub fn closes(&self) -> usize {
        self.state.lock().closes
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().active.is_some()
    }

    /// Frames written by the client, oldest first.
    pub fn sent(&self) -> Vec<String> {
        self.state.lock().sent.clone()
    }

    /// Drain the recorded frames.
    pub fn take_sent(&self) -> Vec<String> {
        std::mem::take(&mut self.state.lock().sent)
    }

    /// Deliver an inbound payload on the open link. Returns `false` when no
    /// link is open.
    pub fn inject(&self, payload: impl Into<Vec<u8>>) -> bool {
        let state = self.state.lock();
        match &state.active {
            Some(link) => link.inbound.send(Inbound::Frame(payload.into())).is_ok(),
            None => false,
        }
    }

    /// Sever the open link with a transport error, as if the device vanished.
    pub fn fail_link(&self, reason: &str) {
        if let Some(link) = self.state.lock().active.take() {
            let _ = link.inbound.send(Inbound::Fail(reason.to_owned()));
        }
    }

    /// Close the open link cleanly from the device side.
    pub fn drop_link(&self) {
        self.state.lock().active.take();
    }
}

#[async_trait]
impl Connector for InMemoryConnector {
    async fn connect(&self) -> Result<Link, TransportError> {
        self.state.lock().attempts += 1;
        let mut gate = self.gate.subscribe();
        gate.wait_for(|held| !*held)
            .await
            .map_err(|_| TransportError::Closed)?;

        let mut state = self.state.lock();
        if !state.accept {
            return Err(TransportError::Connect("connection refused".into()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        state.next_link += 1;
        let id = state.next_link;
        state.active = Some(ActiveLink { id, inbound: tx });
        Ok((
            Box::new(MemorySink {
                id,
                state: self.state.clone(),
            }),
            Box::new(MemoryStream { inbound: rx }),
        ))
    }

    fn name(&self) -> &'static str {
        "in_memory"
    }
}

struct MemorySink {
    id: u64,
    state: Arc<Mutex<State>>,
}

impl MemorySink {
    fn is_current(state: &State, id: u64) -> bool {
        state.active.as_ref().is_some_and(|link| link.id == id)
    }
}

#[async_trait]
impl LinkSink for MemorySink {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if !Self::is_current(&state, self.id) {
            return Err(TransportError::Closed);
        }
        if state.fail_sends {
            return Err(TransportError::Protocol("write rejected".into()));
        }
        state.sent.push(text);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if Self::is_current(&state, self.id) {
            state.active = None;
            state.closes += 1;
        }
        Ok(())
    }
}

struct MemoryStream {
    inbound: mpsc::UnboundedReceiver<Inbound>,
}

#[async_trait]
impl LinkStream for MemoryStream {
    async fn next_frame(&mut self) -> Option<Result<Vec<u8>, TransportError>> {
        match self.inbound.recv().await? {
            Inbound::Frame(bytes) => Some(Ok(bytes)),
            Inbound::Fail(reason) => Some(Err(TransportError::Protocol(reason))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_sends_and_delivers_injected_frames() {
        let connector = InMemoryConnector::new();
        let (mut sink, mut stream) = connector.connect().await.expect("connect");
        sink.send("one".into()).await.expect("send");
        assert!(connector.inject(b"{\"horn\":true}".to_vec()));
        let frame = stream.next_frame().await.expect("frame").expect("ok");
        assert_eq!(frame, b"{\"horn\":true}".to_vec());
        assert_eq!(connector.take_sent(), vec!["one".to_owned()]);
        assert!(connector.sent().is_empty());
    }

    #[tokio::test]
    async fn refused_connect_counts_attempt() {
        let connector = InMemoryConnector::new();
        connector.set_accept(false);
        assert!(matches!(
            connector.connect().await,
            Err(TransportError::Connect(_))
        ));
        assert_eq!(connector.attempts(), 1);
        assert!(!connector.is_open());
    }

    #[tokio::test]
    async fn stale_sink_cannot_write_after_link_is_replaced() {
        let connector = InMemoryConnector::new();
        let (mut old_sink, mut old_stream) = connector.connect().await.expect("first");
        connector.drop_link();
        assert!(old_stream.next_frame().await.is_none());
        let (mut sink, _stream) = connector.connect().await.expect("second");
        assert!(matches!(
            old_sink.send("late".into()).await,
            Err(TransportError::Closed)
        ));
        sink.send("fresh".into()).await.expect("send");
        assert_eq!(connector.sent(), vec!["fresh".to_owned()]);
    }

    #[tokio::test]
    async fn failed_link_surfaces_error() {
        let connector = InMemoryConnector::new();
        let (_sink, mut stream) = connector.connect().await.expect("connect");
        connector.fail_link("reset by peer");
        assert!(matches!(
            stream.next_frame().await,
            Some(Err(TransportError::Protocol(_)))
        ));
        assert!(!connector.is_open());
    }

    #[tokio::test]
    async fn failing_sends_keep_the_link_registered() {
        let connector = InMemoryConnector::new();
        let (mut sink, _stream) = connector.connect().await.expect("connect");
        connector.fail_sends(true);
        assert!(matches!(
            sink.send("lost".into()).await,
            Err(TransportError::Protocol(_))
        ));
        assert!(connector.is_open());
        assert!(connector.sent().is_empty());
        connector.fail_sends(false);
        sink.send("kept".into()).await.expect("send");
        assert_eq!(connector.sent(), vec!["kept".to_owned()]);
    }

    #[tokio::test(start_paused = true)]
    async fn held_connect_waits_for_release() {
        let connector = InMemoryConnector::new();
        connector.hold_connects();
        let pending = {
            let connector = connector.clone();
            tokio::spawn(async move { connector.connect().await.is_ok() })
        };
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(connector.attempts(), 1);
        assert!(!connector.is_open());
        connector.release_connects();
        assert!(pending.await.expect("join"));
        assert!(connector.is_open());
    }
}
