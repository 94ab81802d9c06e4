//! ---
//! rover_section: "02-messaging-wire-model"
//! rover_subsection: "module"
//! rover_type: "source"
//! rover_scope: "code"
//! rover_description: "Transport implementations for the rover link."
//! rover_version: "v0.0.0-prealpha"
//! rover_owner: "tbd"
//! ---
//! Link transports for the rover control channel.
//!
//! A [`Connector`] opens one session and hands back its two halves: a
//! [`LinkSink`] for outbound text frames and a [`LinkStream`] yielding inbound
//! payloads in delivery order. The WebSocket connector talks to real
//! hardware; the in-memory connector drives tests.

use async_trait::async_trait;
use thiserror::Error;

pub mod memory;
pub mod websocket;

pub use memory::InMemoryConnector;
pub use websocket::WebSocketConnector;

/// Errors raised by link transports. None of them are fatal to the caller.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Session could not be opened.
    #[error("connect failed: {0}")]
    Connect(String),
    /// Session is already closed.
    #[error("link closed")]
    Closed,
    /// Protocol-level failure on an open session.
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// The two halves of an open session.
pub type Link = (Box<dyn LinkSink>, Box<dyn LinkStream>);

/// Opens transport sessions.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a new session.
    async fn connect(&self) -> Result<Link, TransportError>;
    /// Human-readable transport name for logging/metrics.
    fn name(&self) -> &'static str;
}

/// Outbound half of a session.
#[async_trait]
pub trait LinkSink: Send {
    /// Write one text frame.
    async fn send(&mut self, text: String) -> Result<(), TransportError>;
    /// Close the session.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Inbound half of a session.
#[async_trait]
pub trait LinkStream: Send {
    /// Next inbound payload. `None` once the peer has closed the session.
    async fn next_frame(&mut self) -> Option<Result<Vec<u8>, TransportError>>;
}
