//! ---
//! rover_section: "02-messaging-wire-model"
//! rover_subsection: "module"
//! rover_type: "source"
//! rover_scope: "code"
//! rover_description: "Transport implementations for the rover link."
//! rover_version: "v0.0.0-prealpha"
//! rover_owner: "tbd"
//! ---
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};
use url::Url;

use crate::{Connector, Link, LinkSink, LinkStream, TransportError};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens WebSocket sessions against the device endpoint.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: Url,
}

impl WebSocketConnector {
    pub fn new(url: Url) -> Self {
        Self { url }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self) -> Result<Link, TransportError> {
        let (socket, response) = connect_async(self.url.as_str())
            .await
            .map_err(|err| TransportError::Connect(err.to_string()))?;
        info!(url = %self.url, status = %response.status(), "websocket session opened");
        let (sink, stream) = socket.split();
        Ok((
            Box::new(WebSocketSink { inner: sink }),
            Box::new(WebSocketFrames { inner: stream }),
        ))
    }

    fn name(&self) -> &'static str {
        "websocket"
    }
}

struct WebSocketSink {
    inner: SplitSink<Socket, WsMessage>,
}

#[async_trait]
impl LinkSink for WebSocketSink {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        self.inner
            .send(WsMessage::Text(text))
            .await
            .map_err(|err| TransportError::Protocol(err.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.inner
            .close()
            .await
            .map_err(|err| TransportError::Protocol(err.to_string()))
    }
}

struct WebSocketFrames {
    inner: SplitStream<Socket>,
}

#[async_trait]
impl LinkStream for WebSocketFrames {
    async fn next_frame(&mut self) -> Option<Result<Vec<u8>, TransportError>> {
        loop {
            match self.inner.next().await? {
                Ok(WsMessage::Text(text)) => return Some(Ok(text.into_bytes())),
                Ok(WsMessage::Binary(bytes)) => return Some(Ok(bytes)),
                Ok(WsMessage::Close(frame)) => {
                    debug!(?frame, "peer closed websocket");
                    return None;
                }
                Ok(_) => continue,
                Err(err) => return Some(Err(TransportError::Protocol(err.to_string()))),
            }
        }
    }
}
