//! Gemini Live websocket client
//!
//! Owns one websocket per connection attempt and turns everything that
//! happens on it into `LinkEvent`s for the session loop.
//!
//! # Connection Flow
//!
//! 1. `LiveConnector::connect()` - handshake (10 s timeout), split socket
//! 2. Writer task drains an unbounded queue, so `send()` never blocks the loop
//! 3. Reader task parses text and binary frames into `ServerMessage`s
//! 4. `close()` sends a normal close frame and stops the reader
//!
//! The connector does not retry. Reconnection is the session's decision.

use std::sync::{Arc, Once};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::{
    connect_async_with_config,
    tungstenite::{
        client::IntoClientRequest,
        protocol::{frame::coding::CloseCode, CloseFrame},
        Message,
    },
};

use super::protocol::{ClientMessage, ServerMessage};
use crate::error::{CoachError, Result};

/// Connection timeout for the websocket handshake
const CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Close reason sent when the user ends the session
const USER_CLOSE_REASON: &str = "User stopped session";

/// Everything the session needs to know about a link
#[derive(Debug, Clone)]
pub enum LinkEvent {
    Message(ServerMessage),
    /// Frame that did not parse; already logged
    Malformed(String),
    /// Socket is gone. `clean` is true for a close frame, false for an error.
    Closed { reason: String, clean: bool },
}

/// Receives link events; called from the link's reader task
pub type LinkEventSink = Arc<dyn Fn(LinkEvent) + Send + Sync>;

/// Opens links to the Live API
#[async_trait]
pub trait LiveConnector: Send + Sync {
    async fn connect(
        &self,
        endpoint: &str,
        api_key: &str,
        events: LinkEventSink,
    ) -> Result<Box<dyn LiveLink>>;
}

/// An open link. Sends are queued, never awaited.
pub trait LiveLink: Send {
    fn send(&mut self, message: &ClientMessage) -> Result<()>;
    /// Close with a normal close frame. Idempotent. No `Closed` event follows.
    fn close(&mut self);
}

static CRYPTO_PROVIDER: Once = Once::new();

/// Production connector over tokio-tungstenite
#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

impl WsConnector {
    pub fn new() -> Self {
        CRYPTO_PROVIDER.call_once(|| {
            // Another component may already have picked a provider
            let _ = rustls::crypto::ring::default_provider().install_default();
        });
        Self
    }
}

#[async_trait]
impl LiveConnector for WsConnector {
    async fn connect(
        &self,
        endpoint: &str,
        api_key: &str,
        events: LinkEventSink,
    ) -> Result<Box<dyn LiveLink>> {
        let url = format!("{}?key={}", endpoint, api_key);
        let request = url
            .into_client_request()
            .map_err(|e| CoachError::ConnectionFailed(e.to_string()))?;

        log::info!("Connecting to Live API...");

        let (ws_stream, _response) = timeout(
            CONNECTION_TIMEOUT,
            connect_async_with_config(request, None, false),
        )
        .await
        .map_err(|_| CoachError::ConnectionFailed("Connection timeout".to_string()))?
        .map_err(|e| CoachError::ConnectionFailed(e.to_string()))?;

        log::info!("WebSocket connected");

        let (mut write, mut read) = ws_stream.split();
        let (outgoing_tx, mut outgoing_rx) = mpsc::unbounded_channel::<Message>();

        let writer_task = tokio::spawn(async move {
            while let Some(message) = outgoing_rx.recv().await {
                let closing = matches!(message, Message::Close(_));
                if let Err(e) = write.send(message).await {
                    log::warn!("WebSocket send failed: {}", e);
                    break;
                }
                if closing {
                    break;
                }
            }
            log::debug!("Writer task exiting");
        });

        let reader_task = tokio::spawn(async move {
            let closed = loop {
                let text = match read.next().await {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                        Ok(text) => text,
                        Err(e) => {
                            log::warn!("Binary frame is not UTF-8: {}", e);
                            events(LinkEvent::Malformed(e.to_string()));
                            continue;
                        }
                    },
                    Some(Ok(Message::Close(frame))) => {
                        let reason = frame
                            .map(|f| format!("{} {}", u16::from(f.code), f.reason))
                            .unwrap_or_else(|| "closed by server".to_string());
                        log::info!("WebSocket closed by server: {}", reason);
                        break LinkEvent::Closed {
                            reason,
                            clean: true,
                        };
                    }
                    Some(Ok(_)) => continue, // ping/pong
                    Some(Err(e)) => {
                        log::warn!("WebSocket error: {}", e);
                        break LinkEvent::Closed {
                            reason: e.to_string(),
                            clean: false,
                        };
                    }
                    None => {
                        break LinkEvent::Closed {
                            reason: "stream ended".to_string(),
                            clean: false,
                        }
                    }
                };

                match serde_json::from_str::<ServerMessage>(&text) {
                    Ok(message) => events(LinkEvent::Message(message)),
                    Err(e) => {
                        log::warn!("Failed to parse message: {}", e);
                        events(LinkEvent::Malformed(e.to_string()));
                    }
                }
            };
            events(closed);
            log::debug!("Reader task exiting");
        });

        Ok(Box::new(WsLink {
            outgoing_tx,
            reader_task,
            writer_task,
            closed: false,
        }))
    }
}

/// One open websocket
struct WsLink {
    outgoing_tx: mpsc::UnboundedSender<Message>,
    reader_task: tokio::task::JoinHandle<()>,
    writer_task: tokio::task::JoinHandle<()>,
    closed: bool,
}

impl LiveLink for WsLink {
    fn send(&mut self, message: &ClientMessage) -> Result<()> {
        if self.closed {
            return Err(CoachError::ConnectionFailed("link is closed".to_string()));
        }
        let json = serde_json::to_string(message)
            .map_err(|e| CoachError::ConnectionFailed(e.to_string()))?;
        self.outgoing_tx
            .send(Message::Text(json))
            .map_err(|_| CoachError::ConnectionFailed("writer task has exited".to_string()))
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        log::info!("Closing Live API connection");

        // Stop the reader first so the requested close produces no event
        self.reader_task.abort();
        let _ = self.outgoing_tx.send(Message::Close(Some(CloseFrame {
            code: CloseCode::Normal,
            reason: USER_CLOSE_REASON.into(),
        })));
    }
}

impl Drop for WsLink {
    fn drop(&mut self) {
        self.reader_task.abort();
        if !self.closed {
            self.writer_task.abort();
        }
    }
}
