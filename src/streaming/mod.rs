//! Live API transport
//!
//! # Architecture
//!
//! ```text
//! Capture frames ──▶ codec::encode ──▶ ClientMessage::audio ──▶ LiveLink (writer task)
//!                                                                     │
//!                                                                 WebSocket
//!                                                                     │
//! PlaybackScheduler ◀── ServerAudio ◀── into_inbound ◀── LinkEvent (reader task)
//!                         ServerText ──▶ inbound::classify_text ──▶ transcript | report
//! ```
//!
//! # Reconnection
//!
//! Links never retry on their own. The session walks `RECONNECT_DELAYS`
//! after an unrequested close and ends with `ConnectionLost` when the
//! ladder runs out.

pub mod inbound;
pub mod protocol;
pub mod realtime_client;
pub mod reconnect;

pub use inbound::{classify_text, DiagnosticPayload, Scores, TextPayload};
pub use protocol::{
    ClientMessage, InboundMessage, ServerMessage, DEFAULT_MODEL, DIAGNOSTIC_COMPLETE_TRIGGER,
    LIVE_API_URL, START_SESSION_TRIGGER,
};
pub use realtime_client::{LinkEvent, LinkEventSink, LiveConnector, LiveLink, WsConnector};
pub use reconnect::{ConnectionPhase, ConnectionState, ReconnectPolicy, RECONNECT_DELAYS};
