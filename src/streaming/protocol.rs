//! Gemini Live API protocol types
//!
//! JSON envelopes exchanged over the bidirectional websocket. The shapes are
//! fixed by the provider.
//!
//! # Protocol Overview
//!
//! 1. Connect to `LIVE_API_URL?key=<apiKey>`
//! 2. Send one `setup` envelope (model, voice, temperature, system instruction)
//! 3. Send a `clientContent` turn so the assistant speaks first
//! 4. Stream microphone audio via `realtimeInput.mediaChunks`
//! 5. Receive `serverContent` with audio `inlineData` and text parts

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::audio::codec::{mime_sample_rate, EncodedChunk};
use crate::audio::OUTPUT_SAMPLE_RATE;

/// Live API websocket endpoint (the API key goes in the `key` query parameter)
pub const LIVE_API_URL: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1alpha.GenerativeService.BidiGenerateContent";

/// Model used when the config bundle does not name one
pub const DEFAULT_MODEL: &str = "models/gemini-2.5-flash-native-audio-preview-09-2025";

/// Text turn that makes the assistant open the conversation
pub const START_SESSION_TRIGGER: &str = "START_SESSION";

/// Text turn sent when the diagnostic countdown expires
pub const DIAGNOSTIC_COMPLETE_TRIGGER: &str = "DIAGNOSTIC_COMPLETE";

// ============================================================================
// Client Messages (sent TO the Live API)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupPayload {
    pub model: String,
    pub generation_config: GenerationConfig,
    pub system_instruction: Content,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    pub temperature: f32,
    pub speech_config: SpeechConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Content {
    pub parts: Vec<TextPart>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextPart {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<MediaChunk>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaChunk {
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientContent {
    pub turns: Vec<Turn>,
    pub turn_complete: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Turn {
    pub role: String,
    pub parts: Vec<TextPart>,
}

/// Messages sent from client to the Live API
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ClientMessage {
    Setup {
        setup: SetupPayload,
    },
    RealtimeInput {
        #[serde(rename = "realtimeInput")]
        realtime_input: RealtimeInput,
    },
    ClientContent {
        #[serde(rename = "clientContent")]
        client_content: ClientContent,
    },
}

impl ClientMessage {
    /// Build the one-per-connection setup envelope
    pub fn setup(model: &str, voice_name: &str, temperature: f32, system_instruction: &str) -> Self {
        Self::Setup {
            setup: SetupPayload {
                model: qualify_model(model),
                generation_config: GenerationConfig {
                    response_modalities: vec!["AUDIO".to_string()],
                    temperature,
                    speech_config: SpeechConfig {
                        voice_config: VoiceConfig {
                            prebuilt_voice_config: PrebuiltVoiceConfig {
                                voice_name: voice_name.to_string(),
                            },
                        },
                    },
                },
                system_instruction: Content {
                    parts: vec![TextPart {
                        text: system_instruction.to_string(),
                    }],
                },
            },
        }
    }

    /// Wrap an encoded microphone chunk
    pub fn audio(chunk: &EncodedChunk) -> Self {
        Self::RealtimeInput {
            realtime_input: RealtimeInput {
                media_chunks: vec![MediaChunk {
                    mime_type: chunk.mime_type.to_string(),
                    data: chunk.data.clone(),
                }],
            },
        }
    }

    /// A complete user text turn (control triggers)
    pub fn text_turn(text: &str) -> Self {
        Self::ClientContent {
            client_content: ClientContent {
                turns: vec![Turn {
                    role: "user".to_string(),
                    parts: vec![TextPart {
                        text: text.to_string(),
                    }],
                }],
                turn_complete: true,
            },
        }
    }

    pub fn is_setup(&self) -> bool {
        matches!(self, Self::Setup { .. })
    }

    pub fn is_audio(&self) -> bool {
        matches!(self, Self::RealtimeInput { .. })
    }

    /// Text of a control turn, if this is one
    pub fn turn_text(&self) -> Option<&str> {
        match self {
            Self::ClientContent { client_content } => client_content
                .turns
                .first()
                .and_then(|t| t.parts.first())
                .map(|p| p.text.as_str()),
            _ => None,
        }
    }
}

/// Add the `models/` prefix the setup envelope requires
pub fn qualify_model(model: &str) -> String {
    let model = model.trim();
    if model.is_empty() {
        DEFAULT_MODEL.to_string()
    } else if model.starts_with("models/") {
        model.to_string()
    } else {
        format!("models/{}", model)
    }
}

// ============================================================================
// Server Messages (received FROM the Live API)
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    #[serde(default)]
    pub setup_complete: Option<Value>,
    #[serde(default)]
    pub server_content: Option<ServerContent>,
    #[serde(default)]
    pub tool_call: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default)]
    pub model_turn: Option<ModelTurn>,
    #[serde(default)]
    pub turn_complete: Option<bool>,
    #[serde(default)]
    pub interrupted: Option<bool>,
    #[serde(default)]
    pub grounding_metadata: Option<GroundingMetadata>,
    #[serde(default)]
    pub user_turn: Option<ModelTurn>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModelTurn {
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub inline_data: Option<InlineData>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroundingMetadata {
    #[serde(default)]
    pub user_transcript: Option<String>,
}

/// One actionable item pulled out of a server envelope
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    SetupComplete,
    ServerAudio {
        data: String,
        sample_rate: u32,
    },
    /// Model text: transcript or the structured diagnostic payload
    ServerText(String),
    /// What the server heard the user say
    UserText(String),
    TurnComplete,
    /// Server-side barge-in
    Interrupted,
}

impl ServerMessage {
    /// Flatten the envelope into inbound items, in part order
    pub fn into_inbound(self) -> Vec<InboundMessage> {
        let mut items = Vec::new();

        if self.setup_complete.is_some() {
            items.push(InboundMessage::SetupComplete);
        }

        if self.tool_call.is_some() {
            log::debug!("Ignoring toolCall message");
        }

        let Some(content) = self.server_content else {
            return items;
        };

        if content.interrupted == Some(true) {
            items.push(InboundMessage::Interrupted);
        }

        if let Some(turn) = content.model_turn {
            for part in turn.parts {
                if let Some(inline) = part.inline_data {
                    if inline.mime_type.starts_with("audio/") {
                        let sample_rate =
                            mime_sample_rate(&inline.mime_type).unwrap_or(OUTPUT_SAMPLE_RATE);
                        items.push(InboundMessage::ServerAudio {
                            data: inline.data,
                            sample_rate,
                        });
                    } else {
                        log::debug!("Ignoring inline data of type {}", inline.mime_type);
                    }
                }
                if let Some(text) = part.text {
                    if !text.trim().is_empty() {
                        items.push(InboundMessage::ServerText(text));
                    }
                }
            }
        }

        if let Some(transcript) = content
            .grounding_metadata
            .and_then(|g| g.user_transcript)
            .filter(|t| !t.trim().is_empty())
        {
            items.push(InboundMessage::UserText(transcript));
        }

        if let Some(turn) = content.user_turn {
            for text in turn.parts.into_iter().filter_map(|p| p.text) {
                if !text.trim().is_empty() {
                    items.push(InboundMessage::UserText(text));
                }
            }
        }

        if content.turn_complete == Some(true) {
            items.push(InboundMessage::TurnComplete);
        }

        items
    }
}
