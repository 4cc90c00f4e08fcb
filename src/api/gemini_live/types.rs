//! Types for the Gemini Live bidirectional channel

use serde::Deserialize;

/// Native audio model with input/output transcription support
pub const GEMINI_LIVE_MODEL: &str = "gemini-2.5-flash-native-audio-preview-12-2025";

/// Default prebuilt voice
pub const DEFAULT_VOICE: &str = "Aoede";

pub const LIVE_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Messages queued from the session thread to the socket worker
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// Base64 PCM16 at 16 kHz
    Audio(String),
    Text(String),
    Close,
}

// Inbound wire shapes. Only the fields the voice core reads are modelled.

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ServerMessage {
    pub setup_complete: Option<serde_json::Value>,
    pub server_content: Option<ServerContent>,
    pub error: Option<serde_json::Value>,
    pub go_away: Option<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ServerContent {
    pub model_turn: Option<ModelTurn>,
    pub input_transcription: Option<Transcription>,
    pub output_transcription: Option<Transcription>,
    #[serde(default)]
    pub turn_complete: bool,
    #[serde(default)]
    pub interrupted: bool,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ModelTurn {
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Part {
    pub inline_data: Option<InlineData>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct InlineData {
    pub mime_type: Option<String>,
    pub data: String,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct Transcription {
    pub text: Option<String>,
}
