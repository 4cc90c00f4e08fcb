//! Profile types and serde default helpers.

use serde::{Deserialize, Serialize};

use crate::api::gemini_live::{DEFAULT_VOICE, GEMINI_LIVE_MODEL};

/// Persona parameters that shape the agent's interviewing style
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Persona {
    #[serde(default = "default_tone")]
    pub tone: String,
    #[serde(default = "default_focus")]
    pub focus: String,
    #[serde(default = "default_language")]
    pub language: String,
}

impl Default for Persona {
    fn default() -> Self {
        Self {
            tone: default_tone(),
            focus: default_focus(),
            language: default_language(),
        }
    }
}

/// Naming and persona snapshot read at session start
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Profile {
    #[serde(default = "default_author_name")]
    pub author_name: String,
    #[serde(default = "default_agent_name")]
    pub agent_name: String,
    #[serde(default)]
    pub persona: Persona,
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            author_name: default_author_name(),
            agent_name: default_agent_name(),
            persona: Persona::default(),
        }
    }
}

pub fn default_model() -> String {
    GEMINI_LIVE_MODEL.to_string()
}

pub fn default_voice_name() -> String {
    DEFAULT_VOICE.to_string()
}

pub fn default_handshake_timeout_secs() -> u64 {
    15
}

pub fn default_capture_block_ms() -> u32 {
    32
}

fn default_author_name() -> String {
    "Author".to_string()
}

fn default_agent_name() -> String {
    "Scribe".to_string()
}

fn default_tone() -> String {
    "warm, patient and plain-spoken".to_string()
}

fn default_focus() -> String {
    "drawing out concrete memories in the author's own words".to_string()
}

fn default_language() -> String {
    "English".to_string()
}
