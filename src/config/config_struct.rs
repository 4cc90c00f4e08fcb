//! Config struct definition.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::types::{
    default_capture_block_ms, default_handshake_timeout_secs, default_model, default_voice_name,
    Profile,
};
use crate::audio::CaptureConstraints;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub gemini_api_key: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Prebuilt voice the agent speaks with
    #[serde(default = "default_voice_name")]
    pub voice_name: String,
    #[serde(default = "default_handshake_timeout_secs")]
    pub handshake_timeout_secs: u64,
    #[serde(default = "default_capture_block_ms")]
    pub capture_block_ms: u32,

    // --- Device selection (substring of the device name) ---
    #[serde(default)]
    pub input_device: Option<String>,
    #[serde(default)]
    pub output_device: Option<String>,

    #[serde(default)]
    pub manuscript_path: Option<PathBuf>,
    #[serde(default)]
    pub profile: Profile,
    /// Set once the author has completed a first session
    #[serde(default)]
    pub returning_author: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gemini_api_key: String::new(),
            model: default_model(),
            voice_name: default_voice_name(),
            handshake_timeout_secs: default_handshake_timeout_secs(),
            capture_block_ms: default_capture_block_ms(),
            input_device: None,
            output_device: None,
            manuscript_path: None,
            profile: Profile::default(),
            returning_author: false,
        }
    }
}

impl Config {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs.max(1))
    }

    pub fn capture_constraints(&self) -> CaptureConstraints {
        let mut constraints = CaptureConstraints::voice(self.capture_block_ms);
        constraints.device_name = self.input_device.clone();
        constraints
    }
}
