//! Session orchestration: the state machine, its event vocabulary, and the
//! thread that runs it.
//!
//! Everything that can happen to a session (user commands, channel events,
//! captured frames, device notices) arrives as one [`LinkEvent`] on a single
//! queue. Events carry the epoch of the session that produced them, so
//! anything raised by torn-down resources is recognised and ignored.

pub mod machine;
pub mod prompt;
pub mod runtime;
pub mod state;
pub mod turns;

#[cfg(test)]
pub mod testing;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use crate::api::ChannelEvent;
use crate::audio::level_check::LevelReport;
use crate::audio::{AudioFrame, CaptureConstraints, DeviceNotice};
use crate::config::{Config, Profile};

pub use machine::VoiceSession;
pub use runtime::{SessionController, SessionDeps};
pub use state::{Indicators, LinkState};
pub use turns::{Speaker, Turn, TurnAggregator};

/// User-facing controls.
#[derive(Clone, Debug)]
pub enum Command {
    Start { greeting: Option<String> },
    Stop,
    /// Export and reconnect with a continuation greeting.
    Checkpoint,
    SetMuted(bool),
    Say(String),
    AcousticCheck {
        window: Duration,
        cancel: Arc<AtomicBool>,
    },
    Shutdown,
}

#[derive(Debug)]
pub enum LinkEvent {
    Command(Command),
    Channel { epoch: u64, event: ChannelEvent },
    Captured { epoch: u64, frame: AudioFrame },
    Device { epoch: u64, notice: DeviceNotice },
}

/// What the front end gets to see.
#[derive(Clone, Debug, PartialEq)]
pub enum StatusUpdate {
    State {
        state: LinkState,
        indicators: Indicators,
    },
    /// Running text of the utterance in progress.
    Transcript { speaker: Speaker, text: String },
    TurnFinalized(Turn),
    Exported { title: String, turns: usize },
    LevelCheck(LevelReport),
    Diagnostic(String),
}

pub type StatusSink = Box<dyn FnMut(StatusUpdate) + Send>;

/// Snapshot of configuration a session runs with.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionSettings {
    pub api_key: String,
    pub model: String,
    pub voice: String,
    pub handshake_timeout: Duration,
    pub capture: CaptureConstraints,
    pub profile: Profile,
    pub returning_author: bool,
}

impl SessionSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            api_key: config.gemini_api_key.clone(),
            model: config.model.clone(),
            voice: config.voice_name.clone(),
            handshake_timeout: config.handshake_timeout(),
            capture: config.capture_constraints(),
            profile: config.profile.clone(),
            returning_author: config.returning_author,
        }
    }
}
