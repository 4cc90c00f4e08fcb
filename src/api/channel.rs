//! Session Channel boundary: what the voice core needs from a bidirectional
//! streaming connection to the remote agent.
//!
//! The four lifecycle callbacks (open, server event, close, error) are the
//! variants of [`ChannelEvent`], so a connector cannot be handed an
//! incomplete handler set.

use crate::error::{LinkError, Result};

/// One inbound item, in arrival order.
#[derive(Clone, Debug, PartialEq)]
pub enum ServerEvent {
    /// Synthesized speech, base64 PCM16 mono.
    Audio { data: String, sample_rate: u32 },
    /// Transcript fragment of what the author said.
    InputTranscript(String),
    /// Transcript fragment of what the agent is saying.
    OutputTranscript(String),
    TurnComplete,
    /// The agent was barged in on; flush playback.
    Interrupted,
    /// Terminal error reported by the remote side.
    Error(String),
}

#[derive(Clone, Debug, PartialEq)]
pub enum ChannelEvent {
    Opened,
    Server(ServerEvent),
    Closed(Option<String>),
    Failed(String),
}

pub type ChannelEventSink = Box<dyn FnMut(ChannelEvent) + Send>;

/// Everything needed to open a channel.
#[derive(Clone, Debug, PartialEq)]
pub struct ChannelSetup {
    pub api_key: String,
    pub model: String,
    pub system_instruction: String,
    /// Prebuilt voice selector.
    pub voice: String,
}

impl ChannelSetup {
    pub fn validate(&self) -> Result<()> {
        if self.api_key.trim().is_empty() {
            return Err(LinkError::Config("NO_API_KEY:gemini".to_string()));
        }
        if self.model.trim().is_empty() {
            return Err(LinkError::Config("no model configured".to_string()));
        }
        Ok(())
    }
}

/// Opens channels. Opening is asynchronous: the handle comes back at once and
/// `ChannelEvent::Opened` arrives later through `events`.
pub trait ChannelConnector {
    fn open(
        &mut self,
        setup: ChannelSetup,
        events: ChannelEventSink,
    ) -> Result<Box<dyn SessionChannel>>;
}

/// Live handle to an open (or opening) channel.
///
/// Sends are fire-and-forget; delivery failures surface later as
/// `ChannelEvent::Failed`.
pub trait SessionChannel {
    fn send_audio(&self, payload: String);

    fn send_text(&self, text: &str);

    /// Terminate the channel. Safe to call more than once.
    fn close(&mut self);

    fn is_closed(&self) -> bool;
}
