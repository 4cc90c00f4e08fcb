//! Acoustic Link: a real-time duplex voice session with a remote
//! conversational agent.
//!
//! Microphone audio is captured, encoded and streamed up a Gemini Live
//! channel; synthesized speech comes back down and is played gaplessly, with
//! barge-in. Transcripts of both sides are aggregated into turns and exported
//! to the manuscript when a session ends.

pub mod api;
pub mod audio;
pub mod config;
pub mod error;
pub mod manuscript;
pub mod session;

pub use error::{LinkError, Result};
