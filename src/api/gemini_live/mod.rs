//! Gemini Live voice channel
//!
//! Bidirectional WebSocket session with Gemini's native audio model:
//! microphone PCM goes up as realtime input, synthesized speech and
//! transcripts of both sides come back down. Each open channel owns one
//! worker thread and one socket.

pub mod types;
pub mod websocket;
pub mod worker;

pub use types::{DEFAULT_VOICE, GEMINI_LIVE_MODEL};
pub use worker::{LiveChannel, LiveConnector};
