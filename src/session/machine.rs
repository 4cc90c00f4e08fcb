//! Session State Machine.
//!
//! `Standby -> Connecting -> Active -> Standby` on a normal run,
//! `Connecting/Active -> Error -> Standby` on failure. The machine owns the
//! capture pipeline, the playback scheduler and the channel for exactly one
//! session at a time, and releases all three through [`VoiceSession::teardown`]
//! on every exit path.

use std::sync::mpsc;
use std::sync::Arc;
use std::time::Instant;

use chrono::Local;
use log::{debug, error, info, warn};

use super::prompt::{build_system_instruction, greeting, greeting_kind, GreetingKind};
use super::state::{Indicators, LinkState};
use super::turns::{Speaker, Turn, TurnAggregator};
use super::{Command, LinkEvent, SessionSettings, StatusSink, StatusUpdate};
use crate::api::{ChannelConnector, ChannelEvent, ChannelSetup, ServerEvent, SessionChannel};
use crate::audio::level_check::run_level_check;
use crate::audio::{
    decode_from_wire, AudioDevices, CapturePipeline, DeviceNotice, DeviceNotifier,
    PlaybackScheduler, WIRE_CHANNELS,
};
use crate::error::{LinkError, Result};
use crate::manuscript::{export_session, ManuscriptStore};

pub type FirstActiveHook = Box<dyn FnMut() + Send>;

pub struct VoiceSession {
    settings: SessionSettings,
    devices: Box<dyn AudioDevices + Send>,
    connector: Box<dyn ChannelConnector + Send>,
    store: Box<dyn ManuscriptStore + Send>,
    events: mpsc::Sender<LinkEvent>,
    status: StatusSink,
    on_first_active: Option<FirstActiveHook>,

    state: LinkState,
    epoch: u64,
    capture: Option<CapturePipeline>,
    playback: Option<PlaybackScheduler>,
    channel: Option<Box<dyn SessionChannel>>,
    turns: TurnAggregator,
    connect_deadline: Option<Instant>,
    pending_greeting: Option<String>,
    muted: bool,
    thinking: bool,
    frames_sent: u64,
}

impl VoiceSession {
    /// `events` must feed the queue this session is driven from.
    pub fn new(
        settings: SessionSettings,
        devices: Box<dyn AudioDevices + Send>,
        connector: Box<dyn ChannelConnector + Send>,
        store: Box<dyn ManuscriptStore + Send>,
        events: mpsc::Sender<LinkEvent>,
        status: StatusSink,
    ) -> Self {
        Self {
            settings,
            devices,
            connector,
            store,
            events,
            status,
            on_first_active: None,
            state: LinkState::Standby,
            epoch: 0,
            capture: None,
            playback: None,
            channel: None,
            turns: TurnAggregator::new(),
            connect_deadline: None,
            pending_greeting: None,
            muted: false,
            thinking: false,
            frames_sent: 0,
        }
    }

    /// Called once, the first time a first-time author's session goes active.
    pub fn on_first_active(mut self, hook: FirstActiveHook) -> Self {
        self.on_first_active = Some(hook);
        self
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn indicators(&self) -> Indicators {
        Indicators {
            listening: self.state == LinkState::Active
                && !self.muted
                && self.capture.as_ref().is_some_and(|c| c.is_running()),
            thinking: self.state == LinkState::Active && self.thinking,
            muted: self.muted,
        }
    }

    /// Everything said so far, open utterances included.
    pub fn history(&self) -> Vec<Turn> {
        self.turns.export_history(true)
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Dispatch one event. Returns `false` once a shutdown was handled.
    pub fn handle_event(&mut self, event: LinkEvent) -> bool {
        match event {
            LinkEvent::Command(command) => return self.handle_command(command),
            LinkEvent::Channel { epoch, event } => {
                if self.is_current(epoch) {
                    self.on_channel_event(event);
                } else {
                    debug!("[Session] Ignoring stale channel event {:?}", event);
                }
            }
            LinkEvent::Captured { epoch, frame } => {
                if !self.is_current(epoch) || self.state != LinkState::Active || self.muted {
                    return true;
                }
                if let Some(channel) = self.channel.as_ref() {
                    channel.send_audio(frame.encode());
                    self.frames_sent += 1;
                }
            }
            LinkEvent::Device { epoch, notice } => {
                if self.is_current(epoch) {
                    self.on_device_notice(notice);
                }
            }
        }
        true
    }

    /// Enforce the handshake bound.
    pub fn tick(&mut self, now: Instant) {
        if self.state != LinkState::Connecting {
            return;
        }
        if self.connect_deadline.is_some_and(|deadline| now >= deadline) {
            let err = LinkError::HandshakeTimeout(self.settings.handshake_timeout);
            error!("[Session] {}", err);
            self.fail(&err);
        }
    }

    fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Start { greeting } => {
                let _ = self.start_session(greeting);
            }
            Command::Stop => self.stop_session(),
            Command::Checkpoint => self.checkpoint(),
            Command::SetMuted(muted) => self.set_muted(muted),
            Command::Say(text) => self.say(&text),
            Command::AcousticCheck { window, cancel } => {
                if self.state != LinkState::Standby {
                    self.diagnostic("Stop the session before running an acoustic check");
                    return true;
                }
                match run_level_check(
                    &mut *self.devices,
                    self.settings.capture.clone(),
                    window,
                    &cancel,
                ) {
                    Ok(report) => self.emit(StatusUpdate::LevelCheck(report)),
                    Err(e) => {
                        warn!("[Session] Acoustic check failed: {}", e);
                        self.diagnostic(&e.diagnostic());
                    }
                }
            }
            Command::Shutdown => {
                self.stop_session();
                return false;
            }
        }
        true
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Acquire devices and open the channel. A no-op unless in Standby.
    /// On failure every acquired resource is released and the machine is back
    /// in Standby before this returns.
    pub fn start_session(&mut self, greeting_override: Option<String>) -> Result<()> {
        if self.state != LinkState::Standby {
            debug!("[Session] Start ignored in state {}", self.state);
            return Ok(());
        }
        self.set_state(LinkState::Connecting);
        info!("[Session] Connecting (epoch {})", self.epoch);

        match self.acquire_and_open(greeting_override) {
            Ok(()) => {
                self.connect_deadline = Some(Instant::now() + self.settings.handshake_timeout);
                Ok(())
            }
            Err(e) => {
                error!("[Session] Start failed: {}", e);
                self.fail(&e);
                Err(e)
            }
        }
    }

    fn acquire_and_open(&mut self, greeting_override: Option<String>) -> Result<()> {
        let notifier = self.device_notifier();
        self.capture = Some(CapturePipeline::acquire(
            &mut *self.devices,
            self.settings.capture.clone(),
            notifier.clone(),
        )?);
        self.playback = Some(PlaybackScheduler::acquire(&mut *self.devices, notifier)?);

        let profile = &self.settings.profile;
        let setup = ChannelSetup {
            api_key: self.settings.api_key.clone(),
            model: self.settings.model.clone(),
            system_instruction: build_system_instruction(profile),
            voice: self.settings.voice.clone(),
        };
        self.pending_greeting = Some(greeting_override.unwrap_or_else(|| {
            greeting(greeting_kind(self.settings.returning_author), profile)
        }));

        let events = self.events.clone();
        let epoch = self.epoch;
        let channel = self.connector.open(
            setup,
            Box::new(move |event| {
                let _ = events.send(LinkEvent::Channel { epoch, event });
            }),
        )?;
        self.channel = Some(channel);
        Ok(())
    }

    /// Export first, then release everything and return to Standby.
    pub fn stop_session(&mut self) {
        if self.state != LinkState::Standby {
            info!("[Session] Stopping from {}", self.state);
        }
        self.export_pending();
        self.teardown();
        self.set_state(LinkState::Standby);
    }

    pub fn checkpoint(&mut self) {
        if self.state != LinkState::Active {
            debug!("[Session] Checkpoint ignored in state {}", self.state);
            return;
        }
        info!("[Session] Checkpoint");
        self.stop_session();
        let text = greeting(GreetingKind::Continuation, &self.settings.profile);
        let _ = self.start_session(Some(text));
    }

    pub fn set_muted(&mut self, muted: bool) {
        if self.muted == muted {
            return;
        }
        self.muted = muted;
        info!("[Session] Microphone {}", if muted { "muted" } else { "live" });
        self.publish_state();
    }

    pub fn say(&mut self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        match (self.state, self.channel.as_ref()) {
            (LinkState::Active, Some(channel)) => channel.send_text(text),
            _ => self.diagnostic("Not connected"),
        }
    }

    /// Release channel, capture and playback. Idempotent; events raised by
    /// the released resources are stale from here on.
    fn teardown(&mut self) {
        self.epoch += 1;
        if let Some(mut channel) = self.channel.take() {
            channel.close();
        }
        if let Some(mut capture) = self.capture.take() {
            capture.stop();
        }
        if let Some(mut playback) = self.playback.take() {
            playback.close();
        }
        self.connect_deadline = None;
        self.pending_greeting = None;
        self.thinking = false;
    }

    /// Failure path shared by start errors, timeouts, channel errors and
    /// device faults.
    fn fail(&mut self, err: &LinkError) {
        self.set_state(LinkState::Error);
        self.export_pending();
        self.teardown();
        self.diagnostic(&err.diagnostic());
        self.set_state(LinkState::Standby);
    }

    fn export_pending(&mut self) {
        let history = self.turns.export_history(true);
        self.turns = TurnAggregator::new();
        if history.is_empty() {
            return;
        }
        match export_session(
            &mut *self.store,
            &history,
            &self.settings.profile,
            Local::now(),
        ) {
            Ok(Some(title)) => {
                info!("[Session] Exported {} turn(s) as \"{}\"", history.len(), title);
                self.emit(StatusUpdate::Exported {
                    title,
                    turns: history.len(),
                });
            }
            Ok(None) => {}
            Err(e) => {
                error!("[Session] Export failed: {}", e);
                self.diagnostic(&e.diagnostic());
            }
        }
    }

    // ------------------------------------------------------------------
    // Event handling
    // ------------------------------------------------------------------

    fn on_channel_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Opened => self.on_open(),
            ChannelEvent::Server(server) => {
                if self.state == LinkState::Active {
                    self.on_server_event(server);
                } else if let ServerEvent::Error(msg) = server {
                    self.fail(&LinkError::Channel(msg));
                } else {
                    debug!("[Session] Server event before open: {:?}", server);
                }
            }
            ChannelEvent::Closed(reason) => {
                let reason = reason.unwrap_or_else(|| "closed by remote".to_string());
                if self.state == LinkState::Connecting {
                    self.fail(&LinkError::Channel(reason));
                } else {
                    info!("[Session] Remote closed: {}", reason);
                    self.stop_session();
                    self.diagnostic("Session ended by the remote side");
                }
            }
            ChannelEvent::Failed(msg) => {
                error!("[Session] Channel failed: {}", msg);
                self.fail(&LinkError::Channel(msg));
            }
        }
    }

    fn on_open(&mut self) {
        if self.state != LinkState::Connecting {
            return;
        }
        self.connect_deadline = None;
        self.set_state(LinkState::Active);
        info!("[Session] Active");

        if let (Some(channel), Some(text)) = (self.channel.as_ref(), self.pending_greeting.take())
        {
            channel.send_text(&text);
        }

        let events = self.events.clone();
        let epoch = self.epoch;
        let started = match self.capture.as_mut() {
            Some(capture) => capture.start(Box::new(move |frame| {
                let _ = events.send(LinkEvent::Captured { epoch, frame });
            })),
            None => Ok(()),
        };
        if let Err(e) = started {
            error!("[Session] Capture failed to start: {}", e);
            self.fail(&e);
            return;
        }
        self.publish_state();

        if !self.settings.returning_author {
            self.settings.returning_author = true;
            if let Some(hook) = self.on_first_active.as_mut() {
                hook();
            }
        }
    }

    fn on_server_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::Audio { data, sample_rate } => {
                let decoded = match decode_from_wire(&data, sample_rate, WIRE_CHANNELS) {
                    Ok(decoded) => decoded,
                    Err(e) => {
                        warn!("[Session] Dropping audio chunk: {}", e);
                        return;
                    }
                };
                debug!(
                    "[Session] Agent audio: {:.3}s at {} Hz",
                    decoded.duration_secs(),
                    decoded.sample_rate
                );
                self.set_thinking(false);
                if let Some(playback) = self.playback.as_mut() {
                    let rate = decoded.sample_rate;
                    let buffer = playback.prepare(decoded.into_mono(), rate);
                    playback.enqueue(buffer);
                }
            }
            ServerEvent::InputTranscript(text) => {
                self.turns.push(Speaker::Author, text);
                self.set_thinking(true);
                self.publish_transcript(Speaker::Author);
            }
            ServerEvent::OutputTranscript(text) => {
                self.turns.push(Speaker::Agent, text);
                self.publish_transcript(Speaker::Agent);
            }
            ServerEvent::TurnComplete => {
                for turn in self.turns.complete_turn() {
                    self.emit(StatusUpdate::TurnFinalized(turn));
                }
                self.set_thinking(false);
            }
            ServerEvent::Interrupted => {
                if let Some(playback) = self.playback.as_mut() {
                    playback.interrupt();
                }
                self.set_thinking(false);
            }
            ServerEvent::Error(msg) => {
                error!("[Session] Remote error: {}", msg);
                self.fail(&LinkError::Channel(msg));
            }
        }
    }

    fn on_device_notice(&mut self, notice: DeviceNotice) {
        match notice {
            DeviceNotice::VoiceFinished(voice) => {
                if let Some(playback) = self.playback.as_mut() {
                    playback.on_finished(voice);
                }
            }
            DeviceNotice::Fault(msg) => {
                if self.state == LinkState::Standby {
                    return;
                }
                error!("[Session] Audio device fault: {}", msg);
                self.fail(&LinkError::DeviceUnavailable(msg));
            }
        }
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn is_current(&self, epoch: u64) -> bool {
        epoch == self.epoch && self.state != LinkState::Standby
    }

    fn device_notifier(&self) -> DeviceNotifier {
        let events = self.events.clone();
        let epoch = self.epoch;
        Arc::new(move |notice| {
            let _ = events.send(LinkEvent::Device { epoch, notice });
        })
    }

    fn set_state(&mut self, state: LinkState) {
        if self.state == state {
            return;
        }
        self.state = state;
        self.publish_state();
    }

    fn set_thinking(&mut self, thinking: bool) {
        if self.thinking != thinking {
            self.thinking = thinking;
            self.publish_state();
        }
    }

    fn publish_state(&mut self) {
        let update = StatusUpdate::State {
            state: self.state,
            indicators: self.indicators(),
        };
        self.emit(update);
    }

    fn publish_transcript(&mut self, speaker: Speaker) {
        let text = self.turns.pending(speaker).trim().to_string();
        if !text.is_empty() {
            self.emit(StatusUpdate::Transcript { speaker, text });
        }
    }

    fn diagnostic(&mut self, text: &str) {
        self.emit(StatusUpdate::Diagnostic(text.to_string()));
    }

    fn emit(&mut self, update: StatusUpdate) {
        (self.status)(update);
    }
}

impl Drop for VoiceSession {
    fn drop(&mut self) {
        if self.state != LinkState::Standby {
            self.stop_session();
        }
    }
}
