//! In-memory stand-ins for audio hardware, the remote channel and the
//! manuscript store. Each fake is a cheap clone around shared state so a test
//! can keep a handle while the session owns another.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};

use super::machine::VoiceSession;
use super::state::LinkState;
use super::{LinkEvent, SessionSettings, StatusUpdate};
use crate::api::{ChannelConnector, ChannelEvent, ChannelEventSink, ChannelSetup, SessionChannel};
use crate::audio::{
    AudioDevices, CaptureConstraints, DeviceNotice, DeviceNotifier, InputDevice, OutputDevice,
    SampleSink, VoiceId,
};
use crate::config::Profile;
use crate::error::{LinkError, Result};
use crate::manuscript::ManuscriptStore;

// ----------------------------------------------------------------------
// Audio devices
// ----------------------------------------------------------------------

#[derive(Default)]
struct DeviceState {
    clock: f64,
    live: usize,
    deny_input: bool,
    deny_output: bool,
    inputs_opened: usize,
    input_active: bool,
    input_sink: Option<SampleSink>,
    input_notifier: Option<DeviceNotifier>,
    output_notifier: Option<DeviceNotifier>,
    script: Vec<f32>,
    played: Vec<(VoiceId, f64, usize)>,
    stopped: Vec<VoiceId>,
}

#[derive(Clone, Default)]
pub struct FakeDevices {
    state: Arc<Mutex<DeviceState>>,
}

impl FakeDevices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deny_input(&mut self) {
        self.state.lock().unwrap().deny_input = true;
    }

    pub fn deny_output(&mut self) {
        self.state.lock().unwrap().deny_output = true;
    }

    /// Samples delivered synchronously the moment capture starts.
    pub fn script_input(&mut self, samples: Vec<f32>) {
        self.state.lock().unwrap().script = samples;
    }

    /// Push samples through a running input as its callback would.
    pub fn feed_input(&self, samples: &[f32]) {
        let sink = self.state.lock().unwrap().input_sink.take();
        if let Some(mut sink) = sink {
            sink(samples);
            let mut state = self.state.lock().unwrap();
            if state.input_active && state.input_sink.is_none() {
                state.input_sink = Some(sink);
            }
        }
    }

    pub fn fault_input(&self, message: &str) {
        let notifier = self.state.lock().unwrap().input_notifier.clone();
        if let Some(notify) = notifier {
            notify(DeviceNotice::Fault(message.to_string()));
        }
    }

    /// Report a voice as played to its end.
    pub fn finish_voice(&self, voice: VoiceId) {
        let notifier = self.state.lock().unwrap().output_notifier.clone();
        if let Some(notify) = notifier {
            notify(DeviceNotice::VoiceFinished(voice));
        }
    }

    pub fn set_clock(&mut self, secs: f64) {
        self.state.lock().unwrap().clock = secs;
    }

    /// Device handles opened and not yet released.
    pub fn live_handles(&self) -> usize {
        self.state.lock().unwrap().live
    }

    pub fn inputs_opened(&self) -> usize {
        self.state.lock().unwrap().inputs_opened
    }

    /// `(voice, start_at, samples)` for every `play` call.
    pub fn played(&self) -> Vec<(VoiceId, f64, usize)> {
        self.state.lock().unwrap().played.clone()
    }

    pub fn stopped_voices(&self) -> Vec<VoiceId> {
        self.state.lock().unwrap().stopped.clone()
    }
}

impl AudioDevices for FakeDevices {
    fn open_input(
        &mut self,
        _constraints: &CaptureConstraints,
        notifier: DeviceNotifier,
    ) -> Result<Box<dyn InputDevice>> {
        let mut state = self.state.lock().unwrap();
        if state.deny_input {
            return Err(LinkError::DeviceUnavailable("permission denied".into()));
        }
        state.live += 1;
        state.inputs_opened += 1;
        state.input_notifier = Some(notifier);
        Ok(Box::new(FakeInput {
            state: self.state.clone(),
            released: false,
        }))
    }

    fn open_output(&mut self, notifier: DeviceNotifier) -> Result<Box<dyn OutputDevice>> {
        let mut state = self.state.lock().unwrap();
        if state.deny_output {
            return Err(LinkError::DeviceUnavailable("no output device".into()));
        }
        state.live += 1;
        state.output_notifier = Some(notifier);
        Ok(Box::new(FakeOutput {
            state: self.state.clone(),
            released: false,
        }))
    }
}

struct FakeInput {
    state: Arc<Mutex<DeviceState>>,
    released: bool,
}

impl InputDevice for FakeInput {
    fn start(&mut self, mut sink: SampleSink) -> Result<()> {
        let script = std::mem::take(&mut self.state.lock().unwrap().script);
        if !script.is_empty() {
            sink(&script);
        }
        let mut state = self.state.lock().unwrap();
        state.input_active = true;
        state.input_sink = Some(sink);
        Ok(())
    }

    fn stop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        let mut state = self.state.lock().unwrap();
        state.live -= 1;
        state.input_active = false;
        state.input_sink = None;
        state.input_notifier = None;
    }
}

impl Drop for FakeInput {
    fn drop(&mut self) {
        self.stop();
    }
}

struct FakeOutput {
    state: Arc<Mutex<DeviceState>>,
    released: bool,
}

impl OutputDevice for FakeOutput {
    fn now(&self) -> f64 {
        self.state.lock().unwrap().clock
    }

    fn play(&mut self, voice: VoiceId, samples: Arc<[f32]>, _sample_rate: u32, start_at: f64) {
        self.state
            .lock()
            .unwrap()
            .played
            .push((voice, start_at, samples.len()));
    }

    fn stop_voice(&mut self, voice: VoiceId) {
        self.state.lock().unwrap().stopped.push(voice);
    }

    fn close(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        let mut state = self.state.lock().unwrap();
        state.live -= 1;
        state.output_notifier = None;
    }
}

impl Drop for FakeOutput {
    fn drop(&mut self) {
        self.close();
    }
}

// ----------------------------------------------------------------------
// Channel
// ----------------------------------------------------------------------

#[derive(Default)]
struct ChannelState {
    refuse: bool,
    opens: usize,
    live: usize,
    closes: usize,
    setups: Vec<ChannelSetup>,
    sink: Option<ChannelEventSink>,
    audio: Vec<String>,
    text: Vec<String>,
}

#[derive(Clone, Default)]
pub struct FakeConnector {
    state: Arc<Mutex<ChannelState>>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refuse_open(&mut self) {
        self.state.lock().unwrap().refuse = true;
    }

    /// Deliver an event through the most recently opened channel's sink,
    /// whether or not that channel has since been closed.
    pub fn emit(&self, event: ChannelEvent) {
        let sink = self.state.lock().unwrap().sink.take();
        if let Some(mut sink) = sink {
            sink(event);
            let mut state = self.state.lock().unwrap();
            if state.sink.is_none() {
                state.sink = Some(sink);
            }
        }
    }

    pub fn opens(&self) -> usize {
        self.state.lock().unwrap().opens
    }

    pub fn live_channels(&self) -> usize {
        self.state.lock().unwrap().live
    }

    pub fn closes(&self) -> usize {
        self.state.lock().unwrap().closes
    }

    pub fn last_setup(&self) -> Option<ChannelSetup> {
        self.state.lock().unwrap().setups.last().cloned()
    }

    pub fn sent_audio(&self) -> Vec<String> {
        self.state.lock().unwrap().audio.clone()
    }

    pub fn sent_text(&self) -> Vec<String> {
        self.state.lock().unwrap().text.clone()
    }
}

impl ChannelConnector for FakeConnector {
    fn open(
        &mut self,
        setup: ChannelSetup,
        events: ChannelEventSink,
    ) -> Result<Box<dyn SessionChannel>> {
        let mut state = self.state.lock().unwrap();
        if state.refuse {
            return Err(LinkError::Channel("connection refused".into()));
        }
        state.opens += 1;
        state.live += 1;
        state.setups.push(setup);
        state.sink = Some(events);
        Ok(Box::new(FakeChannel {
            state: self.state.clone(),
            closed: false,
        }))
    }
}

struct FakeChannel {
    state: Arc<Mutex<ChannelState>>,
    closed: bool,
}

impl SessionChannel for FakeChannel {
    fn send_audio(&self, payload: String) {
        if !self.closed {
            self.state.lock().unwrap().audio.push(payload);
        }
    }

    fn send_text(&self, text: &str) {
        if !self.closed {
            self.state.lock().unwrap().text.push(text.to_string());
        }
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let mut state = self.state.lock().unwrap();
        state.live -= 1;
        state.closes += 1;
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for FakeChannel {
    fn drop(&mut self) {
        self.close();
    }
}

// ----------------------------------------------------------------------
// Manuscript store
// ----------------------------------------------------------------------

#[derive(Default)]
struct StoreState {
    entries: Vec<(String, String)>,
    observed: Option<(FakeDevices, FakeConnector)>,
    live_at_export: Vec<(usize, usize)>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<StoreState>>,
}

impl MemoryStore {
    pub fn entries(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().entries.clone()
    }

    /// Record live device and channel counts at each append.
    pub fn observe(&self, devices: FakeDevices, connector: FakeConnector) {
        self.state.lock().unwrap().observed = Some((devices, connector));
    }

    pub fn live_at_export(&self) -> Vec<(usize, usize)> {
        self.state.lock().unwrap().live_at_export.clone()
    }
}

impl ManuscriptStore for MemoryStore {
    fn append_entry(&mut self, title: &str, body: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some((devices, connector)) = state.observed.as_ref() {
            let live = (devices.live_handles(), connector.live_channels());
            state.live_at_export.push(live);
        }
        state.entries.push((title.to_string(), body.to_string()));
        Ok(())
    }
}

// ----------------------------------------------------------------------
// Session harness
// ----------------------------------------------------------------------

/// A session wired to fakes and driven synchronously from the test thread.
pub struct Harness {
    pub session: VoiceSession,
    pub devices: FakeDevices,
    pub connector: FakeConnector,
    pub store: MemoryStore,
    rx: mpsc::Receiver<LinkEvent>,
    statuses: Arc<Mutex<Vec<StatusUpdate>>>,
    first_active: Arc<AtomicUsize>,
}

impl Harness {
    pub fn settings() -> SessionSettings {
        SessionSettings {
            api_key: "test-key".into(),
            model: "test-model".into(),
            voice: "Aoede".into(),
            handshake_timeout: std::time::Duration::from_secs(15),
            capture: CaptureConstraints::voice(32),
            profile: Profile::default(),
            returning_author: false,
        }
    }

    pub fn new() -> Self {
        Self::with_settings(Self::settings())
    }

    pub fn with_settings(settings: SessionSettings) -> Self {
        let devices = FakeDevices::new();
        let connector = FakeConnector::new();
        let store = MemoryStore::default();
        let (tx, rx) = mpsc::channel();
        let statuses = Arc::new(Mutex::new(Vec::new()));
        let first_active = Arc::new(AtomicUsize::new(0));

        let sink_statuses = statuses.clone();
        let hook_count = first_active.clone();
        let session = VoiceSession::new(
            settings,
            Box::new(devices.clone()),
            Box::new(connector.clone()),
            Box::new(store.clone()),
            tx,
            Box::new(move |update| sink_statuses.lock().unwrap().push(update)),
        )
        .on_first_active(Box::new(move || {
            hook_count.fetch_add(1, Ordering::SeqCst);
        }));

        Self {
            session,
            devices,
            connector,
            store,
            rx,
            statuses,
            first_active,
        }
    }

    /// Run every queued event through the session.
    pub fn pump(&mut self) {
        while let Ok(event) = self.rx.try_recv() {
            self.session.handle_event(event);
        }
    }

    pub fn open(&mut self) {
        self.connector.emit(ChannelEvent::Opened);
        self.pump();
    }

    pub fn server(&mut self, event: crate::api::ServerEvent) {
        self.connector.emit(ChannelEvent::Server(event));
        self.pump();
    }

    pub fn statuses(&self) -> Vec<StatusUpdate> {
        self.statuses.lock().unwrap().clone()
    }

    pub fn diagnostics(&self) -> Vec<String> {
        self.statuses()
            .into_iter()
            .filter_map(|s| match s {
                StatusUpdate::Diagnostic(text) => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn saw_state(&self, wanted: LinkState) -> bool {
        self.statuses()
            .iter()
            .any(|s| matches!(s, StatusUpdate::State { state, .. } if *state == wanted))
    }

    pub fn first_active_calls(&self) -> usize {
        self.first_active.load(Ordering::SeqCst)
    }
}
