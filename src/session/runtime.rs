//! The session thread and the handle the front end drives it with.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use super::machine::{FirstActiveHook, VoiceSession};
use super::{Command, LinkEvent, SessionSettings, StatusSink};
use crate::api::ChannelConnector;
use crate::audio::AudioDevices;
use crate::error::{LinkError, Result};
use crate::manuscript::ManuscriptStore;

/// How often the loop wakes to check the handshake deadline.
const TICK: Duration = Duration::from_millis(100);

/// Collaborators moved onto the session thread.
pub struct SessionDeps {
    pub devices: Box<dyn AudioDevices + Send>,
    pub connector: Box<dyn ChannelConnector + Send>,
    pub store: Box<dyn ManuscriptStore + Send>,
    pub on_first_active: Option<FirstActiveHook>,
}

/// Drain `rx` into `session` until shutdown. Every state change happens here.
pub fn run_event_loop(session: &mut VoiceSession, rx: &mpsc::Receiver<LinkEvent>) {
    loop {
        match rx.recv_timeout(TICK) {
            Ok(event) => {
                if !session.handle_event(event) {
                    break;
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                session.stop_session();
                break;
            }
        }
        session.tick(Instant::now());
    }
    debug!("[Session] Event loop finished");
}

pub struct SessionController {
    tx: mpsc::Sender<LinkEvent>,
    thread: Option<JoinHandle<()>>,
}

impl SessionController {
    /// Spawn the session thread. Devices are opened on that thread and never
    /// leave it.
    pub fn spawn(settings: SessionSettings, deps: SessionDeps, status: StatusSink) -> Result<Self> {
        let (tx, rx) = mpsc::channel();
        let loop_tx = tx.clone();

        let thread = std::thread::Builder::new()
            .name("acoustic-link-session".into())
            .spawn(move || {
                let mut session = VoiceSession::new(
                    settings,
                    deps.devices,
                    deps.connector,
                    deps.store,
                    loop_tx,
                    status,
                );
                if let Some(hook) = deps.on_first_active {
                    session = session.on_first_active(hook);
                }
                info!("[Session] Ready");
                run_event_loop(&mut session, &rx);
            })
            .map_err(LinkError::Io)?;

        Ok(Self {
            tx,
            thread: Some(thread),
        })
    }

    pub fn start(&self, greeting: Option<String>) {
        self.send(Command::Start { greeting });
    }

    pub fn stop(&self) {
        self.send(Command::Stop);
    }

    pub fn checkpoint(&self) {
        self.send(Command::Checkpoint);
    }

    pub fn set_muted(&self, muted: bool) {
        self.send(Command::SetMuted(muted));
    }

    pub fn say(&self, text: impl Into<String>) {
        self.send(Command::Say(text.into()));
    }

    /// Queue an acoustic check. Raising the returned flag cancels it.
    pub fn acoustic_check(&self, window: Duration) -> Arc<AtomicBool> {
        let cancel = Arc::new(AtomicBool::new(false));
        self.send(Command::AcousticCheck {
            window,
            cancel: cancel.clone(),
        });
        cancel
    }

    /// Stop any session, export, and join the thread.
    pub fn shutdown(mut self) {
        self.finish();
    }

    fn send(&self, command: Command) {
        if self.tx.send(LinkEvent::Command(command)).is_err() {
            warn!("[Session] Session thread is gone");
        }
    }

    fn finish(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = self.tx.send(LinkEvent::Command(Command::Shutdown));
            if thread.join().is_err() {
                warn!("[Session] Session thread panicked");
            }
        }
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.finish();
    }
}

/// Cancel a check started with [`SessionController::acoustic_check`].
pub fn cancel_check(flag: &AtomicBool) {
    flag.store(true, Ordering::SeqCst);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ChannelEvent;
    use crate::session::testing::{FakeConnector, FakeDevices, Harness, MemoryStore};
    use crate::session::{LinkState, StatusUpdate};

    fn wait_for(
        rx: &mpsc::Receiver<StatusUpdate>,
        mut wanted: impl FnMut(&StatusUpdate) -> bool,
    ) -> Option<StatusUpdate> {
        let deadline = Instant::now() + Duration::from_secs(5);
        while let Some(left) = deadline.checked_duration_since(Instant::now()) {
            match rx.recv_timeout(left) {
                Ok(update) if wanted(&update) => return Some(update),
                Ok(_) => {}
                Err(_) => return None,
            }
        }
        None
    }

    fn is_state(wanted: LinkState) -> impl FnMut(&StatusUpdate) -> bool {
        move |u| matches!(u, StatusUpdate::State { state, .. } if *state == wanted)
    }

    #[test]
    fn controller_drives_a_session_on_its_own_thread() {
        let devices = FakeDevices::new();
        let connector = FakeConnector::new();
        let store = MemoryStore::default();
        let (status_tx, status_rx) = mpsc::channel();

        let controller = SessionController::spawn(
            Harness::settings(),
            SessionDeps {
                devices: Box::new(devices.clone()),
                connector: Box::new(connector.clone()),
                store: Box::new(store.clone()),
                on_first_active: None,
            },
            Box::new(move |update| {
                let _ = status_tx.send(update);
            }),
        )
        .unwrap();

        controller.start(None);
        assert!(wait_for(&status_rx, is_state(LinkState::Connecting)).is_some());

        connector.emit(ChannelEvent::Opened);
        assert!(wait_for(&status_rx, is_state(LinkState::Active)).is_some());
        assert_eq!(devices.live_handles(), 2);

        connector.emit(ChannelEvent::Server(crate::api::ServerEvent::InputTranscript(
            "unfinished thought".into(),
        )));
        controller.shutdown();

        assert_eq!(devices.live_handles(), 0);
        assert_eq!(connector.live_channels(), 0);
        let entries = store.entries();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].1.contains("unfinished thought (unfinished)"));
    }

    #[test]
    fn loop_times_out_a_silent_handshake() {
        let devices = FakeDevices::new();
        let connector = FakeConnector::new();
        let (status_tx, status_rx) = mpsc::channel();
        let mut settings = Harness::settings();
        settings.handshake_timeout = Duration::from_millis(200);

        let controller = SessionController::spawn(
            settings,
            SessionDeps {
                devices: Box::new(devices.clone()),
                connector: Box::new(connector.clone()),
                store: Box::new(MemoryStore::default()),
                on_first_active: None,
            },
            Box::new(move |update| {
                let _ = status_tx.send(update);
            }),
        )
        .unwrap();

        controller.start(None);
        assert!(wait_for(&status_rx, is_state(LinkState::Error)).is_some());
        assert!(wait_for(&status_rx, is_state(LinkState::Standby)).is_some());
        assert_eq!(devices.live_handles(), 0);
        assert_eq!(connector.live_channels(), 0);
        drop(controller);
    }
}
