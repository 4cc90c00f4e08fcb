//! Socket worker thread for one Gemini Live voice channel

use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;
use tungstenite::Message;

use super::types::Outbound;
use super::websocket::{
    binary_frame_text, build_audio_message, build_setup_message, build_text_message,
    connect_live_websocket, parse_server_message, send_json, set_socket_poll_interval, LiveSocket,
};
use crate::api::channel::{
    ChannelConnector, ChannelEvent, ChannelEventSink, ChannelSetup, SessionChannel,
};
use crate::error::{LinkError, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Opens real channels, one worker thread each.
#[derive(Debug, Default)]
pub struct LiveConnector;

impl LiveConnector {
    pub fn new() -> Self {
        Self
    }
}

impl ChannelConnector for LiveConnector {
    fn open(
        &mut self,
        setup: ChannelSetup,
        events: ChannelEventSink,
    ) -> Result<Box<dyn SessionChannel>> {
        setup.validate()?;

        let (tx, rx) = mpsc::channel();
        let closed = Arc::new(AtomicBool::new(false));
        let worker_closed = closed.clone();

        std::thread::Builder::new()
            .name("gemini-live".into())
            .spawn(move || run_channel_worker(setup, rx, worker_closed, events))
            .map_err(|e| LinkError::Channel(format!("failed to spawn worker: {}", e)))?;

        Ok(Box::new(LiveChannel {
            outbound: tx,
            closed,
        }))
    }
}

pub struct LiveChannel {
    outbound: mpsc::Sender<Outbound>,
    closed: Arc<AtomicBool>,
}

impl SessionChannel for LiveChannel {
    fn send_audio(&self, payload: String) {
        if !self.is_closed() {
            let _ = self.outbound.send(Outbound::Audio(payload));
        }
    }

    fn send_text(&self, text: &str) {
        if !self.is_closed() {
            let _ = self.outbound.send(Outbound::Text(text.to_string()));
        }
    }

    fn close(&mut self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            let _ = self.outbound.send(Outbound::Close);
            info!("[GeminiLive] Channel close requested");
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Drop for LiveChannel {
    fn drop(&mut self) {
        self.close();
    }
}

/// Worker body. Once the channel is closed locally, no further events are
/// emitted.
pub fn run_channel_worker(
    setup: ChannelSetup,
    outbound: mpsc::Receiver<Outbound>,
    closed: Arc<AtomicBool>,
    mut events: ChannelEventSink,
) {
    let mut emit = |event: ChannelEvent| {
        if !closed.load(Ordering::SeqCst) {
            events(event);
        }
    };

    info!("[GeminiLive] Connecting ({})", setup.model);
    let mut socket = match connect_live_websocket(&setup.api_key) {
        Ok(s) => s,
        Err(e) => {
            emit(ChannelEvent::Failed(format!("Connection failed: {}", e)));
            return;
        }
    };

    if let Err(e) = send_json(&mut socket, &build_setup_message(&setup)) {
        emit(ChannelEvent::Failed(format!("Setup failed: {}", e)));
        let _ = socket.close(None);
        return;
    }

    if let Err(e) = set_socket_poll_interval(&socket, POLL_INTERVAL) {
        warn!("[GeminiLive] Could not shorten read timeout: {}", e);
    }

    let mut opened = false;

    loop {
        if closed.load(Ordering::SeqCst) {
            break;
        }

        // Queued sends wait for setupComplete
        if opened {
            if let Err(e) = drain_outbound(&mut socket, &outbound, &closed) {
                emit(ChannelEvent::Failed(format!("Send failed: {}", e)));
                break;
            }
        }

        let text = match socket.read() {
            Ok(Message::Text(msg)) => msg.as_str().to_string(),
            Ok(Message::Binary(data)) => match binary_frame_text(&data) {
                Some(text) => text,
                None => continue,
            },
            Ok(Message::Close(frame)) => {
                let reason = frame
                    .map(|f| f.reason.as_str().to_string())
                    .filter(|r| !r.is_empty());
                info!("[GeminiLive] Server closed channel: {:?}", reason);
                emit(ChannelEvent::Closed(reason));
                break;
            }
            Ok(_) => continue,
            Err(tungstenite::Error::Io(ref e))
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                continue;
            }
            Err(tungstenite::Error::ConnectionClosed) | Err(tungstenite::Error::AlreadyClosed) => {
                emit(ChannelEvent::Closed(None));
                break;
            }
            Err(e) => {
                emit(ChannelEvent::Failed(format!("Read error: {}", e)));
                break;
            }
        };

        let Some(parsed) = parse_server_message(&text) else {
            debug!("[GeminiLive] Ignoring non-JSON frame");
            continue;
        };

        if parsed.setup_complete && !opened {
            opened = true;
            info!("[GeminiLive] Setup complete");
            emit(ChannelEvent::Opened);
        }
        if parsed.go_away {
            warn!("[GeminiLive] Server announced goAway");
        }
        for event in parsed.events {
            emit(ChannelEvent::Server(event));
        }
    }

    let _ = socket.close(None);
    let _ = socket.flush();
    debug!("[GeminiLive] Worker exited");
}

fn drain_outbound(
    socket: &mut LiveSocket,
    outbound: &mpsc::Receiver<Outbound>,
    closed: &AtomicBool,
) -> anyhow::Result<()> {
    while let Ok(message) = outbound.try_recv() {
        match message {
            Outbound::Audio(payload) => send_json(socket, &build_audio_message(&payload))?,
            Outbound::Text(text) => send_json(socket, &build_text_message(&text))?,
            Outbound::Close => {
                closed.store(true, Ordering::SeqCst);
                break;
            }
        }
    }
    Ok(())
}
