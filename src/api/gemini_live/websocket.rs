//! WebSocket connection and wire messages for the Gemini Live voice channel

use anyhow::Result;
use native_tls::TlsStream;
use std::net::TcpStream;
use std::time::Duration;
use tungstenite::WebSocket;

use super::types::{ServerMessage, LIVE_ENDPOINT};
use crate::api::channel::{ChannelSetup, ServerEvent};
use crate::audio::{INPUT_MIME_TYPE, OUTPUT_SAMPLE_RATE};

pub type LiveSocket = WebSocket<TlsStream<TcpStream>>;

/// Create TLS WebSocket connection to Gemini Live API
pub fn connect_live_websocket(api_key: &str) -> Result<LiveSocket> {
    let ws_url = format!("{}?key={}", LIVE_ENDPOINT, api_key);

    let url = url::Url::parse(&ws_url)?;
    let host = url
        .host_str()
        .ok_or_else(|| anyhow::anyhow!("No host in URL"))?;
    let port = url.port_or_known_default().unwrap_or(443);

    use std::net::ToSocketAddrs;
    let addr = format!("{}:{}", host, port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| anyhow::anyhow!("Failed to resolve hostname: {}", host))?;

    let tcp_stream = TcpStream::connect_timeout(&addr, Duration::from_secs(10))?;
    tcp_stream.set_read_timeout(Some(Duration::from_secs(30)))?;
    tcp_stream.set_write_timeout(Some(Duration::from_secs(30)))?;
    tcp_stream.set_nodelay(true)?;

    let connector = native_tls::TlsConnector::new()?;
    let tls_stream = connector.connect(host, tcp_stream)?;

    let (socket, _response) = tungstenite::client::client(&ws_url, tls_stream)?;

    Ok(socket)
}

/// Shorten the read timeout so the worker loop can interleave sends and reads
pub fn set_socket_poll_interval(socket: &LiveSocket, interval: Duration) -> Result<()> {
    socket.get_ref().get_ref().set_read_timeout(Some(interval))?;
    Ok(())
}

/// Build the setup message: audio responses with the chosen voice,
/// transcription in both directions.
pub fn build_setup_message(setup: &ChannelSetup) -> serde_json::Value {
    let mut message = serde_json::json!({
        "setup": {
            "model": format!("models/{}", setup.model),
            "generationConfig": {
                "responseModalities": ["AUDIO"],
                "speechConfig": {
                    "voiceConfig": {
                        "prebuiltVoiceConfig": {
                            "voiceName": setup.voice
                        }
                    }
                }
            },
            "inputAudioTranscription": {},
            "outputAudioTranscription": {}
        }
    });

    if !setup.system_instruction.trim().is_empty() {
        message["setup"]["systemInstruction"] = serde_json::json!({
            "parts": [{ "text": setup.system_instruction }]
        });
    }

    message
}

/// Streamed microphone chunk
pub fn build_audio_message(payload: &str) -> serde_json::Value {
    serde_json::json!({
        "realtimeInput": {
            "mediaChunks": [{
                "mimeType": INPUT_MIME_TYPE,
                "data": payload
            }]
        }
    })
}

/// A complete user text turn
pub fn build_text_message(text: &str) -> serde_json::Value {
    serde_json::json!({
        "clientContent": {
            "turns": [{
                "role": "user",
                "parts": [{ "text": text }]
            }],
            "turnComplete": true
        }
    })
}

pub fn send_json(socket: &mut LiveSocket, message: &serde_json::Value) -> Result<()> {
    socket.write(tungstenite::Message::Text(message.to_string().into()))?;
    socket.flush()?;
    Ok(())
}

/// Text of a binary frame. The service sometimes sends its JSON this way.
pub fn binary_frame_text(data: &[u8]) -> Option<String> {
    String::from_utf8(data.to_vec()).ok()
}

/// What one inbound frame carried
#[derive(Debug, Default, PartialEq)]
pub struct ParsedMessage {
    pub setup_complete: bool,
    pub go_away: bool,
    pub events: Vec<ServerEvent>,
}

/// Parse a server frame into ordered events.
/// Returns `None` when the frame is not JSON.
pub fn parse_server_message(msg: &str) -> Option<ParsedMessage> {
    let message: ServerMessage = serde_json::from_str(msg).ok()?;
    let mut parsed = ParsedMessage {
        setup_complete: message.setup_complete.is_some(),
        go_away: message.go_away.is_some(),
        events: Vec::new(),
    };

    if let Some(error) = message.error {
        let text = error
            .get("message")
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        parsed.events.push(ServerEvent::Error(text));
        return Some(parsed);
    }

    let Some(content) = message.server_content else {
        return Some(parsed);
    };

    // Barge-in comes first so stale audio in the same frame is not scheduled
    if content.interrupted {
        parsed.events.push(ServerEvent::Interrupted);
    }

    if let Some(text) = content.input_transcription.and_then(|t| t.text) {
        if !text.is_empty() {
            parsed.events.push(ServerEvent::InputTranscript(text));
        }
    }

    if let Some(turn) = content.model_turn {
        for part in turn.parts {
            if let Some(inline) = part.inline_data {
                if inline.data.is_empty() {
                    continue;
                }
                let sample_rate = inline
                    .mime_type
                    .as_deref()
                    .and_then(rate_from_mime)
                    .unwrap_or(OUTPUT_SAMPLE_RATE);
                parsed.events.push(ServerEvent::Audio {
                    data: inline.data,
                    sample_rate,
                });
            }
        }
    }

    // Leading spaces are word separators, keep them
    if let Some(text) = content.output_transcription.and_then(|t| t.text) {
        if !text.is_empty() {
            parsed.events.push(ServerEvent::OutputTranscript(text));
        }
    }

    if content.turn_complete {
        parsed.events.push(ServerEvent::TurnComplete);
    }

    Some(parsed)
}

/// "audio/pcm;rate=24000" -> 24000
fn rate_from_mime(mime: &str) -> Option<u32> {
    mime.split(';')
        .filter_map(|param| param.trim().strip_prefix("rate="))
        .find_map(|rate| rate.parse().ok())
}
