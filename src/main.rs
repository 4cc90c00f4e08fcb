//! acoustic-link - talk your manuscript into being
//!
//! Runs a voice session in the terminal. Commands are read from stdin:
//! `start`, `stop`, `checkpoint`, `mute`, `unmute`, `say <text>`, `check`,
//! `cancel` (aborts a running check), `status`, `quit`.

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info, warn};
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

use acoustic_link::api::LiveConnector;
use acoustic_link::audio::cpal_backend::CpalDevices;
use acoustic_link::audio::level_check::run_level_check;
use acoustic_link::config::{self, Config};
use acoustic_link::manuscript::JsonManuscriptStore;
use acoustic_link::session::runtime::cancel_check;
use acoustic_link::session::{
    LinkState, SessionController, SessionDeps, SessionSettings, Speaker, StatusUpdate,
};

const CHECK_WINDOW: Duration = Duration::from_secs(3);

#[derive(Parser)]
#[command(name = "acoustic-link")]
#[command(about = "Real-time voice sessions with a writing companion")]
#[command(version)]
struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Prebuilt voice for the agent
    #[arg(long)]
    voice: Option<String>,

    /// Opening line sent instead of the default greeting
    #[arg(long)]
    greeting: Option<String>,

    /// Run the acoustic check and exit
    #[arg(long)]
    check: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config_path = cli.config.clone().unwrap_or_else(config::get_config_path);
    let mut config = config::load_config(&config_path);
    if let Some(voice) = cli.voice.clone() {
        config.voice_name = voice;
    }
    info!("Config: {}", config_path.display());

    if cli.check {
        return run_check(&config);
    }

    if config.gemini_api_key.trim().is_empty() {
        warn!(
            "No API key configured; set {} or add gemini_api_key to {}",
            config::API_KEY_ENV,
            config_path.display()
        );
    }

    let manuscript_path = config
        .manuscript_path
        .clone()
        .unwrap_or_else(config::default_manuscript_path);
    info!("Manuscript: {}", manuscript_path.display());

    let hook_path = config_path.clone();
    let deps = SessionDeps {
        devices: Box::new(CpalDevices::new(
            config.input_device.clone(),
            config.output_device.clone(),
        )),
        connector: Box::new(LiveConnector::new()),
        store: Box::new(JsonManuscriptStore::new(manuscript_path)),
        on_first_active: Some(Box::new(move || {
            if let Err(e) = config::mark_returning_author(&hook_path) {
                warn!("Could not save returning-author flag: {:#}", e);
            }
        })),
    };

    let last_status = Arc::new(Mutex::new(String::from("standby")));
    let (status_tx, status_rx) = mpsc::channel::<StatusUpdate>();
    let controller = SessionController::spawn(
        SessionSettings::from_config(&config),
        deps,
        Box::new(move |update| {
            let _ = status_tx.send(update);
        }),
    )
    .context("starting session thread")?;

    let printer_status = last_status.clone();
    std::thread::spawn(move || {
        for update in status_rx {
            if let Some(line) = describe(&update) {
                println!("{}", line);
            }
            if let StatusUpdate::State { state, indicators } = update {
                if let Ok(mut last) = printer_status.lock() {
                    *last = format!(
                        "{} (listening: {}, thinking: {}, muted: {})",
                        state, indicators.listening, indicators.thinking, indicators.muted
                    );
                }
            }
        }
    });

    println!("Type `start` to begin, `quit` to leave.");
    let mut pending_check = None;
    for line in std::io::stdin().lock().lines() {
        let line = line.context("reading stdin")?;
        let (command, rest) = match line.trim().split_once(' ') {
            Some((c, r)) => (c.to_string(), r.trim().to_string()),
            None => (line.trim().to_string(), String::new()),
        };

        if let Some(hint) = usage_hint(&command, &rest) {
            println!("{}", hint);
            continue;
        }

        match command.as_str() {
            "" => {}
            "start" => controller.start(cli.greeting.clone()),
            "stop" => controller.stop(),
            "checkpoint" => controller.checkpoint(),
            "mute" => controller.set_muted(true),
            "unmute" => controller.set_muted(false),
            "say" => controller.say(rest),
            "check" => pending_check = Some(controller.acoustic_check(CHECK_WINDOW)),
            "cancel" => {
                if let Some(flag) = pending_check.take() {
                    cancel_check(&flag);
                }
            }
            "status" => {
                if let Ok(last) = last_status.lock() {
                    println!("{}", last);
                }
            }
            "quit" | "exit" => break,
            other => println!("Unknown command: {}", other),
        }
    }

    controller.shutdown();
    Ok(())
}

fn run_check(config: &Config) -> Result<()> {
    let mut devices = CpalDevices::new(config.input_device.clone(), None);
    let cancel = std::sync::atomic::AtomicBool::new(false);
    println!("Speak normally for {} seconds...", CHECK_WINDOW.as_secs());
    match run_level_check(&mut devices, config.capture_constraints(), CHECK_WINDOW, &cancel) {
        Ok(report) => {
            println!("{}", report.summary());
            Ok(())
        }
        Err(e) => {
            error!("Acoustic check failed: {}", e);
            Err(e.into())
        }
    }
}

/// Commands that need an argument and were given none.
fn usage_hint(command: &str, rest: &str) -> Option<&'static str> {
    match command {
        "say" if rest.is_empty() => Some("Usage: say <text>"),
        _ => None,
    }
}

fn describe(update: &StatusUpdate) -> Option<String> {
    match update {
        StatusUpdate::State { state, indicators } => match state {
            LinkState::Active if indicators.muted => Some("[active, muted]".into()),
            LinkState::Active if indicators.thinking => Some("[thinking...]".into()),
            LinkState::Active => Some("[listening]".into()),
            other => Some(format!("[{}]", other)),
        },
        StatusUpdate::Transcript { .. } => None,
        StatusUpdate::TurnFinalized(turn) => {
            let who = match turn.speaker {
                Speaker::Author => "you",
                Speaker::Agent => "agent",
            };
            Some(format!("{:>5}: {}", who, turn.text))
        }
        StatusUpdate::Exported { title, turns } => {
            Some(format!("Saved {} turn(s) to \"{}\"", turns, title))
        }
        StatusUpdate::LevelCheck(report) => Some(report.summary()),
        StatusUpdate::Diagnostic(text) => Some(format!("! {}", text)),
    }
}
