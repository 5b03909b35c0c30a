//! detect_stream - consume a real-time detection stream
//!
//! This tool:
//! 1. Loads the viewer configuration (file, defaults, environment)
//! 2. Opens one streaming session with the persisted session token
//! 3. Reconciles image results until completion, error or Ctrl-C
//! 4. Optionally writes the session snapshot as JSON

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use detection_viewer::config::ViewerConfig;
use detection_viewer::stream::{
    ControllerState, HttpTransport, LogNotifier, ReplayTransport, SessionSnapshot, SessionToken,
    StartOutcome, StreamTransport, StreamingSessionController,
};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Backend base URL (overrides config and DETECT_API_URL).
    #[arg(long)]
    api_url: Option<String>,
    /// Session token file (overrides config and DETECT_SESSION_TOKEN_PATH).
    #[arg(long)]
    token_path: Option<PathBuf>,
    /// Replay a captured NDJSON body instead of connecting.
    #[arg(long, value_name = "FILE")]
    replay: Option<PathBuf>,
    /// Write the final session snapshot as JSON.
    #[arg(long, value_name = "FILE")]
    snapshot_out: Option<PathBuf>,
    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

/// Record a stop request. Returns true when one was already pending.
fn request_stop(stop: &AtomicBool) -> bool {
    stop.swap(true, Ordering::SeqCst)
}

fn write_snapshot(path: &Path, snapshot: &SessionSnapshot) -> Result<()> {
    let json = serde_json::to_string_pretty(snapshot)?;
    std::fs::write(path, json).with_context(|| format!("write snapshot {}", path.display()))
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let ui = ui::Ui::from_args(Some(&args.ui));

    let mut config = ViewerConfig::load()?;
    if let Some(url) = args.api_url.as_deref() {
        config.override_base_url(url)?;
    }
    if let Some(path) = args.token_path {
        config.stream.token_path = Some(path);
    }

    let token = match &config.stream.token_path {
        Some(path) => SessionToken::load_or_create(path)?,
        None => SessionToken::generate(),
    };

    let transport: Box<dyn StreamTransport> = match &args.replay {
        Some(path) => {
            let bytes = std::fs::read(path)
                .with_context(|| format!("read captured stream {}", path.display()))?;
            log::info!("replaying {} ({} bytes)", path.display(), bytes.len());
            Box::new(ReplayTransport::from_bytes(
                &bytes,
                config.stream.read_chunk_bytes,
            ))
        }
        None => Box::new(HttpTransport::new(config.stream.connect_timeout)),
    };

    // The first Ctrl-C stops between reads. A read on a stalled connection
    // never returns, so a second Ctrl-C exits with the last known snapshot.
    let stop = Arc::new(AtomicBool::new(false));
    let latest: Arc<Mutex<Option<SessionSnapshot>>> = Arc::new(Mutex::new(None));
    {
        let stop = Arc::clone(&stop);
        let latest = Arc::clone(&latest);
        let snapshot_out = args.snapshot_out.clone();
        ctrlc::set_handler(move || {
            if !request_stop(&stop) {
                log::warn!("stopping after the current read; press Ctrl-C again to exit now");
                return;
            }
            if let (Some(path), Ok(guard)) = (&snapshot_out, latest.lock()) {
                if let Some(snapshot) = guard.as_ref() {
                    if let Err(e) = write_snapshot(path, snapshot) {
                        log::error!("{:#}", e);
                    }
                }
            }
            log::warn!("interrupted again; exiting");
            std::process::exit(130);
        })
        .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;
    }

    let mut controller = StreamingSessionController::new(
        transport,
        LogNotifier,
        config.controller_settings(),
        token,
    );

    let mut stage = ui.stage("Streaming detections");
    if controller.start() == StartOutcome::Started {
        let mut published = None;
        while !stop.load(Ordering::SeqCst) && controller.pump() {
            let session = controller.session();
            let progress = (session.images().len(), session.status());
            if published == Some(progress) {
                continue;
            }
            published = Some(progress);
            stage.set_message(&format!(
                "{} images, {} detections",
                session.images().len(),
                session.accumulated_detections()
            ));
            if args.snapshot_out.is_some() {
                if let Ok(mut guard) = latest.lock() {
                    *guard = Some(controller.snapshot());
                }
            }
        }
    }
    if stop.load(Ordering::SeqCst) {
        log::info!("stopped by user; keeping {} images", controller.session().images().len());
    }
    let state = controller.state();
    let failure = controller.session().failure().cloned();
    if let Some(failure) = &failure {
        stage.fail(&failure.to_string());
    }
    drop(stage);

    if let Some(path) = &args.snapshot_out {
        let _stage = ui.stage("Writing snapshot");
        write_snapshot(path, &controller.snapshot())?;
        log::info!("snapshot written to {}", path.display());
    }

    match (state, failure) {
        (ControllerState::Error, Some(failure)) => {
            Err(anyhow!("detection stream failed: {}", failure))
        }
        _ => Ok(()),
    }
}
