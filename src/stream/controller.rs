//! Streaming session controller.
//!
//! Owns the `StreamSession` and drives it through
//! `Idle -> Connecting -> Streaming -> {Complete | Error}`.
//!
//! The controller is cooperative: `pump` reads and reconciles one chunk, then
//! yields back to the caller, which is free to interleave other work (image
//! loads, resize handling, input) between chunks.

use std::io::{ErrorKind, Read};

use super::decoder::{LineDecoder, DEFAULT_MAX_LINE_BYTES};
use super::message::parse_message;
use super::notify::{Notice, Notifier};
use super::reconciler::{
    SessionEvent, SessionFailure, SessionReconciler, SessionSnapshot, StreamSession,
};
use super::token::SessionToken;
use super::transport::{StreamRequest, StreamTransport};

const DEFAULT_READ_CHUNK_BYTES: usize = 8192;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    Connecting,
    Streaming,
    Complete,
    Error,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StartOutcome {
    /// A new session was opened and is streaming.
    Started,
    /// A session is already connecting or streaming; nothing changed.
    AlreadyRunning,
    /// A new session was created but the connection could not be opened.
    Failed,
}

#[derive(Clone, Debug)]
pub struct ControllerSettings {
    /// Full URL of the streaming endpoint.
    pub stream_url: String,
    /// Base URL for image locators.
    pub base_url: String,
    pub read_chunk_bytes: usize,
    pub max_line_bytes: usize,
}

impl ControllerSettings {
    pub fn new(base_url: &str, stream_path: &str) -> Self {
        let base = base_url.trim_end_matches('/');
        let path = stream_path.trim_start_matches('/');
        Self {
            stream_url: format!("{}/{}", base, path),
            base_url: format!("{}/", base),
            read_chunk_bytes: DEFAULT_READ_CHUNK_BYTES,
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
        }
    }
}

pub struct StreamingSessionController<T, N> {
    transport: T,
    notifier: N,
    settings: ControllerSettings,
    reconciler: SessionReconciler,
    token: SessionToken,
    state: ControllerState,
    session: StreamSession,
    reader: Option<Box<dyn Read + Send>>,
    decoder: LineDecoder,
    chunk: Vec<u8>,
}

impl<T: StreamTransport, N: Notifier> StreamingSessionController<T, N> {
    pub fn new(transport: T, notifier: N, settings: ControllerSettings, token: SessionToken) -> Self {
        let reconciler = SessionReconciler::new(&settings.base_url);
        let decoder = LineDecoder::new(settings.max_line_bytes);
        let chunk = vec![0u8; settings.read_chunk_bytes.max(1)];
        Self {
            transport,
            notifier,
            reconciler,
            session: StreamSession::new(token.clone()),
            token,
            state: ControllerState::Idle,
            reader: None,
            decoder,
            chunk,
            settings,
        }
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn session(&self) -> &StreamSession {
        &self.session
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.session.snapshot()
    }

    pub fn notifier(&self) -> &N {
        &self.notifier
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// True while a response body is still being consumed.
    pub fn is_active(&self) -> bool {
        self.reader.is_some()
    }

    /// Open a new session unless one is already connecting or streaming.
    pub fn start(&mut self) -> StartOutcome {
        if matches!(
            self.state,
            ControllerState::Connecting | ControllerState::Streaming
        ) {
            log::debug!("start ignored: session already {:?}", self.state);
            return StartOutcome::AlreadyRunning;
        }
        self.open()
    }

    /// Abandon any in-flight stream, reset the session and reconnect.
    pub fn restart(&mut self) -> StartOutcome {
        if self.reader.is_some() {
            log::info!("abandoning in-flight detection stream");
        }
        self.open()
    }

    fn open(&mut self) -> StartOutcome {
        self.reader = None;
        self.session = StreamSession::new(self.token.clone());
        self.decoder = LineDecoder::new(self.settings.max_line_bytes);
        self.state = ControllerState::Connecting;

        let request = StreamRequest {
            url: self.settings.stream_url.clone(),
            session_token: self.token.as_str().to_string(),
        };
        log::info!("opening detection stream {}", request.url);
        match self.transport.open(&request) {
            Ok(reader) => {
                self.reader = Some(reader);
                self.state = ControllerState::Streaming;
                StartOutcome::Started
            }
            Err(e) => {
                self.fail(SessionFailure::Transport(format!("{:#}", e)));
                StartOutcome::Failed
            }
        }
    }

    /// Read and reconcile one chunk. Returns whether more data is expected.
    pub fn pump(&mut self) -> bool {
        let Some(reader) = self.reader.as_mut() else {
            return false;
        };
        let read = match reader.read(&mut self.chunk) {
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => return true,
            Err(e) => {
                self.fail(SessionFailure::Transport(format!(
                    "read stream chunk: {}",
                    e
                )));
                return false;
            }
        };
        if read == 0 {
            self.finish_stream();
            return false;
        }

        let lines = self.decoder.push(&self.chunk[..read]);
        for line in lines {
            self.handle_line(&line);
            if self.reader.is_none() {
                return false;
            }
        }
        if let Err(e) = self.decoder.check_limit() {
            log::error!("{}", e);
            self.fail(SessionFailure::LineTooLong(self.settings.max_line_bytes));
            return false;
        }
        true
    }

    /// Pump until the stream ends or `keep_going` returns false.
    pub fn run_while<F: FnMut() -> bool>(&mut self, mut keep_going: F) -> ControllerState {
        while keep_going() && self.pump() {}
        self.state
    }

    pub fn run_until_done(&mut self) -> ControllerState {
        self.run_while(|| true)
    }

    fn finish_stream(&mut self) {
        self.reader = None;
        if let Some(line) = self.decoder.finish() {
            self.handle_line(&line);
        }
        if self.state == ControllerState::Error {
            return;
        }
        if self.session.completed() {
            log::info!(
                "detection stream closed: {} images, {} detections",
                self.session.images().len(),
                self.session.total_detections().unwrap_or(0)
            );
        } else {
            self.fail(SessionFailure::UnexpectedEnd);
        }
    }

    fn handle_line(&mut self, line: &str) {
        let message = match parse_message(line) {
            Ok(message) => message,
            Err(e) => {
                log::warn!("skipping malformed stream message: {}", e);
                return;
            }
        };
        log::debug!("stream message: {}", message.kind());
        let events = self.reconciler.apply(&mut self.session, message);
        for event in events {
            self.dispatch(event);
        }
    }

    fn dispatch(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::ImageAppended {
                file_name,
                detections,
            } => {
                log::info!("image {} received ({} detections)", file_name, detections);
            }
            SessionEvent::DuplicateDropped { file_name } => {
                log::warn!("duplicate result for {} dropped", file_name);
            }
            SessionEvent::FirstDetection => {
                self.notifier.notify(&Notice::FirstDetection);
            }
            SessionEvent::Completed { total_detections } => {
                self.state = ControllerState::Complete;
                self.notifier
                    .notify(&Notice::Completed { total_detections });
            }
            SessionEvent::Failed(failure) => {
                self.halt(&failure);
            }
            SessionEvent::IgnoredAfterTerminal { kind } => {
                log::warn!("{} message ignored: session already {:?}", kind, self.state);
            }
        }
    }

    fn fail(&mut self, failure: SessionFailure) {
        if self.session.fail(failure.clone()) {
            self.halt(&failure);
        } else {
            self.reader = None;
        }
    }

    fn halt(&mut self, failure: &SessionFailure) {
        log::error!("detection stream failed: {}", failure);
        self.state = ControllerState::Error;
        self.reader = None;
        self.notifier.notify(&Notice::Failed {
            message: failure.to_string(),
        });
    }
}
