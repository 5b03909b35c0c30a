//! Real-time detection stream consumer.
//!
//! A session is opened with a POST carrying the session token; the response
//! body is consumed chunk by chunk, split into NDJSON lines, parsed into
//! `StreamMessage`s and reconciled into a `StreamSession`.

pub mod controller;
pub mod decoder;
pub mod message;
pub mod notify;
pub mod reconciler;
pub mod token;
pub mod transport;

pub use controller::{ControllerSettings, ControllerState, StartOutcome, StreamingSessionController};
pub use decoder::{decode_chunk, DecodedChunk, LineDecoder, DEFAULT_MAX_LINE_BYTES};
pub use message::{parse_message, DetectionDto, StreamMessage, WireBox};
pub use notify::{LogNotifier, Notice, Notifier, RecordingNotifier};
pub use reconciler::{
    SessionEvent, SessionFailure, SessionReconciler, SessionSnapshot, SessionStatus,
    StreamSession,
};
pub use token::SessionToken;
pub use transport::{HttpTransport, ReplayTransport, StreamRequest, StreamTransport};
