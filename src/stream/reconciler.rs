//! Session state and the rules for applying stream messages to it.
//!
//! The `StreamSession` is only ever mutated through `SessionReconciler::apply`
//! and `StreamSession::fail`, both driven from the controller's read loop.

use std::collections::HashSet;

use serde::Serialize;

use super::message::{wire_point_to_pixel, DetectionDto, StreamMessage};
use super::token::SessionToken;
use crate::{mean_confidence, now_epoch_ms, Detection, PixelBox, ProcessedImage};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Streaming,
    Complete,
    Failed,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, SessionStatus::Streaming)
    }
}

/// Why a session ended in failure.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum SessionFailure {
    /// The connection could not be opened or broke mid-stream.
    Transport(String),
    /// The server sent an explicit error message.
    Server(String),
    /// The body ended without a completion message.
    UnexpectedEnd,
    /// A line grew past the configured limit without a terminator.
    LineTooLong(usize),
}

impl std::fmt::Display for SessionFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionFailure::Transport(msg) => write!(f, "transport error: {}", msg),
            SessionFailure::Server(msg) => write!(f, "{}", msg),
            SessionFailure::UnexpectedEnd => write!(f, "stream ended unexpectedly"),
            SessionFailure::LineTooLong(limit) => {
                write!(f, "stream line exceeded {} bytes", limit)
            }
        }
    }
}
impl std::error::Error for SessionFailure {}

/// Observable outcome of applying one message.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    ImageAppended { file_name: String, detections: usize },
    DuplicateDropped { file_name: String },
    /// Fires at most once per session.
    FirstDetection,
    /// Fires at most once per session.
    Completed { total_detections: u64 },
    /// Fires at most once per session.
    Failed(SessionFailure),
    /// Control message arriving after the session already reached a terminal status.
    IgnoredAfterTerminal { kind: &'static str },
}

/// Mutable state of one streaming session.
#[derive(Clone, Debug)]
pub struct StreamSession {
    token: SessionToken,
    status: SessionStatus,
    failure: Option<SessionFailure>,
    images: Vec<ProcessedImage>,
    seen_files: HashSet<String>,
    first_detection_seen: bool,
    completed: bool,
    total_detections: Option<u64>,
    next_image_seq: u64,
}

impl StreamSession {
    /// Fresh session; every flag starts cleared.
    pub fn new(token: SessionToken) -> Self {
        Self {
            token,
            status: SessionStatus::Streaming,
            failure: None,
            images: Vec::new(),
            seen_files: HashSet::new(),
            first_detection_seen: false,
            completed: false,
            total_detections: None,
            next_image_seq: 0,
        }
    }

    pub fn token(&self) -> &SessionToken {
        &self.token
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn failure(&self) -> Option<&SessionFailure> {
        self.failure.as_ref()
    }

    pub fn images(&self) -> &[ProcessedImage] {
        &self.images
    }

    pub fn image(&self, file_name: &str) -> Option<&ProcessedImage> {
        self.images.iter().find(|img| img.file_name == file_name)
    }

    pub fn first_detection_seen(&self) -> bool {
        self.first_detection_seen
    }

    pub fn completed(&self) -> bool {
        self.completed
    }

    pub fn total_detections(&self) -> Option<u64> {
        self.total_detections
    }

    /// Detections accumulated across all images so far.
    pub fn accumulated_detections(&self) -> u64 {
        self.images
            .iter()
            .map(|img| img.detections.len() as u64)
            .sum()
    }

    /// Mark the session failed. Returns `false` if it was already terminal.
    pub fn fail(&mut self, failure: SessionFailure) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = SessionStatus::Failed;
        self.failure = Some(failure);
        true
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            token: self.token.as_str().to_string(),
            status: self.status,
            failure: self.failure.clone(),
            first_detection_seen: self.first_detection_seen,
            completed: self.completed,
            total_detections: self.total_detections,
            images: self.images.clone(),
        }
    }
}

/// Read-only copy of a session for observers and export.
#[derive(Clone, Debug, Serialize)]
pub struct SessionSnapshot {
    pub token: String,
    pub status: SessionStatus,
    pub failure: Option<SessionFailure>,
    pub first_detection_seen: bool,
    pub completed: bool,
    pub total_detections: Option<u64>,
    pub images: Vec<ProcessedImage>,
}

/// Applies decoded messages to a session.
#[derive(Clone, Debug)]
pub struct SessionReconciler {
    /// Base URL for image locators, always ending in '/'.
    base_url: String,
}

impl SessionReconciler {
    pub fn new(base_url: &str) -> Self {
        let mut base_url = base_url.to_string();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        Self { base_url }
    }

    pub fn original_url(&self, file_name: &str) -> String {
        format!("{}images/{}", self.base_url, file_name)
    }

    pub fn processed_url(&self, file_name: &str) -> String {
        format!("{}outputs/{}_annotated.png", self.base_url, file_stem(file_name))
    }

    pub fn apply(&self, session: &mut StreamSession, message: StreamMessage) -> Vec<SessionEvent> {
        match message {
            StreamMessage::Error { message } => {
                let failure = SessionFailure::Server(message);
                if session.fail(failure.clone()) {
                    vec![SessionEvent::Failed(failure)]
                } else {
                    vec![SessionEvent::IgnoredAfterTerminal { kind: "error" }]
                }
            }
            StreamMessage::FirstDetection => {
                if session.first_detection_seen {
                    return Vec::new();
                }
                if session.status.is_terminal() {
                    return vec![SessionEvent::IgnoredAfterTerminal {
                        kind: "first_detection",
                    }];
                }
                session.first_detection_seen = true;
                vec![SessionEvent::FirstDetection]
            }
            StreamMessage::Completed { total_detections } => {
                if session.completed {
                    return Vec::new();
                }
                if session.status.is_terminal() {
                    return vec![SessionEvent::IgnoredAfterTerminal { kind: "completed" }];
                }
                let total = total_detections.unwrap_or_else(|| session.accumulated_detections());
                session.completed = true;
                session.total_detections = Some(total);
                session.status = SessionStatus::Complete;
                vec![SessionEvent::Completed {
                    total_detections: total,
                }]
            }
            StreamMessage::ImageResult { image, detections } => {
                if session.seen_files.contains(&image) {
                    return vec![SessionEvent::DuplicateDropped { file_name: image }];
                }
                let processed = self.build_image(session, image, detections);
                let event = SessionEvent::ImageAppended {
                    file_name: processed.file_name.clone(),
                    detections: processed.detections.len(),
                };
                session.seen_files.insert(processed.file_name.clone());
                session.images.push(processed);
                vec![event]
            }
        }
    }

    fn build_image(
        &self,
        session: &mut StreamSession,
        file_name: String,
        detections: Vec<DetectionDto>,
    ) -> ProcessedImage {
        session.next_image_seq += 1;
        let now = now_epoch_ms();
        let mean = mean_confidence(detections.iter().map(|d| d.confidence));
        let detections = detections
            .into_iter()
            .enumerate()
            .map(|(idx, dto)| to_detection(&file_name, idx, dto, now))
            .collect();
        ProcessedImage {
            id: format!("img-{:04}", session.next_image_seq),
            original_url: self.original_url(&file_name),
            processed_url: self.processed_url(&file_name),
            file_name,
            detections,
            processed_at_ms: now,
            mean_confidence: mean,
        }
    }
}

fn to_detection(file_name: &str, idx: usize, dto: DetectionDto, now: u64) -> Detection {
    let id = dto
        .source_id()
        .unwrap_or_else(|| format!("{}#{}", file_name, idx));
    let bounding_box = match dto.bounding_box {
        Some(wire) => wire.to_pixel_box(),
        None => PixelBox::collapsed(wire_point_to_pixel(dto.location)),
    };
    Detection {
        id,
        confidence: dto.confidence,
        category: dto.category,
        area: dto.area,
        location: dto.location,
        bounding_box,
        mask: dto.segmentation.unwrap_or_default(),
        detected_at_ms: now,
    }
}

/// File name without its last extension (`a.b.png` -> `a.b`).
fn file_stem(file_name: &str) -> &str {
    match file_name.rfind('.') {
        Some(idx) if idx + 1 < file_name.len() && !file_name[idx + 1..].contains('/') => {
            &file_name[..idx]
        }
        _ => file_name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::message::parse_message;
    use crate::PixelPoint;

    fn session() -> StreamSession {
        StreamSession::new(SessionToken::from_string("test-token"))
    }

    fn reconciler() -> SessionReconciler {
        SessionReconciler::new("http://localhost:5000")
    }

    fn apply_line(r: &SessionReconciler, s: &mut StreamSession, line: &str) -> Vec<SessionEvent> {
        r.apply(s, parse_message(line).unwrap())
    }

    #[test]
    fn completion_is_idempotent() {
        let r = reconciler();
        let mut s = session();
        let first = apply_line(&r, &mut s, r#"{"completed":true,"totalDetections":7}"#);
        assert_eq!(first, vec![SessionEvent::Completed { total_detections: 7 }]);
        let second = apply_line(&r, &mut s, r#"{"completed":true,"totalDetections":9}"#);
        assert!(second.is_empty());
        assert_eq!(s.status(), SessionStatus::Complete);
        assert_eq!(s.total_detections(), Some(7));
    }

    #[test]
    fn duplicate_file_name_keeps_first() {
        let r = reconciler();
        let mut s = session();
        apply_line(
            &r,
            &mut s,
            r#"{"image":"b.png","detections":[{"confidence":0.9,"type":"tyre","location":{"lat":1,"lng":2}}]}"#,
        );
        apply_line(&r, &mut s, r#"{"firstDetection":true}"#);
        let events = apply_line(
            &r,
            &mut s,
            r#"{"image":"b.png","detections":[{"confidence":0.1,"type":"bag","location":{"lat":3,"lng":4}},{"confidence":0.2,"type":"bag","location":{"lat":3,"lng":4}}]}"#,
        );
        assert_eq!(
            events,
            vec![SessionEvent::DuplicateDropped {
                file_name: "b.png".to_string()
            }]
        );
        assert_eq!(s.images().len(), 1);
        let img = s.image("b.png").unwrap();
        assert_eq!(img.detections.len(), 1);
        assert_eq!(img.detections[0].category, "tyre");
        assert!((img.mean_confidence - 0.9).abs() < 1e-12);
    }

    #[test]
    fn first_detection_fires_once() {
        let r = reconciler();
        let mut s = session();
        assert_eq!(
            apply_line(&r, &mut s, r#"{"firstDetection":true}"#),
            vec![SessionEvent::FirstDetection]
        );
        assert!(apply_line(&r, &mut s, r#"{"firstDetection":true}"#).is_empty());
        assert!(s.first_detection_seen());
    }

    #[test]
    fn server_error_retains_images() {
        let r = reconciler();
        let mut s = session();
        apply_line(&r, &mut s, r#"{"image":"a.png","detections":[]}"#);
        let events = apply_line(&r, &mut s, r#"{"error":"model unavailable"}"#);
        assert_eq!(
            events,
            vec![SessionEvent::Failed(SessionFailure::Server(
                "model unavailable".to_string()
            ))]
        );
        assert_eq!(s.status(), SessionStatus::Failed);
        assert_eq!(s.images().len(), 1);

        // Terminal status is final.
        let late = apply_line(&r, &mut s, r#"{"completed":true,"totalDetections":1}"#);
        assert_eq!(late, vec![SessionEvent::IgnoredAfterTerminal { kind: "completed" }]);
        assert!(!s.completed());
        assert_eq!(s.total_detections(), None);

        let late = apply_line(&r, &mut s, r#"{"firstDetection":true}"#);
        assert_eq!(
            late,
            vec![SessionEvent::IgnoredAfterTerminal {
                kind: "first_detection"
            }]
        );
        assert!(!s.first_detection_seen());
    }

    #[test]
    fn missing_ids_and_boxes_are_synthesized() {
        let r = reconciler();
        let mut s = session();
        apply_line(
            &r,
            &mut s,
            r#"{"image":"site.tif","detections":[
                {"confidence":0.5,"type":"tyre","location":{"lat":40,"lng":30}},
                {"id":"d-2","confidence":0.7,"type":"tyre","location":{"lat":0,"lng":0},
                 "boundingBox":{"topLeft":{"lat":1,"lng":2},"bottomRight":{"lat":11,"lng":22}}}
            ]}"#,
        );
        let img = s.image("site.tif").unwrap();
        assert_eq!(img.detections[0].id, "site.tif#0");
        assert_eq!(
            img.detections[0].bounding_box,
            PixelBox::collapsed(PixelPoint::new(30.0, 40.0))
        );
        assert!(img.detections[0].mask.is_empty());
        assert_eq!(img.detections[1].id, "d-2");
        assert_eq!(img.detections[1].bounding_box.width(), 20.0);
        assert!((img.mean_confidence - 0.6).abs() < 1e-12);
        assert_eq!(img.original_url, "http://localhost:5000/images/site.tif");
        assert_eq!(
            img.processed_url,
            "http://localhost:5000/outputs/site_annotated.png"
        );
    }

    #[test]
    fn completion_without_total_uses_accumulated_count() {
        let r = reconciler();
        let mut s = session();
        apply_line(
            &r,
            &mut s,
            r#"{"image":"a.png","detections":[{"confidence":0.5,"type":"x","location":{"lat":0,"lng":0}}]}"#,
        );
        let events = apply_line(&r, &mut s, r#"{"completed":true}"#);
        assert_eq!(events, vec![SessionEvent::Completed { total_detections: 1 }]);
    }

    #[test]
    fn invalid_total_falls_back_to_accumulated_count() {
        let r = reconciler();
        let mut s = session();
        apply_line(
            &r,
            &mut s,
            r#"{"image":"a.png","detections":[{"confidence":0.5,"type":"x","location":{"lat":0,"lng":0}}]}"#,
        );
        let events = apply_line(&r, &mut s, r#"{"completed":true,"totalDetections":-4}"#);
        assert_eq!(events, vec![SessionEvent::Completed { total_detections: 1 }]);
        assert!(s.completed());
    }

    #[test]
    fn images_after_completion_are_kept() {
        let r = reconciler();
        let mut s = session();
        apply_line(&r, &mut s, r#"{"completed":true,"totalDetections":0}"#);
        apply_line(&r, &mut s, r#"{"image":"late.png","detections":[]}"#);
        assert_eq!(s.images().len(), 1);
        assert_eq!(s.status(), SessionStatus::Complete);
    }

    #[test]
    fn stems_follow_last_extension() {
        assert_eq!(file_stem("a.png"), "a");
        assert_eq!(file_stem("a.b.tiff"), "a.b");
        assert_eq!(file_stem("noext"), "noext");
        assert_eq!(file_stem("trailing."), "trailing.");
        assert_eq!(file_stem("dir.v2/file"), "dir.v2/file");
    }
}
