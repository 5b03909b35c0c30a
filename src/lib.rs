//! Detection Viewer core
//!
//! This crate implements the two stateful halves of a detection viewer:
//! consuming a live stream of detection results, and projecting detection
//! geometry onto a displayed image.
//!
//! # Architecture
//!
//! Data flows in one direction:
//!
//! 1. **Decode**: network bytes are split into complete NDJSON lines, with the
//!    unterminated tail retained across chunks.
//! 2. **Parse**: each line becomes one `StreamMessage`; malformed lines are
//!    logged and skipped.
//! 3. **Reconcile**: messages are applied to the `StreamSession` in arrival
//!    order (dedup by file name, one-shot milestones, terminal finality).
//! 4. **Project**: detections of a `ProcessedImage` are mapped from native
//!    pixel space onto the current surface and turned into overlay elements.
//!
//! # Module Structure
//!
//! - `stream`: decoder, wire messages, reconciler, transport, controller
//! - `overlay`: geometry transform, dual-surface view state, overlay scene
//! - `config`: layered configuration (file, defaults, environment)
//! - Core types: Detection, ProcessedImage, pixel and geographic points

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

pub mod config;
pub mod overlay;
pub mod stream;

pub use overlay::{
    build_scene, ClipInset, DualSurface, LoadState, OverlayElement, OverlayOptions,
    OverlayRenderer, OverlayScene, Projection, Size, SurfaceKind, SurfacePoint, SurfaceRect,
    ViewMode, ViewSurfaceState,
};
pub use stream::{
    decode_chunk, parse_message, ControllerState, HttpTransport, LineDecoder, LogNotifier,
    Notice, Notifier, SessionEvent, SessionFailure, SessionReconciler, SessionSnapshot,
    SessionStatus, SessionToken, StartOutcome, StreamMessage, StreamRequest, StreamSession,
    StreamTransport, StreamingSessionController,
};

/// Milliseconds since the Unix epoch, saturating to 0 on a clock before 1970.
pub fn now_epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// -------------------- Coordinates --------------------

/// Geographic location attached to a detection. Informational only.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

/// A point in the original image's pixel space.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct PixelPoint {
    pub x: f64,
    pub y: f64,
}

impl PixelPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned box in native pixel space.
///
/// `bottom_right` is expected to be >= `top_left` on both axes. Malformed
/// boxes are kept as-is and yield zero or negative extents.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct PixelBox {
    pub top_left: PixelPoint,
    pub bottom_right: PixelPoint,
}

impl PixelBox {
    pub fn new(top_left: PixelPoint, bottom_right: PixelPoint) -> Self {
        Self {
            top_left,
            bottom_right,
        }
    }

    /// Zero-area box at a single point.
    pub fn collapsed(point: PixelPoint) -> Self {
        Self::new(point, point)
    }

    pub fn width(&self) -> f64 {
        self.bottom_right.x - self.top_left.x
    }

    pub fn height(&self) -> f64 {
        self.bottom_right.y - self.top_left.y
    }

    pub fn is_degenerate(&self) -> bool {
        !(self.width() > 0.0 && self.height() > 0.0)
    }
}

// -------------------- Detections --------------------

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Detection {
    /// Unique within one image.
    pub id: String,
    /// Detector confidence (0.0-1.0).
    pub confidence: f64,
    /// Category label, e.g. "FULL container".
    pub category: String,
    /// Area reported by the detector (informational).
    #[serde(default)]
    pub area: f64,
    pub location: GeoPoint,
    pub bounding_box: PixelBox,
    /// Polygon mask rings, each flattened as `[x1, y1, x2, y2, ...]`.
    #[serde(default)]
    pub mask: Vec<Vec<f64>>,
    pub detected_at_ms: u64,
}

/// Fewest points a mask ring needs to be drawn as a polygon.
pub const MIN_MASK_POINTS: usize = 3;

impl Detection {
    /// Confidence as a whole percentage, rounded to nearest.
    pub fn confidence_percent(&self) -> i64 {
        (self.confidence * 100.0).round() as i64
    }

    /// True when at least one ring has enough points to enclose an area.
    pub fn has_mask(&self) -> bool {
        self.mask.iter().any(|ring| ring.len() / 2 >= MIN_MASK_POINTS)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ProcessedImage {
    pub id: String,
    pub file_name: String,
    pub original_url: String,
    pub processed_url: String,
    /// In arrival order.
    pub detections: Vec<Detection>,
    pub processed_at_ms: u64,
    pub mean_confidence: f64,
}

impl ProcessedImage {
    /// Distinct categories in first-seen order.
    pub fn categories(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for det in &self.detections {
            if !out.contains(&det.category.as_str()) {
                out.push(det.category.as_str());
            }
        }
        out
    }

    /// Detections matching an optional category filter.
    pub fn detections_in<'a>(
        &'a self,
        category: Option<&'a str>,
    ) -> impl Iterator<Item = &'a Detection> + 'a {
        self.detections
            .iter()
            .filter(move |det| category.map_or(true, |c| det.category == c))
    }
}

/// Arithmetic mean of the given confidences, 0 when empty.
pub fn mean_confidence<I>(confidences: I) -> f64
where
    I: IntoIterator<Item = f64>,
{
    let (sum, count) = confidences
        .into_iter()
        .fold((0.0, 0usize), |(sum, count), c| (sum + c, count + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}
