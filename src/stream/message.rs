//! Wire messages carried on the detection stream.
//!
//! Each line of the response body is one JSON object shaped as one of:
//! `{ "error": "..." }`, `{ "firstDetection": true }`,
//! `{ "completed": true, "totalDetections": N }` or
//! `{ "image": "name.png", "detections": [...] }`.

use anyhow::{anyhow, Result};
use serde::Deserialize;
use serde_json::Value;

use crate::{GeoPoint, PixelBox, PixelPoint};

/// One decoded stream message.
#[derive(Clone, Debug, PartialEq)]
pub enum StreamMessage {
    Error { message: String },
    FirstDetection,
    Completed { total_detections: Option<u64> },
    ImageResult {
        image: String,
        detections: Vec<DetectionDto>,
    },
}

impl StreamMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            StreamMessage::Error { .. } => "error",
            StreamMessage::FirstDetection => "first_detection",
            StreamMessage::Completed { .. } => "completed",
            StreamMessage::ImageResult { .. } => "image_result",
        }
    }
}

/// Detection as it appears on the wire.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct DetectionDto {
    /// String or number; absent on some producers.
    #[serde(default)]
    pub id: Option<Value>,

    pub confidence: f64,

    /// Category label.
    #[serde(rename = "type")]
    pub category: String,

    #[serde(default)]
    pub area: f64,

    pub location: GeoPoint,

    #[serde(default, rename = "boundingBox")]
    pub bounding_box: Option<WireBox>,

    /// Flattened polygon rings.
    #[serde(default)]
    pub segmentation: Option<Vec<Vec<f64>>>,
}

/// Bounding box on the wire. Pixel coordinates travel in `{lat, lng}`
/// objects: `lat` carries y and `lng` carries x.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq)]
pub struct WireBox {
    #[serde(rename = "topLeft")]
    pub top_left: GeoPoint,
    #[serde(rename = "bottomRight")]
    pub bottom_right: GeoPoint,
}

impl WireBox {
    pub fn to_pixel_box(self) -> PixelBox {
        PixelBox::new(
            wire_point_to_pixel(self.top_left),
            wire_point_to_pixel(self.bottom_right),
        )
    }
}

/// Map a wire `{lat, lng}` pair onto pixel space (`x = lng`, `y = lat`).
pub fn wire_point_to_pixel(point: GeoPoint) -> PixelPoint {
    PixelPoint::new(point.lng, point.lat)
}

impl DetectionDto {
    /// Source identifier rendered as a string, if one was supplied.
    pub fn source_id(&self) -> Option<String> {
        match self.id.as_ref()? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    #[serde(default)]
    error: Option<Value>,
    #[serde(default, rename = "firstDetection")]
    first_detection: Option<Value>,
    #[serde(default)]
    completed: Option<Value>,
    #[serde(default, rename = "totalDetections")]
    total_detections: Option<Value>,
    #[serde(default)]
    image: Option<String>,
    #[serde(default)]
    detections: Option<Vec<DetectionDto>>,
}

/// Parse one NDJSON line into a `StreamMessage`.
///
/// Classification order: error, first-detection, completion, image result.
/// A line matching none of them is an error.
pub fn parse_message(line: &str) -> Result<StreamMessage> {
    let raw: RawMessage = serde_json::from_str(line).map_err(|e| anyhow!("parse error: {}", e))?;

    if let Some(message) = raw.error.as_ref().and_then(error_text) {
        return Ok(StreamMessage::Error { message });
    }
    if raw.first_detection.as_ref().is_some_and(truthy) {
        return Ok(StreamMessage::FirstDetection);
    }
    if raw.completed.as_ref().is_some_and(truthy) {
        return Ok(StreamMessage::Completed {
            total_detections: raw.total_detections.as_ref().and_then(detection_count),
        });
    }

    let image = raw
        .image
        .filter(|name| !name.is_empty())
        .ok_or_else(|| anyhow!("message has no recognised kind"))?;
    let detections = raw
        .detections
        .ok_or_else(|| anyhow!("image result '{}' missing detections", image))?;
    Ok(StreamMessage::ImageResult { image, detections })
}

fn error_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Null | Value::Bool(false) | Value::String(_) => None,
        other => Some(other.to_string()),
    }
}

/// A count sent as a non-negative integer, possibly written as `2.0`.
/// Anything else is treated as absent.
fn detection_count(value: &Value) -> Option<u64> {
    let count = match value {
        Value::Null => return None,
        Value::Number(n) => n.as_u64().or_else(|| {
            n.as_f64()
                .filter(|v| {
                    v.is_finite() && *v >= 0.0 && v.fract() == 0.0 && *v <= u64::MAX as f64
                })
                .map(|v| v as u64)
        }),
        _ => None,
    };
    if count.is_none() {
        log::warn!("ignoring invalid totalDetections value {}", value);
    }
    count
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Null => false,
        Value::Number(n) => n.as_f64().is_some_and(|v| v != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const IMAGE_RESULT: &str = r#"{
        "image": "site_04.png",
        "detections": [
            {
                "id": 3,
                "confidence": 0.87,
                "type": "FULL container",
                "area": 12.5,
                "location": {"lat": 34.05, "lng": -118.24},
                "boundingBox": {
                    "topLeft": {"lat": 20.0, "lng": 10.0},
                    "bottomRight": {"lat": 60.0, "lng": 90.0}
                },
                "segmentation": [[10.0, 20.0, 90.0, 20.0, 90.0, 60.0]]
            },
            {
                "confidence": 0.4,
                "type": "EMPTY container",
                "location": {"lat": 5.0, "lng": 7.0}
            }
        ]
    }"#;

    #[test]
    fn parse_image_result() {
        let msg = parse_message(IMAGE_RESULT).unwrap();
        let StreamMessage::ImageResult { image, detections } = msg else {
            panic!("expected image result");
        };
        assert_eq!(image, "site_04.png");
        assert_eq!(detections.len(), 2);

        let first = &detections[0];
        assert_eq!(first.source_id().as_deref(), Some("3"));
        assert_eq!(first.category, "FULL container");
        let bbox = first.bounding_box.unwrap().to_pixel_box();
        assert_eq!(bbox.top_left, PixelPoint::new(10.0, 20.0));
        assert_eq!(bbox.bottom_right, PixelPoint::new(90.0, 60.0));

        let second = &detections[1];
        assert_eq!(second.source_id(), None);
        assert!(second.bounding_box.is_none());
        assert!(second.segmentation.is_none());
        assert_eq!(second.area, 0.0);
    }

    #[test]
    fn parse_control_messages() {
        assert_eq!(
            parse_message(r#"{"error":"model crashed"}"#).unwrap(),
            StreamMessage::Error {
                message: "model crashed".to_string()
            }
        );
        assert_eq!(
            parse_message(r#"{"firstDetection":true}"#).unwrap(),
            StreamMessage::FirstDetection
        );
        assert_eq!(
            parse_message(r#"{"completed":true,"totalDetections":12}"#).unwrap(),
            StreamMessage::Completed {
                total_detections: Some(12)
            }
        );
        assert_eq!(
            parse_message(r#"{"completed":true}"#).unwrap(),
            StreamMessage::Completed {
                total_detections: None
            }
        );
    }

    #[test]
    fn completion_total_tolerates_float_and_rejects_invalid() {
        let total = |line: &str| match parse_message(line).unwrap() {
            StreamMessage::Completed { total_detections } => total_detections,
            other => panic!("expected completion, got {:?}", other),
        };
        assert_eq!(total(r#"{"completed":true,"totalDetections":2.0}"#), Some(2));
        assert_eq!(total(r#"{"completed":true,"totalDetections":-1}"#), None);
        assert_eq!(total(r#"{"completed":true,"totalDetections":2.5}"#), None);
        assert_eq!(total(r#"{"completed":true,"totalDetections":"7"}"#), None);
        assert_eq!(total(r#"{"completed":true,"totalDetections":null}"#), None);
    }

    #[test]
    fn error_takes_precedence() {
        let msg = parse_message(r#"{"error":"boom","completed":true}"#).unwrap();
        assert_eq!(msg.kind(), "error");
    }

    #[test]
    fn empty_error_and_false_flags_fall_through() {
        let msg =
            parse_message(r#"{"error":"","firstDetection":false,"image":"x.png","detections":[]}"#)
                .unwrap();
        assert_eq!(msg.kind(), "image_result");
    }

    #[test]
    fn malformed_lines_are_rejected() {
        assert!(parse_message(r#"{"firstDetection":tr"#).is_err());
        assert!(parse_message(r#"{"hello":"world"}"#).is_err());
        assert!(parse_message(r#"{"image":"a.png"}"#)
            .unwrap_err()
            .to_string()
            .contains("missing detections"));
        assert!(parse_message(r#"[1,2,3]"#).is_err());
    }
}
