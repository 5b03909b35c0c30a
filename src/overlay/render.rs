//! Overlay scene construction.
//!
//! A scene is a flat list of masks, boxes and labels in surface space, always
//! relative to the full container. The split divider only clips the scene; it
//! never shifts coordinates.

use std::fmt::Write as _;

use super::surface::{ClipInset, ViewMode, ViewSurfaceState};
use super::transform::{Projection, Size, SurfacePoint, SurfaceRect};
use crate::{Detection, ProcessedImage, MIN_MASK_POINTS};

pub const DEFAULT_LABEL_HEIGHT: f64 = 24.0;
pub const DEFAULT_MIN_LABEL_WIDTH: f64 = 150.0;

const MASK_FILL: &str = "rgba(255, 0, 0, 0.3)";
const BOX_STROKE: &str = "rgb(59, 130, 246)";
const BOX_STROKE_WIDTH: f64 = 2.0;

#[derive(Clone, Debug, PartialEq)]
pub struct OverlayOptions {
    pub show_masks: bool,
    /// Only detections of this category are drawn.
    pub selected_category: Option<String>,
    /// Draw zero-area boxes (synthesized from a point location).
    pub render_degenerate_boxes: bool,
    pub label_height: f64,
    pub min_label_width: f64,
}

impl Default for OverlayOptions {
    fn default() -> Self {
        Self {
            show_masks: true,
            selected_category: None,
            render_degenerate_boxes: false,
            label_height: DEFAULT_LABEL_HEIGHT,
            min_label_width: DEFAULT_MIN_LABEL_WIDTH,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum OverlayElement {
    Mask {
        detection_id: String,
        points: Vec<SurfacePoint>,
    },
    Box {
        detection_id: String,
        rect: SurfaceRect,
    },
    Label {
        detection_id: String,
        category: String,
        text: String,
        rect: SurfaceRect,
    },
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct OverlayScene {
    pub container: Size,
    pub projection: Option<Projection>,
    /// Visible part of the processed surface, when it is partly hidden.
    pub clip: Option<ClipInset>,
    pub elements: Vec<OverlayElement>,
}

impl OverlayScene {
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Category of the topmost label under `point`.
    pub fn label_at(&self, point: SurfacePoint) -> Option<&str> {
        self.elements.iter().rev().find_map(|el| match el {
            OverlayElement::Label { category, rect, .. } if rect.contains(point) => {
                Some(category.as_str())
            }
            _ => None,
        })
    }

    pub fn to_svg(&self) -> String {
        let (w, h) = (self.container.width, self.container.height);
        let mut out = String::new();
        let _ = writeln!(
            out,
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}">"#
        );
        let clipped = match self.clip {
            Some(clip) => {
                let r = clip.visible_rect(self.container);
                let _ = writeln!(
                    out,
                    r#"  <defs><clipPath id="processed-clip"><rect x="{}" y="{}" width="{}" height="{}"/></clipPath></defs>"#,
                    r.x, r.y, r.width, r.height
                );
                out.push_str("  <g clip-path=\"url(#processed-clip)\">\n");
                true
            }
            None => false,
        };
        for element in &self.elements {
            match element {
                OverlayElement::Mask { points, .. } => {
                    let pts: Vec<String> =
                        points.iter().map(|p| format!("{},{}", p.x, p.y)).collect();
                    let _ = writeln!(
                        out,
                        r#"  <polygon points="{}" fill="{}"/>"#,
                        pts.join(" "),
                        MASK_FILL
                    );
                }
                OverlayElement::Box { rect, .. } => {
                    let _ = writeln!(
                        out,
                        r#"  <rect x="{}" y="{}" width="{}" height="{}" stroke="{}" stroke-width="{}" fill="none"/>"#,
                        rect.x,
                        rect.y,
                        rect.width.max(0.0),
                        rect.height.max(0.0),
                        BOX_STROKE,
                        BOX_STROKE_WIDTH
                    );
                }
                OverlayElement::Label { text, rect, .. } => {
                    let _ = writeln!(
                        out,
                        r#"  <g><rect x="{}" y="{}" width="{}" height="{}" fill="{}"/><text x="{}" y="{}" font-size="12" fill="white">{}</text></g>"#,
                        rect.x,
                        rect.y,
                        rect.width,
                        rect.height,
                        BOX_STROKE,
                        rect.x + 8.0,
                        rect.y + rect.height - 8.0,
                        escape_xml(text)
                    );
                }
            }
        }
        if clipped {
            out.push_str("  </g>\n");
        }
        out.push_str("</svg>\n");
        out
    }
}

fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

/// Label text shown above a box, e.g. `FULL container (87%)`.
pub fn label_text(detection: &Detection) -> String {
    format!(
        "{} ({}%)",
        detection.category,
        detection.confidence_percent()
    )
}

/// Build the overlay for one view of an image's detections.
///
/// Returns an empty scene while nothing can be drawn: original-only mode,
/// unknown natural size or a zero-width container.
pub fn build_scene(
    view: &ViewSurfaceState,
    detections: &[Detection],
    options: &OverlayOptions,
) -> OverlayScene {
    let mut scene = OverlayScene {
        container: view.container,
        ..OverlayScene::default()
    };
    if view.mode == ViewMode::Original || view.container.width <= 0.0 {
        return scene;
    }
    let Some(projection) = view
        .natural
        .and_then(|natural| Projection::contain(natural, view.container))
    else {
        return scene;
    };
    scene.projection = Some(projection);
    if view.mode == ViewMode::Split {
        scene.clip = Some(ClipInset {
            left: view.split_position,
            ..ClipInset::NONE
        });
    }

    let selected = options.selected_category.as_deref();
    for det in detections
        .iter()
        .filter(|d| selected.map_or(true, |c| d.category == c))
    {
        if options.show_masks {
            for ring in &det.mask {
                let points = projection.project_ring(ring);
                if points.len() < MIN_MASK_POINTS {
                    continue;
                }
                scene.elements.push(OverlayElement::Mask {
                    detection_id: det.id.clone(),
                    points,
                });
            }
        }

        let rect = projection.project_box(&det.bounding_box);
        if options.render_degenerate_boxes || !det.bounding_box.is_degenerate() {
            scene.elements.push(OverlayElement::Box {
                detection_id: det.id.clone(),
                rect,
            });
        }
        scene.elements.push(OverlayElement::Label {
            detection_id: det.id.clone(),
            category: det.category.clone(),
            text: label_text(det),
            rect: SurfaceRect {
                x: rect.x,
                y: rect.y - options.label_height,
                width: rect.width.max(options.min_label_width),
                height: options.label_height,
            },
        });
    }
    scene
}

/// Everything a scene depends on. Image ids restart with every session, so
/// the image is identified by its locator and detections as well.
#[derive(Clone, Debug, PartialEq)]
struct SceneKey {
    view: ViewSurfaceState,
    image_id: String,
    file_name: String,
    processed_url: String,
    detections: Vec<Detection>,
    options: OverlayOptions,
}

impl SceneKey {
    fn new(view: &ViewSurfaceState, image: &ProcessedImage, options: &OverlayOptions) -> Self {
        Self {
            view: *view,
            image_id: image.id.clone(),
            file_name: image.file_name.clone(),
            processed_url: image.processed_url.clone(),
            detections: image.detections.clone(),
            options: options.clone(),
        }
    }
}

/// Owns overlay options and recomputes the scene whenever an input changes.
#[derive(Debug, Default)]
pub struct OverlayRenderer {
    options: OverlayOptions,
    key: Option<SceneKey>,
    scene: OverlayScene,
    recomputes: u64,
}

impl OverlayRenderer {
    pub fn new(options: OverlayOptions) -> Self {
        Self {
            options,
            ..Self::default()
        }
    }

    pub fn options(&self) -> &OverlayOptions {
        &self.options
    }

    pub fn set_show_masks(&mut self, show: bool) {
        self.options.show_masks = show;
    }

    pub fn toggle_masks(&mut self) -> bool {
        self.options.show_masks = !self.options.show_masks;
        self.options.show_masks
    }

    pub fn select_category(&mut self, category: Option<String>) {
        self.options.selected_category = category;
    }

    pub fn clear_filter(&mut self) {
        self.options.selected_category = None;
    }

    /// Scene for `image` under `view`, reusing the last one if nothing changed.
    pub fn render(&mut self, view: &ViewSurfaceState, image: &ProcessedImage) -> &OverlayScene {
        let key = SceneKey::new(view, image, &self.options);
        if self.key.as_ref() != Some(&key) {
            self.scene = build_scene(view, &image.detections, &self.options);
            self.key = Some(key);
            self.recomputes += 1;
        }
        &self.scene
    }

    /// Drop the cached scene, e.g. while the container is being re-measured.
    pub fn invalidate(&mut self) {
        self.key = None;
        self.scene = OverlayScene::default();
    }

    pub fn scene(&self) -> &OverlayScene {
        &self.scene
    }

    /// Number of times a scene was actually built.
    pub fn recomputes(&self) -> u64 {
        self.recomputes
    }

    /// Select the category of the label under `point`, if any.
    pub fn click(&mut self, point: SurfacePoint) -> bool {
        let Some(category) = self.scene.label_at(point).map(str::to_string) else {
            return false;
        };
        log::debug!("category filter set to {}", category);
        self.options.selected_category = Some(category);
        true
    }
}
