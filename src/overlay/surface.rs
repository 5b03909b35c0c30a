//! Original/processed image pair sharing one container.
//!
//! Each surface moves `Loading -> Loaded | Failed` exactly once per image.
//! The container can show either surface alone or both side by side with a
//! draggable divider.

use serde::{Deserialize, Serialize};

use super::loader::load_dimensions;
use super::transform::{Size, SurfaceRect};

pub const DEFAULT_SPLIT_POSITION: f64 = 50.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SurfaceKind {
    Original,
    Processed,
}

impl SurfaceKind {
    fn failure_message(self) -> &'static str {
        match self {
            SurfaceKind::Original => "Failed to load original image.",
            SurfaceKind::Processed => "Failed to load processed image.",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum LoadState {
    Loading,
    Loaded(Size),
    Failed(String),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewMode {
    Original,
    #[default]
    Processed,
    Split,
}

impl std::str::FromStr for ViewMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "original" => Ok(ViewMode::Original),
            "processed" => Ok(ViewMode::Processed),
            "split" => Ok(ViewMode::Split),
            other => Err(anyhow::anyhow!("unknown view mode: {}", other)),
        }
    }
}

/// Clip insets in percent of the container, CSS `inset()` order.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ClipInset {
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
    pub left: f64,
}

impl ClipInset {
    pub const NONE: ClipInset = ClipInset {
        top: 0.0,
        right: 0.0,
        bottom: 0.0,
        left: 0.0,
    };

    fn from_right(pct: f64) -> Self {
        Self {
            right: pct,
            ..Self::NONE
        }
    }

    fn from_left(pct: f64) -> Self {
        Self {
            left: pct,
            ..Self::NONE
        }
    }

    pub fn to_css(&self) -> String {
        if *self == Self::NONE {
            return "inset(0)".to_string();
        }
        let side = |v: f64| {
            if v == 0.0 {
                "0".to_string()
            } else {
                format!("{}%", v)
            }
        };
        format!(
            "inset({} {} {} {})",
            side(self.top),
            side(self.right),
            side(self.bottom),
            side(self.left)
        )
    }

    /// Visible part of a container of the given size.
    pub fn visible_rect(&self, container: Size) -> SurfaceRect {
        let x = container.width * self.left / 100.0;
        let y = container.height * self.top / 100.0;
        SurfaceRect {
            x,
            y,
            width: (container.width * (100.0 - self.left - self.right) / 100.0).max(0.0),
            height: (container.height * (100.0 - self.top - self.bottom) / 100.0).max(0.0),
        }
    }
}

/// Inputs the overlay needs from the surface pair.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ViewSurfaceState {
    pub mode: ViewMode,
    /// Divider position, percent of container width.
    pub split_position: f64,
    /// Natural size of the processed image, once loaded.
    pub natural: Option<Size>,
    pub container: Size,
}

#[derive(Debug)]
pub struct DualSurface {
    mode: ViewMode,
    split_position: f64,
    original: LoadState,
    processed: LoadState,
    container: Size,
    fullscreen: bool,
    remeasure_pending: bool,
    dragging: bool,
}

impl DualSurface {
    pub fn new(container: Size) -> Self {
        Self {
            mode: ViewMode::default(),
            split_position: DEFAULT_SPLIT_POSITION,
            original: LoadState::Loading,
            processed: LoadState::Loading,
            container,
            fullscreen: false,
            remeasure_pending: false,
            dragging: false,
        }
    }

    pub fn mode(&self) -> ViewMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: ViewMode) {
        if mode != ViewMode::Split {
            self.dragging = false;
        }
        self.mode = mode;
    }

    pub fn split_position(&self) -> f64 {
        self.split_position
    }

    pub fn set_split_position(&mut self, pct: f64) {
        if pct.is_finite() {
            self.split_position = pct.clamp(0.0, 100.0);
        }
    }

    pub fn container(&self) -> Size {
        self.container
    }

    pub fn is_fullscreen(&self) -> bool {
        self.fullscreen
    }

    pub fn state(&self, kind: SurfaceKind) -> &LoadState {
        match kind {
            SurfaceKind::Original => &self.original,
            SurfaceKind::Processed => &self.processed,
        }
    }

    fn state_mut(&mut self, kind: SurfaceKind) -> &mut LoadState {
        match kind {
            SurfaceKind::Original => &mut self.original,
            SurfaceKind::Processed => &mut self.processed,
        }
    }

    /// Record a successful load. Ignored unless the surface is still loading.
    pub fn image_loaded(&mut self, kind: SurfaceKind, natural: Size) -> bool {
        let state = self.state_mut(kind);
        if *state != LoadState::Loading {
            log::debug!("late load callback for {:?} ignored", kind);
            return false;
        }
        *state = LoadState::Loaded(natural);
        true
    }

    /// Record a failed load. Ignored unless the surface is still loading.
    pub fn image_failed(&mut self, kind: SurfaceKind) -> bool {
        let state = self.state_mut(kind);
        if *state != LoadState::Loading {
            log::debug!("late error callback for {:?} ignored", kind);
            return false;
        }
        *state = LoadState::Failed(kind.failure_message().to_string());
        true
    }

    /// Probe `locator` and feed the result into the surface state machine.
    pub fn load(&mut self, kind: SurfaceKind, locator: &str) -> bool {
        match load_dimensions(locator) {
            Ok(size) => self.image_loaded(kind, size),
            Err(e) => {
                log::warn!("{:?} image {} failed to load: {:#}", kind, locator, e);
                self.image_failed(kind)
            }
        }
    }

    /// New image selected: both surfaces start loading again.
    pub fn reset(&mut self) {
        self.original = LoadState::Loading;
        self.processed = LoadState::Loading;
        self.dragging = false;
    }

    fn is_visible(&self, kind: SurfaceKind) -> bool {
        match kind {
            SurfaceKind::Original => self.mode != ViewMode::Processed,
            SurfaceKind::Processed => self.mode != ViewMode::Original,
        }
    }

    pub fn shows_loading(&self, kind: SurfaceKind) -> bool {
        self.is_visible(kind) && *self.state(kind) == LoadState::Loading
    }

    pub fn error_message(&self, kind: SurfaceKind) -> Option<&str> {
        match self.state(kind) {
            LoadState::Failed(msg) if self.is_visible(kind) => Some(msg.as_str()),
            _ => None,
        }
    }

    pub fn clip(&self, kind: SurfaceKind) -> ClipInset {
        match (kind, self.mode) {
            (SurfaceKind::Original, ViewMode::Split) => ClipInset::from_right(100.0 - self.split_position),
            (SurfaceKind::Original, ViewMode::Original) => ClipInset::NONE,
            (SurfaceKind::Original, ViewMode::Processed) => ClipInset::from_right(100.0),
            (SurfaceKind::Processed, ViewMode::Split) => ClipInset::from_left(self.split_position),
            (SurfaceKind::Processed, ViewMode::Processed) => ClipInset::NONE,
            (SurfaceKind::Processed, ViewMode::Original) => ClipInset::from_left(100.0),
        }
    }

    /// Start a divider drag. `x` is relative to the container's left edge.
    pub fn pointer_down(&mut self, x: f64) {
        if self.mode != ViewMode::Split || x < 0.0 || x > self.container.width {
            return;
        }
        self.dragging = true;
        self.drag_to(x);
    }

    /// Pointer motion; only moves the divider while the primary button is held.
    pub fn pointer_move(&mut self, x: f64, primary_held: bool) {
        if !self.dragging {
            return;
        }
        if !primary_held {
            self.dragging = false;
            return;
        }
        self.drag_to(x);
    }

    pub fn pointer_up(&mut self) {
        self.dragging = false;
    }

    pub fn is_dragging(&self) -> bool {
        self.dragging
    }

    fn drag_to(&mut self, x: f64) {
        if self.container.width > 0.0 {
            self.set_split_position(x / self.container.width * 100.0);
        }
    }

    /// Container resized; the observer reports the new size directly.
    pub fn resize(&mut self, container: Size) {
        self.container = container;
    }

    /// Enter or leave full screen. The container must be re-measured before
    /// the next overlay is computed.
    pub fn set_fullscreen(&mut self, fullscreen: bool) {
        if self.fullscreen != fullscreen {
            self.fullscreen = fullscreen;
            self.remeasure_pending = true;
        }
    }

    pub fn measure(&mut self, container: Size) {
        self.container = container;
        self.remeasure_pending = false;
    }

    pub fn remeasure_pending(&self) -> bool {
        self.remeasure_pending
    }

    /// Current overlay inputs, or `None` while the container size is stale.
    pub fn view_state(&self) -> Option<ViewSurfaceState> {
        if self.remeasure_pending {
            return None;
        }
        let natural = match self.processed {
            LoadState::Loaded(size) => Some(size),
            _ => None,
        };
        Some(ViewSurfaceState {
            mode: self.mode,
            split_position: self.split_position,
            natural,
            container: self.container,
        })
    }
}
