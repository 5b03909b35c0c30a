//! Detection geometry overlay.
//!
//! Detections live in the processed image's native pixel space; the overlay
//! is drawn in the container's surface space. `transform` maps between the
//! two, `surface` tracks what the container currently shows, and `render`
//! builds the scene.

pub mod loader;
pub mod render;
pub mod surface;
pub mod transform;

pub use loader::load_dimensions;
pub use render::{
    build_scene, label_text, OverlayElement, OverlayOptions, OverlayRenderer, OverlayScene,
};
pub use surface::{ClipInset, DualSurface, LoadState, SurfaceKind, ViewMode, ViewSurfaceState};
pub use transform::{Projection, Size, SurfacePoint, SurfaceRect};
