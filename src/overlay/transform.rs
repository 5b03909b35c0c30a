//! Native pixel space to surface space.
//!
//! Images are displayed "contained": scaled uniformly to fit the container and
//! centred, leaving letterbox bars on one axis.

use serde::{Deserialize, Serialize};

use crate::{PixelBox, PixelPoint};

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

impl Size {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    /// Both extents finite and strictly positive.
    pub fn is_renderable(&self) -> bool {
        self.width.is_finite() && self.height.is_finite() && self.width > 0.0 && self.height > 0.0
    }
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct SurfacePoint {
    pub x: f64,
    pub y: f64,
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct SurfaceRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl SurfaceRect {
    pub fn contains(&self, point: SurfacePoint) -> bool {
        point.x >= self.x
            && point.x <= self.x + self.width
            && point.y >= self.y
            && point.y <= self.y + self.height
    }
}

/// Uniform scale plus letterbox offset.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Projection {
    pub scale: f64,
    pub offset_x: f64,
    pub offset_y: f64,
}

impl Projection {
    /// Fit `natural` inside `container`, preserving aspect ratio.
    ///
    /// Returns `None` until the natural size is known and non-zero.
    pub fn contain(natural: Size, container: Size) -> Option<Self> {
        if !natural.is_renderable() {
            return None;
        }
        let scale = (container.width / natural.width).min(container.height / natural.height);
        if !scale.is_finite() {
            return None;
        }
        Some(Self {
            scale,
            offset_x: (container.width - natural.width * scale) / 2.0,
            offset_y: (container.height - natural.height * scale) / 2.0,
        })
    }

    pub fn project_point(&self, p: PixelPoint) -> SurfacePoint {
        SurfacePoint {
            x: p.x * self.scale + self.offset_x,
            y: p.y * self.scale + self.offset_y,
        }
    }

    /// Inverse of `project_point`. Undefined for a zero scale.
    pub fn unproject_point(&self, p: SurfacePoint) -> PixelPoint {
        PixelPoint::new(
            (p.x - self.offset_x) / self.scale,
            (p.y - self.offset_y) / self.scale,
        )
    }

    pub fn project_box(&self, b: &PixelBox) -> SurfaceRect {
        let tl = self.project_point(b.top_left);
        SurfaceRect {
            x: tl.x,
            y: tl.y,
            width: b.width() * self.scale,
            height: b.height() * self.scale,
        }
    }

    /// Project a flattened `[x1, y1, x2, y2, ...]` ring.
    pub fn project_ring(&self, ring: &[f64]) -> Vec<SurfacePoint> {
        ring.chunks_exact(2)
            .map(|xy| self.project_point(PixelPoint::new(xy[0], xy[1])))
            .collect()
    }
}
