#![forbid(unsafe_code)]

//! Geometric primitives.

/// Client-space bounding box of an element.
///
/// Values are CSS pixels and may be fractional; pointer coordinates derived
/// from them are rounded before dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ElementDimensions {
    /// Top edge.
    pub top: f64,
    /// Left edge.
    pub left: f64,
    /// Width in pixels.
    pub width: f64,
    /// Height in pixels.
    pub height: f64,
}

impl ElementDimensions {
    /// Create a new box.
    #[inline]
    pub const fn new(left: f64, top: f64, width: f64, height: f64) -> Self {
        Self {
            top,
            left,
            width,
            height,
        }
    }

    /// Right edge (exclusive).
    #[inline]
    pub fn right(&self) -> f64 {
        self.left + self.width
    }

    /// Bottom edge (exclusive).
    #[inline]
    pub fn bottom(&self) -> f64 {
        self.top + self.height
    }

    /// Resolve an element-relative offset into rounded client coordinates.
    #[must_use]
    pub fn client_point(&self, relative_x: f64, relative_y: f64) -> (i32, i32) {
        (
            (self.left + relative_x).round() as i32,
            (self.top + relative_y).round() as i32,
        )
    }

    /// Rounded client coordinates of the box center.
    #[must_use]
    pub fn center(&self) -> (i32, i32) {
        self.client_point(self.width / 2.0, self.height / 2.0)
    }

    /// Whether the client point lies inside the box.
    #[must_use]
    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.left && x < self.right() && y >= self.top && y < self.bottom()
    }
}
