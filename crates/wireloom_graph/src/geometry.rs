// SPDX-License-Identifier: MIT OR Apache-2.0
//! Rectangles and hit-testing shared by nodes and groups.

use serde::{Deserialize, Serialize};

/// Axis-aligned rectangle as `[x, y, width, height]`
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "[f32; 4]", into = "[f32; 4]")]
pub struct Rect {
    /// Left edge
    pub x: f32,
    /// Top edge
    pub y: f32,
    /// Width
    pub width: f32,
    /// Height
    pub height: f32,
}

impl Rect {
    /// Create a rectangle
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    /// Whether the point lies inside (edges inclusive)
    pub fn contains(&self, x: f32, y: f32) -> bool {
        x >= self.x && x <= self.x + self.width && y >= self.y && y <= self.y + self.height
    }

    /// Whether the two rectangles intersect
    pub fn overlaps(&self, other: &Rect) -> bool {
        self.x < other.x + other.width
            && self.x + self.width > other.x
            && self.y < other.y + other.height
            && self.y + self.height > other.y
    }
}

impl From<[f32; 4]> for Rect {
    fn from([x, y, width, height]: [f32; 4]) -> Self {
        Self::new(x, y, width, height)
    }
}

impl From<Rect> for [f32; 4] {
    fn from(rect: Rect) -> Self {
        [rect.x, rect.y, rect.width, rect.height]
    }
}

/// Anything the canvas can hit-test against
pub trait Bounded {
    /// Bounding rectangle in graph space
    fn bounding(&self) -> Rect;

    /// Whether a graph-space point hits this item
    fn contains_point(&self, x: f32, y: f32) -> bool {
        self.bounding().contains(x, y)
    }

    /// Whether this item overlaps the given rectangle
    fn overlaps(&self, rect: &Rect) -> bool {
        self.bounding().overlaps(rect)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rect_contains_and_overlaps() {
        let a = Rect::new(0.0, 0.0, 10.0, 10.0);
        assert!(a.contains(10.0, 5.0));
        assert!(!a.contains(10.5, 5.0));
        assert!(a.overlaps(&Rect::new(5.0, 5.0, 10.0, 10.0)));
        assert!(!a.overlaps(&Rect::new(10.0, 0.0, 5.0, 5.0)));
    }
}
