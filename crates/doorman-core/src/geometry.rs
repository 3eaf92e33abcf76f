//! Axis-aligned box math in model-input pixel space.

use serde::{Deserialize, Serialize};

/// Corner-form face box, in pixels of the detector's input square.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceBox {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

impl FaceBox {
    pub fn new(left: f32, top: f32, right: f32, bottom: f32) -> Self {
        Self { left, top, right, bottom }
    }

    /// Build a corner-form box from center-form `(cx, cy, w, h)`.
    pub fn from_center(cx: f32, cy: f32, w: f32, h: f32) -> Self {
        Self {
            left: cx - w / 2.0,
            top: cy - h / 2.0,
            right: cx + w / 2.0,
            bottom: cy + h / 2.0,
        }
    }

    pub fn width(&self) -> f32 {
        self.right - self.left
    }

    pub fn height(&self) -> f32 {
        self.bottom - self.top
    }

    /// Area, treating inverted boxes as empty.
    pub fn area(&self) -> f32 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    pub fn center(&self) -> (f32, f32) {
        ((self.left + self.right) / 2.0, (self.top + self.bottom) / 2.0)
    }

    /// Clamp every coordinate into `[0, size]`.
    pub fn clamp_to(&self, size: f32) -> Self {
        Self {
            left: self.left.clamp(0.0, size),
            top: self.top.clamp(0.0, size),
            right: self.right.clamp(0.0, size),
            bottom: self.bottom.clamp(0.0, size),
        }
    }

    /// Grow the box about its center so each side gains `margin` of the
    /// original extent: final size = original × (1 + 2 × margin).
    pub fn expand(&self, margin: f32) -> Self {
        let (cx, cy) = self.center();
        let w = self.width() * (1.0 + 2.0 * margin);
        let h = self.height() * (1.0 + 2.0 * margin);
        Self::from_center(cx, cy, w, h)
    }

    /// Overlapping area with `other` (zero when disjoint).
    pub fn intersection_area(&self, other: &FaceBox) -> f32 {
        let w = (self.right.min(other.right) - self.left.max(other.left)).max(0.0);
        let h = (self.bottom.min(other.bottom) - self.top.max(other.top)).max(0.0);
        w * h
    }

    /// Intersection-over-Union. Zero when the union is empty.
    pub fn iou(&self, other: &FaceBox) -> f32 {
        let inter = self.intersection_area(other);
        let union = self.area() + other.area() - inter;
        if union > 0.0 {
            inter / union
        } else {
            0.0
        }
    }

    /// Remap from one coordinate space to another with per-axis scale factors.
    pub fn scale(&self, sx: f32, sy: f32) -> Self {
        Self {
            left: self.left * sx,
            top: self.top * sy,
            right: self.right * sx,
            bottom: self.bottom * sy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_center() {
        let b = FaceBox::from_center(64.0, 64.0, 38.4, 38.4);
        assert!((b.left - 44.8).abs() < 1e-4);
        assert!((b.bottom - 83.2).abs() < 1e-4);
    }

    #[test]
    fn test_iou_identical() {
        let a = FaceBox::new(0.0, 0.0, 100.0, 100.0);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_no_overlap() {
        let a = FaceBox::new(0.0, 0.0, 10.0, 10.0);
        let b = FaceBox::new(20.0, 20.0, 30.0, 30.0);
        assert!(a.iou(&b).abs() < 1e-6);
    }

    #[test]
    fn test_iou_partial() {
        let a = FaceBox::new(0.0, 0.0, 10.0, 10.0);
        let b = FaceBox::new(5.0, 0.0, 15.0, 10.0);
        // Overlap: 5x10 = 50, union: 100+100-50 = 150
        assert!((a.iou(&b) - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_zero_area() {
        let a = FaceBox::new(5.0, 5.0, 5.0, 5.0);
        assert_eq!(a.iou(&a), 0.0);
    }

    #[test]
    fn test_expand_keeps_center() {
        let b = FaceBox::new(40.0, 40.0, 60.0, 80.0);
        let e = b.expand(0.5);
        assert_eq!(e.center(), b.center());
        assert!((e.width() - 40.0).abs() < 1e-6);
        assert!((e.height() - 80.0).abs() < 1e-6);
    }

    #[test]
    fn test_clamp_to() {
        let b = FaceBox::new(-10.0, 5.0, 140.0, 200.0).clamp_to(128.0);
        assert_eq!(b, FaceBox::new(0.0, 5.0, 128.0, 128.0));
    }
}
