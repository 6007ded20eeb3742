//! Axis-aligned rectangle arithmetic.
//!
//! Rectangles are half-open, `[left, right) x [top, bottom)`. Nothing here
//! clamps: inverted or zero-area rectangles flow through unchanged and are
//! rejected (if at all) by the box validity checks downstream.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

impl Rect {
    #[must_use]
    pub const fn new(left: f32, top: f32, right: f32, bottom: f32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    #[must_use]
    pub fn width(&self) -> f32 {
        self.right - self.left
    }

    #[must_use]
    pub fn height(&self) -> f32 {
        self.bottom - self.top
    }

    /// Width times height. Negative when the rectangle is inverted on one axis.
    #[must_use]
    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    #[must_use]
    pub fn scale(&self, sx: f32, sy: f32) -> Self {
        Self::new(
            self.left * sx,
            self.top * sy,
            self.right * sx,
            self.bottom * sy,
        )
    }

    #[must_use]
    pub fn translate(&self, dx: f32, dy: f32) -> Self {
        Self::new(
            self.left + dx,
            self.top + dy,
            self.right + dx,
            self.bottom + dy,
        )
    }

    /// Maps pixel coordinates into `[0, 1]` relative to a `w x h` frame.
    #[must_use]
    pub fn normalize(&self, w: f32, h: f32) -> Self {
        Self::new(self.left / w, self.top / h, self.right / w, self.bottom / h)
    }

    /// True when every edge lies in `[0, 1]`.
    #[must_use]
    pub fn is_within_unit_frame(&self) -> bool {
        [self.left, self.top, self.right, self.bottom]
            .iter()
            .all(|v| (0.0..=1.0).contains(v))
    }

    /// Bit-exact key used for value equality/hashing of observations.
    pub(crate) fn bits(&self) -> [u32; 4] {
        [
            self.left.to_bits(),
            self.top.to_bits(),
            self.right.to_bits(),
            self.bottom.to_bits(),
        ]
    }
}

/// Area of the overlap of `a` and `b`, 0 when they are disjoint.
#[must_use]
pub fn intersection_area(a: &Rect, b: &Rect) -> f32 {
    let w = a.right.min(b.right) - a.left.max(b.left);
    let h = a.bottom.min(b.bottom) - a.top.max(b.top);
    if w <= 0.0 || h <= 0.0 {
        return 0.0;
    }
    w * h
}

#[must_use]
pub fn union_area(a: &Rect, b: &Rect) -> f32 {
    a.area() + b.area() - intersection_area(a, b)
}

/// Intersection over union, in `[0, 1]`.
///
/// Two degenerate rectangles have no union; their IOU is 0.
#[must_use]
pub fn iou(a: &Rect, b: &Rect) -> f32 {
    let union = union_area(a, b);
    if union <= 0.0 {
        return 0.0;
    }
    (intersection_area(a, b) / union).clamp(0.0, 1.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: u32,
    pub y: u32,
}

/// Integer pixel rectangle in source-image space, `[left, right) x [top, bottom)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Region {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

impl Region {
    #[must_use]
    pub const fn new(left: u32, top: u32, right: u32, bottom: u32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    #[must_use]
    pub const fn width(&self) -> u32 {
        self.right.saturating_sub(self.left)
    }

    #[must_use]
    pub const fn height(&self) -> u32 {
        self.bottom.saturating_sub(self.top)
    }

    #[must_use]
    pub const fn location(&self) -> Point {
        Point {
            x: self.left,
            y: self.top,
        }
    }

    #[must_use]
    pub fn area(&self) -> u64 {
        u64::from(self.width()) * u64::from(self.height())
    }

    #[must_use]
    pub fn overlaps(&self, other: &Region) -> bool {
        self.left < other.right
            && other.left < self.right
            && self.top < other.bottom
            && other.top < self.bottom
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const TOLERANCE: f32 = 1e-3;

    #[test]
    fn scale_multiplies_edges() {
        let r = Rect::new(0.1, 0.2, 0.3, 0.4).scale(500.0, 600.0);
        assert!((r.left - 50.0).abs() < TOLERANCE);
        assert!((r.top - 120.0).abs() < TOLERANCE);
        assert!((r.right - 150.0).abs() < TOLERANCE);
        assert!((r.bottom - 240.0).abs() < TOLERANCE);
    }

    #[test]
    fn translate_offsets_edges() {
        let r = Rect::new(0.1, 0.2, 0.3, 0.4).translate(5.6, 7.8);
        assert!((r.left - 5.7).abs() < TOLERANCE);
        assert!((r.top - 8.0).abs() < TOLERANCE);
        assert!((r.right - 5.9).abs() < TOLERANCE);
        assert!((r.bottom - 8.2).abs() < TOLERANCE);
    }

    #[test]
    fn normalize_inverts_scale() {
        let r = Rect::new(30.0, 60.0, 150.0, 240.0).normalize(300.0, 300.0);
        assert_eq!(r, Rect::new(0.1, 0.2, 0.5, 0.8));
    }

    #[test]
    fn area_of_scaled_rect() {
        let r = Rect::new(0.1, 0.2, 0.3, 0.4).scale(500.0, 600.0);
        assert!((r.area() - 0.2 * 500.0 * 0.2 * 600.0).abs() < 0.1);
    }

    #[test]
    fn area_is_negative_for_inverted_rect() {
        assert!(Rect::new(2.0, 0.0, 1.0, 1.0).area() < 0.0);
    }

    #[test]
    fn touching_rects_do_not_intersect() {
        let a = Rect::new(1.0, 2.0, 3.0, 4.0);
        let b = Rect::new(3.0, 4.0, 5.0, 7.0);
        assert_eq!(intersection_area(&a, &b), 0.0);
        assert!((union_area(&a, &b) - 10.0).abs() < TOLERANCE);
        assert_eq!(iou(&a, &b), 0.0);
    }

    #[test]
    fn overlapping_rects() {
        let a = Rect::new(1.0, 2.0, 3.0, 4.0);
        let b = Rect::new(2.0, 3.0, 5.0, 7.0);
        assert!((intersection_area(&a, &b) - 1.0).abs() < TOLERANCE);
        assert!((union_area(&a, &b) - 15.0).abs() < TOLERANCE);
        assert_eq!(iou(&a, &b), 1.0 / 15.0);
    }

    #[test]
    fn half_overlap_is_exactly_one_half() {
        let a = Rect::new(0.0, 0.0, 6.0, 6.0);
        let b = Rect::new(2.0, 0.0, 8.0, 6.0);
        assert_eq!(intersection_area(&a, &b), 24.0);
        assert_eq!(union_area(&a, &b), 48.0);
        assert_eq!(iou(&a, &b), 0.5);
    }

    #[test]
    fn degenerate_rects_have_zero_iou() {
        let p = Rect::new(1.0, 1.0, 1.0, 1.0);
        assert_eq!(iou(&p, &p), 0.0);
    }

    #[test]
    fn region_dimensions() {
        let region = Region::new(600, 600, 650, 750);
        assert_eq!(region.width(), 50);
        assert_eq!(region.height(), 150);
        assert_eq!(region.location(), Point { x: 600, y: 600 });
        assert_eq!(region.area(), 7500);
    }

    fn arb_rect() -> impl Strategy<Value = Rect> {
        (-100.0f32..100.0, -100.0f32..100.0, 0.0f32..50.0, 0.0f32..50.0)
            .prop_map(|(x, y, w, h)| Rect::new(x, y, x + w, y + h))
    }

    proptest! {
        #[test]
        fn iou_is_symmetric(a in arb_rect(), b in arb_rect()) {
            prop_assert_eq!(iou(&a, &b), iou(&b, &a));
        }

        #[test]
        fn iou_is_bounded(a in arb_rect(), b in arb_rect()) {
            let v = iou(&a, &b);
            prop_assert!((0.0..=1.0).contains(&v));
        }

        #[test]
        fn iou_of_self_is_one(x in -100.0f32..100.0, y in -100.0f32..100.0, w in 0.5f32..50.0, h in 0.5f32..50.0) {
            let a = Rect::new(x, y, x + w, y + h);
            prop_assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
        }

        #[test]
        fn disjoint_rects_have_zero_iou(a in arb_rect(), gap in 0.5f32..10.0) {
            let b = a.translate(a.width() + gap, 0.0);
            prop_assert_eq!(iou(&a, &b), 0.0);
        }

        #[test]
        fn union_matches_inclusion_exclusion(a in arb_rect(), b in arb_rect()) {
            prop_assert_eq!(
                union_area(&a, &b),
                a.area() + b.area() - intersection_area(&a, &b)
            );
        }
    }
}
