//! Axis-aligned bounding box geometry.
//!
//! Boxes are integer pixel rectangles as produced by the detector. Functions
//! taking `Option<&BoundingBox>` treat an absent box as a valid input and
//! return a sentinel instead of failing.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default vertical displacement, in pixels, above which a box is moving
pub const DEFAULT_MOVEMENT_THRESHOLD_PX: i32 = 50;

/// Largest coordinate magnitude a box may carry
pub const MAX_COORDINATE: i32 = 1 << 24;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum GeometryError {
    #[error("Degenerate box ({x1}, {y1}, {x2}, {y2}): requires x2 > x1 and y2 > y1")]
    Degenerate { x1: i32, y1: i32, x2: i32, y2: i32 },

    #[error("Coordinate outside ±{limit}")]
    OutOfRange { limit: i32 },
}

/// Rectangle with top-left `(x1, y1)` and bottom-right `(x2, y2)` corners
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BoundingBox {
    x1: i32,
    y1: i32,
    x2: i32,
    y2: i32,
}

impl BoundingBox {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Result<Self, GeometryError> {
        let range = -MAX_COORDINATE..=MAX_COORDINATE;
        if [x1, y1, x2, y2].iter().any(|c| !range.contains(c)) {
            return Err(GeometryError::OutOfRange {
                limit: MAX_COORDINATE,
            });
        }
        if x2 <= x1 || y2 <= y1 {
            return Err(GeometryError::Degenerate { x1, y1, x2, y2 });
        }
        Ok(Self { x1, y1, x2, y2 })
    }

    /// Build from detector output `[x1, y1, x2, y2]`, truncating toward zero
    pub fn from_xyxy(coords: [f32; 4]) -> Result<Self, GeometryError> {
        let limit = MAX_COORDINATE as f32;
        if coords.iter().any(|c| !c.is_finite() || c.abs() > limit) {
            return Err(GeometryError::OutOfRange {
                limit: MAX_COORDINATE,
            });
        }
        let [x1, y1, x2, y2] = coords.map(|c| c.trunc() as i32);
        Self::new(x1, y1, x2, y2)
    }

    pub fn x1(&self) -> i32 {
        self.x1
    }

    pub fn y1(&self) -> i32 {
        self.y1
    }

    pub fn x2(&self) -> i32 {
        self.x2
    }

    pub fn y2(&self) -> i32 {
        self.y2
    }

    pub fn width(&self) -> i64 {
        i64::from(self.x2) - i64::from(self.x1)
    }

    pub fn height(&self) -> i64 {
        i64::from(self.y2) - i64::from(self.y1)
    }

    pub fn area(&self) -> i64 {
        self.width() * self.height()
    }

    pub fn center(&self) -> (f64, f64) {
        (
            (f64::from(self.x1) + f64::from(self.x2)) / 2.0,
            (f64::from(self.y1) + f64::from(self.y2)) / 2.0,
        )
    }

    /// Intersection over union; 0 when the union is empty
    pub fn iou(&self, other: &BoundingBox) -> f64 {
        let ix1 = i64::from(self.x1.max(other.x1));
        let iy1 = i64::from(self.y1.max(other.y1));
        let ix2 = i64::from(self.x2.min(other.x2));
        let iy2 = i64::from(self.y2.min(other.y2));

        let intersection = (ix2 - ix1).max(0) * (iy2 - iy1).max(0);
        let union = self.area() + other.area() - intersection;

        if union <= 0 {
            return 0.0;
        }
        intersection as f64 / union as f64
    }

    /// All four edges lie inside `outer`, edges inclusive
    pub fn is_fully_contained_in(&self, outer: &BoundingBox) -> bool {
        self.x1 >= outer.x1 && self.y1 >= outer.y1 && self.x2 <= outer.x2 && self.y2 <= outer.y2
    }

    /// Entirely left of, right of, above or below `other`
    pub fn is_fully_disjoint_from(&self, other: &BoundingBox) -> bool {
        self.x2 < other.x1 || self.x1 > other.x2 || self.y2 < other.y1 || self.y1 > other.y2
    }
}

/// IoU of two optional boxes; 0 when either is absent
pub fn intersection_over_union(a: Option<&BoundingBox>, b: Option<&BoundingBox>) -> f64 {
    match (a, b) {
        (Some(a), Some(b)) => a.iou(b),
        _ => 0.0,
    }
}

/// Whether the top edge moved by more than `threshold` pixels between frames
pub fn is_moving_vertically(
    current: Option<&BoundingBox>,
    previous: Option<&BoundingBox>,
    threshold: i32,
) -> bool {
    match (current, previous) {
        (Some(current), Some(previous)) => {
            (i64::from(current.y1) - i64::from(previous.y1)).abs() > i64::from(threshold)
        }
        _ => false,
    }
}

/// Euclidean distance between box centers; infinite when either is absent
pub fn center_distance(a: Option<&BoundingBox>, b: Option<&BoundingBox>) -> f64 {
    match (a, b) {
        (Some(a), Some(b)) => {
            let (ax, ay) = a.center();
            let (bx, by) = b.center();
            (ax - bx).hypot(ay - by)
        }
        _ => f64::INFINITY,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox(x1: i32, y1: i32, x2: i32, y2: i32) -> BoundingBox {
        BoundingBox::new(x1, y1, x2, y2).unwrap()
    }

    #[test]
    fn test_degenerate_rejected() {
        assert!(BoundingBox::new(10, 10, 10, 20).is_err());
        assert!(BoundingBox::new(10, 20, 30, 5).is_err());
        assert!(BoundingBox::from_xyxy([0.0, 0.0, 0.9, 10.0]).is_err());
    }

    #[test]
    fn test_out_of_range_coordinates_rejected() {
        let out_of_range = Err(GeometryError::OutOfRange {
            limit: MAX_COORDINATE,
        });

        assert_eq!(BoundingBox::from_xyxy([0.0, -3e9, 10.0, 100.0]), out_of_range);
        assert_eq!(BoundingBox::from_xyxy([f32::NAN, 0.0, 10.0, 10.0]), out_of_range);
        assert_eq!(BoundingBox::from_xyxy([0.0, 0.0, f32::INFINITY, 10.0]), out_of_range);
        assert_eq!(BoundingBox::new(i32::MIN, 0, 10, 10), out_of_range);
    }

    #[test]
    fn test_widest_boxes_stay_exact() {
        let m = MAX_COORDINATE;
        let widest = bbox(-m, -m, m, m);
        let small = bbox(0, 100, 50, 150);

        assert_eq!(widest.area(), 4 * i64::from(m) * i64::from(m));
        assert!(is_moving_vertically(Some(&small), Some(&widest), 50));
        assert!(is_moving_vertically(Some(&widest), Some(&small), 50));

        let iou = widest.iou(&small);
        assert!(iou > 0.0 && iou < 1e-9);
        assert_eq!(small.iou(&widest), iou);
    }

    #[test]
    fn test_from_xyxy_truncates() {
        let b = BoundingBox::from_xyxy([10.7, 20.2, 110.9, 220.5]).unwrap();
        assert_eq!(b, bbox(10, 20, 110, 220));
    }

    #[test]
    fn test_iou_identity_and_symmetry() {
        let a = bbox(0, 0, 100, 100);
        let b = bbox(50, 50, 150, 150);

        assert_eq!(a.iou(&a), 1.0);
        assert_eq!(a.iou(&b), b.iou(&a));

        let expected = 2500.0 / 17500.0;
        assert!((a.iou(&b) - expected).abs() < 1e-9);
    }

    #[test]
    fn test_iou_bounds_and_absent() {
        let a = bbox(0, 0, 10, 10);
        let far = bbox(100, 100, 110, 110);

        assert_eq!(a.iou(&far), 0.0);
        assert_eq!(intersection_over_union(Some(&a), None), 0.0);
        assert_eq!(intersection_over_union(None, None), 0.0);

        let overlap = a.iou(&bbox(5, 0, 15, 10));
        assert!((0.0..=1.0).contains(&overlap));
    }

    #[test]
    fn test_vertical_movement() {
        let prev = bbox(0, 100, 50, 200);
        let small = bbox(0, 150, 50, 250);
        let large = bbox(0, 151, 50, 251);
        let up = bbox(0, 49, 50, 149);

        assert!(!is_moving_vertically(Some(&small), Some(&prev), 50));
        assert!(is_moving_vertically(Some(&large), Some(&prev), 50));
        assert!(is_moving_vertically(Some(&up), Some(&prev), 50));
        assert!(!is_moving_vertically(None, Some(&prev), 50));
        assert!(!is_moving_vertically(Some(&large), None, 50));
    }

    #[test]
    fn test_containment_is_edge_inclusive() {
        let outer = bbox(0, 0, 100, 100);

        assert!(outer.is_fully_contained_in(&outer));
        assert!(bbox(10, 10, 90, 90).is_fully_contained_in(&outer));
        assert!(!bbox(10, 10, 101, 90).is_fully_contained_in(&outer));
    }

    #[test]
    fn test_partial_overlap_is_neither_contained_nor_disjoint() {
        let cockpit = bbox(0, 0, 100, 100);
        let straddling = bbox(80, 80, 120, 120);

        assert!(!straddling.is_fully_contained_in(&cockpit));
        assert!(!straddling.is_fully_disjoint_from(&cockpit));
        assert!(bbox(101, 0, 150, 50).is_fully_disjoint_from(&cockpit));
        assert!(bbox(0, 200, 50, 250).is_fully_disjoint_from(&cockpit));
        // Touching edges are not disjoint
        assert!(!bbox(100, 0, 150, 50).is_fully_disjoint_from(&cockpit));
    }

    #[test]
    fn test_center_distance() {
        let a = bbox(0, 0, 10, 10);
        let b = bbox(30, 40, 40, 50);

        assert_eq!(center_distance(Some(&a), Some(&b)), 50.0);
        assert_eq!(center_distance(Some(&a), Some(&b)), center_distance(Some(&b), Some(&a)));
        assert!(center_distance(Some(&a), None).is_infinite());
    }
}
