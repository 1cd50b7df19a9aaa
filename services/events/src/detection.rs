//! Per-frame detection input.

use crate::geometry::BoundingBox;
use crate::labels::Label;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, trace};

/// One detector output record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub label: String,
    /// `[x1, y1, x2, y2]` in pixels
    #[serde(rename = "box")]
    pub bbox: [f32; 4],
    /// Carried through, never consulted
    #[serde(default)]
    pub confidence: f32,
}

impl Detection {
    pub fn new(label: impl Into<String>, bbox: [f32; 4], confidence: f32) -> Self {
        Self {
            label: label.into(),
            bbox,
            confidence,
        }
    }
}

/// At most one box per label for a single frame.
///
/// When a label appears more than once the last box wins and the
/// overwrite is counted in `duplicates`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectionFrame {
    boxes: HashMap<Label, BoundingBox>,
    duplicates: usize,
    rejected: usize,
}

impl DetectionFrame {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a frame from raw detector records.
    ///
    /// Unknown labels are skipped. Degenerate or out-of-range boxes are dropped and counted.
    pub fn from_detections(detections: &[Detection]) -> Self {
        let mut frame = Self::new();

        for detection in detections {
            let label = match detection.label.parse::<Label>() {
                Ok(label) => label,
                Err(_) => {
                    trace!(label = %detection.label, "Ignoring unknown label");
                    continue;
                }
            };

            match BoundingBox::from_xyxy(detection.bbox) {
                Ok(bbox) => frame.insert(label, bbox),
                Err(e) => {
                    debug!(label = %label, error = %e, "Dropping detection");
                    frame.rejected += 1;
                }
            }
        }

        frame
    }

    /// Set the box for `label`, replacing any earlier one
    pub fn insert(&mut self, label: Label, bbox: BoundingBox) {
        if self.boxes.insert(label, bbox).is_some() {
            self.duplicates += 1;
        }
    }

    pub fn with(mut self, label: Label, bbox: BoundingBox) -> Self {
        self.insert(label, bbox);
        self
    }

    pub fn get(&self, label: Label) -> Option<&BoundingBox> {
        self.boxes.get(&label)
    }

    pub fn contains(&self, label: Label) -> bool {
        self.boxes.contains_key(&label)
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }

    /// Boxes overwritten because a label appeared more than once
    pub fn duplicates(&self) -> usize {
        self.duplicates
    }

    /// Detections dropped for degenerate geometry
    pub fn rejected(&self) -> usize {
        self.rejected
    }

    /// Any plane part is in view
    pub fn has_plane(&self) -> bool {
        Label::PLANE_PARTS.iter().any(|label| self.contains(*label))
    }

    /// Cockpit region: the open canopy if seen, else the closed one
    pub fn cockpit_box(&self) -> Option<&BoundingBox> {
        self.get(Label::CabinCoverOn)
            .or_else(|| self.get(Label::CabinCoverOff))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detection_deserializes_box_key() {
        let detections: Vec<Detection> = serde_json::from_str(
            r#"[{"label": "aviator", "box": [1.5, 2.0, 30.0, 40.0], "confidence": 0.91}]"#,
        )
        .unwrap();

        assert_eq!(detections[0].label, "aviator");
        assert_eq!(detections[0].bbox, [1.5, 2.0, 30.0, 40.0]);
    }

    #[test]
    fn test_last_duplicate_wins_and_is_counted() {
        let frame = DetectionFrame::from_detections(&[
            Detection::new("aviator", [0.0, 0.0, 10.0, 10.0], 0.9),
            Detection::new("aviator", [50.0, 50.0, 60.0, 60.0], 0.4),
        ]);

        assert_eq!(
            frame.get(Label::Aviator),
            Some(&BoundingBox::new(50, 50, 60, 60).unwrap())
        );
        assert_eq!(frame.duplicates(), 1);
    }

    #[test]
    fn test_unknown_and_degenerate_are_skipped() {
        let frame = DetectionFrame::from_detections(&[
            Detection::new("fuel_truck", [0.0, 0.0, 10.0, 10.0], 0.9),
            Detection::new("red_on", [10.0, 10.0, 5.0, 20.0], 0.9),
        ]);

        assert!(frame.is_empty());
        assert_eq!(frame.rejected(), 1);
        assert!(!frame.has_plane());
    }

    #[test]
    fn test_cockpit_prefers_open_canopy() {
        let open = BoundingBox::new(0, 0, 100, 100).unwrap();
        let closed = BoundingBox::new(200, 0, 300, 100).unwrap();

        let both = DetectionFrame::new()
            .with(Label::CabinCoverOff, closed)
            .with(Label::CabinCoverOn, open);
        assert_eq!(both.cockpit_box(), Some(&open));

        let only_closed = DetectionFrame::new().with(Label::CabinCoverOff, closed);
        assert_eq!(only_closed.cockpit_box(), Some(&closed));
        assert!(only_closed.has_plane());

        let pilot_only = DetectionFrame::new().with(Label::Aviator, open);
        assert_eq!(pilot_only.cockpit_box(), None);
        assert!(!pilot_only.has_plane());
    }
}
