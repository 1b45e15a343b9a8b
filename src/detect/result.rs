use serde::Serialize;

use crate::frame::RgbFrame;

/// One detected object, in source-pixel coordinates (top-left origin).
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub class_label: String,
    pub confidence: f32,
}

impl BoundingBox {
    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// Intersection over union with another box.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let ix1 = self.x.max(other.x);
        let iy1 = self.y.max(other.y);
        let ix2 = self.right().min(other.right());
        let iy2 = self.bottom().min(other.bottom());
        let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
        if inter == 0.0 {
            return 0.0;
        }
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            return 0.0;
        }
        inter / union
    }
}

/// Output of one detection call: the kept boxes and the rendered overlay.
#[derive(Clone, Debug, PartialEq)]
pub struct DetectionResult {
    pub boxes: Vec<BoundingBox>,
    /// Annotated copy of the input; same dimensions as the input.
    pub annotated: RgbFrame,
}

impl DetectionResult {
    pub fn object_count(&self) -> usize {
        self.boxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }

    pub fn summary(&self) -> DetectionSummary {
        DetectionSummary::new(&self.boxes)
    }
}

/// Serializable description of a detection run, for display or `--json` output.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DetectionSummary {
    pub object_count: usize,
    pub message: String,
    pub boxes: Vec<BoundingBox>,
}

impl DetectionSummary {
    pub fn new(boxes: &[BoundingBox]) -> Self {
        let message = if boxes.is_empty() {
            "No objects detected. Try lowering the confidence threshold.".to_string()
        } else {
            format!("Done! Detected {} objects.", boxes.len())
        };
        Self {
            object_count: boxes.len(),
            message,
            boxes: boxes.to_vec(),
        }
    }
}

/// Greedy per-class non-max suppression: highest confidence first, drop boxes
/// whose IoU with an already kept box of the same class exceeds `overlap`.
///
/// Ties keep their input order, so the output is deterministic.
pub fn suppress_overlaps(mut boxes: Vec<BoundingBox>, overlap: f32) -> Vec<BoundingBox> {
    boxes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<BoundingBox> = Vec::with_capacity(boxes.len());
    for candidate in boxes {
        let suppressed = kept
            .iter()
            .any(|k| k.class_label == candidate.class_label && k.iou(&candidate) > overlap);
        if !suppressed {
            kept.push(candidate);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox(x: f32, y: f32, w: f32, h: f32, confidence: f32) -> BoundingBox {
        BoundingBox {
            x,
            y,
            width: w,
            height: h,
            class_label: "motorcycle".to_string(),
            confidence,
        }
    }

    #[test]
    fn iou_of_identical_and_disjoint_boxes() {
        let a = bbox(0.0, 0.0, 10.0, 10.0, 0.9);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
        let b = bbox(20.0, 20.0, 5.0, 5.0, 0.9);
        assert_eq!(a.iou(&b), 0.0);
    }

    #[test]
    fn suppression_keeps_best_of_overlapping_pair() {
        let boxes = vec![
            bbox(0.0, 0.0, 10.0, 10.0, 0.6),
            bbox(1.0, 1.0, 10.0, 10.0, 0.9),
            bbox(50.0, 50.0, 10.0, 10.0, 0.7),
        ];
        let kept = suppress_overlaps(boxes, 0.5);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].confidence, 0.9);
        assert_eq!(kept[1].confidence, 0.7);
    }

    #[test]
    fn different_classes_do_not_suppress_each_other() {
        let mut rider = bbox(1.0, 1.0, 10.0, 10.0, 0.8);
        rider.class_label = "person".to_string();
        let boxes = vec![bbox(0.0, 0.0, 10.0, 10.0, 0.9), rider];
        assert_eq!(suppress_overlaps(boxes, 0.5).len(), 2);
    }

    #[test]
    fn overlap_of_one_keeps_everything() {
        let boxes = vec![bbox(0.0, 0.0, 10.0, 10.0, 0.6), bbox(0.0, 0.0, 10.0, 10.0, 0.5)];
        assert_eq!(suppress_overlaps(boxes, 1.0).len(), 2);
    }

    #[test]
    fn summary_suggests_lower_confidence_when_empty() {
        let summary = DetectionSummary::new(&[]);
        assert_eq!(summary.object_count, 0);
        assert!(summary.message.contains("lowering the confidence"));
    }
}
