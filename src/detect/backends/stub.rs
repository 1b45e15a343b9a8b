use anyhow::Result;
use std::collections::VecDeque;

use crate::detect::annotate::render_boxes;
use crate::detect::backend::DetectorBackend;
use crate::detect::result::{suppress_overlaps, BoundingBox, DetectionResult};
use crate::frame::RgbFrame;
use crate::params::DetectionParams;

/// Channel value at or above which a pixel counts as part of an object.
const BRIGHT_THRESHOLD: u8 = 200;
/// Regions smaller than this many pixels are ignored as noise.
const MIN_REGION_PIXELS: usize = 4;

/// Deterministic stub backend for tests and the demo.
///
/// Every 4-connected region of bright pixels is one "object"; its confidence is
/// the region's mean brightness. Output depends only on the frame and params.
pub struct StubBackend {
    label: String,
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl StubBackend {
    pub fn new() -> Self {
        Self {
            label: "object".to_string(),
        }
    }

    pub fn with_label(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }

    fn bright_regions(&self, frame: &RgbFrame) -> Vec<BoundingBox> {
        let (width, height) = frame.dimensions();
        let (w, h) = (width as usize, height as usize);
        let pixels = frame.as_bytes();
        let brightness = |idx: usize| -> u8 {
            let p = &pixels[idx * 3..idx * 3 + 3];
            p[0].max(p[1]).max(p[2])
        };

        let mut visited = vec![false; w * h];
        let mut queue = VecDeque::new();
        let mut regions = Vec::new();

        for start in 0..w * h {
            if visited[start] || brightness(start) < BRIGHT_THRESHOLD {
                continue;
            }
            visited[start] = true;
            queue.push_back(start);

            let (mut min_x, mut min_y, mut max_x, mut max_y) = (w, h, 0usize, 0usize);
            let mut count = 0usize;
            let mut sum = 0u64;

            while let Some(idx) = queue.pop_front() {
                let (x, y) = (idx % w, idx / w);
                min_x = min_x.min(x);
                min_y = min_y.min(y);
                max_x = max_x.max(x);
                max_y = max_y.max(y);
                count += 1;
                sum += u64::from(brightness(idx));

                let neighbours = [
                    (x > 0).then(|| idx - 1),
                    (x + 1 < w).then(|| idx + 1),
                    (y > 0).then(|| idx - w),
                    (y + 1 < h).then(|| idx + w),
                ];
                for next in neighbours.into_iter().flatten() {
                    if !visited[next] && brightness(next) >= BRIGHT_THRESHOLD {
                        visited[next] = true;
                        queue.push_back(next);
                    }
                }
            }

            if count < MIN_REGION_PIXELS {
                continue;
            }
            regions.push(BoundingBox {
                x: min_x as f32,
                y: min_y as f32,
                width: (max_x - min_x + 1) as f32,
                height: (max_y - min_y + 1) as f32,
                class_label: self.label.clone(),
                confidence: (sum as f32 / count as f32) / 255.0,
            });
        }

        regions
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, frame: &RgbFrame, params: &DetectionParams) -> Result<DetectionResult> {
        let candidates: Vec<BoundingBox> = self
            .bright_regions(frame)
            .into_iter()
            .filter(|b| b.confidence >= params.confidence)
            .collect();
        let mut boxes = suppress_overlaps(candidates, params.overlap);
        // Report in reading order rather than score order.
        boxes.sort_by(|a, b| a.y.total_cmp(&b.y).then(a.x.total_cmp(&b.x)));

        let annotated = render_boxes(frame, &boxes)?;
        Ok(DetectionResult { boxes, annotated })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(confidence: f32) -> DetectionParams {
        DetectionParams {
            confidence,
            ..DetectionParams::default()
        }
    }

    #[test]
    fn stub_backend_finds_bright_regions() -> Result<()> {
        let mut frame = RgbFrame::filled(32, 32, [10, 10, 10]);
        frame.fill_rect(2, 2, 4, 4, [255, 255, 255]);
        frame.fill_rect(20, 10, 6, 3, [230, 230, 230]);

        let mut backend = StubBackend::new();
        let result = backend.detect(&frame, &params(0.5))?;

        assert_eq!(result.object_count(), 2);
        assert_eq!(result.boxes[0].x, 2.0);
        assert_eq!(result.boxes[0].width, 4.0);
        assert_eq!(result.boxes[1].x, 20.0);
        assert_eq!(result.boxes[1].height, 3.0);
        assert_eq!(result.annotated.dimensions(), frame.dimensions());
        Ok(())
    }

    #[test]
    fn confidence_filters_dim_regions() -> Result<()> {
        let mut frame = RgbFrame::filled(16, 16, [0, 0, 0]);
        frame.fill_rect(4, 4, 4, 4, [210, 210, 210]);

        let mut backend = StubBackend::new();
        assert_eq!(backend.detect(&frame, &params(0.5))?.object_count(), 1);
        assert!(backend.detect(&frame, &params(0.9))?.is_empty());
        Ok(())
    }

    #[test]
    fn tiny_specks_are_ignored() -> Result<()> {
        let mut frame = RgbFrame::filled(8, 8, [0, 0, 0]);
        frame.put_pixel(3, 3, [255, 255, 255]);
        let result = StubBackend::new().detect(&frame, &params(0.1))?;
        assert!(result.is_empty());
        assert_eq!(result.annotated, frame);
        Ok(())
    }
}
