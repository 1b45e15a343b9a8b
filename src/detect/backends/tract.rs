#![cfg(feature = "backend-tract")]

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use tract_onnx::prelude::*;

use crate::detect::annotate::render_boxes;
use crate::detect::backend::DetectorBackend;
use crate::detect::result::{suppress_overlaps, BoundingBox, DetectionResult};
use crate::frame::RgbFrame;
use crate::params::DetectionParams;

type Plan = TypedRunnableModel<TypedModel>;

/// Grey used by YOLO letterboxing.
const LETTERBOX_FILL: u8 = 114;

const COCO_LABELS: [&str; 80] = [
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat", "dog",
    "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack", "umbrella",
    "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball", "kite",
    "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket", "bottle",
    "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich",
    "orange", "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "couch",
    "potted plant", "bed", "dining table", "toilet", "tv", "laptop", "mouse", "remote",
    "keyboard", "cell phone", "microwave", "oven", "toaster", "sink", "refrigerator", "book",
    "clock", "vase", "scissors", "teddy bear", "hair drier", "toothbrush",
];

/// Tract-based backend for YOLOv8-style ONNX detectors.
///
/// Expects a single input `[1, 3, S, S]` (RGB, 0..1) and a single output
/// `[1, 4 + classes, proposals]` with boxes as centre/size in input pixels.
/// A runnable plan is built per input size and kept for reuse.
pub struct TractBackend {
    model: InferenceModel,
    plans: HashMap<u32, Plan>,
    labels: Vec<String>,
}

struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl TractBackend {
    /// Load an ONNX model from disk. Plans are built lazily per input size.
    pub fn new<P: AsRef<Path>>(model_path: P) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?;

        Ok(Self {
            model,
            plans: HashMap::new(),
            labels: COCO_LABELS.iter().map(|l| l.to_string()).collect(),
        })
    }

    /// Override the COCO class names, for custom-trained models.
    pub fn with_labels(mut self, labels: Vec<String>) -> Self {
        self.labels = labels;
        self
    }

    fn plan(&mut self, size: u32) -> Result<&Plan> {
        let model = &self.model;
        match self.plans.entry(size) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let side = size as usize;
                let plan = model
                    .clone()
                    .with_input_fact(
                        0,
                        InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, side, side)),
                    )
                    .context("failed to set input fact")?
                    .into_optimized()
                    .context("failed to optimize ONNX model")?
                    .into_runnable()
                    .context("failed to build runnable ONNX model")?;
                log::debug!("built tract plan for input size {}", size);
                Ok(entry.insert(plan))
            }
        }
    }

    fn label(&self, class: usize) -> String {
        self.labels
            .get(class)
            .cloned()
            .unwrap_or_else(|| format!("class_{class}"))
    }

    fn decode(
        &self,
        output: &Tensor,
        letterbox: &Letterbox,
        frame: &RgbFrame,
        params: &DetectionParams,
    ) -> Result<Vec<BoundingBox>> {
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?
            .into_dimensionality::<tract_ndarray::Ix3>()
            .context("model output is not [1, 4 + classes, proposals]")?;
        let (_, rows, proposals) = view.dim();
        if rows < 5 {
            return Err(anyhow!("model output has {} rows, expected at least 5", rows));
        }

        let (width, height) = (frame.width() as f32, frame.height() as f32);
        let mut candidates = Vec::new();
        for i in 0..proposals {
            let (class, score) = (4..rows)
                .map(|row| (row - 4, view[(0, row, i)]))
                .fold((0, f32::NEG_INFINITY), |best, cur| {
                    if cur.1 > best.1 {
                        cur
                    } else {
                        best
                    }
                });
            if !score.is_finite() || score < params.confidence {
                continue;
            }

            let (cx, cy) = (view[(0, 0, i)], view[(0, 1, i)]);
            let (bw, bh) = (view[(0, 2, i)], view[(0, 3, i)]);
            let x1 = ((cx - bw / 2.0 - letterbox.pad_x) / letterbox.scale).clamp(0.0, width);
            let y1 = ((cy - bh / 2.0 - letterbox.pad_y) / letterbox.scale).clamp(0.0, height);
            let x2 = ((cx + bw / 2.0 - letterbox.pad_x) / letterbox.scale).clamp(0.0, width);
            let y2 = ((cy + bh / 2.0 - letterbox.pad_y) / letterbox.scale).clamp(0.0, height);
            if x2 <= x1 || y2 <= y1 {
                continue;
            }

            candidates.push(BoundingBox {
                x: x1,
                y: y1,
                width: x2 - x1,
                height: y2 - y1,
                class_label: self.label(class),
                confidence: score,
            });
        }

        Ok(suppress_overlaps(candidates, params.overlap))
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, frame: &RgbFrame, params: &DetectionParams) -> Result<DetectionResult> {
        let (input, letterbox) = letterbox(frame, params.input_size)?;
        let outputs = self
            .plan(params.input_size)?
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;

        let boxes = self.decode(output, &letterbox, frame, params)?;
        let annotated = render_boxes(frame, &boxes)?;
        Ok(DetectionResult { boxes, annotated })
    }

    fn warm_up(&mut self) -> Result<()> {
        self.plan(crate::params::DEFAULT_INPUT_SIZE).map(|_| ())
    }
}

/// Resize preserving aspect ratio and pad to a `size` x `size` NCHW tensor.
fn letterbox(frame: &RgbFrame, size: u32) -> Result<(Tensor, Letterbox)> {
    let (width, height) = frame.dimensions();
    if width == 0 || height == 0 {
        return Err(anyhow!("cannot run detection on an empty frame"));
    }
    let scale = (size as f32 / width as f32).min(size as f32 / height as f32);
    let new_w = ((width as f32 * scale).round() as u32).clamp(1, size);
    let new_h = ((height as f32 * scale).round() as u32).clamp(1, size);
    let pad_x = (size - new_w) / 2;
    let pad_y = (size - new_h) / 2;

    let image = frame.clone().into_image()?;
    let resized = imageops::resize(&image, new_w, new_h, FilterType::Triangle);
    let mut canvas = RgbImage::from_pixel(size, size, Rgb([LETTERBOX_FILL; 3]));
    imageops::replace(&mut canvas, &resized, i64::from(pad_x), i64::from(pad_y));

    let side = size as usize;
    let input = tract_ndarray::Array4::from_shape_fn((1, 3, side, side), |(_, channel, y, x)| {
        canvas.get_pixel(x as u32, y as u32)[channel] as f32 / 255.0
    });

    Ok((
        input.into_tensor(),
        Letterbox {
            scale,
            pad_x: pad_x as f32,
            pad_y: pad_y as f32,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn letterbox_pads_the_short_side() -> Result<()> {
        let frame = RgbFrame::filled(640, 320, [255, 0, 0]);
        let (tensor, letterbox) = letterbox(&frame, 320)?;
        assert_eq!(tensor.shape(), &[1, 3, 320, 320]);
        assert!((letterbox.scale - 0.5).abs() < 1e-6);
        assert_eq!(letterbox.pad_x, 0.0);
        assert_eq!(letterbox.pad_y, 80.0);
        Ok(())
    }
}
