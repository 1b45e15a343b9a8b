use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

pub const DEFAULT_CONFIDENCE: f32 = 0.5;
pub const DEFAULT_OVERLAP: f32 = 0.5;
pub const DEFAULT_INPUT_SIZE: u32 = 640;

/// Smallest and largest accepted inference resolution.
pub const MIN_INPUT_SIZE: u32 = 320;
pub const MAX_INPUT_SIZE: u32 = 1280;
/// Model stride; input sizes that are not a multiple of it get padded by most models.
pub const INPUT_SIZE_STRIDE: u32 = 32;

/// User-tunable detection parameters, passed explicitly into every call.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectionParams {
    /// Minimum score for a candidate box to be kept.
    pub confidence: f32,
    /// IoU above which a lower-scored overlapping box is suppressed.
    pub overlap: f32,
    /// Square resolution the image is resized to before inference.
    pub input_size: u32,
}

impl Default for DetectionParams {
    fn default() -> Self {
        Self {
            confidence: DEFAULT_CONFIDENCE,
            overlap: DEFAULT_OVERLAP,
            input_size: DEFAULT_INPUT_SIZE,
        }
    }
}

impl DetectionParams {
    pub fn new(confidence: f32, overlap: f32, input_size: u32) -> Result<Self> {
        let params = Self {
            confidence,
            overlap,
            input_size,
        };
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<()> {
        check_unit_range("confidence", self.confidence)?;
        check_unit_range("overlap", self.overlap)?;
        if self.input_size == 0 {
            return Err(PipelineError::InvalidParams(
                "input size must be positive".to_string(),
            ));
        }
        if !(MIN_INPUT_SIZE..=MAX_INPUT_SIZE).contains(&self.input_size) {
            return Err(PipelineError::InvalidParams(format!(
                "input size {} outside [{}, {}]",
                self.input_size, MIN_INPUT_SIZE, MAX_INPUT_SIZE
            )));
        }
        if self.input_size % INPUT_SIZE_STRIDE != 0 {
            log::warn!(
                "input size {} is not a multiple of {}; the model may pad it",
                self.input_size,
                INPUT_SIZE_STRIDE
            );
        }
        Ok(())
    }
}

fn check_unit_range(name: &str, value: f32) -> Result<()> {
    if value.is_nan() || !(0.0..=1.0).contains(&value) {
        return Err(PipelineError::InvalidParams(format!(
            "{} must be within [0, 1], got {}",
            name, value
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(DetectionParams::default().validate().is_ok());
    }

    #[test]
    fn thresholds_accept_closed_unit_interval() {
        assert!(DetectionParams::new(0.0, 1.0, 640).is_ok());
        assert!(DetectionParams::new(1.0, 0.0, 320).is_ok());
    }

    #[test]
    fn rejects_out_of_range_thresholds() {
        assert!(matches!(
            DetectionParams::new(1.2, 0.5, 640),
            Err(PipelineError::InvalidParams(_))
        ));
        assert!(matches!(
            DetectionParams::new(0.5, -0.1, 640),
            Err(PipelineError::InvalidParams(_))
        ));
        assert!(matches!(
            DetectionParams::new(f32::NAN, 0.5, 640),
            Err(PipelineError::InvalidParams(_))
        ));
    }

    #[test]
    fn input_size_bounds() {
        assert!(DetectionParams::new(0.5, 0.5, 0).is_err());
        assert!(DetectionParams::new(0.5, 0.5, 288).is_err());
        assert!(DetectionParams::new(0.5, 0.5, 1312).is_err());
        assert!(DetectionParams::new(0.5, 0.5, 1280).is_ok());
        // Off-stride sizes only warn.
        assert!(DetectionParams::new(0.5, 0.5, 650).is_ok());
    }
}
