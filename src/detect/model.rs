//! Model identifiers.
//!
//! A model is named by a single string, as picked in the model selector:
//! - `stub://<name>`: built-in deterministic backend (tests, demo)
//! - a bare well-known name such as `yolov8n.pt` or `yolo11n`: resolved in the
//!   model directory and fetched on first use when fetching is enabled
//! - anything else: a local weights file

use regex::Regex;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::error::{PipelineError, Result};

const STUB_SCHEME: &str = "stub://";

fn well_known_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(yolo(?:v\d+|\d+)[nsmlx])(?:\.(?:pt|onnx))?$").expect("valid regex")
    })
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ModelSource {
    Stub(String),
    /// Well-known model, stored by stem (e.g. `yolov8n`).
    WellKnown(String),
    Local(PathBuf),
}

impl ModelSource {
    pub fn parse(identifier: &str) -> Result<Self> {
        let identifier = identifier.trim();
        if identifier.is_empty() {
            return Err(PipelineError::ModelUnavailable {
                model: String::new(),
                reason: "empty model identifier".to_string(),
            });
        }
        if let Some(name) = identifier.strip_prefix(STUB_SCHEME) {
            return Ok(Self::Stub(name.to_string()));
        }
        if let Some(captures) = well_known_pattern().captures(identifier) {
            return Ok(Self::WellKnown(captures[1].to_string()));
        }
        Ok(Self::Local(PathBuf::from(identifier)))
    }

    /// Failed loads of well-known models are retried once: the first attempt
    /// may have hit a transient network error during the fetch.
    pub fn retries_on_failure(&self) -> bool {
        matches!(self, Self::WellKnown(_))
    }

    /// Weights file for this source, given the local model directory.
    pub fn weights_path(&self, model_dir: &Path) -> Option<PathBuf> {
        match self {
            Self::Stub(_) => None,
            Self::WellKnown(stem) => Some(model_dir.join(format!("{stem}.onnx"))),
            Self::Local(path) => Some(path.clone()),
        }
    }

    /// Single path segment naming this model in download artifacts.
    pub fn artifact_label(&self) -> String {
        match self {
            Self::Stub(name) if name.is_empty() => "stub".to_string(),
            Self::Stub(name) => sanitize_segment(name),
            Self::WellKnown(stem) => stem.clone(),
            Self::Local(path) => path
                .file_name()
                .map(|name| sanitize_segment(&name.to_string_lossy()))
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| "model".to_string()),
        }
    }
}

impl fmt::Display for ModelSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stub(name) => write!(f, "{STUB_SCHEME}{name}"),
            Self::WellKnown(stem) => write!(f, "{stem}"),
            Self::Local(path) => write!(f, "{}", path.display()),
        }
    }
}

fn sanitize_segment(raw: &str) -> String {
    raw.chars()
        .map(|c| match c {
            '/' | '\\' | ':' => '_',
            c => c,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_known_names() -> Result<()> {
        assert_eq!(
            ModelSource::parse("yolov8n.pt")?,
            ModelSource::WellKnown("yolov8n".into())
        );
        assert_eq!(
            ModelSource::parse("yolo11n")?,
            ModelSource::WellKnown("yolo11n".into())
        );
        assert_eq!(
            ModelSource::parse("yolov5s.onnx")?,
            ModelSource::WellKnown("yolov5s".into())
        );
        Ok(())
    }

    #[test]
    fn paths_and_unknown_names_are_local() -> Result<()> {
        assert_eq!(
            ModelSource::parse("tunning-yolo8/best.onnx")?,
            ModelSource::Local(PathBuf::from("tunning-yolo8/best.onnx"))
        );
        assert_eq!(
            ModelSource::parse("models/yolov8n.onnx")?,
            ModelSource::Local(PathBuf::from("models/yolov8n.onnx"))
        );
        assert_eq!(
            ModelSource::parse("best.pt")?,
            ModelSource::Local(PathBuf::from("best.pt"))
        );
        Ok(())
    }

    #[test]
    fn stub_scheme_and_empty_identifier() {
        assert_eq!(
            ModelSource::parse("stub://bright").unwrap(),
            ModelSource::Stub("bright".into())
        );
        assert!(matches!(
            ModelSource::parse("  "),
            Err(PipelineError::ModelUnavailable { .. })
        ));
    }

    #[test]
    fn only_well_known_models_retry() -> Result<()> {
        assert!(ModelSource::parse("yolov8n.pt")?.retries_on_failure());
        assert!(!ModelSource::parse("best.onnx")?.retries_on_failure());
        assert!(!ModelSource::parse("stub://x")?.retries_on_failure());
        Ok(())
    }

    #[test]
    fn artifact_label_is_one_segment() -> Result<()> {
        assert_eq!(
            ModelSource::parse("tunning-yolo8/best.onnx")?.artifact_label(),
            "best.onnx"
        );
        assert_eq!(ModelSource::parse("yolo11n.pt")?.artifact_label(), "yolo11n");
        assert_eq!(ModelSource::parse("stub://a/b")?.artifact_label(), "a_b");
        Ok(())
    }

    #[test]
    fn well_known_weights_live_in_model_dir() -> Result<()> {
        let source = ModelSource::parse("yolov8n.pt")?;
        assert_eq!(
            source.weights_path(Path::new("models")),
            Some(PathBuf::from("models/yolov8n.onnx"))
        );
        Ok(())
    }
}
