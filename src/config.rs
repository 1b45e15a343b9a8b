use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::detect::DefaultLoader;
use crate::params::{DetectionParams, DEFAULT_CONFIDENCE, DEFAULT_INPUT_SIZE, DEFAULT_OVERLAP};

const DEFAULT_MODEL: &str = "custom";
const DEFAULT_MODEL_DIR: &str = "models";
const DEFAULT_OUTPUT_DIR: &str = "output";

/// Named models offered by the model selector.
pub const MODEL_PRESETS: &[(&str, &str)] = &[
    ("custom", "tunning-yolo8/best.onnx"),
    ("yolov8n", "yolov8n.onnx"),
    ("yolo11n", "yolo11n.onnx"),
];

#[derive(Debug, Deserialize, Default)]
struct AnnotatorConfigFile {
    model: Option<String>,
    model_dir: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    detection: Option<DetectionConfigFile>,
    fetch: Option<FetchConfigFile>,
    /// Class names per model, keyed by preset name or model identifier.
    #[serde(default)]
    labels: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectionConfigFile {
    confidence: Option<f32>,
    overlap: Option<f32>,
    input_size: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct FetchConfigFile {
    base_url: Option<String>,
    /// Expected SHA-256 per model stem.
    #[serde(default)]
    sha256: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct AnnotatorConfig {
    /// Preset name or model identifier.
    pub model: String,
    pub model_dir: PathBuf,
    pub output_dir: PathBuf,
    pub params: DetectionParams,
    pub fetch: Option<FetchSettings>,
    /// Class names per resolved model identifier.
    pub labels: Vec<(String, Vec<String>)>,
}

#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub base_url: String,
    pub sha256: Vec<(String, String)>,
}

impl AnnotatorConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("ANNOTATOR_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from a file only, ignoring the environment.
    pub fn from_path(path: &Path) -> Result<Self> {
        let mut cfg = Self::from_file(read_config_file(path)?);
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: AnnotatorConfigFile) -> Self {
        let detection = file.detection.unwrap_or_default();
        let params = DetectionParams {
            confidence: detection.confidence.unwrap_or(DEFAULT_CONFIDENCE),
            overlap: detection.overlap.unwrap_or(DEFAULT_OVERLAP),
            input_size: detection.input_size.unwrap_or(DEFAULT_INPUT_SIZE),
        };
        let fetch = file.fetch.and_then(|fetch| {
            fetch.base_url.map(|base_url| FetchSettings {
                base_url,
                sha256: fetch.sha256.into_iter().collect(),
            })
        });
        Self {
            model: file.model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            model_dir: file
                .model_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_DIR)),
            output_dir: file
                .output_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR)),
            params,
            fetch,
            labels: file
                .labels
                .into_iter()
                .map(|(model, labels)| (resolve_model(&model), labels))
                .collect(),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(model) = non_empty_env("ANNOTATOR_MODEL") {
            self.model = model;
        }
        if let Some(value) = non_empty_env("ANNOTATOR_CONFIDENCE") {
            self.params.confidence = value
                .parse()
                .map_err(|_| anyhow!("ANNOTATOR_CONFIDENCE must be a number in [0, 1]"))?;
        }
        if let Some(value) = non_empty_env("ANNOTATOR_OVERLAP") {
            self.params.overlap = value
                .parse()
                .map_err(|_| anyhow!("ANNOTATOR_OVERLAP must be a number in [0, 1]"))?;
        }
        if let Some(value) = non_empty_env("ANNOTATOR_INPUT_SIZE") {
            self.params.input_size = value
                .parse()
                .map_err(|_| anyhow!("ANNOTATOR_INPUT_SIZE must be a positive integer"))?;
        }
        if let Some(dir) = non_empty_env("ANNOTATOR_MODEL_DIR") {
            self.model_dir = PathBuf::from(dir);
        }
        if let Some(dir) = non_empty_env("ANNOTATOR_OUTPUT_DIR") {
            self.output_dir = PathBuf::from(dir);
        }
        if let Some(base_url) = non_empty_env("ANNOTATOR_FETCH_URL") {
            let sha256 = self
                .fetch
                .take()
                .map(|fetch| fetch.sha256)
                .unwrap_or_default();
            self.fetch = Some(FetchSettings { base_url, sha256 });
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        self.model = self.model.trim().to_string();
        if self.model.is_empty() {
            return Err(anyhow!("model must not be empty"));
        }
        self.params.validate()?;
        if let Some(fetch) = &self.fetch {
            if !(fetch.base_url.starts_with("http://") || fetch.base_url.starts_with("https://"))
            {
                return Err(anyhow!(
                    "fetch base url must be http(s), got {}",
                    fetch.base_url
                ));
            }
            for (stem, digest) in &fetch.sha256 {
                if digest.len() != 64 || hex::decode(digest).is_err() {
                    return Err(anyhow!("sha256 for {} must be 64 hex characters", stem));
                }
            }
        }
        for (model, labels) in &self.labels {
            if labels.is_empty() || labels.iter().any(|label| label.trim().is_empty()) {
                return Err(anyhow!("labels for {} must be non-empty names", model));
            }
        }
        Ok(())
    }

    /// Model identifier to load: presets are expanded, anything else is used as is.
    pub fn resolve_model(&self) -> String {
        resolve_model(&self.model)
    }
}

impl AnnotatorConfig {
    /// Backend loader for this configuration: model directory, class labels
    /// and, when the build supports it, the weights fetcher.
    pub fn build_loader(&self) -> Result<DefaultLoader> {
        let mut loader = DefaultLoader::new(&self.model_dir);
        for (model, labels) in &self.labels {
            loader = loader.with_labels(model, labels.clone());
        }
        #[cfg(feature = "model-fetch")]
        {
            if let Some(fetch) = &self.fetch {
                let mut fetcher = crate::detect::ModelFetcher::new(&fetch.base_url)?;
                for (stem, digest) in &fetch.sha256 {
                    fetcher = fetcher.with_checksum(stem, digest);
                }
                loader = loader.with_fetcher(fetcher);
            }
        }
        #[cfg(not(feature = "model-fetch"))]
        {
            if self.fetch.is_some() {
                log::warn!("model fetching configured but this build has no model-fetch feature");
            }
        }
        Ok(loader)
    }
}

/// Expand a preset name to its model identifier.
pub fn resolve_model(name: &str) -> String {
    MODEL_PRESETS
        .iter()
        .find(|(preset, _)| *preset == name)
        .map(|(_, identifier)| identifier.to_string())
        .unwrap_or_else(|| name.to_string())
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn read_config_file(path: &Path) -> Result<AnnotatorConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_expand_and_identifiers_pass_through() {
        assert_eq!(resolve_model("custom"), "tunning-yolo8/best.onnx");
        assert_eq!(resolve_model("yolo11n"), "yolo11n.onnx");
        assert_eq!(resolve_model("stub://demo"), "stub://demo");
    }

    #[test]
    fn empty_file_gives_defaults() {
        let cfg = AnnotatorConfig::from_file(AnnotatorConfigFile::default());
        assert_eq!(cfg.model, "custom");
        assert_eq!(cfg.params, DetectionParams::default());
        assert!(cfg.fetch.is_none());
        assert!(cfg.labels.is_empty());
    }

    #[test]
    fn label_keys_resolve_presets() {
        let file = AnnotatorConfigFile {
            labels: BTreeMap::from([("custom".to_string(), vec!["motorcycle".to_string()])]),
            ..AnnotatorConfigFile::default()
        };
        let cfg = AnnotatorConfig::from_file(file);
        assert_eq!(
            cfg.labels,
            vec![(
                "tunning-yolo8/best.onnx".to_string(),
                vec!["motorcycle".to_string()]
            )]
        );
    }
}
