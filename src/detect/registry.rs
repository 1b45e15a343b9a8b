use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};

use super::backend::DetectorBackend;
use super::backends::StubBackend;
use super::model::ModelSource;
use crate::error::PipelineError;

#[cfg(feature = "model-fetch")]
use super::fetch::ModelFetcher;

/// A loaded backend shared between jobs. Every inference call holds the lock.
pub type SharedBackend = Arc<Mutex<Box<dyn DetectorBackend>>>;

/// Constructs detection backends from model sources.
pub trait BackendLoader: Send + Sync {
    fn load(&self, source: &ModelSource) -> Result<Box<dyn DetectorBackend>>;
}

/// Slot holding one model's backend once it has been loaded.
type Slot = Arc<Mutex<Option<SharedBackend>>>;

/// Thread-safe cache of loaded detection backends, keyed by model.
///
/// Identifiers naming the same model (`yolov8n`, `yolov8n.pt`) share one
/// entry. Each model is loaded once and reused across requests; parameter
/// changes never trigger a reload. A load holds only its own slot, so
/// requests for other models are not held up by it.
pub struct ModelCache {
    loader: Box<dyn BackendLoader>,
    backends: Mutex<HashMap<String, Slot>>,
}

impl ModelCache {
    pub fn new<L: BackendLoader + 'static>(loader: L) -> Self {
        Self {
            loader: Box::new(loader),
            backends: Mutex::new(HashMap::new()),
        }
    }

    /// Register an already constructed backend under an identifier.
    pub fn register<B: DetectorBackend + 'static>(
        &self,
        identifier: &str,
        backend: B,
    ) -> Result<(), PipelineError> {
        let key = ModelSource::parse(identifier)?.to_string();
        let shared: SharedBackend = Arc::new(Mutex::new(Box::new(backend)));
        let mut backends = self.lock_backends(identifier)?;
        backends.insert(key, Arc::new(Mutex::new(Some(shared))));
        Ok(())
    }

    /// Get the backend for `identifier`, loading it on first use.
    ///
    /// Missing local weights fail immediately. A well-known model that fails
    /// to load is retried exactly once before giving up.
    pub fn acquire(&self, identifier: &str) -> Result<SharedBackend, PipelineError> {
        let source = ModelSource::parse(identifier)?;
        let slot = {
            let mut backends = self.lock_backends(identifier)?;
            backends.entry(source.to_string()).or_default().clone()
        };

        let mut slot = slot.lock().map_err(|_| poisoned(identifier))?;
        if let Some(backend) = slot.as_ref() {
            return Ok(backend.clone());
        }

        if let ModelSource::Local(path) = &source {
            if !path.is_file() {
                return Err(PipelineError::ModelUnavailable {
                    model: identifier.to_string(),
                    reason: format!("weights file {} not found", path.display()),
                });
            }
        }

        let backend = self.load_with_retry(identifier, &source)?;
        let shared: SharedBackend = Arc::new(Mutex::new(backend));
        *slot = Some(shared.clone());
        log::info!("model {} loaded", source);
        Ok(shared)
    }

    pub fn is_loaded(&self, identifier: &str) -> bool {
        let Ok(source) = ModelSource::parse(identifier) else {
            return false;
        };
        let slot = match self.backends.lock() {
            Ok(backends) => backends.get(&source.to_string()).cloned(),
            Err(_) => None,
        };
        slot.is_some_and(|slot| slot_is_filled(&slot))
    }

    /// List loaded models by their canonical name.
    pub fn loaded(&self) -> Vec<String> {
        let slots: Vec<(String, Slot)> = self
            .backends
            .lock()
            .map(|backends| {
                backends
                    .iter()
                    .map(|(name, slot)| (name.clone(), slot.clone()))
                    .collect()
            })
            .unwrap_or_default();
        let mut names: Vec<String> = slots
            .into_iter()
            .filter(|(_, slot)| slot_is_filled(slot))
            .map(|(name, _)| name)
            .collect();
        names.sort();
        names
    }

    /// Drop a cached backend; the next `acquire` reloads it.
    pub fn evict(&self, identifier: &str) -> bool {
        let Ok(source) = ModelSource::parse(identifier) else {
            return false;
        };
        let slot = self
            .backends
            .lock()
            .ok()
            .and_then(|mut backends| backends.remove(&source.to_string()));
        slot.is_some_and(|slot| slot_is_filled(&slot))
    }

    fn load_with_retry(
        &self,
        identifier: &str,
        source: &ModelSource,
    ) -> Result<Box<dyn DetectorBackend>, PipelineError> {
        let first = self.load_once(source);
        let err = match first {
            Ok(backend) => return Ok(backend),
            Err(err) => err,
        };
        if !source.retries_on_failure() {
            return Err(PipelineError::model_unavailable(identifier, &err));
        }

        log::warn!(
            "loading {} failed ({:#}); retrying once, check network access",
            identifier,
            err
        );
        self.load_once(source)
            .map_err(|err| PipelineError::model_unavailable(identifier, &err))
    }

    fn load_once(&self, source: &ModelSource) -> Result<Box<dyn DetectorBackend>> {
        let mut backend = self.loader.load(source)?;
        backend.warm_up()?;
        Ok(backend)
    }

    fn lock_backends(
        &self,
        identifier: &str,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<String, Slot>>, PipelineError> {
        self.backends.lock().map_err(|_| poisoned(identifier))
    }
}

fn slot_is_filled(slot: &Slot) -> bool {
    slot.lock().map(|slot| slot.is_some()).unwrap_or(false)
}

fn poisoned(identifier: &str) -> PipelineError {
    PipelineError::ModelUnavailable {
        model: identifier.to_string(),
        reason: "model cache lock poisoned".to_string(),
    }
}

/// Loader used by the binaries: stub identifiers get the built-in backend,
/// weights files go to the tract backend when it is compiled in.
pub struct DefaultLoader {
    model_dir: PathBuf,
    labels: HashMap<String, Vec<String>>,
    #[cfg(feature = "model-fetch")]
    fetcher: Option<ModelFetcher>,
}

impl DefaultLoader {
    pub fn new(model_dir: impl Into<PathBuf>) -> Self {
        Self {
            model_dir: model_dir.into(),
            labels: HashMap::new(),
            #[cfg(feature = "model-fetch")]
            fetcher: None,
        }
    }

    /// Class labels for a custom model, keyed by its identifier.
    pub fn with_labels(mut self, identifier: &str, labels: Vec<String>) -> Self {
        if let Ok(source) = ModelSource::parse(identifier) {
            self.labels.insert(source.to_string(), labels);
        }
        self
    }

    #[cfg(feature = "model-fetch")]
    pub fn with_fetcher(mut self, fetcher: ModelFetcher) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    fn resolve_weights(&self, source: &ModelSource) -> Result<PathBuf> {
        let path = source
            .weights_path(&self.model_dir)
            .ok_or_else(|| anyhow!("model {} has no weights file", source))?;
        if path.is_file() {
            return Ok(path);
        }
        match source {
            #[cfg(feature = "model-fetch")]
            ModelSource::WellKnown(stem) => match &self.fetcher {
                Some(fetcher) => {
                    fetcher.fetch(stem, &path)?;
                    Ok(path)
                }
                None => Err(anyhow!(
                    "{} not found and model fetching is not configured",
                    path.display()
                )),
            },
            _ => Err(anyhow!("weights file {} not found", path.display())),
        }
    }
}

impl BackendLoader for DefaultLoader {
    fn load(&self, source: &ModelSource) -> Result<Box<dyn DetectorBackend>> {
        let labels = self.labels.get(&source.to_string()).cloned();
        if let ModelSource::Stub(_) = source {
            // The stub finds a single class; it takes the first configured label.
            let backend = match labels.and_then(|labels| labels.into_iter().next()) {
                Some(label) => StubBackend::with_label(label),
                None => StubBackend::new(),
            };
            return Ok(Box::new(backend));
        }
        let weights = self.resolve_weights(source)?;
        load_weights(weights, labels)
    }
}

#[cfg(feature = "backend-tract")]
fn load_weights(
    weights: PathBuf,
    labels: Option<Vec<String>>,
) -> Result<Box<dyn DetectorBackend>> {
    let mut backend = super::backends::TractBackend::new(&weights)?;
    if let Some(labels) = labels {
        backend = backend.with_labels(labels);
    }
    Ok(Box::new(backend))
}

#[cfg(not(feature = "backend-tract"))]
fn load_weights(
    weights: PathBuf,
    _labels: Option<Vec<String>>,
) -> Result<Box<dyn DetectorBackend>> {
    Err(anyhow!(
        "cannot load {}: built without the backend-tract feature",
        weights.display()
    ))
}
