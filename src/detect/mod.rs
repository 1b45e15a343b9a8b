//! Detection capability: the backend seam, its results, and model loading.

pub mod annotate;
mod backend;
pub mod backends;
pub mod fetch;
mod model;
mod registry;
mod result;

pub use backend::DetectorBackend;
pub use backends::StubBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
#[cfg(feature = "model-fetch")]
pub use fetch::ModelFetcher;
pub use model::ModelSource;
pub use registry::{BackendLoader, DefaultLoader, ModelCache, SharedBackend};
pub use result::{suppress_overlaps, BoundingBox, DetectionResult, DetectionSummary};
