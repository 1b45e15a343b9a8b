//! Frame Annotator
//!
//! Runs an object-detection model over uploaded images and videos and hands
//! back an annotated copy with boxes drawn over every detection, together with
//! the number of detected objects.
//!
//! # Architecture
//!
//! The crate wires the pieces together; it never looks inside the model:
//!
//! 1. **Detection capability**: a `DetectorBackend` takes one RGB frame and the
//!    detection parameters and returns boxes plus an annotated frame.
//! 2. **Model cache**: backends are loaded once per model identifier and shared;
//!    each inference holds the backend lock.
//! 3. **Pipeline**: `FrameAnnotationPipeline` annotates a single image, or a
//!    video frame by frame in source order with progress between frames.
//! 4. **Media**: uploads are routed by extension and results are named
//!    `hasil_<model>.jpg` / `hasil_video_<model>.mp4`.
//!
//! # Module Structure
//!
//! - `detect`: backend trait, results, model identifiers, cache, rendering
//! - `video`: frame sources and output containers
//! - `pipeline`: image and video annotation, progress reporting
//! - `media`: upload routing, image codecs, artifacts
//! - `config`: file + environment configuration

pub mod config;
pub mod detect;
pub mod error;
pub mod frame;
pub mod media;
pub mod params;
pub mod pipeline;
pub mod video;

pub use config::AnnotatorConfig;
pub use detect::{
    BackendLoader, BoundingBox, DefaultLoader, DetectionResult, DetectionSummary,
    DetectorBackend, ModelCache, ModelSource, StubBackend,
};
pub use error::{PipelineError, Result};
pub use frame::RgbFrame;
pub use media::{classify_upload, Artifact, MediaKind};
pub use params::DetectionParams;
pub use pipeline::{
    Control, FrameAnnotationPipeline, FrameTotal, NoProgress, ProgressReport, ProgressSink,
    VideoOutcome,
};
pub use video::{FrameRate, FrameSource, OutputFactory, VideoInfo, VideoJob, VideoOutput};
