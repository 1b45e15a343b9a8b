//! Frame annotation pipeline.
//!
//! Runs the detection capability over a single image or, frame by frame, over
//! a video, writing annotated frames to an output container and reporting
//! progress between frames. Processing is strictly sequential: one frame in,
//! one annotated frame out, in source order.

mod progress;

use std::sync::Arc;

pub use progress::{Control, FrameTotal, NoProgress, ProgressReport, ProgressSink};

use crate::detect::{DetectionResult, ModelCache, SharedBackend};
use crate::error::{PipelineError, Result};
use crate::frame::RgbFrame;
use crate::params::DetectionParams;
use crate::video::{FrameSource, OutputFactory, VideoJob, VideoOutput};

/// Annotates images and videos with one model from a shared cache.
///
/// The backend is looked up on every call, so a model that cannot be loaded
/// is reported by the call itself, before any pixel is touched.
#[derive(Clone)]
pub struct FrameAnnotationPipeline {
    cache: Arc<ModelCache>,
    model: String,
}

/// Result of a completed video job.
#[derive(Debug)]
pub struct VideoOutcome<T> {
    /// Finalized output container.
    pub output: T,
    pub frames_processed: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum JobState {
    Idle,
    OutputOpened,
    ProcessingFrame(u64),
    Finalized,
    Failed,
}

struct JobTracker<'a> {
    model: &'a str,
    state: JobState,
}

impl<'a> JobTracker<'a> {
    fn new(model: &'a str) -> Self {
        Self {
            model,
            state: JobState::Idle,
        }
    }

    fn enter(&mut self, next: JobState) {
        log::debug!("video job [{}]: {:?} -> {:?}", self.model, self.state, next);
        self.state = next;
    }

    /// Discard the partial output and move to `Failed`.
    fn fail<O: VideoOutput>(&mut self, output: O, err: PipelineError) -> PipelineError {
        output.discard();
        self.abort(err)
    }

    fn abort(&mut self, err: PipelineError) -> PipelineError {
        log::warn!(
            "video job [{}] failed in state {:?}: {}",
            self.model,
            self.state,
            err
        );
        self.enter(JobState::Failed);
        err
    }
}

impl FrameAnnotationPipeline {
    pub fn new(cache: Arc<ModelCache>, model: impl Into<String>) -> Self {
        Self {
            cache,
            model: model.into(),
        }
    }

    /// Model identifier this pipeline runs.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Run detection once on `image` and return its boxes and overlay.
    ///
    /// Zero detections is a successful result.
    pub fn annotate_image(
        &self,
        image: &RgbFrame,
        params: &DetectionParams,
    ) -> Result<DetectionResult> {
        params.validate()?;
        let backend = self.cache.acquire(&self.model)?;
        let result = detect_frame(&backend, image, params)?;
        log::info!(
            "image {}x{}: {} objects with {}",
            image.width(),
            image.height(),
            result.object_count(),
            self.model
        );
        Ok(result)
    }

    /// Annotate every frame of `job` into an output opened from `output`.
    ///
    /// The output is opened before the first frame is read; any failure after
    /// that discards it. The job ends when the source reports end of stream,
    /// whatever the container's frame-count hint said.
    pub fn annotate_video<S, F>(
        &self,
        mut job: VideoJob<S>,
        output: F,
        params: &DetectionParams,
        progress: &mut dyn ProgressSink,
    ) -> Result<VideoOutcome<<F::Output as VideoOutput>::Finished>>
    where
        S: FrameSource,
        F: OutputFactory,
    {
        let mut tracker = JobTracker::new(&self.model);
        if let Err(err) = params.validate() {
            return Err(tracker.abort(err));
        }
        let backend = match self.cache.acquire(&self.model) {
            Ok(backend) => backend,
            Err(err) => return Err(tracker.abort(err)),
        };

        let info = *job.info();
        let mut sink = match output.open(&info) {
            Ok(sink) => sink,
            Err(err) => {
                return Err(tracker.abort(PipelineError::OutputInit(format!("{:#}", err))));
            }
        };
        tracker.enter(JobState::OutputOpened);
        log::info!(
            "annotating video {}x{} @ {:.2} fps with {}",
            info.width,
            info.height,
            info.frame_rate.as_f64(),
            self.model
        );

        let total = FrameTotal::from_hint(info.total_frames_hint);
        let mut processed = 0u64;
        loop {
            let frame = match job.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(err) => {
                    let err = PipelineError::Source(format!("{:#}", err));
                    return Err(tracker.fail(sink, err));
                }
            };
            tracker.enter(JobState::ProcessingFrame(processed));

            let result = match detect_frame(&backend, &frame, params) {
                Ok(result) => result,
                Err(err) => return Err(tracker.fail(sink, err)),
            };
            if let Err(err) = sink.write_frame(&result.annotated) {
                let err = PipelineError::OutputWrite(format!("{:#}", err));
                return Err(tracker.fail(sink, err));
            }
            processed += 1;

            let report = ProgressReport::after_frame(processed, total);
            if progress.report(&report) == Control::Stop {
                let err = PipelineError::Cancelled {
                    frames_processed: processed,
                };
                return Err(tracker.fail(sink, err));
            }
        }

        let finished = match sink.finalize() {
            Ok(finished) => finished,
            Err(err) => {
                return Err(tracker.abort(PipelineError::OutputWrite(format!("{:#}", err))));
            }
        };
        tracker.enter(JobState::Finalized);
        log::info!("video annotated: {} frames", processed);

        let _ = progress.report(&ProgressReport::completed(processed, total));
        Ok(VideoOutcome {
            output: finished,
            frames_processed: processed,
        })
    }
}

/// One inference call under the backend lock.
fn detect_frame(
    backend: &SharedBackend,
    frame: &RgbFrame,
    params: &DetectionParams,
) -> Result<DetectionResult> {
    let result = {
        let mut guard = backend
            .lock()
            .map_err(|_| PipelineError::Inference("detection backend lock poisoned".to_string()))?;
        guard
            .detect(frame, params)
            .map_err(|err| PipelineError::inference(&err))?
    };
    if result.annotated.dimensions() != frame.dimensions() {
        return Err(PipelineError::Inference(format!(
            "backend returned a {}x{} overlay for a {}x{} frame",
            result.annotated.width(),
            result.annotated.height(),
            frame.width(),
            frame.height()
        )));
    }
    Ok(result)
}
