use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::anyhow;

use frame_annotator::video::{InMemory, MemoryOutput, MemorySource, SyntheticSource};
use frame_annotator::{
    BackendLoader, Control, DefaultLoader, DetectionParams, DetectionResult, DetectorBackend,
    FrameAnnotationPipeline, FrameRate, FrameSource, FrameTotal, ModelCache, ModelSource,
    NoProgress, PipelineError, ProgressReport, RgbFrame, VideoInfo, VideoJob, VideoOutput,
};

fn stub_pipeline() -> FrameAnnotationPipeline {
    let cache = Arc::new(ModelCache::new(DefaultLoader::new("models")));
    FrameAnnotationPipeline::new(cache, "stub://clip")
}

fn synthetic_job(total: u64) -> VideoJob<SyntheticSource> {
    let rate = FrameRate::fps(10).unwrap();
    VideoJob::new(SyntheticSource::new(96, 64, rate, total))
}

/// Frames with one bright square moving down one row per frame.
fn moving_square(count: usize) -> Vec<RgbFrame> {
    (0..count)
        .map(|i| {
            let mut frame = RgbFrame::filled(48, 48, [15, 15, 15]);
            frame.fill_rect(10, 4 + i as u32 * 3, 6, 6, [250, 250, 250]);
            frame
        })
        .collect()
}

#[derive(Default)]
struct OutputLog {
    written: usize,
    finalized: bool,
    discarded: bool,
}

/// Output that records what happened to it.
struct RecordingOutput {
    log: Arc<Mutex<OutputLog>>,
}

impl VideoOutput for RecordingOutput {
    type Finished = usize;

    fn write_frame(&mut self, _frame: &RgbFrame) -> anyhow::Result<()> {
        self.log.lock().unwrap().written += 1;
        Ok(())
    }

    fn finalize(self) -> anyhow::Result<usize> {
        let mut log = self.log.lock().unwrap();
        log.finalized = true;
        Ok(log.written)
    }

    fn discard(self) {
        self.log.lock().unwrap().discarded = true;
    }
}

fn recording() -> (
    impl FnOnce(&VideoInfo) -> anyhow::Result<RecordingOutput>,
    Arc<Mutex<OutputLog>>,
) {
    let log = Arc::new(Mutex::new(OutputLog::default()));
    let handle = log.clone();
    (
        move |_: &VideoInfo| -> anyhow::Result<RecordingOutput> {
            Ok(RecordingOutput { log: handle })
        },
        log,
    )
}

/// Source that counts reads and can fail at a given frame.
struct CountingSource {
    inner: MemorySource,
    info: VideoInfo,
    reads: Arc<AtomicUsize>,
    fail_at: Option<usize>,
}

impl CountingSource {
    fn new(frames: Vec<RgbFrame>, fail_at: Option<usize>) -> (Self, Arc<AtomicUsize>) {
        let reads = Arc::new(AtomicUsize::new(0));
        let inner = MemorySource::new(frames, FrameRate::fps(25).unwrap());
        let info = inner.info();
        (
            Self {
                inner,
                info,
                reads: reads.clone(),
                fail_at,
            },
            reads,
        )
    }
}

impl FrameSource for CountingSource {
    fn info(&self) -> VideoInfo {
        self.info
    }

    fn next_frame(&mut self) -> anyhow::Result<Option<RgbFrame>> {
        let read = self.reads.fetch_add(1, Ordering::SeqCst);
        if Some(read) == self.fail_at {
            return Err(anyhow!("corrupt packet"));
        }
        self.inner.next_frame()
    }
}

#[test]
fn frames_are_annotated_in_source_order() {
    let pipeline = stub_pipeline();
    let frames = moving_square(5);
    let params = DetectionParams::default();
    let job = VideoJob::new(MemorySource::new(frames.clone(), FrameRate::fps(25).unwrap()));

    let outcome = pipeline
        .annotate_video(job, InMemory, &params, &mut NoProgress)
        .expect("annotate video");

    assert_eq!(outcome.frames_processed, 5);
    let clip = outcome.output;
    assert_eq!(clip.frames.len(), 5);
    assert_eq!(clip.info.frame_rate, FrameRate::fps(25).unwrap());
    for (input, output) in frames.iter().zip(&clip.frames) {
        let expected = pipeline.annotate_image(input, &params).unwrap();
        assert_eq!(&expected.annotated, output);
    }
}

#[test]
fn progress_is_monotonic_and_ends_at_one() {
    let pipeline = stub_pipeline();
    let mut reports: Vec<ProgressReport> = Vec::new();
    let mut sink = |report: &ProgressReport| -> Control {
        reports.push(*report);
        Control::Continue
    };

    let outcome = pipeline
        .annotate_video(synthetic_job(8), InMemory, &DetectionParams::default(), &mut sink)
        .expect("annotate video");
    assert_eq!(outcome.frames_processed, 8);

    assert_eq!(reports.len(), 9);
    for pair in reports.windows(2) {
        assert!(pair[1].fraction_complete >= pair[0].fraction_complete);
        assert!(pair[1].frames_processed >= pair[0].frames_processed);
    }
    assert_eq!(reports[0].total, FrameTotal::Known(8));
    assert_eq!(reports[3].frames_processed, 4);
    assert!((reports[3].fraction_complete - 0.5).abs() < f32::EPSILON);

    let last = reports.last().unwrap();
    assert!(last.finished);
    assert_eq!(last.fraction_complete, 1.0);
    assert_eq!(reports.iter().filter(|r| r.finished).count(), 1);
}

#[test]
fn unknown_total_reports_zero_until_finished() {
    let pipeline = stub_pipeline();
    let source = MemorySource::new(moving_square(4), FrameRate::fps(30).unwrap())
        .with_total_hint(None);
    let mut reports: Vec<ProgressReport> = Vec::new();
    let mut sink = |report: &ProgressReport| -> Control {
        reports.push(*report);
        Control::Continue
    };

    let outcome = pipeline
        .annotate_video(
            VideoJob::new(source),
            InMemory,
            &DetectionParams::default(),
            &mut sink,
        )
        .expect("annotate video");
    assert_eq!(outcome.frames_processed, 4);

    let (last, running) = reports.split_last().unwrap();
    assert_eq!(running.len(), 4);
    assert!(running
        .iter()
        .all(|r| r.total == FrameTotal::Unknown && r.fraction_complete == 0.0));
    assert!(last.finished);
    assert_eq!(last.fraction_complete, 1.0);
}

#[test]
fn undershooting_hint_is_advisory() {
    let pipeline = stub_pipeline();
    let source = MemorySource::new(moving_square(6), FrameRate::fps(30).unwrap())
        .with_total_hint(Some(3));
    let mut max_fraction = 0.0f32;
    let mut sink = |report: &ProgressReport| -> Control {
        max_fraction = max_fraction.max(report.fraction_complete);
        Control::Continue
    };

    let outcome = pipeline
        .annotate_video(
            VideoJob::new(source),
            InMemory,
            &DetectionParams::default(),
            &mut sink,
        )
        .expect("annotate video");
    assert_eq!(outcome.frames_processed, 6);
    assert_eq!(outcome.output.frames.len(), 6);
    assert_eq!(max_fraction, 1.0);
}

#[test]
fn output_init_failure_happens_before_any_frame_is_read() {
    let pipeline = stub_pipeline();
    let (source, reads) = CountingSource::new(moving_square(3), None);
    let failing = |_: &VideoInfo| -> anyhow::Result<MemoryOutput> {
        Err(anyhow!("no space left on device"))
    };

    let err = pipeline
        .annotate_video(
            VideoJob::new(source),
            failing,
            &DetectionParams::default(),
            &mut NoProgress,
        )
        .expect_err("output cannot be opened");
    assert!(matches!(err, PipelineError::OutputInit(ref msg) if msg.contains("no space")));
    assert_eq!(reads.load(Ordering::SeqCst), 0);
}

#[test]
fn missing_model_fails_before_output_is_opened() {
    let dir = tempfile::tempdir().unwrap();
    let cache = Arc::new(ModelCache::new(DefaultLoader::new(dir.path())));
    let weights = dir.path().join("best.onnx");
    let pipeline = FrameAnnotationPipeline::new(cache, weights.to_string_lossy());
    let (factory, log) = recording();

    let err = pipeline
        .annotate_video(synthetic_job(3), factory, &DetectionParams::default(), &mut NoProgress)
        .expect_err("model missing");
    assert!(matches!(err, PipelineError::ModelUnavailable { .. }));
    let log = log.lock().unwrap();
    assert_eq!(log.written, 0);
    assert!(!log.finalized && !log.discarded);
}

#[test]
fn invalid_params_fail_before_output_is_opened() {
    let pipeline = stub_pipeline();
    let (factory, log) = recording();
    let params = DetectionParams {
        input_size: 64,
        ..DetectionParams::default()
    };

    let err = pipeline
        .annotate_video(synthetic_job(3), factory, &params, &mut NoProgress)
        .expect_err("bad params");
    assert!(matches!(err, PipelineError::InvalidParams(_)));
    assert_eq!(log.lock().unwrap().written, 0);
}

#[test]
fn stop_request_cancels_and_discards_output() {
    let pipeline = stub_pipeline();
    let (factory, log) = recording();
    let mut sink = |report: &ProgressReport| -> Control {
        if report.frames_processed >= 2 {
            Control::Stop
        } else {
            Control::Continue
        }
    };

    let err = pipeline
        .annotate_video(synthetic_job(10), factory, &DetectionParams::default(), &mut sink)
        .expect_err("job stopped");
    assert!(matches!(
        err,
        PipelineError::Cancelled {
            frames_processed: 2
        }
    ));
    let log = log.lock().unwrap();
    assert_eq!(log.written, 2);
    assert!(log.discarded);
    assert!(!log.finalized);
}

#[test]
fn source_failure_mid_stream_discards_output() {
    let pipeline = stub_pipeline();
    let (source, _reads) = CountingSource::new(moving_square(5), Some(3));
    let (factory, log) = recording();

    let err = pipeline
        .annotate_video(
            VideoJob::new(source),
            factory,
            &DetectionParams::default(),
            &mut NoProgress,
        )
        .expect_err("source fails");
    assert!(matches!(err, PipelineError::Source(ref msg) if msg.contains("corrupt packet")));
    let log = log.lock().unwrap();
    assert_eq!(log.written, 3);
    assert!(log.discarded);
}

#[test]
fn successful_job_finalizes_output() {
    let pipeline = stub_pipeline();
    let (factory, log) = recording();

    let outcome = pipeline
        .annotate_video(synthetic_job(4), factory, &DetectionParams::default(), &mut NoProgress)
        .expect("annotate video");
    assert_eq!(outcome.output, 4);
    let log = log.lock().unwrap();
    assert!(log.finalized);
    assert!(!log.discarded);
}

/// Backend that fails on its third call.
struct FailsOnThird {
    calls: usize,
}

impl DetectorBackend for FailsOnThird {
    fn name(&self) -> &'static str {
        "fails-on-third"
    }

    fn detect(
        &mut self,
        frame: &RgbFrame,
        _params: &DetectionParams,
    ) -> anyhow::Result<DetectionResult> {
        self.calls += 1;
        if self.calls == 3 {
            return Err(anyhow!("out of memory"));
        }
        Ok(DetectionResult {
            boxes: Vec::new(),
            annotated: frame.clone(),
        })
    }
}

struct NoLoader;

impl BackendLoader for NoLoader {
    fn load(&self, source: &ModelSource) -> anyhow::Result<Box<dyn DetectorBackend>> {
        Err(anyhow!("{source} is not registered"))
    }
}

#[test]
fn inference_failure_aborts_job() {
    let cache = Arc::new(ModelCache::new(NoLoader));
    cache
        .register("flaky-gpu", FailsOnThird { calls: 0 })
        .unwrap();
    let pipeline = FrameAnnotationPipeline::new(cache, "flaky-gpu");
    let (factory, log) = recording();

    let err = pipeline
        .annotate_video(synthetic_job(6), factory, &DetectionParams::default(), &mut NoProgress)
        .expect_err("inference fails");
    assert!(matches!(err, PipelineError::Inference(ref msg) if msg.contains("out of memory")));
    let log = log.lock().unwrap();
    assert_eq!(log.written, 2);
    assert!(log.discarded);
}

/// Backend that records how many calls overlap in time.
struct OverlapProbe {
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl DetectorBackend for OverlapProbe {
    fn name(&self) -> &'static str {
        "overlap-probe"
    }

    fn detect(
        &mut self,
        frame: &RgbFrame,
        _params: &DetectionParams,
    ) -> anyhow::Result<DetectionResult> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(2));
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(DetectionResult {
            boxes: Vec::new(),
            annotated: frame.clone(),
        })
    }
}

#[test]
fn concurrent_jobs_sharing_a_model_are_serialized() {
    let in_flight = Arc::new(AtomicUsize::new(0));
    let max_in_flight = Arc::new(AtomicUsize::new(0));
    let cache = Arc::new(ModelCache::new(NoLoader));
    cache
        .register(
            "shared",
            OverlapProbe {
                in_flight: in_flight.clone(),
                max_in_flight: max_in_flight.clone(),
            },
        )
        .unwrap();
    let pipeline = FrameAnnotationPipeline::new(cache, "shared");

    let workers: Vec<_> = (0..3)
        .map(|_| {
            let pipeline = pipeline.clone();
            thread::spawn(move || {
                pipeline
                    .annotate_video(
                        synthetic_job(5),
                        InMemory,
                        &DetectionParams::default(),
                        &mut NoProgress,
                    )
                    .map(|outcome| outcome.frames_processed)
            })
        })
        .collect();

    for worker in workers {
        assert_eq!(worker.join().unwrap().unwrap(), 5);
    }
    assert_eq!(max_in_flight.load(Ordering::SeqCst), 1);
}
