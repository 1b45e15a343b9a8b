//! demo - end-to-end synthetic run of the frame annotation pipeline
//!
//! Generates a moving bright square, annotates one still and the whole clip
//! with the built-in stub detector, and writes the results to the output
//! directory. No model weights or codecs are needed.

use anyhow::{anyhow, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use frame_annotator::media;
use frame_annotator::video::{InMemory, SyntheticSource};
use frame_annotator::{
    DefaultLoader, DetectionParams, FrameAnnotationPipeline, FrameRate, FrameSource, FrameTotal,
    ModelCache, ModelSource, VideoJob,
};

#[path = "../ui.rs"]
mod ui;

const DEMO_MODEL: &str = "stub://demo";

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Duration in seconds of the synthetic clip.
    #[arg(long, default_value_t = 3)]
    seconds: u64,
    /// Frames per second for the synthetic source.
    #[arg(long, default_value_t = 10)]
    fps: u32,
    #[arg(long, default_value_t = 320)]
    width: u32,
    #[arg(long, default_value_t = 240)]
    height: u32,
    /// Confidence threshold.
    #[arg(long, default_value_t = 0.5)]
    conf: f32,
    /// Output directory for the annotated results.
    #[arg(long, default_value = "demo_out")]
    out: String,
    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    if args.fps == 0 || args.seconds == 0 {
        return Err(anyhow!("fps and seconds must be >= 1"));
    }
    let is_tty = std::io::stderr().is_terminal();
    let stdout_is_tty = std::io::stdout().is_terminal();
    let ui = ui::Ui::from_args(Some(&args.ui), is_tty, !stdout_is_tty);

    let out_dir = PathBuf::from(&args.out);
    std::fs::create_dir_all(&out_dir)?;

    let params = DetectionParams {
        confidence: args.conf,
        ..DetectionParams::default()
    };
    params.validate()?;
    let model = ModelSource::parse(DEMO_MODEL)?;
    let cache = Arc::new(ModelCache::new(DefaultLoader::new("models")));
    let pipeline = FrameAnnotationPipeline::new(cache, DEMO_MODEL);

    let rate = FrameRate::fps(args.fps)?;
    let total = args.seconds * args.fps as u64;

    let image_path = {
        let _stage = ui.stage("Annotate still image");
        let mut still = SyntheticSource::new(args.width, args.height, rate, 1);
        let frame = still
            .next_frame()?
            .ok_or_else(|| anyhow!("synthetic source produced no frame"))?;
        let result = pipeline.annotate_image(&frame, &params)?;
        println!("{}", result.summary().message);
        media::image_artifact(&result.annotated, &model)?.write_into(&out_dir)?
    };

    let source = SyntheticSource::new(args.width, args.height, rate, total);
    let job = VideoJob::new(source);
    let mut progress = ui.frame_progress(
        FrameTotal::from_hint(job.info().total_frames_hint),
        Arc::new(AtomicBool::new(false)),
    );
    eprintln!("==> Annotate synthetic clip");
    let outcome = pipeline.annotate_video(job, InMemory, &params, &mut progress)?;
    drop(progress);

    let clip = outcome.output;
    let last = clip
        .frames
        .last()
        .ok_or_else(|| anyhow!("annotated clip is empty"))?;
    let last_path = {
        let result_name = format!("last_frame_{}", media::image_artifact_name(&model));
        let mut artifact = media::image_artifact(last, &model)?;
        artifact.file_name = result_name;
        artifact.write_into(&out_dir)?
    };

    println!("Demo complete.");
    println!("  still image: {}", image_path.display());
    println!(
        "  clip: {} frames {}x{} @ {:.1} fps",
        outcome.frames_processed,
        clip.info.width,
        clip.info.height,
        clip.info.frame_rate.as_f64()
    );
    println!("  last annotated frame: {}", last_path.display());
    Ok(())
}
