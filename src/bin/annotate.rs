//! annotate - run object detection over an image or video file
//!
//! Mirrors the upload form: the file is routed by extension, annotated with
//! the selected model and thresholds, and the result is written to the output
//! directory as `hasil_<model>.jpg` or `hasil_video_<model>.mp4`.

use anyhow::{anyhow, Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use serde::Serialize;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use frame_annotator::config::{AnnotatorConfig, MODEL_PRESETS};
use frame_annotator::media::{self, MediaKind};
use frame_annotator::{
    DetectionParams, DetectionSummary, FrameAnnotationPipeline, ModelCache, ModelSource,
};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, global = true, default_value = "auto", value_name = "MODE")]
    ui: String,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Annotate a jpg/jpeg/png image.
    Image(RunArgs),
    /// Annotate an mp4 video frame by frame.
    Video(RunArgs),
    /// List model presets and whether their weights are present.
    Models,
}

#[derive(ClapArgs, Debug)]
struct RunArgs {
    /// Input file.
    input: PathBuf,
    /// Model preset (custom, yolov8n, yolo11n) or model identifier.
    #[arg(long)]
    model: Option<String>,
    /// Confidence threshold.
    #[arg(long)]
    conf: Option<f32>,
    /// IoU threshold for overlap suppression.
    #[arg(long)]
    iou: Option<f32>,
    /// Inference image size.
    #[arg(long)]
    imgsz: Option<u32>,
    /// Directory the annotated result is written to.
    #[arg(long)]
    out_dir: Option<PathBuf>,
    /// Print a JSON summary on stdout.
    #[arg(long)]
    json: bool,
}

#[derive(Serialize)]
struct RunReport<'a> {
    kind: &'static str,
    model: String,
    artifact: &'a Path,
    mime: &'static str,
    bytes: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    detections: Option<DetectionSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    frames: Option<u64>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let is_tty = std::io::stderr().is_terminal();
    let stdout_is_tty = std::io::stdout().is_terminal();
    let ui = ui::Ui::from_args(Some(&cli.ui), is_tty, !stdout_is_tty);
    let cfg = AnnotatorConfig::load()?;

    match cli.command {
        Command::Image(args) => run(&ui, cfg, args, MediaKind::Image),
        Command::Video(args) => run(&ui, cfg, args, MediaKind::Video),
        Command::Models => list_models(&cfg),
    }
}

fn run(ui: &ui::Ui, mut cfg: AnnotatorConfig, args: RunArgs, expected: MediaKind) -> Result<()> {
    let file_name = args
        .input
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| anyhow!("input {} has no file name", args.input.display()))?;
    let kind = media::classify_upload(&file_name)?;
    if kind != expected {
        return Err(anyhow!(
            "{} is a {:?} upload; use the {} command",
            file_name,
            kind,
            command_name(kind)
        ));
    }

    if let Some(model) = args.model {
        cfg.model = model;
    }
    if let Some(dir) = args.out_dir {
        cfg.output_dir = dir;
    }
    let params = DetectionParams::new(
        args.conf.unwrap_or(cfg.params.confidence),
        args.iou.unwrap_or(cfg.params.overlap),
        args.imgsz.unwrap_or(cfg.params.input_size),
    )?;
    let model_id = cfg.resolve_model();
    let source = ModelSource::parse(&model_id)?;

    let cache = Arc::new(ModelCache::new(cfg.build_loader()?));
    let pipeline = FrameAnnotationPipeline::new(cache, model_id.clone());
    let upload = std::fs::read(&args.input)
        .with_context(|| format!("failed to read {}", args.input.display()))?;
    std::fs::create_dir_all(&cfg.output_dir).with_context(|| {
        format!(
            "failed to create output directory {}",
            cfg.output_dir.display()
        )
    })?;

    match kind {
        MediaKind::Image => {
            let image = {
                let _stage = ui.stage("Decode image");
                media::decode_image(&upload)?
            };
            let result = {
                let _stage = ui.stage("Detect objects");
                pipeline.annotate_image(&image, &params)?
            };
            let artifact = media::image_artifact(&result.annotated, &source)?;
            let path = artifact.write_into(&cfg.output_dir)?;
            let summary = result.summary();
            if args.json {
                print_json(&RunReport {
                    kind: "image",
                    model: model_id,
                    artifact: &path,
                    mime: artifact.mime,
                    bytes: artifact.bytes.len(),
                    detections: Some(summary),
                    frames: None,
                })?;
            } else {
                println!("{}", summary.message);
                println!("saved {}", path.display());
            }
            Ok(())
        }
        MediaKind::Video => {
            let destination = media::video_artifact_path(&cfg.output_dir, &source);
            let frames = annotate_video(ui, &pipeline, &upload, &destination, &params)?;
            let artifact = media::video_artifact(&destination, &source)?;
            if args.json {
                print_json(&RunReport {
                    kind: "video",
                    model: model_id,
                    artifact: &destination,
                    mime: artifact.mime,
                    bytes: artifact.bytes.len(),
                    detections: None,
                    frames: Some(frames),
                })?;
            } else {
                println!("Done! Annotated {} frames.", frames);
                println!(
                    "saved {} ({} bytes)",
                    destination.display(),
                    artifact.bytes.len()
                );
            }
            Ok(())
        }
    }
}

#[cfg(feature = "ffmpeg")]
fn annotate_video(
    ui: &ui::Ui,
    pipeline: &FrameAnnotationPipeline,
    upload: &[u8],
    destination: &Path,
    params: &DetectionParams,
) -> Result<u64> {
    use frame_annotator::video::{FfmpegFileSource, Mp4vFactory};
    use frame_annotator::{FrameTotal, VideoJob};
    use std::sync::atomic::{AtomicBool, Ordering};

    let job = {
        let _stage = ui.stage("Open video");
        VideoJob::new(FfmpegFileSource::from_upload(upload)?)
    };

    let stop = Arc::new(AtomicBool::new(false));
    let handler_stop = stop.clone();
    ctrlc::set_handler(move || {
        handler_stop.store(true, Ordering::SeqCst);
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    let mut progress = ui.frame_progress(FrameTotal::from_hint(job.info().total_frames_hint), stop);
    let outcome = pipeline.annotate_video(
        job,
        Mp4vFactory::new(destination),
        params,
        &mut progress,
    )?;
    log::info!("wrote {}", outcome.output.display());
    Ok(outcome.frames_processed)
}

#[cfg(not(feature = "ffmpeg"))]
fn annotate_video(
    _ui: &ui::Ui,
    _pipeline: &FrameAnnotationPipeline,
    _upload: &[u8],
    _destination: &Path,
    _params: &DetectionParams,
) -> Result<u64> {
    Err(anyhow!(
        "video annotation requires a build with the ffmpeg feature"
    ))
}

fn list_models(cfg: &AnnotatorConfig) -> Result<()> {
    for (preset, identifier) in MODEL_PRESETS {
        let source = ModelSource::parse(identifier)?;
        let status = match source.weights_path(&cfg.model_dir) {
            Some(path) if path.is_file() => format!("present ({})", path.display()),
            Some(path) => format!("missing ({})", path.display()),
            None => "built in".to_string(),
        };
        let marker = if *preset == cfg.model { "*" } else { " " };
        println!("{marker} {preset:<8} {identifier:<26} {status}");
    }
    Ok(())
}

fn command_name(kind: MediaKind) -> &'static str {
    match kind {
        MediaKind::Image => "image",
        MediaKind::Video => "video",
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}
