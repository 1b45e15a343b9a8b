//! Upload routing and download artifacts.
//!
//! Uploads are routed by file extension only; the content is not sniffed.
//! Results are handed back as named artifacts (`hasil_<model>.jpg`,
//! `hasil_video_<model>.mp4`).

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use image::codecs::jpeg::JpegEncoder;

use crate::detect::ModelSource;
use crate::error::{PipelineError, Result};
use crate::frame::RgbFrame;

pub const IMAGE_MIME: &str = "image/jpeg";
pub const VIDEO_MIME: &str = "video/mp4";

const JPEG_QUALITY: u8 = 90;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
}

/// Decide how an upload is processed from its file name.
pub fn classify_upload(file_name: &str) -> Result<MediaKind> {
    let extension = Path::new(file_name)
        .extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase());
    match extension.as_deref() {
        Some("jpg" | "jpeg" | "png") => Ok(MediaKind::Image),
        Some("mp4") => Ok(MediaKind::Video),
        Some(other) => Err(PipelineError::UnsupportedMedia(format!(
            "{file_name}: .{other} files are not supported (use jpg, jpeg, png or mp4)"
        ))),
        None => Err(PipelineError::UnsupportedMedia(format!(
            "{file_name}: no file extension"
        ))),
    }
}

/// Decode an uploaded image into an RGB frame. Alpha is dropped.
pub fn decode_image(bytes: &[u8]) -> Result<RgbFrame> {
    let image = image::load_from_memory(bytes)
        .map_err(|err| PipelineError::Decode(err.to_string()))?;
    Ok(RgbFrame::from_image(image.to_rgb8()))
}

pub fn encode_jpeg(frame: &RgbFrame) -> anyhow::Result<Vec<u8>> {
    let image = frame.clone().into_image()?;
    let mut bytes = Vec::new();
    image
        .write_with_encoder(JpegEncoder::new_with_quality(&mut bytes, JPEG_QUALITY))
        .context("encode annotated image as JPEG")?;
    Ok(bytes)
}

pub fn image_artifact_name(model: &ModelSource) -> String {
    format!("hasil_{}.jpg", model.artifact_label())
}

pub fn video_artifact_name(model: &ModelSource) -> String {
    format!("hasil_video_{}.mp4", model.artifact_label())
}

/// Where the annotated video for `model` is written inside `out_dir`.
pub fn video_artifact_path(out_dir: &Path, model: &ModelSource) -> PathBuf {
    out_dir.join(video_artifact_name(model))
}

/// A downloadable result.
#[derive(Clone, Debug)]
pub struct Artifact {
    pub file_name: String,
    pub mime: &'static str,
    pub bytes: Vec<u8>,
}

impl Artifact {
    /// Write the artifact into `dir`, replacing any previous result of the same name.
    pub fn write_into(&self, dir: &Path) -> anyhow::Result<PathBuf> {
        fs::create_dir_all(dir)
            .with_context(|| format!("create output directory {}", dir.display()))?;
        let path = dir.join(&self.file_name);
        fs::write(&path, &self.bytes).with_context(|| format!("write {}", path.display()))?;
        Ok(path)
    }
}

/// JPEG artifact for an annotated image.
pub fn image_artifact(annotated: &RgbFrame, model: &ModelSource) -> Result<Artifact> {
    let bytes = encode_jpeg(annotated)
        .map_err(|err| PipelineError::OutputWrite(format!("{:#}", err)))?;
    Ok(Artifact {
        file_name: image_artifact_name(model),
        mime: IMAGE_MIME,
        bytes,
    })
}

/// Load a finalized video file as an artifact.
pub fn video_artifact(path: &Path, model: &ModelSource) -> Result<Artifact> {
    let bytes = fs::read(path).map_err(|err| {
        PipelineError::OutputWrite(format!("read {}: {}", path.display(), err))
    })?;
    Ok(Artifact {
        file_name: video_artifact_name(model),
        mime: VIDEO_MIME,
        bytes,
    })
}
