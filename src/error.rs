use thiserror::Error;

/// Errors surfaced by the annotation pipeline to its caller.
///
/// Backends, frame sources and outputs report `anyhow::Error` internally; the
/// pipeline maps those onto these kinds, keeping the full context chain in the
/// message so the presentation layer can show it verbatim.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The detection model could not be constructed (missing weights, failed fetch).
    #[error("model '{model}' is unavailable: {reason}")]
    ModelUnavailable { model: String, reason: String },

    /// The detection backend failed while running on a frame.
    #[error("inference failed: {0}")]
    Inference(String),

    /// The annotated output container could not be created.
    #[error("could not open annotated output: {0}")]
    OutputInit(String),

    /// An annotated frame could not be appended to, or finalized in, the output.
    #[error("failed to write annotated output: {0}")]
    OutputWrite(String),

    /// The frame source failed before reaching end of stream.
    #[error("frame source failed: {0}")]
    Source(String),

    #[error("invalid detection parameters: {0}")]
    InvalidParams(String),

    #[error("unsupported upload: {0}")]
    UnsupportedMedia(String),

    #[error("could not decode media: {0}")]
    Decode(String),

    /// The progress sink asked the job to stop.
    #[error("video job cancelled after {frames_processed} frames")]
    Cancelled { frames_processed: u64 },
}

impl PipelineError {
    pub(crate) fn model_unavailable(model: &str, err: &anyhow::Error) -> Self {
        Self::ModelUnavailable {
            model: model.to_string(),
            reason: format!("{:#}", err),
        }
    }

    pub(crate) fn inference(err: &anyhow::Error) -> Self {
        Self::Inference(format!("{:#}", err))
    }
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{anyhow, Context};

    #[test]
    fn messages_keep_context_chain() {
        let err: anyhow::Result<()> = Err(anyhow!("no such file")).context("load weights");
        let mapped = PipelineError::model_unavailable("best.onnx", &err.unwrap_err());
        assert_eq!(
            mapped.to_string(),
            "model 'best.onnx' is unavailable: load weights: no such file"
        );
    }
}
