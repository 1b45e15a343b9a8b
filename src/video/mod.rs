//! Video frame sources and annotated output containers.

#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;
pub mod output;
pub mod source;

#[cfg(feature = "ffmpeg")]
pub use self::ffmpeg::{FfmpegFileSource, Mp4vFactory, Mp4vOutput};
pub use output::{AnnotatedClip, InMemory, MemoryOutput, OutputFactory, VideoOutput};
pub use source::{FrameRate, FrameSource, MemorySource, SyntheticSource, VideoInfo, VideoJob};
