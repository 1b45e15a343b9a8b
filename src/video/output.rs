use anyhow::{anyhow, Result};

use super::source::VideoInfo;
use crate::frame::RgbFrame;

/// Output container receiving annotated frames in order.
///
/// Exactly one of `finalize` or `discard` ends its life on the normal paths;
/// implementations that hold OS resources also release them in `Drop`.
pub trait VideoOutput {
    /// Handle returned once the container is complete (a path, an in-memory clip).
    type Finished;

    fn write_frame(&mut self, frame: &RgbFrame) -> Result<()>;

    /// Flush and close the container.
    fn finalize(self) -> Result<Self::Finished>;

    /// Abandon a partially written container.
    fn discard(self);
}

/// Opens an output for a given stream description.
pub trait OutputFactory {
    type Output: VideoOutput;

    fn open(self, info: &VideoInfo) -> Result<Self::Output>;
}

impl<F, O> OutputFactory for F
where
    F: FnOnce(&VideoInfo) -> Result<O>,
    O: VideoOutput,
{
    type Output = O;

    fn open(self, info: &VideoInfo) -> Result<O> {
        self(info)
    }
}

/// Collect annotated frames in memory.
#[derive(Clone, Copy, Debug, Default)]
pub struct InMemory;

impl OutputFactory for InMemory {
    type Output = MemoryOutput;

    fn open(self, info: &VideoInfo) -> Result<MemoryOutput> {
        Ok(MemoryOutput {
            info: *info,
            frames: Vec::new(),
        })
    }
}

pub struct MemoryOutput {
    info: VideoInfo,
    frames: Vec<RgbFrame>,
}

/// Finished in-memory output.
#[derive(Clone, Debug)]
pub struct AnnotatedClip {
    pub info: VideoInfo,
    pub frames: Vec<RgbFrame>,
}

impl VideoOutput for MemoryOutput {
    type Finished = AnnotatedClip;

    fn write_frame(&mut self, frame: &RgbFrame) -> Result<()> {
        if frame.dimensions() != (self.info.width, self.info.height) {
            return Err(anyhow!(
                "frame is {}x{}, output was opened for {}x{}",
                frame.width(),
                frame.height(),
                self.info.width,
                self.info.height
            ));
        }
        self.frames.push(frame.clone());
        Ok(())
    }

    fn finalize(self) -> Result<AnnotatedClip> {
        Ok(AnnotatedClip {
            info: self.info,
            frames: self.frames,
        })
    }

    fn discard(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::source::FrameRate;

    #[test]
    fn memory_output_rejects_mismatched_frames() -> Result<()> {
        let info = VideoInfo::new(FrameRate::fps(10)?, 4, 4, None);
        let mut output = InMemory.open(&info)?;
        output.write_frame(&RgbFrame::filled(4, 4, [0, 0, 0]))?;
        assert!(output.write_frame(&RgbFrame::filled(5, 4, [0, 0, 0])).is_err());
        let clip = output.finalize()?;
        assert_eq!(clip.frames.len(), 1);
        Ok(())
    }
}
