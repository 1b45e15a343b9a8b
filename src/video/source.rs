use anyhow::{anyhow, Result};
use std::collections::VecDeque;

use crate::frame::RgbFrame;

/// Frame rate as a rational number of frames per second.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameRate {
    pub num: u32,
    pub den: u32,
}

impl FrameRate {
    pub fn new(num: u32, den: u32) -> Result<Self> {
        if num == 0 || den == 0 {
            return Err(anyhow!("frame rate must be positive, got {}/{}", num, den));
        }
        Ok(Self { num, den })
    }

    pub fn fps(fps: u32) -> Result<Self> {
        Self::new(fps, 1)
    }

    pub fn as_f64(&self) -> f64 {
        self.num as f64 / self.den as f64
    }

    /// Closest rate whose numerator and denominator both fit in `max`,
    /// taken from the continued-fraction convergents of `num / den`.
    pub fn limited(self, max: u32) -> Self {
        let max = u64::from(max.max(1));
        if u64::from(self.num) <= max && u64::from(self.den) <= max {
            return self;
        }
        let (mut n, mut d) = (u64::from(self.num), u64::from(self.den));
        let (mut p0, mut q0, mut p1, mut q1) = (0u64, 1u64, 1u64, 0u64);
        while d != 0 {
            let a = n / d;
            let (p2, q2) = (a * p1 + p0, a * q1 + q0);
            if p2 > max || q2 > max {
                break;
            }
            (p0, q0, p1, q1) = (p1, q1, p2, q2);
            (n, d) = (d, n % d);
        }
        match (p1, q1) {
            // Faster than max/1 or slower than 1/max.
            (_, 0) => Self { num: max as u32, den: 1 },
            (0, _) => Self { num: 1, den: max as u32 },
            (num, den) => Self {
                num: num as u32,
                den: den as u32,
            },
        }
    }
}

/// Stream metadata an output container is opened with.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VideoInfo {
    pub frame_rate: FrameRate,
    pub width: u32,
    pub height: u32,
    /// Frame count from container metadata. Advisory only; `None` when unknown.
    pub total_frames_hint: Option<u64>,
}

impl VideoInfo {
    pub fn new(frame_rate: FrameRate, width: u32, height: u32, hint: Option<u64>) -> Self {
        Self {
            frame_rate,
            width,
            height,
            total_frames_hint: hint.filter(|n| *n > 0),
        }
    }
}

/// One-pass, non-restartable source of decoded frames.
pub trait FrameSource {
    fn info(&self) -> VideoInfo;

    /// Next frame in presentation order, or `None` at end of stream.
    fn next_frame(&mut self) -> Result<Option<RgbFrame>>;
}

/// A video to annotate: the frame source plus the metadata captured when it was opened.
pub struct VideoJob<S> {
    source: S,
    info: VideoInfo,
}

impl<S: FrameSource> VideoJob<S> {
    pub fn new(source: S) -> Self {
        let info = source.info();
        Self { source, info }
    }

    pub fn info(&self) -> &VideoInfo {
        &self.info
    }

    pub(crate) fn next_frame(&mut self) -> Result<Option<RgbFrame>> {
        self.source.next_frame()
    }
}

/// Frames held in memory, e.g. decoded elsewhere or built by a test.
pub struct MemorySource {
    frames: VecDeque<RgbFrame>,
    info: VideoInfo,
}

impl MemorySource {
    /// The total hint defaults to the number of frames given.
    pub fn new(frames: Vec<RgbFrame>, frame_rate: FrameRate) -> Self {
        let (width, height) = frames.first().map(|f| f.dimensions()).unwrap_or((0, 0));
        let hint = Some(frames.len() as u64);
        Self {
            frames: frames.into(),
            info: VideoInfo::new(frame_rate, width, height, hint),
        }
    }

    /// Override the advisory frame count, as a container with bad metadata would.
    pub fn with_total_hint(mut self, hint: Option<u64>) -> Self {
        self.info.total_frames_hint = hint.filter(|n| *n > 0);
        self
    }
}

impl FrameSource for MemorySource {
    fn info(&self) -> VideoInfo {
        self.info
    }

    fn next_frame(&mut self) -> Result<Option<RgbFrame>> {
        Ok(self.frames.pop_front())
    }
}

/// Generated clip: dark gradient background with a bright square sliding
/// left to right, one step per frame.
pub struct SyntheticSource {
    info: VideoInfo,
    frame_count: u64,
    total: u64,
}

impl SyntheticSource {
    pub fn new(width: u32, height: u32, frame_rate: FrameRate, total: u64) -> Self {
        Self {
            info: VideoInfo::new(frame_rate, width, height, Some(total)),
            frame_count: 0,
            total,
        }
    }

    /// Side length of the moving square.
    pub fn square_size(&self) -> u32 {
        (self.info.width.min(self.info.height) / 8).max(2)
    }

    /// Top-left corner of the square in frame `index`.
    pub fn square_origin(&self, index: u64) -> (u32, u32) {
        let size = self.square_size();
        let travel = self.info.width.saturating_sub(size).max(1) as u64;
        let x = (index * u64::from(size) / 2) % travel;
        let y = self.info.height.saturating_sub(size) / 2;
        (x as u32, y)
    }

    fn render(&self, index: u64) -> RgbFrame {
        let (width, height) = (self.info.width, self.info.height);
        let mut frame = RgbFrame::filled(width, height, [0, 0, 0]);
        for y in 0..height {
            let shade = (y * 96 / height.max(1)) as u8;
            frame.fill_rect(0, y, width, 1, [shade / 2, shade / 2, shade]);
        }
        let (x, y) = self.square_origin(index);
        let size = self.square_size();
        frame.fill_rect(x, y, size, size, [250, 250, 250]);
        frame
    }
}

impl FrameSource for SyntheticSource {
    fn info(&self) -> VideoInfo {
        self.info
    }

    fn next_frame(&mut self) -> Result<Option<RgbFrame>> {
        if self.frame_count >= self.total {
            return Ok(None);
        }
        let frame = self.render(self.frame_count);
        self.frame_count += 1;
        Ok(Some(frame))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_hint_means_unknown() -> Result<()> {
        let info = VideoInfo::new(FrameRate::fps(30)?, 4, 4, Some(0));
        assert_eq!(info.total_frames_hint, None);
        Ok(())
    }

    #[test]
    fn limited_rate_fits_encoder_time_base() -> Result<()> {
        let odd = FrameRate::new(17_280_000, 576_037)?;
        let limited = odd.limited(65_535);
        assert!(limited.num <= 65_535 && limited.den <= 65_535);
        assert!((limited.as_f64() - odd.as_f64()).abs() < 1e-3);

        let ntsc = FrameRate::new(30_000, 1_001)?;
        assert_eq!(ntsc.limited(65_535), ntsc);
        assert_eq!(FrameRate::fps(25)?.limited(65_535), FrameRate::fps(25)?);
        assert_eq!(FrameRate::new(90_000, 1)?.limited(65_535).num, 65_535);
        Ok(())
    }

    #[test]
    fn frame_rate_rejects_zero() {
        assert!(FrameRate::new(0, 1).is_err());
        assert!(FrameRate::new(30, 0).is_err());
        assert_eq!(FrameRate::new(30000, 1001).unwrap().as_f64().round(), 30.0);
    }

    #[test]
    fn memory_source_drains_in_order() -> Result<()> {
        let frames = vec![
            RgbFrame::filled(2, 2, [1, 1, 1]),
            RgbFrame::filled(2, 2, [2, 2, 2]),
        ];
        let mut job = VideoJob::new(MemorySource::new(frames, FrameRate::fps(25)?));
        assert_eq!(job.info().total_frames_hint, Some(2));
        assert_eq!(job.next_frame()?.unwrap().pixel(0, 0), Some([1, 1, 1]));
        assert_eq!(job.next_frame()?.unwrap().pixel(0, 0), Some([2, 2, 2]));
        assert!(job.next_frame()?.is_none());
        Ok(())
    }

    #[test]
    fn synthetic_source_ends_after_total() -> Result<()> {
        let mut source = SyntheticSource::new(64, 48, FrameRate::fps(10)?, 3);
        let mut count = 0;
        while let Some(frame) = source.next_frame()? {
            let (x, y) = source.square_origin(count);
            assert_eq!(frame.pixel(x, y), Some([250, 250, 250]));
            count += 1;
        }
        assert_eq!(count, 3);
        Ok(())
    }
}
