//! FFmpeg bridge: decode an uploaded MP4 into frames and encode annotated
//! frames into an MP4 container with the `mp4v` (MPEG-4 Part 2) codec.

use anyhow::{anyhow, Context, Result};
use ffmpeg_next as ffmpeg;
use ffmpeg_next::{codec, encoder, format, frame, media, software::scaling, Rational};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use super::output::{OutputFactory, VideoOutput};
use super::source::{FrameRate, FrameSource, VideoInfo};
use crate::frame::RgbFrame;

const ENCODE_FORMAT: format::Pixel = format::Pixel::YUV420P;
const SCALE_FLAGS: scaling::Flags = scaling::Flags::BILINEAR;
/// libavcodec's MPEG-4 Part 2 encoder rejects time-base terms above this.
const MPEG4_MAX_TIME_BASE: u32 = 65_535;

// ----------------------------------------------------------------------------
// Input
// ----------------------------------------------------------------------------

/// Local video file decoded to RGB frames.
pub struct FfmpegFileSource {
    input: format::context::Input,
    stream_index: usize,
    decoder: codec::decoder::Video,
    scaler: scaling::Context,
    info: VideoInfo,
    decoded: frame::Video,
    eof_sent: bool,
    // Declared last so the input context is closed before the file is removed.
    _upload: Option<NamedTempFile>,
}

impl FfmpegFileSource {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_inner(path.as_ref(), None)
    }

    /// Persist uploaded bytes to a temporary file and decode from it. The
    /// file is removed when the source is dropped.
    pub fn from_upload(bytes: &[u8]) -> Result<Self> {
        let mut upload = tempfile::Builder::new()
            .suffix(".mp4")
            .tempfile()
            .context("create temporary upload file")?;
        upload
            .write_all(bytes)
            .context("write temporary upload file")?;
        upload.flush().context("flush temporary upload file")?;
        let path = upload.path().to_path_buf();
        Self::open_inner(&path, Some(upload))
    }

    fn open_inner(path: &Path, upload: Option<NamedTempFile>) -> Result<Self> {
        ffmpeg::init().context("initialize ffmpeg")?;
        let input = format::input(&path)
            .with_context(|| format!("failed to open video '{}' with ffmpeg", path.display()))?;
        let stream = input
            .streams()
            .best(media::Type::Video)
            .ok_or_else(|| anyhow!("file has no video track"))?;
        let stream_index = stream.index();
        let frame_rate = to_frame_rate(stream.avg_frame_rate())
            .or_else(|| to_frame_rate(stream.rate()))
            .ok_or_else(|| anyhow!("video stream has no usable frame rate"))?;
        let hint = frame_count_hint(&stream, frame_rate);

        let context = codec::context::Context::from_parameters(stream.parameters())
            .context("load video decoder parameters")?;
        let decoder = context
            .decoder()
            .video()
            .context("open ffmpeg video decoder")?;

        let scaler = scaling::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            format::Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            SCALE_FLAGS,
        )
        .context("create ffmpeg scaler")?;

        let info = VideoInfo::new(frame_rate, decoder.width(), decoder.height(), hint);
        log::info!(
            "opened {} ({}x{} @ {:.2} fps, {} frames)",
            path.display(),
            info.width,
            info.height,
            frame_rate.as_f64(),
            hint.map(|n| n.to_string())
                .unwrap_or_else(|| "unknown".to_string())
        );

        Ok(Self {
            input,
            stream_index,
            decoder,
            scaler,
            info,
            decoded: frame::Video::empty(),
            eof_sent: false,
            _upload: upload,
        })
    }

    fn next_video_packet(&mut self) -> Option<ffmpeg::Packet> {
        for (stream, packet) in self.input.packets() {
            if stream.index() == self.stream_index {
                return Some(packet);
            }
        }
        None
    }

    fn convert_decoded(&mut self) -> Result<RgbFrame> {
        let mut rgb = frame::Video::empty();
        self.scaler
            .run(&self.decoded, &mut rgb)
            .context("scale frame to RGB")?;
        frame_to_rgb(&rgb)
    }
}

impl FrameSource for FfmpegFileSource {
    fn info(&self) -> VideoInfo {
        self.info
    }

    fn next_frame(&mut self) -> Result<Option<RgbFrame>> {
        loop {
            if self.decoder.receive_frame(&mut self.decoded).is_ok() {
                return self.convert_decoded().map(Some);
            }
            if self.eof_sent {
                return Ok(None);
            }
            match self.next_video_packet() {
                Some(packet) => self
                    .decoder
                    .send_packet(&packet)
                    .context("send packet to ffmpeg decoder")?,
                None => {
                    self.decoder.send_eof().context("flush ffmpeg decoder")?;
                    self.eof_sent = true;
                }
            }
        }
    }
}

fn to_frame_rate(rate: Rational) -> Option<FrameRate> {
    let (num, den) = (rate.numerator(), rate.denominator());
    if num <= 0 || den <= 0 {
        return None;
    }
    FrameRate::new(num as u32, den as u32).ok()
}

/// Frame count from stream metadata, falling back to duration x fps.
fn frame_count_hint(stream: &ffmpeg::Stream<'_>, rate: FrameRate) -> Option<u64> {
    let frames = stream.frames();
    if frames > 0 {
        return Some(frames as u64);
    }
    let duration = stream.duration();
    let tb = stream.time_base();
    if duration > 0 && tb.denominator() > 0 {
        let seconds = duration as f64 * tb.numerator() as f64 / tb.denominator() as f64;
        let estimate = (seconds * rate.as_f64()).round() as u64;
        return (estimate > 0).then_some(estimate);
    }
    None
}

fn frame_to_rgb(frame: &frame::Video) -> Result<RgbFrame> {
    let width = frame.width();
    let height = frame.height();
    let row_bytes = width as usize * 3;
    let stride = frame.stride(0);
    let data = frame.data(0);

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        pixels.extend_from_slice(
            data.get(start..start + row_bytes)
                .context("ffmpeg frame row is out of bounds")?,
        );
    }
    RgbFrame::new(pixels, width, height)
}

// ----------------------------------------------------------------------------
// Output
// ----------------------------------------------------------------------------

/// Writes an MP4 (`mp4v`) to a temporary file next to `destination`, moved
/// into place on finalize.
pub struct Mp4vFactory {
    destination: PathBuf,
}

impl Mp4vFactory {
    pub fn new(destination: impl Into<PathBuf>) -> Self {
        Self {
            destination: destination.into(),
        }
    }
}

impl OutputFactory for Mp4vFactory {
    type Output = Mp4vOutput;

    fn open(self, info: &VideoInfo) -> Result<Mp4vOutput> {
        Mp4vOutput::create(self.destination, info)
    }
}

pub struct Mp4vOutput {
    octx: format::context::Output,
    encoder: encoder::Video,
    to_yuv: scaling::Context,
    rgb_frame: frame::Video,
    yuv_frame: frame::Video,
    stream_index: usize,
    encoder_time_base: Rational,
    width: u32,
    height: u32,
    next_pts: i64,
    destination: PathBuf,
    // Declared last so the muxer is closed before the file is removed.
    working: NamedTempFile,
}

impl Mp4vOutput {
    fn create(destination: PathBuf, info: &VideoInfo) -> Result<Self> {
        ffmpeg::init().context("initialize ffmpeg")?;
        if info.width == 0 || info.height == 0 {
            return Err(anyhow!("cannot encode {}x{} video", info.width, info.height));
        }
        let dir = destination
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let working = tempfile::Builder::new()
            .prefix(".annotating-")
            .suffix(".mp4")
            .tempfile_in(dir)
            .with_context(|| format!("create working file in {}", dir.display()))?;

        let mut octx = format::output_as(&working.path(), "mp4")
            .context("could not create mp4 output context")?;
        let global_header = octx
            .format()
            .flags()
            .contains(format::flag::Flags::GLOBAL_HEADER);

        let codec = encoder::find(codec::Id::MPEG4).context("MPEG-4 (mp4v) encoder not found")?;
        let mut stream = octx.add_stream(codec).context("add video stream")?;
        let stream_index = stream.index();

        let rate = info.frame_rate.limited(MPEG4_MAX_TIME_BASE);
        if rate != info.frame_rate {
            log::debug!(
                "frame rate {}/{} approximated as {}/{} for mp4v",
                info.frame_rate.num,
                info.frame_rate.den,
                rate.num,
                rate.den
            );
        }
        let encoder_time_base = Rational::new(rate.den as i32, rate.num as i32);
        let mut video = codec::context::Context::from_parameters(stream.parameters())
            .context("create encoder context")?
            .encoder()
            .video()
            .context("create video encoder")?;
        video.set_width(info.width);
        video.set_height(info.height);
        video.set_format(ENCODE_FORMAT);
        video.set_time_base(encoder_time_base);
        video.set_frame_rate(Some(Rational::new(rate.num as i32, rate.den as i32)));
        if global_header {
            video.set_flags(codec::flag::Flags::GLOBAL_HEADER);
        }
        let encoder = video.open_as(codec).context("open mp4v encoder")?;
        stream.set_parameters(&encoder);
        stream.set_time_base(encoder_time_base);

        octx.write_header().context("write mp4 header")?;

        let to_yuv = scaling::Context::get(
            format::Pixel::RGB24,
            info.width,
            info.height,
            ENCODE_FORMAT,
            info.width,
            info.height,
            SCALE_FLAGS,
        )
        .context("create to-YUV scaler")?;

        log::debug!(
            "mp4v output opened at {} for {}x{}",
            working.path().display(),
            info.width,
            info.height
        );

        Ok(Self {
            octx,
            encoder,
            to_yuv,
            rgb_frame: frame::Video::new(format::Pixel::RGB24, info.width, info.height),
            yuv_frame: frame::Video::empty(),
            stream_index,
            encoder_time_base,
            width: info.width,
            height: info.height,
            next_pts: 0,
            destination,
            working,
        })
    }

    fn drain_packets(&mut self) -> Result<()> {
        let stream_time_base = self
            .octx
            .stream(self.stream_index)
            .map(|s| s.time_base())
            .ok_or_else(|| anyhow!("output stream disappeared"))?;
        let mut packet = ffmpeg::Packet::empty();
        while self.encoder.receive_packet(&mut packet).is_ok() {
            packet.set_stream(self.stream_index);
            packet.rescale_ts(self.encoder_time_base, stream_time_base);
            packet
                .write_interleaved(&mut self.octx)
                .context("write encoded packet")?;
        }
        Ok(())
    }
}

impl VideoOutput for Mp4vOutput {
    type Finished = PathBuf;

    fn write_frame(&mut self, frame: &RgbFrame) -> Result<()> {
        if frame.dimensions() != (self.width, self.height) {
            return Err(anyhow!(
                "frame is {}x{}, encoder was opened for {}x{}",
                frame.width(),
                frame.height(),
                self.width,
                self.height
            ));
        }

        let row_bytes = self.width as usize * 3;
        let stride = self.rgb_frame.stride(0);
        let plane = self.rgb_frame.data_mut(0);
        for (row, src) in frame.as_bytes().chunks_exact(row_bytes).enumerate() {
            let start = row * stride;
            plane[start..start + row_bytes].copy_from_slice(src);
        }

        self.to_yuv
            .run(&self.rgb_frame, &mut self.yuv_frame)
            .context("convert frame to YUV")?;
        self.yuv_frame.set_pts(Some(self.next_pts));
        self.next_pts += 1;

        self.encoder
            .send_frame(&self.yuv_frame)
            .context("send frame to encoder")?;
        self.drain_packets()
    }

    fn finalize(mut self) -> Result<PathBuf> {
        self.encoder.send_eof().context("flush encoder")?;
        self.drain_packets()?;
        self.octx.write_trailer().context("write mp4 trailer")?;

        let Self {
            octx,
            working,
            destination,
            ..
        } = self;
        drop(octx);
        working
            .persist(&destination)
            .map_err(|e| anyhow!("move output to {}: {}", destination.display(), e.error))?;
        log::info!("annotated video written to {}", destination.display());
        Ok(destination)
    }

    fn discard(self) {
        log::debug!(
            "discarding partial output {}",
            self.working.path().display()
        );
    }
}
