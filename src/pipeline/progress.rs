/// Total frame count as far as the job knows it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameTotal {
    Known(u64),
    /// Container metadata did not report a usable count.
    Unknown,
}

impl FrameTotal {
    pub fn from_hint(hint: Option<u64>) -> Self {
        match hint {
            Some(n) if n > 0 => Self::Known(n),
            _ => Self::Unknown,
        }
    }
}

/// Progress after a frame has been written.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProgressReport {
    pub frames_processed: u64,
    pub total: FrameTotal,
    /// In `[0, 1]`; stays at 0 while the total is unknown, 1 once finished.
    pub fraction_complete: f32,
    /// Set only on the last report, after the output has been finalized.
    pub finished: bool,
}

impl ProgressReport {
    pub(crate) fn after_frame(frames_processed: u64, total: FrameTotal) -> Self {
        let fraction_complete = match total {
            // Clamped: the container's count may undershoot the real stream.
            FrameTotal::Known(n) => (frames_processed as f64 / n as f64).min(1.0) as f32,
            FrameTotal::Unknown => 0.0,
        };
        Self {
            frames_processed,
            total,
            fraction_complete,
            finished: false,
        }
    }

    pub(crate) fn completed(frames_processed: u64, total: FrameTotal) -> Self {
        Self {
            frames_processed,
            total,
            fraction_complete: 1.0,
            finished: true,
        }
    }

    /// Fraction to display, or `None` while the total is unknown.
    pub fn fraction(&self) -> Option<f32> {
        match (self.total, self.finished) {
            (_, true) | (FrameTotal::Known(_), false) => Some(self.fraction_complete),
            (FrameTotal::Unknown, false) => None,
        }
    }

    /// "frame N/M" style status line.
    pub fn status_line(&self) -> String {
        if self.finished {
            return format!("Processing finished ({} frames)", self.frames_processed);
        }
        match self.total {
            FrameTotal::Known(n) => format!("Processing frame {}/{}", self.frames_processed, n),
            FrameTotal::Unknown => format!("Processing frame {}/?", self.frames_processed),
        }
    }
}

/// What the job should do after a progress report.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Control {
    Continue,
    Stop,
}

/// Receives progress reports between frames and may stop the job.
pub trait ProgressSink {
    fn report(&mut self, report: &ProgressReport) -> Control;
}

impl<F> ProgressSink for F
where
    F: FnMut(&ProgressReport) -> Control,
{
    fn report(&mut self, report: &ProgressReport) -> Control {
        self(report)
    }
}

/// Sink that ignores reports and never stops.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&mut self, _report: &ProgressReport) -> Control {
        Control::Continue
    }
}
