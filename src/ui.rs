use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use frame_annotator::pipeline::{Control, FrameTotal, ProgressReport, ProgressSink};

#[derive(Clone, Copy, Debug)]
pub enum UiMode {
    Auto,
    Plain,
    Pretty,
}

#[derive(Clone, Debug)]
pub struct Ui {
    mode: UiMode,
    is_tty: bool,
    disable_pretty: bool,
}

impl Ui {
    pub fn new(mode: UiMode, is_tty: bool, disable_pretty: bool) -> Self {
        Self {
            mode,
            is_tty,
            disable_pretty,
        }
    }

    pub fn from_args(ui_flag: Option<&str>, is_tty: bool, disable_pretty: bool) -> Self {
        let mode = match ui_flag {
            Some("plain") => UiMode::Plain,
            Some("pretty") => UiMode::Pretty,
            _ => UiMode::Auto,
        };
        Self::new(mode, is_tty, disable_pretty)
    }

    fn use_pretty(&self) -> bool {
        self.is_tty
            && match self.mode {
                UiMode::Pretty => true,
                UiMode::Auto => !self.disable_pretty,
                UiMode::Plain => false,
            }
    }

    pub fn stage(&self, name: &str) -> StageGuard {
        if self.use_pretty() {
            let spinner = ProgressBar::new_spinner();
            spinner.set_draw_target(ProgressDrawTarget::stderr());
            spinner.enable_steady_tick(Duration::from_millis(120));
            let style = ProgressStyle::with_template("{spinner} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner());
            spinner.set_style(style);
            spinner.set_message(format!("{name}…"));
            StageGuard::new(name.to_string(), Some(spinner))
        } else {
            eprintln!("==> {}", name);
            StageGuard::new(name.to_string(), None)
        }
    }

    /// Progress sink for a video job. Setting `stop` ends the job after the
    /// frame in flight.
    pub fn frame_progress(&self, total: FrameTotal, stop: Arc<AtomicBool>) -> FrameProgress {
        let bar = if self.use_pretty() {
            let bar = match total {
                FrameTotal::Known(n) => ProgressBar::new(n),
                FrameTotal::Unknown => ProgressBar::new_spinner(),
            };
            bar.set_draw_target(ProgressDrawTarget::stderr());
            let template = match total {
                FrameTotal::Known(_) => "{bar:40} {pos}/{len} frames ({percent}%) {msg}",
                FrameTotal::Unknown => "{spinner} {pos} frames {msg}",
            };
            let style = ProgressStyle::with_template(template)
                .unwrap_or_else(|_| ProgressStyle::default_bar());
            bar.set_style(style);
            Some(bar)
        } else {
            None
        };
        FrameProgress {
            bar,
            stop,
            last_plain: None,
        }
    }
}

pub struct FrameProgress {
    bar: Option<ProgressBar>,
    stop: Arc<AtomicBool>,
    last_plain: Option<u32>,
}

impl ProgressSink for FrameProgress {
    fn report(&mut self, report: &ProgressReport) -> Control {
        match &self.bar {
            Some(bar) => {
                bar.set_position(report.frames_processed);
                if report.finished {
                    bar.finish_with_message("done");
                }
            }
            None => {
                // Plain output: one line per 10% step, or per 100 frames when the total is unknown.
                let step = match report.fraction() {
                    Some(fraction) => (fraction * 10.0) as u32,
                    None => (report.frames_processed / 100) as u32,
                };
                if report.finished || self.last_plain != Some(step) {
                    self.last_plain = Some(step);
                    eprintln!("    {}", report.status_line());
                }
            }
        }
        if self.stop.load(Ordering::SeqCst) {
            Control::Stop
        } else {
            Control::Continue
        }
    }
}

impl Drop for FrameProgress {
    fn drop(&mut self) {
        if let Some(bar) = &self.bar {
            if !bar.is_finished() {
                bar.abandon();
            }
        }
    }
}

pub struct StageGuard {
    name: String,
    start: Instant,
    spinner: Option<ProgressBar>,
}

impl StageGuard {
    fn new(name: String, spinner: Option<ProgressBar>) -> Self {
        Self {
            name,
            start: Instant::now(),
            spinner,
        }
    }
}

impl Drop for StageGuard {
    fn drop(&mut self) {
        let elapsed = self.start.elapsed();
        let message = format!("✔ {} ({})", self.name, format_duration(elapsed));
        if let Some(spinner) = &self.spinner {
            spinner.finish_with_message(message);
        } else {
            eprintln!("{message}");
        }
    }
}

fn format_duration(duration: Duration) -> String {
    if duration.as_secs() >= 1 {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        format!("{}ms", duration.as_millis())
    }
}
