//! Terminal feedback for the CLI: stage spinners and a frame counter.
//!
//! Pretty output is only used on a TTY; otherwise plain lines go to stderr.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UiMode {
    Auto,
    Plain,
    Pretty,
}

#[derive(Clone, Debug)]
pub struct Ui {
    mode: UiMode,
    is_tty: bool,
}

impl Ui {
    pub fn new(mode: UiMode, is_tty: bool) -> Self {
        Self { mode, is_tty }
    }

    pub fn from_args(ui_flag: Option<&str>, is_tty: bool) -> Self {
        let mode = match ui_flag {
            Some("plain") => UiMode::Plain,
            Some("pretty") => UiMode::Pretty,
            _ => UiMode::Auto,
        };
        Self::new(mode, is_tty)
    }

    fn pretty(&self) -> bool {
        self.is_tty && self.mode != UiMode::Plain
    }

    /// Announce a stage; its duration is reported when the guard drops.
    pub fn stage(&self, name: &str) -> StageGuard {
        if self.pretty() {
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

    /// Frame counter for a video of unknown length.
    pub fn frames(&self, name: &str) -> FrameProgress {
        if self.pretty() {
            let bar = ProgressBar::new_spinner();
            bar.set_draw_target(ProgressDrawTarget::stderr());
            bar.enable_steady_tick(Duration::from_millis(120));
            let style = ProgressStyle::with_template("{spinner} {msg} {pos} frames ({per_sec})")
                .unwrap_or_else(|_| ProgressStyle::default_spinner());
            bar.set_style(style);
            bar.set_message(name.to_string());
            FrameProgress {
                bar: Some(bar),
                last_logged: 0,
            }
        } else {
            eprintln!("==> {}", name);
            FrameProgress {
                bar: None,
                last_logged: 0,
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

/// Plain mode prints every this many frames.
const PLAIN_FRAME_STEP: u64 = 100;

pub struct FrameProgress {
    bar: Option<ProgressBar>,
    last_logged: u64,
}

impl FrameProgress {
    /// Record that `frames` frames are done.
    pub fn set(&mut self, frames: u64) {
        match &self.bar {
            Some(bar) => bar.set_position(frames),
            None => {
                if frames >= self.last_logged + PLAIN_FRAME_STEP {
                    eprintln!("    {} frames", frames);
                    self.last_logged = frames;
                }
            }
        }
    }

    pub fn finish(self, frames: u64) {
        match self.bar {
            Some(bar) => bar.finish_with_message(format!("✔ {frames} frames")),
            None => eprintln!("✔ {} frames", frames),
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ui_flag_parsing() {
        assert_eq!(Ui::from_args(Some("plain"), true).mode, UiMode::Plain);
        assert_eq!(Ui::from_args(Some("pretty"), false).mode, UiMode::Pretty);
        assert_eq!(Ui::from_args(None, true).mode, UiMode::Auto);
    }

    #[test]
    fn pretty_output_needs_a_tty() {
        assert!(!Ui::new(UiMode::Pretty, false).pretty());
        assert!(!Ui::new(UiMode::Plain, true).pretty());
        assert!(Ui::new(UiMode::Auto, true).pretty());
    }

    #[test]
    fn format_duration_switches_units() {
        assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.50s");
    }
}
