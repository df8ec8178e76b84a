use anyhow::Result;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::Duration;

use crate::normalize::NormalizedResult;

/// Text drawn over each previewed frame.
#[derive(Clone, Debug, PartialEq)]
pub struct Overlay {
    pub fps: f64,
    pub lines: Vec<String>,
}

impl Overlay {
    pub fn new(fps: f64, result: &NormalizedResult) -> Self {
        let lines = result
            .detections
            .iter()
            .map(|d| format!("{} ({:.2})", d.class_name, d.confidence))
            .collect();
        Self { fps, lines }
    }

    pub fn fps_text(&self) -> String {
        format!("FPS = {:.1}", self.fps)
    }

    /// Single-line rendering: the FPS text followed by each detection.
    pub fn to_line(&self) -> String {
        if self.lines.is_empty() {
            return self.fps_text();
        }
        format!("{} | {}", self.fps_text(), self.lines.join(", "))
    }
}

/// Where overlays are shown. Rendering errors end the run.
pub trait PreviewSink {
    fn render(&mut self, overlay: &Overlay) -> Result<()>;
}

/// Live overlay on stderr, drawn as an `indicatif` spinner.
pub struct TerminalPreview {
    spinner: ProgressBar,
}

impl TerminalPreview {
    pub fn new(title: &str) -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_draw_target(ProgressDrawTarget::stderr());
        spinner.enable_steady_tick(Duration::from_millis(120));
        let style = ProgressStyle::with_template("{spinner} {prefix:.bold} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        spinner.set_style(style);
        spinner.set_prefix(title.to_string());
        spinner.set_message("starting…");
        Self { spinner }
    }
}

impl PreviewSink for TerminalPreview {
    fn render(&mut self, overlay: &Overlay) -> Result<()> {
        self.spinner.set_message(overlay.to_line());
        Ok(())
    }
}

impl Drop for TerminalPreview {
    fn drop(&mut self) {
        self.spinner.finish_and_clear();
    }
}
