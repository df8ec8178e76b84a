//! detect_events - per-frame object detection events
//!
//! This binary:
//! 1. Reads frames from a camera (by index) or a local video file
//! 2. Runs the configured detector on each frame
//! 3. Prints one JSON event per frame to stdout
//! 4. Optionally publishes the same event to the message bus
//!
//! Stop with Ctrl-C, or ESC / `q` + Enter on an interactive terminal.

use anyhow::{Context, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;

use detect_events::{
    open_detector, CandidatePolicy, DetectorOptions, EventPublisher, FrameSource, PipelineConfig,
    PipelineLoop, SourceConfig, SourceSpec, StopReason, StopSignal, TerminalPreview,
};

#[derive(Parser, Debug)]
#[command(
    name = "detect_events",
    about = "Per-frame object detection events",
    after_help = "Stop with Ctrl-C, or type ESC or q and press Enter (stdin is line-buffered, \
                  so a single keypress is not enough)."
)]
struct Args {
    /// Object detection model, or `stub://<name>` for the built-in test detector.
    #[arg(long, default_value = "efficientdet_lite0.onnx")]
    model: String,

    /// Label list for the model (default: `<model>.labels`).
    #[arg(long)]
    labels: Option<PathBuf>,

    /// Camera index (default 0 when no video file is given).
    #[arg(long, conflicts_with = "video_file")]
    camera_id: Option<u32>,

    /// Local video file (or `stub://<name>?frames=N`).
    #[arg(long)]
    video_file: Option<String>,

    /// Requested capture width.
    #[arg(long, default_value_t = 640)]
    frame_width: u32,

    /// Requested capture height.
    #[arg(long, default_value_t = 480)]
    frame_height: u32,

    /// Inference thread hint. Must be at least 1; the tract backend runs on
    /// the pipeline thread and only logs this value.
    #[arg(long, default_value_t = 4)]
    num_threads: usize,

    /// Model input width in pixels (must match the model's input shape).
    #[arg(long, default_value_t = 320)]
    model_input_width: u32,

    /// Model input height in pixels (must match the model's input shape).
    #[arg(long, default_value_t = 320)]
    model_input_height: u32,

    /// Publish events to the message bus.
    #[arg(long, alias = "enable-kafka")]
    enable_telemetry: bool,

    /// Do not show the live overlay.
    #[arg(long)]
    hide_preview: bool,

    /// Keep frames as captured instead of mirroring them.
    #[arg(long)]
    no_mirror: bool,

    /// Maximum detections kept per frame.
    #[arg(long, default_value_t = detect_events::detect::DEFAULT_MAX_RESULTS)]
    max_results: usize,

    /// Minimum detection score.
    #[arg(long, default_value_t = detect_events::detect::DEFAULT_SCORE_FLOOR)]
    score_threshold: f32,

    /// Configuration file (default: $DETECT_CONFIG, then ./detect.toml).
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = PipelineConfig::load(args.config.as_deref())?;
    config.validate(args.enable_telemetry)?;

    let spec = SourceSpec::resolve(args.camera_id, args.video_file.clone())?;
    let source = FrameSource::open(&SourceConfig {
        spec,
        width: args.frame_width,
        height: args.frame_height,
        mirror: !args.no_mirror,
    })?;

    let options = detector_options(&args);
    let policy = options.policy;
    let detector = open_detector(&options)
        .with_context(|| format!("failed to load model {}", args.model))?;

    let publisher = if args.enable_telemetry {
        EventPublisher::connect(&config.telemetry()?)?
    } else {
        log::info!("telemetry disabled; events go to stdout only");
        EventPublisher::disabled()
    };

    let stop = StopSignal::new();
    stop.install_ctrlc()?;
    if stop.watch_stdin() {
        log::info!("press ESC or q, then Enter, to stop");
    }

    let mut pipeline = PipelineLoop::new(
        source,
        detector,
        publisher,
        config.camera_name.clone(),
        std::io::stdout().lock(),
    )
    .with_policy(policy)
    .with_stop_signal(stop);

    if !args.hide_preview && std::io::stderr().is_terminal() {
        pipeline = pipeline.with_preview(Box::new(TerminalPreview::new(&config.camera_name)));
    }

    let summary = pipeline.run()?;
    match summary.reason {
        StopReason::EndOfStream => log::info!("end of video file reached"),
        StopReason::StopRequested => log::info!("stopped on request"),
    }
    if summary.publish.failed > 0 {
        log::warn!(
            "{} of {} events were not delivered to the bus",
            summary.publish.failed,
            summary.publish.attempted
        );
    }
    Ok(())
}

fn detector_options(args: &Args) -> DetectorOptions {
    DetectorOptions {
        model_path: args.model.clone(),
        labels_path: args.labels.clone(),
        num_threads: args.num_threads,
        input_width: args.model_input_width,
        input_height: args.model_input_height,
        policy: CandidatePolicy::new(args.max_results, args.score_threshold),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn model_input_size_reaches_detector_options() {
        let args = Args::parse_from([
            "detect_events",
            "--model-input-width",
            "512",
            "--model-input-height",
            "384",
        ]);
        let options = detector_options(&args);
        assert_eq!((options.input_width, options.input_height), (512, 384));

        let defaults = detector_options(&Args::parse_from(["detect_events"]));
        assert_eq!((defaults.input_width, defaults.input_height), (320, 320));
    }

    #[test]
    fn help_describes_stop_keys_and_thread_hint() {
        let help = Args::command().render_long_help().to_string();
        assert!(help.contains("press Enter"));
        assert!(help.contains("only logs this value"));
    }

    #[test]
    fn camera_and_file_conflict() {
        let result = Args::try_parse_from([
            "detect_events",
            "--camera-id",
            "0",
            "--video-file",
            "clip.mp4",
        ]);
        assert!(result.is_err());
    }
}
