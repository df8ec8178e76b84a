//! Error taxonomy for the pipeline.
//!
//! Only conditions that change control flow get a typed variant. End of a file
//! source is not an error (`ingest::Capture::EndOfStream`) and telemetry
//! failures never leave the publisher (`publish::PublishOutcome::Failed`).

use thiserror::Error;

/// Unrecoverable frame source fault. Terminates the pipeline.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("unable to open camera {index}: {reason}")]
    CameraOpen { index: u32, reason: String },

    #[error("unable to read from camera {index}, verify the camera settings: {reason}")]
    CameraRead { index: u32, reason: String },

    #[error("unable to open video file {path}: {reason}")]
    Open { path: String, reason: String },

    #[error("failed to decode video file {path}: {reason}")]
    Read { path: String, reason: String },
}

/// Startup configuration problem. Reported before the loop begins.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required configuration key '{0}'")]
    Missing(&'static str),

    #[error("invalid value for '{key}': {reason}")]
    Invalid { key: &'static str, reason: String },

    #[error("failed to read config file {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("both a camera id and a video file were given; choose one source")]
    ConflictingSources,
}

/// Fault that ends a pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("inference failed: {0:#}")]
    Inference(anyhow::Error),

    #[error("failed to build event: {0:#}")]
    Event(anyhow::Error),

    #[error("failed to write event output: {0}")]
    Output(#[from] std::io::Error),

    #[error("preview failed: {0:#}")]
    Preview(anyhow::Error),
}
