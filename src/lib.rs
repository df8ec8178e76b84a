//! Detection event pipeline
//!
//! Reads frames from a camera or a video file, runs an object detector on
//! each frame, and emits one camera-attributed JSON event per frame to stdout
//! and, optionally, to a message bus.
//!
//! # Module Structure
//!
//! - `ingest`: Frame sources (V4L2 cameras, local files, synthetic clips)
//! - `frame`: Owned pixel buffers and channel-order conversion
//! - `detect`: Detector capability trait, backends and candidate policy
//! - `normalize`: Per-frame summary and the immutable `Event`
//! - `publish`: Best-effort bus delivery
//! - `pipeline`: The per-frame control loop
//! - `config`, `error`, `fps`, `preview`, `stop`: Supporting pieces

pub mod config;
pub mod detect;
pub mod error;
pub mod fps;
pub mod frame;
pub mod ingest;
pub mod normalize;
pub mod pipeline;
pub mod preview;
pub mod publish;
pub mod stop;

pub use config::{PipelineConfig, TelemetrySettings};
pub use detect::{
    open_detector, Candidate, CandidatePolicy, Category, Detector, DetectorOptions, StubBackend,
};
pub use error::{ConfigError, PipelineError, SourceError};
pub use fps::FrameRateTracker;
pub use frame::{ChannelOrder, Frame};
pub use ingest::{Capture, CaptureBackend, FrameSource, SourceConfig, SourceSpec};
pub use normalize::{normalize, DetectedObject, Event, NormalizedResult};
pub use pipeline::{PipelineLoop, RunSummary, StopReason};
pub use preview::{Overlay, PreviewSink, TerminalPreview};
pub use publish::{BusTransport, EventPublisher, PublishOutcome, PublishStats};
pub use stop::StopSignal;
