//! Frame sources.
//!
//! This module provides the capture side of the pipeline:
//! - Local video files (synthetic `stub://` clips; FFmpeg with feature `ingest-file-ffmpeg`)
//! - Cameras by index (V4L2 with feature `ingest-v4l2`)
//!
//! Backends only know how to produce frames. `FrameSource` owns the policy on top:
//! - a file that runs out of frames is a clean end of stream
//! - a camera that fails to deliver a frame is a fatal fault, never retried
//! - mirroring is applied here, before any consumer sees the frame

pub mod file;
#[cfg(feature = "ingest-file-ffmpeg")]
pub(crate) mod file_ffmpeg;
#[cfg_attr(not(feature = "ingest-v4l2"), allow(dead_code))]
mod normalize;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

use anyhow::Result;

use crate::error::{ConfigError, SourceError};
use crate::frame::Frame;

pub use file::{SyntheticFileBackend, STUB_SCHEME};
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::V4l2Backend;

/// Where frames come from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceSpec {
    Camera { index: u32 },
    File { path: String },
}

impl SourceSpec {
    /// Pick the source from the command line.
    ///
    /// Giving both a camera and a file is rejected instead of silently
    /// preferring one. Giving neither selects camera 0.
    pub fn resolve(
        camera_id: Option<u32>,
        video_file: Option<String>,
    ) -> Result<Self, ConfigError> {
        match (camera_id, video_file) {
            (Some(_), Some(_)) => Err(ConfigError::ConflictingSources),
            (_, Some(path)) => {
                if path.trim().is_empty() {
                    return Err(ConfigError::Invalid {
                        key: "video_file",
                        reason: "path is empty".to_string(),
                    });
                }
                Ok(Self::File { path })
            }
            (Some(index), None) => Ok(Self::Camera { index }),
            (None, None) => Ok(Self::Camera { index: 0 }),
        }
    }

    pub fn is_camera(&self) -> bool {
        matches!(self, Self::Camera { .. })
    }
}

impl std::fmt::Display for SourceSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Camera { index } => write!(f, "camera {}", index),
            Self::File { path } => write!(f, "file {}", path),
        }
    }
}

/// Frame source configuration.
#[derive(Clone, Debug)]
pub struct SourceConfig {
    pub spec: SourceSpec,
    /// Requested capture size. Cameras and synthetic clips honour it; decoded
    /// files keep their native size.
    pub width: u32,
    pub height: u32,
    /// Flip frames left-to-right before anything else sees them.
    pub mirror: bool,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            spec: SourceSpec::Camera { index: 0 },
            width: 640,
            height: 480,
            mirror: true,
        }
    }
}

/// Result of asking a source for the next frame.
#[derive(Debug)]
pub enum Capture {
    Frame(Frame),
    EndOfStream,
}

/// Device- or codec-specific frame producer.
///
/// `read` returns `Ok(None)` when the backend has no more frames.
pub trait CaptureBackend: Send {
    /// Short description for logs.
    fn describe(&self) -> String;

    /// Acquire the underlying device or file.
    fn open(&mut self) -> Result<()>;

    /// Produce the next frame in capture-native (BGR) order.
    fn read(&mut self) -> Result<Option<Frame>>;
}

/// Statistics for a frame source.
#[derive(Clone, Debug)]
pub struct SourceStats {
    pub frames_delivered: u64,
    pub description: String,
    pub exhausted: bool,
}

/// Frame source with end-of-stream and fault policy applied.
///
/// Dropping the source releases the device or file.
pub struct FrameSource {
    spec: SourceSpec,
    backend: Box<dyn CaptureBackend>,
    mirror: bool,
    frames_delivered: u64,
    exhausted: bool,
}

impl FrameSource {
    /// Open the backend selected by `config`.
    pub fn open(config: &SourceConfig) -> Result<Self, SourceError> {
        let backend = select_backend(config)?;
        Self::with_backend(config.spec.clone(), backend, config.mirror)
    }

    /// Wrap an already constructed backend and open it.
    pub fn with_backend(
        spec: SourceSpec,
        mut backend: Box<dyn CaptureBackend>,
        mirror: bool,
    ) -> Result<Self, SourceError> {
        backend.open().map_err(|e| open_error(&spec, e))?;
        log::info!(
            "FrameSource: opened {} via {} (mirror={})",
            spec,
            backend.describe(),
            mirror
        );
        Ok(Self {
            spec,
            backend,
            mirror,
            frames_delivered: 0,
            exhausted: false,
        })
    }

    /// Capture the next frame.
    ///
    /// Files end with `Capture::EndOfStream`, after which every call returns it
    /// again. Cameras never end: a missing frame is `SourceError::CameraRead`.
    pub fn next(&mut self) -> Result<Capture, SourceError> {
        if self.exhausted {
            return Ok(Capture::EndOfStream);
        }

        match (&self.spec, self.backend.read()) {
            (_, Ok(Some(mut frame))) => {
                if self.mirror {
                    frame.mirror_horizontal();
                }
                self.frames_delivered += 1;
                Ok(Capture::Frame(frame))
            }
            (SourceSpec::File { path }, Ok(None)) => {
                log::info!(
                    "FrameSource: {} ended after {} frames",
                    path,
                    self.frames_delivered
                );
                self.exhausted = true;
                Ok(Capture::EndOfStream)
            }
            (SourceSpec::File { path }, Err(e)) => Err(SourceError::Read {
                path: path.clone(),
                reason: format!("{:#}", e),
            }),
            (SourceSpec::Camera { index }, Ok(None)) => Err(SourceError::CameraRead {
                index: *index,
                reason: "camera returned no frame".to_string(),
            }),
            (SourceSpec::Camera { index }, Err(e)) => Err(SourceError::CameraRead {
                index: *index,
                reason: format!("{:#}", e),
            }),
        }
    }

    pub fn spec(&self) -> &SourceSpec {
        &self.spec
    }

    pub fn stats(&self) -> SourceStats {
        SourceStats {
            frames_delivered: self.frames_delivered,
            description: self.backend.describe(),
            exhausted: self.exhausted,
        }
    }
}

fn open_error(spec: &SourceSpec, err: anyhow::Error) -> SourceError {
    match spec {
        SourceSpec::Camera { index } => SourceError::CameraOpen {
            index: *index,
            reason: format!("{:#}", err),
        },
        SourceSpec::File { path } => SourceError::Open {
            path: path.clone(),
            reason: format!("{:#}", err),
        },
    }
}

fn select_backend(config: &SourceConfig) -> Result<Box<dyn CaptureBackend>, SourceError> {
    match &config.spec {
        SourceSpec::File { path } => {
            file::open_file_backend(path, config.width, config.height)
                .map_err(|e| open_error(&config.spec, e))
        }
        SourceSpec::Camera { index } => camera_backend(*index, config),
    }
}

#[cfg(feature = "ingest-v4l2")]
fn camera_backend(index: u32, config: &SourceConfig) -> Result<Box<dyn CaptureBackend>, SourceError> {
    Ok(Box::new(V4l2Backend::new(v4l2::V4l2Config {
        device: format!("/dev/video{}", index),
        target_fps: 30,
        width: config.width,
        height: config.height,
    })))
}

#[cfg(not(feature = "ingest-v4l2"))]
fn camera_backend(index: u32, _config: &SourceConfig) -> Result<Box<dyn CaptureBackend>, SourceError> {
    Err(SourceError::CameraOpen {
        index,
        reason: "camera capture requires the ingest-v4l2 feature".to_string(),
    })
}
