//! Local file frame backends.
//!
//! - `stub://<name>?frames=N`: synthetic clip of N frames, used by tests and demos
//! - anything else: decoded with FFmpeg (feature `ingest-file-ffmpeg`)
//!
//! File paths are local only; URL schemes other than `stub://` are rejected.

use anyhow::{anyhow, Context, Result};

use super::CaptureBackend;
#[cfg(feature = "ingest-file-ffmpeg")]
use super::file_ffmpeg::FfmpegFileBackend;
use crate::frame::{ChannelOrder, Frame, CHANNELS};

pub const STUB_SCHEME: &str = "stub://";
const DEFAULT_STUB_FRAMES: u64 = 100;

/// Choose the backend for a file path.
pub(crate) fn open_file_backend(
    path: &str,
    width: u32,
    height: u32,
) -> Result<Box<dyn CaptureBackend>> {
    if !is_local_file_path(path) {
        return Err(anyhow!(
            "file ingestion only supports local paths (no URL schemes)"
        ));
    }
    if path.starts_with(STUB_SCHEME) {
        return Ok(Box::new(SyntheticFileBackend::from_path(path, width, height)?));
    }

    #[cfg(feature = "ingest-file-ffmpeg")]
    {
        Ok(Box::new(FfmpegFileBackend::new(path)?))
    }
    #[cfg(not(feature = "ingest-file-ffmpeg"))]
    {
        Err(anyhow!(
            "file ingestion requires the ingest-file-ffmpeg feature"
        ))
    }
}

// ----------------------------------------------------------------------------
// Synthetic source (stub://) for tests
// ----------------------------------------------------------------------------

/// Finite synthetic clip.
///
/// Frames are a moving gradient in BGR order, so consecutive frames differ and
/// no frame is left-right symmetric.
pub struct SyntheticFileBackend {
    name: String,
    width: u32,
    height: u32,
    total_frames: u64,
    frame_count: u64,
}

impl SyntheticFileBackend {
    pub fn new(name: impl Into<String>, width: u32, height: u32, total_frames: u64) -> Self {
        Self {
            name: name.into(),
            width,
            height,
            total_frames,
            frame_count: 0,
        }
    }

    /// Parse `stub://<name>?frames=N`.
    pub fn from_path(path: &str, width: u32, height: u32) -> Result<Self> {
        let rest = path
            .strip_prefix(STUB_SCHEME)
            .ok_or_else(|| anyhow!("not a stub path: {}", path))?;
        let (name, query) = rest.split_once('?').unwrap_or((rest, ""));

        let mut total_frames = DEFAULT_STUB_FRAMES;
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            match pair.split_once('=') {
                Some(("frames", value)) => {
                    total_frames = value
                        .parse()
                        .with_context(|| format!("invalid frame count in {}", path))?;
                }
                _ => return Err(anyhow!("unknown stub option '{}' in {}", pair, path)),
            }
        }

        Ok(Self::new(name, width, height, total_frames))
    }

    fn generate_pixels(&self) -> Vec<u8> {
        let pixel_count = self.width as usize * self.height as usize * CHANNELS;
        let mut pixels = vec![0u8; pixel_count];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            *pixel = ((i as u64 + self.frame_count * 7) % 256) as u8;
        }
        pixels
    }
}

impl CaptureBackend for SyntheticFileBackend {
    fn describe(&self) -> String {
        format!("synthetic clip '{}' ({} frames)", self.name, self.total_frames)
    }

    fn open(&mut self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(anyhow!(
                "synthetic clip needs a non-zero size, got {}x{}",
                self.width,
                self.height
            ));
        }
        log::info!("FileSource: connected to {} (synthetic)", self.name);
        Ok(())
    }

    fn read(&mut self) -> Result<Option<Frame>> {
        if self.frame_count >= self.total_frames {
            return Ok(None);
        }
        self.frame_count += 1;
        let pixels = self.generate_pixels();
        Frame::new(pixels, self.width, self.height, ChannelOrder::Bgr).map(Some)
    }
}

fn is_local_file_path(path: &str) -> bool {
    if path.trim().is_empty() {
        return false;
    }
    if path.starts_with(STUB_SCHEME) {
        return true;
    }
    !path.contains("://")
}
