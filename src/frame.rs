//! Frame container.
//!
//! - `Frame`: owned 8-bit, 3-channel interleaved pixel buffer with its geometry.
//! - `ChannelOrder`: BGR (capture-native) or RGB (what most models expect).
//!
//! A frame lives for exactly one pipeline cycle. It is deliberately not `Clone`;
//! the only way to get a second buffer is an explicit colour conversion, which
//! the pipeline does once per cycle for the detector input.

use anyhow::{anyhow, Result};

use crate::detect::{Candidate, Detector};

/// Bytes per pixel for every frame the pipeline handles.
pub const CHANNELS: usize = 3;

/// Interleaved channel order of a frame's pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelOrder {
    Bgr,
    Rgb,
}

/// Owned pixel buffer for a single cycle.
///
/// There is no `Clone` impl: a frame must not outlive the cycle that captured it.
pub struct Frame {
    data: Vec<u8>,
    width: u32,
    height: u32,
    order: ChannelOrder,
}

impl Frame {
    /// Wrap a pixel buffer. Fails if the length does not match the geometry.
    pub fn new(data: Vec<u8>, width: u32, height: u32, order: ChannelOrder) -> Result<Self> {
        let expected = expected_len(width, height)?;
        if data.len() != expected {
            return Err(anyhow!(
                "frame length mismatch: expected {} bytes for {}x{}, got {}",
                expected,
                width,
                height,
                data.len()
            ));
        }
        Ok(Self {
            data,
            width,
            height,
            order,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channel_order(&self) -> ChannelOrder {
        self.order
    }

    /// Read-only pixel access, row-major, `CHANNELS` bytes per pixel.
    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    /// Flip the frame left-to-right in place. Geometry and channel order are unchanged.
    pub fn mirror_horizontal(&mut self) {
        let row_bytes = self.width as usize * CHANNELS;
        if row_bytes == 0 {
            return;
        }
        for row in self.data.chunks_exact_mut(row_bytes) {
            let width = row.len() / CHANNELS;
            for x in 0..width / 2 {
                let left = x * CHANNELS;
                let right = (width - 1 - x) * CHANNELS;
                for c in 0..CHANNELS {
                    row.swap(left + c, right + c);
                }
            }
        }
    }

    /// Produce a copy of this frame in the requested channel order.
    ///
    /// BGR and RGB differ only by swapping the first and third channel.
    pub fn converted(&self, order: ChannelOrder) -> Frame {
        let mut data = self.data.clone();
        if order != self.order {
            for px in data.chunks_exact_mut(CHANNELS) {
                px.swap(0, 2);
            }
        }
        Frame {
            data,
            width: self.width,
            height: self.height,
            order,
        }
    }

    /// Run a detector on this frame.
    ///
    /// The detector sees a borrowed slice for the duration of the call only.
    pub fn run_detector(&self, detector: &mut dyn Detector) -> Result<Vec<Candidate>> {
        if detector.input_order() != self.order {
            return Err(anyhow!(
                "detector '{}' expects {:?} input, frame is {:?}",
                detector.name(),
                detector.input_order(),
                self.order
            ));
        }
        detector.infer(&self.data, self.width, self.height)
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Pixel content is intentionally left out.
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("order", &self.order)
            .finish()
    }
}

fn expected_len(width: u32, height: u32) -> Result<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(CHANNELS))
        .ok_or_else(|| anyhow!("frame dimensions overflow: {}x{}", width, height))
}
