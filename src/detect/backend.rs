use anyhow::Result;

use crate::detect::result::Candidate;
use crate::frame::ChannelOrder;

/// Inference capability consumed by the pipeline.
///
/// The pipeline never looks behind this trait: thread pools, weights and any
/// other backend state stay private to the implementation.
///
/// Implementations must treat the pixel slice as read-only and must not keep
/// it beyond the `infer` call.
pub trait Detector: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Channel order the backend expects. The pipeline converts frames to it.
    fn input_order(&self) -> ChannelOrder {
        ChannelOrder::Rgb
    }

    /// Run inference on one frame.
    ///
    /// Returns zero or more candidate regions. Thresholding and capping are
    /// applied by the caller, so backends may return everything they found.
    fn infer(&mut self, pixels: &[u8], width: u32, height: u32) -> Result<Vec<Candidate>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
