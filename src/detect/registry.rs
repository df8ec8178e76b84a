use std::path::PathBuf;

use anyhow::{anyhow, Result};

use super::backend::Detector;
use super::backends::StubBackend;
use super::policy::CandidatePolicy;

/// Model path prefix that selects the built-in deterministic backend.
pub const STUB_MODEL_PREFIX: &str = "stub://";

/// Detector construction options, taken from the command line.
#[derive(Clone, Debug)]
pub struct DetectorOptions {
    /// Path of the model file, or `stub://<name>`.
    pub model_path: String,
    /// Label list for the model. Defaults to `<model>.labels`.
    pub labels_path: Option<PathBuf>,
    /// Inference thread hint passed to the backend.
    pub num_threads: usize,
    /// Model input size.
    pub input_width: u32,
    pub input_height: u32,
    /// Caller-side candidate thresholding.
    pub policy: CandidatePolicy,
}

impl Default for DetectorOptions {
    fn default() -> Self {
        Self {
            model_path: "efficientdet_lite0.onnx".to_string(),
            labels_path: None,
            num_threads: 4,
            input_width: 320,
            input_height: 320,
            policy: CandidatePolicy::default(),
        }
    }
}

impl DetectorOptions {
    pub fn is_stub(&self) -> bool {
        self.model_path.starts_with(STUB_MODEL_PREFIX)
    }

    pub fn resolved_labels_path(&self) -> PathBuf {
        self.labels_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("{}.labels", self.model_path)))
    }
}

/// Build the detector backend selected by `options`.
pub fn open_detector(options: &DetectorOptions) -> Result<Box<dyn Detector>> {
    if options.num_threads == 0 {
        return Err(anyhow!("num_threads must be at least 1"));
    }

    let mut detector: Box<dyn Detector> = if options.is_stub() {
        Box::new(StubBackend::new())
    } else {
        open_model_backend(options)?
    };

    detector.warm_up()?;
    log::info!(
        "detector '{}' ready (model={}, max_results={}, score_floor={:.2})",
        detector.name(),
        options.model_path,
        options.policy.max_results,
        options.policy.score_floor
    );
    Ok(detector)
}

#[cfg(feature = "backend-tract")]
fn open_model_backend(options: &DetectorOptions) -> Result<Box<dyn Detector>> {
    let backend = super::backends::TractBackend::new(
        &options.model_path,
        options.resolved_labels_path(),
        options.input_width,
        options.input_height,
        options.num_threads,
    )?
    .with_min_score(options.policy.score_floor);
    Ok(Box::new(backend))
}

#[cfg(not(feature = "backend-tract"))]
fn open_model_backend(options: &DetectorOptions) -> Result<Box<dyn Detector>> {
    Err(anyhow!(
        "model '{}' requires the backend-tract feature (or use a stub:// model)",
        options.model_path
    ))
}
