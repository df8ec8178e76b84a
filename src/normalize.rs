//! Detection result normalization.
//!
//! Turns detector candidates into the serializable per-frame summary and the
//! immutable `Event` that is printed and published.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::detect::Candidate;

/// One detected object after normalization.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectedObject {
    pub class_name: String,
    /// Confidence in `[0, 1]`, rounded to two decimals.
    #[serde(rename = "probability")]
    pub confidence: f64,
}

/// Camera-attributed summary of one frame's detections.
///
/// `counts` always sums to `detections.len()`. It is a `BTreeMap` so the
/// serialized form is byte-identical for identical inputs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NormalizedResult {
    pub camera_name: String,
    #[serde(rename = "objects_found")]
    pub detections: Vec<DetectedObject>,
    #[serde(rename = "objects_count")]
    pub counts: BTreeMap<String, u32>,
}

impl NormalizedResult {
    pub fn total(&self) -> usize {
        self.detections.len()
    }
}

/// Normalize detector candidates for `camera_name`.
///
/// Each candidate contributes its top class. Candidates without any class are
/// not detections and are skipped.
pub fn normalize(candidates: &[Candidate], camera_name: &str) -> NormalizedResult {
    let detections: Vec<DetectedObject> = candidates
        .iter()
        .filter_map(Candidate::top)
        .map(|top| DetectedObject {
            class_name: top.label.clone(),
            confidence: round_confidence(top.score as f64),
        })
        .collect();

    let mut counts = BTreeMap::new();
    for det in &detections {
        *counts.entry(det.class_name.clone()).or_insert(0u32) += 1;
    }

    NormalizedResult {
        camera_name: camera_name.to_string(),
        detections,
        counts,
    }
}

/// Clamp to `[0, 1]` and round to two decimals, half away from zero.
///
/// NaN maps to 0. Idempotent: `round_confidence(round_confidence(x)) == round_confidence(x)`.
pub fn round_confidence(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    let clamped = value.clamp(0.0, 1.0);
    (clamped * 100.0).round() / 100.0
}

/// Immutable wire payload for one processed frame.
///
/// The JSON text is produced once; clones share it, so an event can be handed
/// to another thread without touching the frame or pipeline state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Event {
    payload: Arc<str>,
}

impl Event {
    pub fn from_result(result: &NormalizedResult) -> Result<Self> {
        let json = serde_json::to_string(result)?;
        Ok(Self {
            payload: Arc::from(json),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.payload
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.payload.as_bytes()
    }
}

impl std::fmt::Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.payload)
    }
}
