use anyhow::Result;
use sha2::{Digest, Sha256};

use crate::detect::backend::Detector;
use crate::detect::result::{Candidate, Category};

const STUB_LABELS: &[&str] = &["person", "car", "bicycle", "dog", "cat", "bottle"];

/// Deterministic detector for tests and demos.
///
/// Derives candidates from a pixel hash, so identical frames always produce
/// identical detections and different frames usually produce different ones.
pub struct StubBackend {
    frames_seen: u64,
}

impl StubBackend {
    pub fn new() -> Self {
        Self { frames_seen: 0 }
    }

    pub fn frames_seen(&self) -> u64 {
        self.frames_seen
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Detector for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn infer(&mut self, pixels: &[u8], _width: u32, _height: u32) -> Result<Vec<Candidate>> {
        self.frames_seen += 1;
        let digest: [u8; 32] = Sha256::digest(pixels).into();

        let regions = (digest[0] % 5) as usize;
        let candidates = (0..regions)
            .map(|i| {
                // two hypotheses per region; the policy keeps the better one
                let primary = STUB_LABELS[digest[1 + i] as usize % STUB_LABELS.len()];
                let secondary = STUB_LABELS[digest[8 + i] as usize % STUB_LABELS.len()];
                Candidate {
                    categories: vec![
                        Category {
                            label: primary.to_string(),
                            score: digest[16 + i] as f32 / 255.0,
                        },
                        Category {
                            label: secondary.to_string(),
                            score: digest[24 + i] as f32 / 510.0,
                        },
                    ],
                }
            })
            .collect();
        Ok(candidates)
    }
}
