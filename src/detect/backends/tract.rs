#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::detect::backend::Detector;
use crate::detect::result::{Candidate, Category};

/// Tract-based backend for ONNX object-detection models.
///
/// Model contract:
/// - input 0: `[1, 3, H, W]` f32, RGB, scaled to `0..1`
/// - output 0: `[1, N, C]` f32 class scores, one row per predicted region
///
/// Frames of any size are resampled (nearest neighbour) to the model input.
/// Each region is reduced to its single best class before it leaves the backend.
pub struct TractBackend {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    labels: Vec<String>,
    input_width: u32,
    input_height: u32,
    min_score: f32,
}

impl TractBackend {
    /// Load an ONNX model and its label list from disk.
    pub fn new<P: AsRef<Path>, L: AsRef<Path>>(
        model_path: P,
        labels_path: L,
        input_width: u32,
        input_height: u32,
        num_threads: usize,
    ) -> Result<Self> {
        let model_path = model_path.as_ref();
        let labels_path = labels_path.as_ref();

        let labels = std::fs::read_to_string(labels_path)
            .with_context(|| format!("failed to read labels from {}", labels_path.display()))?
            .lines()
            .map(|line| line.trim().to_string())
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>();
        if labels.is_empty() {
            return Err(anyhow!("label file {} is empty", labels_path.display()));
        }

        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, input_height as usize, input_width as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .with_context(|| {
                format!(
                    "failed to optimize ONNX model for a {}x{} input \
                     (check --model-input-width/--model-input-height)",
                    input_width, input_height
                )
            })?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        if num_threads > 1 {
            log::info!(
                "TractBackend: {} threads requested; inference runs on the pipeline thread",
                num_threads
            );
        }

        Ok(Self {
            model,
            labels,
            input_width,
            input_height,
            min_score: 0.0,
        })
    }

    /// Drop regions whose best class scores below `min_score` inside the backend.
    pub fn with_min_score(mut self, min_score: f32) -> Self {
        self.min_score = min_score;
        self
    }

    fn build_input(&self, pixels: &[u8], width: u32, height: u32) -> Result<Tensor> {
        let expected_len = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if pixels.len() != expected_len || width == 0 || height == 0 {
            return Err(anyhow!(
                "expected {} RGB bytes, received {}",
                expected_len,
                pixels.len()
            ));
        }

        let (src_w, src_h) = (width as usize, height as usize);
        let (dst_w, dst_h) = (self.input_width as usize, self.input_height as usize);
        let input = tract_ndarray::Array4::from_shape_fn((1, 3, dst_h, dst_w), |(_, c, y, x)| {
            let sy = y * src_h / dst_h;
            let sx = x * src_w / dst_w;
            pixels[(sy * src_w + sx) * 3 + c] as f32 / 255.0
        });

        Ok(input.into_tensor())
    }

    fn decode(&self, outputs: TVec<TValue>) -> Result<Vec<Candidate>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let scores = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let shape = scores.shape();
        if shape.len() != 3 || shape[0] != 1 {
            return Err(anyhow!("unexpected output shape {:?}, wanted [1, N, C]", shape));
        }
        let (regions, classes) = (shape[1], shape[2]);

        let mut candidates = Vec::new();
        for region in 0..regions {
            let mut best: Option<(usize, f32)> = None;
            for class in 0..classes {
                let score = scores[[0, region, class]];
                if best.map_or(true, |(_, s)| score > s) {
                    best = Some((class, score));
                }
            }
            let Some((class, score)) = best else { continue };
            if !score.is_finite() || score < self.min_score {
                continue;
            }
            let label = self
                .labels
                .get(class)
                .cloned()
                .unwrap_or_else(|| format!("class_{}", class));
            candidates.push(Candidate {
                categories: vec![Category { label, score }],
            });
        }
        Ok(candidates)
    }
}

impl Detector for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn infer(&mut self, pixels: &[u8], width: u32, height: u32) -> Result<Vec<Candidate>> {
        let input = self.build_input(pixels, width, height)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.decode(outputs)
    }
}
