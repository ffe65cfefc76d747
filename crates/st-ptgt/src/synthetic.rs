// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Synthetic accumulated evidence with a known true target.
//!
//! Per-epoch scores are standardized Gaussian noise with a constant offset on
//! output 0 of model 0. They are accumulated over the decision epochs and
//! divided by `sqrt(k + 1)`, so every epoch stays roughly unit scale while the
//! true output drifts upward as evidence builds.

use ndarray::{s, Array4};
use rand::Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};
use st_ptgt_config::determinism;

use crate::error::{invalid, Result};
use crate::evidence::{Evidence, DECISION_AXIS};

const RNG_LABEL: &str = "st-ptgt.synthetic";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticEvidence {
    pub n_models: usize,
    pub n_trials: usize,
    pub n_epochs: usize,
    pub n_outputs: usize,
    /// Per-epoch offset of the true output, in noise standard deviations.
    pub signal_strength: f64,
    /// Explicit seed. `None` defers to `PTGT_DETERMINISTIC`.
    pub seed: Option<u64>,
}

impl Default for SyntheticEvidence {
    fn default() -> Self {
        Self {
            n_models: 4,
            n_trials: 100,
            n_epochs: 340,
            n_outputs: 10,
            signal_strength: 0.5,
            seed: None,
        }
    }
}

impl SyntheticEvidence {
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    fn validate(&self) -> Result<()> {
        if self.n_models == 0 || self.n_trials == 0 || self.n_epochs == 0 || self.n_outputs == 0 {
            return Err(invalid(format!(
                "synthetic evidence needs non-empty axes, got ({}, {}, {}, {})",
                self.n_models, self.n_trials, self.n_epochs, self.n_outputs
            )));
        }
        if !self.signal_strength.is_finite() {
            return Err(invalid("signal strength must be finite"));
        }
        Ok(())
    }

    /// Per-epoch scores before accumulation.
    pub fn raw_scores(&self) -> Result<Array4<f64>> {
        self.validate()?;
        let mut rng = determinism::rng_from_optional(self.seed, RNG_LABEL);
        let shape = (self.n_models, self.n_trials, self.n_epochs, self.n_outputs);
        let mut scores = Array4::from_shape_simple_fn(shape, || rng.sample::<f64, _>(StandardNormal));

        let n = scores.len() as f64;
        let mean = scores.sum() / n;
        let std = (scores.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt();
        let std = if std > 0.0 { std } else { 1.0 };
        scores.mapv_inplace(|v| (v - mean) / std);

        let signal = self.signal_strength;
        scores
            .slice_mut(s![0, .., .., 0])
            .mapv_inplace(|v| v + signal);
        Ok(scores)
    }

    /// Accumulated, epoch-normalized evidence.
    pub fn generate(&self) -> Result<Evidence> {
        let mut scores = self.raw_scores()?;
        for mut lane in scores.lanes_mut(DECISION_AXIS) {
            let mut running = 0.0;
            for (k, v) in lane.iter_mut().enumerate() {
                running += *v;
                *v = running / ((k + 1) as f64).sqrt();
            }
        }
        Evidence::from_canonical(scores)
    }
}
