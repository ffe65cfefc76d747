// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Output-count correction of the softmax scale.
//!
//! Softmax sharpness depends on how many candidates compete in a trial. A
//! correction policy maps the number of valid outputs to a factor that
//! multiplies the base scale, so probabilities stay comparable between trials
//! with different candidate sets.

use ndarray::{Array1, Array4, ArrayView1, ArrayView4};

use crate::evidence::TRIAL_AXIS;
use crate::mask::ValidTargets;

/// Maps a valid-output count to a multiplicative softmax-scale factor.
pub trait OutputCountCorrection: Send + Sync {
    fn factor(&self, n_outputs: usize) -> f64;
}

impl<T: OutputCountCorrection + ?Sized> OutputCountCorrection for &T {
    fn factor(&self, n_outputs: usize) -> f64 {
        (**self).factor(n_outputs)
    }
}

/// Current policy: every count gets factor 1.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IdentityCorrection;

impl OutputCountCorrection for IdentityCorrection {
    fn factor(&self, _n_outputs: usize) -> f64 {
        1.0
    }
}

/// Saturating `log2` curve, `min(ceiling, offset + log2(max(1, n)) / slope) / ceiling`.
///
/// Sharpens the softmax for larger candidate sets until the ceiling is hit.
/// Opt-in only; it has not been validated as a calibrated policy.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SaturatingLogCorrection {
    pub offset: f64,
    pub slope: f64,
    pub ceiling: f64,
}

impl Default for SaturatingLogCorrection {
    fn default() -> Self {
        Self {
            offset: 1.25,
            slope: 5.5,
            ceiling: 2.45,
        }
    }
}

impl OutputCountCorrection for SaturatingLogCorrection {
    fn factor(&self, n_outputs: usize) -> f64 {
        let n = n_outputs.max(1) as f64;
        (self.offset + n.log2() / self.slope).min(self.ceiling) / self.ceiling
    }
}

/// Correction factors of the default policy for each count in `counts`.
pub fn softmax_nout_corr(counts: ArrayView1<'_, usize>) -> Array1<f64> {
    counts.mapv(|n| IdentityCorrection.factor(n))
}

/// Per-trial softmax scale: `base_scale * correction(valid outputs in trial)`.
pub fn trial_scales<C>(base_scale: f64, valid: &ValidTargets, correction: &C) -> Array1<f64>
where
    C: OutputCountCorrection + ?Sized,
{
    valid
        .counts()
        .mapv(|n| base_scale * correction.factor(n))
}

/// Multiplies every `(m, t, :, :)` block of `scores` by `scales[t]`.
pub fn apply_trial_scales(scores: ArrayView4<'_, f64>, scales: ArrayView1<'_, f64>) -> Array4<f64> {
    let mut scaled = scores.to_owned();
    for (mut trial, &scale) in scaled.axis_iter_mut(TRIAL_AXIS).zip(scales.iter()) {
        trial.mapv_inplace(|v| v * scale);
    }
    scaled
}
