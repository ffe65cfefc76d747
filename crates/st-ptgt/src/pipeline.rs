// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Evidence → target probability conversion.
//!
//! ```text
//! evidence ─ normalize ─ validity mask ─ count-corrected scale ─ (+ log prior)
//!          ─ (log-sum-exp over models / epochs) ─ masked softmax ─ Ptgt
//! ```
//!
//! The output keeps the Trial and Output axes. The Model axis is kept only
//! when several models survive normalization and were not marginalized; the
//! DecisionEpoch axis is dropped only when it was marginalized.

use ndarray::{ArrayD, ArrayViewD};
use serde::{Deserialize, Serialize};
use st_ptgt_config::PtgtSettings;
use tracing::{debug, warn};

use crate::correction::{
    apply_trial_scales, trial_scales, IdentityCorrection, OutputCountCorrection,
};
use crate::error::{invalid, Result};
use crate::evidence::{Evidence, MODEL_AXIS};
use crate::mask::ValidTargets;
use crate::marginalize::{marginalize, Marginalization};
use crate::prior::add_log_prior;
use crate::softmax::masked_softmax;

/// Knobs of the online conversion.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PtgtOptions {
    /// Base softmax sharpness, before output-count correction.
    pub softmax_scale: f64,
    pub marginalize_models: bool,
    pub marginalize_decisions: bool,
    /// Treat an `M == Y` model bank as one dedicated model per output.
    pub per_output_model: bool,
}

impl Default for PtgtOptions {
    fn default() -> Self {
        Self::from(&PtgtSettings::default())
    }
}

impl From<&PtgtSettings> for PtgtOptions {
    fn from(settings: &PtgtSettings) -> Self {
        Self {
            softmax_scale: settings.softmax_scale,
            marginalize_models: settings.marginalize_models,
            marginalize_decisions: settings.marginalize_decisions,
            per_output_model: settings.per_output_model,
        }
    }
}

impl PtgtOptions {
    /// Defaults overridden by the `PTGT_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Ok(Self::from(&PtgtSettings::from_env()?))
    }

    pub fn with_softmax_scale(mut self, scale: f64) -> Self {
        self.softmax_scale = scale;
        self
    }

    fn marginalization(&self) -> Marginalization {
        Marginalization {
            models: self.marginalize_models,
            decisions: self.marginalize_decisions,
        }
    }
}

/// Numerical events observed while producing a probability tensor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Diagnostic {
    /// Some, but not all, probabilities came out NaN. The whole tensor was
    /// zeroed.
    PartialNan { nan_count: usize, total: usize },
}

/// Probabilities plus whatever diagnostic the computation raised.
#[derive(Clone, Debug, PartialEq)]
pub struct PtgtOutput {
    pub ptgt: ArrayD<f64>,
    pub diagnostic: Option<Diagnostic>,
}

impl PtgtOutput {
    pub fn into_inner(self) -> ArrayD<f64> {
        self.ptgt
    }

    pub fn is_clean(&self) -> bool {
        self.diagnostic.is_none()
    }
}

/// Reusable converter with a fixed option set and count-correction policy.
#[derive(Clone, Debug)]
pub struct PtgtPipeline<C = IdentityCorrection> {
    options: PtgtOptions,
    correction: C,
}

impl PtgtPipeline<IdentityCorrection> {
    pub fn new(options: PtgtOptions) -> Self {
        Self {
            options,
            correction: IdentityCorrection,
        }
    }
}

impl Default for PtgtPipeline<IdentityCorrection> {
    fn default() -> Self {
        Self::new(PtgtOptions::default())
    }
}

impl<C: OutputCountCorrection> PtgtPipeline<C> {
    /// Swaps the output-count correction policy.
    pub fn with_correction<N: OutputCountCorrection>(self, correction: N) -> PtgtPipeline<N> {
        PtgtPipeline {
            options: self.options,
            correction,
        }
    }

    pub fn options(&self) -> &PtgtOptions {
        &self.options
    }

    /// Converts accumulated evidence into target probabilities.
    ///
    /// * `f` – evidence of rank 1–4, see [`Evidence::promote`].
    /// * `prior` – optional prior probabilities broadcastable against the
    ///   canonical `(M, T, D, Y)` evidence.
    /// * `valid_tgt` – optional `(Y,)` or `(T, Y)` mask; derived from non-zero
    ///   evidence when absent.
    pub fn run(
        &self,
        f: ArrayViewD<'_, f64>,
        prior: Option<ArrayViewD<'_, f64>>,
        valid_tgt: Option<ArrayViewD<'_, bool>>,
    ) -> Result<PtgtOutput> {
        let scale = self.options.softmax_scale;
        if !scale.is_finite() || scale <= 0.0 {
            return Err(invalid(format!(
                "softmax scale must be finite and > 0, got {scale}"
            )));
        }

        let evidence = Evidence::normalize(f, self.options.per_output_model)?;
        let valid = ValidTargets::derive(&evidence, valid_tgt)?;

        let scales = trial_scales(scale, &valid, &self.correction);
        let mut scores = apply_trial_scales(evidence.view(), scales.view());
        if let Some(prior) = prior {
            scores = add_log_prior(scores, prior)?;
        }

        let (scores, fired) = marginalize(scores.view(), self.options.marginalization())?;
        debug!(
            dims = ?evidence.dim(),
            fired = ?fired.iter().map(|a| a.index()).collect::<Vec<_>>(),
            "computing target probabilities"
        );
        let probs = masked_softmax(scores.view(), &valid)?;

        let mut drop_axes = fired;
        if probs.len_of(MODEL_AXIS) == 1 && !drop_axes.contains(&MODEL_AXIS) {
            drop_axes.push(MODEL_AXIS);
        }
        drop_axes.sort_by_key(|a| a.index());
        let mut ptgt = probs.into_dyn();
        for &axis in drop_axes.iter().rev() {
            ptgt = ptgt.index_axis_move(axis, 0);
        }

        let diagnostic = zero_if_nan(&mut ptgt);
        Ok(PtgtOutput { ptgt, diagnostic })
    }
}

/// Zeroes `ptgt` when it contains NaNs; partial NaNs are reported.
fn zero_if_nan(ptgt: &mut ArrayD<f64>) -> Option<Diagnostic> {
    let nan_count = ptgt.iter().filter(|v| v.is_nan()).count();
    if nan_count == 0 {
        return None;
    }
    let total = ptgt.len();
    ptgt.fill(0.0);
    if nan_count == total {
        return None;
    }
    warn!(nan_count, total, "NaNs in target probabilities, zeroing result");
    Some(Diagnostic::PartialNan { nan_count, total })
}

/// One-shot conversion with the identity count correction.
pub fn zscore_to_ptgt(
    f: ArrayViewD<'_, f64>,
    prior: Option<ArrayViewD<'_, f64>>,
    valid_tgt: Option<ArrayViewD<'_, bool>>,
    options: &PtgtOptions,
) -> Result<PtgtOutput> {
    PtgtPipeline::new(options.clone()).run(f, prior, valid_tgt)
}
