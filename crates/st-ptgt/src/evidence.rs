// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Canonical `(Model, Trial, DecisionEpoch, Output)` evidence tensors.
//!
//! Upstream scoring stages hand over accumulated evidence at whatever rank is
//! convenient for them. [`Evidence`] promotes every accepted rank exactly once
//! into a 4-axis array whose unused leading axes have length 1, so the rest of
//! the pipeline only ever indexes `(m, t, d, y)`.

use ndarray::{s, Array4, ArrayView4, ArrayViewD, Axis, Ix4};
use tracing::debug;

use crate::error::{shape, PtgtError, Result};

pub const MODEL_AXIS: Axis = Axis(0);
pub const TRIAL_AXIS: Axis = Axis(1);
pub const DECISION_AXIS: Axis = Axis(2);
pub const OUTPUT_AXIS: Axis = Axis(3);

/// Accumulated evidence in canonical `(M, T, D, Y)` layout.
#[derive(Clone, Debug, PartialEq)]
pub struct Evidence {
    scores: Array4<f64>,
}

impl Evidence {
    /// Wraps an array that is already laid out as `(M, T, D, Y)`.
    pub fn from_canonical(scores: Array4<f64>) -> Result<Self> {
        if scores.is_empty() {
            return Err(PtgtError::EmptyInput("evidence tensor has a zero-length axis"));
        }
        Ok(Self { scores })
    }

    /// Promotes a rank 1–4 tensor without touching the Model axis.
    ///
    /// * `(Y,)` – one model, one trial, one epoch.
    /// * `(D, Y)` – one model, one trial.
    /// * `(T, D, Y)` – one model.
    /// * `(M, T, D, Y)` – taken as is.
    pub fn promote(f: ArrayViewD<'_, f64>) -> Result<Self> {
        let rank = f.ndim();
        let view = match rank {
            1 => f.insert_axis(Axis(0)).insert_axis(Axis(0)).insert_axis(Axis(0)),
            2 => f.insert_axis(Axis(0)).insert_axis(Axis(0)),
            3 => f.insert_axis(Axis(0)),
            4 => f,
            _ => {
                return Err(shape(format!(
                    "evidence must have rank 1..=4 (Y | D,Y | T,D,Y | M,T,D,Y), got rank {rank}"
                )))
            }
        };
        let scores = view.into_dimensionality::<Ix4>()?.to_owned();
        Self::from_canonical(scores)
    }

    /// Promotes `f` and, when requested, collapses a one-model-per-output
    /// Model axis with [`per_output_model_diagonal`].
    ///
    /// The collapse only happens for `M > 1` and `M == Y`. Any other Model
    /// axis is retained and must be marginalized or kept by the caller.
    pub fn normalize(f: ArrayViewD<'_, f64>, per_output_model: bool) -> Result<Self> {
        let evidence = Self::promote(f)?;
        let (models, _, _, outputs) = evidence.dim();
        if per_output_model && models > 1 && models == outputs {
            debug!(
                models,
                "collapsing per-output models onto the outputs they score"
            );
            let scores = per_output_model_diagonal(evidence.view())?;
            return Ok(Self { scores });
        }
        Ok(evidence)
    }

    /// `(M, T, D, Y)`.
    pub fn dim(&self) -> (usize, usize, usize, usize) {
        self.scores.dim()
    }

    pub fn n_models(&self) -> usize {
        self.scores.len_of(MODEL_AXIS)
    }

    pub fn n_trials(&self) -> usize {
        self.scores.len_of(TRIAL_AXIS)
    }

    pub fn n_decisions(&self) -> usize {
        self.scores.len_of(DECISION_AXIS)
    }

    pub fn n_outputs(&self) -> usize {
        self.scores.len_of(OUTPUT_AXIS)
    }

    pub fn view(&self) -> ArrayView4<'_, f64> {
        self.scores.view()
    }

    pub fn into_inner(self) -> Array4<f64> {
        self.scores
    }

    /// Keeps only the listed trials, in the given order.
    pub fn select_trials(&self, trials: &[usize]) -> Result<Self> {
        if let Some(&bad) = trials.iter().find(|&&t| t >= self.n_trials()) {
            return Err(shape(format!(
                "trial index {bad} out of range for {} trials",
                self.n_trials()
            )));
        }
        Self::from_canonical(self.scores.select(TRIAL_AXIS, trials))
    }
}

/// Builds single-model evidence from a per-output model bank.
///
/// Model `y` is assumed to be the scorer dedicated to output `y`, so the result
/// takes `f[y, :, :, y]` for every output. This is only meaningful when every
/// model produces scores with the same mean and scale; that is a caller
/// contract and is not checked here.
pub fn per_output_model_diagonal(f: ArrayView4<'_, f64>) -> Result<Array4<f64>> {
    let (models, trials, decisions, outputs) = f.dim();
    if models != outputs {
        return Err(shape(format!(
            "per-output models need one model per output, got {models} models for {outputs} outputs"
        )));
    }
    let mut out = Array4::<f64>::zeros((1, trials, decisions, outputs));
    for y in 0..outputs {
        out.slice_mut(s![0, .., .., y])
            .assign(&f.slice(s![y, .., .., y]));
    }
    Ok(out)
}
