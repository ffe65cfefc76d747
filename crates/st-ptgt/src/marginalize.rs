// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Log-domain elimination of nuisance axes.
//!
//! Marginalizing over models or decision epochs means summing probabilities,
//! i.e. `log Σ exp(f)` over the axis. When both axes are requested they are
//! reduced in one pass with a single shared max shift, which is exactly the
//! log-sum over the flattened `(M × D)` axis.

use ndarray::{Array4, ArrayD, ArrayView4, ArrayViewD, Axis, Ix4, Zip};

use crate::error::{invalid, Result};
use crate::evidence::{DECISION_AXIS, MODEL_AXIS};

/// Which nuisance axes the caller wants eliminated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Marginalization {
    pub models: bool,
    pub decisions: bool,
}

impl Marginalization {
    /// Canonical axes that actually get reduced for evidence of shape `dim`.
    ///
    /// An axis of length 1 is never reduced, even when requested.
    pub fn fired_axes(&self, dim: (usize, usize, usize, usize)) -> Vec<Axis> {
        let (models, _, decisions, _) = dim;
        let mut axes = Vec::with_capacity(2);
        if self.models && models > 1 {
            axes.push(MODEL_AXIS);
        }
        if self.decisions && decisions > 1 {
            axes.push(DECISION_AXIS);
        }
        axes
    }
}

/// Joint log-sum-exp over `axes`, keeping each reduced axis with length 1.
///
/// Slices whose entries are all `-inf` reduce to `-inf`.
pub fn log_sum_exp_keepdims(f: ArrayViewD<'_, f64>, axes: &[Axis]) -> ArrayD<f64> {
    let mut max = f.to_owned();
    for &axis in axes {
        max = max
            .fold_axis(axis, f64::NEG_INFINITY, |&acc, &v| acc.max(v))
            .insert_axis(axis);
    }
    let shift = max.mapv(|m| if m.is_finite() { m } else { 0.0 });

    let mut total = (&f - &shift).mapv(f64::exp);
    for &axis in axes {
        total = total.sum_axis(axis).insert_axis(axis);
    }
    Zip::from(&mut total)
        .and(&shift)
        .for_each(|t, &m| *t = t.ln() + m);
    total
}

/// Joint log-sum-exp over `axes`, removing the reduced axes from the result.
pub fn log_sum_exp(f: ArrayViewD<'_, f64>, axes: &[Axis]) -> Result<ArrayD<f64>> {
    let mut sorted: Vec<usize> = axes.iter().map(|a| a.index()).collect();
    sorted.sort_unstable();
    sorted.dedup();
    if sorted.len() != axes.len() {
        return Err(invalid("log-sum-exp axes must be distinct"));
    }
    if let Some(&bad) = sorted.iter().find(|&&a| a >= f.ndim()) {
        return Err(invalid(format!(
            "axis {bad} out of range for rank {}",
            f.ndim()
        )));
    }
    let mut reduced = log_sum_exp_keepdims(f, axes);
    for &axis in sorted.iter().rev() {
        reduced = reduced.index_axis_move(Axis(axis), 0);
    }
    Ok(reduced)
}

/// Applies `plan` to canonical evidence. Reduced axes stay with length 1 so the
/// result keeps the `(M, T, D, Y)` layout; the fired axes are returned too.
pub fn marginalize(
    scores: ArrayView4<'_, f64>,
    plan: Marginalization,
) -> Result<(Array4<f64>, Vec<Axis>)> {
    let axes = plan.fired_axes(scores.dim());
    if axes.is_empty() {
        return Ok((scores.to_owned(), axes));
    }
    let reduced = log_sum_exp_keepdims(scores.into_dyn(), &axes).into_dimensionality::<Ix4>()?;
    Ok((reduced, axes))
}
