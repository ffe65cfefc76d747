// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Masked, shift-stabilised softmax over the Output axis.

use ndarray::{
    Array, Array4, ArrayD, ArrayView, ArrayView1, ArrayView4, ArrayViewD, ArrayViewMut1, Axis,
    Dimension, Zip,
};

use crate::error::{shape, Result};
use crate::mask::ValidTargets;

/// Floor applied to the per-slice normaliser.
pub const SUM_FLOOR: f64 = 1e-6;

/// Softmax over the last axis of `f`, with invalid outputs forced to zero.
///
/// `valid_tgt` has the Output axis last. When it has lower rank than `f`, a
/// unit axis is inserted just before its Output axis (where `f` keeps its
/// decision epochs) and the result is broadcast right-aligned, so a `(T, Y)`
/// mask applies to `(T, D, Y)` and `(M, T, D, Y)` scores alike.
///
/// Slices without any valid output come back as all zeros. A NaN among the
/// valid scores turns its whole slice into NaN.
pub fn softmax(
    f: ArrayViewD<'_, f64>,
    valid_tgt: Option<ArrayViewD<'_, bool>>,
) -> Result<ArrayD<f64>> {
    if f.ndim() == 0 {
        return Err(shape("softmax needs at least one axis"));
    }
    let Some(mask) = valid_tgt else {
        return Ok(softmax_lanes(f, None));
    };
    if mask.ndim() == 0 || mask.ndim() > f.ndim() {
        return Err(shape(format!(
            "validity mask of rank {} cannot apply to scores of rank {}",
            mask.ndim(),
            f.ndim()
        )));
    }
    let mask = if mask.ndim() < f.ndim() {
        let before_output = mask.ndim() - 1;
        mask.insert_axis(Axis(before_output))
    } else {
        mask
    };
    let full = mask.broadcast(f.raw_dim()).ok_or_else(|| {
        shape(format!(
            "validity mask {:?} does not broadcast against scores {:?}",
            mask.shape(),
            f.shape()
        ))
    })?;
    Ok(softmax_lanes(f, Some(full)))
}

/// Softmax of canonical `(M, T, D, Y)` scores under a `(T, Y)` mask.
pub fn masked_softmax(scores: ArrayView4<'_, f64>, valid: &ValidTargets) -> Result<Array4<f64>> {
    let (_, trials, _, outputs) = scores.dim();
    if valid.n_trials() != trials || valid.n_outputs() != outputs {
        return Err(shape(format!(
            "mask ({}, {}) does not match evidence trials/outputs ({trials}, {outputs})",
            valid.n_trials(),
            valid.n_outputs()
        )));
    }
    if valid.all_valid() {
        return Ok(softmax_lanes(scores, None));
    }
    let mask = valid.view().insert_axis(Axis(0)).insert_axis(Axis(2));
    let full = mask
        .broadcast(scores.raw_dim())
        .ok_or_else(|| shape("mask does not broadcast against evidence"))?;
    Ok(softmax_lanes(scores, Some(full)))
}

fn softmax_lanes<D: Dimension>(
    f: ArrayView<'_, f64, D>,
    mask: Option<ArrayView<'_, bool, D>>,
) -> Array<f64, D> {
    let last = Axis(f.ndim() - 1);
    let mut out = Array::<f64, D>::zeros(f.raw_dim());
    match mask {
        Some(mask) => Zip::from(out.lanes_mut(last))
            .and(f.lanes(last))
            .and(mask.lanes(last))
            .for_each(|o, x, v| softmax_lane(o, x, Some(v))),
        None => Zip::from(out.lanes_mut(last))
            .and(f.lanes(last))
            .for_each(|o, x| softmax_lane(o, x, None)),
    }
    out
}

fn softmax_lane(
    mut out: ArrayViewMut1<'_, f64>,
    x: ArrayView1<'_, f64>,
    valid: Option<ArrayView1<'_, bool>>,
) {
    let is_valid = |i: usize| valid.as_ref().map_or(true, |v| v[i]);
    if x.iter().enumerate().any(|(i, v)| is_valid(i) && v.is_nan()) {
        out.fill(f64::NAN);
        return;
    }
    let max = x
        .iter()
        .enumerate()
        .filter(|(i, _)| is_valid(*i))
        .fold(f64::NEG_INFINITY, |acc, (_, &v)| acc.max(v));
    if max == f64::NEG_INFINITY {
        // nothing valid, or every valid score is -inf
        out.fill(0.0);
        return;
    }

    let mut total = 0.0;
    for (i, (o, &v)) in out.iter_mut().zip(x.iter()).enumerate() {
        if is_valid(i) {
            let e = (v - max).exp();
            *o = e;
            total += e;
        } else {
            *o = 0.0;
        }
    }
    if total.is_nan() {
        // +inf scores leave inf - inf behind
        out.fill(f64::NAN);
        return;
    }
    let denom = total.max(SUM_FLOOR);
    out.mapv_inplace(|e| e / denom);
}
