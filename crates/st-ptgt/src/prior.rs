// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use ndarray::{Array4, ArrayD, ArrayViewD, Zip};

use crate::error::{shape, Result};

/// Smallest prior probability admitted before taking the log.
pub const PRIOR_FLOOR: f64 = 1e-8;

/// `ln(max(prior, PRIOR_FLOOR))`, elementwise.
pub fn log_prior(prior: ArrayViewD<'_, f64>) -> ArrayD<f64> {
    prior.mapv(|p| p.max(PRIOR_FLOOR).ln())
}

/// Adds the log prior to scaled `(M, T, D, Y)` evidence.
///
/// `prior` broadcasts right-aligned: `(M, 1, 1, 1)` biases models, `(Y,)`
/// biases outputs, `(T, 1, Y)` biases outputs per trial.
pub fn add_log_prior(mut scores: Array4<f64>, prior: ArrayViewD<'_, f64>) -> Result<Array4<f64>> {
    let logp = log_prior(prior);
    let target = scores.raw_dim();
    let broadcast = logp.broadcast(target).ok_or_else(|| {
        shape(format!(
            "prior of shape {:?} does not broadcast against evidence {:?}",
            logp.shape(),
            scores.shape()
        ))
    })?;
    Zip::from(&mut scores)
        .and(&broadcast)
        .for_each(|s, &p| *s += p);
    Ok(scores)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array4};

    #[test]
    fn zero_prior_is_floored_not_infinite() {
        let logp = log_prior(array![0.0, 0.5, 1.0].into_dyn().view());
        assert_abs_diff_eq!(logp[[0]], PRIOR_FLOOR.ln(), epsilon = 1e-12);
        assert_abs_diff_eq!(logp[[1]], 0.5f64.ln(), epsilon = 1e-12);
        assert_eq!(logp[[2]], 0.0);
        assert!(logp.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn output_prior_broadcasts_over_leading_axes() {
        let scores = Array4::<f64>::zeros((2, 3, 4, 2));
        let prior = array![0.25, 0.75].into_dyn();
        let biased = add_log_prior(scores, prior.view()).unwrap();
        for ((_, _, _, y), &v) in biased.indexed_iter() {
            let expected = if y == 0 { 0.25f64.ln() } else { 0.75f64.ln() };
            assert_abs_diff_eq!(v, expected, epsilon = 1e-12);
        }
    }

    #[test]
    fn model_prior_biases_each_model_block() {
        let scores = Array4::<f64>::ones((2, 1, 2, 3));
        let prior = Array4::from_shape_vec((2, 1, 1, 1), vec![0.9, 0.1])
            .unwrap()
            .into_dyn();
        let biased = add_log_prior(scores, prior.view()).unwrap();
        assert_abs_diff_eq!(biased[[0, 0, 1, 2]], 1.0 + 0.9f64.ln(), epsilon = 1e-12);
        assert_abs_diff_eq!(biased[[1, 0, 0, 0]], 1.0 + 0.1f64.ln(), epsilon = 1e-12);
    }

    #[test]
    fn non_broadcastable_prior_is_rejected() {
        let scores = Array4::<f64>::zeros((1, 1, 1, 3));
        let prior = array![0.5, 0.5].into_dyn();
        assert!(add_log_prior(scores, prior.view()).is_err());
    }
}
