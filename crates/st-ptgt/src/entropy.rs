// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use ndarray::{ArrayD, ArrayViewD, Axis};

use crate::error::{invalid, shape, Result};

/// Floor applied inside the log so zero-probability entries contribute zero.
pub const ENTROPY_FLOOR: f64 = 1e-8;

/// `Σ p · ln(max(p, ENTROPY_FLOOR))` along `axis` (last axis when `None`).
///
/// This is the negative Shannon entropy: 0 for a one-hot distribution and
/// `-ln(n)` for a uniform one, so more negative means less decided.
pub fn entropy(p: ArrayViewD<'_, f64>, axis: Option<Axis>) -> Result<ArrayD<f64>> {
    if p.ndim() == 0 {
        return Err(shape("entropy needs at least one axis"));
    }
    let axis = axis.unwrap_or(Axis(p.ndim() - 1));
    if axis.index() >= p.ndim() {
        return Err(invalid(format!(
            "axis {} out of range for rank {}",
            axis.index(),
            p.ndim()
        )));
    }
    Ok(p.map_axis(axis, |lane| {
        lane.iter()
            .map(|&pi| pi * pi.max(ENTROPY_FLOOR).ln())
            .sum::<f64>()
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn one_hot_has_zero_entropy_and_uniform_is_most_negative() {
        let p = array![[1.0, 0.0, 0.0, 0.0], [0.25, 0.25, 0.25, 0.25]].into_dyn();
        let ent = entropy(p.view(), None).unwrap();
        assert_eq!(ent.shape(), &[2]);
        assert_abs_diff_eq!(ent[[0]], 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(ent[[1]], -(4f64.ln()), epsilon = 1e-12);
    }

    #[test]
    fn explicit_axis_reduces_that_axis() {
        let p = array![[0.5, 1.0], [0.5, 0.0]].into_dyn();
        let ent = entropy(p.view(), Some(Axis(0))).unwrap();
        assert_abs_diff_eq!(ent[[0]], 0.5f64.ln(), epsilon = 1e-12);
        assert_abs_diff_eq!(ent[[1]], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn rejects_out_of_range_axis() {
        let p = array![0.5, 0.5].into_dyn();
        assert!(entropy(p.view(), Some(Axis(1))).is_err());
    }
}
