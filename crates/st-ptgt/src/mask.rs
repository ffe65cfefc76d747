// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use ndarray::{s, Array1, Array2, ArrayView2, ArrayViewD, Axis, Ix1, Ix2};

use crate::error::{shape, Result};
use crate::evidence::Evidence;

/// Which outputs were presented in which trial, shaped `(T, Y)`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidTargets {
    mask: Array2<bool>,
}

impl ValidTargets {
    /// Marks `(t, y)` valid when any model or decision epoch produced non-zero
    /// evidence for it.
    ///
    /// Outputs that were presented but legitimately scored exactly zero are
    /// indistinguishable from absent ones here; pass an explicit mask for those.
    pub fn from_evidence(evidence: &Evidence) -> Self {
        let (_, trials, _, outputs) = evidence.dim();
        let scores = evidence.view();
        let mask = Array2::from_shape_fn((trials, outputs), |(t, y)| {
            scores.slice(s![.., t, .., y]).iter().any(|&v| v != 0.0)
        });
        Self { mask }
    }

    /// Accepts `(Y,)`, `(1, Y)` or `(T, Y)` and broadcasts single rows over all
    /// trials.
    pub fn from_mask(mask: ArrayViewD<'_, bool>, trials: usize, outputs: usize) -> Result<Self> {
        let rows: ArrayView2<'_, bool> = match mask.ndim() {
            1 => mask.into_dimensionality::<Ix1>()?.insert_axis(Axis(0)),
            2 => mask.into_dimensionality::<Ix2>()?,
            rank => {
                return Err(shape(format!(
                    "validity mask must be (Y,) or (T, Y), got rank {rank}"
                )))
            }
        };
        let (mask_trials, mask_outputs) = rows.dim();
        if mask_outputs != outputs {
            return Err(shape(format!(
                "validity mask covers {mask_outputs} outputs, evidence has {outputs}"
            )));
        }
        if mask_trials != trials && mask_trials != 1 {
            return Err(shape(format!(
                "validity mask covers {mask_trials} trials, evidence has {trials}"
            )));
        }
        let broadcast = rows
            .broadcast((trials, outputs))
            .ok_or_else(|| shape("validity mask is not broadcastable over trials"))?;
        Ok(Self {
            mask: broadcast.to_owned(),
        })
    }

    /// Uses the caller's mask when given, otherwise derives one from evidence.
    pub fn derive(evidence: &Evidence, mask: Option<ArrayViewD<'_, bool>>) -> Result<Self> {
        match mask {
            Some(mask) => Self::from_mask(mask, evidence.n_trials(), evidence.n_outputs()),
            None => Ok(Self::from_evidence(evidence)),
        }
    }

    pub fn view(&self) -> ArrayView2<'_, bool> {
        self.mask.view()
    }

    pub fn n_trials(&self) -> usize {
        self.mask.nrows()
    }

    pub fn n_outputs(&self) -> usize {
        self.mask.ncols()
    }

    /// Number of valid outputs in each trial.
    pub fn counts(&self) -> Array1<usize> {
        self.mask
            .map_axis(Axis(1), |row| row.iter().filter(|&&v| v).count())
    }

    pub fn all_valid(&self) -> bool {
        self.mask.iter().all(|&v| v)
    }

    pub fn select_trials(&self, trials: &[usize]) -> Self {
        Self {
            mask: self.mask.select(Axis(0), trials),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array4};

    fn evidence() -> Evidence {
        let mut f = Array4::<f64>::zeros((2, 2, 3, 3));
        f[[1, 0, 2, 0]] = 0.5;
        f[[0, 1, 0, 2]] = -1.0;
        f[[0, 1, 1, 1]] = 2.0;
        Evidence::from_canonical(f).unwrap()
    }

    #[test]
    fn derives_validity_from_non_zero_evidence() {
        let valid = ValidTargets::from_evidence(&evidence());
        assert_eq!(
            valid.view(),
            array![[true, false, false], [false, true, true]]
        );
        assert_eq!(valid.counts(), array![1, 2]);
        assert!(!valid.all_valid());
    }

    #[test]
    fn one_dimensional_mask_broadcasts_to_every_trial() {
        let mask = array![true, false, true].into_dyn();
        let valid = ValidTargets::derive(&evidence(), Some(mask.view())).unwrap();
        assert_eq!(valid.view(), array![[true, false, true], [true, false, true]]);
    }

    #[test]
    fn single_row_mask_broadcasts_to_every_trial() {
        let mask = array![[false, true, true]].into_dyn();
        let valid = ValidTargets::derive(&evidence(), Some(mask.view())).unwrap();
        assert_eq!(valid.n_trials(), 2);
        assert_eq!(valid.counts(), array![2, 2]);
    }

    #[test]
    fn mismatched_masks_are_rejected() {
        let wrong_outputs = array![true, false].into_dyn();
        assert!(ValidTargets::derive(&evidence(), Some(wrong_outputs.view())).is_err());

        let wrong_trials = array![[true, true, true], [true, true, true], [true, true, true]]
            .into_dyn();
        assert!(ValidTargets::derive(&evidence(), Some(wrong_trials.view())).is_err());

        let wrong_rank = ndarray::Array3::<bool>::from_elem((1, 2, 3), true).into_dyn();
        assert!(ValidTargets::derive(&evidence(), Some(wrong_rank.view())).is_err());
    }
}
