// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Offline selection of the softmax scale.
//!
//! The training set follows the convention that output 0 is the true target
//! in every trial. Each candidate scale is scored by the cross-entropy of the
//! true target, `Σ -ln(max(P_true, min_prob))` over trials and epochs. The
//! floor caps the penalty for confidently wrong epochs so the fit is driven by
//! the high-confidence region, where calibration matters for stopping.

use ndarray::{s, ArrayView4, ArrayViewD, Dimension};
use serde::{Deserialize, Serialize};
use st_ptgt_config::CalibrationSettings;
use tracing::{debug, info};

use crate::correction::{apply_trial_scales, IdentityCorrection, OutputCountCorrection};
use crate::error::{invalid, shape, PtgtError, Result};
use crate::evidence::Evidence;
use crate::mask::ValidTargets;
use crate::softmax::masked_softmax;

/// Output index holding the true target in calibration data.
pub const TRUE_TARGET: usize = 0;

/// Grid and loss floor for the scale sweep.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationConfig {
    pub scales: Vec<f64>,
    pub min_prob: f64,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self::from(&CalibrationSettings::default())
    }
}

impl From<&CalibrationSettings> for CalibrationConfig {
    fn from(settings: &CalibrationSettings) -> Self {
        Self {
            scales: settings.scales.clone(),
            min_prob: settings.min_prob,
        }
    }
}

impl CalibrationConfig {
    /// Reads `PTGT_SCALE_GRID` and `PTGT_MIN_PROB` over the defaults.
    pub fn from_env() -> Result<Self> {
        Ok(Self::from(&CalibrationSettings::from_env()?))
    }

    fn validate(&self) -> Result<()> {
        if self.scales.is_empty() {
            return Err(PtgtError::EmptyInput("calibration scale grid is empty"));
        }
        if let Some(bad) = self.scales.iter().find(|s| !s.is_finite() || **s <= 0.0) {
            return Err(invalid(format!(
                "calibration scales must be finite and > 0, got {bad}"
            )));
        }
        if !(self.min_prob > 0.0 && self.min_prob <= 1.0) {
            return Err(invalid(format!(
                "min_prob must lie in (0, 1], got {}",
                self.min_prob
            )));
        }
        Ok(())
    }
}

/// Cross-entropy of one grid point.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScaleLoss {
    pub scale: f64,
    pub loss: f64,
}

/// Outcome of a scale sweep.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    /// Grid scale with the lowest loss (first one on ties).
    pub scale: f64,
    /// Loss of every grid point, in grid order.
    pub losses: Vec<ScaleLoss>,
    pub kept_trials: usize,
    /// Trials without any true-target evidence.
    pub dropped_trials: usize,
}

impl Calibration {
    pub fn best_loss(&self) -> Option<f64> {
        self.losses
            .iter()
            .find(|entry| entry.scale == self.scale)
            .map(|entry| entry.loss)
    }
}

/// Scale sweep with a pluggable output-count correction.
#[derive(Clone, Debug, Default)]
pub struct ScaleCalibrator<C = IdentityCorrection> {
    config: CalibrationConfig,
    correction: C,
}

impl ScaleCalibrator<IdentityCorrection> {
    pub fn new(config: CalibrationConfig) -> Self {
        Self {
            config,
            correction: IdentityCorrection,
        }
    }
}

impl<C: OutputCountCorrection> ScaleCalibrator<C> {
    pub fn with_correction<N: OutputCountCorrection>(self, correction: N) -> ScaleCalibrator<N> {
        ScaleCalibrator {
            config: self.config,
            correction,
        }
    }

    pub fn config(&self) -> &CalibrationConfig {
        &self.config
    }

    /// Runs the sweep over `(T, D, Y)` training evidence.
    ///
    /// Lower ranks are promoted; rank-4 evidence is accepted only if it
    /// normalizes to a single model.
    pub fn calibrate(
        &self,
        f: ArrayViewD<'_, f64>,
        valid_tgt: Option<ArrayViewD<'_, bool>>,
    ) -> Result<Calibration> {
        self.config.validate()?;
        if let Some((at, v)) = f.indexed_iter().find(|(_, v)| !v.is_finite()) {
            return Err(invalid(format!(
                "calibration evidence must be finite, got {v} at {:?}",
                at.slice()
            )));
        }

        let evidence = Evidence::normalize(f, true)?;
        if evidence.n_models() != 1 {
            return Err(shape(format!(
                "calibration expects single-model (T, D, Y) evidence, got {} models",
                evidence.n_models()
            )));
        }
        let valid = ValidTargets::derive(&evidence, valid_tgt)?;

        let keep = informative_trials(evidence.view());
        let dropped_trials = evidence.n_trials() - keep.len();
        if keep.is_empty() {
            return Err(PtgtError::EmptyInput(
                "no calibration trial carries true-target evidence",
            ));
        }
        let (evidence, valid) = if dropped_trials > 0 {
            debug!(dropped_trials, "dropping trials without true-target evidence");
            (evidence.select_trials(&keep)?, valid.select_trials(&keep))
        } else {
            (evidence, valid)
        };

        let corrections = valid.counts().mapv(|n| self.correction.factor(n));
        let loss_at = |scale: f64| -> Result<ScaleLoss> {
            let scaled = apply_trial_scales(evidence.view(), (&corrections * scale).view());
            let probs = masked_softmax(scaled.view(), &valid)?;
            let loss = probs
                .slice(s![.., .., .., TRUE_TARGET])
                .iter()
                .map(|&p| -p.max(self.config.min_prob).ln())
                .sum::<f64>();
            Ok(ScaleLoss { scale, loss })
        };

        let losses = self.sweep(loss_at)?;
        let best = select_best(&losses)
            .ok_or(PtgtError::EmptyInput("calibration scale grid is empty"))?;

        info!(
            scale = best.scale,
            loss = best.loss,
            trials = keep.len(),
            "selected softmax scale"
        );
        Ok(Calibration {
            scale: best.scale,
            losses,
            kept_trials: keep.len(),
            dropped_trials,
        })
    }

    fn sweep<F>(&self, loss_at: F) -> Result<Vec<ScaleLoss>>
    where
        F: Fn(f64) -> Result<ScaleLoss> + Sync,
    {
        #[cfg(feature = "parallel")]
        {
            use rayon::prelude::*;

            if !st_ptgt_config::determinism::lock_reduction_order() {
                return self
                    .config
                    .scales
                    .par_iter()
                    .map(|&scale| loss_at(scale))
                    .collect();
            }
        }

        self.config.scales.iter().map(|&scale| loss_at(scale)).collect()
    }
}

/// Lowest loss in grid order; the first of equal minima wins and NaN ranks
/// as `+inf`.
fn select_best(losses: &[ScaleLoss]) -> Option<ScaleLoss> {
    let rank = |entry: &ScaleLoss| {
        if entry.loss.is_nan() {
            f64::INFINITY
        } else {
            entry.loss
        }
    };
    losses
        .iter()
        .copied()
        .min_by(|a, b| rank(a).total_cmp(&rank(b)))
}

/// Trials whose true-target evidence is non-zero in at least one epoch.
fn informative_trials(scores: ArrayView4<'_, f64>) -> Vec<usize> {
    let truth = scores.slice(s![0, .., .., TRUE_TARGET]);
    truth
        .outer_iter()
        .enumerate()
        .filter(|(_, epochs)| epochs.iter().any(|&v| v != 0.0))
        .map(|(t, _)| t)
        .collect()
}

/// One-shot sweep with the identity count correction.
pub fn calibrate_softmax_scale(
    f: ArrayViewD<'_, f64>,
    valid_tgt: Option<ArrayViewD<'_, bool>>,
    config: &CalibrationConfig,
) -> Result<Calibration> {
    ScaleCalibrator::new(config.clone()).calibrate(f, valid_tgt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array3};

    /// Two outputs, one epoch: `correct` trials score the truth at +1, the rest
    /// score the distractor at +1. The cross-entropy optimum is
    /// `ln(correct / wrong)`.
    fn separated(correct: usize, wrong: usize) -> Array3<f64> {
        let mut f = Array3::<f64>::zeros((correct + wrong, 1, 2));
        for t in 0..correct {
            f[[t, 0, 0]] = 1.0;
        }
        for t in correct..correct + wrong {
            f[[t, 0, 0]] = 0.1;
            f[[t, 0, 1]] = 1.1;
        }
        f
    }

    #[test]
    fn picks_lowest_cross_entropy_grid_point() {
        let f = separated(8, 2).into_dyn();
        let mask = array![true, true].into_dyn();
        let result = calibrate_softmax_scale(f.view(), Some(mask.view()), &CalibrationConfig::default())
            .unwrap();
        // optimum ln(4) ≈ 1.386
        assert_eq!(result.scale, 1.5);
        assert_eq!(result.losses.len(), 14);
        let best = result.best_loss().unwrap();
        assert!(result.losses.iter().all(|entry| entry.loss >= best));
    }

    #[test]
    fn loss_matches_closed_form() {
        let f = separated(3, 1).into_dyn();
        let mask = array![true, true].into_dyn();
        let config = CalibrationConfig {
            scales: vec![2.0],
            min_prob: 0.01,
        };
        let result = calibrate_softmax_scale(f.view(), Some(mask.view()), &config).unwrap();
        let p_right = 1.0 / (1.0 + (-2.0f64).exp());
        let expected = -3.0 * p_right.ln() - (1.0 - p_right).ln();
        assert_abs_diff_eq!(result.losses[0].loss, expected, epsilon = 1e-9);
    }

    #[test]
    fn floor_caps_confidently_wrong_penalty() {
        let mut f = Array3::<f64>::zeros((1, 1, 2));
        f[[0, 0, 0]] = 0.01;
        f[[0, 0, 1]] = 10.0;
        let mask = array![true, true].into_dyn();
        let config = CalibrationConfig {
            scales: vec![30.0],
            min_prob: 0.05,
        };
        let result = calibrate_softmax_scale(f.into_dyn().view(), Some(mask.view()), &config)
            .unwrap();
        assert_abs_diff_eq!(result.losses[0].loss, -(0.05f64.ln()), epsilon = 1e-12);
    }

    #[test]
    fn trials_without_true_evidence_are_dropped() {
        let mut f = separated(4, 0);
        f[[1, 0, 0]] = 0.0;
        f[[1, 0, 1]] = 3.0;
        let mask = array![[true, true], [true, true], [true, true], [true, true]].into_dyn();
        let result =
            calibrate_softmax_scale(f.into_dyn().view(), Some(mask.view()), &CalibrationConfig::default())
                .unwrap();
        assert_eq!(result.kept_trials, 3);
        assert_eq!(result.dropped_trials, 1);
        // the remaining trials are all correct, so the sharpest scale wins
        assert_eq!(result.scale, 30.0);
    }

    #[test]
    fn ties_resolve_to_first_grid_point() {
        let f = Array3::from_elem((2, 3, 2), 1.0).into_dyn();
        let config = CalibrationConfig {
            scales: vec![3.0, 1.0, 2.0],
            min_prob: 0.01,
        };
        let result = calibrate_softmax_scale(f.view(), None, &config).unwrap();
        assert_eq!(result.scale, 3.0);
    }

    #[test]
    fn rejects_bad_configuration_and_empty_data() {
        let f = separated(2, 0).into_dyn();
        let empty_grid = CalibrationConfig {
            scales: vec![],
            min_prob: 0.01,
        };
        assert!(calibrate_softmax_scale(f.view(), None, &empty_grid).is_err());

        let bad_floor = CalibrationConfig {
            min_prob: 0.0,
            ..CalibrationConfig::default()
        };
        assert!(calibrate_softmax_scale(f.view(), None, &bad_floor).is_err());

        let silent = Array3::<f64>::zeros((3, 2, 2)).into_dyn();
        assert!(matches!(
            calibrate_softmax_scale(silent.view(), None, &CalibrationConfig::default()),
            Err(PtgtError::EmptyInput(_))
        ));
    }

    #[test]
    fn nan_evidence_is_rejected() {
        let mut f = separated(3, 1);
        f[[2, 0, 1]] = f64::NAN;
        assert!(matches!(
            calibrate_softmax_scale(f.into_dyn().view(), None, &CalibrationConfig::default()),
            Err(PtgtError::InvalidArgument(_))
        ));
    }

    #[test]
    fn infinite_evidence_is_rejected() {
        let mut f = separated(2, 0);
        f[[0, 0, 1]] = f64::INFINITY;
        assert!(matches!(
            calibrate_softmax_scale(f.into_dyn().view(), None, &CalibrationConfig::default()),
            Err(PtgtError::InvalidArgument(_))
        ));
    }

    #[test]
    fn selection_keeps_first_minimum_and_skips_nan() {
        let losses = |values: &[f64]| -> Vec<ScaleLoss> {
            values
                .iter()
                .enumerate()
                .map(|(i, &loss)| ScaleLoss {
                    scale: (i + 1) as f64,
                    loss,
                })
                .collect()
        };
        let all_nan = losses(&[f64::NAN, -f64::NAN, f64::NAN]);
        assert_eq!(select_best(&all_nan).unwrap().scale, 1.0);

        let mixed = losses(&[f64::NAN, 4.0, 2.0, f64::NAN, 2.0]);
        let best = select_best(&mixed).unwrap();
        assert_eq!(best.scale, 3.0);
        assert_eq!(best.loss, 2.0);

        assert!(select_best(&[]).is_none());
    }

    #[test]
    fn multi_model_evidence_is_rejected() {
        let f = ndarray::Array4::<f64>::ones((2, 1, 1, 3)).into_dyn();
        assert!(matches!(
            calibrate_softmax_scale(f.view(), None, &CalibrationConfig::default()),
            Err(PtgtError::Shape(_))
        ));
    }
}
