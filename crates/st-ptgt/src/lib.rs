// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Calibrated target probabilities from accumulated BCI classifier evidence.
//!
//! Evidence arrives as normalized output scores indexed by
//! `(Model, Trial, DecisionEpoch, Output)`; lower ranks drop leading axes. The
//! [`PtgtPipeline`] turns it into `P(output is the attended target)` with a
//! masked, scale-calibrated softmax, optionally folding in a prior and
//! marginalizing over models and decision epochs. [`ScaleCalibrator`] picks the
//! softmax scale offline from labelled trials.
//!
//! ```no_run
//! use st_ptgt::{zscore_to_ptgt, PtgtOptions};
//! # fn demo(f: ndarray::ArrayD<f64>) -> st_ptgt::Result<()> {
//! let out = zscore_to_ptgt(f.view(), None, None, &PtgtOptions::default())?;
//! let ptgt = out.into_inner();
//! # let _ = ptgt;
//! # Ok(())
//! # }
//! ```

pub mod calibrate;
pub mod correction;
pub mod entropy;
pub mod error;
pub mod evidence;
pub mod marginalize;
pub mod mask;
pub mod pipeline;
pub mod prior;
pub mod softmax;
pub mod synthetic;
pub mod telemetry;

pub use calibrate::{
    calibrate_softmax_scale, Calibration, CalibrationConfig, ScaleCalibrator, ScaleLoss,
};
pub use correction::{
    softmax_nout_corr, IdentityCorrection, OutputCountCorrection, SaturatingLogCorrection,
};
pub use entropy::entropy;
pub use error::{PtgtError, Result};
pub use evidence::{per_output_model_diagonal, Evidence};
pub use marginalize::{log_sum_exp, Marginalization};
pub use mask::ValidTargets;
pub use pipeline::{zscore_to_ptgt, Diagnostic, PtgtOptions, PtgtOutput, PtgtPipeline};
pub use softmax::{masked_softmax, softmax};
pub use synthetic::SyntheticEvidence;

pub use st_ptgt_config::{CalibrationSettings, PtgtSettings};
