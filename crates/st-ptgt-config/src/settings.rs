// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Tunable policy values for the probability pipeline and the scale sweep.
//!
//! Every field has a compiled-in default and can be overridden through a
//! `PTGT_*` environment variable. Malformed overrides are reported instead of
//! silently falling back, so a typo never changes calibration behaviour.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::parse_flag;

/// Softmax sharpness used when no calibrated value is available.
pub const DEFAULT_SOFTMAX_SCALE: f64 = 2.0;
/// Floor applied to the true-target probability inside the calibration loss.
pub const DEFAULT_MIN_PROB: f64 = 0.01;
/// Candidate scales swept by the calibrator.
pub const DEFAULT_SCALE_GRID: [f64; 14] = [
    0.5, 1.0, 1.5, 2.0, 2.5, 3.0, 3.5, 4.0, 5.0, 7.0, 10.0, 15.0, 20.0, 30.0,
];

/// Errors raised while reading configuration overrides.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{var} is not valid unicode")]
    NotUnicode { var: &'static str },
    #[error("{var}={value:?} is not a valid {expected}")]
    Parse {
        var: &'static str,
        value: String,
        expected: &'static str,
    },
    #[error("{var} is out of range: {reason}")]
    OutOfRange { var: &'static str, reason: String },
}

/// Defaults for the online evidence → probability conversion.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PtgtSettings {
    pub softmax_scale: f64,
    pub marginalize_models: bool,
    pub marginalize_decisions: bool,
    pub per_output_model: bool,
}

impl Default for PtgtSettings {
    fn default() -> Self {
        Self {
            softmax_scale: DEFAULT_SOFTMAX_SCALE,
            marginalize_models: true,
            marginalize_decisions: false,
            per_output_model: true,
        }
    }
}

impl PtgtSettings {
    /// Reads `PTGT_SOFTMAX_SCALE`, `PTGT_MARGINALIZE_MODELS`,
    /// `PTGT_MARGINALIZE_DECISIONS` and `PTGT_PER_OUTPUT_MODEL`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let softmax_scale = match read_var("PTGT_SOFTMAX_SCALE")? {
            Some(raw) => parse_positive("PTGT_SOFTMAX_SCALE", &raw)?,
            None => defaults.softmax_scale,
        };
        Ok(Self {
            softmax_scale,
            marginalize_models: read_flag("PTGT_MARGINALIZE_MODELS")?
                .unwrap_or(defaults.marginalize_models),
            marginalize_decisions: read_flag("PTGT_MARGINALIZE_DECISIONS")?
                .unwrap_or(defaults.marginalize_decisions),
            per_output_model: read_flag("PTGT_PER_OUTPUT_MODEL")?
                .unwrap_or(defaults.per_output_model),
        })
    }
}

/// Defaults for the offline softmax-scale sweep.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationSettings {
    pub scales: Vec<f64>,
    pub min_prob: f64,
}

impl Default for CalibrationSettings {
    fn default() -> Self {
        Self {
            scales: DEFAULT_SCALE_GRID.to_vec(),
            min_prob: DEFAULT_MIN_PROB,
        }
    }
}

impl CalibrationSettings {
    /// Reads `PTGT_SCALE_GRID` (comma separated) and `PTGT_MIN_PROB`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let scales = match read_var("PTGT_SCALE_GRID")? {
            Some(raw) => parse_grid(&raw)?,
            None => defaults.scales,
        };
        let min_prob = match read_var("PTGT_MIN_PROB")? {
            Some(raw) => {
                let value = parse_positive("PTGT_MIN_PROB", &raw)?;
                if value > 1.0 {
                    return Err(ConfigError::OutOfRange {
                        var: "PTGT_MIN_PROB",
                        reason: format!("{value} exceeds 1"),
                    });
                }
                value
            }
            None => defaults.min_prob,
        };
        Ok(Self { scales, min_prob })
    }
}

fn read_var(var: &'static str) -> Result<Option<String>, ConfigError> {
    match std::env::var(var) {
        Ok(raw) if raw.trim().is_empty() => Ok(None),
        Ok(raw) => Ok(Some(raw)),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(std::env::VarError::NotUnicode(_)) => Err(ConfigError::NotUnicode { var }),
    }
}

fn read_flag(var: &'static str) -> Result<Option<bool>, ConfigError> {
    match read_var(var)? {
        Some(raw) => parse_flag(&raw).map(Some).ok_or(ConfigError::Parse {
            var,
            value: raw,
            expected: "boolean flag",
        }),
        None => Ok(None),
    }
}

fn parse_positive(var: &'static str, raw: &str) -> Result<f64, ConfigError> {
    let value = raw.trim().parse::<f64>().map_err(|_| ConfigError::Parse {
        var,
        value: raw.to_string(),
        expected: "number",
    })?;
    if !value.is_finite() || value <= 0.0 {
        return Err(ConfigError::OutOfRange {
            var,
            reason: format!("{value} must be finite and > 0"),
        });
    }
    Ok(value)
}

fn parse_grid(raw: &str) -> Result<Vec<f64>, ConfigError> {
    let scales = raw
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| parse_positive("PTGT_SCALE_GRID", item))
        .collect::<Result<Vec<_>, _>>()?;
    if scales.is_empty() {
        return Err(ConfigError::OutOfRange {
            var: "PTGT_SCALE_GRID",
            reason: "grid must contain at least one scale".to_string(),
        });
    }
    Ok(scales)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_env::with_env;

    const PIPELINE_VARS: [&str; 4] = [
        "PTGT_SOFTMAX_SCALE",
        "PTGT_MARGINALIZE_MODELS",
        "PTGT_MARGINALIZE_DECISIONS",
        "PTGT_PER_OUTPUT_MODEL",
    ];

    #[test]
    fn pipeline_defaults_without_env() {
        let vars: Vec<_> = PIPELINE_VARS.iter().map(|v| (*v, None)).collect();
        with_env(&vars, || {
            assert_eq!(PtgtSettings::from_env().unwrap(), PtgtSettings::default());
        });
    }

    #[test]
    fn pipeline_overrides_are_parsed() {
        with_env(
            &[
                ("PTGT_SOFTMAX_SCALE", Some("3.5")),
                ("PTGT_MARGINALIZE_MODELS", Some("off")),
                ("PTGT_MARGINALIZE_DECISIONS", Some("1")),
                ("PTGT_PER_OUTPUT_MODEL", None),
            ],
            || {
                let settings = PtgtSettings::from_env().unwrap();
                assert_eq!(settings.softmax_scale, 3.5);
                assert!(!settings.marginalize_models);
                assert!(settings.marginalize_decisions);
                assert!(settings.per_output_model);
            },
        );
    }

    #[test]
    fn malformed_flag_is_an_error() {
        with_env(&[("PTGT_MARGINALIZE_MODELS", Some("maybe"))], || {
            let err = PtgtSettings::from_env().unwrap_err();
            assert!(matches!(
                err,
                ConfigError::Parse {
                    var: "PTGT_MARGINALIZE_MODELS",
                    ..
                }
            ));
        });
    }

    #[test]
    fn negative_scale_is_rejected() {
        with_env(&[("PTGT_SOFTMAX_SCALE", Some("-1"))], || {
            let err = PtgtSettings::from_env().unwrap_err();
            assert!(matches!(err, ConfigError::OutOfRange { .. }));
        });
    }

    #[test]
    fn grid_and_floor_overrides() {
        with_env(
            &[
                ("PTGT_SCALE_GRID", Some("1, 2,4")),
                ("PTGT_MIN_PROB", Some("0.05")),
            ],
            || {
                let settings = CalibrationSettings::from_env().unwrap();
                assert_eq!(settings.scales, vec![1.0, 2.0, 4.0]);
                assert_eq!(settings.min_prob, 0.05);
            },
        );
    }

    #[test]
    fn min_prob_above_one_is_rejected() {
        with_env(
            &[("PTGT_SCALE_GRID", None), ("PTGT_MIN_PROB", Some("1.5"))],
            || {
                assert!(CalibrationSettings::from_env().is_err());
            },
        );
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let settings: PtgtSettings = serde_json::from_str(r#"{"softmax_scale": 4.0}"#).unwrap();
        assert_eq!(settings.softmax_scale, 4.0);
        assert!(settings.marginalize_models);
        assert!(settings.per_output_model);
    }
}
