// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Process-level configuration shared by the target-probability crates.
//!
//! * [`settings`] – pipeline and calibration defaults read from `PTGT_*`
//!   environment variables.
//! * [`determinism`] – seeded RNGs and reduction-order locking.
//! * [`tracing`] – global subscriber initialisation.

pub mod determinism;
pub mod settings;
pub mod tracing;

pub use settings::{CalibrationSettings, ConfigError, PtgtSettings};

/// Shared helpers for flag parsing across the config modules.
pub(crate) fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim() {
        "1" | "true" | "True" | "TRUE" | "on" | "ON" | "yes" => Some(true),
        "0" | "false" | "False" | "FALSE" | "off" | "OFF" | "no" => Some(false),
        _ => None,
    }
}
