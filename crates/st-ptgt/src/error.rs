// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PtgtError>;

/// Caller contract violations. Numerical degeneracies (all-masked slices,
/// vanishing sums) never surface here; they are handled in place.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PtgtError {
    /// Tensor rank or axis lengths do not fit the expected layout.
    #[error("shape mismatch: {0}")]
    Shape(String),
    /// A scalar parameter (scale, probability floor, axis) is out of range.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// Input that must carry at least one element was empty.
    #[error("empty input: {0}")]
    EmptyInput(&'static str),
    #[error(transparent)]
    Config(#[from] st_ptgt_config::ConfigError),
}

impl From<ndarray::ShapeError> for PtgtError {
    fn from(err: ndarray::ShapeError) -> Self {
        PtgtError::Shape(err.to_string())
    }
}

pub(crate) fn shape(msg: impl Into<String>) -> PtgtError {
    PtgtError::Shape(msg.into())
}

pub(crate) fn invalid(msg: impl Into<String>) -> PtgtError {
    PtgtError::InvalidArgument(msg.into())
}
