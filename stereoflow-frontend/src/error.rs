//! Error types for the stereo and optical-flow pipelines.

use thiserror::Error;

/// Errors produced by reconstruction and motion estimation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FrontendError {
    /// Images compared pixel for pixel differ in size: the two views of a
    /// stereo pair, or consecutive frames of the flow pipeline.
    #[error("images must have the same dimensions: {left:?} vs {right:?}")]
    DimensionMismatch {
        /// Left, or earlier, image `(width, height)`.
        left: (u32, u32),
        /// Right, or later, image `(width, height)`.
        right: (u32, u32),
    },

    /// Elapsed time between two frames is zero or negative.
    #[error("time between frames must be positive, got {seconds} s")]
    InvalidDuration {
        /// Offending duration in seconds.
        seconds: f64,
    },
}

impl FrontendError {
    /// Creates a dimension mismatch error.
    #[must_use]
    pub const fn dimension_mismatch(left: (u32, u32), right: (u32, u32)) -> Self {
        Self::DimensionMismatch { left, right }
    }
}
