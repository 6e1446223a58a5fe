use std::ops::RangeInclusive;

use thiserror::Error;

/// Shorthand for results returned by layers.
pub type Result<T> = std::result::Result<T, LayerError>;

/// Everything that can go wrong while setting up or running a layer.
///
/// Degenerate numeric cases, such as an all-zero feature vector or a batch without positive
/// pairs, are not errors: layers define their result as zero instead.
#[derive(Debug, Error)]
pub enum LayerError {
    #[error("{layer} layer takes {expected:?} {side} blobs, got {got}")]
    BlobCount {
        layer: &'static str,
        side: &'static str,
        expected: RangeInclusive<usize>,
        got: usize,
    },

    #[error("shape mismatch in {layer} layer: {reason}")]
    ShapeMismatch { layer: &'static str, reason: String },

    #[error("invalid input to {layer} layer: {reason}")]
    InvalidInput { layer: &'static str, reason: String },

    #[error("{layer} layer cannot back-propagate to label input {index}")]
    LabelGradient { layer: &'static str, index: usize },

    #[error("{layer} layer received a propagate-down mask of {got} entries for {expected} inputs")]
    PropagateDownMask {
        layer: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("invalid parameter for {layer} layer: {reason}")]
    InvalidParameter { layer: &'static str, reason: String },

    #[error("invalid filler: {0}")]
    InvalidFiller(String),

    #[error(
        "gradient mismatch for bottom {bottom}, element {index}: computed {computed}, estimated {estimated}"
    )]
    GradientMismatch {
        bottom: usize,
        index: usize,
        computed: f32,
        estimated: f32,
    },

    #[error(transparent)]
    Shape(#[from] ndarray::ShapeError),
}

impl LayerError {
    pub(crate) fn shape_mismatch(layer: &'static str, reason: impl Into<String>) -> Self {
        Self::ShapeMismatch {
            layer,
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_parameter(layer: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            layer,
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_input(layer: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            layer,
            reason: reason.into(),
        }
    }
}
