use thiserror::Error;

/// Configuration errors raised by the golden model.
///
/// Every variant is fatal for the run: a bad shape or scale is a bug in the
/// configuration or the parameter files, never something to retry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GoldenError {
    #[error("{layer}: {what} shape mismatch, expected {expected:?} but got {actual:?}")]
    ShapeMismatch {
        layer: String,
        what: &'static str,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("{layer}: invalid scale configuration: {reason}")]
    InvalidScaleConfig { layer: String, reason: String },

    #[error("{layer}: worst-case accumulator magnitude {bound} does not fit in i32")]
    AccumulatorOverflow { layer: String, bound: i64 },

    #[error("{layer}: no parameters supplied")]
    MissingParams { layer: String },

    #[error("{layer}: {reason}")]
    TopologyMismatch { layer: String, reason: String },
}

pub type Result<T> = std::result::Result<T, GoldenError>;

impl GoldenError {
    pub(crate) fn shape(
        layer: impl Into<String>,
        what: &'static str,
        expected: &[usize],
        actual: &[usize],
    ) -> Self {
        GoldenError::ShapeMismatch {
            layer: layer.into(),
            what,
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        }
    }

    pub(crate) fn scale(layer: impl Into<String>, reason: impl Into<String>) -> Self {
        GoldenError::InvalidScaleConfig {
            layer: layer.into(),
            reason: reason.into(),
        }
    }
}
