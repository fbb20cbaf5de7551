// THEORY:
// Every fallible stage of the engine reports through one error type. Errors that
// can only be caused by a bad setup (kernels, block geometry, pyramid shape) are
// raised before the first frame is processed. Per-frame degenerate conditions
// (zero-energy blocks, border bands) are not errors at all: they are encoded in
// the output data as zero vectors and zero energy.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, FlowError>;

/// The error taxonomy of the motion/pyramid engine.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FlowError {
    /// The kernel grid does not match its radius, or a normalising weight is zero.
    #[error("invalid kernel: {0}")]
    InvalidKernel(String),

    /// Two fields that must share a coordinate grid do not.
    #[error("dimension mismatch in {context}: expected {expected:?}, got {actual:?}")]
    DimensionMismatch {
        context: &'static str,
        expected: (usize, usize),
        actual: (usize, usize),
    },

    /// A direct field access outside of the field's domain.
    #[error("sample ({x}, {y}) is outside the {width}x{height} field")]
    OutOfBounds {
        x: usize,
        y: usize,
        width: usize,
        height: usize,
    },

    /// A pipeline or pyramid parameter is unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A raw frame buffer does not hold exactly one frame.
    #[error("frame buffer holds {actual} bytes, expected {expected}")]
    FrameSize { expected: usize, actual: usize },

    /// The async worker pool dropped a task or a reply.
    #[error("worker pool failure: {0}")]
    WorkerPool(String),
}

impl FlowError {
    /// Create an invalid-kernel error.
    pub fn kernel<S: Into<String>>(msg: S) -> Self {
        FlowError::InvalidKernel(msg.into())
    }

    /// Create an invalid-configuration error.
    pub fn config<S: Into<String>>(msg: S) -> Self {
        FlowError::InvalidConfig(msg.into())
    }

    /// Returns true for errors that can only come from pipeline setup.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            FlowError::InvalidKernel(_) | FlowError::InvalidConfig(_) | FlowError::DimensionMismatch { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_mentions_shapes() {
        let err = FlowError::DimensionMismatch {
            context: "motion",
            expected: (4, 4),
            actual: (2, 4),
        };
        let text = err.to_string();
        assert!(text.contains("motion"));
        assert!(text.contains("(4, 4)"));
        assert!(text.contains("(2, 4)"));
    }

    #[test]
    fn configuration_errors_are_classified() {
        assert!(FlowError::kernel("zero weight").is_configuration_error());
        assert!(FlowError::config("no levels").is_configuration_error());
        assert!(!FlowError::FrameSize { expected: 4, actual: 3 }.is_configuration_error());
    }
}
