//! Error types for the mixture density network.
//!
//! Shape problems are reported eagerly, at the entry of each public call. Numerical faults
//! (NaN/Inf coming out of unbounded log-variances) are not errors here: they flow through to
//! the caller inside the returned tensors.

use thiserror::Error;

/// Main error type for MDN operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum MdnError {
    /// A tensor has the wrong rank or an unusable extent (e.g. a rank-3 conditioning batch,
    /// an empty batch, or hidden features of the wrong width).
    #[error("shape error: {0}")]
    Shape(String),

    /// Two tensors that must agree on an axis do not.
    #[error("shape mismatch in {what}: expected {expected}, got {actual}")]
    ShapeMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Reading tensor data back to the host failed.
    #[error("tensor data error: {0}")]
    TensorData(String),

    /// The mixing weights of a row cannot be sampled from (all zero or not finite).
    #[error("invalid mixture weights: {0}")]
    Weights(#[from] rand::distributions::WeightedError),

    /// Saving or loading module weights failed.
    #[error("recorder error: {0}")]
    Recorder(String),

    /// A model configuration is invalid or could not be read.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// IO error wrapper.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV serialization error.
    #[cfg(feature = "csv")]
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Convenient Result type alias.
pub type Result<T> = std::result::Result<T, MdnError>;

impl MdnError {
    pub(crate) fn mismatch(what: &'static str, expected: usize, actual: usize) -> Self {
        MdnError::ShapeMismatch {
            what,
            expected,
            actual,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MdnError::mismatch("batch size", 3, 5);
        let msg = err.to_string();
        assert!(msg.contains("batch size"));
        assert!(msg.contains("expected 3"));
        assert!(msg.contains("got 5"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "config.json");
        let err: MdnError = io_err.into();
        assert!(matches!(err, MdnError::Io(_)));
    }
}
