//! Errors raised when a layer's blob contract is violated.
//!
//! Every variant describes a programming or configuration mistake on the
//! caller's side. None of them is transient, so the host should treat an
//! `Err` as fatal for the net being built instead of retrying the call.

use briny::prelude::ValidationError;
use thiserror::Error;

/// Failure of a layer operation.
#[derive(Debug, Error)]
pub enum LayerError {
    /// Wrong number of bottom or top blobs.
    #[error("{layer} layer takes {expected} {role} blob(s), but {actual} were given")]
    BlobCount {
        layer: &'static str,
        role: &'static str,
        expected: String,
        actual: usize,
    },

    /// An input blob disagrees with `bottom[0]` on a non-batch axis.
    #[error(
        "{layer} layer: {axis} of bottom[{index}] ({actual}) does not match bottom[0] ({expected})"
    )]
    ShapeMismatch {
        layer: &'static str,
        index: usize,
        axis: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Element counts disagree after a reshape.
    #[error("{layer} layer: {what} holds {actual} elements, expected {expected}")]
    CountMismatch {
        layer: &'static str,
        what: String,
        expected: usize,
        actual: usize,
    },

    /// Forward or backward was called with inputs the layer was not reshaped for.
    #[error("{layer} layer was reshaped for {expected} elements but got {actual}; call reshape first")]
    NotReshaped {
        layer: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Backward was called without a forward pass since the last reshape.
    #[error("{layer} layer: backward called before forward")]
    BackwardBeforeForward { layer: &'static str },

    /// A layer parameter is out of range or inconsistent with the blobs.
    #[error("invalid layer parameter: {0}")]
    InvalidParameter(String),

    /// A tensor or parameter failed integrity validation.
    #[error("validation error: {0}")]
    Validation(ValidationError),

    /// The layer description could not be parsed.
    #[error("failed to parse layer parameter: {0}")]
    Parse(#[from] serde_json::Error),
}

impl From<ValidationError> for LayerError {
    fn from(err: ValidationError) -> Self {
        Self::Validation(err)
    }
}
