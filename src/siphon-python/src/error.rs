use pyo3::{PyErr, Python};
use thiserror::Error;

use crate::exception;

/// Failures crossing the boundary into the embedded interpreter.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The interpreter or the target library never loaded.
    #[error("python runtime is not loaded")]
    NotLoaded,
    /// A foreign call raised, or returned nothing where a value was required.
    #[error("python call `{call}` failed:\n{trace}")]
    CallFailure { call: String, trace: String },
    /// An expected attribute is missing or cannot be called.
    #[error("python object has no callable attribute `{attribute}`")]
    InvalidObject { attribute: String },
    /// Reserved for read-past-end signalling; reads report end of stream with
    /// an empty chunk instead.
    #[error("stream ended")]
    StreamEnded,
    /// The wrapped reference was moved out of the handle.
    #[error("foreign handle has already been released")]
    Released,
}

pub type BridgeResult<T> = Result<T, BridgeError>;

impl BridgeError {
    /// Wrap a raised foreign error, formatting its traceback.
    pub(crate) fn call_failure(py: Python<'_>, call: &str, err: &PyErr) -> Self {
        let trace = exception::describe(py, err);
        tracing::debug!(call, %trace, "python call raised");
        BridgeError::CallFailure {
            call: call.to_string(),
            trace,
        }
    }

    pub(crate) fn invalid_object(attribute: &str) -> Self {
        BridgeError::InvalidObject {
            attribute: attribute.to_string(),
        }
    }

    /// Foreign traceback text, when the error carries one.
    pub fn trace(&self) -> Option<&str> {
        match self {
            BridgeError::CallFailure { trace, .. } => Some(trace),
            _ => None,
        }
    }
}
