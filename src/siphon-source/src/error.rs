use siphon_python::BridgeError;
use siphon_relay::RelayError;
use thiserror::Error;

use crate::PipelineError;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error(transparent)]
    Bridge(#[from] BridgeError),
    #[error(transparent)]
    Relay(#[from] RelayError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error("pipe {path} was not ready in time")]
    PipeTimeout { path: String },
}
