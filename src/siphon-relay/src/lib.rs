//! Copies an opened stream into a named pipe on a dedicated thread.
//!
//! The reading side is a media pipeline that takes the pipe path as its
//! input. Pipes are FIFOs on Unix and named pipes on Windows.

mod pipe;
mod relay;

pub use pipe::{default_prefix, PipePath};
pub use relay::{ChunkSource, Relay, RelayError, RelayExit, RelayOptions, RelayReport, RelayState};
