//! Bridge between Siphon and an embedded Python interpreter hosting Streamlink.
//!
//! This crate provides:
//! - One-time interpreter start-up and entry-point resolution ([`Runtime`])
//! - A reentrant RAII guard over the interpreter lock ([`GilGuard`])
//! - Owned handles over foreign objects that release under the lock
//!   ([`ForeignHandle`])
//! - Thin wrappers for the objects the relay needs: [`Session`],
//!   [`StreamInfo`] and [`Stream`]
//!
//! Every wrapper operation takes a `Python<'py>` token, so a call can only be
//! made while the lock is held:
//!
//! ```rust,ignore
//! use siphon_python::{GilGuard, Runtime, Session};
//!
//! let runtime = siphon_python::runtime::init_global(&config.runtime);
//! let gil = GilGuard::acquire();
//! let catalog = gil.run(|py| {
//!     let session = Session::new(py, runtime)?;
//!     session.streams(py, "https://example.com/live")
//! })?;
//! ```

mod error;
pub mod exception;
mod gil;
mod handle;
pub mod runtime;
mod session;
mod stream;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use error::{BridgeError, BridgeResult};
pub use gil::GilGuard;
pub use handle::ForeignHandle;
pub use runtime::Runtime;
pub use session::{OptionValue, Session};
pub use stream::{Stream, StreamCatalog, StreamInfo, DEFAULT_DEFINITION};
