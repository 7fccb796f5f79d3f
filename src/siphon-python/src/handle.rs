use pyo3::prelude::*;
use pyo3::types::PyTuple;

use crate::{BridgeError, BridgeResult, GilGuard};

/// Sole owner of one reference to a Python object.
///
/// The reference is released exactly once, with the interpreter lock held,
/// when the handle drops. A handle whose reference was moved out with
/// [`ForeignHandle::take`] is null and drops without touching the interpreter.
/// Handles are deliberately not `Clone`.
#[derive(Default)]
pub struct ForeignHandle {
    object: Option<Py<PyAny>>,
}

impl ForeignHandle {
    /// Adopt a reference the caller already owns, such as a call result.
    /// The reference count is left as is.
    pub fn adopt(object: Py<PyAny>) -> Self {
        Self {
            object: Some(object),
        }
    }

    /// Take a new reference to an object we only borrow (container items,
    /// arguments). Increments the reference count.
    pub fn from_borrowed(object: &Bound<'_, PyAny>) -> Self {
        Self {
            object: Some(object.clone().unbind()),
        }
    }

    pub fn null() -> Self {
        Self::default()
    }

    pub fn is_null(&self) -> bool {
        self.object.is_none()
    }

    /// Move the reference into a new handle, leaving this one null.
    pub fn take(&mut self) -> ForeignHandle {
        ForeignHandle {
            object: self.object.take(),
        }
    }

    pub fn bind<'a, 'py>(&'a self, py: Python<'py>) -> BridgeResult<&'a Bound<'py, PyAny>> {
        self.object
            .as_ref()
            .map(|object| object.bind(py))
            .ok_or(BridgeError::Released)
    }

    /// Look up `attribute` and check that it can be called.
    pub(crate) fn callable_attribute<'py>(
        &self,
        py: Python<'py>,
        attribute: &str,
    ) -> BridgeResult<Bound<'py, PyAny>> {
        let callable = self
            .bind(py)?
            .getattr(attribute)
            .map_err(|_| BridgeError::invalid_object(attribute))?;
        if !callable.is_callable() {
            return Err(BridgeError::invalid_object(attribute));
        }
        Ok(callable)
    }

    /// Resolve `attribute`, call it with `args` and return the owned result.
    pub(crate) fn call_attribute<'py>(
        &self,
        py: Python<'py>,
        attribute: &str,
        args: Bound<'py, PyTuple>,
    ) -> BridgeResult<Bound<'py, PyAny>> {
        let callable = self.callable_attribute(py, attribute)?;
        callable
            .call1(args)
            .map_err(|err| BridgeError::call_failure(py, attribute, &err))
    }
}

impl Drop for ForeignHandle {
    fn drop(&mut self) {
        if let Some(object) = self.object.take() {
            let gil = GilGuard::acquire();
            gil.run(move |_py| drop(object));
        }
    }
}

impl std::fmt::Debug for ForeignHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForeignHandle")
            .field("null", &self.is_null())
            .finish()
    }
}
