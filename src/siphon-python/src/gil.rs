use std::marker::PhantomData;

use pyo3::{ffi, Python};

/// Holds the interpreter lock for as long as it lives.
///
/// Acquisition saves the interpreter's per-thread lock state and drop restores
/// it, so guards nest freely on one thread. The guard is tied to the thread
/// that took it and is therefore `!Send`.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct GilGuard {
    state: ffi::PyGILState_STATE,
    _thread_bound: PhantomData<*mut ()>,
}

impl GilGuard {
    /// Take the lock, starting the interpreter with defaults if nothing has
    /// started it yet.
    pub fn acquire() -> Self {
        ensure_interpreter();
        // SAFETY: the interpreter is initialized and the returned state is
        // released exactly once, on this thread, in `Drop`.
        let state = unsafe { ffi::PyGILState_Ensure() };
        Self {
            state,
            _thread_bound: PhantomData,
        }
    }

    /// Run `f` with a `Python` token while this guard is held.
    pub fn run<F, R>(&self, f: F) -> R
    where
        F: for<'py> FnOnce(Python<'py>) -> R,
    {
        Python::attach(f)
    }
}

impl Drop for GilGuard {
    fn drop(&mut self) {
        // SAFETY: paired with the `PyGILState_Ensure` in `acquire`.
        unsafe { ffi::PyGILState_Release(self.state) };
    }
}

impl std::fmt::Debug for GilGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GilGuard").finish_non_exhaustive()
    }
}

/// Whether the embedded interpreter has been started in this process.
pub(crate) fn interpreter_started() -> bool {
    // SAFETY: may be called at any time, with or without the lock.
    unsafe { ffi::Py_IsInitialized() != 0 }
}

fn ensure_interpreter() {
    if !interpreter_started() {
        // `auto-initialize` starts the interpreter on first attach and hands
        // the lock back once it is up.
        Python::attach(|_| ());
    }
}
