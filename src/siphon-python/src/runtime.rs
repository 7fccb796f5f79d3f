//! Embedded interpreter start-up and the process-wide runtime.

use std::path::PathBuf;
use std::sync::OnceLock;

use pyo3::prelude::*;
use siphon_core::RuntimeConfig;

use crate::gil::interpreter_started;
use crate::{exception, BridgeError, BridgeResult, ForeignHandle, GilGuard};

static GLOBAL: OnceLock<Runtime> = OnceLock::new();

/// Initialize the process-wide runtime on first call and return it.
///
/// Later calls return the same runtime, whatever `config` they pass. A failed
/// initialization is never retried.
pub fn init_global(config: &RuntimeConfig) -> &'static Runtime {
    GLOBAL.get_or_init(|| Runtime::initialize(config))
}

/// The process-wide runtime, if [`init_global`] has run.
pub fn global() -> Option<&'static Runtime> {
    GLOBAL.get()
}

enum RuntimeState {
    Loaded {
        module: String,
        entry_point: ForeignHandle,
    },
    Failed {
        reason: String,
    },
}

/// The interpreter plus the resolved session constructor.
pub struct Runtime {
    state: RuntimeState,
}

impl Runtime {
    /// Start the interpreter if needed and resolve `module.entry_point`.
    ///
    /// Never panics on a broken installation: the failure is logged and the
    /// returned runtime reports [`Runtime::is_loaded`] as `false`.
    pub fn initialize(config: &RuntimeConfig) -> Self {
        if !interpreter_started() {
            tracing::info!("initializing Python...");
            if let Some(home) = &config.python_home {
                std::env::set_var("PYTHONHOME", home);
            }
        }

        let gil = GilGuard::acquire();
        let state = gil.run(|py| {
            log_diagnostics(py);
            if let Err(err) = extend_search_path(py, &config.search_paths) {
                tracing::warn!(
                    trace = %exception::describe(py, &err),
                    "failed to extend python search path"
                );
            }
            resolve_entry_point(py, config)
        });

        match &state {
            RuntimeState::Loaded { module, .. } => {
                tracing::info!(%module, entry_point = %config.entry_point, "python runtime loaded");
            }
            RuntimeState::Failed { reason } => {
                tracing::error!("Failed to initialize python runtime: {reason}");
            }
        }

        Self { state }
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self.state, RuntimeState::Loaded { .. })
    }

    /// Why initialization failed, if it did.
    pub fn failure(&self) -> Option<&str> {
        match &self.state {
            RuntimeState::Failed { reason } => Some(reason),
            RuntimeState::Loaded { .. } => None,
        }
    }

    pub fn module(&self) -> Option<&str> {
        match &self.state {
            RuntimeState::Loaded { module, .. } => Some(module),
            RuntimeState::Failed { .. } => None,
        }
    }

    pub(crate) fn entry_point(&self) -> BridgeResult<&ForeignHandle> {
        match &self.state {
            RuntimeState::Loaded { entry_point, .. } => Ok(entry_point),
            RuntimeState::Failed { .. } => Err(BridgeError::NotLoaded),
        }
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("module", &self.module())
            .field("failure", &self.failure())
            .finish()
    }
}

fn resolve_entry_point(py: Python<'_>, config: &RuntimeConfig) -> RuntimeState {
    let module = match py.import(config.module.as_str()) {
        Ok(module) => module,
        Err(err) => {
            return RuntimeState::Failed {
                reason: exception::describe(py, &err),
            }
        }
    };

    let entry_point = match module.getattr(config.entry_point.as_str()) {
        Ok(entry_point) => entry_point,
        Err(err) => {
            return RuntimeState::Failed {
                reason: exception::describe(py, &err),
            }
        }
    };

    if !entry_point.is_callable() {
        return RuntimeState::Failed {
            reason: format!("{}.{} is not callable", config.module, config.entry_point),
        };
    }

    RuntimeState::Loaded {
        module: config.module.clone(),
        entry_point: ForeignHandle::adopt(entry_point.unbind()),
    }
}

/// Interpreter version and search locations, logged for support requests.
/// Failures here are not fatal.
fn log_diagnostics(py: Python<'_>) {
    let sys = py.import("sys").and_then(|sys| {
        let version: String = sys.getattr("version")?.extract()?;
        let path: Vec<String> = sys.getattr("path")?.extract()?;
        Ok((version, path))
    });
    match sys {
        Ok((version, path)) => tracing::info!(%version, ?path, "python interpreter"),
        Err(err) => tracing::debug!(trace = %exception::describe(py, &err), "sys introspection failed"),
    }

    let site = py
        .import("site")
        .and_then(|site| site.call_method0("getsitepackages")?.extract::<Vec<String>>());
    match site {
        Ok(packages) => tracing::info!(?packages, "python site packages"),
        Err(err) => tracing::debug!(trace = %exception::describe(py, &err), "site introspection failed"),
    }
}

fn extend_search_path(py: Python<'_>, search_paths: &[PathBuf]) -> PyResult<()> {
    if search_paths.is_empty() {
        return Ok(());
    }
    let path = py.import("sys")?.getattr("path")?;
    for entry in search_paths {
        let entry = entry.to_string_lossy();
        if !path.contains(entry.as_ref())? {
            path.call_method1("append", (entry.as_ref(),))?;
        }
    }
    Ok(())
}
