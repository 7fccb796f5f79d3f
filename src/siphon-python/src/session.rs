use std::fmt;

use pyo3::prelude::*;
use pyo3::types::{PyTuple, PyTupleMethods};

use crate::{BridgeError, BridgeResult, ForeignHandle, Runtime, StreamCatalog, StreamInfo};

/// A typed value for [`Session::set_option`].
#[derive(Debug, Clone, PartialEq)]
pub enum OptionValue {
    String(String),
    Double(f64),
    Int(i64),
    Bool(bool),
}

impl fmt::Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionValue::String(value) => write!(f, "{value:?}"),
            OptionValue::Double(value) => write!(f, "{value}"),
            OptionValue::Int(value) => write!(f, "{value}"),
            OptionValue::Bool(value) => write!(f, "{value}"),
        }
    }
}

/// One Streamlink client object plus its cached `set_option` method.
pub struct Session {
    client: ForeignHandle,
    set_option: ForeignHandle,
}

impl Session {
    /// Build a client by calling the runtime's entry point with no arguments.
    pub fn new(py: Python<'_>, runtime: &Runtime) -> BridgeResult<Self> {
        let entry_point = runtime.entry_point()?;
        let client = entry_point
            .bind(py)?
            .call0()
            .map_err(|err| BridgeError::call_failure(py, "session constructor", &err))?;
        if client.is_none() {
            return Err(BridgeError::CallFailure {
                call: "session constructor".into(),
                trace: "constructor returned None".into(),
            });
        }

        let client = ForeignHandle::adopt(client.unbind());
        let set_option = client.callable_attribute(py, "set_option")?;
        Ok(Self {
            client,
            set_option: ForeignHandle::adopt(set_option.unbind()),
        })
    }

    /// The wrapped client object.
    pub fn client(&self) -> &ForeignHandle {
        &self.client
    }

    /// Resolve `url` into its candidate streams.
    ///
    /// Entries of the returned mapping that are not `(name, stream)` pairs
    /// with a string name, or whose stream has no callable `open`, are
    /// dropped.
    pub fn streams(&self, py: Python<'_>, url: &str) -> BridgeResult<StreamCatalog> {
        let args =
            PyTuple::new(py, [url]).map_err(|err| BridgeError::call_failure(py, "streams", &err))?;
        let result = self.client.call_attribute(py, "streams", args)?;

        let items = result
            .call_method0("items")
            .and_then(|items| items.try_iter())
            .map_err(|err| BridgeError::call_failure(py, "streams().items", &err))?;

        let mut catalog = StreamCatalog::default();
        for item in items {
            let item = item.map_err(|err| BridgeError::call_failure(py, "streams().items", &err))?;
            let Ok(pair) = item.downcast::<PyTuple>() else {
                continue;
            };
            if pair.len() != 2 {
                continue;
            }
            let (Ok(key), Ok(value)) = (pair.get_borrowed_item(0), pair.get_borrowed_item(1))
            else {
                continue;
            };
            let Ok(name) = key.extract::<String>() else {
                tracing::debug!("skipping stream with non-string name");
                continue;
            };
            let info = ForeignHandle::from_borrowed(&value);
            if info.callable_attribute(py, "open").is_err() {
                tracing::debug!(name, "skipping stream without an open method");
                continue;
            }
            catalog.insert(StreamInfo::new(name, info));
        }

        tracing::debug!(url, definitions = ?catalog.names().collect::<Vec<_>>(), "resolved streams");
        Ok(catalog)
    }

    pub fn set_option(&self, py: Python<'_>, name: &str, value: &OptionValue) -> BridgeResult<()> {
        match value {
            OptionValue::String(value) => self.set_option_string(py, name, value),
            OptionValue::Double(value) => self.set_option_double(py, name, *value),
            OptionValue::Int(value) => self.set_option_int(py, name, *value),
            OptionValue::Bool(value) => self.set_option_bool(py, name, *value),
        }
    }

    pub fn set_option_string(&self, py: Python<'_>, name: &str, value: &str) -> BridgeResult<()> {
        self.call_setter(py, name, (name, value).into_pyobject(py))
    }

    pub fn set_option_double(&self, py: Python<'_>, name: &str, value: f64) -> BridgeResult<()> {
        self.call_setter(py, name, (name, value).into_pyobject(py))
    }

    pub fn set_option_int(&self, py: Python<'_>, name: &str, value: i64) -> BridgeResult<()> {
        self.call_setter(py, name, (name, value).into_pyobject(py))
    }

    pub fn set_option_bool(&self, py: Python<'_>, name: &str, value: bool) -> BridgeResult<()> {
        self.call_setter(py, name, (name, value).into_pyobject(py))
    }

    fn call_setter<'py>(
        &self,
        py: Python<'py>,
        name: &str,
        args: PyResult<Bound<'py, PyTuple>>,
    ) -> BridgeResult<()> {
        let call = format!("set_option({name})");
        let args = args.map_err(|err| BridgeError::call_failure(py, &call, &err))?;
        self.set_option
            .bind(py)?
            .call1(args)
            .map_err(|err| BridgeError::call_failure(py, &call, &err))?;
        Ok(())
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("client", &self.client)
            .finish_non_exhaustive()
    }
}
