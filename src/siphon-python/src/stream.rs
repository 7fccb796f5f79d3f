use std::sync::atomic::{AtomicBool, Ordering};

use pyo3::prelude::*;
use pyo3::types::{PyByteArray, PyBytes, PyTuple};

use crate::{BridgeError, BridgeResult, ForeignHandle};

/// Definition tried when the requested one is not offered.
pub const DEFAULT_DEFINITION: &str = "best";

/// A named, not yet opened stream candidate.
#[derive(Debug)]
pub struct StreamInfo {
    name: String,
    handle: ForeignHandle,
}

impl StreamInfo {
    pub fn new(name: impl Into<String>, handle: ForeignHandle) -> Self {
        Self {
            name: name.into(),
            handle,
        }
    }

    /// Definition name, e.g. `best` or `720p`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Call the candidate's `open()` and wrap the readable stream it returns.
    pub fn open(&self, py: Python<'_>) -> BridgeResult<Stream> {
        let opened = self
            .handle
            .call_attribute(py, "open", PyTuple::empty(py))?;
        tracing::debug!(definition = %self.name, "stream opened");
        Ok(Stream::new(self.name.clone(), ForeignHandle::adopt(opened.unbind())))
    }
}

/// Candidates returned by one resolution, in the order the library gave them.
///
/// Names are unique; inserting a name twice replaces the earlier entry in
/// place.
#[derive(Debug, Default)]
pub struct StreamCatalog {
    entries: Vec<StreamInfo>,
}

impl StreamCatalog {
    pub fn insert(&mut self, info: StreamInfo) {
        match self.entries.iter_mut().find(|entry| entry.name == info.name) {
            Some(existing) => *existing = info,
            None => self.entries.push(info),
        }
    }

    pub fn get(&self, name: &str) -> Option<&StreamInfo> {
        self.entries.iter().find(|entry| entry.name == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|entry| entry.name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &StreamInfo> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Pick `preferred`, else [`DEFAULT_DEFINITION`], else the first entry.
    pub fn select(&self, preferred: &str) -> Option<&StreamInfo> {
        self.get(preferred)
            .or_else(|| self.get(DEFAULT_DEFINITION))
            .or_else(|| self.entries.first())
    }
}

/// An opened, readable stream.
///
/// Shared between the thread that opened it and the relay thread, so every
/// operation takes `&self`.
#[derive(Debug)]
pub struct Stream {
    definition: String,
    handle: ForeignHandle,
    closed: AtomicBool,
}

impl Stream {
    pub(crate) fn new(definition: String, handle: ForeignHandle) -> Self {
        Self {
            definition,
            handle,
            closed: AtomicBool::new(false),
        }
    }

    /// Definition this stream was opened from.
    pub fn definition(&self) -> &str {
        &self.definition
    }

    /// Read at most `max_bytes`. An empty result means end of stream.
    pub fn read(&self, py: Python<'_>, max_bytes: usize) -> BridgeResult<Vec<u8>> {
        let args = (max_bytes,)
            .into_pyobject(py)
            .map_err(|err| BridgeError::call_failure(py, "read", &err))?;
        let chunk = self.handle.call_attribute(py, "read", args)?;
        bytes_of(py, &chunk)
    }

    /// Call the stream's `close()`. Later calls do nothing.
    pub fn close(&self, py: Python<'_>) -> BridgeResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.handle.call_attribute(py, "close", PyTuple::empty(py))?;
        self.closed.store(true, Ordering::SeqCst);
        tracing::debug!(definition = %self.definition, "stream closed");
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

fn bytes_of(py: Python<'_>, chunk: &Bound<'_, PyAny>) -> BridgeResult<Vec<u8>> {
    if let Ok(bytes) = chunk.downcast::<PyBytes>() {
        return Ok(bytes.as_bytes().to_vec());
    }
    if let Ok(array) = chunk.downcast::<PyByteArray>() {
        return Ok(array.to_vec());
    }
    // memoryview and other buffer objects
    let converted = py
        .get_type::<PyBytes>()
        .call1((chunk,))
        .map_err(|err| BridgeError::call_failure(py, "read", &err))?;
    let bytes = converted
        .downcast::<PyBytes>()
        .map_err(|_| BridgeError::CallFailure {
            call: "read".into(),
            trace: "read() did not return bytes".into(),
        })?;
    Ok(bytes.as_bytes().to_vec())
}
