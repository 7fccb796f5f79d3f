//! A fake Streamlink-shaped module for tests.
//!
//! The module lives only in `sys.modules`; nothing touches the network. URLs
//! are registered with their definitions before a session resolves them.

use std::sync::{Once, OnceLock};

use pyo3::prelude::*;
use pyo3::types::PyModule;
use siphon_core::RuntimeConfig;

use crate::{GilGuard, Runtime, Session};

pub const FAKE_MODULE: &str = "siphon_fakelink";

const FAKE_SOURCE: &std::ffi::CStr = c"
import time

STREAMS = {}
FAILURES = {}
OPENS = {}
CLOSES = {}
EVENTS = []


class FakeStream:
    def __init__(self, tag, chunks, endless):
        self._tag = tag
        self._template = list(chunks)
        self._chunks = list(chunks)
        self._endless = endless
        self.closed = False

    def read(self, size):
        if self.closed:
            raise ValueError('read of closed stream')
        if not self._chunks and self._endless:
            time.sleep(0.002)
            self._chunks = list(self._template)
        if not self._chunks:
            return b''
        chunk = self._chunks.pop(0)
        if len(chunk) > size:
            self._chunks.insert(0, chunk[size:])
            chunk = chunk[:size]
        return chunk

    def close(self):
        self.closed = True
        CLOSES[self._tag] = CLOSES.get(self._tag, 0) + 1
        EVENTS.append((self._tag.rpartition('#')[0], 'stream-closed'))


class FakeStreamInfo:
    def __init__(self, tag, chunks, endless=False):
        self._tag = tag
        self._chunks = [bytes(c) for c in chunks]
        self._endless = endless

    def open(self):
        OPENS[self._tag] = OPENS.get(self._tag, 0) + 1
        return FakeStream(self._tag, self._chunks, self._endless)


class BrokenStreamInfo:
    def open(self):
        raise OSError('failed to open first segment')


class OddMapping:
    def __init__(self, items):
        self._items = items

    def items(self):
        return iter(self._items)


class NoPluginError(Exception):
    pass


class Streamlink:
    def __init__(self):
        self.options = {}
        self._resolved = []

    def __del__(self):
        for url in self._resolved:
            EVENTS.append((url, 'session-released'))

    def set_option(self, key, value):
        if key == 'reject-me':
            raise ValueError('unsupported option: ' + key)
        self.options[key] = value

    def streams(self, url):
        if url not in self._resolved:
            self._resolved.append(url)
        if url in FAILURES:
            raise NoPluginError(FAILURES[url])
        if url not in STREAMS:
            raise NoPluginError('No plugin can handle URL: ' + url)
        return STREAMS[url]


def register(url, definitions, endless):
    STREAMS[url] = {
        name: FakeStreamInfo(url + '#' + name, chunks, endless)
        for name, chunks in definitions
    }


def register_eval(url, source):
    STREAMS[url] = eval(source)


def fail(url, message):
    FAILURES[url] = message


def events_for(url):
    return [event for source, event in EVENTS if source == url]
";

static INSTALL: Once = Once::new();
static RUNTIME: OnceLock<Runtime> = OnceLock::new();

/// Load the fake module into `sys.modules`. Safe to call repeatedly.
pub fn install_fake_module() {
    INSTALL.call_once(|| {
        let gil = GilGuard::acquire();
        gil.run(|py| {
            PyModule::from_code(py, FAKE_SOURCE, c"siphon_fakelink.py", c"siphon_fakelink")
                .expect("fake module compiles");
        });
    });
}

/// Runtime settings that resolve the fake module's `Streamlink`.
pub fn runtime_config() -> RuntimeConfig {
    RuntimeConfig {
        module: FAKE_MODULE.into(),
        entry_point: "Streamlink".into(),
        ..RuntimeConfig::default()
    }
}

/// A loaded runtime backed by the fake module, shared by all tests.
pub fn runtime() -> &'static Runtime {
    RUNTIME.get_or_init(|| {
        install_fake_module();
        Runtime::initialize(&runtime_config())
    })
}

/// A runtime whose initialization failed.
pub fn failed_runtime() -> Runtime {
    Runtime::initialize(&RuntimeConfig {
        module: "siphon_missing_streamlink".into(),
        ..RuntimeConfig::default()
    })
}

fn with_module<R>(f: impl for<'py> FnOnce(Bound<'py, PyModule>) -> PyResult<R>) -> R {
    install_fake_module();
    let gil = GilGuard::acquire();
    gil.run(|py| {
        let module = py
            .import(FAKE_MODULE)
            .expect("fake module installed");
        f(module).expect("fake module call")
    })
}

/// Serve `definitions` for `url`, each as a finite list of chunks.
pub fn register_streams(url: &str, definitions: &[(&str, Vec<Vec<u8>>)]) {
    register(url, definitions, false);
}

/// Serve `definitions` for `url`; each stream repeats its chunks forever.
pub fn register_endless(url: &str, definitions: &[(&str, Vec<Vec<u8>>)]) {
    register(url, definitions, true);
}

fn register(url: &str, definitions: &[(&str, Vec<Vec<u8>>)], endless: bool) {
    let definitions: Vec<(String, Vec<Vec<u8>>)> = definitions
        .iter()
        .map(|(name, chunks)| (name.to_string(), chunks.clone()))
        .collect();
    with_module(|module| {
        module.call_method1("register", (url, definitions, endless))?;
        Ok(())
    });
}

/// Register the value of a Python expression evaluated in the fake module,
/// e.g. `OddMapping([...])` or `{'best': BrokenStreamInfo()}`.
pub fn register_expression(url: &str, source: &str) {
    with_module(|module| {
        module.call_method1("register_eval", (url, source))?;
        Ok(())
    });
}

/// Make `streams(url)` raise with `message`.
pub fn register_failure(url: &str, message: &str) {
    with_module(|module| {
        module.call_method1("fail", (url, message))?;
        Ok(())
    });
}

fn counter(table: &str, url: &str, definition: &str) -> usize {
    let tag = format!("{url}#{definition}");
    with_module(|module| {
        module
            .getattr(table)?
            .call_method1("get", (tag, 0))?
            .extract()
    })
}

/// How many times the fake stream for `url`/`definition` was opened.
pub fn open_count(url: &str, definition: &str) -> usize {
    counter("OPENS", url, definition)
}

/// How many times a fake stream for `url`/`definition` was closed.
pub fn close_count(url: &str, definition: &str) -> usize {
    counter("CLOSES", url, definition)
}

/// Stream closes and session releases seen for `url`, oldest first.
///
/// A session is reported as `session-released` once for each URL it
/// resolved; a stream as `stream-closed` each time it is closed.
pub fn lifecycle_events(url: &str) -> Vec<String> {
    with_module(|module| module.call_method1("events_for", (url,))?.extract())
}

/// `repr()` of an option the session's client received, if any.
pub fn option_repr(session: &Session, key: &str) -> Option<String> {
    let gil = GilGuard::acquire();
    gil.run(|py| {
        let client = session.client().bind(py).ok()?;
        let value = client
            .getattr("options")
            .ok()?
            .call_method1("get", (key,))
            .ok()?;
        if value.is_none() {
            return None;
        }
        value.repr().ok().map(|repr| repr.to_string())
    })
}
