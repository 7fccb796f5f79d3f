use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use siphon_core::RelayConfig;
use siphon_python::{BridgeError, GilGuard, Stream};
use thiserror::Error;

use crate::pipe::{self, PipePath};

/// Anything the relay can pull byte chunks from.
///
/// An empty chunk means the source is exhausted.
pub trait ChunkSource: Send + Sync {
    fn read_chunk(&self, max_bytes: usize) -> Result<Vec<u8>, BridgeError>;
}

impl ChunkSource for Stream {
    /// Holds the interpreter lock only for the read itself.
    fn read_chunk(&self, max_bytes: usize) -> Result<Vec<u8>, BridgeError> {
        let gil = GilGuard::acquire();
        gil.run(|py| self.read(py, max_bytes))
    }
}

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("failed to create pipe {path}: {source}")]
    CreatePipe { path: PathBuf, source: io::Error },
    #[error("failed to open pipe {path}: {source}")]
    OpenPipe { path: PathBuf, source: io::Error },
    #[error("stream read failed: {0}")]
    Read(#[source] BridgeError),
    #[error("pipe write failed: {0}")]
    Write(#[source] io::Error),
    #[error("failed to spawn relay thread: {0}")]
    Spawn(#[source] io::Error),
    #[error("relay thread panicked")]
    Panicked,
}

/// Where the worker thread is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Created,
    PipeOpening,
    Relaying,
    Draining,
    Closed,
}

/// Why the worker stopped without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayExit {
    /// The source returned an empty chunk.
    EndOfStream,
    /// The reading side closed the pipe.
    ReaderDisconnected,
    /// [`Relay::stop`] was called.
    Cancelled,
}

#[derive(Debug)]
pub struct RelayReport {
    pub outcome: Result<RelayExit, RelayError>,
    pub bytes_written: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct RelayOptions {
    /// Maximum bytes requested from the source per read.
    pub chunk_size: usize,
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self::from(&RelayConfig::default())
    }
}

impl From<&RelayConfig> for RelayOptions {
    fn from(config: &RelayConfig) -> Self {
        Self {
            chunk_size: config.chunk_size,
        }
    }
}

struct Shared {
    state: Mutex<RelayState>,
    cancel: AtomicBool,
    listening: AtomicBool,
    bytes_written: AtomicU64,
}

impl Shared {
    fn set_state(&self, state: RelayState) {
        *self.state.lock().unwrap() = state;
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }
}

/// A worker thread copying one source into one named pipe.
pub struct Relay {
    path: PipePath,
    shared: Arc<Shared>,
    join: Option<JoinHandle<Result<RelayExit, RelayError>>>,
}

impl std::fmt::Debug for Relay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Relay")
            .field("path", &self.path)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Relay {
    /// Start relaying `source` into a pipe created at `path`.
    ///
    /// The worker blocks in pipe creation until a reader connects, so this
    /// returns before any data flows.
    pub fn spawn(
        path: PipePath,
        source: Arc<dyn ChunkSource>,
        options: RelayOptions,
    ) -> Result<Self, RelayError> {
        let shared = Arc::new(Shared {
            state: Mutex::new(RelayState::Created),
            cancel: AtomicBool::new(false),
            listening: AtomicBool::new(false),
            bytes_written: AtomicU64::new(0),
        });

        let worker_shared = shared.clone();
        let worker_path = path.clone();
        let join = thread::Builder::new()
            .name("siphon-relay".into())
            .spawn(move || {
                let outcome = run(&worker_path, source.as_ref(), options, &worker_shared);
                worker_shared.set_state(RelayState::Closed);
                if let Err(err) = pipe::remove(worker_path.as_path()) {
                    tracing::warn!(path = %worker_path, error = %err, "failed to remove pipe");
                }
                let bytes = worker_shared.bytes_written.load(Ordering::SeqCst);
                match &outcome {
                    Ok(exit) => tracing::info!(path = %worker_path, ?exit, bytes, "relay finished"),
                    Err(err) => tracing::error!(path = %worker_path, bytes, "relay failed: {err}"),
                }
                outcome
            })
            .map_err(RelayError::Spawn)?;

        Ok(Self {
            path,
            shared,
            join: Some(join),
        })
    }

    pub fn path(&self) -> &PipePath {
        &self.path
    }

    pub fn state(&self) -> RelayState {
        *self.shared.state.lock().unwrap()
    }

    pub fn bytes_written(&self) -> u64 {
        self.shared.bytes_written.load(Ordering::SeqCst)
    }

    /// Whether the worker thread has exited.
    pub fn is_finished(&self) -> bool {
        self.join.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Wait until the pipe exists and a reader may open it.
    ///
    /// Returns `false` if the worker exited first or `timeout` elapsed.
    pub fn wait_until_listening(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.shared.listening.load(Ordering::SeqCst) {
                return true;
            }
            if self.is_finished() || Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(2));
        }
    }

    /// Signal cancellation, wait for the worker and report how it ended.
    ///
    /// Must not be called while holding a [`GilGuard`]: the worker may need
    /// the lock to finish its current read.
    pub fn stop(mut self) -> RelayReport {
        self.shutdown()
    }

    fn shutdown(&mut self) -> RelayReport {
        self.shared.cancel.store(true, Ordering::SeqCst);
        let outcome = match self.join.take() {
            Some(join) => {
                while !join.is_finished() {
                    if matches!(self.state(), RelayState::Created | RelayState::PipeOpening) {
                        // Fails harmlessly when the pipe is not there yet.
                        let _ = pipe::unblock(self.path.as_path());
                    }
                    thread::sleep(Duration::from_millis(5));
                }
                join.join().unwrap_or(Err(RelayError::Panicked))
            }
            None => Ok(RelayExit::Cancelled),
        };
        RelayReport {
            outcome,
            bytes_written: self.bytes_written(),
        }
    }
}

impl Drop for Relay {
    fn drop(&mut self) {
        if self.join.is_some() {
            let _ = self.shutdown();
        }
    }
}

fn run(
    path: &PipePath,
    source: &dyn ChunkSource,
    options: RelayOptions,
    shared: &Shared,
) -> Result<RelayExit, RelayError> {
    shared.set_state(RelayState::PipeOpening);
    let pending = pipe::create(path.as_path()).map_err(|source| RelayError::CreatePipe {
        path: path.as_path().to_path_buf(),
        source,
    })?;
    shared.listening.store(true, Ordering::SeqCst);
    if shared.cancelled() {
        return Ok(RelayExit::Cancelled);
    }

    tracing::debug!(%path, "waiting for pipe reader");
    let mut writer = pending.connect().map_err(|source| RelayError::OpenPipe {
        path: path.as_path().to_path_buf(),
        source,
    })?;
    if shared.cancelled() {
        return Ok(RelayExit::Cancelled);
    }

    shared.set_state(RelayState::Relaying);
    tracing::info!(%path, chunk_size = options.chunk_size, "relaying stream");
    loop {
        if shared.cancelled() {
            return Ok(RelayExit::Cancelled);
        }

        let chunk = source
            .read_chunk(options.chunk_size)
            .map_err(RelayError::Read)?;
        if chunk.is_empty() {
            shared.set_state(RelayState::Draining);
            return drain(writer);
        }

        match writer.write_all(&chunk) {
            Ok(()) => {
                shared
                    .bytes_written
                    .fetch_add(chunk.len() as u64, Ordering::SeqCst);
            }
            Err(err) if err.kind() == io::ErrorKind::BrokenPipe => {
                return Ok(RelayExit::ReaderDisconnected);
            }
            Err(err) => return Err(RelayError::Write(err)),
        }
    }
}

fn drain(mut writer: File) -> Result<RelayExit, RelayError> {
    match writer.flush() {
        Ok(()) => Ok(RelayExit::EndOfStream),
        Err(err) if err.kind() == io::ErrorKind::BrokenPipe => Ok(RelayExit::ReaderDisconnected),
        Err(err) => Err(RelayError::Write(err)),
    }
}
