//! A media pipeline that copies the relayed bytes verbatim to a file or
//! stdout instead of decoding them.

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use siphon_source::{FrameSink, MediaPipeline, PipelineError, PipelineHandle, PipelineOptions};

const COPY_BUFFER: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DumpTarget {
    Stdout,
    File(PathBuf),
}

impl DumpTarget {
    pub fn from_arg(output: Option<PathBuf>) -> Self {
        match output {
            Some(path) if path.as_os_str() != "-" => DumpTarget::File(path),
            _ => DumpTarget::Stdout,
        }
    }

    fn open(&self) -> io::Result<Box<dyn Write + Send>> {
        Ok(match self {
            DumpTarget::Stdout => Box::new(io::stdout()),
            DumpTarget::File(path) => Box::new(File::create(path)?),
        })
    }
}

#[derive(Debug)]
pub struct DumpPipeline {
    target: DumpTarget,
    copied: Arc<AtomicU64>,
}

impl DumpPipeline {
    pub fn new(target: DumpTarget) -> Self {
        Self {
            target,
            copied: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Shared counter of bytes copied across every playback.
    pub fn copied(&self) -> Arc<AtomicU64> {
        self.copied.clone()
    }
}

struct DumpHandle {
    halted: Arc<AtomicBool>,
}

impl PipelineHandle for DumpHandle {
    fn play(&mut self) {
        tracing::debug!("dump pipeline playing");
    }

    /// Ends the copy after the read in progress returns. A read blocked on
    /// an idle pipe only returns once the writer closes it, so the relay
    /// must be stopped as well.
    fn stop(&mut self) {
        self.halted.store(true, Ordering::SeqCst);
    }
}

impl MediaPipeline for DumpPipeline {
    fn open(
        &self,
        options: PipelineOptions,
        sink: Arc<dyn FrameSink>,
    ) -> Result<Box<dyn PipelineHandle>, PipelineError> {
        let mut output = self.target.open().map_err(|err| PipelineError {
            input: options.input.clone(),
            reason: format!("cannot open output {:?}: {err}", self.target),
        })?;

        let halted = Arc::new(AtomicBool::new(false));
        let worker_halted = halted.clone();
        let copied = self.copied.clone();
        let input = options.input.clone();
        thread::Builder::new()
            .name("siphon-dump".into())
            .spawn(move || {
                match copy_pipe(&input, output.as_mut(), &copied, &worker_halted) {
                    Ok(()) => tracing::info!(bytes = copied.load(Ordering::SeqCst), "dump finished"),
                    Err(err) => tracing::warn!("dump stopped: {err}"),
                }
                if !worker_halted.load(Ordering::SeqCst) {
                    sink.stopped();
                }
            })
            .map_err(|err| PipelineError {
                input: options.input,
                reason: format!("cannot spawn dump thread: {err}"),
            })?;

        Ok(Box::new(DumpHandle { halted }))
    }
}

fn copy_pipe(
    input: &Path,
    output: &mut dyn Write,
    copied: &AtomicU64,
    halted: &AtomicBool,
) -> io::Result<()> {
    let mut pipe = File::open(input)?;
    let mut buf = vec![0u8; COPY_BUFFER];
    while !halted.load(Ordering::SeqCst) {
        let read = match pipe.read(&mut buf) {
            Ok(0) => break,
            Ok(read) => read,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        };
        output.write_all(&buf[..read])?;
        copied.fetch_add(read as u64, Ordering::SeqCst);
    }
    output.flush()
}
