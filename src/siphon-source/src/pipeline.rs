//! The media pipeline that decodes the relayed pipe, and the sink it feeds.

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

#[derive(Debug, Error)]
#[error("media pipeline failed to open {input}: {reason}")]
pub struct PipelineError {
    pub input: PathBuf,
    pub reason: String,
}

/// How to open the pipeline for one playback.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOptions {
    /// The relay's pipe path.
    pub input: PathBuf,
    pub hw_decode: bool,
    /// Demuxer buffering in MiB; 0 lets the pipeline choose.
    pub buffering_mb: u32,
    pub speed_percent: u32,
}

/// A decoded video frame.
#[derive(Debug, Clone, Default)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    pub timestamp_ns: u64,
    pub data: Vec<u8>,
}

/// A block of decoded audio.
#[derive(Debug, Clone, Default)]
pub struct AudioFrame {
    pub sample_rate: u32,
    pub channels: u16,
    pub timestamp_ns: u64,
    pub data: Vec<u8>,
}

/// Receives what the pipeline decodes. Called from pipeline threads.
pub trait FrameSink: Send + Sync {
    /// Output a frame; `None` blanks the output.
    fn video_frame(&self, frame: Option<&VideoFrame>);
    fn preload_frame(&self, frame: &VideoFrame);
    fn seek_frame(&self, frame: &VideoFrame);
    fn audio_frame(&self, frame: &AudioFrame);
    /// The pipeline reached the end of its input or failed.
    fn stopped(&self);
}

/// Opens pipelines. One open call per playback.
pub trait MediaPipeline: Send {
    fn open(
        &self,
        options: PipelineOptions,
        sink: Arc<dyn FrameSink>,
    ) -> Result<Box<dyn PipelineHandle>, PipelineError>;
}

/// A running pipeline.
pub trait PipelineHandle: Send {
    fn play(&mut self);
    fn stop(&mut self);
}

/// Drops every frame.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl FrameSink for NullSink {
    fn video_frame(&self, _frame: Option<&VideoFrame>) {}
    fn preload_frame(&self, _frame: &VideoFrame) {}
    fn seek_frame(&self, _frame: &VideoFrame) {}
    fn audio_frame(&self, _frame: &AudioFrame) {}
    fn stopped(&self) {}
}
