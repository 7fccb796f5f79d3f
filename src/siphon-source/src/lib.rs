//! A live-stream media source: resolves a URL through Streamlink, relays the
//! chosen stream into a named pipe and feeds that pipe to a media pipeline.

mod error;
pub mod options;
pub mod pipeline;
mod source;

pub use error::SourceError;
pub use options::{apply_custom_options, configure_session};
pub use pipeline::{
    AudioFrame, FrameSink, MediaPipeline, NullSink, PipelineError, PipelineHandle,
    PipelineOptions, VideoFrame,
};
pub use source::{SourceState, StreamSource};
