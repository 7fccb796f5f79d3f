use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use siphon_core::{RelayConfig, SourceSettings};
use siphon_python::{BridgeResult, GilGuard, Runtime, Session, Stream};
use siphon_relay::{PipePath, Relay, RelayOptions};

use crate::options::configure_session;
use crate::pipeline::{
    AudioFrame, FrameSink, MediaPipeline, PipelineHandle, PipelineOptions, VideoFrame,
};
use crate::SourceError;

const PIPE_READY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourceState {
    #[default]
    Inactive,
    Playing,
}

/// Forwards frames to the host and remembers when the pipeline stopped, so
/// the next [`StreamSource::tick`] can tear playback down.
struct StopAwareSink {
    output: Arc<dyn FrameSink>,
    media_stopped: AtomicBool,
}

impl FrameSink for StopAwareSink {
    fn video_frame(&self, frame: Option<&VideoFrame>) {
        self.output.video_frame(frame);
    }

    fn preload_frame(&self, frame: &VideoFrame) {
        self.output.preload_frame(frame);
    }

    fn seek_frame(&self, frame: &VideoFrame) {
        self.output.seek_frame(frame);
    }

    fn audio_frame(&self, frame: &AudioFrame) {
        self.output.audio_frame(frame);
    }

    fn stopped(&self) {
        self.output.video_frame(None);
        self.media_stopped.store(true, Ordering::SeqCst);
    }
}

struct Playback {
    media: Box<dyn PipelineHandle>,
    relay: Relay,
    stream: Arc<Stream>,
    /// The session that opened `stream`, once the source has moved on to a
    /// newer one. Released only after the stream is closed.
    retired_session: Option<Session>,
}

/// One live stream shown through a media pipeline.
///
/// Mirrors the host's source callbacks: settings updates, show and hide,
/// a periodic tick, and destruction on drop.
pub struct StreamSource {
    name: String,
    runtime: &'static Runtime,
    settings: SourceSettings,
    relay_config: RelayConfig,
    pipeline: Box<dyn MediaPipeline>,
    sink: Arc<StopAwareSink>,
    session: Option<Session>,
    definitions: Vec<String>,
    playback: Option<Playback>,
    shown: bool,
}

impl std::fmt::Debug for StreamSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSource")
            .field("name", &self.name)
            .field("url", &self.settings.url)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl StreamSource {
    pub fn new(
        name: impl Into<String>,
        runtime: &'static Runtime,
        settings: SourceSettings,
        relay_config: RelayConfig,
        pipeline: Box<dyn MediaPipeline>,
        output: Arc<dyn FrameSink>,
    ) -> Self {
        let mut source = Self {
            name: name.into(),
            runtime,
            settings: SourceSettings::default(),
            relay_config,
            pipeline,
            sink: Arc::new(StopAwareSink {
                output,
                media_stopped: AtomicBool::new(false),
            }),
            session: None,
            definitions: Vec::new(),
            playback: None,
            shown: false,
        };
        source.update(settings);
        source
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn settings(&self) -> &SourceSettings {
        &self.settings
    }

    /// The current session, if the last update could build one.
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn state(&self) -> SourceState {
        if self.playback.is_some() {
            SourceState::Playing
        } else {
            SourceState::Inactive
        }
    }

    pub fn is_active(&self) -> bool {
        self.playback.is_some()
    }

    /// Apply new settings: drop any running playback, rebuild the session
    /// and start again if the source is shown.
    pub fn update(&mut self, settings: SourceSettings) {
        self.teardown();
        self.session = None;
        self.session = self.build_session(&settings);
        self.settings = settings;
        if self.shown {
            self.start_logged();
        }
    }

    /// Re-resolve the URL and replace the list of definitions.
    ///
    /// Returns `false` when resolution failed; the list is then empty.
    pub fn refresh_definitions(&mut self) -> bool {
        let fresh = self.build_session(&self.settings);
        let previous = std::mem::replace(&mut self.session, fresh);
        self.retire_session(previous);
        self.definitions.clear();

        let Some(session) = &self.session else {
            return false;
        };
        let url = self.settings.url.as_str();
        let gil = GilGuard::acquire();
        match gil.run(|py| session.streams(py, url)) {
            Ok(catalog) => {
                self.definitions = catalog.names().map(str::to_string).collect();
                true
            }
            Err(err) => {
                tracing::warn!("Error fetching stream definitions for URL \"{url}\": \n{err}");
                false
            }
        }
    }

    /// Definitions found by the last [`StreamSource::refresh_definitions`].
    pub fn definitions(&self) -> &[String] {
        &self.definitions
    }

    /// Choose the preferred definition for the next playback.
    pub fn set_definition(&mut self, definition: impl Into<String>) {
        self.settings.definition = definition.into();
    }

    pub fn show(&mut self) -> Result<SourceState, SourceError> {
        self.shown = true;
        self.start()
    }

    /// Open playback if needed and tell the pipeline to play.
    pub fn start(&mut self) -> Result<SourceState, SourceError> {
        if self.playback.is_none() {
            self.open()?;
        }
        if let Some(playback) = &mut self.playback {
            playback.media.play();
        }
        Ok(self.state())
    }

    pub fn hide(&mut self) {
        self.shown = false;
        self.teardown();
    }

    pub fn stop(&mut self) {
        self.hide();
    }

    pub fn restart(&mut self) -> Result<SourceState, SourceError> {
        self.hide();
        self.show()
    }

    /// Release playback once the pipeline has reported that it stopped.
    pub fn tick(&mut self) {
        if self.sink.media_stopped.swap(false, Ordering::SeqCst) && self.playback.is_some() {
            tracing::info!(source = %self.name, "media stopped, releasing stream");
            self.teardown();
        }
    }

    /// Release a replaced session, unless a running playback still reads
    /// a stream it opened.
    fn retire_session(&mut self, session: Option<Session>) {
        if let Some(playback) = &mut self.playback {
            if playback.retired_session.is_none() {
                playback.retired_session = session;
            }
        }
    }

    fn build_session(&self, settings: &SourceSettings) -> Option<Session> {
        match configure_session(self.runtime, settings) {
            Ok(session) => Some(session),
            Err(err) => {
                tracing::warn!("Error initializing streamlink session: {err}");
                None
            }
        }
    }

    fn start_logged(&mut self) {
        if let Err(err) = self.start() {
            tracing::warn!(source = %self.name, "failed to start playback: {err}");
        }
    }

    fn open(&mut self) -> Result<(), SourceError> {
        if self.settings.url.is_empty() {
            return Ok(());
        }
        let Some(session) = &self.session else {
            tracing::warn!(source = %self.name, "no streamlink session, not opening");
            return Ok(());
        };

        let url = self.settings.url.as_str();
        let preferred = self.settings.definition.as_str();
        let gil = GilGuard::acquire();
        let opened = gil.run(|py| -> BridgeResult<Option<Stream>> {
            let catalog = session.streams(py, url)?;
            match catalog.select(preferred) {
                Some(info) => info.open(py).map(Some),
                None => Ok(None),
            }
        });
        drop(gil);

        let stream = match opened {
            Ok(Some(stream)) => Arc::new(stream),
            Ok(None) => {
                tracing::warn!("No streams found for live url {url}");
                return Ok(());
            }
            Err(err) => {
                tracing::warn!("Failed to open streamlink stream for URL \"{url}\"! \n{err}");
                return Err(err.into());
            }
        };
        tracing::info!(source = %self.name, definition = stream.definition(), "stream opened");

        let path = PipePath::unique(self.relay_config.pipe_prefix.as_deref(), &self.name);
        let relay = match Relay::spawn(
            path.clone(),
            stream.clone(),
            RelayOptions::from(&self.relay_config),
        ) {
            Ok(relay) => relay,
            Err(err) => {
                close_stream(&stream);
                return Err(err.into());
            }
        };
        if !relay.wait_until_listening(PIPE_READY_TIMEOUT) {
            let report = relay.stop();
            close_stream(&stream);
            return Err(match report.outcome {
                Err(err) => err.into(),
                Ok(_) => SourceError::PipeTimeout {
                    path: path.to_string(),
                },
            });
        }

        self.sink.media_stopped.store(false, Ordering::SeqCst);
        let options = PipelineOptions {
            input: path.as_path().to_path_buf(),
            hw_decode: self.settings.hw_decode,
            buffering_mb: 0,
            speed_percent: 100,
        };
        let media = match self.pipeline.open(options, self.sink.clone()) {
            Ok(media) => media,
            Err(err) => {
                relay.stop();
                close_stream(&stream);
                return Err(err.into());
            }
        };

        self.playback = Some(Playback {
            media,
            relay,
            stream,
            retired_session: None,
        });
        Ok(())
    }

    /// Stop the pipeline, then the relay, then close the stream and release
    /// any session it outlived.
    fn teardown(&mut self) {
        let Some(mut playback) = self.playback.take() else {
            return;
        };
        playback.media.stop();
        self.sink.output.video_frame(None);

        let report = playback.relay.stop();
        match report.outcome {
            Ok(exit) => tracing::debug!(?exit, bytes = report.bytes_written, "relay stopped"),
            Err(err) => tracing::warn!(bytes = report.bytes_written, "relay ended with error: {err}"),
        }
        close_stream(&playback.stream);
        drop(playback.stream);
        drop(playback.retired_session);
    }
}

impl Drop for StreamSource {
    fn drop(&mut self) {
        self.teardown();
        self.session = None;
    }
}

fn close_stream(stream: &Stream) {
    let gil = GilGuard::acquire();
    if let Err(err) = gil.run(|py| stream.close(py)) {
        tracing::warn!("failed to close stream: {err}");
    }
}
