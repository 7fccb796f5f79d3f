#![cfg(unix)]

use std::fs::File;
use std::io::Read;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use siphon_core::{RelayConfig, SourceSettings};
use siphon_python::testing;
use siphon_source::{
    AudioFrame, FrameSink, MediaPipeline, PipelineError, PipelineHandle, PipelineOptions,
    SourceError, SourceState, StreamSource, VideoFrame,
};
use tempfile::TempDir;

/// Reads the pipe to the end on its own thread, like a demuxer would.
#[derive(Default)]
struct Recorder {
    opened: Mutex<Vec<PipelineOptions>>,
    received: Mutex<Vec<u8>>,
    plays: AtomicUsize,
    stops: AtomicUsize,
}

impl Recorder {
    fn received_len(&self) -> usize {
        self.received.lock().unwrap().len()
    }

    fn opened(&self) -> Vec<PipelineOptions> {
        self.opened.lock().unwrap().clone()
    }
}

struct RecordingPipeline {
    recorder: Arc<Recorder>,
    fail: bool,
}

struct RecordingHandle {
    recorder: Arc<Recorder>,
    halted: Arc<AtomicBool>,
}

impl PipelineHandle for RecordingHandle {
    fn play(&mut self) {
        self.recorder.plays.fetch_add(1, Ordering::SeqCst);
    }

    fn stop(&mut self) {
        self.halted.store(true, Ordering::SeqCst);
        self.recorder.stops.fetch_add(1, Ordering::SeqCst);
    }
}

impl MediaPipeline for RecordingPipeline {
    fn open(
        &self,
        options: PipelineOptions,
        sink: Arc<dyn FrameSink>,
    ) -> Result<Box<dyn PipelineHandle>, PipelineError> {
        if self.fail {
            return Err(PipelineError {
                input: options.input,
                reason: "decoder unavailable".into(),
            });
        }
        self.recorder.opened.lock().unwrap().push(options.clone());

        let recorder = self.recorder.clone();
        let halted = Arc::new(AtomicBool::new(false));
        let reader_halted = halted.clone();
        thread::spawn(move || {
            let Ok(mut file) = File::open(&options.input) else {
                return;
            };
            let mut buf = [0u8; 4096];
            loop {
                match file.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        recorder.received.lock().unwrap().extend_from_slice(&buf[..n]);
                        sink.video_frame(Some(&VideoFrame::default()));
                    }
                }
            }
            if !reader_halted.load(Ordering::SeqCst) {
                sink.stopped();
            }
        });

        Ok(Box::new(RecordingHandle {
            recorder: self.recorder.clone(),
            halted,
        }))
    }
}

#[derive(Default)]
struct CountingOutput {
    frames: AtomicUsize,
    blanks: AtomicUsize,
}

impl FrameSink for CountingOutput {
    fn video_frame(&self, frame: Option<&VideoFrame>) {
        match frame {
            Some(_) => self.frames.fetch_add(1, Ordering::SeqCst),
            None => self.blanks.fetch_add(1, Ordering::SeqCst),
        };
    }
    fn preload_frame(&self, _frame: &VideoFrame) {}
    fn seek_frame(&self, _frame: &VideoFrame) {}
    fn audio_frame(&self, _frame: &AudioFrame) {}
    fn stopped(&self) {}
}

struct Harness {
    source: StreamSource,
    recorder: Arc<Recorder>,
    output: Arc<CountingOutput>,
    _dir: TempDir,
}

fn harness(settings: SourceSettings) -> Harness {
    build(settings, false, testing::runtime())
}

fn build(settings: SourceSettings, fail: bool, runtime: &'static siphon_python::Runtime) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let relay = RelayConfig {
        chunk_size: 1024,
        pipe_prefix: Some(dir.path().join("pipe-").to_string_lossy().into_owned()),
    };
    let recorder = Arc::new(Recorder::default());
    let output = Arc::new(CountingOutput::default());
    let source = StreamSource::new(
        "Test Source",
        runtime,
        settings,
        relay,
        Box::new(RecordingPipeline {
            recorder: recorder.clone(),
            fail,
        }),
        output.clone(),
    );
    Harness {
        source,
        recorder,
        output,
        _dir: dir,
    }
}

fn settings_for(url: &str) -> SourceSettings {
    SourceSettings {
        url: url.into(),
        ..SourceSettings::default()
    }
}

fn wait_for(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out");
        thread::sleep(Duration::from_millis(5));
    }
}

fn chunk(text: &str) -> Vec<Vec<u8>> {
    vec![text.as_bytes().to_vec()]
}

#[test]
fn missing_definition_falls_back_to_best() {
    let url = "https://fake.test/source/fallback";
    testing::register_streams(url, &[("best", chunk("from best")), ("720p", chunk("from 720p"))]);
    let mut h = harness(SourceSettings {
        definition: "1080p".into(),
        ..settings_for(url)
    });

    assert_eq!(h.source.show().unwrap(), SourceState::Playing);
    assert_eq!(h.recorder.plays.load(Ordering::SeqCst), 1);
    wait_for(|| h.recorder.received_len() == "from best".len());
    assert_eq!(h.recorder.received.lock().unwrap().as_slice(), b"from best");

    // The finite stream ends, the pipeline reports it and the tick releases it.
    wait_for(|| {
        h.source.tick();
        h.source.state() == SourceState::Inactive
    });
    assert_eq!(testing::open_count(url, "best"), 1);
    assert_eq!(testing::open_count(url, "720p"), 0);
    assert_eq!(testing::close_count(url, "best"), 1);
    assert!(h.output.frames.load(Ordering::SeqCst) > 0);
}

#[test]
fn requested_definition_is_used_when_offered() {
    let url = "https://fake.test/source/exact";
    testing::register_streams(url, &[("best", chunk("a")), ("720p", chunk("b"))]);
    let mut h = harness(SourceSettings {
        definition: "720p".into(),
        ..settings_for(url)
    });

    h.source.show().unwrap();
    wait_for(|| h.recorder.received_len() == 1);
    assert_eq!(h.recorder.received.lock().unwrap().as_slice(), b"b");
}

#[test]
fn no_streams_leaves_source_inactive() {
    let url = "https://fake.test/source/offline";
    testing::register_streams(url, &[]);
    let mut h = harness(settings_for(url));

    assert_eq!(h.source.show().unwrap(), SourceState::Inactive);
    assert!(!h.source.is_active());
    assert!(h.recorder.opened().is_empty());
}

#[test]
fn empty_url_does_nothing() {
    let mut h = harness(SourceSettings::default());
    assert_eq!(h.source.show().unwrap(), SourceState::Inactive);
    assert!(h.recorder.opened().is_empty());
}

#[test]
fn resolution_error_is_returned() {
    let url = "https://fake.test/source/unsupported";
    testing::register_failure(url, "No plugin can handle URL");
    let mut h = harness(settings_for(url));

    let err = h.source.show().unwrap_err();
    assert!(matches!(err, SourceError::Bridge(_)));
    assert_eq!(h.source.state(), SourceState::Inactive);
}

#[test]
fn refresh_lists_definitions_in_order() {
    let url = "https://fake.test/source/refresh";
    testing::register_streams(
        url,
        &[("audio_only", chunk("")), ("480p", chunk("")), ("best", chunk(""))],
    );
    let mut h = harness(settings_for(url));

    assert!(h.source.refresh_definitions());
    assert_eq!(h.source.definitions(), ["audio_only", "480p", "best"]);

    h.source.update(settings_for("https://fake.test/source/refresh-missing"));
    assert!(!h.source.refresh_definitions());
    assert!(h.source.definitions().is_empty());
}

#[test]
fn custom_options_override_named_ones() {
    let mut h = harness(SourceSettings {
        custom_options: r#"{"hls-live-edge": 2, "custom-flag": true, "": 5}"#.into(),
        ..settings_for("https://fake.test/source/options")
    });
    let session = h.source.session().expect("session");

    assert_eq!(testing::option_repr(session, "hls-live-edge").as_deref(), Some("2"));
    assert_eq!(testing::option_repr(session, "custom-flag").as_deref(), Some("True"));
    assert_eq!(
        testing::option_repr(session, "ringbuffer-size").as_deref(),
        Some("16777216")
    );
    assert_eq!(testing::option_repr(session, "http-timeout").as_deref(), Some("5.0"));
    assert_eq!(testing::option_repr(session, "http-proxy"), None);

    h.source.update(SourceSettings {
        http_proxy: "http://proxy:3128".into(),
        ..settings_for("https://fake.test/source/options")
    });
    let session = h.source.session().expect("session");
    assert_eq!(testing::option_repr(session, "hls-live-edge").as_deref(), Some("8"));
    assert_eq!(
        testing::option_repr(session, "http-proxy").as_deref(),
        Some("'http://proxy:3128'")
    );
}

#[test]
fn malformed_custom_options_are_skipped() {
    let h = harness(SourceSettings {
        custom_options: "{oops".into(),
        ..settings_for("https://fake.test/source/bad-json")
    });
    let session = h.source.session().expect("session survives bad JSON");
    assert_eq!(testing::option_repr(session, "hls-live-edge").as_deref(), Some("8"));
}

#[test]
fn rejected_option_leaves_no_session() {
    let url = "https://fake.test/source/rejected";
    testing::register_streams(url, &[("best", chunk("x"))]);
    let mut h = harness(SourceSettings {
        custom_options: r#"{"reject-me": 1}"#.into(),
        ..settings_for(url)
    });

    assert!(h.source.session().is_none());
    assert_eq!(h.source.show().unwrap(), SourceState::Inactive);
    assert_eq!(testing::open_count(url, "best"), 0);
}

#[test]
fn unloaded_runtime_keeps_source_idle() {
    let runtime: &'static _ = Box::leak(Box::new(testing::failed_runtime()));
    let mut h = build(settings_for("https://fake.test/source/no-runtime"), false, runtime);

    assert!(h.source.session().is_none());
    assert!(!h.source.refresh_definitions());
    assert_eq!(h.source.show().unwrap(), SourceState::Inactive);
}

#[test]
fn hide_tears_down_playback() {
    let url = "https://fake.test/source/hide";
    testing::register_endless(url, &[("best", chunk("live"))]);
    let mut h = harness(settings_for(url));

    h.source.show().unwrap();
    wait_for(|| h.recorder.received_len() > 0);
    let input = h.recorder.opened()[0].input.clone();
    assert!(input.exists());

    h.source.hide();
    assert_eq!(h.source.state(), SourceState::Inactive);
    assert_eq!(h.recorder.stops.load(Ordering::SeqCst), 1);
    assert_eq!(testing::close_count(url, "best"), 1);
    assert!(h.output.blanks.load(Ordering::SeqCst) >= 1);
    assert!(!input.exists(), "pipe should be removed");

    // Nothing left for a tick to release.
    h.source.tick();
    assert_eq!(testing::close_count(url, "best"), 1);
}

#[test]
fn update_while_shown_restarts_on_new_url() {
    let first = "https://fake.test/source/update-a";
    let second = "https://fake.test/source/update-b";
    testing::register_endless(first, &[("best", chunk("aaaa"))]);
    testing::register_endless(second, &[("best", chunk("bbbb"))]);
    let mut h = harness(settings_for(first));

    h.source.show().unwrap();
    h.source.update(SourceSettings {
        hw_decode: true,
        ..settings_for(second)
    });

    assert_eq!(h.source.state(), SourceState::Playing);
    assert_eq!(testing::close_count(first, "best"), 1);
    assert_eq!(testing::open_count(second, "best"), 1);
    let opened = h.recorder.opened();
    assert_eq!(opened.len(), 2);
    assert_ne!(opened[0].input, opened[1].input);
    assert!(!opened[0].hw_decode);
    assert!(opened[1].hw_decode);
}

#[test]
fn update_closes_the_stream_before_releasing_its_session() {
    let url = "https://fake.test/source/update-order";
    testing::register_endless(url, &[("best", chunk("live"))]);
    let mut h = harness(settings_for(url));

    h.source.show().unwrap();
    wait_for(|| h.recorder.received_len() > 0);
    assert!(testing::lifecycle_events(url).is_empty());

    h.source.update(settings_for(url));
    assert_eq!(h.source.state(), SourceState::Playing);
    assert_eq!(
        testing::lifecycle_events(url),
        ["stream-closed", "session-released"]
    );
}

#[test]
fn refresh_while_playing_keeps_the_opening_session_until_teardown() {
    let url = "https://fake.test/source/refresh-order";
    testing::register_endless(url, &[("best", chunk("live")), ("360p", chunk("low"))]);
    let mut h = harness(settings_for(url));

    h.source.show().unwrap();
    wait_for(|| h.recorder.received_len() > 0);

    assert!(h.source.refresh_definitions());
    assert!(h.source.refresh_definitions());
    assert_eq!(h.source.state(), SourceState::Playing);
    // The session dropped by the second refresh never opened a stream.
    assert_eq!(testing::lifecycle_events(url), ["session-released"]);
    let before = h.recorder.received_len();
    wait_for(|| h.recorder.received_len() > before);

    h.source.hide();
    assert_eq!(
        testing::lifecycle_events(url),
        ["session-released", "stream-closed", "session-released"]
    );
}

#[test]
fn update_while_hidden_does_not_start() {
    let url = "https://fake.test/source/update-hidden";
    testing::register_endless(url, &[("best", chunk("x"))]);
    let mut h = harness(settings_for(url));

    h.source.update(settings_for(url));
    assert_eq!(h.source.state(), SourceState::Inactive);
    assert_eq!(testing::open_count(url, "best"), 0);
}

#[test]
fn restart_uses_the_new_definition() {
    let url = "https://fake.test/source/restart";
    testing::register_endless(url, &[("best", chunk("b")), ("480p", chunk("4"))]);
    let mut h = harness(settings_for(url));

    h.source.show().unwrap();
    h.source.set_definition("480p");
    assert_eq!(h.source.restart().unwrap(), SourceState::Playing);

    assert_eq!(testing::close_count(url, "best"), 1);
    assert_eq!(testing::open_count(url, "480p"), 1);
    assert_eq!(h.recorder.opened().len(), 2);
}

#[test]
fn pipeline_failure_releases_stream_and_pipe() {
    let url = "https://fake.test/source/pipeline-fails";
    testing::register_endless(url, &[("best", chunk("x"))]);
    let mut h = build(settings_for(url), true, testing::runtime());

    let err = h.source.show().unwrap_err();
    assert!(matches!(err, SourceError::Pipeline(_)));
    assert_eq!(h.source.state(), SourceState::Inactive);
    assert_eq!(testing::close_count(url, "best"), 1);
    assert_eq!(std::fs::read_dir(h._dir.path()).unwrap().count(), 0);
}

#[test]
fn dropping_the_source_releases_the_stream() {
    let url = "https://fake.test/source/drop";
    testing::register_endless(url, &[("best", chunk("live"))]);
    let mut h = harness(settings_for(url));

    h.source.show().unwrap();
    wait_for(|| h.recorder.received_len() > 0);
    let input = h.recorder.opened()[0].input.clone();

    let Harness { source, _dir, .. } = h;
    drop(source);
    assert_eq!(testing::close_count(url, "best"), 1);
    assert!(!input.exists());
}
