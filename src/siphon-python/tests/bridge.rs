use std::sync::Arc;
use std::thread;

use siphon_python::testing;
use siphon_python::{BridgeError, GilGuard, OptionValue, Session};

fn session() -> Session {
    let runtime = testing::runtime();
    assert!(runtime.is_loaded(), "{:?}", runtime.failure());
    let gil = GilGuard::acquire();
    gil.run(|py| Session::new(py, runtime)).expect("session")
}

#[test]
fn catalog_names_match_keys_in_order() {
    let url = "https://fake.test/ordered";
    testing::register_streams(
        url,
        &[
            ("best", vec![b"a".to_vec()]),
            ("720p", vec![b"b".to_vec()]),
            ("worst", vec![b"c".to_vec()]),
        ],
    );
    let session = session();

    let gil = GilGuard::acquire();
    let catalog = gil.run(|py| session.streams(py, url)).unwrap();
    assert_eq!(
        catalog.names().collect::<Vec<_>>(),
        vec!["best", "720p", "worst"]
    );
    for info in catalog.iter() {
        assert_eq!(catalog.get(info.name()).unwrap().name(), info.name());
    }
}

#[test]
fn malformed_entries_are_skipped() {
    let url = "https://fake.test/odd";
    testing::register_expression(
        url,
        "OddMapping([\
            ('best', FakeStreamInfo('odd#best', [b'x'])), \
            ('lonely',), \
            42, \
            (7, FakeStreamInfo('odd#7', [b'y'])), \
            ('720p', FakeStreamInfo('odd#720p', [b'z'])), \
            ('audio_only', 'not a stream'), \
            ('worst', NoPluginError('open is not an attribute here')), \
        ])",
    );
    let session = session();

    let gil = GilGuard::acquire();
    let catalog = gil.run(|py| session.streams(py, url)).unwrap();
    assert_eq!(catalog.names().collect::<Vec<_>>(), vec!["best", "720p"]);
}

#[test]
fn empty_mapping_gives_empty_catalog() {
    let url = "https://fake.test/offline";
    testing::register_streams(url, &[]);
    let session = session();

    let gil = GilGuard::acquire();
    let catalog = gil.run(|py| session.streams(py, url)).unwrap();
    assert!(catalog.is_empty());
    assert!(catalog.select("best").is_none());
}

#[test]
fn unloaded_runtime_refuses_sessions() {
    let runtime = testing::failed_runtime();
    let gil = GilGuard::acquire();
    let err = gil.run(|py| Session::new(py, &runtime)).unwrap_err();
    assert!(matches!(err, BridgeError::NotLoaded));
}

#[test]
fn resolution_failure_carries_traceback() {
    let url = "https://fake.test/no-plugin";
    testing::register_failure(url, "No plugin can handle URL");
    let session = session();

    let gil = GilGuard::acquire();
    let err = gil.run(|py| session.streams(py, url)).unwrap_err();
    let trace = err.trace().expect("traceback text");
    assert!(trace.starts_with("Traceback (most recent call last):"), "{trace}");
    assert!(trace.contains("in streams"), "{trace}");
    assert!(
        trace.ends_with("NoPluginError: No plugin can handle URL"),
        "{trace}"
    );
}

#[test]
fn rejected_option_is_a_call_failure() {
    let session = session();
    let gil = GilGuard::acquire();
    let err = gil
        .run(|py| session.set_option(py, "reject-me", &OptionValue::Int(1)))
        .unwrap_err();
    match err {
        BridgeError::CallFailure { call, trace } => {
            assert_eq!(call, "set_option(reject-me)");
            assert!(trace.contains("ValueError: unsupported option: reject-me"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn typed_options_reach_the_client() {
    let session = session();
    {
        let gil = GilGuard::acquire();
        gil.run(|py| -> Result<(), BridgeError> {
            session.set_option(py, "http-proxy", &OptionValue::String("http://p:1".into()))?;
            session.set_option(py, "http-timeout", &OptionValue::Double(2.5))?;
            session.set_option(py, "hls-live-edge", &OptionValue::Int(4))?;
            session.set_option(py, "hls-live-restart", &OptionValue::Bool(true))
        })
        .unwrap();
    }

    assert_eq!(
        testing::option_repr(&session, "http-proxy").as_deref(),
        Some("'http://p:1'")
    );
    assert_eq!(testing::option_repr(&session, "http-timeout").as_deref(), Some("2.5"));
    assert_eq!(testing::option_repr(&session, "hls-live-edge").as_deref(), Some("4"));
    assert_eq!(testing::option_repr(&session, "hls-live-restart").as_deref(), Some("True"));
}

#[test]
fn concurrent_sessions_keep_their_own_setters() {
    let runtime = testing::runtime();
    let workers: Vec<_> = (0..2i64)
        .map(|id| {
            thread::spawn(move || {
                let gil = GilGuard::acquire();
                let session = gil.run(|py| -> Result<Session, BridgeError> {
                    let session = Session::new(py, runtime)?;
                    session.set_option(py, "worker", &OptionValue::Int(id))?;
                    Ok(session)
                });
                drop(gil);
                (id, session.expect("session"))
            })
        })
        .collect();

    for worker in workers {
        let (id, session) = worker.join().unwrap();
        assert_eq!(
            testing::option_repr(&session, "worker"),
            Some(id.to_string())
        );
    }
}

#[test]
fn stream_reads_to_end_and_closes_once() {
    let url = "https://fake.test/read";
    testing::register_streams(
        url,
        &[("best", vec![b"hello ".to_vec(), b"world".to_vec()])],
    );
    let session = session();

    let gil = GilGuard::acquire();
    let stream = gil
        .run(|py| -> Result<_, BridgeError> {
            let catalog = session.streams(py, url)?;
            catalog.select("1080p").expect("fallback").open(py)
        })
        .unwrap();
    assert_eq!(stream.definition(), "best");

    let mut data = Vec::new();
    loop {
        let chunk = gil.run(|py| stream.read(py, 4)).unwrap();
        if chunk.is_empty() {
            break;
        }
        data.extend(chunk);
    }
    assert_eq!(data, b"hello world");

    gil.run(|py| stream.close(py)).unwrap();
    gil.run(|py| stream.close(py)).unwrap();
    assert!(stream.is_closed());
    drop(gil);
    assert_eq!(testing::close_count(url, "best"), 1);
}

#[test]
fn failing_open_is_reported() {
    let url = "https://fake.test/broken";
    testing::register_expression(url, "{'best': BrokenStreamInfo()}");
    let session = session();

    let gil = GilGuard::acquire();
    let err = gil
        .run(|py| -> Result<_, BridgeError> {
            let catalog = session.streams(py, url)?;
            catalog.select("best").expect("entry").open(py)
        })
        .unwrap_err();
    assert!(err.trace().unwrap().contains("OSError: failed to open first segment"));
}

#[test]
fn stream_is_shareable_across_threads() {
    let url = "https://fake.test/shared";
    testing::register_streams(url, &[("best", vec![b"abc".to_vec()])]);
    let session = session();

    let stream = {
        let gil = GilGuard::acquire();
        gil.run(|py| -> Result<_, BridgeError> {
            session.streams(py, url)?.select("best").expect("entry").open(py)
        })
        .unwrap()
    };
    let stream = Arc::new(stream);

    let reader = Arc::clone(&stream);
    let chunk = thread::spawn(move || {
        let gil = GilGuard::acquire();
        gil.run(|py| reader.read(py, 16))
    })
    .join()
    .unwrap()
    .unwrap();
    assert_eq!(chunk, b"abc");
}
