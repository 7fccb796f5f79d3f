//! Translating source settings into Streamlink session options.

use pyo3::Python;
use serde_json::Value;
use siphon_core::SourceSettings;
use siphon_python::{BridgeResult, GilGuard, OptionValue, Runtime, Session};

use crate::SourceError;

/// Create a session and apply the settings' named options, then the custom
/// ones. Custom options run last, so they win over a named option with the
/// same key.
pub fn configure_session(
    runtime: &Runtime,
    settings: &SourceSettings,
) -> Result<Session, SourceError> {
    let gil = GilGuard::acquire();
    let session = gil.run(|py| -> BridgeResult<Session> {
        let session = Session::new(py, runtime)?;
        for (name, value) in named_options(settings) {
            tracing::debug!(option = name, %value, "setting session option");
            session.set_option(py, name, &value)?;
        }
        apply_custom_options(py, &session, &settings.custom_options)?;
        Ok(session)
    })?;
    Ok(session)
}

/// The fixed options derived from `settings`, in application order.
pub fn named_options(settings: &SourceSettings) -> Vec<(&'static str, OptionValue)> {
    let mut options = Vec::new();
    // Single-character proxies count as unset.
    if settings.http_proxy.len() > 1 {
        options.push(("http-proxy", OptionValue::String(settings.http_proxy.clone())));
    }
    if settings.https_proxy.len() > 1 {
        options.push(("https-proxy", OptionValue::String(settings.https_proxy.clone())));
    }
    if settings.ringbuffer_size_mb > 0 {
        options.push((
            "ringbuffer-size",
            OptionValue::Int(settings.ringbuffer_size_mb.saturating_mul(1024 * 1024)),
        ));
    }
    options.push(("hls-live-edge", OptionValue::Int(settings.hls_live_edge)));
    options.push(("hls-segment-threads", OptionValue::Int(settings.hls_segment_threads)));
    options.push(("http-timeout", OptionValue::Double(settings.http_timeout_secs)));
    if let Some(ffmpeg) = settings.ffmpeg_path.as_deref().filter(|path| !path.is_empty()) {
        options.push(("ffmpeg-ffmpeg", OptionValue::String(ffmpeg.to_string())));
    }
    options
}

/// Parse a JSON object of extra options into typed values.
///
/// Bad input is logged and yields nothing; entries with an empty key or an
/// unsupported value type are logged and skipped.
pub fn parse_custom_options(text: &str) -> Vec<(String, OptionValue)> {
    if text.trim().is_empty() {
        return Vec::new();
    }
    let parsed: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(err) => {
            tracing::warn!("Failed to set streamlink custom options, bad JSON string: {err}");
            return Vec::new();
        }
    };
    let Value::Object(map) = parsed else {
        tracing::warn!("Failed to set streamlink custom options, given json is not an object.");
        return Vec::new();
    };

    let mut options = Vec::with_capacity(map.len());
    for (key, value) in map {
        if key.is_empty() {
            continue;
        }
        let value = match value {
            Value::Bool(flag) => OptionValue::Bool(flag),
            Value::Number(number) => match number.as_i64() {
                Some(int) => OptionValue::Int(int),
                None => OptionValue::Double(number.as_f64().unwrap_or_default()),
            },
            Value::String(text) => OptionValue::String(text),
            other => {
                tracing::warn!(
                    option = %key,
                    "Failed to set streamlink custom option, value type not recognized: {other}"
                );
                continue;
            }
        };
        options.push((key, value));
    }
    options
}

/// Apply [`parse_custom_options`] to `session`. Returns how many were set.
///
/// Errors raised by the setter itself propagate.
pub fn apply_custom_options(py: Python<'_>, session: &Session, text: &str) -> BridgeResult<usize> {
    let options = parse_custom_options(text);
    for (name, value) in &options {
        tracing::debug!(option = %name, %value, "setting custom session option");
        session.set_option(py, name, value)?;
    }
    Ok(options.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(options: &[(&'static str, OptionValue)]) -> Vec<&'static str> {
        options.iter().map(|(name, _)| *name).collect()
    }

    #[test]
    fn defaults_produce_the_fixed_set() {
        let options = named_options(&SourceSettings::default());
        assert_eq!(
            names(&options),
            vec!["ringbuffer-size", "hls-live-edge", "hls-segment-threads", "http-timeout"]
        );
        assert_eq!(options[0].1, OptionValue::Int(16 * 1024 * 1024));
        assert_eq!(options[1].1, OptionValue::Int(8));
        assert_eq!(options[2].1, OptionValue::Int(3));
        assert_eq!(options[3].1, OptionValue::Double(5.0));
    }

    #[test]
    fn short_proxies_are_ignored() {
        let settings = SourceSettings {
            http_proxy: " ".into(),
            https_proxy: "https://proxy:8443".into(),
            ..SourceSettings::default()
        };
        let options = named_options(&settings);
        assert!(!names(&options).contains(&"http-proxy"));
        assert_eq!(
            options[0],
            ("https-proxy", OptionValue::String("https://proxy:8443".into()))
        );
    }

    #[test]
    fn non_positive_ringbuffer_is_skipped() {
        let settings = SourceSettings {
            ringbuffer_size_mb: 0,
            ffmpeg_path: Some("/usr/bin/ffmpeg".into()),
            ..SourceSettings::default()
        };
        let options = named_options(&settings);
        assert!(!names(&options).contains(&"ringbuffer-size"));
        assert_eq!(
            options.last().unwrap(),
            &("ffmpeg-ffmpeg", OptionValue::String("/usr/bin/ffmpeg".into()))
        );
    }

    #[test]
    fn custom_values_map_to_types() {
        let mut options = parse_custom_options(
            r#"{"flag": true, "count": 3, "ratio": 0.5, "name": "x", "": 1, "list": [1]}"#,
        );
        options.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(
            options,
            vec![
                ("count".to_string(), OptionValue::Int(3)),
                ("flag".to_string(), OptionValue::Bool(true)),
                ("name".to_string(), OptionValue::String("x".into())),
                ("ratio".to_string(), OptionValue::Double(0.5)),
            ]
        );
    }

    #[test]
    fn bad_custom_text_yields_nothing() {
        assert!(parse_custom_options("").is_empty());
        assert!(parse_custom_options("{not json").is_empty());
        assert!(parse_custom_options("[1, 2]").is_empty());
        assert!(parse_custom_options("{}").is_empty());
    }
}
