//! Turning Python exceptions into plain text.

use pyo3::prelude::*;

const TRACEBACK_HEADER: &str = "Traceback (most recent call last):";

/// Fetch and clear the pending Python error, formatted like a traceback.
///
/// Returns an empty string, and touches nothing, when no error is pending.
pub fn take_exception_info(py: Python<'_>) -> String {
    match PyErr::take(py) {
        Some(err) => describe(py, &err),
        None => String::new(),
    }
}

/// Format an already fetched error.
///
/// One line per frame, oldest first, then `TypeName: message` (the message
/// part is omitted when it is empty).
pub fn describe(py: Python<'_>, err: &PyErr) -> String {
    let mut message = String::new();

    if let Some(traceback) = err.traceback(py) {
        message.push_str(TRACEBACK_HEADER);
        message.push('\n');
        let mut next = Some(traceback.into_any());
        while let Some(tb) = next {
            if let Some(line) = describe_frame(&tb) {
                message.push_str(&line);
                message.push('\n');
            }
            next = tb.getattr("tb_next").ok().filter(|tb| !tb.is_none());
        }
    }

    let type_name = err
        .get_type(py)
        .name()
        .map(|name| name.to_string())
        .unwrap_or_else(|_| "Exception".to_string());
    message.push_str(&type_name);

    let text = err
        .value(py)
        .str()
        .map(|text| text.to_string_lossy().into_owned())
        .unwrap_or_default();
    if !text.is_empty() {
        message.push_str(": ");
        message.push_str(&text);
    }

    message
}

fn describe_frame(tb: &Bound<'_, PyAny>) -> Option<String> {
    let line: u32 = tb.getattr("tb_lineno").ok()?.extract().ok()?;
    let code = tb.getattr("tb_frame").ok()?.getattr("f_code").ok()?;
    let file: String = code.getattr("co_filename").ok()?.extract().ok()?;
    let routine: String = code.getattr("co_name").ok()?.extract().ok()?;
    Some(format!("  File \"{file}\", line {line}, in {routine}"))
}
