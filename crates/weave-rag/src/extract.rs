//! Extract phase (§4.6 step 1): dispatch by MIME type to a text extractor.

use weave_core::{Result, WeaveError};

pub struct ExtractResult {
    pub text: String,
    pub warnings: Vec<String>,
}

/// Registered extractors are looked up by MIME type; unknown types fail the
/// document rather than guessing a decoder (§4.6: "failure here aborts the
/// document with `failed` status").
pub fn extract(mime_type: &str, bytes: &[u8]) -> Result<ExtractResult> {
    match mime_type {
        "text/plain" | "text/markdown" => extract_plain(bytes),
        "text/html" => extract_html(bytes),
        _ => Err(WeaveError::Internal(format!(
            "no extractor registered for mime type '{mime_type}'"
        ))),
    }
}

fn extract_plain(bytes: &[u8]) -> Result<ExtractResult> {
    let text = String::from_utf8_lossy(bytes).into_owned();
    Ok(ExtractResult {
        text,
        warnings: Vec::new(),
    })
}

fn extract_html(bytes: &[u8]) -> Result<ExtractResult> {
    let html = String::from_utf8_lossy(bytes);
    let text = html2text::from_read(html.as_bytes(), 2000);
    Ok(ExtractResult {
        text,
        warnings: Vec::new(),
    })
}
