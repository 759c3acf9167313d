//! Format prober: the probe reader formatted for UI display.
//!
//! Output is line-oriented `key=value` text:
//!
//! ```text
//! duration=183500
//! codec=FLAC
//! sample_rate=44100
//! channels=2
//! tag:artist=Someone
//! chapter=0:0:60000:Intro
//! ```
//!
//! Unknown values are left empty; tags and chapters come in probe order.

use std::fmt::Write as _;

use track_decode_types::ProbeResult;

use crate::backend::{MediaBackend, SourceRef};
use crate::error::Result;
use crate::probe::probe;

/// Probe `source` and render the result. Failures pass through unchanged.
pub fn avformatinfo(backend: &dyn MediaBackend, source: &SourceRef) -> Result<String> {
    probe(backend, source).map(|result| render_probe(&result))
}

pub fn render_probe(result: &ProbeResult) -> String {
    let mut out = String::new();
    line(&mut out, "duration", opt(result.duration_ms));
    if let Some(stream) = &result.stream {
        line(&mut out, "stream", stream.index.to_string());
        line(&mut out, "codec", stream.codec.clone().unwrap_or_default());
        line(&mut out, "sample_rate", opt(stream.sample_rate));
        line(&mut out, "channels", opt(stream.channels));
    }
    for (key, value) in &result.tags {
        line(&mut out, &format!("tag:{key}"), single_line(value));
    }
    for chapter in &result.chapters {
        let value = format!(
            "{}:{}:{}:{}",
            chapter.index,
            chapter.start_ms,
            opt(chapter.end_ms),
            single_line(chapter.title.as_deref().unwrap_or_default())
        );
        line(&mut out, "chapter", value);
    }
    out
}

fn line(out: &mut String, key: &str, value: String) {
    let _ = writeln!(out, "{key}={value}");
}

fn opt<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// Keep one record per line.
fn single_line(value: &str) -> String {
    value.replace(['\r', '\n'], " ")
}
