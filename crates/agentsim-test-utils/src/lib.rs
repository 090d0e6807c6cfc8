//! Fixtures and helpers shared by the agentsim test suites.

pub mod fixtures;
pub mod sampler;

pub use sampler::{RecordedDraw, RecordingSampler};

use std::io::Write;

/// Write `content` to a named temporary file with the given suffix.
pub fn temp_file(suffix: &str, content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(suffix)
        .tempfile()
        .expect("create temp file");
    file.write_all(content.as_bytes()).expect("write temp file");
    file
}
