//! # Traffic Sinks
//!
//! The writer contract consumed by the proxy, plus the NDJSON sink.
//! Sinks receive each classified [`TrafficEntry`] exactly once; the
//! proxy serializes calls, so one entry at a time is atomic from the
//! sink's perspective.

use std::io::{self, Write};

use crate::proxy::{TrafficClass, TrafficEntry};

/// A sink for classified traffic entries.
pub trait EntryWriter: Send {
    /// Consume one classified entry.
    fn write_entry(&mut self, entry: &TrafficEntry);
}

/// Writes entries as NDJSON: one UTF-8 JSON object per line,
/// newline-terminated. With `all_traffic` unset, `Unknown`-class
/// entries are skipped.
#[derive(Debug)]
pub struct NdjsonWriter<W: Write> {
    out: W,
    all_traffic: bool,
}

impl NdjsonWriter<io::Stdout> {
    /// An NDJSON writer emitting to stdout.
    #[must_use]
    pub fn stdout(all_traffic: bool) -> Self {
        Self::new(io::stdout(), all_traffic)
    }
}

impl<W: Write> NdjsonWriter<W> {
    /// An NDJSON writer emitting to `out`.
    pub const fn new(out: W, all_traffic: bool) -> Self {
        Self { out, all_traffic }
    }
}

impl<W: Write + Send> EntryWriter for NdjsonWriter<W> {
    fn write_entry(&mut self, entry: &TrafficEntry) {
        if entry.class == TrafficClass::Unknown && !self.all_traffic {
            return;
        }
        match serde_json::to_string(entry) {
            Ok(line) => {
                if let Err(e) = writeln!(self.out, "{line}") {
                    tracing::error!("writing traffic entry: {e}");
                }
            }
            Err(e) => tracing::error!("serializing traffic entry: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(class: TrafficClass) -> TrafficEntry {
        TrafficEntry {
            method: "GET".to_string(),
            url: "http://example.com/".to_string(),
            status: 200,
            class,
            class_label: class.label().to_string(),
            ..TrafficEntry::default()
        }
    }

    #[test]
    fn skips_unknown_without_all_traffic() {
        let mut writer = NdjsonWriter::new(Vec::new(), false);

        writer.write_entry(&entry(TrafficClass::Unknown));
        writer.write_entry(&entry(TrafficClass::VciMetadata));

        let output = String::from_utf8(writer.out).unwrap();
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains(r#""classLabel":"VCI Metadata""#));
    }

    #[test]
    fn forwards_everything_with_all_traffic() {
        let mut writer = NdjsonWriter::new(Vec::new(), true);

        writer.write_entry(&entry(TrafficClass::Unknown));
        writer.write_entry(&entry(TrafficClass::VpAuthResponse));

        let output = String::from_utf8(writer.out).unwrap();
        assert_eq!(output.lines().count(), 2);
        assert!(output.ends_with('\n'));
    }

    #[test]
    fn one_json_object_per_line() {
        let mut writer = NdjsonWriter::new(Vec::new(), true);
        writer.write_entry(&entry(TrafficClass::VciTokenRequest));

        let output = String::from_utf8(writer.out).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(output.trim_end()).unwrap();
        assert_eq!(parsed["class"], "vci_token_request");
        assert_eq!(parsed["method"], "GET");
    }
}
