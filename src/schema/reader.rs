//! Event log readers
//!
//! The recorder's container format is kept behind [`LogReader`] so the
//! ingestion stage only ever sees a sequence of [`LogEvent`]s.

use crate::error::AnalysisError;
use crate::schema::log_event::LogEvent;
use std::fs;
use std::path::Path;

/// Trait for event log readers
pub trait LogReader {
    /// Read every event of the log at `path`, in file order
    fn read_events(&self, path: &Path) -> Result<Vec<LogEvent>, AnalysisError>;
}

/// Layout of a JSON log export
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Newline-delimited JSON (one event per line)
    #[default]
    Ndjson,
    /// JSON array of events
    JsonArray,
}

/// Reader for JSON exports of a recorded log
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonLogReader {
    pub format: LogFormat,
}

impl JsonLogReader {
    pub fn new(format: LogFormat) -> Self {
        Self { format }
    }
}

impl LogReader for JsonLogReader {
    fn read_events(&self, path: &Path) -> Result<Vec<LogEvent>, AnalysisError> {
        let data = fs::read_to_string(path)?;
        match self.format {
            LogFormat::Ndjson => parse_ndjson(&data),
            LogFormat::JsonArray => parse_array(&data),
        }
    }
}

/// Parse a JSON string containing an array of events
pub fn parse_array(json: &str) -> Result<Vec<LogEvent>, AnalysisError> {
    let events: Vec<LogEvent> = serde_json::from_str(json)?;
    Ok(events)
}

/// Parse NDJSON (newline-delimited JSON) containing events
pub fn parse_ndjson(ndjson: &str) -> Result<Vec<LogEvent>, AnalysisError> {
    let mut events = Vec::new();
    for (line_num, line) in ndjson.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<LogEvent>(trimmed) {
            Ok(event) => events.push(event),
            Err(e) => {
                return Err(AnalysisError::ParseError(format!(
                    "Failed to parse line {}: {}",
                    line_num + 1,
                    e
                )));
            }
        }
    }
    Ok(events)
}

/// Serialize events as NDJSON, the inverse of [`parse_ndjson`]
pub fn to_ndjson(events: &[LogEvent]) -> Result<String, AnalysisError> {
    let mut out = String::new();
    for event in events {
        out.push_str(&serde_json::to_string(event)?);
        out.push('\n');
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Stamp, TOPIC_TRACKED};

    #[test]
    fn test_parse_ndjson_skips_blank_lines() {
        let data = r#"
{"topic": "/flymad/tracked", "time": {"secs": 1, "nsecs": 0}, "msg": {}}

{"topic": "/draw_geom/poly", "time": {"secs": 2}, "msg": {"points": []}}
"#;
        let events = parse_ndjson(data).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].topic, TOPIC_TRACKED);
        assert_eq!(events[1].time, Stamp::new(2, 0));
    }

    #[test]
    fn test_parse_ndjson_reports_line() {
        let data = "{\"topic\": \"a\", \"time\": {\"secs\": 1}, \"msg\": null}\nnot json\n";
        let err = parse_ndjson(data).unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_parse_array() {
        let data = r#"[{"topic": "a", "time": {"secs": 1}, "msg": {"data": 2}}]"#;
        let events = parse_array(data).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].msg["data"], 2);
    }

    #[test]
    fn test_json_reader_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("2013-10-07-16-59-29.ndjson");
        let events = vec![LogEvent::new("a", Stamp::new(5, 0), serde_json::json!({}))];
        fs::write(&path, to_ndjson(&events).unwrap()).unwrap();

        let read = JsonLogReader::default().read_events(&path).unwrap();
        assert_eq!(read.len(), 1);
        assert_eq!(read[0].time, Stamp::new(5, 0));
    }
}
