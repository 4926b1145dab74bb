use chrono::{DateTime, SecondsFormat, Utc};
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::Value;
use tracing::Level;

/// Key of the record severity, following the Cloud Logging structured log format.
pub const SEVERITY_KEY: &str = "severity";
pub const TIMESTAMP_KEY: &str = "timestamp";
pub const MESSAGE_KEY: &str = "message";

/// A single log entry on its way to a [`LogSink`](crate::sink::LogSink).
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub level: Level,
    pub timestamp: DateTime<Utc>,
    pub message: String,
    attributes: Vec<(String, Value)>,
}

impl LogRecord {
    pub fn new(level: Level, message: impl Into<String>) -> Self {
        LogRecord {
            level,
            timestamp: Utc::now(),
            message: message.into(),
            attributes: Vec::new(),
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn add_attribute(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.attributes.push((key.into(), value.into()));
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.add_attribute(key, value);
        self
    }

    pub fn attributes(&self) -> &[(String, Value)] {
        &self.attributes
    }

    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }
}

/// Maps a level to a Cloud Logging `LogSeverity`.
///
/// See <https://cloud.google.com/logging/docs/reference/v2/rest/v2/LogEntry#LogSeverity>
pub fn severity(level: Level) -> &'static str {
    match level {
        Level::WARN => "WARNING",
        other => other.as_str(),
    }
}

/// Serializes a record as one Cloud Logging structured log object.
///
/// The built-in fields come first under their renamed keys, followed by the
/// attributes in insertion order.
pub struct CloudLogging<'a>(pub &'a LogRecord);

impl Serialize for CloudLogging<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let record = self.0;
        let mut map = serializer.serialize_map(Some(3 + record.attributes.len()))?;
        map.serialize_entry(
            TIMESTAMP_KEY,
            &record
                .timestamp
                .to_rfc3339_opts(SecondsFormat::Nanos, true),
        )?;
        map.serialize_entry(SEVERITY_KEY, severity(record.level))?;
        map.serialize_entry(MESSAGE_KEY, &record.message)?;
        for (key, value) in &record.attributes {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use serde_json::json;

    use super::*;

    fn encode(record: &LogRecord) -> String {
        serde_json::to_string(&CloudLogging(record)).unwrap()
    }

    #[test]
    fn warn_is_reported_as_warning() {
        assert_eq!(severity(Level::WARN), "WARNING");
        assert_eq!(severity(Level::ERROR), "ERROR");
        assert_eq!(severity(Level::INFO), "INFO");
        assert_eq!(severity(Level::DEBUG), "DEBUG");
        assert_eq!(severity(Level::TRACE), "TRACE");
    }

    #[test]
    fn built_in_keys_are_renamed() {
        let timestamp = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let record = LogRecord::new(Level::WARN, "disk almost full").with_timestamp(timestamp);

        assert_eq!(
            encode(&record),
            r#"{"timestamp":"2024-03-01T12:00:00.000000000Z","severity":"WARNING","message":"disk almost full"}"#
        );
    }

    #[test]
    fn attributes_keep_their_keys_and_order() {
        let record = LogRecord::new(Level::INFO, "request")
            .with_attribute("level", "user supplied")
            .with_attribute("time", 3)
            .with_attribute("msg", json!({"nested": true}));

        let value: Value = serde_json::from_str(&encode(&record)).unwrap();
        let object = value.as_object().unwrap();

        assert_eq!(object[SEVERITY_KEY], "INFO");
        assert_eq!(object["level"], "user supplied");
        assert_eq!(object["time"], 3);
        assert_eq!(object["msg"], json!({"nested": true}));

        let encoded = encode(&record);
        let level = encoded.find(r#""level""#).unwrap();
        let time = encoded.find(r#""time""#).unwrap();
        let msg = encoded.find(r#""msg""#).unwrap();
        assert!(encoded.find(r#""message""#).unwrap() < level);
        assert!(level < time && time < msg);
    }

    #[test]
    fn renames_happen_once_per_record() {
        let mut record = LogRecord::new(Level::ERROR, "x");
        for i in 0..10 {
            record.add_attribute(format!("k{i}"), i);
        }

        let encoded = encode(&record);
        assert_eq!(encoded.matches(r#""severity""#).count(), 1);
        assert_eq!(encoded.matches(r#""timestamp""#).count(), 1);
        assert_eq!(encoded.matches(r#""message""#).count(), 1);
    }
}
