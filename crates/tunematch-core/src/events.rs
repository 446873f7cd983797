//! Outbound wire events
//!
//! Closed set of JSON messages a session sends to its client. Decoding is
//! strict: an unknown `type` is an error rather than a silently ignored
//! message.

use crate::matching::MatchResult;
use crate::session::SessionStats;
use serde::{Deserialize, Serialize};

/// Body of a `match` event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchPayload {
    pub matches: Vec<MatchResult>,
}

/// Server -> client message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerEvent {
    Match {
        data: MatchPayload,
    },
    Status {
        message: String,
        dropped_windows: u64,
        dropped_samples: u64,
        input_errors: u64,
        index_version: Option<u64>,
    },
    Error {
        message: String,
    },
}

impl ServerEvent {
    pub fn matches(matches: Vec<MatchResult>) -> Self {
        Self::Match {
            data: MatchPayload { matches },
        }
    }

    pub fn status<S: Into<String>>(message: S, stats: &SessionStats, index_version: Option<u64>) -> Self {
        Self::Status {
            message: message.into(),
            dropped_windows: stats.dropped_windows,
            dropped_samples: stats.dropped_samples,
            input_errors: stats.input_errors,
            index_version,
        }
    }

    pub fn error<S: Into<String>>(message: S) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Wire name of the variant
    pub fn kind(&self) -> &'static str {
        match self {
            ServerEvent::Match { .. } => "match",
            ServerEvent::Status { .. } => "status",
            ServerEvent::Error { .. } => "error",
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::{json, Value};

    fn sample_result() -> MatchResult {
        MatchResult {
            track_id: 1,
            title: "A".to_string(),
            confidence: 0.9,
            start_time: 30.0,
            end_time: 33.0,
            window_index: 0,
            index_version: 3,
            generated_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_match_event_shape() {
        let event = ServerEvent::matches(vec![sample_result()]);
        let value: Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();

        assert_eq!(value["type"], "match");
        let first = &value["data"]["matches"][0];
        assert_eq!(first["title"], "A");
        assert_eq!(first["track_id"], 1);
        assert_eq!(first["start_time"], 30.0);
        assert_eq!(first["generated_at"], "2024-05-01T12:00:00Z");
        assert_eq!(ServerEvent::from_json(&value.to_string()).unwrap(), event);
    }

    #[test]
    fn test_status_event_shape() {
        let stats = SessionStats {
            dropped_windows: 2,
            input_errors: 1,
            ..Default::default()
        };
        let event = ServerEvent::status("streaming", &stats, Some(4));
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "status",
                "message": "streaming",
                "dropped_windows": 2,
                "dropped_samples": 0,
                "input_errors": 1,
                "index_version": 4
            })
        );
    }

    #[test]
    fn test_error_event_shape() {
        let value = serde_json::to_value(ServerEvent::error("boom")).unwrap();
        assert_eq!(value, json!({"type": "error", "message": "boom"}));
    }

    #[test]
    fn test_unknown_type_fails_to_decode() {
        assert!(ServerEvent::from_json(r#"{"type":"partial","message":"x"}"#).is_err());
        assert!(ServerEvent::from_json(r#"{"message":"x"}"#).is_err());
    }
}
