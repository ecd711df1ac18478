use std::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// A row as read from the input. Every field is optional text, since the input may
/// contain blanks, missing columns or garbage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRecord {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

impl RawRecord {
    pub fn new(id: &str, value: &str, timestamp: &str) -> Self {
        Self {
            id: Some(id.to_string()),
            value: Some(value.to_string()),
            timestamp: Some(timestamp.to_string()),
        }
    }
}

/// A record that passed validation and holds a run-unique id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanRecord {
    pub id: i64,
    pub value: f64,
    pub timestamp: NaiveDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    InvalidId,
    InvalidValue,
    InvalidTimestamp,
    DuplicateId,
    NegativeValue,
}

impl RejectionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectionReason::InvalidId => "invalid id",
            RejectionReason::InvalidValue => "invalid value",
            RejectionReason::InvalidTimestamp => "invalid timestamp",
            RejectionReason::DuplicateId => "duplicate id",
            RejectionReason::NegativeValue => "negative value",
        }
    }
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A record routed to the bad store. Fields keep the original input text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedRecord {
    pub id: Option<String>,
    pub value: Option<String>,
    pub timestamp: Option<String>,
    pub error: String,
}

impl RejectedRecord {
    pub fn new(raw: RawRecord, reason: RejectionReason) -> Self {
        Self {
            id: raw.id,
            value: raw.value,
            timestamp: raw.timestamp,
            error: reason.to_string(),
        }
    }
}

/// A contiguous slice of the input, processed as one unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    /// Position of this batch in the input, used for logging and error context.
    pub index: usize,
    pub records: Vec<RawRecord>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_reason_strings() {
        assert_eq!(RejectionReason::InvalidId.to_string(), "invalid id");
        assert_eq!(RejectionReason::InvalidValue.to_string(), "invalid value");
        assert_eq!(
            RejectionReason::InvalidTimestamp.to_string(),
            "invalid timestamp"
        );
        assert_eq!(RejectionReason::DuplicateId.to_string(), "duplicate id");
        assert_eq!(RejectionReason::NegativeValue.to_string(), "negative value");
    }

    #[test]
    fn test_rejected_record_keeps_original_text() {
        let raw = RawRecord {
            id: Some(" 12 ".to_string()),
            value: None,
            timestamp: Some("yesterday".to_string()),
        };
        let rejected = RejectedRecord::new(raw, RejectionReason::InvalidValue);

        assert_eq!(rejected.id.as_deref(), Some(" 12 "));
        assert_eq!(rejected.value, None);
        assert_eq!(rejected.timestamp.as_deref(), Some("yesterday"));
        assert_eq!(rejected.error, "invalid value");
    }
}
