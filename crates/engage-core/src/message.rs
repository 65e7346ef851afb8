use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What produced a conversation entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Dm,
    Mention,
    System,
}

/// A single conversation entry.
///
/// `is_from_us` is decided once, when the platform adapter ingests the message,
/// and never recomputed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub text: String,
    #[serde(default, deserialize_with = "lenient_timestamp::deserialize")]
    pub timestamp: Option<DateTime<Utc>>,
    pub is_from_us: bool,
    #[serde(rename = "type")]
    pub kind: MessageKind,
}

impl Message {
    pub fn dm(text: impl Into<String>, is_from_us: bool) -> Self {
        Self {
            text: text.into(),
            timestamp: Some(Utc::now()),
            is_from_us,
            kind: MessageKind::Dm,
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            timestamp: Some(Utc::now()),
            is_from_us: true,
            kind: MessageKind::System,
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

/// A public mention and, once answered, our reply to it.
///
/// Immutable once `is_reply` is true.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MentionRecord {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub reply: Option<String>,
    #[serde(default, deserialize_with = "lenient_timestamp::deserialize")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_reply: bool,
}

impl MentionRecord {
    pub fn replied(id: impl Into<String>, text: impl Into<String>, reply: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            reply: Some(reply.into()),
            timestamp: Some(Utc::now()),
            is_reply: true,
        }
    }

    /// View of the mention as a conversation entry.
    pub fn as_message(&self) -> Message {
        Message {
            text: self.text.clone(),
            timestamp: self.timestamp,
            is_from_us: false,
            kind: MessageKind::Mention,
        }
    }
}

/// Accepts RFC 3339 strings and numeric epoch seconds. Anything else loads as `None`.
pub mod lenient_timestamp {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = serde_json::Value::deserialize(deserializer)?;
        Ok(parse(&raw))
    }

    pub fn parse(raw: &serde_json::Value) -> Option<DateTime<Utc>> {
        match raw {
            serde_json::Value::String(s) => DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| dt.with_timezone(&Utc)),
            serde_json::Value::Number(n) => {
                let secs = n.as_f64()?;
                if !secs.is_finite() {
                    return None;
                }
                let whole = secs.trunc() as i64;
                let nanos = ((secs - secs.trunc()) * 1e9) as u32;
                DateTime::from_timestamp(whole, nanos)
            }
            _ => None,
        }
    }
}
