use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{ElementRef, Handle};

/// A message as the platform adapter scraped it. Any field may be missing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawMessage {
    pub text: Option<String>,
    pub is_from_us: bool,
    pub timestamp: Option<DateTime<Utc>>,
}

impl RawMessage {
    pub fn new(text: impl Into<String>, is_from_us: bool) -> Self {
        Self {
            text: Some(text.into()),
            is_from_us,
            timestamp: Some(Utc::now()),
        }
    }
}

/// A DM thread or pending message request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawThread {
    pub handle: Option<Handle>,
    pub thread_ref: ElementRef,
    pub messages: Vec<RawMessage>,
}

impl RawThread {
    pub fn last_message(&self) -> Option<&RawMessage> {
        self.messages.last()
    }

    /// Text of the newest message, if it has any non-blank text.
    pub fn last_text(&self) -> Option<&str> {
        self.last_message()
            .and_then(|m| m.text.as_deref())
            .filter(|t| !t.trim().is_empty())
    }
}

/// A public mention as scraped.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawSignal {
    pub id: Option<String>,
    pub handle: Option<Handle>,
    pub text: Option<String>,
    pub signal_ref: ElementRef,
    pub timestamp: Option<DateTime<Utc>>,
}

/// A transcribed turn of live speech.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    #[serde(default)]
    pub speaker: Option<String>,
    pub text: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl Segment {
    pub fn new(speaker: Option<&str>, text: impl Into<String>) -> Self {
        Self {
            speaker: speaker.map(String::from),
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Key under which an inbound signal is recorded in the reply ledger.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SignalId {
    Mention(String),
    Dm { handle: Handle, digest: String },
}

impl SignalId {
    pub fn mention(id: impl Into<String>) -> Self {
        SignalId::Mention(id.into())
    }

    /// DM ids are content-derived: a BLAKE3 prefix of the normalized text.
    pub fn dm(handle: impl Into<String>, text: &str) -> Self {
        SignalId::Dm {
            handle: handle.into(),
            digest: content_digest(text),
        }
    }

    /// Parse the `Display` form back. Returns `None` for foreign ids.
    pub fn parse(raw: &str) -> Option<Self> {
        if let Some(id) = raw.strip_prefix("mention:") {
            return Some(SignalId::Mention(id.to_string()));
        }
        let rest = raw.strip_prefix("dm:")?;
        let (handle, digest) = rest.rsplit_once(':')?;
        Some(SignalId::Dm {
            handle: handle.to_string(),
            digest: digest.to_string(),
        })
    }
}

impl std::fmt::Display for SignalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalId::Mention(id) => write!(f, "mention:{id}"),
            SignalId::Dm { handle, digest } => write!(f, "dm:{handle}:{digest}"),
        }
    }
}

/// Trim, collapse whitespace, lowercase.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn content_digest(text: &str) -> String {
    let hash = blake3::hash(normalize_text(text).as_bytes());
    hash.to_hex()[..16].to_string()
}
