use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable identifier of a counterparty (or of a live room for spaces).
pub type Handle = String;

/// Unique identifier for a live stream session.
pub type SessionId = Uuid;

/// Opaque reference the platform adapter uses to address a thread or post.
pub type ElementRef = String;

/// The kind of conversation a confidence score or signal belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextKind {
    Dm,
    Mention,
    Space,
}

impl ContextKind {
    pub const ALL: [ContextKind; 3] = [ContextKind::Dm, ContextKind::Mention, ContextKind::Space];

    pub fn as_str(&self) -> &'static str {
        match self {
            ContextKind::Dm => "dm",
            ContextKind::Mention => "mention",
            ContextKind::Space => "space",
        }
    }
}

impl std::fmt::Display for ContextKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ContextKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "dm" => Ok(ContextKind::Dm),
            "mention" => Ok(ContextKind::Mention),
            "space" => Ok(ContextKind::Space),
            other => Err(format!("unknown context kind '{other}'")),
        }
    }
}
