use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

use engage_confidence::{ConfidenceEngine, ConfidencePolicy, Interests};
use engage_config::EngageConfig;
use engage_core::{ContextKind, Handle};

/// What the attention stage currently believes about a live room.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Attention {
    /// Most recent speakers first.
    pub salient_speakers: Vec<String>,
    pub topic: Option<String>,
    pub relevant: bool,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Process-lifetime engagement state shared by the orchestrator and the stream
/// scheduler: confidence scores, the persona's interests, and per-room speaking
/// and attention state.
pub struct EngagementState {
    pub confidence: ConfidenceEngine,
    pub interests: Interests,
    last_spoke: RwLock<HashMap<Handle, Instant>>,
    attention: RwLock<HashMap<Handle, Attention>>,
}

impl EngagementState {
    pub fn new(confidence: ConfidenceEngine, interests: Interests) -> Self {
        Self {
            confidence,
            interests,
            last_spoke: RwLock::new(HashMap::new()),
            attention: RwLock::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &EngageConfig) -> Self {
        Self::new(
            ConfidenceEngine::new(ConfidencePolicy::from(&config.confidence)),
            Interests::new(&config.agent.interests),
        )
    }

    pub fn mark_spoke(&self, space: &str) {
        self.last_spoke.write().insert(space.to_string(), Instant::now());
    }

    /// Time left before we may speak again in `space`, if any.
    pub fn cooldown_remaining(&self, space: &str, cooldown: Duration) -> Option<Duration> {
        let last = *self.last_spoke.read().get(space)?;
        cooldown.checked_sub(last.elapsed()).filter(|d| !d.is_zero())
    }

    pub fn attention(&self, space: &str) -> Option<Attention> {
        self.attention.read().get(space).cloned()
    }

    pub fn set_attention(&self, space: &str, attention: Attention) {
        self.confidence
            .observe_relevance(space, ContextKind::Space, attention.relevant);
        self.attention.write().insert(space.to_string(), attention);
    }

    /// Forget everything tied to a live room, including its confidence.
    pub fn leave_space(&self, space: &str) {
        self.confidence.reset(space, ContextKind::Space);
        self.last_spoke.write().remove(space);
        self.attention.write().remove(space);
    }
}

impl Default for EngagementState {
    fn default() -> Self {
        Self::new(ConfidenceEngine::default(), Interests::default())
    }
}
