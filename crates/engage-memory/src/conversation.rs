use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use engage_core::message::lenient_timestamp;
use engage_core::{Handle, MentionRecord, Message};

/// Bookkeeping kept alongside a conversation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationMetadata {
    #[serde(default, deserialize_with = "lenient_timestamp::deserialize")]
    pub first_seen: Option<DateTime<Utc>>,
    #[serde(default)]
    pub total_interactions: u64,
    /// Operator-defined keys set through `update_metadata`.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Everything we remember about one counterparty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub handle: Handle,
    #[serde(default)]
    pub dms: Vec<Message>,
    #[serde(default)]
    pub mentions: Vec<MentionRecord>,
    #[serde(default, deserialize_with = "lenient_timestamp::deserialize")]
    pub last_interaction: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: ConversationMetadata,
    /// Consolidated summaries of live-room listening.
    #[serde(default)]
    pub summaries: Vec<Message>,
}

impl Conversation {
    pub fn new(handle: impl Into<Handle>) -> Self {
        Self {
            handle: handle.into(),
            dms: Vec::new(),
            mentions: Vec::new(),
            last_interaction: None,
            metadata: ConversationMetadata {
                first_seen: Some(Utc::now()),
                ..Default::default()
            },
            summaries: Vec::new(),
        }
    }

    fn touch(&mut self) {
        self.last_interaction = Some(Utc::now());
        self.metadata.total_interactions += 1;
    }

    pub fn push_dm(&mut self, message: Message) {
        self.dms.push(message);
        self.touch();
    }

    pub fn push_summary(&mut self, summary: Message) {
        self.summaries.push(summary);
        self.last_interaction = Some(Utc::now());
    }

    /// Insert or update a mention by id. Replied mentions are frozen; returns
    /// `false` when the record was left untouched for that reason.
    pub fn upsert_mention(&mut self, record: MentionRecord) -> bool {
        match self.mentions.iter_mut().find(|m| m.id == record.id) {
            Some(existing) if existing.is_reply => return false,
            Some(existing) => *existing = record,
            None => self.mentions.push(record),
        }
        self.touch();
        true
    }

    pub fn has_replied_to(&self, mention_id: &str) -> bool {
        self.mentions
            .iter()
            .any(|m| m.id == mention_id && m.is_reply)
    }

    pub fn last_dm(&self) -> Option<&Message> {
        self.dms.last()
    }

    /// The newest `limit` entries across DMs and mentions, oldest first.
    /// Entries without a timestamp sort before everything else.
    pub fn recent_context(&self, limit: usize) -> Vec<Message> {
        let mut merged: Vec<Message> = self
            .dms
            .iter()
            .cloned()
            .chain(self.mentions.iter().map(MentionRecord::as_message))
            .collect();
        // Stable: ties keep insertion order.
        merged.sort_by_key(|m| m.timestamp);
        let skip = merged.len().saturating_sub(limit);
        merged.split_off(skip)
    }
}
