use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use std::sync::Arc;
use tokio::sync::broadcast;

use crate::types::{ContextKind, Handle, SessionId};

/// Engagement lifecycle events, published for observers (CLI, logs, tests).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Event {
    // ── Signal lifecycle ───────────────────────────────────────
    SignalReceived {
        context: ContextKind,
        handle: Handle,
        signal_id: String,
    },
    ReplySent {
        context: ContextKind,
        handle: Handle,
        signal_id: String,
    },
    ReplySkipped {
        context: ContextKind,
        handle: Handle,
        reason: String,
    },
    RequestAccepted {
        handle: Handle,
    },
    PostPublished {
        post_id: String,
    },

    // ── Cycle lifecycle ────────────────────────────────────────
    CycleCompleted {
        cycle: u64,
        replies: usize,
        skipped: usize,
    },
    CycleFailed {
        cycle: u64,
        error: String,
        backoff_secs: u64,
    },

    // ── Stream lifecycle ───────────────────────────────────────
    StreamStarted {
        session_id: SessionId,
        space: Handle,
    },
    SpokeInSpace {
        session_id: SessionId,
        space: Handle,
    },
    MemoryConsolidated {
        session_id: SessionId,
        space: Handle,
        records: usize,
    },
    StreamStopped {
        session_id: SessionId,
    },

    // ── System ─────────────────────────────────────────────────
    Heartbeat {
        timestamp: DateTime<Utc>,
    },
    Shutdown,
}

/// A broadcast-based event bus for system-wide pub/sub.
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<Event>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn publish(&self, event: Event) {
        // Ignore send errors (no subscribers).
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
