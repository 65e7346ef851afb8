use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use engage_core::signal::normalize_text;
use engage_core::{EngageError, Handle, RawMessage, RawThread, Result, SignalId};

use crate::store::ConversationStore;

/// Durable record that a reply to a signal was emitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyLedgerEntry {
    pub signal_id: String,
    pub handle: Handle,
    pub emitted_at: DateTime<Utc>,
}

/// Decides whether an inbound signal has already been acted on.
///
/// Mentions are keyed by the provider's id. DMs have no stable id, so a DM is
/// handled when the thread's newest message is ours, or when its content hash is
/// in the ledger, our stored reply is still the newest DM and the fetched thread
/// shows nothing written after that reply.
#[derive(Clone)]
pub struct DedupLedger {
    store: Arc<ConversationStore>,
}

impl DedupLedger {
    pub fn new(store: Arc<ConversationStore>) -> Self {
        Self { store }
    }

    pub fn has_handled(&self, signal_id: &SignalId) -> bool {
        match signal_id {
            SignalId::Mention(id) => {
                self.contains(signal_id) || self.store.mention_replied(id)
            }
            SignalId::Dm { handle, .. } => {
                self.contains(signal_id)
                    && self
                        .store
                        .last_dm(handle)
                        .is_some_and(|m| m.is_from_us)
            }
        }
    }

    /// Full DM check against a freshly fetched thread.
    pub fn dm_thread_handled(&self, handle: &str, thread: &RawThread) -> bool {
        let Some(last) = thread.last_message() else {
            return true;
        };
        if last.is_from_us {
            return true;
        }
        let Some(text) = last.text.as_deref() else {
            return false;
        };
        // The ledger only stands in for a view that has not caught up with our reply.
        if self.written_after_our_reply(handle, thread, last) {
            return false;
        }
        self.has_handled(&SignalId::dm(handle, text))
    }

    /// True when the thread already shows our stored reply, or the inbound
    /// message is stamped later than it.
    fn written_after_our_reply(&self, handle: &str, thread: &RawThread, last: &RawMessage) -> bool {
        let Some(ours) = self.store.last_dm(handle).filter(|m| m.is_from_us) else {
            return false;
        };
        if let (Some(inbound_at), Some(replied_at)) = (last.timestamp, ours.timestamp) {
            if inbound_at > replied_at {
                return true;
            }
        }
        let reply = normalize_text(&ours.text);
        thread.messages.iter().any(|m| {
            m.is_from_us && m.text.as_deref().is_some_and(|t| normalize_text(t) == reply)
        })
    }

    /// Record that a reply was emitted. Recording the same id twice keeps one entry.
    pub fn record_handled(&self, signal_id: &SignalId, handle: &str) -> Result<()> {
        let db = self.store.db();
        let inserted = db
            .execute(
                "INSERT OR IGNORE INTO reply_ledger (signal_id, handle, emitted_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![signal_id.to_string(), handle, Utc::now().to_rfc3339()],
            )
            .map_err(|e| EngageError::Memory(e.to_string()))?;
        if inserted == 0 {
            debug!(signal_id = %signal_id, "signal already in reply ledger");
        }
        Ok(())
    }

    /// Newest entries first.
    pub fn entries(&self, limit: usize) -> Result<Vec<ReplyLedgerEntry>> {
        let db = self.store.db();
        let mut stmt = db
            .prepare(
                "SELECT signal_id, handle, emitted_at FROM reply_ledger
                 ORDER BY emitted_at DESC LIMIT ?1",
            )
            .map_err(|e| EngageError::Memory(e.to_string()))?;
        let rows = stmt
            .query_map(rusqlite::params![limit as i64], |row| {
                let emitted_at: String = row.get(2)?;
                Ok(ReplyLedgerEntry {
                    signal_id: row.get(0)?,
                    handle: row.get(1)?,
                    emitted_at: DateTime::parse_from_rfc3339(&emitted_at)
                        .map(|dt| dt.with_timezone(&Utc))
                        .unwrap_or_default(),
                })
            })
            .map_err(|e| EngageError::Memory(e.to_string()))?
            .filter_map(|r| match r {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!(error = %e, "skipping unreadable reply ledger row");
                    None
                }
            })
            .collect();
        Ok(rows)
    }

    pub fn len(&self) -> usize {
        let db = self.store.db();
        match db.query_row("SELECT COUNT(*) FROM reply_ledger", [], |row| row.get::<_, i64>(0)) {
            Ok(n) => n as usize,
            Err(e) => {
                warn!(error = %e, "reply ledger count failed");
                0
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn contains(&self, signal_id: &SignalId) -> bool {
        let db = self.store.db();
        let found = db.query_row(
            "SELECT 1 FROM reply_ledger WHERE signal_id = ?1",
            rusqlite::params![signal_id.to_string()],
            |_| Ok(()),
        );
        match found {
            Ok(()) => true,
            Err(rusqlite::Error::QueryReturnedNoRows) => false,
            Err(e) => {
                warn!(signal_id = %signal_id, error = %e, "reply ledger read failed, treating as unhandled");
                false
            }
        }
    }
}
