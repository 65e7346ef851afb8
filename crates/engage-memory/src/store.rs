use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::Connection;
use tracing::{debug, info, warn};

use engage_core::{EngageError, Handle, MentionRecord, Message, Result};

use crate::conversation::{Conversation, ConversationMetadata};
use crate::post_queue::PostQueue;

/// Outcome of a conversation mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStatus {
    /// Applied in memory and written to SQLite.
    Persisted,
    /// Applied in memory; the write failed and will be retried.
    Deferred,
    /// Not applied (a replied mention is immutable).
    Ignored,
}

#[derive(Default)]
struct StoreState {
    conversations: HashMap<Handle, Conversation>,
    /// Handles whose in-memory state is ahead of SQLite. A dirty handle with no
    /// conversation is a pending delete.
    dirty: HashSet<Handle>,
}

/// Durable per-handle conversation memory.
pub struct ConversationStore {
    state: Mutex<StoreState>,
    db: Arc<Mutex<Connection>>,
}

impl ConversationStore {
    /// Open or create the store at the given path. Failure here means storage is
    /// unusable and the agent must not start.
    pub fn open(path: &Path) -> Result<Self> {
        info!(?path, "opening conversation store");

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                EngageError::Fatal(format!("cannot create {}: {}", parent.display(), e))
            })?;
        }

        let conn = Connection::open(path)
            .map_err(|e| EngageError::Fatal(format!("cannot open {}: {}", path.display(), e)))?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| EngageError::Memory(e.to_string()))?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS conversations (
                handle TEXT PRIMARY KEY,
                data_json TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS reply_ledger (
                signal_id TEXT PRIMARY KEY,
                handle TEXT NOT NULL,
                emitted_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_ledger_handle ON reply_ledger(handle);

            CREATE TABLE IF NOT EXISTS posts (
                id TEXT PRIMARY KEY,
                text TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                error TEXT,
                created_at TEXT NOT NULL,
                posted_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_posts_status ON posts(status);
            ",
        )
        .map_err(|e| EngageError::Fatal(format!("storage is not writable: {}", e)))?;

        let store = Self {
            state: Mutex::new(StoreState::default()),
            db: Arc::new(Mutex::new(conn)),
        };

        match store.load_all() {
            Ok(handles) => {
                if !handles.is_empty() {
                    info!(count = handles.len(), "loaded conversations from SQLite");
                }
            }
            Err(e) => warn!(error = %e, "failed to load conversations, starting empty"),
        }

        Ok(store)
    }

    /// Open an in-memory database (for tests).
    pub fn open_in_memory() -> Result<Self> {
        Self::open(Path::new(":memory:"))
    }

    /// Get a reference to the raw database connection (for advanced queries).
    pub fn db(&self) -> parking_lot::MutexGuard<'_, Connection> {
        self.db.lock()
    }

    /// Queue of outbound posts sharing this database.
    pub fn post_queue(&self) -> PostQueue {
        PostQueue::new(Arc::clone(&self.db))
    }

    /// Rebuild the in-memory map from SQLite. Records that fail to parse are
    /// skipped. Returns the handles that loaded.
    pub fn load_all(&self) -> Result<Vec<Handle>> {
        let rows: Vec<(String, String)> = {
            let db = self.db.lock();
            let mut stmt = db
                .prepare("SELECT handle, data_json FROM conversations")
                .map_err(|e| EngageError::Memory(e.to_string()))?;
            stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
                .map_err(|e| EngageError::Memory(e.to_string()))?
                .filter_map(|r| match r {
                    Ok(row) => Some(row),
                    Err(e) => {
                        warn!(error = %e, "skipping unreadable conversation row");
                        None
                    }
                })
                .collect()
        };

        let mut loaded = HashMap::with_capacity(rows.len());
        for (handle, json) in rows {
            match serde_json::from_str::<Conversation>(&json) {
                Ok(conversation) => {
                    loaded.insert(handle, conversation);
                }
                Err(e) => warn!(handle = %handle, error = %e, "skipping corrupt conversation record"),
            }
        }

        let mut handles: Vec<Handle> = loaded.keys().cloned().collect();
        handles.sort();
        let mut state = self.state.lock();
        state.conversations = loaded;
        state.dirty.clear();
        Ok(handles)
    }

    /// Snapshot of the conversation for `handle`, creating an empty one on first use.
    pub fn get_or_create(&self, handle: &str) -> Conversation {
        {
            let state = self.state.lock();
            if let Some(conversation) = state.conversations.get(handle) {
                return conversation.clone();
            }
        }
        debug!(handle, "creating conversation");
        self.mutate(handle, |_| true);
        self.get(handle)
            .unwrap_or_else(|| Conversation::new(handle))
    }

    /// Snapshot of an existing conversation.
    pub fn get(&self, handle: &str) -> Option<Conversation> {
        self.state.lock().conversations.get(handle).cloned()
    }

    pub fn append_dm(&self, handle: &str, message: Message) -> WriteStatus {
        self.mutate(handle, |c| {
            c.push_dm(message);
            true
        })
    }

    /// Append or update a mention. A mention that was already replied to is never overwritten.
    pub fn append_mention(&self, handle: &str, record: MentionRecord) -> WriteStatus {
        let id = record.id.clone();
        let status = self.mutate(handle, |c| c.upsert_mention(record));
        if status == WriteStatus::Ignored {
            debug!(handle, mention_id = %id, "mention already replied, leaving record untouched");
        }
        status
    }

    pub fn append_summary(&self, handle: &str, summary: Message) -> WriteStatus {
        self.mutate(handle, |c| {
            c.push_summary(summary);
            true
        })
    }

    pub fn update_metadata(&self, handle: &str, key: &str, value: serde_json::Value) -> WriteStatus {
        self.mutate(handle, |c| {
            c.metadata.extra.insert(key.to_string(), value);
            true
        })
    }

    pub fn recent_context(&self, handle: &str, limit: usize) -> Vec<Message> {
        self.state
            .lock()
            .conversations
            .get(handle)
            .map(|c| c.recent_context(limit))
            .unwrap_or_default()
    }

    /// DM history, newest `limit` entries (all when `None`), oldest first.
    pub fn dm_history(&self, handle: &str, limit: Option<usize>) -> Vec<Message> {
        let state = self.state.lock();
        let Some(c) = state.conversations.get(handle) else {
            return Vec::new();
        };
        let skip = limit.map_or(0, |l| c.dms.len().saturating_sub(l));
        c.dms[skip..].to_vec()
    }

    pub fn mention_history(&self, handle: &str, limit: Option<usize>) -> Vec<MentionRecord> {
        let state = self.state.lock();
        let Some(c) = state.conversations.get(handle) else {
            return Vec::new();
        };
        let skip = limit.map_or(0, |l| c.mentions.len().saturating_sub(l));
        c.mentions[skip..].to_vec()
    }

    pub fn last_dm(&self, handle: &str) -> Option<Message> {
        self.state
            .lock()
            .conversations
            .get(handle)
            .and_then(|c| c.last_dm().cloned())
    }

    pub fn metadata(&self, handle: &str) -> Option<ConversationMetadata> {
        self.state
            .lock()
            .conversations
            .get(handle)
            .map(|c| c.metadata.clone())
    }

    /// Whether any conversation holds a replied mention with this id.
    pub fn mention_replied(&self, mention_id: &str) -> bool {
        self.state
            .lock()
            .conversations
            .values()
            .any(|c| c.has_replied_to(mention_id))
    }

    pub fn handles(&self) -> Vec<Handle> {
        let mut handles: Vec<Handle> = self.state.lock().conversations.keys().cloned().collect();
        handles.sort();
        handles
    }

    /// Forget one conversation, or all of them.
    pub fn clear(&self, handle: Option<&str>) -> WriteStatus {
        let mut state = self.state.lock();
        let removed: Vec<Handle> = match handle {
            Some(h) => state.conversations.remove(h).map(|c| c.handle).into_iter().collect(),
            None => state.conversations.drain().map(|(h, _)| h).collect(),
        };
        if removed.is_empty() {
            return WriteStatus::Ignored;
        }
        info!(count = removed.len(), "clearing conversations");
        state.dirty.extend(removed.iter().cloned());
        self.flush_locked(&mut state);
        if removed.iter().any(|h| state.dirty.contains(h)) {
            WriteStatus::Deferred
        } else {
            WriteStatus::Persisted
        }
    }

    /// Retry every deferred write. Returns how many handles are still pending.
    pub fn flush(&self) -> usize {
        let mut state = self.state.lock();
        self.flush_locked(&mut state)
    }

    /// Handles whose latest state has not reached SQLite yet.
    pub fn pending_writes(&self) -> usize {
        self.state.lock().dirty.len()
    }

    fn mutate<F>(&self, handle: &str, apply: F) -> WriteStatus
    where
        F: FnOnce(&mut Conversation) -> bool,
    {
        let mut state = self.state.lock();
        let conversation = state
            .conversations
            .entry(handle.to_string())
            .or_insert_with(|| Conversation::new(handle));
        if !apply(conversation) {
            return WriteStatus::Ignored;
        }
        state.dirty.insert(handle.to_string());
        self.flush_locked(&mut state);
        if state.dirty.contains(handle) {
            WriteStatus::Deferred
        } else {
            WriteStatus::Persisted
        }
    }

    fn flush_locked(&self, state: &mut StoreState) -> usize {
        if state.dirty.is_empty() {
            return 0;
        }
        let db = self.db.lock();
        let pending: Vec<Handle> = state.dirty.iter().cloned().collect();
        for handle in pending {
            let result = match state.conversations.get(&handle) {
                Some(conversation) => write_conversation(&db, conversation),
                None => delete_conversation(&db, &handle),
            };
            match result {
                Ok(()) => {
                    state.dirty.remove(&handle);
                }
                Err(e) => {
                    warn!(handle = %handle, error = %e, "conversation write failed, will retry");
                }
            }
        }
        state.dirty.len()
    }
}

fn write_conversation(db: &Connection, conversation: &Conversation) -> Result<()> {
    let json = serde_json::to_string(conversation)?;
    db.execute(
        "INSERT INTO conversations (handle, data_json, updated_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(handle) DO UPDATE SET data_json = excluded.data_json, updated_at = excluded.updated_at",
        rusqlite::params![conversation.handle, json, Utc::now().to_rfc3339()],
    )
    .map_err(|e| EngageError::Memory(e.to_string()))?;
    Ok(())
}

fn delete_conversation(db: &Connection, handle: &str) -> Result<()> {
    db.execute(
        "DELETE FROM conversations WHERE handle = ?1",
        rusqlite::params![handle],
    )
    .map_err(|e| EngageError::Memory(e.to_string()))?;
    Ok(())
}
