use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use engage_core::{EngageError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostStatus {
    Pending,
    Posted,
    Failed,
}

impl PostStatus {
    fn as_str(&self) -> &'static str {
        match self {
            PostStatus::Pending => "pending",
            PostStatus::Posted => "posted",
            PostStatus::Failed => "failed",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "posted" => PostStatus::Posted,
            "failed" => PostStatus::Failed,
            _ => PostStatus::Pending,
        }
    }
}

/// An outbound post waiting for (or done with) publication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedPost {
    pub id: String,
    pub text: String,
    pub status: PostStatus,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub posted_at: Option<DateTime<Utc>>,
}

/// FIFO queue of outbound posts, stored next to the conversations.
#[derive(Clone)]
pub struct PostQueue {
    db: Arc<Mutex<Connection>>,
}

impl PostQueue {
    pub(crate) fn new(db: Arc<Mutex<Connection>>) -> Self {
        Self { db }
    }

    pub fn enqueue(&self, text: &str) -> Result<QueuedPost> {
        let post = QueuedPost {
            id: Uuid::new_v4().to_string(),
            text: text.to_string(),
            status: PostStatus::Pending,
            error: None,
            created_at: Utc::now(),
            posted_at: None,
        };
        self.db
            .lock()
            .execute(
                "INSERT INTO posts (id, text, status, created_at) VALUES (?1, ?2, 'pending', ?3)",
                rusqlite::params![post.id, post.text, post.created_at.to_rfc3339()],
            )
            .map_err(|e| EngageError::Memory(e.to_string()))?;
        info!(post_id = %post.id, "queued post");
        Ok(post)
    }

    /// Oldest pending post.
    pub fn next_pending(&self) -> Result<Option<QueuedPost>> {
        Ok(self
            .query("WHERE status = 'pending' ORDER BY created_at ASC LIMIT 1", 1)?
            .pop())
    }

    pub fn mark_posted(&self, id: &str) -> Result<()> {
        self.set_status(id, PostStatus::Posted, None)
    }

    pub fn mark_failed(&self, id: &str, error: &str) -> Result<()> {
        self.set_status(id, PostStatus::Failed, Some(error))
    }

    /// When the most recent post went out.
    pub fn last_posted_at(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .query("WHERE status = 'posted' ORDER BY posted_at DESC LIMIT 1", 1)?
            .pop()
            .and_then(|p| p.posted_at))
    }

    /// Newest posts first.
    pub fn list(&self, limit: usize) -> Result<Vec<QueuedPost>> {
        self.query("ORDER BY created_at DESC LIMIT ?1", limit)
    }

    pub fn pending_count(&self) -> Result<usize> {
        self.db
            .lock()
            .query_row("SELECT COUNT(*) FROM posts WHERE status = 'pending'", [], |row| {
                row.get::<_, i64>(0)
            })
            .map(|n| n as usize)
            .map_err(|e| EngageError::Memory(e.to_string()))
    }

    fn set_status(&self, id: &str, status: PostStatus, error: Option<&str>) -> Result<()> {
        let posted_at = (status == PostStatus::Posted).then(|| Utc::now().to_rfc3339());
        let rows = self
            .db
            .lock()
            .execute(
                "UPDATE posts SET status = ?2, error = ?3, posted_at = COALESCE(?4, posted_at) WHERE id = ?1",
                rusqlite::params![id, status.as_str(), error, posted_at],
            )
            .map_err(|e| EngageError::Memory(e.to_string()))?;
        if rows == 0 {
            return Err(EngageError::Memory(format!("post not found: {}", id)));
        }
        Ok(())
    }

    fn query(&self, clause: &str, limit: usize) -> Result<Vec<QueuedPost>> {
        let db = self.db.lock();
        let sql = format!(
            "SELECT id, text, status, error, created_at, posted_at FROM posts {}",
            clause
        );
        let mut stmt = db
            .prepare(&sql)
            .map_err(|e| EngageError::Memory(e.to_string()))?;
        let params: Vec<i64> = if clause.contains("?1") {
            vec![limit as i64]
        } else {
            Vec::new()
        };
        let rows = stmt
            .query_map(rusqlite::params_from_iter(params), |row| {
                let status: String = row.get(2)?;
                let created_at: String = row.get(4)?;
                let posted_at: Option<String> = row.get(5)?;
                Ok(QueuedPost {
                    id: row.get(0)?,
                    text: row.get(1)?,
                    status: PostStatus::parse(&status),
                    error: row.get(3)?,
                    created_at: parse_ts(&created_at).unwrap_or_default(),
                    posted_at: posted_at.as_deref().and_then(parse_ts),
                })
            })
            .map_err(|e| EngageError::Memory(e.to_string()))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }
}

fn parse_ts(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
