//! File-bridged platform adapter.
//!
//! An external scraper keeps three JSON arrays up to date inside the inbox
//! directory: `requests.json` (pending message requests), `threads.json`
//! (accepted DM threads) and `mentions.json`. Every action we take is appended
//! to `outbox.jsonl` for the scraper to perform, and DM sends/accepts are
//! reflected back into the thread files so the next fetch sees them.

use async_trait::async_trait;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use engage_core::{EngageError, RawMessage, RawSignal, RawThread, Result};

use crate::adapter::PlatformAdapter;

const REQUESTS: &str = "requests.json";
const THREADS: &str = "threads.json";
const MENTIONS: &str = "mentions.json";
const OUTBOX: &str = "outbox.jsonl";

pub struct FileInbox {
    dir: PathBuf,
    /// Serializes read-modify-write cycles on the inbox files.
    lock: Mutex<()>,
}

impl FileInbox {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn read_list<T: DeserializeOwned>(&self, file: &str) -> Result<Vec<T>> {
        let path = self.dir.join(file);
        match tokio::fs::read_to_string(&path).await {
            Ok(raw) if raw.trim().is_empty() => Ok(Vec::new()),
            Ok(raw) => serde_json::from_str(&raw).map_err(|e| {
                EngageError::platform("inbox", format!("{}: {}", path.display(), e))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(EngageError::platform("inbox", format!("{}: {}", path.display(), e))),
        }
    }

    /// Write through a temp file and rename so the scraper never sees a torn file.
    async fn write_list<T: Serialize>(&self, file: &str, items: &[T]) -> Result<()> {
        let path = self.dir.join(file);
        let tmp = self.dir.join(format!(".{}.tmp", file));
        let json = serde_json::to_string_pretty(items)?;
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn move_to_threads(&self, accepted: RawThread, remaining: &[RawThread]) -> Result<()> {
        let mut threads: Vec<RawThread> = self.read_list(THREADS).await?;
        threads.push(accepted);
        self.write_list(THREADS, &threads).await?;
        self.write_list(REQUESTS, remaining).await
    }

    async fn append_outbox(&self, action: &str, target: Option<&str>, text: Option<&str>) -> Result<()> {
        let line = serde_json::json!({
            "action": action,
            "target": target,
            "text": text,
            "at": Utc::now().to_rfc3339(),
        });
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.dir.join(OUTBOX))
            .await?;
        file.write_all(format!("{}\n", line).as_bytes()).await?;
        file.flush().await?;
        debug!(action, ?target, "outbox entry written");
        Ok(())
    }
}

#[async_trait]
impl PlatformAdapter for FileInbox {
    fn name(&self) -> &str {
        "inbox"
    }

    async fn ensure_session(&self) -> Result<()> {
        match tokio::fs::metadata(&self.dir).await {
            Ok(meta) if meta.is_dir() => {
                info!(dir = %self.dir.display(), "inbox bridge ready");
                Ok(())
            }
            _ => Err(EngageError::SessionUnavailable(format!(
                "inbox directory {} does not exist",
                self.dir.display()
            ))),
        }
    }

    async fn fetch_pending_requests(&self) -> Result<Vec<RawThread>> {
        let _guard = self.lock.lock().await;
        self.read_list(REQUESTS).await
    }

    async fn fetch_dm_threads(&self) -> Result<Vec<RawThread>> {
        let _guard = self.lock.lock().await;
        self.read_list(THREADS).await
    }

    async fn fetch_mentions(&self) -> Result<Vec<RawSignal>> {
        let _guard = self.lock.lock().await;
        self.read_list(MENTIONS).await
    }

    async fn send_dm(&self, thread_ref: &str, text: &str) -> Result<bool> {
        let _guard = self.lock.lock().await;
        let mut threads: Vec<RawThread> = self.read_list(THREADS).await?;
        let Some(thread) = threads.iter_mut().find(|t| t.thread_ref == thread_ref) else {
            return Ok(false);
        };
        self.append_outbox("send_dm", Some(thread_ref), Some(text)).await?;
        thread.messages.push(RawMessage::new(text, true));
        // Emitted from here on: a failed reflection must not trigger a resend.
        if let Err(e) = self.write_list(THREADS, &threads).await {
            warn!(thread = thread_ref, error = %e, "sent DM not reflected into threads file");
        }
        Ok(true)
    }

    async fn reply_to_mention(&self, signal_ref: &str, text: &str) -> Result<bool> {
        let _guard = self.lock.lock().await;
        self.append_outbox("reply", Some(signal_ref), Some(text)).await?;
        Ok(true)
    }

    async fn accept_request(&self, thread_ref: &str) -> Result<bool> {
        let _guard = self.lock.lock().await;
        let mut requests: Vec<RawThread> = self.read_list(REQUESTS).await?;
        let Some(pos) = requests.iter().position(|t| t.thread_ref == thread_ref) else {
            return Ok(false);
        };
        self.append_outbox("accept_request", Some(thread_ref), None).await?;
        let accepted = requests.remove(pos);
        if let Err(e) = self.move_to_threads(accepted, &requests).await {
            warn!(thread = thread_ref, error = %e, "accepted request not reflected into inbox files");
        }
        Ok(true)
    }

    async fn publish_post(&self, text: &str) -> Result<bool> {
        let _guard = self.lock.lock().await;
        self.append_outbox("post", None, Some(text)).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thread(handle: &str, thread_ref: &str, text: &str) -> RawThread {
        RawThread {
            handle: Some(handle.into()),
            thread_ref: thread_ref.into(),
            messages: vec![RawMessage::new(text, false)],
        }
    }

    #[tokio::test]
    async fn test_missing_files_read_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let inbox = FileInbox::new(dir.path());
        inbox.ensure_session().await.unwrap();
        assert!(inbox.fetch_dm_threads().await.unwrap().is_empty());
        assert!(inbox.fetch_mentions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_dir_is_a_session_failure() {
        let dir = tempfile::tempdir().unwrap();
        let inbox = FileInbox::new(dir.path().join("nope"));
        let err = inbox.ensure_session().await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_accept_moves_request_into_threads() {
        let dir = tempfile::tempdir().unwrap();
        let inbox = FileInbox::new(dir.path());
        inbox.write_list(REQUESTS, &[thread("alice", "r1", "hi")]).await.unwrap();

        assert!(inbox.accept_request("r1").await.unwrap());
        assert!(!inbox.accept_request("r1").await.unwrap());
        assert!(inbox.fetch_pending_requests().await.unwrap().is_empty());
        let threads = inbox.fetch_dm_threads().await.unwrap();
        assert_eq!(threads[0].handle.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn test_send_dm_reflects_into_thread_and_outbox() {
        let dir = tempfile::tempdir().unwrap();
        let inbox = FileInbox::new(dir.path());
        inbox.write_list(THREADS, &[thread("bob", "t1", "question?")]).await.unwrap();

        assert!(inbox.send_dm("t1", "answer!").await.unwrap());
        assert!(!inbox.send_dm("unknown", "x").await.unwrap());

        let threads = inbox.fetch_dm_threads().await.unwrap();
        assert!(threads[0].last_message().unwrap().is_from_us);
        let outbox = std::fs::read_to_string(dir.path().join(OUTBOX)).unwrap();
        assert_eq!(outbox.lines().count(), 1);
        assert!(outbox.contains("answer!"));
    }

    #[tokio::test]
    async fn test_emit_stands_when_reflection_fails() {
        let dir = tempfile::tempdir().unwrap();
        let inbox = FileInbox::new(dir.path());
        inbox.write_list(THREADS, &[thread("bob", "t1", "question?")]).await.unwrap();
        inbox.write_list(REQUESTS, &[thread("carol", "r1", "hi")]).await.unwrap();
        // A directory in place of the temp file makes every threads rewrite fail
        std::fs::create_dir(dir.path().join(format!(".{}.tmp", THREADS))).unwrap();

        assert!(inbox.send_dm("t1", "answer!").await.unwrap());
        assert!(inbox.accept_request("r1").await.unwrap());

        let outbox = std::fs::read_to_string(dir.path().join(OUTBOX)).unwrap();
        assert_eq!(outbox.lines().count(), 2);
        assert_eq!(outbox.matches("answer!").count(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_a_platform_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(MENTIONS), "[{").unwrap();
        let inbox = FileInbox::new(dir.path());
        let err = inbox.fetch_mentions().await.unwrap_err();
        assert!(!err.is_fatal());
    }
}
