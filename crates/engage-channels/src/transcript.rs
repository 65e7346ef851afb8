use async_trait::async_trait;
use chrono::Utc;
use std::io::SeekFrom;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tracing::warn;

use engage_core::{EngageError, Result, Segment};

use crate::adapter::SpeechIo;

/// Speech I/O over two JSONL files maintained by the audio pipeline.
///
/// Each transcript line is either a JSON `Segment` or plain text. Lines are
/// consumed once; a line without a trailing newline is still being written and
/// is left for the next poll.
pub struct TranscriptFeed {
    transcript: PathBuf,
    outbox: PathBuf,
    offset: Mutex<u64>,
}

impl TranscriptFeed {
    pub fn new(transcript: impl Into<PathBuf>, outbox: impl Into<PathBuf>) -> Self {
        Self {
            transcript: transcript.into(),
            outbox: outbox.into(),
            offset: Mutex::new(0),
        }
    }

    /// Skip everything already in the transcript (join a room mid-conversation).
    pub async fn seek_to_end(&self) -> Result<()> {
        let len = match tokio::fs::metadata(&self.transcript).await {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => return Err(EngageError::Speech(e.to_string())),
        };
        *self.offset.lock().await = len;
        Ok(())
    }
}

fn parse_line(line: &str) -> Option<Segment> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match serde_json::from_str::<Segment>(line) {
        Ok(segment) => Some(segment),
        Err(_) if !line.starts_with('{') => Some(Segment::new(None, line)),
        Err(e) => {
            warn!(error = %e, "skipping malformed transcript line");
            None
        }
    }
}

#[async_trait]
impl SpeechIo for TranscriptFeed {
    async fn poll_transcript(&self) -> Result<Option<Segment>> {
        let mut offset = self.offset.lock().await;
        let file = match tokio::fs::File::open(&self.transcript).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(EngageError::Speech(e.to_string())),
        };
        let mut reader = BufReader::new(file);
        reader
            .seek(SeekFrom::Start(*offset))
            .await
            .map_err(|e| EngageError::Speech(e.to_string()))?;

        // Skip blank and malformed lines within one poll.
        loop {
            let mut line = String::new();
            let read = reader
                .read_line(&mut line)
                .await
                .map_err(|e| EngageError::Speech(e.to_string()))?;
            if read == 0 || !line.ends_with('\n') {
                return Ok(None);
            }
            *offset += read as u64;
            if let Some(segment) = parse_line(&line) {
                return Ok(Some(segment));
            }
        }
    }

    async fn speak(&self, text: &str) -> Result<bool> {
        if let Some(parent) = self.outbox.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let line = serde_json::json!({ "text": text, "at": Utc::now().to_rfc3339() });
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.outbox)
            .await?;
        file.write_all(format!("{}\n", line).as_bytes()).await?;
        file.flush().await?;
        Ok(true)
    }
}
