use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use engage_core::{ContextKind, EngageError, Handle, Message, RawSignal, RawThread, Result, Segment};

/// Everything the response generator gets to write one reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComposeRequest {
    pub handle: Handle,
    pub context: ContextKind,
    /// The inbound text being answered.
    pub text: String,
    /// Recent conversation entries, oldest first.
    pub history: Vec<Message>,
    pub persona: Option<String>,
}

/// Which lens a live segment is analyzed through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisAspect {
    Technical,
    Social,
}

/// The social platform: reads inbound signals, emits replies.
///
/// Implementations map their own failures onto `EngageError`; returning
/// `Ok(false)` means the platform refused the action without a transport error.
#[async_trait]
pub trait PlatformAdapter: Send + Sync {
    /// Adapter name for logs.
    fn name(&self) -> &str;

    /// Make sure we are logged in. An error here stops the agent.
    async fn ensure_session(&self) -> Result<()> {
        Ok(())
    }

    async fn fetch_pending_requests(&self) -> Result<Vec<RawThread>>;

    async fn fetch_dm_threads(&self) -> Result<Vec<RawThread>>;

    async fn fetch_mentions(&self) -> Result<Vec<RawSignal>>;

    async fn send_dm(&self, thread_ref: &str, text: &str) -> Result<bool>;

    async fn reply_to_mention(&self, signal_ref: &str, text: &str) -> Result<bool>;

    async fn accept_request(&self, thread_ref: &str) -> Result<bool>;

    /// Publish a standalone post. Not every platform bridge supports it.
    async fn publish_post(&self, _text: &str) -> Result<bool> {
        Err(EngageError::Unsupported {
            platform: self.name().to_string(),
            operation: "publish_post".into(),
        })
    }

    /// Release platform resources on shutdown.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Writes replies and analyses. `Ok(None)` means "nothing to say this time".
#[async_trait]
pub trait ResponseGenerator: Send + Sync {
    fn name(&self) -> &str;

    async fn compose(&self, request: &ComposeRequest) -> Result<Option<String>>;

    async fn analyze(&self, _segment: &Segment, _aspect: AnalysisAspect) -> Result<Option<String>> {
        Ok(None)
    }

    /// Condense a batch of live-room notes into one summary.
    async fn summarize(&self, space: &str, entries: &[String]) -> Result<Option<String>>;
}

/// Live audio room: transcribed speech in, synthesized speech out.
#[async_trait]
pub trait SpeechIo: Send + Sync {
    /// Next transcribed segment, if one is ready. Must not wait for speech.
    async fn poll_transcript(&self) -> Result<Option<Segment>>;

    async fn speak(&self, text: &str) -> Result<bool>;
}
