//! Scripted collaborators for deterministic testing.
//!
//! Each double returns pre-configured results without touching the network or
//! filesystem and records every call for assertions.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

use engage_core::{EngageError, RawMessage, RawSignal, RawThread, Result, Segment};

use crate::adapter::{AnalysisAspect, ComposeRequest, PlatformAdapter, ResponseGenerator, SpeechIo};

/// A call made against `ScriptedPlatform`.
#[derive(Debug, Clone, PartialEq)]
pub enum PlatformCall {
    EnsureSession,
    SendDm { thread_ref: String, text: String },
    Reply { signal_ref: String, text: String },
    Accept { thread_ref: String },
    Publish { text: String },
    Close,
}

/// A scripted outcome for one emit call.
#[derive(Debug, Clone)]
pub enum Outcome {
    Sent,
    Refused,
    Fail(String),
}

#[derive(Default)]
struct PlatformScript {
    requests: Vec<RawThread>,
    threads: Vec<RawThread>,
    mentions: Vec<RawSignal>,
    outcomes: VecDeque<Outcome>,
    fetch_failures: u32,
    session_error: Option<String>,
    /// When set, sent DMs do not show up in the thread on the next fetch.
    stale_view: bool,
}

/// A platform whose inbox is set up by the test.
#[derive(Clone, Default)]
pub struct ScriptedPlatform {
    script: Arc<Mutex<PlatformScript>>,
    /// Track all calls made (for assertions in tests).
    pub calls: Arc<Mutex<Vec<PlatformCall>>>,
}

impl ScriptedPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_request(self, handle: &str, thread_ref: &str, text: &str) -> Self {
        self.script.lock().requests.push(RawThread {
            handle: Some(handle.into()),
            thread_ref: thread_ref.into(),
            messages: vec![RawMessage::new(text, false)],
        });
        self
    }

    pub fn with_thread(self, thread: RawThread) -> Self {
        self.script.lock().threads.push(thread);
        self
    }

    /// A thread whose newest message comes from the counterparty.
    pub fn with_incoming_dm(self, handle: &str, thread_ref: &str, text: &str) -> Self {
        self.with_thread(RawThread {
            handle: Some(handle.into()),
            thread_ref: thread_ref.into(),
            messages: vec![RawMessage::new(text, false)],
        })
    }

    pub fn with_mention(self, signal: RawSignal) -> Self {
        self.script.lock().mentions.push(signal);
        self
    }

    pub fn with_outcome(self, outcome: Outcome) -> Self {
        self.script.lock().outcomes.push_back(outcome);
        self
    }

    /// Make the next `n` fetches fail.
    pub fn with_fetch_failures(self, n: u32) -> Self {
        self.script.lock().fetch_failures = n;
        self
    }

    pub fn with_session_error(self, reason: &str) -> Self {
        self.script.lock().session_error = Some(reason.into());
        self
    }

    pub fn with_stale_view(self) -> Self {
        self.script.lock().stale_view = true;
        self
    }

    /// Counterparty writes into an existing thread.
    pub fn push_incoming(&self, thread_ref: &str, text: &str) {
        let mut script = self.script.lock();
        if let Some(thread) = script.threads.iter_mut().find(|t| t.thread_ref == thread_ref) {
            thread.messages.push(RawMessage::new(text, false));
        }
    }

    pub fn recorded_calls(&self) -> Vec<PlatformCall> {
        self.calls.lock().clone()
    }

    pub fn count(&self, matches: impl Fn(&PlatformCall) -> bool) -> usize {
        self.calls.lock().iter().filter(|c| matches(c)).count()
    }

    fn record(&self, call: PlatformCall) {
        self.calls.lock().push(call);
    }

    fn fetch_gate(&self) -> Result<()> {
        let mut script = self.script.lock();
        if script.fetch_failures > 0 {
            script.fetch_failures -= 1;
            return Err(EngageError::platform("scripted", "fetch failed"));
        }
        Ok(())
    }

    fn next_outcome(&self) -> Result<bool> {
        match self.script.lock().outcomes.pop_front().unwrap_or(Outcome::Sent) {
            Outcome::Sent => Ok(true),
            Outcome::Refused => Ok(false),
            Outcome::Fail(reason) => Err(EngageError::platform("scripted", reason)),
        }
    }
}

#[async_trait]
impl PlatformAdapter for ScriptedPlatform {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn ensure_session(&self) -> Result<()> {
        self.record(PlatformCall::EnsureSession);
        match self.script.lock().session_error.clone() {
            Some(reason) => Err(EngageError::SessionUnavailable(reason)),
            None => Ok(()),
        }
    }

    async fn fetch_pending_requests(&self) -> Result<Vec<RawThread>> {
        self.fetch_gate()?;
        Ok(self.script.lock().requests.clone())
    }

    async fn fetch_dm_threads(&self) -> Result<Vec<RawThread>> {
        self.fetch_gate()?;
        Ok(self.script.lock().threads.clone())
    }

    async fn fetch_mentions(&self) -> Result<Vec<RawSignal>> {
        self.fetch_gate()?;
        Ok(self.script.lock().mentions.clone())
    }

    async fn send_dm(&self, thread_ref: &str, text: &str) -> Result<bool> {
        self.record(PlatformCall::SendDm {
            thread_ref: thread_ref.into(),
            text: text.into(),
        });
        let sent = self.next_outcome()?;
        let mut script = self.script.lock();
        if sent && !script.stale_view {
            if let Some(thread) = script.threads.iter_mut().find(|t| t.thread_ref == thread_ref) {
                thread.messages.push(RawMessage::new(text, true));
            }
        }
        Ok(sent)
    }

    async fn reply_to_mention(&self, signal_ref: &str, text: &str) -> Result<bool> {
        self.record(PlatformCall::Reply {
            signal_ref: signal_ref.into(),
            text: text.into(),
        });
        self.next_outcome()
    }

    async fn accept_request(&self, thread_ref: &str) -> Result<bool> {
        self.record(PlatformCall::Accept {
            thread_ref: thread_ref.into(),
        });
        let accepted = self.next_outcome()?;
        if accepted {
            let mut script = self.script.lock();
            if let Some(pos) = script.requests.iter().position(|t| t.thread_ref == thread_ref) {
                let thread = script.requests.remove(pos);
                script.threads.push(thread);
            }
        }
        Ok(accepted)
    }

    async fn publish_post(&self, text: &str) -> Result<bool> {
        self.record(PlatformCall::Publish { text: text.into() });
        self.next_outcome()
    }

    async fn close(&self) -> Result<()> {
        self.record(PlatformCall::Close);
        Ok(())
    }
}

/// A generator that replies from a queue, falling back to echoing the input.
#[derive(Clone, Default)]
pub struct ScriptedGenerator {
    replies: Arc<Mutex<VecDeque<Result<Option<String>>>>>,
    summaries: Arc<Mutex<VecDeque<Result<Option<String>>>>>,
    /// Track all compose requests received (for assertions in tests).
    pub requests: Arc<Mutex<Vec<ComposeRequest>>>,
    pub summarized: Arc<Mutex<Vec<Vec<String>>>>,
    pub analyses: Arc<Mutex<Vec<AnalysisAspect>>>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reply(self, text: &str) -> Self {
        self.replies.lock().push_back(Ok(Some(text.into())));
        self
    }

    /// Queue a "nothing to say" answer.
    pub fn with_silence(self) -> Self {
        self.replies.lock().push_back(Ok(None));
        self
    }

    pub fn with_error(self, reason: &str) -> Self {
        self.replies
            .lock()
            .push_back(Err(EngageError::Generator(reason.into())));
        self
    }

    pub fn with_summary_error(self, reason: &str) -> Self {
        self.summaries
            .lock()
            .push_back(Err(EngageError::Generator(reason.into())));
        self
    }

    pub fn recorded_requests(&self) -> Vec<ComposeRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl ResponseGenerator for ScriptedGenerator {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn compose(&self, request: &ComposeRequest) -> Result<Option<String>> {
        self.requests.lock().push(request.clone());
        match self.replies.lock().pop_front() {
            Some(reply) => reply,
            None => Ok(Some(format!("re: {}", request.text))),
        }
    }

    async fn analyze(&self, segment: &Segment, aspect: AnalysisAspect) -> Result<Option<String>> {
        self.analyses.lock().push(aspect);
        Ok(Some(format!("{}\n({:?} notes)", segment.text, aspect)))
    }

    async fn summarize(&self, _space: &str, entries: &[String]) -> Result<Option<String>> {
        self.summarized.lock().push(entries.to_vec());
        match self.summaries.lock().pop_front() {
            Some(summary) => summary,
            None => Ok(Some(format!("summary of {} notes", entries.len()))),
        }
    }
}

/// A live room that plays back queued segments and records what we said.
#[derive(Clone, Default)]
pub struct ScriptedSpeech {
    segments: Arc<Mutex<VecDeque<Segment>>>,
    pub spoken: Arc<Mutex<Vec<String>>>,
}

impl ScriptedSpeech {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_segment(self, speaker: &str, text: &str) -> Self {
        self.push(speaker, text);
        self
    }

    pub fn push(&self, speaker: &str, text: &str) {
        self.segments.lock().push_back(Segment::new(Some(speaker), text));
    }

    pub fn remaining(&self) -> usize {
        self.segments.lock().len()
    }

    pub fn spoken(&self) -> Vec<String> {
        self.spoken.lock().clone()
    }
}

#[async_trait]
impl SpeechIo for ScriptedSpeech {
    async fn poll_transcript(&self) -> Result<Option<Segment>> {
        Ok(self.segments.lock().pop_front())
    }

    async fn speak(&self, text: &str) -> Result<bool> {
        self.spoken.lock().push(text.to_string());
        Ok(true)
    }
}
