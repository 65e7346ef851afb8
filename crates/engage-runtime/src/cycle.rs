//! Discrete engagement cycles.
//!
//! Each cycle walks the platform's inbound signals phase by phase:
//!
//! ```text
//! [Post] → Requests → Dm → Mention → Idle
//! ```
//!
//! Every surviving signal goes through the same pipeline: dedup ledger,
//! confidence gate, response generator, platform emit (retried), then the
//! ledger entry, memory append and confidence interaction on success.

use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use engage_channels::{ComposeRequest, PlatformAdapter, ResponseGenerator};
use engage_config::{CycleConfig, EngageConfig};
use engage_core::signal::normalize_text;
use engage_core::{
    ContextKind, EngageError, Event, EventBus, MentionRecord, Message, RawSignal, RawThread,
    Result, SignalId,
};
use engage_memory::{ConversationStore, DedupLedger};

use crate::retry::RetryPolicy;
use crate::state::EngagementState;

const REQUEST_ACCEPTED: &str = "Message request accepted";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Post,
    Requests,
    Dm,
    Mention,
    Idle,
}

/// What one cycle did.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CycleReport {
    pub cycle: u64,
    pub posts_published: usize,
    pub requests_accepted: usize,
    pub dm_replies: usize,
    pub mention_replies: usize,
    /// Signals already handled before this cycle.
    pub deduplicated: usize,
    /// Signals we chose or failed to answer this time.
    pub skipped: usize,
    /// Signals missing an id, handle or text.
    pub malformed: usize,
}

impl CycleReport {
    pub fn replies(&self) -> usize {
        self.dm_replies + self.mention_replies
    }
}

/// Outcome of one signal's trip through the reply pipeline.
enum Handled {
    Replied,
    Skipped,
}

/// The outer control loop for discrete engagement.
pub struct CycleOrchestrator {
    config: RwLock<CycleConfig>,
    live: Option<Arc<RwLock<EngageConfig>>>,
    persona: Option<String>,
    platform: Arc<dyn PlatformAdapter>,
    generator: Arc<dyn ResponseGenerator>,
    store: Arc<ConversationStore>,
    ledger: DedupLedger,
    state: Arc<EngagementState>,
    retry: RetryPolicy,
    events: EventBus,
    stop: CancellationToken,
    cycles: AtomicU64,
}

impl CycleOrchestrator {
    pub fn new(
        config: &EngageConfig,
        platform: Arc<dyn PlatformAdapter>,
        generator: Arc<dyn ResponseGenerator>,
        store: Arc<ConversationStore>,
        state: Arc<EngagementState>,
        events: EventBus,
    ) -> Self {
        Self {
            config: RwLock::new(config.cycle.clone()),
            live: None,
            persona: config.agent.persona.clone(),
            platform,
            generator,
            ledger: DedupLedger::new(store.clone()),
            store,
            state,
            retry: RetryPolicy::from(&config.retry),
            events,
            stop: CancellationToken::new(),
            cycles: AtomicU64::new(0),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Pick up `[cycle]` changes from a hot-reloaded config at the start of each cycle.
    pub fn with_live_config(mut self, live: Arc<RwLock<EngageConfig>>) -> Self {
        self.live = Some(live);
        self
    }

    /// Cancel this token to stop the loop after the current cycle.
    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    pub fn ledger(&self) -> &DedupLedger {
        &self.ledger
    }

    pub fn cycles_run(&self) -> u64 {
        self.cycles.load(Ordering::SeqCst)
    }

    /// Establish the platform session, then run cycles until stopped.
    ///
    /// A session that cannot be established is fatal and no cycle runs.
    pub async fn run(&self) -> Result<()> {
        self.establish_session().await?;

        info!(platform = self.platform.name(), "engagement loop started");
        let mut failures: u32 = 0;
        let mut outcome = Ok(());

        while !self.stop.is_cancelled() {
            let wait = match self.run_cycle().await {
                Ok(report) => {
                    failures = 0;
                    info!(
                        cycle = report.cycle,
                        replies = report.replies(),
                        accepted = report.requests_accepted,
                        skipped = report.skipped,
                        "cycle complete"
                    );
                    self.events.publish(Event::CycleCompleted {
                        cycle: report.cycle,
                        replies: report.replies(),
                        skipped: report.skipped,
                    });
                    self.idle_delay()
                }
                Err(e) if e.is_fatal() => {
                    error!(error = %e, "fatal error, stopping engagement loop");
                    outcome = Err(e);
                    break;
                }
                Err(e) => {
                    failures += 1;
                    let backoff = self.error_backoff(failures);
                    let cycle = self.cycles_run();
                    error!(
                        cycle,
                        failures,
                        backoff_secs = backoff.as_secs(),
                        error = %e,
                        "cycle failed"
                    );
                    self.events.publish(Event::CycleFailed {
                        cycle,
                        error: e.to_string(),
                        backoff_secs: backoff.as_secs(),
                    });
                    backoff
                }
            };

            debug!(phase = ?Phase::Idle, wait_ms = wait.as_millis() as u64, "idling");
            tokio::select! {
                _ = self.stop.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }
        }

        self.shutdown().await;
        outcome
    }

    /// Run one full cycle. Fetch failures abort the cycle; per-signal failures
    /// only skip that signal.
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let cycle = self.cycles.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(live) = &self.live {
            let fresh = live.read().cycle.clone();
            *self.config.write() = fresh;
        }
        let mut report = CycleReport {
            cycle,
            ..Default::default()
        };
        debug!(cycle, "cycle starting");

        if self.post_due()? {
            self.post_phase(&mut report).await?;
            self.phase_pause().await;
        }
        self.requests_phase(&mut report).await?;
        self.phase_pause().await;
        self.dm_phase(&mut report).await?;
        self.phase_pause().await;
        self.mention_phase(&mut report).await?;

        Ok(report)
    }

    // ── Phases ─────────────────────────────────────────────────

    fn post_due(&self) -> Result<bool> {
        let interval = self.config.read().post_interval_secs;
        if interval == 0 {
            return Ok(false);
        }
        let queue = self.store.post_queue();
        if queue.pending_count()? == 0 {
            return Ok(false);
        }
        let due = match queue.last_posted_at()? {
            Some(at) => {
                let elapsed = chrono::Utc::now().signed_duration_since(at);
                elapsed.num_seconds() >= interval as i64
            }
            None => true,
        };
        Ok(due)
    }

    async fn post_phase(&self, report: &mut CycleReport) -> Result<()> {
        let queue = self.store.post_queue();
        let Some(post) = queue.next_pending()? else {
            return Ok(());
        };
        debug!(phase = ?Phase::Post, post_id = %post.id, "publishing queued post");

        match self
            .retry
            .run("publish_post", || self.platform.publish_post(&post.text))
            .await
        {
            Ok(true) => {
                queue.mark_posted(&post.id)?;
                report.posts_published += 1;
                info!(post_id = %post.id, "post published");
                self.events.publish(Event::PostPublished {
                    post_id: post.id.clone(),
                });
            }
            Ok(false) => {
                warn!(post_id = %post.id, "platform refused post");
                queue.mark_failed(&post.id, "refused by platform")?;
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(post_id = %post.id, error = %e, "could not publish post");
                queue.mark_failed(&post.id, &e.to_string())?;
            }
        }
        Ok(())
    }

    async fn requests_phase(&self, report: &mut CycleReport) -> Result<()> {
        let requests = self
            .retry
            .run("fetch_pending_requests", || {
                self.platform.fetch_pending_requests()
            })
            .await?;
        debug!(phase = ?Phase::Requests, count = requests.len(), "pending requests");

        for request in requests {
            let Some(handle) = request.handle.as_deref().filter(|h| !h.trim().is_empty()) else {
                debug!(thread = %request.thread_ref, "request without a handle, skipping");
                report.malformed += 1;
                continue;
            };

            match self
                .retry
                .run("accept_request", || {
                    self.platform.accept_request(&request.thread_ref)
                })
                .await
            {
                Ok(true) => {
                    self.store.append_dm(handle, Message::system(REQUEST_ACCEPTED));
                    report.requests_accepted += 1;
                    info!(handle, "accepted message request");
                    self.events.publish(Event::RequestAccepted {
                        handle: handle.to_string(),
                    });
                }
                Ok(false) => {
                    warn!(handle, "platform refused to accept request");
                    report.skipped += 1;
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(handle, error = %e, "could not accept request");
                    report.skipped += 1;
                }
            }
        }
        Ok(())
    }

    async fn dm_phase(&self, report: &mut CycleReport) -> Result<()> {
        let threads = self
            .retry
            .run("fetch_dm_threads", || self.platform.fetch_dm_threads())
            .await?;
        debug!(phase = ?Phase::Dm, count = threads.len(), "dm threads");

        for thread in threads {
            let (Some(handle), Some(text)) = (
                thread.handle.as_deref().filter(|h| !h.trim().is_empty()),
                thread.last_text(),
            ) else {
                debug!(thread = %thread.thread_ref, "thread without handle or text, skipping");
                report.malformed += 1;
                continue;
            };

            if self.ledger.dm_thread_handled(handle, &thread) {
                report.deduplicated += 1;
                continue;
            }

            self.record_inbound_dm(handle, &thread, text);
            let signal_id = SignalId::dm(handle, text);
            match self.reply_to_dm(handle, &thread, text, &signal_id).await? {
                Handled::Replied => report.dm_replies += 1,
                Handled::Skipped => report.skipped += 1,
            }
        }
        Ok(())
    }

    async fn mention_phase(&self, report: &mut CycleReport) -> Result<()> {
        let mentions = self
            .retry
            .run("fetch_mentions", || self.platform.fetch_mentions())
            .await?;
        debug!(phase = ?Phase::Mention, count = mentions.len(), "mentions");

        for mention in mentions {
            let Some((id, handle, text)) = mention_fields(&mention) else {
                debug!(signal = %mention.signal_ref, "mention without id, handle or text, skipping");
                report.malformed += 1;
                continue;
            };

            let signal_id = SignalId::mention(id);
            if self.ledger.has_handled(&signal_id) {
                report.deduplicated += 1;
                continue;
            }

            match self.reply_to_mention(id, handle, text, &mention, &signal_id).await? {
                Handled::Replied => report.mention_replies += 1,
                Handled::Skipped => report.skipped += 1,
            }
        }
        Ok(())
    }

    // ── Per-signal pipeline ────────────────────────────────────

    /// Keep the inbound side of the conversation, without repeating the last
    /// inbound message when an unanswered thread is seen again.
    fn record_inbound_dm(&self, handle: &str, thread: &RawThread, text: &str) {
        if let Some(last) = self.store.last_dm(handle) {
            if !last.is_from_us && normalize_text(&last.text) == normalize_text(text) {
                return;
            }
        }
        let mut message = Message::dm(text, false);
        if let Some(at) = thread.last_message().and_then(|m| m.timestamp) {
            message = message.at(at);
        }
        self.store.append_dm(handle, message);
    }

    async fn reply_to_dm(
        &self,
        handle: &str,
        thread: &RawThread,
        text: &str,
        signal_id: &SignalId,
    ) -> Result<Handled> {
        self.events.publish(Event::SignalReceived {
            context: ContextKind::Dm,
            handle: handle.to_string(),
            signal_id: signal_id.to_string(),
        });

        let Some(reply) = self.compose(handle, ContextKind::Dm, text).await? else {
            return Ok(Handled::Skipped);
        };

        match self
            .retry
            .run("send_dm", || self.platform.send_dm(&thread.thread_ref, &reply))
            .await
        {
            Ok(true) => {
                self.commit(signal_id, handle, ContextKind::Dm);
                self.store.append_dm(handle, Message::dm(reply, true));
                info!(handle, "replied to dm");
                Ok(Handled::Replied)
            }
            Ok(false) => Ok(self.skip(handle, ContextKind::Dm, "platform refused the dm")),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                warn!(handle, error = %e, "could not send dm");
                Ok(self.skip(handle, ContextKind::Dm, "send failed"))
            }
        }
    }

    async fn reply_to_mention(
        &self,
        id: &str,
        handle: &str,
        text: &str,
        mention: &RawSignal,
        signal_id: &SignalId,
    ) -> Result<Handled> {
        self.events.publish(Event::SignalReceived {
            context: ContextKind::Mention,
            handle: handle.to_string(),
            signal_id: signal_id.to_string(),
        });

        let Some(reply) = self.compose(handle, ContextKind::Mention, text).await? else {
            return Ok(Handled::Skipped);
        };

        match self
            .retry
            .run("reply_to_mention", || {
                self.platform.reply_to_mention(&mention.signal_ref, &reply)
            })
            .await
        {
            Ok(true) => {
                self.commit(signal_id, handle, ContextKind::Mention);
                let mut record = MentionRecord::replied(id, text, reply);
                record.timestamp = mention.timestamp.or(record.timestamp);
                self.store.append_mention(handle, record);
                info!(handle, mention_id = id, "replied to mention");
                Ok(Handled::Replied)
            }
            Ok(false) => Ok(self.skip(handle, ContextKind::Mention, "platform refused the reply")),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                warn!(handle, mention_id = id, error = %e, "could not reply to mention");
                Ok(self.skip(handle, ContextKind::Mention, "reply failed"))
            }
        }
    }

    /// Gate, then ask the generator. `Ok(None)` means skip this signal for now.
    async fn compose(&self, handle: &str, context: ContextKind, text: &str) -> Result<Option<String>> {
        let relevant = self.state.interests.is_relevant(text);
        if !self.state.confidence.should_engage(handle, context, relevant) {
            self.skip(handle, context, "below confidence gate");
            return Ok(None);
        }

        let request = ComposeRequest {
            handle: handle.to_string(),
            context,
            text: text.to_string(),
            history: self
                .store
                .recent_context(handle, self.config.read().history_limit),
            persona: self.persona.clone(),
        };
        match self
            .retry
            .run("compose", || self.generator.compose(&request))
            .await
        {
            Ok(Some(reply)) if !reply.trim().is_empty() => Ok(Some(reply)),
            Ok(_) => {
                self.skip(handle, context, "generator had nothing to say");
                Ok(None)
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                warn!(handle, %context, error = %e, "could not compose reply");
                self.skip(handle, context, "compose failed");
                Ok(None)
            }
        }
    }

    fn commit(&self, signal_id: &SignalId, handle: &str, context: ContextKind) {
        // The reply is out; a missing ledger row is recovered through memory.
        if let Err(e) = self.ledger.record_handled(signal_id, handle) {
            warn!(%signal_id, error = %e, "could not record handled signal");
        }
        let score = self.state.confidence.record_interaction(handle, context);
        debug!(handle, %context, score, "confidence raised");
        self.events.publish(Event::ReplySent {
            context,
            handle: handle.to_string(),
            signal_id: signal_id.to_string(),
        });
    }

    fn skip(&self, handle: &str, context: ContextKind, reason: &str) -> Handled {
        debug!(handle, %context, reason, "skipping signal");
        self.events.publish(Event::ReplySkipped {
            context,
            handle: handle.to_string(),
            reason: reason.to_string(),
        });
        Handled::Skipped
    }

    // ── Timing ─────────────────────────────────────────────────

    async fn phase_pause(&self) {
        let pause = self.config.read().phase_pause_secs;
        if pause > 0 {
            tokio::time::sleep(Duration::from_secs(pause)).await;
        }
    }

    /// Sleep after a clean cycle: the interval plus up to `jitter_secs`.
    pub fn idle_delay(&self) -> Duration {
        let config = self.config.read();
        let jitter = config.jitter_secs as f64 * rand::random::<f64>();
        Duration::from_secs(config.interval_secs) + Duration::from_secs_f64(jitter)
    }

    /// Sleep after the `failures`-th consecutive failed cycle.
    pub fn error_backoff(&self, failures: u32) -> Duration {
        let config = self.config.read();
        let min = config.error_backoff_min_secs;
        let max = config.error_backoff_max_secs.max(min);
        let shift = failures.saturating_sub(1).min(16);
        Duration::from_secs(min.saturating_mul(1u64 << shift).min(max))
    }

    /// One cycle between session setup and shutdown, for one-shot runs.
    pub async fn run_once(&self) -> Result<CycleReport> {
        self.establish_session().await?;
        let report = self.run_cycle().await;
        self.shutdown().await;
        report
    }

    async fn establish_session(&self) -> Result<()> {
        if let Err(e) = self
            .retry
            .run("ensure_session", || self.platform.ensure_session())
            .await
        {
            error!(platform = self.platform.name(), error = %e, "cannot establish platform session");
            return Err(match e {
                EngageError::Fatal(_) => e,
                other => EngageError::Fatal(format!("platform session unavailable: {other}")),
            });
        }
        Ok(())
    }

    async fn shutdown(&self) {
        let pending = self.store.flush();
        if pending > 0 {
            warn!(pending, "conversations still unsaved at shutdown");
        }
        if let Err(e) = self.platform.close().await {
            warn!(platform = self.platform.name(), error = %e, "error closing platform");
        }
        info!(cycles = self.cycles_run(), "engagement loop stopped");
        self.events.publish(Event::Shutdown);
    }
}

fn mention_fields(mention: &RawSignal) -> Option<(&str, &str, &str)> {
    let id = mention.id.as_deref().filter(|s| !s.trim().is_empty())?;
    let handle = mention.handle.as_deref().filter(|s| !s.trim().is_empty())?;
    let text = mention.text.as_deref().filter(|s| !s.trim().is_empty())?;
    Some((id, handle, text))
}
