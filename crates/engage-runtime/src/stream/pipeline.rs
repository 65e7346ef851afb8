use chrono::Utc;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

use engage_channels::{AnalysisAspect, ComposeRequest, ResponseGenerator, SpeechIo};
use engage_config::StreamConfig;
use engage_core::{ContextKind, Event, EventBus, Handle, Message, MessageKind, Segment, SessionId};
use engage_memory::ConversationStore;

use crate::retry::RetryPolicy;
use crate::state::{Attention, EngagementState};
use crate::stream::buffer::{AnalysisBuffer, AnalysisRecord};
use crate::stream::{Stage, WorkItem};

#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub segments_heard: u64,
    pub analyses: u64,
    pub utterances: u64,
    pub consolidations: u64,
    pub last_tick: BTreeMap<Stage, chrono::DateTime<Utc>>,
}

/// State and logic shared by the five stage tasks.
pub(crate) struct Pipeline {
    pub session_id: SessionId,
    pub space: Handle,
    pub config: StreamConfig,
    pub persona: Option<String>,
    pub speech: Arc<dyn SpeechIo>,
    pub generator: Arc<dyn ResponseGenerator>,
    pub store: Arc<ConversationStore>,
    pub state: Arc<EngagementState>,
    pub retry: RetryPolicy,
    pub events: EventBus,
    pub is_processing: Arc<AtomicBool>,
    pub buffer: Mutex<AnalysisBuffer>,
    pub counters: Mutex<Counters>,
    /// Analyses finished since the attention stage last looked.
    analyzed_since_attention: AtomicUsize,
}

impl Pipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session_id: SessionId,
        space: Handle,
        config: StreamConfig,
        persona: Option<String>,
        speech: Arc<dyn SpeechIo>,
        generator: Arc<dyn ResponseGenerator>,
        store: Arc<ConversationStore>,
        state: Arc<EngagementState>,
        retry: RetryPolicy,
        events: EventBus,
    ) -> Self {
        let buffer = AnalysisBuffer::new(config.buffer_capacity);
        Self {
            session_id,
            space,
            config,
            persona,
            speech,
            generator,
            store,
            state,
            retry,
            events,
            is_processing: Arc::new(AtomicBool::new(false)),
            buffer: Mutex::new(buffer),
            counters: Mutex::new(Counters::default()),
            analyzed_since_attention: AtomicUsize::new(0),
        }
    }

    pub fn running(&self) -> bool {
        self.is_processing.load(Ordering::SeqCst)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.config.poll_interval_ms.max(1))
    }

    pub fn tick(&self, stage: Stage) {
        self.counters.lock().last_tick.insert(stage, Utc::now());
    }

    /// Process one work item, returning the item it produces for the next stage.
    pub async fn handle(&self, item: WorkItem) -> Option<WorkItem> {
        match item {
            WorkItem::NewSpeech(segment) => self.think(segment).await.map(WorkItem::PotentialResponse),
            WorkItem::PotentialResponse(record) => {
                self.respond(record).await;
                None
            }
            WorkItem::ConsolidationBatch(batch) => {
                self.consolidate(batch).await;
                None
            }
        }
    }

    // ── Listening ──────────────────────────────────────────────

    /// Poll the room once. Poll failures are left for the next tick.
    pub async fn listen(&self) -> Option<WorkItem> {
        match self.speech.poll_transcript().await {
            Ok(Some(segment)) => {
                self.counters.lock().segments_heard += 1;
                debug!(speaker = ?segment.speaker, "heard segment");
                Some(WorkItem::NewSpeech(segment))
            }
            Ok(None) => None,
            Err(e) => {
                debug!(error = %e, "transcript poll failed");
                None
            }
        }
    }

    // ── Thinking ───────────────────────────────────────────────

    /// Analyze a segment three ways at once and remember the result. Returns the
    /// record when it is relevant enough to consider answering.
    pub async fn think(&self, segment: Segment) -> Option<AnalysisRecord> {
        let (technical, social, relevance) = tokio::join!(
            self.analyze(&segment, AnalysisAspect::Technical),
            self.analyze(&segment, AnalysisAspect::Social),
            async { self.state.interests.score(&segment.text) },
        );

        let record = AnalysisRecord::new(segment, technical, social, relevance);
        self.buffer.lock().push(record.clone());
        self.counters.lock().analyses += 1;
        self.analyzed_since_attention.fetch_add(1, Ordering::SeqCst);

        if record.relevance > self.config.relevance_threshold {
            debug!(relevance = record.relevance, "segment worth a response");
            Some(record)
        } else {
            None
        }
    }

    async fn analyze(&self, segment: &Segment, aspect: AnalysisAspect) -> Option<String> {
        let operation = match aspect {
            AnalysisAspect::Technical => "analyze_technical",
            AnalysisAspect::Social => "analyze_social",
        };
        match self
            .retry
            .run(operation, || self.generator.analyze(segment, aspect))
            .await
        {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, ?aspect, "analysis unavailable");
                None
            }
        }
    }

    // ── Speaking ───────────────────────────────────────────────

    /// Speak about a relevant segment if the cooldown and the confidence gate allow.
    pub async fn respond(&self, record: AnalysisRecord) -> bool {
        let cooldown = Duration::from_secs(self.config.speak_cooldown_secs);
        if let Some(left) = self.state.cooldown_remaining(&self.space, cooldown) {
            debug!(remaining_ms = left.as_millis() as u64, "still cooling down");
            return false;
        }

        // Every candidate cleared the segment threshold; the room's current topic decides the boost.
        let relevant = self
            .state
            .confidence
            .relevance(&self.space, ContextKind::Space);
        if !self
            .state
            .confidence
            .should_engage(&self.space, ContextKind::Space, relevant)
        {
            debug!(
                confidence = self.state.confidence.get(&self.space, ContextKind::Space),
                "not confident enough to speak"
            );
            return false;
        }

        let request = ComposeRequest {
            handle: self.space.clone(),
            context: ContextKind::Space,
            text: record.segment.text.clone(),
            history: self.recent_history(),
            persona: self.persona.clone(),
        };
        let reply = match self
            .retry
            .run("compose_space", || self.generator.compose(&request))
            .await
        {
            Ok(Some(reply)) => reply,
            Ok(None) => return false,
            Err(e) => {
                warn!(error = %e, "could not compose a spoken reply");
                return false;
            }
        };

        match self.retry.run("speak", || self.speech.speak(&reply)).await {
            Ok(true) => {
                self.state.mark_spoke(&self.space);
                self.state
                    .confidence
                    .record_interaction(&self.space, ContextKind::Space);
                self.counters.lock().utterances += 1;
                info!(space = %self.space, "spoke in room");
                self.events.publish(Event::SpokeInSpace {
                    session_id: self.session_id,
                    space: self.space.clone(),
                });
                true
            }
            Ok(false) => {
                warn!(space = %self.space, "speech output refused the utterance");
                false
            }
            Err(e) => {
                warn!(error = %e, "could not speak");
                false
            }
        }
    }

    /// Recent analyses as conversation history for the generator.
    fn recent_history(&self) -> Vec<Message> {
        self.buffer
            .lock()
            .recent(self.config.attention_window)
            .into_iter()
            .map(|r| Message {
                text: r.note(),
                timestamp: Some(r.segment.timestamp),
                is_from_us: false,
                kind: MessageKind::System,
            })
            .collect()
    }

    // ── Memory consolidation ───────────────────────────────────

    /// Drain the buffer into a batch once it holds more than the threshold.
    pub fn take_batch(&self) -> Option<WorkItem> {
        let mut buffer = self.buffer.lock();
        if buffer.len() > self.config.consolidation_threshold {
            Some(WorkItem::ConsolidationBatch(buffer.drain()))
        } else {
            None
        }
    }

    /// Summarize a batch into the room's conversation. A failed batch goes back
    /// into the buffer for the next tick.
    pub async fn consolidate(&self, batch: Vec<AnalysisRecord>) -> bool {
        let Some((start, end)) = batch
            .first()
            .zip(batch.last())
            .map(|(f, l)| (f.timestamp, l.timestamp))
        else {
            return false;
        };
        let notes: Vec<String> = batch.iter().map(AnalysisRecord::note).collect();

        let summary = match self
            .retry
            .run("summarize", || self.generator.summarize(&self.space, &notes))
            .await
        {
            Ok(summary) => summary,
            Err(e) => {
                warn!(error = %e, records = batch.len(), "consolidation failed, keeping batch");
                self.buffer.lock().restore(batch);
                return false;
            }
        };

        let Some(summary) = summary else {
            info!(records = batch.len(), "nothing worth remembering in batch");
            return false;
        };

        self.store
            .append_summary(&self.space, Message::system(summary).at(end));
        self.store.update_metadata(
            &self.space,
            "last_consolidation",
            serde_json::json!({
                "start": start,
                "end": end,
                "records": batch.len(),
            }),
        );
        self.counters.lock().consolidations += 1;
        info!(space = %self.space, records = batch.len(), "consolidated room memory");
        self.events.publish(Event::MemoryConsolidated {
            session_id: self.session_id,
            space: self.space.clone(),
            records: batch.len(),
        });
        true
    }

    // ── Attention ──────────────────────────────────────────────

    /// Refresh who and what the room is about, and feed it to the confidence engine.
    pub fn attend(&self) -> Attention {
        let recent = self.buffer.lock().recent(self.config.attention_window);

        let mut salient_speakers: Vec<String> = Vec::new();
        for record in recent.iter().rev() {
            if let Some(ref speaker) = record.segment.speaker {
                if !salient_speakers.contains(speaker) {
                    salient_speakers.push(speaker.clone());
                }
            }
        }

        let gists: Vec<&str> = recent
            .iter()
            .filter_map(|r| r.technical.as_deref().and_then(|t| t.lines().next()))
            .map(str::trim)
            .filter(|g| !g.is_empty())
            .collect();
        let topic = if gists.is_empty() {
            recent.last().map(|r| r.segment.text.clone())
        } else {
            Some(gists.join(" | "))
        };
        let relevant = topic
            .as_deref()
            .is_some_and(|t| self.state.interests.is_relevant(t));

        let attention = Attention {
            salient_speakers,
            topic,
            relevant,
            updated_at: Some(Utc::now()),
        };
        self.state.set_attention(&self.space, attention.clone());

        // Listening builds familiarity with the room.
        if self.analyzed_since_attention.swap(0, Ordering::SeqCst) > 0 {
            self.state
                .confidence
                .record_interaction(&self.space, ContextKind::Space);
        }
        attention
    }
}
