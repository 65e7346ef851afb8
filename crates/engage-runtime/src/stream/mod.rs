//! Live audio room scheduler.
//!
//! Five cooperating stages run as independent tokio tasks for as long as a
//! session is active:
//!
//! | Stage     | Input                    | Output                     |
//! |-----------|--------------------------|----------------------------|
//! | Listening | transcript poll          | `NewSpeech` → thought queue |
//! | Thinking  | thought queue            | `PotentialResponse` → speech queue |
//! | Speaking  | speech queue             | utterance                  |
//! | Memory    | analysis buffer (timer)  | conversation summary       |
//! | Attention | analysis buffer (timer)  | salient speakers and topic |
//!
//! Queues are bounded; when the thought queue is full, listening stops polling
//! until it drains.

pub mod buffer;
mod pipeline;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use engage_channels::{ResponseGenerator, SpeechIo};
use engage_config::StreamConfig;
use engage_core::{ContextKind, EngageError, Event, EventBus, Handle, Result, Segment, SessionId};
use engage_memory::ConversationStore;

use crate::retry::RetryPolicy;
use crate::state::{Attention, EngagementState};
use buffer::AnalysisRecord;
use pipeline::Pipeline;

/// A unit of work flowing between stages.
#[derive(Debug, Clone)]
pub enum WorkItem {
    NewSpeech(Segment),
    PotentialResponse(AnalysisRecord),
    ConsolidationBatch(Vec<AnalysisRecord>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Listening,
    Thinking,
    Speaking,
    Memory,
    Attention,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Listening,
        Stage::Thinking,
        Stage::Speaking,
        Stage::Memory,
        Stage::Attention,
    ];
}

/// Point-in-time view of a running session.
#[derive(Debug, Clone, Serialize)]
pub struct StreamHealth {
    pub session_id: SessionId,
    pub space: Handle,
    pub is_processing: bool,
    pub thought_queue: usize,
    pub speech_queue: usize,
    pub buffered: usize,
    pub segments_heard: u64,
    pub analyses: u64,
    pub utterances: u64,
    pub consolidations: u64,
    pub last_tick: BTreeMap<Stage, DateTime<Utc>>,
    pub confidence: f64,
    pub attention: Option<Attention>,
}

impl StreamHealth {
    /// Stages that have not ticked within `max_age`, or never did.
    pub fn stale_stages(&self, max_age: Duration) -> Vec<Stage> {
        let now = Utc::now();
        let max_age = chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::MAX);
        Stage::ALL
            .into_iter()
            .filter(|stage| {
                self.last_tick
                    .get(stage)
                    .is_none_or(|at| now.signed_duration_since(*at) > max_age)
            })
            .collect()
    }
}

struct Queues {
    thought: mpsc::Sender<WorkItem>,
    speech: mpsc::Sender<WorkItem>,
}

/// Runs the five stages of one live room session.
pub struct StreamScheduler {
    pipeline: Arc<Pipeline>,
    queues: Option<Queues>,
    tasks: Vec<(Stage, JoinHandle<()>)>,
}

impl StreamScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        space: impl Into<Handle>,
        config: StreamConfig,
        persona: Option<String>,
        speech: Arc<dyn SpeechIo>,
        generator: Arc<dyn ResponseGenerator>,
        store: Arc<ConversationStore>,
        state: Arc<EngagementState>,
        retry: RetryPolicy,
        events: EventBus,
    ) -> Self {
        let pipeline = Pipeline::new(
            Uuid::new_v4(),
            space.into(),
            config,
            persona,
            speech,
            generator,
            store,
            state,
            retry,
            events,
        );
        Self {
            pipeline: Arc::new(pipeline),
            queues: None,
            tasks: Vec::new(),
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.pipeline.session_id
    }

    pub fn space(&self) -> &str {
        &self.pipeline.space
    }

    pub fn is_running(&self) -> bool {
        self.pipeline.running()
    }

    /// Spawn the stage tasks. Must be called from within a tokio runtime.
    pub fn start(&mut self) -> Result<()> {
        if self.pipeline.running() || !self.tasks.is_empty() {
            return Err(EngageError::Other(anyhow::anyhow!(
                "stream session {} is already running",
                self.pipeline.session_id
            )));
        }

        let capacity = self.pipeline.config.queue_capacity.max(1);
        let (thought_tx, thought_rx) = mpsc::channel(capacity);
        let (speech_tx, speech_rx) = mpsc::channel(capacity);
        self.pipeline.is_processing.store(true, Ordering::SeqCst);

        let p = &self.pipeline;
        self.tasks = vec![
            (
                Stage::Listening,
                tokio::spawn(listening_loop(p.clone(), thought_tx.clone())),
            ),
            (
                Stage::Thinking,
                tokio::spawn(thinking_loop(p.clone(), thought_rx, speech_tx.clone())),
            ),
            (
                Stage::Speaking,
                tokio::spawn(speaking_loop(p.clone(), speech_rx)),
            ),
            (Stage::Memory, tokio::spawn(memory_loop(p.clone()))),
            (Stage::Attention, tokio::spawn(attention_loop(p.clone()))),
        ];
        self.queues = Some(Queues {
            thought: thought_tx,
            speech: speech_tx,
        });

        info!(
            session_id = %p.session_id,
            space = %p.space,
            "stream session started"
        );
        p.events.publish(Event::StreamStarted {
            session_id: p.session_id,
            space: p.space.clone(),
        });
        Ok(())
    }

    /// Stop every stage, wait for them to finish their current step, and leave the room.
    pub async fn stop(&mut self) {
        self.pipeline.is_processing.store(false, Ordering::SeqCst);
        self.queues = None;

        for (stage, task) in self.tasks.drain(..) {
            if let Err(e) = task.await {
                warn!(?stage, error = %e, "stream stage ended abnormally");
            }
        }

        self.pipeline.state.leave_space(&self.pipeline.space);
        info!(session_id = %self.pipeline.session_id, "stream session stopped");
        self.pipeline.events.publish(Event::StreamStopped {
            session_id: self.pipeline.session_id,
        });
    }

    /// Run one work item through its stage by hand, outside the stage tasks.
    pub async fn process(&self, item: WorkItem) -> Option<WorkItem> {
        self.pipeline.handle(item).await
    }

    /// The consolidation batch the memory stage would take right now.
    pub fn take_batch(&self) -> Option<WorkItem> {
        self.pipeline.take_batch()
    }

    /// One attention tick.
    pub fn attend(&self) -> Attention {
        self.pipeline.attend()
    }

    pub fn health(&self) -> StreamHealth {
        let p = &self.pipeline;
        let depth = |tx: &mpsc::Sender<WorkItem>| tx.max_capacity() - tx.capacity();
        let (thought_queue, speech_queue) = self
            .queues
            .as_ref()
            .map(|q| (depth(&q.thought), depth(&q.speech)))
            .unwrap_or((0, 0));
        let counters = p.counters.lock();

        StreamHealth {
            session_id: p.session_id,
            space: p.space.clone(),
            is_processing: p.running(),
            thought_queue,
            speech_queue,
            buffered: p.buffer.lock().len(),
            segments_heard: counters.segments_heard,
            analyses: counters.analyses,
            utterances: counters.utterances,
            consolidations: counters.consolidations,
            last_tick: counters.last_tick.clone(),
            confidence: p.state.confidence.get(&p.space, ContextKind::Space),
            attention: p.state.attention(&p.space),
        }
    }
}

impl Drop for StreamScheduler {
    fn drop(&mut self) {
        self.pipeline.is_processing.store(false, Ordering::SeqCst);
    }
}

// ── Stage loops ────────────────────────────────────────────────

async fn listening_loop(p: Arc<Pipeline>, thought: mpsc::Sender<WorkItem>) {
    let poll = p.poll_interval();
    let mut pending: Option<WorkItem> = None;

    while p.running() {
        p.tick(Stage::Listening);
        let item = match pending.take() {
            Some(item) => Some(item),
            None => p.listen().await,
        };
        let Some(item) = item else {
            tokio::time::sleep(poll).await;
            continue;
        };
        match thought.send_timeout(item, poll).await {
            Ok(()) => {}
            Err(mpsc::error::SendTimeoutError::Timeout(item)) => {
                debug!("thought queue full, holding segment");
                pending = Some(item);
            }
            Err(mpsc::error::SendTimeoutError::Closed(_)) => break,
        }
    }
}

async fn thinking_loop(
    p: Arc<Pipeline>,
    mut thought: mpsc::Receiver<WorkItem>,
    speech: mpsc::Sender<WorkItem>,
) {
    let poll = p.poll_interval();
    while p.running() {
        p.tick(Stage::Thinking);
        let Ok(Some(item)) = tokio::time::timeout(poll, thought.recv()).await else {
            continue;
        };
        if let Some(next) = p.handle(item).await {
            // A full speech queue means the moment has passed.
            if speech.try_send(next).is_err() {
                debug!("speech queue full, dropping potential response");
            }
        }
    }
}

async fn speaking_loop(p: Arc<Pipeline>, mut speech: mpsc::Receiver<WorkItem>) {
    let poll = p.poll_interval();
    while p.running() {
        p.tick(Stage::Speaking);
        let Ok(Some(item)) = tokio::time::timeout(poll, speech.recv()).await else {
            continue;
        };
        p.handle(item).await;
    }
}

async fn memory_loop(p: Arc<Pipeline>) {
    let interval = Duration::from_millis(p.config.memory_tick_ms.max(1));
    while sleep_while_running(&p, interval).await {
        p.tick(Stage::Memory);
        if let Some(batch) = p.take_batch() {
            p.handle(batch).await;
        }
    }
}

async fn attention_loop(p: Arc<Pipeline>) {
    let interval = Duration::from_millis(p.config.attention_tick_ms.max(1));
    while sleep_while_running(&p, interval).await {
        p.tick(Stage::Attention);
        p.attend();
    }
}

/// Sleep for `total` in poll-sized steps. Returns false once processing stops.
async fn sleep_while_running(p: &Pipeline, total: Duration) -> bool {
    let step = p.poll_interval().min(total);
    let mut slept = Duration::ZERO;
    while slept < total {
        if !p.running() {
            return false;
        }
        tokio::time::sleep(step).await;
        slept += step;
    }
    p.running()
}
