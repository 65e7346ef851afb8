use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use engage_channels::TranscriptFeed;
use engage_config::EngageConfig;
use engage_core::{EngageError, EventBus, Result};
use engage_runtime::{EngagementState, RetryPolicy, StreamScheduler};

/// How often a running session reports its health.
const HEALTH_INTERVAL: Duration = Duration::from_secs(60);

pub(super) async fn cmd_stream(config: EngageConfig, space: Option<String>) -> Result<()> {
    let space = space
        .or_else(|| config.stream.space.clone())
        .ok_or_else(|| {
            EngageError::Config("no room given: pass --space or set stream.space".into())
        })?;

    let store = super::open_store(&config)?;
    let generator = super::build_generator(&config)?;
    let speech = TranscriptFeed::new(
        &config.adapters.transcript_path,
        &config.adapters.speech_outbox,
    );
    speech.seek_to_end().await?;

    let mut scheduler = StreamScheduler::new(
        space.clone(),
        config.stream.clone(),
        config.agent.persona.clone(),
        Arc::new(speech),
        generator,
        store.clone(),
        Arc::new(EngagementState::from_config(&config)),
        RetryPolicy::from(&config.retry),
        EventBus::default(),
    );

    println!("Engage v{}", env!("CARGO_PKG_VERSION"));
    println!("   Room: {space}");
    println!("   Transcript: {}", config.adapters.transcript_path.display());
    println!();

    scheduler.start()?;
    let stale_after = Duration::from_millis(
        config
            .stream
            .memory_tick_ms
            .max(config.stream.attention_tick_ms)
            .saturating_mul(10),
    )
    .max(Duration::from_secs(5));

    let mut health = tokio::time::interval(HEALTH_INTERVAL);
    health.tick().await;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received, leaving room");
                break;
            }
            _ = health.tick() => {
                let h = scheduler.health();
                info!(
                    heard = h.segments_heard,
                    spoke = h.utterances,
                    buffered = h.buffered,
                    thought_queue = h.thought_queue,
                    confidence = h.confidence,
                    "stream health"
                );
                let stale = h.stale_stages(stale_after);
                if !stale.is_empty() {
                    warn!(?stale, "stream stages have stopped ticking");
                }
            }
        }
    }

    scheduler.stop().await;
    let pending = store.flush();
    if pending > 0 {
        warn!(pending, "conversations still unsaved at exit");
    }
    Ok(())
}
