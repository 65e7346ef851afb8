#[cfg(test)]
mod tests {
    use engage_channels::mock::{Outcome, PlatformCall, ScriptedGenerator, ScriptedPlatform};
    use engage_config::EngageConfig;
    use engage_core::{ContextKind, EngageError, Event, EventBus, MentionRecord, MessageKind, RawSignal};
    use engage_memory::{ConversationStore, PostStatus};
    use engage_runtime::{CycleOrchestrator, EngagementState, RetryPolicy};
    use std::sync::Arc;
    use std::time::Duration;

    fn config() -> EngageConfig {
        let mut config = EngageConfig::default();
        config.cycle.phase_pause_secs = 0;
        config.cycle.interval_secs = 0;
        config.cycle.jitter_secs = 0;
        config
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy::new(2, Duration::from_millis(1), Duration::from_millis(2))
    }

    fn mention(id: Option<&str>, handle: &str, text: &str) -> RawSignal {
        RawSignal {
            id: id.map(String::from),
            handle: Some(handle.into()),
            text: Some(text.into()),
            signal_ref: format!("ref-{}", id.unwrap_or("none")),
            timestamp: None,
        }
    }

    struct Harness {
        platform: ScriptedPlatform,
        generator: ScriptedGenerator,
        store: Arc<ConversationStore>,
        state: Arc<EngagementState>,
        events: EventBus,
        orchestrator: CycleOrchestrator,
    }

    fn harness_with(config: EngageConfig, platform: ScriptedPlatform, generator: ScriptedGenerator) -> Harness {
        let store = Arc::new(ConversationStore::open_in_memory().unwrap());
        let state = Arc::new(EngagementState::from_config(&config));
        let events = EventBus::default();
        let orchestrator = CycleOrchestrator::new(
            &config,
            Arc::new(platform.clone()),
            Arc::new(generator.clone()),
            store.clone(),
            state.clone(),
            events.clone(),
        )
        .with_retry(fast_retry());
        Harness {
            platform,
            generator,
            store,
            state,
            events,
            orchestrator,
        }
    }

    fn harness(platform: ScriptedPlatform, generator: ScriptedGenerator) -> Harness {
        harness_with(config(), platform, generator)
    }

    fn replies(platform: &ScriptedPlatform) -> usize {
        platform.count(|c| matches!(c, PlatformCall::Reply { .. }))
    }

    fn dms_sent(platform: &ScriptedPlatform) -> usize {
        platform.count(|c| matches!(c, PlatformCall::SendDm { .. }))
    }

    // ── Direct messages ────────────────────────────────────────

    mod dms {
        use super::*;

        #[tokio::test]
        async fn test_new_dm_creates_conversation_and_reply() {
            let h = harness(
                ScriptedPlatform::new().with_incoming_dm("@alice", "t-alice", "hello"),
                ScriptedGenerator::new().with_reply("hi alice!"),
            );

            let report = h.orchestrator.run_cycle().await.unwrap();
            assert_eq!(report.dm_replies, 1);
            assert_eq!(dms_sent(&h.platform), 1);

            let conversation = h.store.get("@alice").unwrap();
            assert_eq!(conversation.dms.len(), 2);
            assert_eq!(conversation.dms[0].text, "hello");
            assert!(!conversation.dms[0].is_from_us);
            assert_eq!(conversation.dms[1].text, "hi alice!");
            assert!(conversation.dms[1].is_from_us);
            assert!(conversation.last_interaction.is_some());
            assert_eq!(conversation.metadata.total_interactions, 2);

            assert_eq!(h.orchestrator.ledger().len(), 1);
            let score = h.state.confidence.get("@alice", ContextKind::Dm);
            assert!((score - 0.15).abs() < 1e-9);
        }

        #[tokio::test]
        async fn test_generator_sees_inbound_dm_in_history() {
            let h = harness(
                ScriptedPlatform::new().with_incoming_dm("@alice", "t-alice", "hello"),
                ScriptedGenerator::new(),
            );
            h.orchestrator.run_cycle().await.unwrap();

            let requests = h.generator.recorded_requests();
            assert_eq!(requests.len(), 1);
            assert_eq!(requests[0].context, ContextKind::Dm);
            assert_eq!(requests[0].text, "hello");
            assert_eq!(requests[0].history.last().unwrap().text, "hello");
        }

        #[tokio::test]
        async fn test_answered_thread_is_not_answered_again() {
            let h = harness(
                ScriptedPlatform::new().with_incoming_dm("@alice", "t-alice", "hello"),
                ScriptedGenerator::new(),
            );
            h.orchestrator.run_cycle().await.unwrap();
            let report = h.orchestrator.run_cycle().await.unwrap();

            assert_eq!(dms_sent(&h.platform), 1);
            assert_eq!(report.deduplicated, 1);
            assert_eq!(report.dm_replies, 0);
        }

        #[tokio::test]
        async fn test_stale_thread_view_is_deduplicated_by_ledger() {
            let h = harness(
                ScriptedPlatform::new()
                    .with_incoming_dm("@alice", "t-alice", "hello")
                    .with_stale_view(),
                ScriptedGenerator::new(),
            );
            h.orchestrator.run_cycle().await.unwrap();
            h.orchestrator.run_cycle().await.unwrap();

            assert_eq!(dms_sent(&h.platform), 1);
            assert_eq!(h.store.get("@alice").unwrap().dms.len(), 2);
        }

        #[tokio::test]
        async fn test_same_words_after_visible_reply_are_answered() {
            let h = harness(
                ScriptedPlatform::new().with_incoming_dm("@alice", "t-alice", "thanks"),
                ScriptedGenerator::new(),
            );
            let first = h.orchestrator.run_cycle().await.unwrap();
            assert_eq!(first.dm_replies, 1);

            h.platform.push_incoming("t-alice", "thanks");
            let second = h.orchestrator.run_cycle().await.unwrap();

            assert_eq!(second.dm_replies, 1);
            assert_eq!(second.deduplicated, 0);
            assert_eq!(dms_sent(&h.platform), 2);
            let inbound = h
                .store
                .dm_history("@alice", None)
                .into_iter()
                .filter(|m| !m.is_from_us)
                .count();
            assert_eq!(inbound, 2);
        }

        #[tokio::test]
        async fn test_three_replies_raise_dm_confidence() {
            let h = harness(
                ScriptedPlatform::new().with_incoming_dm("@bob", "t-bob", "one"),
                ScriptedGenerator::new(),
            );
            h.orchestrator.run_cycle().await.unwrap();
            h.platform.push_incoming("t-bob", "two");
            h.orchestrator.run_cycle().await.unwrap();
            h.platform.push_incoming("t-bob", "three");
            h.orchestrator.run_cycle().await.unwrap();

            assert_eq!(dms_sent(&h.platform), 3);
            let score = h.state.confidence.get("@bob", ContextKind::Dm);
            assert!((score - 0.45).abs() < 1e-9);
            assert_eq!(h.orchestrator.ledger().len(), 3);
        }

        #[tokio::test]
        async fn test_refused_send_leaves_thread_eligible() {
            let h = harness(
                ScriptedPlatform::new()
                    .with_incoming_dm("@alice", "t-alice", "hello")
                    .with_outcome(Outcome::Refused),
                ScriptedGenerator::new(),
            );
            let first = h.orchestrator.run_cycle().await.unwrap();
            assert_eq!(first.skipped, 1);
            assert!(h.orchestrator.ledger().is_empty());

            let second = h.orchestrator.run_cycle().await.unwrap();
            assert_eq!(second.dm_replies, 1);
            // The unanswered inbound message is stored once.
            let inbound = h
                .store
                .dm_history("@alice", None)
                .into_iter()
                .filter(|m| !m.is_from_us)
                .count();
            assert_eq!(inbound, 1);
        }
    }

    // ── Mentions ───────────────────────────────────────────────

    mod mentions {
        use super::*;

        #[tokio::test]
        async fn test_mention_already_replied_in_memory_is_skipped() {
            let h = harness(
                ScriptedPlatform::new().with_mention(mention(Some("1234"), "@bob", "hey @us")),
                ScriptedGenerator::new(),
            );
            h.store
                .append_mention("@bob", MentionRecord::replied("1234", "hey @us", "hi bob"));

            let report = h.orchestrator.run_cycle().await.unwrap();
            assert_eq!(replies(&h.platform), 0);
            assert_eq!(report.deduplicated, 1);
            assert!(h.generator.recorded_requests().is_empty());
        }

        #[tokio::test]
        async fn test_same_mention_twice_gets_one_reply() {
            let h = harness(
                ScriptedPlatform::new()
                    .with_mention(mention(Some("77"), "@carol", "what do you think?"))
                    .with_mention(mention(Some("77"), "@carol", "what do you think?")),
                ScriptedGenerator::new(),
            );

            h.orchestrator.run_cycle().await.unwrap();
            h.orchestrator.run_cycle().await.unwrap();

            assert_eq!(replies(&h.platform), 1);
            assert_eq!(h.orchestrator.ledger().len(), 1);
            let conversation = h.store.get("@carol").unwrap();
            assert_eq!(conversation.mentions.len(), 1);
            assert!(conversation.mentions[0].is_reply);
            assert_eq!(conversation.mentions[0].reply.as_deref(), Some("re: what do you think?"));
        }

        #[tokio::test]
        async fn test_silent_generator_leaves_mention_eligible() {
            let h = harness(
                ScriptedPlatform::new().with_mention(mention(Some("55"), "@dave", "ping")),
                ScriptedGenerator::new().with_silence(),
            );

            let first = h.orchestrator.run_cycle().await.unwrap();
            assert_eq!(first.skipped, 1);
            assert_eq!(replies(&h.platform), 0);
            assert!(h.orchestrator.ledger().is_empty());
            assert!(!h.store.mention_replied("55"));

            let second = h.orchestrator.run_cycle().await.unwrap();
            assert_eq!(second.mention_replies, 1);
            assert_eq!(replies(&h.platform), 1);
        }

        #[tokio::test]
        async fn test_failing_reply_is_a_per_signal_skip() {
            let h = harness(
                ScriptedPlatform::new()
                    .with_mention(mention(Some("1"), "@erin", "first"))
                    .with_mention(mention(Some("2"), "@erin", "second"))
                    .with_outcome(Outcome::Fail("timeout".into()))
                    .with_outcome(Outcome::Fail("timeout".into())),
                ScriptedGenerator::new(),
            );

            let report = h.orchestrator.run_cycle().await.unwrap();
            assert_eq!(report.skipped, 1);
            assert_eq!(report.mention_replies, 1);
            assert!(h.store.mention_replied("2"));
            assert!(!h.store.mention_replied("1"));
        }

        #[tokio::test]
        async fn test_reply_events_are_published() {
            let h = harness(
                ScriptedPlatform::new().with_mention(mention(Some("9"), "@frank", "hi")),
                ScriptedGenerator::new(),
            );
            let mut rx = h.events.subscribe();
            h.orchestrator.run_cycle().await.unwrap();

            let mut sent = false;
            while let Ok(event) = rx.try_recv() {
                if let Event::ReplySent { handle, signal_id, .. } = event {
                    assert_eq!(handle, "@frank");
                    assert_eq!(signal_id, "mention:9");
                    sent = true;
                }
            }
            assert!(sent);
        }
    }

    // ── Requests and malformed signals ─────────────────────────

    mod requests {
        use super::*;
        use engage_core::RawThread;

        #[tokio::test]
        async fn test_request_is_accepted_noted_and_answered() {
            let h = harness(
                ScriptedPlatform::new().with_request("@gina", "r-gina", "can we talk?"),
                ScriptedGenerator::new(),
            );

            let report = h.orchestrator.run_cycle().await.unwrap();
            assert_eq!(report.requests_accepted, 1);
            assert_eq!(report.dm_replies, 1);

            let dms = h.store.dm_history("@gina", None);
            assert_eq!(dms[0].kind, MessageKind::System);
            assert_eq!(dms[0].text, "Message request accepted");
            assert!(dms[0].is_from_us);
            assert_eq!(dms[1].text, "can we talk?");
        }

        #[tokio::test]
        async fn test_partial_signals_are_skipped() {
            let h = harness(
                ScriptedPlatform::new()
                    .with_mention(mention(None, "@hank", "no id"))
                    .with_thread(RawThread {
                        handle: None,
                        thread_ref: "t-anon".into(),
                        messages: vec![],
                    }),
                ScriptedGenerator::new(),
            );

            let report = h.orchestrator.run_cycle().await.unwrap();
            assert_eq!(report.malformed, 2);
            assert!(h.platform.recorded_calls().is_empty());
        }
    }

    // ── Loop control ───────────────────────────────────────────

    mod control {
        use super::*;

        #[tokio::test]
        async fn test_fetch_failure_fails_the_cycle() {
            let h = harness(ScriptedPlatform::new().with_fetch_failures(10), ScriptedGenerator::new());
            let err = h.orchestrator.run_cycle().await.unwrap_err();
            assert!(!err.is_fatal());
            assert!(matches!(err, EngageError::RetryExhausted { .. }));
        }

        #[tokio::test]
        async fn test_session_failure_prevents_any_cycle() {
            let h = harness(
                ScriptedPlatform::new()
                    .with_session_error("not logged in")
                    .with_incoming_dm("@alice", "t", "hello"),
                ScriptedGenerator::new(),
            );

            let err = h.orchestrator.run().await.unwrap_err();
            assert!(err.is_fatal());
            assert_eq!(h.orchestrator.cycles_run(), 0);
            assert_eq!(h.platform.recorded_calls(), vec![PlatformCall::EnsureSession]);
        }

        #[tokio::test]
        async fn test_single_cycle_opens_session_and_shuts_down() {
            let h = harness(
                ScriptedPlatform::new().with_incoming_dm("@alice", "t", "hello"),
                ScriptedGenerator::new(),
            );
            let mut rx = h.events.subscribe();

            let report = h.orchestrator.run_once().await.unwrap();
            assert_eq!(report.dm_replies, 1);

            let calls = h.platform.recorded_calls();
            assert_eq!(calls.first(), Some(&PlatformCall::EnsureSession));
            assert_eq!(calls.last(), Some(&PlatformCall::Close));
            let mut saw_shutdown = false;
            while let Ok(event) = rx.try_recv() {
                saw_shutdown |= matches!(event, Event::Shutdown);
            }
            assert!(saw_shutdown);
        }

        #[tokio::test]
        async fn test_single_cycle_needs_a_session() {
            let h = harness(
                ScriptedPlatform::new()
                    .with_session_error("not logged in")
                    .with_incoming_dm("@alice", "t", "hello"),
                ScriptedGenerator::new(),
            );

            let err = h.orchestrator.run_once().await.unwrap_err();
            assert!(err.is_fatal());
            assert_eq!(h.orchestrator.cycles_run(), 0);
            assert_eq!(h.platform.recorded_calls(), vec![PlatformCall::EnsureSession]);
        }

        #[tokio::test]
        async fn test_stop_interrupts_idle_and_shuts_down() {
            let mut config = config();
            config.cycle.interval_secs = 3600;
            let h = harness_with(
                config,
                ScriptedPlatform::new().with_incoming_dm("@alice", "t", "hello"),
                ScriptedGenerator::new(),
            );
            let platform = h.platform.clone();
            let mut rx = h.events.subscribe();
            let orchestrator = Arc::new(h.orchestrator);
            let stop = orchestrator.stop_token();

            let runner = {
                let orchestrator = orchestrator.clone();
                tokio::spawn(async move { orchestrator.run().await })
            };
            tokio::time::sleep(Duration::from_millis(50)).await;
            stop.cancel();

            let result = tokio::time::timeout(Duration::from_secs(2), runner)
                .await
                .expect("loop did not stop")
                .unwrap();
            assert!(result.is_ok());
            assert_eq!(orchestrator.cycles_run(), 1);
            assert_eq!(platform.recorded_calls().last(), Some(&PlatformCall::Close));

            let mut saw_shutdown = false;
            while let Ok(event) = rx.try_recv() {
                saw_shutdown |= matches!(event, Event::Shutdown);
            }
            assert!(saw_shutdown);
        }

        #[tokio::test]
        async fn test_error_backoff_grows_and_caps() {
            let h = harness(ScriptedPlatform::new(), ScriptedGenerator::new());
            assert_eq!(h.orchestrator.error_backoff(1), Duration::from_secs(30));
            assert_eq!(h.orchestrator.error_backoff(2), Duration::from_secs(60));
            assert_eq!(h.orchestrator.error_backoff(4), Duration::from_secs(240));
            assert_eq!(h.orchestrator.error_backoff(5), Duration::from_secs(300));
            assert_eq!(h.orchestrator.error_backoff(50), Duration::from_secs(300));
        }

        #[tokio::test]
        async fn test_reloaded_cycle_settings_apply_next_cycle() {
            let live = Arc::new(parking_lot::RwLock::new(config()));
            let h = harness(ScriptedPlatform::new(), ScriptedGenerator::new());
            let orchestrator = h.orchestrator.with_live_config(live.clone());
            assert_eq!(orchestrator.error_backoff(1), Duration::from_secs(30));

            live.write().cycle.error_backoff_min_secs = 5;
            assert_eq!(orchestrator.error_backoff(1), Duration::from_secs(30));
            orchestrator.run_cycle().await.unwrap();
            assert_eq!(orchestrator.error_backoff(1), Duration::from_secs(5));
        }

        #[tokio::test]
        async fn test_idle_delay_stays_within_jitter() {
            let mut config = config();
            config.cycle.interval_secs = 10;
            config.cycle.jitter_secs = 3;
            let h = harness_with(config, ScriptedPlatform::new(), ScriptedGenerator::new());
            for _ in 0..20 {
                let delay = h.orchestrator.idle_delay();
                assert!(delay >= Duration::from_secs(10));
                assert!(delay <= Duration::from_secs(13));
            }
        }
    }

    // ── Queued posts ───────────────────────────────────────────

    mod posts {
        use super::*;

        #[tokio::test]
        async fn test_queued_post_is_published_once_per_interval() {
            let mut config = config();
            config.cycle.post_interval_secs = 3600;
            let h = harness_with(config, ScriptedPlatform::new(), ScriptedGenerator::new());
            let queue = h.store.post_queue();
            queue.enqueue("first post").unwrap();
            queue.enqueue("second post").unwrap();

            let report = h.orchestrator.run_cycle().await.unwrap();
            assert_eq!(report.posts_published, 1);
            let second = h.orchestrator.run_cycle().await.unwrap();
            assert_eq!(second.posts_published, 0);

            let publishes = h.platform.count(|c| matches!(c, PlatformCall::Publish { .. }));
            assert_eq!(publishes, 1);
            assert_eq!(queue.pending_count().unwrap(), 1);
            let posted: Vec<_> = queue
                .list(10)
                .unwrap()
                .into_iter()
                .filter(|p| p.status == PostStatus::Posted)
                .collect();
            assert_eq!(posted.len(), 1);
            assert_eq!(posted[0].text, "first post");
        }

        #[tokio::test]
        async fn test_post_phase_disabled_by_default() {
            let h = harness(ScriptedPlatform::new(), ScriptedGenerator::new());
            h.store.post_queue().enqueue("never").unwrap();
            h.orchestrator.run_cycle().await.unwrap();
            assert_eq!(h.platform.count(|c| matches!(c, PlatformCall::Publish { .. })), 0);
        }
    }
}
