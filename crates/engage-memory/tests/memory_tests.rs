#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use engage_core::{MentionRecord, Message, MessageKind, RawMessage, RawThread, SignalId};
    use engage_memory::*;
    use std::sync::Arc;

    fn mention(id: &str, text: &str) -> MentionRecord {
        MentionRecord {
            id: id.into(),
            text: text.into(),
            reply: None,
            timestamp: Some(Utc::now()),
            is_reply: false,
        }
    }

    // ── Conversation store ─────────────────────────────────────

    mod store {
        use super::*;

        #[test]
        fn test_get_or_create_is_lazy_and_stable() {
            let store = ConversationStore::open_in_memory().unwrap();
            assert!(store.get("alice").is_none());
            let first = store.get_or_create("alice");
            assert!(first.dms.is_empty());
            assert!(first.metadata.first_seen.is_some());
            let again = store.get_or_create("alice");
            assert_eq!(first.metadata.first_seen, again.metadata.first_seen);
            assert_eq!(store.handles(), vec!["alice".to_string()]);
        }

        #[test]
        fn test_append_dm_updates_bookkeeping() {
            let store = ConversationStore::open_in_memory().unwrap();
            assert_eq!(store.append_dm("alice", Message::dm("hi", false)), WriteStatus::Persisted);
            assert_eq!(store.append_dm("alice", Message::dm("hello!", true)), WriteStatus::Persisted);
            let conv = store.get("alice").unwrap();
            assert_eq!(conv.dms.len(), 2);
            assert_eq!(conv.metadata.total_interactions, 2);
            assert!(conv.last_interaction.is_some());
            assert!(store.last_dm("alice").unwrap().is_from_us);
        }

        #[test]
        fn test_recent_context_orders_across_dms_and_mentions() {
            let store = ConversationStore::open_in_memory().unwrap();
            let t1 = Utc::now() - Duration::seconds(30);
            let t2 = Utc::now() - Duration::seconds(20);
            let t3 = Utc::now() - Duration::seconds(10);

            store.append_dm("alice", Message::dm("third", false).at(t3));
            store.append_dm("alice", Message::dm("first", false).at(t1));
            let mut m = mention("m1", "second");
            m.timestamp = Some(t2);
            store.append_mention("alice", m);

            let recent = store.recent_context("alice", 2);
            let texts: Vec<&str> = recent.iter().map(|m| m.text.as_str()).collect();
            assert_eq!(texts, vec!["second", "third"]);
            assert_eq!(recent[0].kind, MessageKind::Mention);
        }

        #[test]
        fn test_recent_context_missing_timestamps_sort_first() {
            let store = ConversationStore::open_in_memory().unwrap();
            let mut undated = Message::dm("undated", false);
            undated.timestamp = None;
            store.append_dm("bob", Message::dm("dated", false));
            store.append_dm("bob", undated);
            let recent = store.recent_context("bob", 10);
            assert_eq!(recent[0].text, "undated");
            assert_eq!(recent[1].text, "dated");
            assert!(store.recent_context("nobody", 5).is_empty());
        }

        #[test]
        fn test_replied_mention_is_immutable() {
            let store = ConversationStore::open_in_memory().unwrap();
            store.append_mention("carol", MentionRecord::replied("77", "q?", "a!"));
            let status = store.append_mention("carol", MentionRecord::replied("77", "q?", "different"));
            assert_eq!(status, WriteStatus::Ignored);
            let history = store.mention_history("carol", None);
            assert_eq!(history.len(), 1);
            assert_eq!(history[0].reply.as_deref(), Some("a!"));
            assert!(store.mention_replied("77"));
            assert!(!store.mention_replied("78"));
        }

        #[test]
        fn test_unreplied_mention_is_updated_in_place() {
            let store = ConversationStore::open_in_memory().unwrap();
            store.append_mention("dave", mention("5", "first draft"));
            store.append_mention("dave", MentionRecord::replied("5", "first draft", "reply"));
            let history = store.mention_history("dave", None);
            assert_eq!(history.len(), 1);
            assert!(history[0].is_reply);
        }

        #[test]
        fn test_history_limits() {
            let store = ConversationStore::open_in_memory().unwrap();
            for i in 0..5 {
                store.append_dm("erin", Message::dm(format!("dm {i}"), false));
            }
            let last_two = store.dm_history("erin", Some(2));
            assert_eq!(last_two.len(), 2);
            assert_eq!(last_two[0].text, "dm 3");
            assert_eq!(store.dm_history("erin", None).len(), 5);
            assert_eq!(store.dm_history("erin", Some(50)).len(), 5);
        }

        #[test]
        fn test_update_metadata() {
            let store = ConversationStore::open_in_memory().unwrap();
            store.update_metadata("frank", "tone", serde_json::json!("casual"));
            let meta = store.metadata("frank").unwrap();
            assert_eq!(meta.extra["tone"], "casual");
        }

        #[test]
        fn test_clear_one_and_all() {
            let store = ConversationStore::open_in_memory().unwrap();
            store.append_dm("a", Message::dm("x", false));
            store.append_dm("b", Message::dm("y", false));
            assert_eq!(store.clear(Some("a")), WriteStatus::Persisted);
            assert_eq!(store.handles(), vec!["b".to_string()]);
            assert_eq!(store.clear(Some("a")), WriteStatus::Ignored);
            assert_eq!(store.clear(None), WriteStatus::Persisted);
            assert!(store.handles().is_empty());
            let rows: i64 = store
                .db()
                .query_row("SELECT COUNT(*) FROM conversations", [], |r| r.get(0))
                .unwrap();
            assert_eq!(rows, 0);
        }

        #[test]
        fn test_persists_across_reopen() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("engage.db");
            {
                let store = ConversationStore::open(&path).unwrap();
                store.append_dm("alice", Message::dm("remember me", false));
                store.append_mention("alice", MentionRecord::replied("9", "q", "a"));
            }
            let store = ConversationStore::open(&path).unwrap();
            let conv = store.get("alice").unwrap();
            assert_eq!(conv.dms[0].text, "remember me");
            assert!(conv.has_replied_to("9"));
        }

        #[test]
        fn test_corrupt_record_is_skipped_at_load() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("engage.db");
            {
                let store = ConversationStore::open(&path).unwrap();
                store.append_dm("good", Message::dm("fine", false));
                store
                    .db()
                    .execute(
                        "INSERT INTO conversations (handle, data_json, updated_at) VALUES ('bad', '{not json', '')",
                        [],
                    )
                    .unwrap();
            }
            let store = ConversationStore::open(&path).unwrap();
            assert_eq!(store.handles(), vec!["good".to_string()]);
        }

        #[test]
        fn test_unreadable_row_is_skipped_at_load() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("engage.db");
            {
                let store = ConversationStore::open(&path).unwrap();
                store.append_dm("good", Message::dm("fine", false));
                store
                    .db()
                    .execute(
                        "INSERT INTO conversations (handle, data_json, updated_at) VALUES ('blob', X'FF00', '')",
                        [],
                    )
                    .unwrap();
            }
            let store = ConversationStore::open(&path).unwrap();
            assert_eq!(store.handles(), vec!["good".to_string()]);
        }

        #[test]
        fn test_failed_write_is_retried_on_next_mutation() {
            let store = ConversationStore::open_in_memory().unwrap();
            store
                .db()
                .execute_batch("ALTER TABLE conversations RENAME TO conversations_off")
                .unwrap();

            assert_eq!(store.append_dm("alice", Message::dm("kept", false)), WriteStatus::Deferred);
            // In-memory state survives the failed write
            assert_eq!(store.dm_history("alice", None).len(), 1);
            assert_eq!(store.pending_writes(), 1);

            store
                .db()
                .execute_batch("ALTER TABLE conversations_off RENAME TO conversations")
                .unwrap();

            assert_eq!(store.append_dm("bob", Message::dm("later", false)), WriteStatus::Persisted);
            assert_eq!(store.pending_writes(), 0);
            let rows: i64 = store
                .db()
                .query_row("SELECT COUNT(*) FROM conversations", [], |r| r.get(0))
                .unwrap();
            assert_eq!(rows, 2);
        }

        #[test]
        fn test_flush_reports_pending() {
            let store = ConversationStore::open_in_memory().unwrap();
            store
                .db()
                .execute_batch("ALTER TABLE conversations RENAME TO conversations_off")
                .unwrap();
            store.append_dm("alice", Message::dm("x", false));
            assert_eq!(store.flush(), 1);
            store
                .db()
                .execute_batch("ALTER TABLE conversations_off RENAME TO conversations")
                .unwrap();
            assert_eq!(store.flush(), 0);
        }

        #[test]
        fn test_open_fails_on_unwritable_path() {
            let dir = tempfile::tempdir().unwrap();
            let blocker = dir.path().join("file");
            std::fs::write(&blocker, "not a directory").unwrap();
            let err = ConversationStore::open(&blocker.join("engage.db")).err().unwrap();
            assert!(err.is_fatal());
        }
    }

    // ── Dedup ledger ───────────────────────────────────────────

    mod ledger {
        use super::*;

        fn setup() -> (Arc<ConversationStore>, DedupLedger) {
            let store = Arc::new(ConversationStore::open_in_memory().unwrap());
            let ledger = DedupLedger::new(Arc::clone(&store));
            (store, ledger)
        }

        #[test]
        fn test_mention_recorded_once() {
            let (_, ledger) = setup();
            let id = SignalId::mention("100");
            assert!(!ledger.has_handled(&id));
            ledger.record_handled(&id, "alice").unwrap();
            ledger.record_handled(&id, "alice").unwrap();
            assert!(ledger.has_handled(&id));
            assert_eq!(ledger.len(), 1);
            assert_eq!(ledger.entries(10).unwrap()[0].signal_id, "mention:100");
        }

        #[test]
        fn test_mention_handled_via_memory_record() {
            let (store, ledger) = setup();
            store.append_mention("alice", MentionRecord::replied("200", "q", "a"));
            assert!(ledger.has_handled(&SignalId::mention("200")));
            assert!(ledger.is_empty());
        }

        #[test]
        fn test_dm_handled_when_thread_ends_with_us() {
            let (_, ledger) = setup();
            let thread = RawThread {
                handle: Some("alice".into()),
                thread_ref: "t".into(),
                messages: vec![RawMessage::new("hey", false), RawMessage::new("hi alice", true)],
            };
            assert!(ledger.dm_thread_handled("alice", &thread));
        }

        #[test]
        fn test_dm_handled_via_ledger_until_counterparty_writes_again() {
            let (store, ledger) = setup();
            let thread = RawThread {
                handle: Some("alice".into()),
                thread_ref: "t".into(),
                messages: vec![RawMessage::new("are you there?", false)],
            };
            assert!(!ledger.dm_thread_handled("alice", &thread));

            // Reply went out, platform view has not caught up yet
            store.append_dm("alice", Message::dm("are you there?", false));
            store.append_dm("alice", Message::dm("yes!", true));
            ledger
                .record_handled(&SignalId::dm("alice", "are you there?"), "alice")
                .unwrap();
            assert!(ledger.dm_thread_handled("alice", &thread));

            // Counterparty speaks again: newest stored DM is theirs
            store.append_dm("alice", Message::dm("are you there?", false));
            assert!(!ledger.dm_thread_handled("alice", &thread));
        }
        #[test]
        fn test_same_text_after_visible_reply_is_new() {
            let (store, ledger) = setup();
            store.append_dm("alice", Message::dm("thanks", false).at(Utc::now() - Duration::minutes(5)));
            store.append_dm("alice", Message::dm("anytime!", true).at(Utc::now() - Duration::minutes(4)));
            ledger.record_handled(&SignalId::dm("alice", "thanks"), "alice").unwrap();

            // Our reply is visible, then the same words arrive again
            let mut resent = RawMessage::new("thanks", false);
            resent.timestamp = None;
            let thread = RawThread {
                handle: Some("alice".into()),
                thread_ref: "t".into(),
                messages: vec![
                    RawMessage::new("thanks", false),
                    RawMessage::new("anytime!", true),
                    resent,
                ],
            };
            assert!(!ledger.dm_thread_handled("alice", &thread));
        }

        #[test]
        fn test_same_text_stamped_after_reply_is_new() {
            let (store, ledger) = setup();
            store.append_dm("alice", Message::dm("ok", false).at(Utc::now() - Duration::minutes(5)));
            store.append_dm("alice", Message::dm("great", true).at(Utc::now() - Duration::minutes(4)));
            ledger.record_handled(&SignalId::dm("alice", "ok"), "alice").unwrap();

            // Scraped window no longer includes our reply, but the stamp is newer
            let thread = RawThread {
                handle: Some("alice".into()),
                thread_ref: "t".into(),
                messages: vec![RawMessage::new("ok", false)],
            };
            assert!(!ledger.dm_thread_handled("alice", &thread));
        }
    }

    // ── Post queue ─────────────────────────────────────────────

    mod posts {
        use super::*;

        #[test]
        fn test_fifo_and_status() {
            let store = ConversationStore::open_in_memory().unwrap();
            let queue = store.post_queue();
            let first = queue.enqueue("first post").unwrap();
            queue.enqueue("second post").unwrap();
            assert_eq!(queue.pending_count().unwrap(), 2);

            let next = queue.next_pending().unwrap().unwrap();
            assert_eq!(next.id, first.id);
            queue.mark_posted(&next.id).unwrap();
            assert!(queue.last_posted_at().unwrap().is_some());

            let next = queue.next_pending().unwrap().unwrap();
            assert_eq!(next.text, "second post");
            queue.mark_failed(&next.id, "rejected").unwrap();
            assert!(queue.next_pending().unwrap().is_none());

            let all = queue.list(10).unwrap();
            assert_eq!(all.len(), 2);
            assert!(all.iter().any(|p| p.status == PostStatus::Failed
                && p.error.as_deref() == Some("rejected")));
        }

        #[test]
        fn test_mark_unknown_post_fails() {
            let store = ConversationStore::open_in_memory().unwrap();
            assert!(store.post_queue().mark_posted("missing").is_err());
        }
    }
}
