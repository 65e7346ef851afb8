#[cfg(test)]
mod tests {
    use engage_core::{EngageError, Result};
    use engage_runtime::RetryPolicy;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_millis(1), Duration::from_millis(4))
    }

    mod attempts {
        use super::*;

        #[tokio::test]
        async fn test_always_failing_operation_is_tried_exactly_max_attempts() {
            let calls = &AtomicU32::new(0);
            let result: Result<()> = fast(3)
                .run("flaky", || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(EngageError::platform("test", "timeout"))
                })
                .await;

            assert_eq!(calls.load(Ordering::SeqCst), 3);
            match result {
                Err(EngageError::RetryExhausted {
                    operation,
                    attempts,
                    reason,
                }) => {
                    assert_eq!(operation, "flaky");
                    assert_eq!(attempts, 3);
                    assert!(reason.contains("timeout"));
                }
                other => panic!("expected RetryExhausted, got {other:?}"),
            }
        }

        #[tokio::test]
        async fn test_success_on_second_attempt() {
            let calls = &AtomicU32::new(0);
            let value = fast(3)
                .run("flaky", || async move {
                    if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(EngageError::Generator("busy".into()))
                    } else {
                        Ok(42)
                    }
                })
                .await
                .unwrap();

            assert_eq!(value, 42);
            assert_eq!(calls.load(Ordering::SeqCst), 2);
        }

        #[tokio::test]
        async fn test_fatal_error_is_not_retried() {
            let calls = &AtomicU32::new(0);
            let result: Result<()> = fast(5)
                .run("login", || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(EngageError::SessionUnavailable("logged out".into()))
                })
                .await;

            assert_eq!(calls.load(Ordering::SeqCst), 1);
            assert!(matches!(result, Err(EngageError::SessionUnavailable(_))));
        }

        #[tokio::test]
        async fn test_unsupported_is_not_retried() {
            let calls = &AtomicU32::new(0);
            let result: Result<()> = fast(5)
                .run("publish_post", || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(EngageError::Unsupported {
                        platform: "inbox".into(),
                        operation: "publish_post".into(),
                    })
                })
                .await;

            assert_eq!(calls.load(Ordering::SeqCst), 1);
            assert!(result.is_err());
        }

        #[tokio::test]
        async fn test_zero_attempts_still_tries_once() {
            let calls = &AtomicU32::new(0);
            let _ = fast(0)
                .run("once", || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, EngageError>(())
                })
                .await;
            assert_eq!(calls.load(Ordering::SeqCst), 1);
        }
    }

    mod delays {
        use super::*;
        use engage_config::RetryConfig;

        #[test]
        fn test_delay_doubles_up_to_the_cap() {
            let policy = RetryPolicy::new(5, Duration::from_secs(1), Duration::from_secs(30));
            assert_eq!(policy.delay_for(0), Duration::from_secs(1));
            assert_eq!(policy.delay_for(1), Duration::from_secs(2));
            assert_eq!(policy.delay_for(4), Duration::from_secs(16));
            assert_eq!(policy.delay_for(5), Duration::from_secs(30));
            assert_eq!(policy.delay_for(64), Duration::from_secs(30));
        }

        #[test]
        fn test_policy_from_config() {
            let policy = RetryPolicy::from(&RetryConfig::default());
            assert_eq!(policy.max_attempts, 3);
            assert_eq!(policy.base_delay, Duration::from_millis(1000));
            assert_eq!(policy, RetryPolicy::default());
        }
    }
}
