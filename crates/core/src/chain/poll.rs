//! Sequential wait-then-retry confirmation polling

use crate::{
    config::BackoffPolicy,
    error::{Error, Result},
};
use std::future::Future;

/// Calls `check` until it yields a value, waiting per `policy` between attempts.
///
/// `Ok(None)` means "not yet". Network errors are treated the same way since
/// a flaky endpoint should not abort a submitted transaction; any other error
/// ends polling immediately. After `policy.max_attempts` unresolved attempts
/// the result is [`Error::ConfirmationTimeout`].
pub async fn poll_until<T, F, Fut>(policy: &BackoffPolicy, hash: &str, mut check: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    for attempt in 0..policy.max_attempts {
        match check().await {
            Ok(Some(value)) => {
                tracing::debug!("{} confirmed after {} attempt(s)", hash, attempt + 1);
                return Ok(value);
            }
            Ok(None) => tracing::debug!(
                "{} pending (attempt {}/{})",
                hash,
                attempt + 1,
                policy.max_attempts
            ),
            Err(Error::Network(message)) => tracing::warn!(
                "Status lookup for {} failed (attempt {}/{}): {}",
                hash,
                attempt + 1,
                policy.max_attempts,
                message
            ),
            Err(e) => return Err(e),
        }

        if attempt + 1 < policy.max_attempts {
            tokio::time::sleep(policy.delay_for(attempt)).await;
        }
    }

    Err(Error::ConfirmationTimeout {
        hash: hash.to_string(),
        attempts: policy.max_attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    };
    use std::time::Duration;

    fn counting_check(
        resolve_on: u32,
    ) -> (Arc<AtomicU32>, impl FnMut() -> std::future::Ready<Result<Option<&'static str>>>) {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let check = move || {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            std::future::ready(Ok((n == resolve_on).then_some("receipt")))
        };
        (calls, check)
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolves_before_max_attempts() {
        let policy = BackoffPolicy::confirmation(60);
        let (calls, check) = counting_check(4);

        let started = tokio::time::Instant::now();
        let value = poll_until(&policy, "0xabc", check).await.unwrap();
        assert_eq!(value, "receipt");
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        // 2s + 3s + 4.5s of backoff before the fourth attempt
        assert_eq!(started.elapsed(), Duration::from_millis(9_500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_after_exactly_max_attempts() {
        let policy = BackoffPolicy::confirmation(30);
        let (calls, check) = counting_check(u32::MAX);

        let err = poll_until(&policy, "0xdead", check).await.unwrap_err();
        assert!(matches!(
            err,
            Error::ConfirmationTimeout { attempts: 30, ref hash } if hash == "0xdead"
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 30);
    }

    #[tokio::test(start_paused = true)]
    async fn test_network_errors_are_retried_and_others_are_not() {
        let policy = BackoffPolicy::confirmation(5);
        let mut calls = 0;
        let value = poll_until(&policy, "h", || {
            calls += 1;
            let result = if calls < 3 {
                Err(Error::network("connection reset"))
            } else {
                Ok(Some(calls))
            };
            std::future::ready(result)
        })
        .await
        .unwrap();
        assert_eq!(value, 3);

        let err = poll_until(&policy, "h", || {
            std::future::ready(Err::<Option<()>, _>(Error::validation("transaction failed")))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}
