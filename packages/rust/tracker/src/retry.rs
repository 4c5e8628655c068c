//! Bounded exponential backoff for transient API errors.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use vigil_shared::Result;

/// Base delay for the first retry; doubles per attempt.
const BASE_BACKOFF: Duration = Duration::from_millis(200);

/// Run `op`, retrying transient failures up to `max_retries` times with
/// exponential backoff. Fatal and non-API errors are returned immediately.
pub async fn with_retries<T, F, Fut>(max_retries: u32, op_name: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt: u32 = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < max_retries => {
                let backoff = BASE_BACKOFF * 2u32.saturating_pow(attempt);
                warn!(
                    op = op_name,
                    attempt = attempt + 1,
                    max = max_retries,
                    ?backoff,
                    error = %e,
                    "transient error, retrying"
                );
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use vigil_shared::VigilError;

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in = calls.clone();

        let result = with_retries(3, "test", move || {
            let calls = calls_in.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(VigilError::TransientApi("429".into()))
                } else {
                    Ok(7u32)
                }
            }
        })
        .await;

        assert_eq!(result.expect("eventual success"), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_bounded_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in = calls.clone();

        let result: Result<()> = with_retries(2, "test", move || {
            let calls = calls_in.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(VigilError::TransientApi("timeout".into()))
            }
        })
        .await;

        assert!(result.expect_err("exhausted").is_transient());
        // Initial attempt + 2 retries.
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn fatal_errors_are_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in = calls.clone();

        let result: Result<()> = with_retries(5, "test", move || {
            let calls = calls_in.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(VigilError::FatalApi("401".into()))
            }
        })
        .await;

        assert!(result.expect_err("fatal").is_fatal());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
