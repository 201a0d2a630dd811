//! `poll` — the one shared "await a DHT key" primitive (Design Notes §9:
//! "Generator-like awaiting on DHT keys"). Every component that needs to
//! wait for a value to appear uses this instead of hand-rolling a
//! sleep/retry loop (as the source's per-handler `_wait_for_data` did).

use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep, Instant};

/// Poll `fetch` every `interval` until it returns `Some(_)` or `timeout`
/// elapses, returning `None` on timeout. `fetch` is re-invoked fresh on
/// every attempt (e.g. `|| node.get(key)`).
pub async fn poll<F, Fut, T>(mut fetch: F, interval: Duration, timeout: Duration) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(value) = fetch().await {
            return Some(value);
        }
        if Instant::now() >= deadline {
            return None;
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        sleep(interval.min(remaining.max(Duration::from_millis(1)))).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn returns_as_soon_as_value_appears() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let a = attempts.clone();
        let result = poll(
            move || {
                let a = a.clone();
                async move {
                    let n = a.fetch_add(1, Ordering::SeqCst);
                    if n >= 2 {
                        Some(42)
                    } else {
                        None
                    }
                }
            },
            Duration::from_millis(5),
            Duration::from_secs(1),
        )
        .await;
        assert_eq!(result, Some(42));
    }

    #[tokio::test]
    async fn returns_none_on_timeout() {
        let result: Option<i32> = poll(
            || async { None },
            Duration::from_millis(5),
            Duration::from_millis(30),
        )
        .await;
        assert_eq!(result, None);
    }
}
