//! The one shared poll-with-deadline primitive.
//!
//! Every blocking contract in the middleware (consumer task fetch,
//! approval wait, scheduler supervision) goes through this loop, so the
//! timing semantics live in exactly one place. There is deliberately no
//! external cancellation: the timeout is the only way out.

use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep, Instant};

/// Poll `attempt` at a fixed cadence until it yields a value or the
/// deadline passes. A `timeout` of `None` or zero waits indefinitely.
///
/// The attempt runs once immediately, and once more right at the deadline,
/// so a value that appears just in time is still observed.
pub async fn poll_until<F, Fut, T>(
    interval: Duration,
    timeout: Option<Duration>,
    mut attempt: F,
) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let deadline = timeout
        .filter(|t| !t.is_zero())
        .map(|t| Instant::now() + t);
    loop {
        if let Some(value) = attempt().await {
            return Some(value);
        }
        match deadline {
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    return None;
                }
                sleep(interval.min(deadline - now)).await;
            }
            None => sleep(interval).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn returns_immediately_when_ready() {
        let start = Instant::now();
        let value = poll_until(Duration::from_secs(5), Some(Duration::from_secs(5)), || async {
            Some(42)
        })
        .await;
        assert_eq!(value, Some(42));
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn gives_up_at_the_deadline() {
        let attempts = AtomicU32::new(0);
        let start = Instant::now();
        let value: Option<()> =
            poll_until(Duration::from_millis(10), Some(Duration::from_millis(60)), || {
                attempts.fetch_add(1, Ordering::Relaxed);
                async { None }
            })
            .await;
        assert_eq!(value, None);
        assert!(start.elapsed() >= Duration::from_millis(60));
        // Bounded overshoot: one interval of slack, not an extra cycle.
        assert!(start.elapsed() < Duration::from_millis(500));
        assert!(attempts.load(Ordering::Relaxed) >= 2);
    }

    #[tokio::test]
    async fn picks_up_a_late_value() {
        let attempts = AtomicU32::new(0);
        let value = poll_until(
            Duration::from_millis(5),
            Some(Duration::from_secs(2)),
            || {
                let n = attempts.fetch_add(1, Ordering::Relaxed);
                async move { (n >= 3).then_some("ready") }
            },
        )
        .await;
        assert_eq!(value, Some("ready"));
    }
}
