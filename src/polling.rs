use anyhow::Result;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Fixed-interval poller bounded by an overall timeout.
#[derive(Debug, Clone)]
pub struct Poller {
    pub interval: Duration,
    pub timeout: Duration,
    pub description: String,
}

impl Poller {
    pub fn new(interval: Duration, timeout: Duration, description: impl Into<String>) -> Self {
        Self {
            interval,
            timeout,
            description: description.into(),
        }
    }

    /// Call `check` until it yields `Some`, an error, or the timeout elapses.
    /// The check runs once immediately, then after every interval.
    pub async fn poll<F, Fut, T>(&self, mut check: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Option<T>>>,
    {
        let start = tokio::time::Instant::now();
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            if let Some(value) = check().await? {
                debug!(what = %self.description, attempt, "condition met");
                return Ok(value);
            }

            if start.elapsed() + self.interval > self.timeout {
                anyhow::bail!(
                    "timeout after {}s waiting for {}",
                    self.timeout.as_secs(),
                    self.description
                );
            }

            debug!(what = %self.description, attempt, "not ready yet");
            tokio::time::sleep(self.interval).await;
        }
    }

    /// Boolean form of [`Poller::poll`].
    pub async fn poll_until<F, Fut>(&self, mut check: F) -> Result<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<bool>>,
    {
        self.poll(|| {
            let fut = check();
            async move { Ok(fut.await?.then_some(())) }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn poll_returns_value_once_ready() {
        let calls = Arc::new(AtomicU32::new(0));
        let poller = Poller::new(Duration::from_millis(10), Duration::from_secs(5), "counter");

        let c = calls.clone();
        let value = poller
            .poll(|| {
                let c = c.clone();
                async move {
                    let n = c.fetch_add(1, Ordering::SeqCst);
                    Ok((n >= 2).then_some(n))
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn poll_times_out() {
        let poller = Poller::new(Duration::from_millis(10), Duration::from_millis(50), "never");
        let err = poller
            .poll_until(|| async { Ok(false) })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("waiting for never"));
    }

    #[tokio::test]
    async fn poll_stops_on_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let poller = Poller::new(Duration::from_millis(10), Duration::from_secs(5), "failing");

        let c = calls.clone();
        let result: Result<()> = poller
            .poll(|| {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    anyhow::bail!("boom")
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
