//! Bounded polling
//!
//! Every wait in the suite funnels through [`poll_until`]: browser element
//! checks and the post-restart health probe alike. Nothing waits forever.

use std::future::Future;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::debug;

use crate::error::{E2eError, E2eResult};

/// Default gap between probes
pub const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Run `probe` until it returns `Ok(true)` or `timeout` elapses.
///
/// The probe runs at least once. An `Err` from the probe aborts the wait
/// immediately; probes that want to tolerate transient failures map them
/// to `Ok(false)` themselves.
pub async fn poll_until<F, Fut>(
    what: &str,
    timeout: Duration,
    interval: Duration,
    mut probe: F,
) -> E2eResult<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = E2eResult<bool>>,
{
    let start = Instant::now();
    let mut attempts = 0usize;

    loop {
        attempts += 1;
        if probe().await? {
            debug!("{} satisfied after {} attempt(s)", what, attempts);
            return Ok(());
        }

        let elapsed = start.elapsed();
        if elapsed >= timeout {
            return Err(E2eError::Timeout(format!(
                "{} ({} attempts in {} ms)",
                what,
                attempts,
                elapsed.as_millis()
            )));
        }

        sleep(interval.min(timeout - elapsed)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[tokio::test]
    async fn test_returns_once_probe_succeeds() {
        let calls = Cell::new(0);
        poll_until("third call", Duration::from_secs(5), Duration::from_millis(1), || {
            calls.set(calls.get() + 1);
            let done = calls.get() >= 3;
            async move { Ok(done) }
        })
        .await
        .unwrap();
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test]
    async fn test_times_out() {
        let err = poll_until("never", Duration::from_millis(30), Duration::from_millis(5), || async {
            Ok(false)
        })
        .await
        .unwrap_err();

        match err {
            E2eError::Timeout(msg) => assert!(msg.starts_with("never")),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_probes_at_least_once_with_zero_timeout() {
        let calls = Cell::new(0);
        poll_until("immediate", Duration::ZERO, Duration::from_millis(1), || {
            calls.set(calls.get() + 1);
            async { Ok(true) }
        })
        .await
        .unwrap();
        assert_eq!(calls.get(), 1);
    }

    #[tokio::test]
    async fn test_probe_error_aborts() {
        let calls = Cell::new(0);
        let err = poll_until("failing", Duration::from_secs(5), Duration::from_millis(1), || {
            calls.set(calls.get() + 1);
            async { Err(E2eError::Browser("driver gone".into())) }
        })
        .await
        .unwrap_err();
        assert!(matches!(err, E2eError::Browser(_)));
        assert_eq!(calls.get(), 1);
    }
}
