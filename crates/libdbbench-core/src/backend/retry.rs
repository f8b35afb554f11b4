//! Bounded local retry of transient failures

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::debug;

use super::Connection;
use crate::config::RetryPolicy;
use crate::error::ExecutionError;
use crate::runner::StopSignal;
use crate::types::Operation;

/// Longest uninterrupted sleep while backing off
const BACKOFF_SLICE: Duration = Duration::from_millis(10);

/// Connection decorator retrying transient errors with exponential backoff.
///
/// Rejected and fatal errors are returned immediately. A transient error
/// that outlives `max_retries`, or is still pending when the run stops, is
/// returned as is, so it still ends up as a failed sample.
pub struct Retrying {
    inner: Box<dyn Connection>,
    policy: RetryPolicy,
    stop: Option<Arc<StopSignal>>,
}

impl Retrying {
    pub fn new(inner: Box<dyn Connection>, policy: RetryPolicy) -> Self {
        Self {
            inner,
            policy,
            stop: None,
        }
    }

    /// Give up retrying as soon as `stop` is raised
    pub fn with_stop(mut self, stop: Arc<StopSignal>) -> Self {
        self.stop = Some(stop);
        self
    }

    fn stopped(&self) -> bool {
        self.stop.as_ref().is_some_and(|stop| stop.should_stop())
    }

    /// Sleep `delay` in short slices. Returns false if the run stopped first.
    fn backoff(&self, delay: Duration) -> bool {
        let until = Instant::now() + delay;
        loop {
            if self.stopped() {
                return false;
            }
            let now = Instant::now();
            if now >= until {
                return true;
            }
            thread::sleep(BACKOFF_SLICE.min(until - now));
        }
    }
}

impl Connection for Retrying {
    fn execute(&mut self, op: &Operation) -> Result<Duration, ExecutionError> {
        let start = Instant::now();
        let mut attempt = 0;

        loop {
            match self.inner.execute(op) {
                // Latency of a retried operation includes the failed attempts
                Ok(latency) if attempt == 0 => return Ok(latency),
                Ok(_) => return Ok(start.elapsed()),
                Err(e) if e.is_transient() && attempt < self.policy.max_retries => {
                    attempt += 1;
                    let delay = self.policy.delay_for(attempt);
                    debug!(
                        op = %op.kind(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying transient failure"
                    );
                    if !self.backoff(delay) {
                        debug!(op = %op.kind(), attempt, "Run stopping, retry abandoned");
                        return Err(e);
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Wrap `conn` in a [`Retrying`] decorator bound to the run's `stop`
/// signal, unless retries are disabled
pub fn with_retry(
    conn: Box<dyn Connection>,
    policy: RetryPolicy,
    stop: Arc<StopSignal>,
) -> Box<dyn Connection> {
    if policy.max_retries == 0 {
        conn
    } else {
        Box::new(Retrying::new(conn, policy).with_stop(stop))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::StopReason;
    use crate::types::{ErrorClass, OpKind};

    /// Fails with `class` for the first `failures` calls
    struct Flaky {
        failures: u32,
        class: ErrorClass,
        calls: u32,
    }

    impl Connection for Flaky {
        fn execute(&mut self, op: &Operation) -> Result<Duration, ExecutionError> {
            self.calls += 1;
            if self.calls <= self.failures {
                Err(ExecutionError::new("test", op.kind(), self.class, "flaky"))
            } else {
                Ok(Duration::from_micros(5))
            }
        }
    }

    fn op() -> Operation {
        Operation::Select {
            table: Arc::from("simple"),
            key: 1,
        }
    }

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            backoff: Duration::from_millis(1),
        }
    }

    #[test]
    fn test_transient_errors_are_retried() {
        let flaky = Flaky { failures: 2, class: ErrorClass::Transient, calls: 0 };
        let mut conn = Retrying::new(Box::new(flaky), policy(3));
        let latency = conn.execute(&op()).unwrap();
        // Two backoffs of 1ms and 2ms
        assert!(latency >= Duration::from_millis(3));
    }

    #[test]
    fn test_gives_up_after_max_retries() {
        let flaky = Flaky { failures: 10, class: ErrorClass::Transient, calls: 0 };
        let mut conn = Retrying::new(Box::new(flaky), policy(2));
        let err = conn.execute(&op()).unwrap_err();
        assert!(err.is_transient());
        assert_eq!(err.op, OpKind::Select);
    }

    #[test]
    fn test_rejected_errors_are_not_retried() {
        let flaky = Flaky { failures: 1, class: ErrorClass::Rejected, calls: 0 };
        let mut conn = Retrying::new(Box::new(flaky), policy(5));
        assert_eq!(conn.execute(&op()).unwrap_err().class, ErrorClass::Rejected);
        // The next call succeeds, so only one attempt was made
        assert!(conn.execute(&op()).is_ok());
    }

    #[test]
    fn test_zero_retries_skips_wrapping() {
        let flaky = Flaky { failures: 1, class: ErrorClass::Transient, calls: 0 };
        let mut conn = with_retry(Box::new(flaky), policy(0), Arc::new(StopSignal::new(None)));
        assert!(conn.execute(&op()).is_err());
        assert!(conn.execute(&op()).is_ok());
    }

    #[test]
    fn test_raised_stop_ends_backoff() {
        let flaky = Flaky { failures: u32::MAX, class: ErrorClass::Transient, calls: 0 };
        let stop = Arc::new(StopSignal::new(None));
        let slow = RetryPolicy {
            max_retries: 10,
            backoff: Duration::from_secs(1),
        };
        let mut conn = Retrying::new(Box::new(flaky), slow).with_stop(Arc::clone(&stop));

        let started = Instant::now();
        let err = thread::scope(|s| {
            s.spawn(|| {
                thread::sleep(Duration::from_millis(50));
                stop.raise(StopReason::Interrupted);
            });
            conn.execute(&op()).unwrap_err()
        });

        assert!(err.is_transient());
        assert!(
            started.elapsed() < Duration::from_millis(500),
            "backoff outlived the stop by {:?}",
            started.elapsed()
        );
    }

    #[test]
    fn test_no_retry_once_stopped() {
        let flaky = Flaky { failures: 1, class: ErrorClass::Transient, calls: 0 };
        let stop = Arc::new(StopSignal::new(None));
        stop.raise(StopReason::DurationElapsed);
        let mut conn = Retrying::new(Box::new(flaky), policy(5)).with_stop(stop);

        assert!(conn.execute(&op()).is_err());
        // The failed call was not repeated, so the next one is the first to succeed
        assert!(conn.execute(&op()).is_ok());
    }
}
