//! Retry policy and clock abstraction
//!
//! Metadata services are often slow or briefly unreachable while an
//! instance boots. Everything that waits between attempts goes through a
//! [`Clock`] so the waiting can be observed (and skipped) in tests.

use async_trait::async_trait;
use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::CloudInitError;

/// Number of attempts after which the delay grows by one interval
const ESCALATION_STEP: u32 = 5;

/// How often and how patiently an operation is retried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub count: u32,
    /// Base delay unit
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            count: 3,
            interval: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(count: u32, interval: Duration) -> Self {
        Self { count, interval }
    }

    /// Policy that makes exactly one attempt
    pub fn none() -> Self {
        Self {
            count: 0,
            interval: Duration::ZERO,
        }
    }

    /// Total number of attempts, including the first one
    pub fn attempts(&self) -> u32 {
        self.count.saturating_add(1)
    }

    /// Delay after the failed attempt with the given zero-based index.
    ///
    /// The delay grows linearly by one interval every five attempts.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.interval * (attempt / ESCALATION_STEP + 1)
    }
}

/// Source of time for everything that sleeps or measures deadlines
#[async_trait]
pub trait Clock: Send + Sync {
    /// Current monotonic time
    fn now(&self) -> Instant;

    /// Suspend the caller for `duration`
    async fn sleep(&self, duration: Duration);
}

/// Wall clock backed by tokio's timer
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Virtual clock for tests
///
/// Sleeping returns immediately and advances the clock by the requested
/// duration. Every requested delay is recorded.
#[derive(Debug)]
pub struct ManualClock {
    start: Instant,
    elapsed: Mutex<Duration>,
    sleeps: Mutex<Vec<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            elapsed: Mutex::new(Duration::ZERO),
            sleeps: Mutex::new(Vec::new()),
        }
    }

    /// Move the clock forward without recording a sleep
    pub fn advance(&self, duration: Duration) {
        if let Ok(mut elapsed) = self.elapsed.lock() {
            *elapsed += duration;
        }
    }

    /// Delays requested so far, in order
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        let elapsed = self.elapsed.lock().map(|e| *e).unwrap_or_default();
        self.start + elapsed
    }

    async fn sleep(&self, duration: Duration) {
        if let Ok(mut sleeps) = self.sleeps.lock() {
            sleeps.push(duration);
        }
        self.advance(duration);
        tokio::task::yield_now().await;
    }
}

/// Run `action`, retrying transient failures according to `policy`.
///
/// Errors classified as missing resources are returned at once. Any other
/// error is retried until the policy is exhausted, and the last one is
/// returned.
pub async fn exec_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    clock: &dyn Clock,
    mut action: F,
) -> Result<T, CloudInitError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CloudInitError>>,
{
    let attempts = policy.attempts();
    let mut attempt = 0;

    loop {
        match action().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_missing() => return Err(e),
            Err(e) => {
                attempt += 1;
                if attempt >= attempts {
                    return Err(e);
                }
                let delay = policy.delay_for(attempt - 1);
                debug!(
                    "Attempt {}/{} failed: {}; retrying in {:?}",
                    attempt, attempts, e, delay
                );
                clock.sleep(delay).await;
            }
        }
    }
}
