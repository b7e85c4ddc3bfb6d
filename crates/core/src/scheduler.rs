//! Periodic loops with jitter and a hard timeout per iteration.

use anyhow::Result;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, error, warn};

/// Hard timeout of an iteration as a multiple of the loop frequency.
pub const HARD_TIMEOUT_MULTIPLIER: u32 = 5;

/// Returned by an iteration to keep or stop its loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopControl {
    Continue,
    Stop,
}

#[derive(Debug, Clone)]
pub struct LoopOptions {
    pub name: &'static str,
    pub frequency: Duration,
    /// Upper bound of the random delay added to each wait.
    pub max_jitter: Duration,
    /// The loop stops waiting for an iteration running longer.
    pub hard_timeout: Duration,
    pub initial_delay: Duration,
}

impl LoopOptions {
    /// Jitter of up to `max_wait_percentage` of `frequency`, a hard timeout
    /// of five frequencies and a first run one frequency after start.
    pub fn new(name: &'static str, frequency: Duration, max_wait_percentage: u64) -> Self {
        let max_jitter_ms = frequency.as_millis() as u64 * max_wait_percentage / 100;
        Self {
            name,
            frequency,
            max_jitter: Duration::from_millis(max_jitter_ms),
            hard_timeout: frequency * HARD_TIMEOUT_MULTIPLIER,
            initial_delay: frequency,
        }
    }

    pub fn with_initial_delay(mut self, initial_delay: Duration) -> Self {
        self.initial_delay = initial_delay;
        self
    }

    fn jitter(&self) -> Duration {
        let max_ms = self.max_jitter.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
    }
}

/// Run `iteration` until it returns `LoopControl::Stop`.
///
/// Each iteration runs as its own task. Failed iterations are logged and the
/// loop carries on. An iteration that outlives the hard timeout is given up
/// on but keeps running in the background, so whatever it holds is still
/// released when it finishes. The next iteration starts one frequency after
/// the previous one started (or right away when it overran), plus jitter.
pub async fn run_in_loop<F, Fut>(options: LoopOptions, mut iteration: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<LoopControl>> + Send + 'static,
{
    if !options.initial_delay.is_zero() {
        sleep(options.initial_delay).await;
    }

    loop {
        let started = Instant::now();
        let task = tokio::spawn(iteration());
        match timeout(options.hard_timeout, task).await {
            Ok(Ok(Ok(LoopControl::Continue))) => {}
            Ok(Ok(Ok(LoopControl::Stop))) => {
                debug!(name = options.name, "Loop stopped");
                break;
            }
            Ok(Ok(Err(e))) => error!(name = options.name, error = %format!("{e:#}"), "Loop iteration failed"),
            Ok(Err(e)) => error!(name = options.name, error = %e, "Loop iteration panicked"),
            Err(_) => warn!(
                name = options.name,
                hard_timeout_ms = options.hard_timeout.as_millis() as u64,
                "Loop iteration exceeded its hard timeout, no longer waiting for it"
            ),
        }

        let wait = options.frequency.saturating_sub(started.elapsed()) + options.jitter();
        sleep(wait).await;
    }
}
