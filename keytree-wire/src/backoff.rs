//! Per-connection exponential backoff.

use std::time::Duration;

use rand::Rng;

const INITIAL_DELAY: Duration = Duration::from_secs(1);
const MAX_DELAY: Duration = Duration::from_secs(60);
const JITTER: f64 = 0.4;

/// Exponential backoff from 1 s doubling to 60 s, with ±40 % jitter.
///
/// Reset after any successful call so a healthy connection pays nothing.
pub struct Backoff {
    delay: Duration,
}

impl Backoff {
    pub fn new() -> Backoff {
        Backoff { delay: INITIAL_DELAY }
    }

    /// Sleep for the current jittered delay, then double it.
    pub async fn wait(&mut self) {
        let factor = rand::thread_rng().gen_range(1.0 - JITTER..1.0 + JITTER);
        tokio::time::sleep(self.delay.mul_f64(factor)).await;
        self.delay = (self.delay * 2).min(MAX_DELAY);
    }

    pub fn reset(&mut self) {
        self.delay = INITIAL_DELAY;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::new()
    }
}
