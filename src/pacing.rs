//! Pacing between embedding requests.
//!
//! [`Pacer::pace`] is awaited before every batch after the first:
//!
//! - **Fixed** sleeps a constant interval, so `n` batches wait `n - 1` times.
//! - **TokenBucket** allows `burst` requests back to back and then spaces
//!   requests at `60 / requests_per_minute` seconds.
//! - **None** never waits.
//!
//! Provider-reported limits (`Retry-After`) are handled by the provider's
//! own retry loop, see [`crate::embedding::openai`].

use std::time::Duration;
use tokio::time::Instant;

use crate::config::{PacingConfig, PacingMode};

#[derive(Debug)]
pub enum Pacer {
    None,
    Fixed(Duration),
    TokenBucket(TokenBucket),
}

impl Pacer {
    pub fn from_config(config: &PacingConfig) -> Self {
        match config.mode {
            PacingMode::None => Pacer::None,
            PacingMode::Fixed => Pacer::Fixed(Duration::from_millis(config.delay_ms)),
            PacingMode::TokenBucket => Pacer::TokenBucket(TokenBucket::new(
                config.requests_per_minute,
                config.burst,
            )),
        }
    }

    /// Wait until batch `batch_index` may be sent.
    pub async fn pace(&mut self, batch_index: usize) {
        match self {
            Pacer::None => {}
            Pacer::Fixed(delay) => {
                if batch_index > 0 && !delay.is_zero() {
                    tokio::time::sleep(*delay).await;
                }
            }
            Pacer::TokenBucket(bucket) => bucket.acquire().await,
        }
    }
}

/// A token bucket refilled continuously at `requests_per_minute / 60`
/// tokens per second, holding at most `burst` tokens.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_per_sec: f64,
    last: Instant,
}

impl TokenBucket {
    pub fn new(requests_per_minute: u32, burst: u32) -> Self {
        let capacity = f64::from(burst.max(1));
        Self {
            capacity,
            tokens: capacity,
            refill_per_sec: f64::from(requests_per_minute.max(1)) / 60.0,
            last: Instant::now(),
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last = now;
    }

    /// Take one token, sleeping until one is available.
    pub async fn acquire(&mut self) {
        self.refill();
        if self.tokens < 1.0 {
            let wait = (1.0 - self.tokens) / self.refill_per_sec;
            tokio::time::sleep(Duration::from_secs_f64(wait)).await;
            self.refill();
        }
        self.tokens = (self.tokens - 1.0).max(0.0);
    }
}
