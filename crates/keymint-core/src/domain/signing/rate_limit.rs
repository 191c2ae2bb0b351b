//! Sliding-window limiter for verification attempts
//!
//! Counts attempts per signature. The clock is `tokio::time::Instant`, so tests
//! can drive the window with a paused runtime.

use crate::config::RateLimitConfig;
use crate::error::{Error, Result};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Per-signature attempt limiter
#[derive(Debug)]
pub struct RateLimiter {
    max_requests: usize,
    period: Duration,
    attempts: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new(max_requests: usize, period: Duration) -> Self {
        Self {
            max_requests,
            period,
            attempts: Mutex::new(HashMap::new()),
        }
    }

    /// Build a limiter from config, or `None` when limiting is disabled
    pub fn from_config(config: &RateLimitConfig) -> Option<Self> {
        config.enabled.then(|| {
            Self::new(
                config.max_requests,
                Duration::from_secs(config.period_secs),
            )
        })
    }

    /// Record an attempt for `signature`, failing if the window is full
    ///
    /// Rejected attempts are not recorded.
    pub fn check(&self, signature: &str) -> Result<()> {
        let now = Instant::now();
        let mut attempts = self
            .attempts
            .lock()
            .map_err(|_| Error::Other("rate limiter state poisoned".to_string()))?;

        // Drop windows that have fully elapsed so the map does not grow unbounded.
        attempts.retain(|_, window| {
            window
                .back()
                .is_some_and(|last| now.duration_since(*last) < self.period)
        });

        let window = attempts.entry(signature.to_string()).or_default();
        while window
            .front()
            .is_some_and(|first| now.duration_since(*first) >= self.period)
        {
            window.pop_front();
        }

        if window.len() >= self.max_requests {
            return Err(Error::RateLimited {
                attempts: window.len(),
                period_secs: self.period.as_secs(),
            });
        }

        window.push_back(now);
        Ok(())
    }

    pub fn max_requests(&self) -> usize {
        self.max_requests
    }

    pub fn period(&self) -> Duration {
        self.period
    }
}
