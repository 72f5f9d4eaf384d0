//! Rolling-window request budget per client address.

use crate::{AgroError, Result};
use dashmap::DashMap;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub requests: u32,
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests: std::env::var("RATE_LIMIT_REQUESTS")
                .ok()
                .and_then(|v| v.parse::<u32>().ok())
                .unwrap_or(30),
            window_secs: std::env::var("RATE_LIMIT_WINDOW_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(60),
        }
    }
}

pub struct RateLimiter {
    config: RateLimitConfig,
    hits: DashMap<String, VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            hits: DashMap::new(),
        }
    }

    fn window(&self) -> Duration {
        Duration::from_secs(self.config.window_secs)
    }

    /// Count one request for `client`, or reject it if the window is full
    pub fn check(&self, client: &str) -> Result<()> {
        let now = Instant::now();
        let window = self.window();
        let mut hits = self.hits.entry(client.to_string()).or_default();

        while hits
            .front()
            .is_some_and(|t| now.duration_since(*t) >= window)
        {
            hits.pop_front();
        }

        if hits.len() >= self.config.requests as usize {
            return Err(AgroError::RateLimited {
                limit: self.config.requests,
                window_secs: self.config.window_secs,
            });
        }
        hits.push_back(now);
        Ok(())
    }

    /// Forget clients with no requests inside the window
    pub fn prune(&self) -> usize {
        let now = Instant::now();
        let window = self.window();
        let before = self.hits.len();
        self.hits
            .retain(|_, hits| hits.back().is_some_and(|t| now.duration_since(*t) < window));
        before - self.hits.len()
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_request_over_limit() {
        let limiter = RateLimiter::new(RateLimitConfig {
            requests: 3,
            window_secs: 60,
        });
        for _ in 0..3 {
            limiter.check("10.0.0.1").unwrap();
        }
        let err = limiter.check("10.0.0.1").unwrap_err();
        assert!(matches!(err, AgroError::RateLimited { limit: 3, window_secs: 60 }));
        assert_eq!(
            err.user_message(),
            "Rate limit exceeded. Maximum 3 requests per minute."
        );

        // Other clients keep their own budget
        limiter.check("10.0.0.2").unwrap();
    }

    #[test]
    fn test_window_rolls() {
        let limiter = RateLimiter::new(RateLimitConfig {
            requests: 1,
            window_secs: 0,
        });
        limiter.check("a").unwrap();
        limiter.check("a").unwrap();
        assert_eq!(limiter.prune(), 1);
    }
}
