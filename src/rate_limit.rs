use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Local request throttle, consulted once per call before anything is sent.
pub trait RateLimit: Send + Sync {
    /// Record one request attempt and report whether the limit is now exceeded.
    fn record_and_check(&self) -> bool;
}

/// Sliding-window limiter: at most `max_requests` attempts within `window`.
pub struct WindowLimiter {
    max_requests: usize,
    window: Duration,
    attempts: Mutex<VecDeque<Instant>>,
}

impl WindowLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        WindowLimiter { max_requests, window, attempts: Mutex::new(VecDeque::new()) }
    }
}

impl RateLimit for WindowLimiter {
    fn record_and_check(&self) -> bool {
        let now = Instant::now();
        let mut attempts = self.attempts.lock().expect("rate limiter lock poisoned");
        while attempts.front().is_some_and(|t| now.duration_since(*t) > self.window) {
            attempts.pop_front();
        }
        attempts.push_back(now);
        attempts.len() > self.max_requests
    }
}

/// A limiter that never trips, for embedders that throttle elsewhere.
pub struct Unlimited;

impl RateLimit for Unlimited {
    fn record_and_check(&self) -> bool {
        false
    }
}
