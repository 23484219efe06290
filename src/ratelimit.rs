//! Per-user fixed-window request counter.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use log::debug;
use tokio::sync::Mutex;

use crate::config::RateLimitConfig;

#[derive(Debug)]
struct Window {
    started: Instant,
    count: u32,
}

pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    windows: Mutex<HashMap<i64, Window>>,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.max_requests, Duration::from_secs(config.window_secs))
    }

    /// Count a request for `user_id`; false when the user is over the limit
    pub async fn check(&self, user_id: i64) -> bool {
        self.check_at(user_id, Instant::now()).await
    }

    async fn check_at(&self, user_id: i64, now: Instant) -> bool {
        let mut windows = self.windows.lock().await;

        let window = windows.entry(user_id).or_insert(Window { started: now, count: 0 });
        if now.duration_since(window.started) >= self.window {
            window.started = now;
            window.count = 0;
        }

        if window.count >= self.max_requests {
            debug!("User {user_id} over rate limit ({} requests)", window.count);
            return false;
        }
        window.count += 1;
        true
    }

    /// Drop windows that have expired
    pub async fn prune(&self) {
        let now = Instant::now();
        let mut windows = self.windows.lock().await;
        windows.retain(|_, w| now.duration_since(w.started) < self.window);
    }
}
