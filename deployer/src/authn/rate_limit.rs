//! Fixed window rate limiter keyed by source identity

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::app::options::RateLimitOptions;

/// Entries kept before expired windows are swept
const SWEEP_THRESHOLD: usize = 1024;

struct RateWindow {
    count: u32,
    started_at: Instant,
}

/// Process-local request counter.
///
/// A source may make `limit` requests per window; the window restarts on
/// the first request after it elapses. A limit of 0 disables limiting.
pub struct RateLimiter {
    limit: u32,
    window: Duration,
    windows: Mutex<HashMap<String, RateWindow>>,
}

impl RateLimiter {
    pub fn new(options: RateLimitOptions) -> Self {
        if options.limit == 0 {
            info!("Rate limiting disabled (limit=0)");
        } else {
            info!(
                "Rate limiter initialized: {} requests per {:?}",
                options.limit, options.window
            );
        }
        Self {
            limit: options.limit,
            window: options.window,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Count a request from `source` and report whether it is allowed
    pub fn allow(&self, source: &str) -> bool {
        self.allow_at(source, Instant::now())
    }

    /// Same as [`RateLimiter::allow`] with an explicit clock reading
    pub fn allow_at(&self, source: &str, now: Instant) -> bool {
        if self.limit == 0 {
            return true;
        }

        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());

        if windows.len() >= SWEEP_THRESHOLD {
            let window = self.window;
            windows.retain(|_, w| now.saturating_duration_since(w.started_at) < window);
        }

        let entry = windows.entry(source.to_string()).or_insert(RateWindow {
            count: 0,
            started_at: now,
        });

        if now.saturating_duration_since(entry.started_at) >= self.window {
            entry.count = 0;
            entry.started_at = now;
        }

        entry.count = entry.count.saturating_add(1);
        let allowed = entry.count <= self.limit;
        if !allowed {
            debug!("Rate limit exceeded for {} ({} requests)", source, entry.count);
        }
        allowed
    }
}
