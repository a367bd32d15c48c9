//! Per-tenant fixed-window rate limiter.
//!
//! Each tenant gets a counter that resets when its window elapses. The
//! per-tenant table is a bounded cache with idle-based eviction, so a flood
//! of one-shot tenants cannot grow memory without bound.

use std::sync::Arc;
use std::time::{Duration, Instant};

use moka::sync::Cache;
use parking_lot::Mutex;

#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Maximum requests per window.
    pub max_requests: u32,
    pub window: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            max_requests: 100,
            window: Duration::from_secs(60),
        }
    }
}

#[derive(Debug)]
struct WindowState {
    window_start: Instant,
    count: u32,
}

/// Result of a rate-limit check.
#[derive(Debug)]
pub enum RateLimitResult {
    Allowed { remaining: u32 },
    Limited { retry_after: Duration },
}

impl RateLimitResult {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }
}

pub struct RateLimiter {
    config: RateLimiterConfig,
    windows: Cache<String, Arc<Mutex<WindowState>>>,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        // Tenants idle for 10 windows are evicted.
        let windows = Cache::builder()
            .max_capacity(100_000)
            .time_to_idle(config.window * 10)
            .build();
        Self { config, windows }
    }

    /// Count one request against the tenant's current window.
    pub fn check(&self, tenant: &str) -> RateLimitResult {
        let state = self.windows.get_with(tenant.to_string(), || {
            Arc::new(Mutex::new(WindowState {
                window_start: Instant::now(),
                count: 0,
            }))
        });

        let mut state = state.lock();
        let elapsed = state.window_start.elapsed();
        if elapsed >= self.config.window {
            state.window_start = Instant::now();
            state.count = 0;
        }

        if state.count >= self.config.max_requests {
            return RateLimitResult::Limited {
                retry_after: self.config.window.saturating_sub(elapsed),
            };
        }

        state.count += 1;
        RateLimitResult::Allowed {
            remaining: self.config.max_requests - state.count,
        }
    }

    /// Number of tenants currently tracked.
    pub fn tenant_count(&self) -> u64 {
        self.windows.entry_count()
    }
}
