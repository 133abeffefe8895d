// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Clock abstraction so time-dependent logic is testable.

use std::time::{SystemTime, UNIX_EPOCH};

/// Source of wall-clock time.
pub trait Clock: Clone + Send + Sync + 'static {
    /// Seconds since the Unix epoch, with sub-second precision.
    fn epoch_f64(&self) -> f64;

    /// Whole seconds since the Unix epoch.
    fn epoch_secs(&self) -> u64 {
        self.epoch_f64() as u64
    }
}

/// Real wall clock for production use.
#[derive(Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn epoch_f64(&self) -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0)
    }
}

/// Manually advanced clock for tests.
#[cfg(any(test, feature = "test-support"))]
#[derive(Clone)]
pub struct FakeClock {
    now: std::sync::Arc<std::sync::atomic::AtomicU64>,
}

#[cfg(any(test, feature = "test-support"))]
impl FakeClock {
    /// Create a fake clock starting at the given epoch second.
    pub fn at(epoch_secs: u64) -> Self {
        Self {
            now: std::sync::Arc::new(std::sync::atomic::AtomicU64::new(epoch_secs * 1000)),
        }
    }

    /// Advance the clock by whole seconds.
    pub fn advance_secs(&self, secs: u64) {
        self.now
            .fetch_add(secs * 1000, std::sync::atomic::Ordering::SeqCst);
    }
}

#[cfg(any(test, feature = "test-support"))]
impl Clock for FakeClock {
    fn epoch_f64(&self) -> f64 {
        self.now.load(std::sync::atomic::Ordering::SeqCst) as f64 / 1000.0
    }
}

#[cfg(test)]
#[path = "clock_tests.rs"]
mod tests;
