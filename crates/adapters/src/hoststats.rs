// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Host load and memory sampling.
//!
//! Read straight from `/proc`; a failed read degrades to `None`, which the
//! pool treats as "no reading, do not suppress".

use std::path::Path;

/// 1/5/15-minute load averages.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoadAverages {
    pub one: f64,
    pub five: f64,
    pub fifteen: f64,
}

/// Total and available memory in kilobytes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemoryUsage {
    pub total_kb: u64,
    pub available_kb: u64,
}

impl MemoryUsage {
    /// Percentage of memory in use, 0..=100.
    pub fn used_percent(&self) -> f64 {
        if self.total_kb == 0 {
            return 0.0;
        }
        let used = self.total_kb.saturating_sub(self.available_kb);
        used as f64 * 100.0 / self.total_kb as f64
    }
}

/// Source of host statistics.
pub trait HostStats: Send + Sync + 'static {
    fn load_averages(&self) -> Option<LoadAverages>;
    fn memory(&self) -> Option<MemoryUsage>;
}

/// Production source backed by `/proc`.
#[derive(Clone, Default)]
pub struct ProcHostStats;

impl ProcHostStats {
    pub fn new() -> Self {
        Self
    }
}

impl HostStats for ProcHostStats {
    fn load_averages(&self) -> Option<LoadAverages> {
        let text = std::fs::read_to_string(Path::new("/proc/loadavg")).ok()?;
        parse_loadavg(&text)
    }

    fn memory(&self) -> Option<MemoryUsage> {
        let text = std::fs::read_to_string(Path::new("/proc/meminfo")).ok()?;
        parse_meminfo(&text)
    }
}

/// `/proc/loadavg` starts with the three averages: `0.52 0.58 0.59 ...`.
fn parse_loadavg(text: &str) -> Option<LoadAverages> {
    let mut fields = text.split_whitespace();
    Some(LoadAverages {
        one: fields.next()?.parse().ok()?,
        five: fields.next()?.parse().ok()?,
        fifteen: fields.next()?.parse().ok()?,
    })
}

/// `/proc/meminfo` lines look like `MemTotal:       16316412 kB`.
fn parse_meminfo(text: &str) -> Option<MemoryUsage> {
    let mut total = None;
    let mut available = None;
    for line in text.lines() {
        let mut parts = line.split_whitespace();
        match parts.next() {
            Some("MemTotal:") => total = parts.next().and_then(|v| v.parse().ok()),
            Some("MemAvailable:") => available = parts.next().and_then(|v| v.parse().ok()),
            _ => {}
        }
        if total.is_some() && available.is_some() {
            break;
        }
    }
    Some(MemoryUsage {
        total_kb: total?,
        available_kb: available?,
    })
}

/// Scriptable stats source for tests.
#[cfg(any(test, feature = "test-support"))]
#[derive(Clone, Default)]
pub struct FakeHostStats {
    inner: std::sync::Arc<parking_lot::Mutex<(Option<LoadAverages>, Option<MemoryUsage>)>>,
}

#[cfg(any(test, feature = "test-support"))]
impl FakeHostStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_load(&self, one: f64, five: f64, fifteen: f64) {
        self.inner.lock().0 = Some(LoadAverages { one, five, fifteen });
    }

    pub fn set_memory(&self, total_kb: u64, available_kb: u64) {
        self.inner.lock().1 = Some(MemoryUsage {
            total_kb,
            available_kb,
        });
    }

    pub fn clear(&self) {
        *self.inner.lock() = (None, None);
    }
}

#[cfg(any(test, feature = "test-support"))]
impl HostStats for FakeHostStats {
    fn load_averages(&self) -> Option<LoadAverages> {
        self.inner.lock().0
    }

    fn memory(&self) -> Option<MemoryUsage> {
        self.inner.lock().1
    }
}

#[cfg(test)]
#[path = "hoststats_tests.rs"]
mod tests;
