// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pool supervision: a 1-second control loop sizes the worker fleet from
//! observed utilization, clamped by the host load/memory interlocks.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;

use gw_adapters::{Broker, HostStats};
use gw_core::{Cipher, Config};

use crate::metrics::Metrics;
use crate::worker::{Worker, WorkerHandle, WorkerRole};

/// Spawn another worker once mean utilization reaches this level.
const SPAWN_UTILIZATION: f64 = 0.90;

/// Ballooning is only considered once utilization reaches this level.
/// Fixed: it keeps a half-idle pool from turning every slow job into an
/// overflow worker.
const BALLOON_UTILIZATION: f64 = 0.70;

/// A failed broker is left alone this long before registration is retried.
const SERVER_RETRY_BACKOFF: Duration = Duration::from_secs(60);

/// Supervisor tick.
const TICK: Duration = Duration::from_secs(1);

struct ServerFailure {
    message: String,
    since: Instant,
}

/// State shared between the supervisor and every worker. The map lives
/// under a single mutex; hot counters are atomics.
pub struct PoolState {
    config: Arc<Config>,
    stats: Arc<dyn HostStats>,
    server_status: Mutex<HashMap<String, ServerFailure>>,
    worker_count: AtomicUsize,
    active_jobs: AtomicUsize,
    ballooning: AtomicUsize,
    tasks: AtomicU64,
    running: AtomicBool,
    /// Effective absolute ceiling, never below `max_worker`.
    max_possible_worker: usize,
}

impl PoolState {
    pub fn new(config: Arc<Config>, stats: Arc<dyn HostStats>) -> Self {
        let max_possible_worker = config.max_possible_worker.max(config.max_worker);
        Self {
            config,
            stats,
            server_status: Mutex::new(HashMap::new()),
            worker_count: AtomicUsize::new(0),
            active_jobs: AtomicUsize::new(0),
            ballooning: AtomicUsize::new(0),
            tasks: AtomicU64::new(0),
            running: AtomicBool::new(false),
            max_possible_worker,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub(crate) fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count.load(Ordering::SeqCst)
    }

    pub(crate) fn set_worker_count(&self, count: usize) {
        self.worker_count.store(count, Ordering::SeqCst);
    }

    pub fn active_jobs(&self) -> usize {
        self.active_jobs.load(Ordering::SeqCst)
    }

    pub(crate) fn job_started(&self) {
        self.active_jobs.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn job_finished(&self) {
        let _ = self
            .active_jobs
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| v.checked_sub(1));
    }

    /// Mean active jobs per worker, clamped to 0..=1. Computed from live
    /// counters so a just-delivered job is visible immediately.
    pub fn utilization(&self) -> f64 {
        let workers = self.worker_count().max(1);
        (self.active_jobs() as f64 / workers as f64).min(1.0)
    }

    /// Count one accepted job. Monotonic.
    pub(crate) fn count_task(&self) {
        self.tasks.fetch_add(1, Ordering::SeqCst);
    }

    pub fn tasks(&self) -> u64 {
        self.tasks.load(Ordering::SeqCst)
    }

    pub fn ballooning_workers(&self) -> usize {
        self.ballooning.load(Ordering::SeqCst)
    }

    pub fn max_possible_worker(&self) -> usize {
        self.max_possible_worker
    }

    /// First gate: is handing this job to a background task worth it at
    /// all? Checked when the job arrives.
    pub fn consider_ballooning(&self) -> bool {
        self.config.backgrounding_threshold > 0 && self.utilization() >= BALLOON_UTILIZATION
    }

    /// Second gate, checked when the backgrounding timer fires: claims a
    /// ballooning slot when the host has room for it. Utilization is
    /// re-checked on purpose; the pool may have drained since the job was
    /// handed to the background.
    pub fn try_start_ballooning(&self) -> bool {
        if !self.consider_ballooning() || !self.check_loads() || !self.check_memory() {
            return false;
        }
        let headroom = self
            .max_possible_worker
            .saturating_sub(self.config.max_worker);
        loop {
            let current = self.ballooning.load(Ordering::SeqCst);
            if current >= headroom {
                return false;
            }
            if self
                .ballooning
                .compare_exchange(current, current + 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                tracing::debug!(current = current + 1, headroom, "ballooning slot claimed");
                return true;
            }
        }
    }

    /// Release a ballooning slot once the handed-off job finishes.
    pub fn end_ballooning(&self) {
        let _ = self
            .ballooning
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| v.checked_sub(1));
    }

    /// True when every configured load limit is respected. A limit of 0
    /// disables that check; a missing reading never suppresses.
    pub fn check_loads(&self) -> bool {
        let Some(load) = self.stats.load_averages() else {
            return true;
        };
        for (limit, value, window) in [
            (self.config.load_limit1, load.one, "1m"),
            (self.config.load_limit5, load.five, "5m"),
            (self.config.load_limit15, load.fifteen, "15m"),
        ] {
            if limit > 0.0 && value > limit {
                tracing::debug!(window, value, limit, "load limit exceeded");
                return false;
            }
        }
        true
    }

    /// True when memory usage is below the configured percentage limit.
    pub fn check_memory(&self) -> bool {
        if self.config.mem_limit <= 0.0 {
            return true;
        }
        let Some(memory) = self.stats.memory() else {
            return true;
        };
        let used = memory.used_percent();
        if used > self.config.mem_limit {
            tracing::debug!(used, limit = self.config.mem_limit, "memory limit exceeded");
            return false;
        }
        true
    }

    /// Record a broker failure, or clear it with an empty message.
    pub fn set_server_status(&self, address: &str, message: &str) {
        let mut status = self.server_status.lock();
        if message.is_empty() {
            status.remove(address);
        } else {
            status.insert(
                address.to_string(),
                ServerFailure {
                    message: message.to_string(),
                    since: Instant::now(),
                },
            );
        }
    }

    /// Last recorded failure for an address; empty when healthy.
    pub fn get_server_status(&self, address: &str) -> String {
        self.server_status
            .lock()
            .get(address)
            .map(|f| f.message.clone())
            .unwrap_or_default()
    }

    /// Configured servers that are healthy or due for a retry. Probing is
    /// implicit: the next spawn attempts registration, success clears the
    /// entry.
    pub fn active_server_list(&self) -> Vec<String> {
        let status = self.server_status.lock();
        self.config
            .servers
            .iter()
            .filter(|address| match status.get(*address) {
                None => true,
                Some(failure) => failure.since.elapsed() >= SERVER_RETRY_BACKOFF,
            })
            .cloned()
            .collect()
    }

    /// Point-in-time view for the status queue and tests.
    pub fn snapshot(&self) -> PoolSnapshot {
        let status = self.server_status.lock();
        PoolSnapshot {
            worker_count: self.worker_count(),
            active_jobs: self.active_jobs(),
            utilization: self.utilization(),
            ballooning_workers: self.ballooning_workers(),
            tasks: self.tasks(),
            servers: self
                .config
                .servers
                .iter()
                .map(|address| {
                    let message = status
                        .get(address)
                        .map(|f| f.message.clone())
                        .unwrap_or_default();
                    (address.clone(), message)
                })
                .collect(),
        }
    }
}

/// Point-in-time pool view.
#[derive(Debug, Clone)]
pub struct PoolSnapshot {
    pub worker_count: usize,
    pub active_jobs: usize,
    pub utilization: f64,
    pub ballooning_workers: usize,
    pub tasks: u64,
    /// (address, last error) pairs in configured order; empty error means
    /// healthy.
    pub servers: Vec<(String, String)>,
}

/// Owns the worker fleet and runs the sizing loop.
pub struct PoolSupervisor<B: Broker> {
    broker: B,
    config: Arc<Config>,
    cipher: Arc<Cipher>,
    state: Arc<PoolState>,
    metrics: Arc<Metrics>,
    workers: Vec<WorkerHandle>,
    status_worker: Option<WorkerHandle>,
}

impl<B: Broker> PoolSupervisor<B>
where
    <B as Broker>::Session: Sync,
{
    pub fn new(
        config: Arc<Config>,
        broker: B,
        stats: Arc<dyn HostStats>,
        cipher: Arc<Cipher>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let state = Arc::new(PoolState::new(Arc::clone(&config), stats));
        Self {
            broker,
            config,
            cipher,
            state,
            metrics,
            workers: Vec::new(),
            status_worker: None,
        }
    }

    /// Shared state handle, for the daemon and for tests.
    pub fn state(&self) -> Arc<PoolState> {
        Arc::clone(&self.state)
    }

    /// Run until `shutdown` fires, then drain.
    pub async fn run(mut self, shutdown: Arc<Notify>) {
        self.state.set_running(true);
        tracing::info!(
            min_worker = self.config.min_worker,
            max_worker = self.config.max_worker,
            max_possible_worker = self.state.max_possible_worker(),
            "starting worker pool"
        );

        let mut tick = tokio::time::interval(TICK);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.notified() => break,
                _ = tick.tick() => self.adjust_pool().await,
            }
        }

        self.drain().await;
    }

    /// One supervisor tick: prune, measure, spawn, export.
    pub async fn adjust_pool(&mut self) {
        self.reap_finished().await;
        self.ensure_status_worker().await;

        let count = self.workers.len();
        let idle = self
            .workers
            .iter()
            .filter(|w| w.active_jobs() == 0)
            .count();
        self.state.set_worker_count(count);
        let utilization = self.state.utilization();

        self.metrics.worker_count.set(count as i64);
        self.metrics.idle_worker_count.set(idle as i64);
        self.metrics
            .ballooning_worker_count
            .set(self.state.ballooning_workers() as i64);
        self.metrics.worker_utilization.set(utilization);

        let under_floor = count < self.config.min_worker;
        let saturated = utilization >= SPAWN_UTILIZATION
            && count < self.config.max_worker
            && self.state.check_loads()
            && self.state.check_memory();

        if under_floor || saturated {
            self.spawn_check_workers().await;
        }
    }

    /// Spawn up to `spawn_rate` workers, stopping at the ceiling or on the
    /// first broker that refuses a registration.
    async fn spawn_check_workers(&mut self) {
        for _ in 0..self.config.spawn_rate.max(1) {
            if self.workers.len() >= self.config.max_worker {
                break;
            }
            match Worker::spawn(
                WorkerRole::Check,
                self.broker.clone(),
                Arc::clone(&self.config),
                Arc::clone(&self.state),
                Arc::clone(&self.metrics),
                Arc::clone(&self.cipher),
            )
            .await
            {
                Ok(handle) => {
                    self.workers.push(handle);
                    self.state.set_worker_count(self.workers.len());
                }
                Err(e) => {
                    tracing::warn!(error = %e, "could not spawn worker");
                    break;
                }
            }
        }
    }

    /// Keep exactly one status worker alive.
    async fn ensure_status_worker(&mut self) {
        if let Some(handle) = &self.status_worker {
            if !handle.is_finished() {
                return;
            }
        }
        if let Some(handle) = self.status_worker.take() {
            handle.finish().await;
        }
        match Worker::spawn(
            WorkerRole::Status,
            self.broker.clone(),
            Arc::clone(&self.config),
            Arc::clone(&self.state),
            Arc::clone(&self.metrics),
            Arc::clone(&self.cipher),
        )
        .await
        {
            Ok(handle) => self.status_worker = Some(handle),
            Err(e) => tracing::debug!(error = %e, "status worker unavailable"),
        }
    }

    /// Remove workers whose task has ended; log the ones that panicked.
    async fn reap_finished(&mut self) {
        let mut kept = Vec::with_capacity(self.workers.len());
        for handle in self.workers.drain(..) {
            if handle.is_finished() {
                handle.finish().await;
            } else {
                kept.push(handle);
            }
        }
        self.workers = kept;
    }

    /// Draining: no new spawns, every worker finishes its current job,
    /// ballooned jobs are bounded by the workers' own drain timeout.
    async fn drain(mut self) {
        tracing::info!(workers = self.workers.len(), "draining worker pool");
        self.state.set_running(false);

        for handle in &self.workers {
            handle.request_shutdown();
        }
        if let Some(handle) = &self.status_worker {
            handle.request_shutdown();
        }

        let grace = Duration::from_secs(self.config.job_timeout + 10);
        for handle in self.workers.drain(..) {
            handle.finish_within(grace).await;
        }
        if let Some(handle) = self.status_worker.take() {
            handle.finish_within(grace).await;
        }

        self.state.set_worker_count(0);
        tracing::info!("worker pool stopped");
    }
}

#[cfg(test)]
#[path = "pool_tests.rs"]
mod tests;
