// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Prometheus instruments for the worker pool.

use gw_core::JobKind;
use prometheus::{Gauge, IntCounter, IntCounterVec, IntGauge, Opts, Registry};

/// All instruments registered on one dedicated registry.
pub struct Metrics {
    registry: Registry,

    pub worker_count: IntGauge,
    pub idle_worker_count: IntGauge,
    pub ballooning_worker_count: IntGauge,
    pub worker_utilization: Gauge,

    pub tasks_total: IntCounter,
    pub task_count: IntCounterVec,
    pub error_count: IntCounterVec,
    pub decode_errors: IntCounter,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let worker_count =
            IntGauge::new("gearworker_workers", "Number of workers in the pool")?;
        registry.register(Box::new(worker_count.clone()))?;

        let idle_worker_count = IntGauge::new(
            "gearworker_idle_workers",
            "Number of workers with no active job",
        )?;
        registry.register(Box::new(idle_worker_count.clone()))?;

        let ballooning_worker_count = IntGauge::new(
            "gearworker_ballooning_workers",
            "Number of workers currently owning a ballooned job",
        )?;
        registry.register(Box::new(ballooning_worker_count.clone()))?;

        let worker_utilization = Gauge::new(
            "gearworker_worker_utilization",
            "Mean active jobs per worker, 0..1",
        )?;
        registry.register(Box::new(worker_utilization.clone()))?;

        let tasks_total =
            IntCounter::new("gearworker_tasks", "Jobs accepted since startup")?;
        registry.register(Box::new(tasks_total.clone()))?;

        let task_count = IntCounterVec::new(
            Opts::new("gearworker_task_count", "Jobs accepted by check type"),
            &["type"],
        )?;
        registry.register(Box::new(task_count.clone()))?;

        let error_count = IntCounterVec::new(
            Opts::new(
                "gearworker_errors",
                "Checks that returned a non-zero code, by check type",
            ),
            &["type"],
        )?;
        registry.register(Box::new(error_count.clone()))?;

        let decode_errors = IntCounter::new(
            "gearworker_decode_errors",
            "Job payloads dropped because they could not be decoded",
        )?;
        registry.register(Box::new(decode_errors.clone()))?;

        Ok(Self {
            registry,
            worker_count,
            idle_worker_count,
            ballooning_worker_count,
            worker_utilization,
            tasks_total,
            task_count,
            error_count,
            decode_errors,
        })
    }

    /// Registry for the scrape endpoint.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Count one accepted job.
    pub fn count_task(&self, kind: JobKind) {
        self.tasks_total.inc();
        self.task_count.with_label_values(&[kind.as_str()]).inc();
    }

    /// Count one failing check.
    pub fn count_error(&self, kind: JobKind) {
        self.error_count.with_label_values(&[kind.as_str()]).inc();
    }
}

#[cfg(test)]
#[path = "metrics_tests.rs"]
mod tests;
