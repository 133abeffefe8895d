// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Human-readable status reply for the `worker_<identifier>` queue.

use crate::pool::PoolSnapshot;

/// Render the multi-line status text answered on the status queue.
pub fn render(snapshot: &PoolSnapshot, identifier: &str) -> String {
    let mut out = String::with_capacity(256);
    out.push_str(&format!(
        "{identifier} - gearworker v{}\n",
        env!("CARGO_PKG_VERSION")
    ));
    out.push_str(&format!(
        "workers: {} - active jobs: {} - utilization: {:.0}% - ballooning: {}\n",
        snapshot.worker_count,
        snapshot.active_jobs,
        snapshot.utilization * 100.0,
        snapshot.ballooning_workers,
    ));
    out.push_str(&format!("jobs processed since startup: {}\n", snapshot.tasks));
    for (address, error) in &snapshot.servers {
        if error.is_empty() {
            out.push_str(&format!("server {address}: connected\n"));
        } else {
            out.push_str(&format!("server {address}: {error}\n"));
        }
    }
    out
}

#[cfg(test)]
#[path = "status_tests.rs"]
mod tests;
