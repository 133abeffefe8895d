// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Check results and their wire format.

use crate::job::ReceivedJob;

/// Outcome of one executed check, ready for publication.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckResult {
    pub host_name: String,
    pub service_description: String,
    pub return_code: i32,
    pub output: String,
    /// Epoch seconds when the subprocess was started.
    pub start_time: f64,
    /// Epoch seconds when the subprocess finished (or was given up on).
    pub finish_time: f64,
    /// Queue to publish on; empty results are never published.
    pub result_queue: String,
}

impl CheckResult {
    /// Result skeleton for a job, to be filled in by the executor.
    pub fn for_job(job: &ReceivedJob) -> Self {
        Self {
            host_name: job.host_name.clone(),
            service_description: job.service_description.clone(),
            return_code: 0,
            output: String::new(),
            start_time: 0.0,
            finish_time: 0.0,
            result_queue: job.result_queue.clone(),
        }
    }

    /// Render the `key=value` block published back to the broker.
    /// `identifier` names this worker in the `source` line.
    pub fn to_wire(&self, identifier: &str) -> String {
        let mut out = String::with_capacity(self.output.len() + 160);
        push_kv(&mut out, "host_name", &self.host_name);
        if !self.service_description.is_empty() {
            push_kv(&mut out, "service_description", &self.service_description);
        }
        push_kv(&mut out, "return_code", &self.return_code.to_string());
        push_kv(&mut out, "start_time", &format_epoch(self.start_time));
        push_kv(&mut out, "finish_time", &format_epoch(self.finish_time));
        // Multi-line plugin output is folded onto one line.
        push_kv(&mut out, "output", &self.output.replace('\n', "\\n"));
        push_kv(
            &mut out,
            "source",
            &format!("Mod-Gearman Worker @ {identifier}"),
        );
        out
    }
}

fn push_kv(out: &mut String, key: &str, value: &str) {
    out.push_str(key);
    out.push('=');
    out.push_str(value);
    out.push('\n');
}

fn format_epoch(t: f64) -> String {
    format!("{t:.6}")
}

#[cfg(test)]
#[path = "result_tests.rs"]
mod tests;
