// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Check job payload: kinds and the `key=value` wire format.

use std::fmt;
use thiserror::Error;

/// Errors raised while decoding or parsing a job payload.
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("invalid base64: {0}")]
    Base64(String),
    #[error("ciphertext length {0} is not block aligned")]
    BadCiphertext(usize),
    #[error("payload is not valid utf-8")]
    NotUtf8,
    #[error("unknown job type: {0}")]
    UnknownKind(String),
    #[error("payload is missing {0}")]
    MissingField(&'static str),
}

/// The kind of check a job carries. Doubles as the fixed queue name the
/// kind is delivered on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    Host,
    Service,
    Eventhandler,
    Notification,
}

impl JobKind {
    /// Wire name, also the broker queue name for this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Host => "host",
            JobKind::Service => "service",
            JobKind::Eventhandler => "eventhandler",
            JobKind::Notification => "notification",
        }
    }

    pub fn parse(s: &str) -> Result<Self, PayloadError> {
        match s {
            "host" => Ok(JobKind::Host),
            "service" => Ok(JobKind::Service),
            "eventhandler" => Ok(JobKind::Eventhandler),
            "notification" => Ok(JobKind::Notification),
            other => Err(PayloadError::UnknownKind(other.to_string())),
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decrypted, parsed check job as delivered by the broker.
#[derive(Debug, Clone)]
pub struct ReceivedJob {
    pub kind: JobKind,
    pub host_name: String,
    pub service_description: String,
    pub command_line: String,
    /// Epoch seconds when the job entered the queue.
    pub start_time: f64,
    /// Epoch seconds when the monitoring core scheduled the check.
    pub core_start_time: f64,
    /// Per-job timeout in seconds; 0 means "use the configured default".
    pub timeout: u64,
    /// Queue the result must be published to; empty = fire and forget.
    pub result_queue: String,
    /// Set at runtime when execution was handed to a background task.
    /// Never present on the wire.
    pub ballooning: bool,
}

impl ReceivedJob {
    /// Parse the newline-separated `key=value` payload. Unknown keys are
    /// ignored; `type` and `command_line` are required.
    pub fn parse(text: &str) -> Result<Self, PayloadError> {
        let mut kind = None;
        let mut host_name = String::new();
        let mut service_description = String::new();
        let mut command_line = String::new();
        let mut start_time = 0.0;
        let mut core_start_time = 0.0;
        let mut timeout = 0;
        let mut result_queue = String::new();

        for line in text.lines() {
            let line = line.trim_end_matches('\r');
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            match key {
                "type" => kind = Some(JobKind::parse(value)?),
                "host_name" => host_name = value.to_string(),
                "service_description" => service_description = value.to_string(),
                "command_line" => command_line = value.to_string(),
                "timeout" => timeout = value.trim().parse().unwrap_or(0),
                "start_time" => start_time = parse_epoch(value),
                "core_start_time" => core_start_time = parse_epoch(value),
                "result_queue" => result_queue = value.to_string(),
                _ => {}
            }
        }

        let kind = kind.ok_or(PayloadError::MissingField("type"))?;
        if command_line.is_empty() {
            return Err(PayloadError::MissingField("command_line"));
        }

        Ok(Self {
            kind,
            host_name,
            service_description,
            command_line,
            start_time,
            core_start_time,
            timeout,
            result_queue,
            ballooning: false,
        })
    }
}

/// Epoch timestamps arrive either as plain seconds or as `secs.micros`.
fn parse_epoch(value: &str) -> f64 {
    value.trim().parse().unwrap_or(0.0)
}

#[cfg(test)]
#[path = "job_tests.rs"]
mod tests;
