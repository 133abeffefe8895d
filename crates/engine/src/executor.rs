// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Check execution: one subprocess per job, with timeout and process-group
//! cleanup. Every failure mode is encoded into the returned result; this
//! module never surfaces an error to the caller.

use std::process::Stdio;
use std::time::Duration;

use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tokio::process::Command;

use gw_core::{CheckResult, Clock, Config, ReceivedJob};

/// Output used when a job sat in the queue longer than `max_age`.
const STALE_OUTPUT: &str = "Could not Start Check In Time";

/// Output used when the subprocess exceeded its timeout.
const TIMEOUT_OUTPUT: &str = "(Check Timed Out on Worker)";

/// Characters that force the command through a shell.
const SHELL_CHARS: &[char] = &[
    '!', '$', '^', '&', '*', '(', ')', '~', '[', ']', '\\', '|', '{', '}', ';', '<', '>', '?',
    '`', '"', '\'',
];

/// Run one check job to completion and report the outcome.
pub async fn execute<C: Clock>(job: &ReceivedJob, config: &Config, clock: &C) -> CheckResult {
    let mut result = CheckResult::for_job(job);
    let now = clock.epoch_f64();

    // Jobs that waited too long are answered without ever spawning.
    if config.max_age > 0 && job.start_time > 0.0 && now - job.start_time > config.max_age as f64
    {
        tracing::debug!(
            host = job.host_name.as_str(),
            age = (now - job.start_time) as u64,
            "dropping stale job"
        );
        result.return_code = 3;
        result.output = STALE_OUTPUT.to_string();
        result.start_time = now;
        result.finish_time = now;
        return result;
    }

    let timeout = Duration::from_secs(config.effective_timeout(job.timeout).max(1));

    let mut cmd = match build_command(&job.command_line, config.fork_on_exec) {
        Some(cmd) => cmd,
        None => {
            result.return_code = 3;
            result.output = "UNKNOWN: empty command line".to_string();
            result.start_time = now;
            result.finish_time = clock.epoch_f64();
            return result;
        }
    };
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0)
        .kill_on_drop(true);

    result.start_time = clock.epoch_f64();
    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            result.return_code = 3;
            result.output = format!("UNKNOWN: check could not be started: {e}");
            result.finish_time = clock.epoch_f64();
            return result;
        }
    };
    let pgid = child.id().map(|pid| Pid::from_raw(pid as i32));

    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => {
            result.finish_time = clock.epoch_f64();
            fill_from_output(&mut result, &output, config);
        }
        Ok(Err(e)) => {
            result.finish_time = clock.epoch_f64();
            result.return_code = 3;
            result.output = format!("UNKNOWN: check failed: {e}");
        }
        Err(_elapsed) => {
            // The direct child was killed on drop; take the rest of the
            // process group with it.
            if let Some(pgid) = pgid {
                let _ = killpg(pgid, Signal::SIGKILL);
            }
            result.finish_time = clock.epoch_f64();
            result.return_code = config.timeout_return;
            result.output = TIMEOUT_OUTPUT.to_string();
            tracing::debug!(
                host = job.host_name.as_str(),
                timeout_secs = timeout.as_secs(),
                "check timed out"
            );
        }
    }

    result
}

/// Map process exit state and captured output into the result.
fn fill_from_output(result: &mut CheckResult, output: &std::process::Output, config: &Config) {
    use std::os::unix::process::ExitStatusExt;

    result.return_code = match output.status.code() {
        // Plugin conventions: 0 OK, 1 WARNING, 2 CRITICAL, 3 UNKNOWN.
        Some(code @ 0..=3) => code,
        Some(_) => 3,
        None => 2,
    };

    let mut text = String::from_utf8_lossy(&output.stdout).trim_end().to_string();

    if let Some(code) = output.status.code() {
        if !(0..=3).contains(&code) {
            append_line(&mut text, &format!("(exit code {code} mapped to UNKNOWN)"));
        }
    } else if let Some(signal) = output.status.signal() {
        append_line(&mut text, &format!("(Check Terminated by Signal {signal})"));
    }

    if config.show_error_output && result.return_code > 0 {
        let stderr = String::from_utf8_lossy(&output.stderr).trim_end().to_string();
        if !stderr.is_empty() {
            append_line(&mut text, &stderr);
        }
    }

    result.output = text;
}

fn append_line(text: &mut String, line: &str) {
    if !text.is_empty() {
        text.push('\n');
    }
    text.push_str(line);
}

/// Direct argv spawn when the command line is plain enough, a shell
/// otherwise (or always, with `fork_on_exec`).
fn build_command(command_line: &str, fork_on_exec: bool) -> Option<Command> {
    let command_line = command_line.trim();
    if command_line.is_empty() {
        return None;
    }

    if fork_on_exec || command_line.contains(SHELL_CHARS) {
        let mut cmd = Command::new("/bin/sh");
        cmd.arg("-c").arg(command_line);
        return Some(cmd);
    }

    let mut parts = command_line.split_whitespace();
    let program = parts.next()?;
    let mut cmd = Command::new(program);
    cmd.args(parts);
    Some(cmd)
}

#[cfg(test)]
#[path = "executor_tests.rs"]
mod tests;
