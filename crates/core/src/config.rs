// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker configuration: defaults, `key=value` config files, validation.
//!
//! Options merge in order: built-in defaults, then each config file in the
//! order given, then command-line flags. Keys are normalized by lowercasing
//! and stripping `-`/`_`, so `max-worker`, `max_worker` and `maxworker` all
//! address the same option.

use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::crypt::{derive_key, Cipher, KEY_LEN};
use crate::job::JobKind;

/// Default broker port appended to bare `host` server addresses.
pub const DEFAULT_BROKER_PORT: u16 = 4730;

/// Nested `config=` includes deeper than this are refused.
const MAX_INCLUDE_DEPTH: usize = 8;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid value for {option}: {value}")]
    InvalidValue { option: String, value: String },
    #[error("config files nested deeper than {MAX_INCLUDE_DEPTH} levels")]
    TooManyIncludes,
    #[error("no server configured")]
    NoServer,
    #[error("no queues enabled, set at least one of hosts/services/eventhandler/notifications/hostgroup/servicegroup")]
    NoQueues,
    #[error("encryption is enabled but no key or keyfile is set")]
    MissingKey,
    #[error("min_worker ({min}) must not exceed max_worker ({max})")]
    WorkerBounds { min: usize, max: usize },
}

/// Where log lines go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogMode {
    /// stdout in the foreground, the logfile when daemonized.
    #[default]
    Automatic,
    Stdout,
    File,
}

impl LogMode {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "automatic" => Some(LogMode::Automatic),
            "stdout" => Some(LogMode::Stdout),
            "file" => Some(LogMode::File),
            _ => None,
        }
    }
}

/// All worker options. Read-only once the pool starts.
#[derive(Debug, Clone)]
pub struct Config {
    /// Unique worker name; forms the `worker_<identifier>` status queue.
    pub identifier: String,
    /// 0 = info, 1 = debug, 2+ = trace.
    pub debug: u8,
    pub logmode: LogMode,
    pub logfile: Option<PathBuf>,
    pub pidfile: Option<PathBuf>,
    pub daemon: bool,
    /// `host:port` for the Prometheus scrape endpoint; disabled when empty.
    pub prometheus_server: Option<String>,

    pub servers: Vec<String>,
    pub dupservers: Vec<String>,

    pub encryption: bool,
    pub key: String,
    pub keyfile: Option<PathBuf>,

    pub hosts: bool,
    pub services: bool,
    pub eventhandler: bool,
    pub notifications: bool,
    pub hostgroups: Vec<String>,
    pub servicegroups: Vec<String>,

    pub min_worker: usize,
    pub max_worker: usize,
    /// Absolute parallelism ceiling including ballooning; 0 = derive from
    /// the open-file limit at startup.
    pub max_possible_worker: usize,
    pub spawn_rate: usize,
    /// Seconds a worker may idle before retiring (above the floor).
    pub idle_timeout: u64,
    /// Jobs a worker handles before voluntary retirement.
    pub max_jobs: u32,
    /// Per-job execution ceiling in seconds.
    pub job_timeout: u64,
    /// Jobs older than this are dropped unexecuted; 0 disables.
    pub max_age: u64,
    /// Seconds before a running job triggers a ballooning attempt;
    /// 0 or negative disables ballooning.
    pub backgrounding_threshold: i64,

    pub load_limit1: f64,
    pub load_limit5: f64,
    pub load_limit15: f64,
    /// Maximum used-memory percentage before spawning/ballooning stops;
    /// 0 disables.
    pub mem_limit: f64,

    /// Always go through the shell instead of spawning directly.
    pub fork_on_exec: bool,
    /// Append stderr to the output of failing checks.
    pub show_error_output: bool,
    /// Return code reported for timed-out checks.
    pub timeout_return: i32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            identifier: String::new(),
            debug: 0,
            logmode: LogMode::Automatic,
            logfile: None,
            pidfile: None,
            daemon: false,
            prometheus_server: None,
            servers: Vec::new(),
            dupservers: Vec::new(),
            encryption: true,
            key: String::new(),
            keyfile: None,
            hosts: false,
            services: false,
            eventhandler: false,
            notifications: false,
            hostgroups: Vec::new(),
            servicegroups: Vec::new(),
            min_worker: 1,
            max_worker: 20,
            max_possible_worker: 0,
            spawn_rate: 1,
            idle_timeout: 10,
            max_jobs: 1000,
            job_timeout: 60,
            max_age: 0,
            backgrounding_threshold: 30,
            load_limit1: 0.0,
            load_limit5: 0.0,
            load_limit15: 0.0,
            mem_limit: 0.0,
            fork_on_exec: false,
            show_error_output: true,
            timeout_return: 2,
        }
    }
}

impl Config {
    /// Apply one `key=value` setting. Unknown keys are logged and skipped
    /// so config files stay forward compatible.
    pub fn apply_setting(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        self.apply_at_depth(key, value, 0)
    }

    /// Read a `key=value` config file. Blank lines and `#` comments are
    /// skipped; a bare `flag` line means `flag=yes`.
    pub fn load_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        self.load_file_at_depth(path, 0)
    }

    fn load_file_at_depth(&mut self, path: &Path, depth: usize) -> Result<(), ConfigError> {
        if depth > MAX_INCLUDE_DEPTH {
            return Err(ConfigError::TooManyIncludes);
        }
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            let (key, value) = match line.split_once('=') {
                Some((k, v)) => (k.trim(), v.trim()),
                None => (line, "yes"),
            };
            self.apply_at_depth(key, value, depth)?;
        }
        Ok(())
    }

    fn apply_at_depth(&mut self, key: &str, value: &str, depth: usize) -> Result<(), ConfigError> {
        let normalized: String = key
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .collect::<String>()
            .to_ascii_lowercase();

        match normalized.as_str() {
            "config" => return self.load_file_at_depth(Path::new(value), depth + 1),
            "identifier" => self.identifier = value.to_string(),
            "debug" => self.debug = parse_num(&normalized, value)?,
            "logmode" => {
                self.logmode = LogMode::parse(value).ok_or_else(|| invalid(&normalized, value))?
            }
            "logfile" => self.logfile = non_empty_path(value),
            "pidfile" => self.pidfile = non_empty_path(value),
            "daemon" => self.daemon = parse_bool(&normalized, value)?,
            "prometheusserver" => {
                self.prometheus_server = (!value.is_empty()).then(|| value.to_string())
            }
            "server" => push_server(&mut self.servers, value),
            "dupserver" => push_server(&mut self.dupservers, value),
            "encryption" => self.encryption = parse_bool(&normalized, value)?,
            "key" => self.key = value.to_string(),
            "keyfile" => self.keyfile = non_empty_path(value),
            "hosts" => self.hosts = parse_bool(&normalized, value)?,
            "services" => self.services = parse_bool(&normalized, value)?,
            "eventhandler" => self.eventhandler = parse_bool(&normalized, value)?,
            "notifications" => self.notifications = parse_bool(&normalized, value)?,
            "hostgroup" | "hostgroups" => push_groups(&mut self.hostgroups, value),
            "servicegroup" | "servicegroups" => push_groups(&mut self.servicegroups, value),
            "minworker" => self.min_worker = parse_num(&normalized, value)?,
            "maxworker" => self.max_worker = parse_num(&normalized, value)?,
            "maxpossibleworker" => self.max_possible_worker = parse_num(&normalized, value)?,
            "spawnrate" => self.spawn_rate = parse_num(&normalized, value)?,
            "idletimeout" => self.idle_timeout = parse_num(&normalized, value)?,
            "maxjobs" => self.max_jobs = parse_num(&normalized, value)?,
            "jobtimeout" => self.job_timeout = parse_num(&normalized, value)?,
            "maxage" => self.max_age = parse_num(&normalized, value)?,
            "backgroundingthreshold" => {
                self.backgrounding_threshold = parse_num(&normalized, value)?
            }
            "loadlimit1" => self.load_limit1 = parse_num(&normalized, value)?,
            "loadlimit5" => self.load_limit5 = parse_num(&normalized, value)?,
            "loadlimit15" => self.load_limit15 = parse_num(&normalized, value)?,
            "memlimit" => self.mem_limit = parse_num(&normalized, value)?,
            "forkonexec" => self.fork_on_exec = parse_bool(&normalized, value)?,
            "showerroroutput" => self.show_error_output = parse_bool(&normalized, value)?,
            "timeoutreturn" => self.timeout_return = parse_num(&normalized, value)?,
            _ => {
                tracing::warn!(option = key, "ignoring unknown config option");
            }
        }
        Ok(())
    }

    /// The queues a check worker subscribes to, derived from the selectors.
    pub fn check_queues(&self) -> Vec<String> {
        let mut queues = Vec::new();
        if self.hosts {
            queues.push(JobKind::Host.as_str().to_string());
        }
        if self.services {
            queues.push(JobKind::Service.as_str().to_string());
        }
        if self.eventhandler {
            queues.push(JobKind::Eventhandler.as_str().to_string());
        }
        if self.notifications {
            queues.push(JobKind::Notification.as_str().to_string());
        }
        for group in &self.hostgroups {
            queues.push(format!("hostgroup_{group}"));
        }
        for group in &self.servicegroups {
            queues.push(format!("servicegroup_{group}"));
        }
        queues
    }

    /// The single queue the status worker answers on.
    pub fn status_queue(&self) -> String {
        format!("worker_{}", self.identifier)
    }

    /// Fail fast on configurations the pool cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.servers.is_empty() {
            return Err(ConfigError::NoServer);
        }
        if self.check_queues().is_empty() {
            return Err(ConfigError::NoQueues);
        }
        if self.min_worker > self.max_worker {
            return Err(ConfigError::WorkerBounds {
                min: self.min_worker,
                max: self.max_worker,
            });
        }
        if self.encryption && self.key.is_empty() && self.keyfile.is_none() {
            return Err(ConfigError::MissingKey);
        }
        Ok(())
    }

    /// Resolve the key material and build the payload cipher.
    /// Call once at startup, after [`Config::validate`].
    pub fn build_cipher(&self) -> Result<Cipher, ConfigError> {
        if !self.encryption {
            return Ok(Cipher::disabled());
        }
        let material = match &self.keyfile {
            Some(path) => std::fs::read_to_string(path)
                .map_err(|source| ConfigError::Io {
                    path: path.clone(),
                    source,
                })?
                .trim_end()
                .to_string(),
            None => self.key.clone(),
        };
        if material.is_empty() {
            return Err(ConfigError::MissingKey);
        }
        Ok(Cipher::new(&derive_key(&material), true))
    }

    /// Effective per-job timeout: the job's own timeout clamped by the
    /// configured ceiling; jobs without a timeout get the ceiling.
    pub fn effective_timeout(&self, job_timeout: u64) -> u64 {
        if job_timeout == 0 {
            self.job_timeout
        } else {
            job_timeout.min(self.job_timeout)
        }
    }
}

fn invalid(option: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        option: option.to_string(),
        value: value.to_string(),
    }
}

fn parse_bool(option: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "" | "yes" | "true" | "on" | "1" => Ok(true),
        "no" | "false" | "off" | "0" => Ok(false),
        _ => Err(invalid(option, value)),
    }
}

fn parse_num<T: std::str::FromStr>(option: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| invalid(option, value))
}

fn non_empty_path(value: &str) -> Option<PathBuf> {
    (!value.is_empty()).then(|| PathBuf::from(value))
}

/// Servers are `host` or `host:port`; a missing port gets the default.
fn push_server(list: &mut Vec<String>, value: &str) {
    for part in value.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let address = if part.contains(':') {
            part.to_string()
        } else {
            format!("{part}:{DEFAULT_BROKER_PORT}")
        };
        if !list.contains(&address) {
            list.push(address);
        }
    }
}

fn push_groups(list: &mut Vec<String>, value: &str) {
    for part in value.split(',') {
        let part = part.trim();
        if !part.is_empty() && !list.iter().any(|g| g == part) {
            list.push(part.to_string());
        }
    }
}

/// A key this short is almost always a placeholder left in a packaged
/// config; warn loudly but keep running, matching observed behavior.
pub fn key_is_weak(material: &str) -> bool {
    material.len() < KEY_LEN / 4
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
