// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! gearworker - monitoring check worker
//!
//! Registers with one or more job brokers, executes host and service
//! checks locally, and ships encrypted results back to per-job result
//! queues. The worker fleet resizes itself between `min-worker` and
//! `max-worker`, with ballooning overflow up to `max-possible-worker`.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod detach;
mod metrics_server;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::Notify;
use tracing::{error, info, warn};

use gw_adapters::{ProcHostStats, TcpBroker};
use gw_core::config::key_is_weak;
use gw_core::{Cipher, Config, ConfigError, LogMode};
use gw_engine::{Metrics, PoolSupervisor};

use crate::detach::PidFile;

/// Exit code for fatal configuration problems.
const EXIT_CONFIG: i32 = 1;
/// Exit code for an unrecoverable runtime panic.
const EXIT_PANIC: i32 = 2;

#[derive(Parser)]
#[command(
    name = "gearworker",
    version,
    about = "Mod-Gearman compatible worker that executes host and service checks"
)]
struct Cli {
    /// Read options from a key=value config file (repeatable)
    #[arg(long, value_name = "PATH")]
    config: Vec<PathBuf>,

    /// Detach from the terminal and run in the background
    #[arg(short = 'd', long)]
    daemon: bool,

    /// Unique worker name (defaults to the hostname)
    #[arg(long)]
    identifier: Option<String>,

    /// Verbosity: 0 info, 1 debug, 2+ trace
    #[arg(long)]
    debug: Option<u8>,

    /// Where log lines go: automatic, stdout or file
    #[arg(long)]
    logmode: Option<String>,

    /// Log file used by logmode=file (and automatic when daemonized)
    #[arg(long)]
    logfile: Option<PathBuf>,

    /// Write the process id here; removed again on clean exit
    #[arg(long)]
    pidfile: Option<PathBuf>,

    /// host:port for the Prometheus scrape endpoint
    #[arg(long = "prometheus-server")]
    prometheus_server: Option<String>,

    /// Primary broker address, host[:port] (repeatable)
    #[arg(long)]
    server: Vec<String>,

    /// Duplicate broker receiving a copy of every result (repeatable)
    #[arg(long)]
    dupserver: Vec<String>,

    /// Encrypt job payloads and results: yes or no
    #[arg(long, value_name = "YES|NO")]
    encryption: Option<String>,

    /// Shared encryption key
    #[arg(long)]
    key: Option<String>,

    /// Read the encryption key from this file
    #[arg(long)]
    keyfile: Option<PathBuf>,

    /// Handle host checks
    #[arg(long)]
    hosts: bool,

    /// Handle service checks
    #[arg(long)]
    services: bool,

    /// Handle eventhandler jobs
    #[arg(long)]
    eventhandler: bool,

    /// Handle notification jobs
    #[arg(long)]
    notifications: bool,

    /// Handle checks for this hostgroup (repeatable)
    #[arg(long = "hostgroup")]
    hostgroup: Vec<String>,

    /// Handle checks for this servicegroup (repeatable)
    #[arg(long = "servicegroup")]
    servicegroup: Vec<String>,

    /// Pool floor
    #[arg(long = "min-worker")]
    min_worker: Option<usize>,

    /// Steady-state pool ceiling
    #[arg(long = "max-worker")]
    max_worker: Option<usize>,

    /// Absolute ceiling including ballooning (0 = derive from ulimit)
    #[arg(long = "max-possible-worker")]
    max_possible_worker: Option<usize>,

    /// Workers spawned per supervisor tick
    #[arg(long = "spawn-rate")]
    spawn_rate: Option<usize>,

    /// Seconds before an idle worker above the floor retires
    #[arg(long = "idle-timeout")]
    idle_timeout: Option<u64>,

    /// Jobs a worker handles before voluntary retirement
    #[arg(long = "max-jobs")]
    max_jobs: Option<u32>,

    /// Per-job execution timeout ceiling in seconds
    #[arg(long = "job-timeout")]
    job_timeout: Option<u64>,

    /// Drop jobs older than this many seconds (0 = off)
    #[arg(long = "max-age")]
    max_age: Option<u64>,

    /// Seconds after which a running job may be backgrounded (<=0 = off)
    #[arg(long = "backgrounding-threshold")]
    backgrounding_threshold: Option<i64>,

    /// 1-minute load average ceiling (0 = off)
    #[arg(long = "load-limit1")]
    load_limit1: Option<f64>,

    /// 5-minute load average ceiling (0 = off)
    #[arg(long = "load-limit5")]
    load_limit5: Option<f64>,

    /// 15-minute load average ceiling (0 = off)
    #[arg(long = "load-limit15")]
    load_limit15: Option<f64>,

    /// Used-memory percentage ceiling (0 = off)
    #[arg(long = "mem-limit")]
    mem_limit: Option<f64>,

    /// Always start checks through a shell
    #[arg(long = "fork-on-exec")]
    fork_on_exec: bool,

    /// Append stderr to the output of failing checks: yes or no
    #[arg(long = "show-error-output", value_name = "YES|NO")]
    show_error_output: Option<String>,

    /// Return code reported for timed-out checks
    #[arg(long = "timeout-return")]
    timeout_return: Option<i32>,
}

fn main() {
    let cli = Cli::parse();

    let (config, cipher) = match assemble(&cli) {
        Ok(pair) => pair,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(EXIT_CONFIG);
        }
    };

    if config.daemon {
        if let Err(e) = detach::daemonize() {
            eprintln!("Error: unable to daemonize: {e}");
            std::process::exit(EXIT_CONFIG);
        }
    }

    // Pidfile problems are logged, not fatal, matching observed behavior.
    let _pid_guard = config.pidfile.clone().and_then(|path| {
        PidFile::create(path.clone())
            .map_err(|e| eprintln!("could not write pidfile {}: {e}", path.display()))
            .ok()
    });

    let _log_guard = setup_logging(&config);
    info!(
        identifier = config.identifier.as_str(),
        servers = config.servers.len(),
        "starting gearworker"
    );

    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?;
        runtime.block_on(run(config, cipher))
    }));

    match outcome {
        Ok(Ok(())) => {
            info!("clean shutdown");
        }
        Ok(Err(e)) => {
            error!("fatal: {e}");
            eprintln!("Error: {e}");
            drop(_pid_guard);
            std::process::exit(EXIT_CONFIG);
        }
        Err(_panic) => {
            error!("unrecoverable panic, exiting");
            drop(_pid_guard);
            std::process::exit(EXIT_PANIC);
        }
    }
}

/// Merge defaults, config files and flags; validate; resolve key material.
fn assemble(cli: &Cli) -> Result<(Config, Cipher), ConfigError> {
    let mut config = Config::default();

    for path in &cli.config {
        config.load_file(path)?;
    }
    apply_cli(&mut config, cli)?;

    if config.identifier.is_empty() {
        config.identifier = default_identifier();
    }
    if config.max_possible_worker == 0 {
        config.max_possible_worker = derive_max_possible(config.max_worker);
    }

    config.validate()?;
    let cipher = config.build_cipher()?;
    if cipher.is_enabled() && !config.key.is_empty() && key_is_weak(&config.key) {
        eprintln!("warning: the configured encryption key is very short");
    }
    Ok((config, cipher))
}

fn apply_cli(config: &mut Config, cli: &Cli) -> Result<(), ConfigError> {
    if let Some(v) = &cli.identifier {
        config.identifier = v.clone();
    }
    if let Some(v) = cli.debug {
        config.debug = v;
    }
    if let Some(v) = &cli.logmode {
        config.apply_setting("logmode", v)?;
    }
    if let Some(v) = &cli.logfile {
        config.logfile = Some(v.clone());
    }
    if let Some(v) = &cli.pidfile {
        config.pidfile = Some(v.clone());
    }
    if cli.daemon {
        config.daemon = true;
    }
    if let Some(v) = &cli.prometheus_server {
        config.prometheus_server = Some(v.clone());
    }
    for server in &cli.server {
        config.apply_setting("server", server)?;
    }
    for server in &cli.dupserver {
        config.apply_setting("dupserver", server)?;
    }
    if let Some(v) = &cli.encryption {
        config.apply_setting("encryption", v)?;
    }
    if let Some(v) = &cli.key {
        config.key = v.clone();
    }
    if let Some(v) = &cli.keyfile {
        config.keyfile = Some(v.clone());
    }
    if cli.hosts {
        config.hosts = true;
    }
    if cli.services {
        config.services = true;
    }
    if cli.eventhandler {
        config.eventhandler = true;
    }
    if cli.notifications {
        config.notifications = true;
    }
    for group in &cli.hostgroup {
        config.apply_setting("hostgroup", group)?;
    }
    for group in &cli.servicegroup {
        config.apply_setting("servicegroup", group)?;
    }
    if let Some(v) = cli.min_worker {
        config.min_worker = v;
    }
    if let Some(v) = cli.max_worker {
        config.max_worker = v;
    }
    if let Some(v) = cli.max_possible_worker {
        config.max_possible_worker = v;
    }
    if let Some(v) = cli.spawn_rate {
        config.spawn_rate = v;
    }
    if let Some(v) = cli.idle_timeout {
        config.idle_timeout = v;
    }
    if let Some(v) = cli.max_jobs {
        config.max_jobs = v;
    }
    if let Some(v) = cli.job_timeout {
        config.job_timeout = v;
    }
    if let Some(v) = cli.max_age {
        config.max_age = v;
    }
    if let Some(v) = cli.backgrounding_threshold {
        config.backgrounding_threshold = v;
    }
    if let Some(v) = cli.load_limit1 {
        config.load_limit1 = v;
    }
    if let Some(v) = cli.load_limit5 {
        config.load_limit5 = v;
    }
    if let Some(v) = cli.load_limit15 {
        config.load_limit15 = v;
    }
    if let Some(v) = cli.mem_limit {
        config.mem_limit = v;
    }
    if cli.fork_on_exec {
        config.fork_on_exec = true;
    }
    if let Some(v) = &cli.show_error_output {
        config.apply_setting("show-error-output", v)?;
    }
    if let Some(v) = cli.timeout_return {
        config.timeout_return = v;
    }
    Ok(())
}

/// The hostname, or a fixed fallback when it cannot be read.
fn default_identifier() -> String {
    nix::unistd::gethostname()
        .ok()
        .and_then(|name| name.into_string().ok())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Ballooning trades file descriptors for throughput, so the absolute
/// ceiling tracks the open-file budget when not set explicitly.
fn derive_max_possible(max_worker: usize) -> usize {
    let soft = nix::sys::resource::getrlimit(nix::sys::resource::Resource::RLIMIT_NOFILE)
        .map(|(soft, _hard)| soft)
        .unwrap_or(1024);
    ((soft / 64) as usize).max(max_worker)
}

async fn run(config: Config, cipher: Cipher) -> anyhow::Result<()> {
    let config = Arc::new(config);
    let metrics = Arc::new(Metrics::new()?);

    if let Some(address) = config.prometheus_server.clone() {
        let metrics = Arc::clone(&metrics);
        tokio::spawn(async move {
            if let Err(e) = metrics_server::serve(address.clone(), metrics).await {
                warn!(address = address.as_str(), error = %e, "metrics endpoint failed");
            }
        });
    }

    let shutdown = Arc::new(Notify::new());
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let signal_shutdown = Arc::clone(&shutdown);
    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
            _ = sigint.recv() => info!("received SIGINT, shutting down"),
        }
        signal_shutdown.notify_one();
    });

    let pool = PoolSupervisor::new(
        Arc::clone(&config),
        TcpBroker::new(),
        Arc::new(ProcHostStats::new()),
        Arc::new(cipher),
        metrics,
    );
    pool.run(shutdown).await;

    Ok(())
}

/// Log level comes from `debug`, destination from `logmode`. The guard
/// keeps the non-blocking writer alive for the process lifetime.
fn setup_logging(config: &Config) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let level = match config.debug {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let to_file = match config.logmode {
        LogMode::Stdout => false,
        LogMode::File => true,
        LogMode::Automatic => config.daemon,
    };

    if to_file {
        if let Some(path) = &config.logfile {
            if let (Some(dir), Some(name)) = (path.parent(), path.file_name()) {
                let _ = std::fs::create_dir_all(dir);
                let appender = tracing_appender::rolling::never(dir, name);
                let (non_blocking, guard) = tracing_appender::non_blocking(appender);
                tracing_subscriber::registry()
                    .with(filter)
                    .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
                    .init();
                return Some(guard);
            }
        }
        eprintln!("warning: logmode wants a file but no usable logfile is set");
    }

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .init();
    None
}

#[cfg(test)]
#[path = "main_tests.rs"]
mod tests;
