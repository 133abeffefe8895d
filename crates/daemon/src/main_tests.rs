// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use clap::Parser;

fn parse(args: &[&str]) -> Cli {
    Cli::parse_from(std::iter::once("gearworker").chain(args.iter().copied()))
}

#[test]
fn flags_override_defaults() {
    let cli = parse(&[
        "--server=broker1",
        "--server=broker2:4731",
        "--hosts",
        "--services",
        "--key=secret",
        "--max-worker=8",
        "--min-worker=2",
        "--identifier=node1",
        "--max-possible-worker=16",
    ]);
    let (config, cipher) = assemble(&cli).unwrap();

    assert_eq!(config.servers, vec!["broker1:4730", "broker2:4731"]);
    assert!(config.hosts && config.services);
    assert_eq!(config.min_worker, 2);
    assert_eq!(config.max_worker, 8);
    assert_eq!(config.max_possible_worker, 16);
    assert_eq!(config.identifier, "node1");
    assert!(cipher.is_enabled());
}

#[test]
fn config_file_then_flags() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("worker.cfg");
    std::fs::write(
        &path,
        "server=filebroker\nhosts\nkey=filekey\nmax-worker=5\nencryption=no\n",
    )
    .unwrap();

    let config_arg = format!("--config={}", path.display());
    let cli = parse(&[config_arg.as_str(), "--max-worker=9"]);
    let (config, cipher) = assemble(&cli).unwrap();

    assert_eq!(config.servers, vec!["filebroker:4730"]);
    // The flag wins over the file.
    assert_eq!(config.max_worker, 9);
    assert!(!cipher.is_enabled());
}

#[test]
fn missing_server_is_fatal() {
    let cli = parse(&["--hosts", "--key=secret"]);
    assert!(matches!(assemble(&cli), Err(ConfigError::NoServer)));
}

#[test]
fn missing_queues_is_fatal() {
    let cli = parse(&["--server=broker1", "--key=secret"]);
    assert!(matches!(assemble(&cli), Err(ConfigError::NoQueues)));
}

#[test]
fn missing_key_is_fatal_with_encryption() {
    let cli = parse(&["--server=broker1", "--hosts"]);
    assert!(matches!(assemble(&cli), Err(ConfigError::MissingKey)));
}

#[test]
fn encryption_off_needs_no_key() {
    let cli = parse(&["--server=broker1", "--hosts", "--encryption=no"]);
    let (_, cipher) = assemble(&cli).unwrap();
    assert!(!cipher.is_enabled());
}

#[test]
fn identifier_defaults_to_hostname() {
    let cli = parse(&["--server=broker1", "--hosts", "--encryption=no"]);
    let (config, _) = assemble(&cli).unwrap();
    assert!(!config.identifier.is_empty());
    assert_eq!(config.identifier, default_identifier());
}

#[test]
fn max_possible_worker_is_derived_when_unset() {
    let cli = parse(&["--server=broker1", "--hosts", "--encryption=no", "--max-worker=4"]);
    let (config, _) = assemble(&cli).unwrap();
    assert!(config.max_possible_worker >= 4);
    assert_eq!(config.max_possible_worker, derive_max_possible(4).max(4));
}

#[test]
fn derive_max_possible_never_below_max_worker() {
    assert!(derive_max_possible(10_000) >= 10_000);
}

#[test]
fn groups_alone_satisfy_queue_validation() {
    let cli = parse(&[
        "--server=broker1",
        "--hostgroup=linux",
        "--encryption=no",
    ]);
    let (config, _) = assemble(&cli).unwrap();
    assert_eq!(config.check_queues(), vec!["hostgroup_linux"]);
}
