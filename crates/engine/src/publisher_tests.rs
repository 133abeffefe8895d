// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use gw_adapters::{FakeHostStats, MemoryBroker};

fn test_config() -> Config {
    let mut config = Config::default();
    config.identifier = "pub-test".into();
    config.hosts = true;
    config.encryption = false;
    config.apply_setting("server", "a:4730,b:4730").unwrap();
    config
}

fn publisher_with(config: Config, broker: &MemoryBroker) -> ResultPublisher<MemoryBroker> {
    let config = Arc::new(config);
    let state = Arc::new(PoolState::new(
        Arc::clone(&config),
        Arc::new(FakeHostStats::new()),
    ));
    ResultPublisher::new(broker.clone(), config, state, Arc::new(Cipher::disabled()))
}

fn result(queue: &str) -> CheckResult {
    CheckResult {
        host_name: "web01".into(),
        service_description: String::new(),
        return_code: 0,
        output: "ok".into(),
        start_time: 100.0,
        finish_time: 101.0,
        result_queue: queue.into(),
    }
}

#[tokio::test]
async fn publishes_to_first_healthy_primary() {
    let broker = MemoryBroker::new();
    let mut publisher = publisher_with(test_config(), &broker);

    publisher.publish(&result("check_results")).await;

    let submissions = broker.submissions();
    assert_eq!(submissions.len(), 1);
    assert_eq!(submissions[0].address, "a:4730");
    assert_eq!(submissions[0].queue, "check_results");
    let text = Cipher::disabled().decode(&submissions[0].payload).unwrap();
    assert!(text.contains("host_name=web01\n"));
    assert!(text.contains("source=Mod-Gearman Worker @ pub-test\n"));
}

#[tokio::test]
async fn empty_result_queue_is_skipped() {
    let broker = MemoryBroker::new();
    let mut publisher = publisher_with(test_config(), &broker);
    publisher.publish(&result("")).await;
    assert!(broker.submissions().is_empty());
}

#[tokio::test]
async fn fails_over_to_the_next_primary() {
    let broker = MemoryBroker::new();
    broker.set_down("a:4730");
    let mut publisher = publisher_with(test_config(), &broker);

    publisher.publish(&result("check_results")).await;

    let submissions = broker.submissions();
    assert_eq!(submissions.len(), 1);
    assert_eq!(submissions[0].address, "b:4730");
}

#[tokio::test]
async fn all_primaries_down_drops_the_result() {
    let broker = MemoryBroker::new();
    broker.set_down("a:4730");
    broker.set_down("b:4730");
    let mut publisher = publisher_with(test_config(), &broker);

    publisher.publish(&result("check_results")).await;
    assert!(broker.submissions().is_empty());
}

#[tokio::test]
async fn duplicate_brokers_get_identical_bytes() {
    let mut config = test_config();
    config.apply_setting("dupserver", "dup:4730").unwrap();
    let broker = MemoryBroker::new();
    let mut publisher = publisher_with(config, &broker);

    publisher.publish(&result("check_results")).await;

    let submissions = broker.submissions();
    assert_eq!(submissions.len(), 2);
    assert_eq!(submissions[0].address, "a:4730");
    assert_eq!(submissions[1].address, "dup:4730");
    assert_eq!(submissions[0].queue, submissions[1].queue);
    assert_eq!(submissions[0].payload, submissions[1].payload);
}

#[tokio::test]
async fn duplicate_failure_is_not_fatal() {
    let mut config = test_config();
    config.apply_setting("dupserver", "dup:4730").unwrap();
    let broker = MemoryBroker::new();
    broker.set_down("dup:4730");
    let mut publisher = publisher_with(config, &broker);

    publisher.publish(&result("check_results")).await;

    let submissions = broker.submissions();
    assert_eq!(submissions.len(), 1);
    assert_eq!(submissions[0].address, "a:4730");
}

#[tokio::test]
async fn sessions_are_reused_across_publishes() {
    let broker = MemoryBroker::new();
    let mut publisher = publisher_with(test_config(), &broker);

    publisher.publish(&result("check_results")).await;
    publisher.publish(&result("check_results")).await;

    let submissions = broker.submissions();
    assert_eq!(submissions.len(), 2);
    assert!(submissions.iter().all(|s| s.address == "a:4730"));
    publisher.close().await;
}

#[tokio::test]
async fn encrypted_payloads_round_trip() {
    let mut config = test_config();
    config.encryption = true;
    config.key = "publisher-key".into();
    let cipher = Arc::new(config.build_cipher().unwrap());
    let broker = MemoryBroker::new();

    let config = Arc::new(config);
    let state = Arc::new(PoolState::new(
        Arc::clone(&config),
        Arc::new(FakeHostStats::new()),
    ));
    let mut publisher =
        ResultPublisher::new(broker.clone(), config, state, Arc::clone(&cipher));

    publisher.publish(&result("check_results")).await;

    let submissions = broker.submissions();
    assert_eq!(submissions.len(), 1);
    let text = cipher.decode(&submissions[0].payload).unwrap();
    assert!(text.contains("output=ok\n"));
}
