// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::pool::PoolState;
use gw_adapters::{FakeHostStats, MemoryBroker};
use std::time::Duration;

struct Harness {
    broker: MemoryBroker,
    config: Arc<Config>,
    state: Arc<PoolState>,
    metrics: Arc<Metrics>,
    cipher: Arc<Cipher>,
}

fn test_config() -> Config {
    let mut config = Config::default();
    config.identifier = "testworker".into();
    config.hosts = true;
    config.services = true;
    config.encryption = false;
    config.idle_timeout = 60;
    config.backgrounding_threshold = 0;
    config.apply_setting("server", "a:4730").unwrap();
    config
}

fn harness(config: Config) -> Harness {
    let config = Arc::new(config);
    let state = Arc::new(PoolState::new(
        Arc::clone(&config),
        Arc::new(FakeHostStats::new()),
    ));
    Harness {
        broker: MemoryBroker::new(),
        config,
        state,
        metrics: Arc::new(Metrics::new().unwrap()),
        cipher: Arc::new(Cipher::disabled()),
    }
}

async fn spawn_worker(h: &Harness, role: WorkerRole) -> WorkerHandle {
    Worker::spawn(
        role,
        h.broker.clone(),
        Arc::clone(&h.config),
        Arc::clone(&h.state),
        Arc::clone(&h.metrics),
        Arc::clone(&h.cipher),
    )
    .await
    .unwrap()
}

fn payload(cipher: &Cipher, command: &str, result_queue: &str) -> Vec<u8> {
    cipher.encode(&format!(
        "type=host\nhost_name=web01\ncommand_line={command}\nresult_queue={result_queue}\n"
    ))
}

async fn wait_until(mut check: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}

#[tokio::test]
async fn happy_path_publishes_result() {
    let h = harness(test_config());
    let handle = spawn_worker(&h, WorkerRole::Check).await;

    h.broker
        .push_job("host", payload(&h.cipher, "/bin/echo ok", "check_results"));

    let broker = h.broker.clone();
    assert!(wait_until(|| !broker.submissions().is_empty(), Duration::from_secs(2)).await);

    let submissions = h.broker.submissions();
    assert_eq!(submissions.len(), 1);
    assert_eq!(submissions[0].queue, "check_results");
    let text = h.cipher.decode(&submissions[0].payload).unwrap();
    assert!(text.contains("host_name=web01\n"));
    assert!(text.contains("return_code=0\n"));
    assert!(text.contains("output=ok\n"));
    assert!(text.contains("source=Mod-Gearman Worker @ testworker\n"));

    // The delivery itself was acknowledged.
    assert!(wait_until(|| !broker.responses().is_empty(), Duration::from_secs(1)).await);
    assert_eq!(h.metrics.tasks_total.get(), 1);
    assert_eq!(h.state.tasks(), 1);

    handle.request_shutdown();
    handle.finish().await;
}

#[tokio::test]
async fn encrypted_round_trip() {
    let mut config = test_config();
    config.encryption = true;
    config.key = "shared-secret".into();
    let cipher = Arc::new(config.build_cipher().unwrap());
    let mut h = harness(config);
    h.cipher = Arc::clone(&cipher);
    let handle = spawn_worker(&h, WorkerRole::Check).await;

    h.broker
        .push_job("host", payload(&cipher, "/bin/echo secret-ok", "check_results"));

    let broker = h.broker.clone();
    assert!(wait_until(|| !broker.submissions().is_empty(), Duration::from_secs(2)).await);
    let text = cipher.decode(&h.broker.submissions()[0].payload).unwrap();
    assert!(text.contains("output=secret-ok\n"));

    handle.request_shutdown();
    handle.finish().await;
}

#[tokio::test]
async fn decode_failure_drops_job_and_worker_stays_healthy() {
    let mut config = test_config();
    config.encryption = true;
    config.key = "right-key".into();
    let cipher = Arc::new(config.build_cipher().unwrap());
    let mut h = harness(config);
    h.cipher = Arc::clone(&cipher);
    let handle = spawn_worker(&h, WorkerRole::Check).await;

    // Encrypted with a different key: decodes to garbage, job is dropped.
    let wrong = Cipher::new(&gw_core::derive_key("wrong-key"), true);
    h.broker
        .push_job("host", payload(&wrong, "/bin/echo nope", "check_results"));

    let metrics = Arc::clone(&h.metrics);
    assert!(wait_until(|| metrics.decode_errors.get() == 1, Duration::from_secs(2)).await);
    assert!(h.broker.submissions().is_empty());
    assert_eq!(h.metrics.tasks_total.get(), 0);
    assert!(!handle.is_finished());

    // The next well-formed job is handled normally.
    h.broker
        .push_job("host", payload(&cipher, "/bin/echo fine", "check_results"));
    let broker = h.broker.clone();
    assert!(wait_until(|| !broker.submissions().is_empty(), Duration::from_secs(2)).await);

    handle.request_shutdown();
    handle.finish().await;
}

#[tokio::test]
async fn empty_result_queue_skips_publication() {
    let h = harness(test_config());
    let handle = spawn_worker(&h, WorkerRole::Check).await;

    h.broker.push_job("host", payload(&h.cipher, "/bin/echo ok", ""));

    let broker = h.broker.clone();
    // The acknowledgement proves the job ran.
    assert!(wait_until(|| !broker.responses().is_empty(), Duration::from_secs(2)).await);
    assert!(h.broker.submissions().is_empty());

    handle.request_shutdown();
    handle.finish().await;
}

#[tokio::test]
async fn worker_retires_after_max_jobs() {
    let mut config = test_config();
    config.max_jobs = 1;
    let h = harness(config);
    let handle = spawn_worker(&h, WorkerRole::Check).await;

    h.broker
        .push_job("host", payload(&h.cipher, "/bin/echo done", "check_results"));

    assert!(wait_until(|| handle.is_finished(), Duration::from_secs(2)).await);
    handle.finish().await;
    // Nothing was in flight, so the worker deregistered gracefully.
    assert_eq!(h.broker.shutdowns(), vec!["a:4730".to_string()]);
}

#[tokio::test]
async fn worker_retires_when_idle_above_floor() {
    let mut config = test_config();
    config.idle_timeout = 1;
    config.min_worker = 1;
    let h = harness(config);
    // Pretend the pool runs two workers, so one may go.
    h.state.set_worker_count(2);
    let handle = spawn_worker(&h, WorkerRole::Check).await;

    assert!(wait_until(|| handle.is_finished(), Duration::from_secs(3)).await);
    handle.finish().await;
}

#[tokio::test]
async fn worker_stays_at_the_floor_despite_idling() {
    let mut config = test_config();
    config.idle_timeout = 1;
    config.min_worker = 1;
    let h = harness(config);
    h.state.set_worker_count(1);
    let handle = spawn_worker(&h, WorkerRole::Check).await;

    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert!(!handle.is_finished());

    handle.request_shutdown();
    handle.finish().await;
}

#[tokio::test]
async fn disconnect_marks_server_and_stops_worker() {
    let h = harness(test_config());
    let handle = spawn_worker(&h, WorkerRole::Check).await;
    assert_eq!(h.state.get_server_status("a:4730"), "");

    h.broker.set_down("a:4730");

    assert!(wait_until(|| handle.is_finished(), Duration::from_secs(2)).await);
    assert_ne!(h.state.get_server_status("a:4730"), "");
    handle.finish().await;
}

#[tokio::test]
async fn spawn_fails_when_no_server_accepts() {
    let h = harness(test_config());
    h.broker.set_down("a:4730");

    let err = Worker::spawn(
        WorkerRole::Check,
        h.broker.clone(),
        Arc::clone(&h.config),
        Arc::clone(&h.state),
        Arc::clone(&h.metrics),
        Arc::clone(&h.cipher),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, SpawnError::Broker(_)));
    assert_ne!(h.state.get_server_status("a:4730"), "");
}

#[tokio::test]
async fn status_worker_answers_with_pool_status() {
    let h = harness(test_config());
    h.state.set_worker_count(3);
    let handle = spawn_worker(&h, WorkerRole::Status).await;

    assert_eq!(
        h.broker.subscriptions().last().unwrap().1,
        vec!["worker_testworker".to_string()]
    );

    h.broker.push_job("worker_testworker", Vec::new());

    let broker = h.broker.clone();
    assert!(wait_until(|| !broker.responses().is_empty(), Duration::from_secs(2)).await);
    let (_, reply) = h.broker.responses().remove(0);
    let text = String::from_utf8(reply).unwrap();
    assert!(text.contains("workers: 3"), "reply: {text}");
    assert!(text.contains("jobs processed since startup: 0"));
    assert!(text.contains("server a:4730: connected"));

    handle.request_shutdown();
    handle.finish().await;
}

#[tokio::test]
async fn ballooning_frees_the_worker_for_the_next_job() {
    let mut config = test_config();
    config.min_worker = 1;
    config.max_worker = 1;
    config.max_possible_worker = 3;
    config.backgrounding_threshold = 1;
    let h = harness(config);
    h.state.set_worker_count(1);
    let handle = spawn_worker(&h, WorkerRole::Check).await;

    h.broker
        .push_job("host", payload(&h.cipher, "/bin/sleep 2", "check_results"));
    h.broker
        .push_job("host", payload(&h.cipher, "/bin/sleep 2", "check_results"));

    // After the backgrounding threshold the first job is handed off and
    // the single worker picks up the second one.
    let state = Arc::clone(&h.state);
    assert!(
        wait_until(|| state.ballooning_workers() == 1, Duration::from_secs(2)).await,
        "ballooning slot was never claimed"
    );
    assert!(h.state.active_jobs() >= 1);

    // Both results eventually publish and the slot is released.
    let broker = h.broker.clone();
    assert!(wait_until(|| broker.submissions().len() == 2, Duration::from_secs(6)).await);
    let state = Arc::clone(&h.state);
    assert!(wait_until(|| state.ballooning_workers() == 0, Duration::from_secs(2)).await);

    handle.request_shutdown();
    handle.finish().await;
}

#[tokio::test]
async fn teardown_with_ballooned_job_skips_graceful_deregistration() {
    let mut config = test_config();
    config.min_worker = 1;
    config.max_worker = 1;
    config.max_possible_worker = 3;
    config.backgrounding_threshold = 1;
    config.job_timeout = 10;
    let h = harness(config);
    h.state.set_worker_count(1);
    let handle = spawn_worker(&h, WorkerRole::Check).await;

    h.broker
        .push_job("host", payload(&h.cipher, "/bin/sleep 3", "check_results"));

    let state = Arc::clone(&h.state);
    assert!(
        wait_until(|| state.ballooning_workers() == 1, Duration::from_secs(2)).await,
        "job was never backgrounded"
    );

    // Stop the worker while the ballooned subprocess is still running:
    // the link is closed without a graceful deregistration.
    handle.request_shutdown();
    assert!(wait_until(|| handle.is_finished(), Duration::from_secs(6)).await);
    handle.finish().await;
    assert!(h.broker.shutdowns().is_empty());
    // The ballooned job was still drained to completion.
    assert_eq!(h.broker.submissions().len(), 1);
}

#[tokio::test]
async fn ballooning_denied_without_headroom() {
    let mut config = test_config();
    config.min_worker = 1;
    config.max_worker = 1;
    config.max_possible_worker = 1; // no overflow slots
    config.backgrounding_threshold = 1;
    let h = harness(config);
    h.state.set_worker_count(1);
    let handle = spawn_worker(&h, WorkerRole::Check).await;

    h.broker
        .push_job("host", payload(&h.cipher, "/bin/sleep 2", "check_results"));
    h.broker
        .push_job("host", payload(&h.cipher, "/bin/echo queued", "check_results"));

    tokio::time::sleep(Duration::from_millis(1500)).await;
    // Timer fired but no slot: the worker stays occupied by job one.
    assert_eq!(h.state.ballooning_workers(), 0);
    assert_eq!(h.broker.queued("host"), 1);

    let broker = h.broker.clone();
    assert!(wait_until(|| broker.submissions().len() == 2, Duration::from_secs(6)).await);

    handle.request_shutdown();
    handle.finish().await;
}
