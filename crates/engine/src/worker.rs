// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! One long-lived job-processing unit.
//!
//! A worker owns one broker session per healthy server and blocks in the
//! delivery loop for its next job. Check workers decode, execute and
//! publish; the status worker answers introspection requests. Long-running
//! jobs can be handed to a background task ("ballooning") so the delivery
//! loop frees up while the subprocess keeps running.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::select_all;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;

use gw_adapters::{Broker, BrokerError, BrokerSession, Delivery};
use gw_core::{Cipher, Config, ReceivedJob, SystemClock, WorkerId};

use crate::error::SpawnError;
use crate::metrics::Metrics;
use crate::pool::PoolState;
use crate::publisher::ResultPublisher;
use crate::status;

/// What a worker does with its deliveries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerRole {
    /// Executes check jobs from the selected queues.
    Check,
    /// Answers on `worker_<identifier>` with the pool status.
    Status,
}

/// Worker-side counters shared with the supervisor.
#[derive(Debug)]
pub(crate) struct WorkerShared {
    pub active_jobs: AtomicUsize,
    pub shutdown: Notify,
}

/// Supervisor-side handle to a running worker.
#[derive(Debug)]
pub struct WorkerHandle {
    id: WorkerId,
    role: WorkerRole,
    shared: Arc<WorkerShared>,
    join: JoinHandle<()>,
}

impl WorkerHandle {
    pub fn id(&self) -> &WorkerId {
        &self.id
    }

    pub fn role(&self) -> WorkerRole {
        self.role
    }

    /// Jobs currently executing on this worker (including ballooned ones).
    pub fn active_jobs(&self) -> usize {
        self.shared.active_jobs.load(Ordering::SeqCst)
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Ask the worker to finish its current job and exit.
    pub fn request_shutdown(&self) {
        self.shared.shutdown.notify_one();
    }

    /// Await the worker task, logging a panic if there was one.
    pub(crate) async fn finish(self) {
        if let Err(e) = self.join.await {
            if e.is_panic() {
                tracing::error!(worker = %self.id, error = %e, "worker task panicked");
            }
        }
    }

    /// Await the worker task up to `grace`, then abort it.
    pub(crate) async fn finish_within(self, grace: Duration) {
        let id = self.id.clone();
        match tokio::time::timeout(grace, self.join).await {
            Ok(Err(e)) if e.is_panic() => {
                tracing::error!(worker = %id, error = %e, "worker task panicked");
            }
            Ok(_) => {}
            Err(_elapsed) => {
                tracing::warn!(worker = %id, "worker did not stop in time");
            }
        }
    }
}

/// A job-processing unit bound to its broker sessions.
pub struct Worker<B: Broker> {
    id: WorkerId,
    role: WorkerRole,
    config: Arc<Config>,
    state: Arc<PoolState>,
    metrics: Arc<Metrics>,
    cipher: Arc<Cipher>,
    sessions: Vec<B::Session>,
    publisher: Arc<tokio::sync::Mutex<ResultPublisher<B>>>,
    shared: Arc<WorkerShared>,
    jobs_handled: u32,
    last_job_finished: tokio::time::Instant,
    /// In-flight ballooned executions, drained at teardown.
    balloon_tasks: Vec<JoinHandle<()>>,
}

impl<B: Broker> Worker<B> {
    /// Connect to every active server, register the role's queues, and
    /// start the delivery task. Any registration failure is recorded in
    /// the pool's server status and aborts the spawn.
    pub async fn spawn(
        role: WorkerRole,
        broker: B,
        config: Arc<Config>,
        state: Arc<PoolState>,
        metrics: Arc<Metrics>,
        cipher: Arc<Cipher>,
    ) -> Result<WorkerHandle, SpawnError>
    where
        <B as Broker>::Session: Sync,
    {
        let queues = match role {
            WorkerRole::Check => config.check_queues(),
            WorkerRole::Status => vec![config.status_queue()],
        };

        let servers = state.active_server_list();
        if servers.is_empty() {
            return Err(SpawnError::NoActiveServer);
        }

        let mut sessions = Vec::with_capacity(servers.len());
        for address in &servers {
            let mut session = match broker.connect(address).await {
                Ok(session) => session,
                Err(e) => {
                    state.set_server_status(address, &e.to_string());
                    return Err(SpawnError::Broker(e));
                }
            };
            if let Err(e) = session.subscribe(&queues).await {
                state.set_server_status(address, &e.to_string());
                return Err(SpawnError::Broker(e));
            }
            state.set_server_status(address, "");
            sessions.push(session);
        }

        let id = WorkerId::generate();
        tracing::debug!(worker = %id, role = ?role, servers = servers.len(), "worker registered");

        let shared = Arc::new(WorkerShared {
            active_jobs: AtomicUsize::new(0),
            shutdown: Notify::new(),
        });
        let publisher = Arc::new(tokio::sync::Mutex::new(ResultPublisher::new(
            broker,
            Arc::clone(&config),
            Arc::clone(&state),
            Arc::clone(&cipher),
        )));

        let worker = Worker {
            id: id.clone(),
            role,
            config,
            state,
            metrics,
            cipher,
            sessions,
            publisher,
            shared: Arc::clone(&shared),
            jobs_handled: 0,
            last_job_finished: tokio::time::Instant::now(),
            balloon_tasks: Vec::new(),
        };
        let join = tokio::spawn(worker.run());

        Ok(WorkerHandle {
            id,
            role,
            shared,
            join,
        })
    }

    /// Delivery loop: block for the next job, handle it, retire when told
    /// to or when the voluntary-retirement rules say so.
    async fn run(mut self) {
        let shared = Arc::clone(&self.shared);
        loop {
            if self.sessions.is_empty() {
                break;
            }
            let idle_deadline =
                self.last_job_finished + Duration::from_secs(self.config.idle_timeout.max(1));

            tokio::select! {
                _ = shared.shutdown.notified() => {
                    tracing::debug!(worker = %self.id, "shutdown requested");
                    break;
                }

                _ = tokio::time::sleep_until(idle_deadline) => {
                    if self.should_retire_idle() {
                        tracing::debug!(worker = %self.id, "retiring after idle timeout");
                        break;
                    }
                    self.last_job_finished = tokio::time::Instant::now();
                }

                next = next_delivery::<B>(&mut self.sessions) => match next {
                    Ok((index, delivery)) => {
                        self.handle_delivery(index, delivery).await;
                        self.jobs_handled += 1;
                        self.last_job_finished = tokio::time::Instant::now();
                        if self.role == WorkerRole::Check
                            && self.jobs_handled >= self.config.max_jobs
                        {
                            tracing::debug!(
                                worker = %self.id,
                                jobs = self.jobs_handled,
                                "retiring after max jobs"
                            );
                            break;
                        }
                    }
                    Err(e) => {
                        self.handle_broker_error(e);
                        break;
                    }
                },
            }
        }
        self.teardown().await;
    }

    /// Idle retirement applies to check workers while the pool is above
    /// its floor.
    fn should_retire_idle(&self) -> bool {
        self.role == WorkerRole::Check
            && self.shared.active_jobs.load(Ordering::SeqCst) == 0
            && self.state.worker_count() > self.config.min_worker
    }

    /// Disconnects mark the server; anything else just takes this worker
    /// down. The supervisor replaces it on its next tick.
    fn handle_broker_error(&self, error: BrokerError) {
        match &error {
            BrokerError::Disconnected { address, message } => {
                tracing::debug!(worker = %self.id, address = address.as_str(), message = message.as_str(), "broker disconnect");
                self.state.set_server_status(address, message);
            }
            other => {
                tracing::error!(worker = %self.id, error = %other, "broker error");
            }
        }
    }

    async fn handle_delivery(&mut self, session_index: usize, delivery: Delivery) {
        match self.role {
            WorkerRole::Check => self.handle_check_job(session_index, delivery).await,
            WorkerRole::Status => self.handle_status_request(session_index, delivery).await,
        }
    }

    async fn handle_check_job(&mut self, session_index: usize, delivery: Delivery) {
        tracing::trace!(worker = %self.id, handle = delivery.handle.as_str(), "job received");
        self.job_started();

        let job = match self
            .cipher
            .decode(&delivery.payload)
            .and_then(|text| ReceivedJob::parse(&text))
        {
            Ok(job) => job,
            Err(e) => {
                // Bad key or mangled payload: drop the job, no result.
                tracing::error!(worker = %self.id, error = %e, "payload decode failed");
                self.metrics.decode_errors.inc();
                self.job_finished();
                self.acknowledge(session_index, &delivery.handle).await;
                return;
            }
        };

        self.metrics.count_task(job.kind);
        self.state.count_task();
        tracing::debug!(
            worker = %self.id,
            kind = %job.kind,
            host = job.host_name.as_str(),
            service = job.service_description.as_str(),
            "incoming job"
        );

        if self.state.consider_ballooning() {
            self.execute_backgrounded(job).await;
        } else {
            run_job(&job, &self.config, &self.metrics, &self.publisher).await;
            self.job_finished();
        }

        self.acknowledge(session_index, &delivery.handle).await;
        self.reap_balloons();
    }

    /// Run the job on a background task. If it outlives the backgrounding
    /// threshold and a ballooning slot is free, release the delivery loop
    /// while the task keeps running; the only coupling left is the counter
    /// decrement on completion.
    async fn execute_backgrounded(&mut self, mut job: ReceivedJob) {
        let (done_tx, mut done_rx) = oneshot::channel::<()>();
        let config = Arc::clone(&self.config);
        let metrics = Arc::clone(&self.metrics);
        let publisher = Arc::clone(&self.publisher);
        let shared = Arc::clone(&self.shared);
        let state = Arc::clone(&self.state);

        job.ballooning = true;
        let task = tokio::spawn(async move {
            run_job(&job, &config, &metrics, &publisher).await;
            shared.active_jobs.fetch_sub(1, Ordering::SeqCst);
            state.job_finished();
            let _ = done_tx.send(());
        });

        let threshold = Duration::from_secs(self.config.backgrounding_threshold.max(1) as u64);
        loop {
            tokio::select! {
                _ = &mut done_rx => {
                    // Finished before the threshold: plain synchronous
                    // behavior as far as the broker can tell.
                    self.reap_task(task).await;
                    return;
                }
                _ = tokio::time::sleep(threshold) => {
                    if !self.state.try_start_ballooning() {
                        // All ballooning slots busy or interlocks engaged;
                        // re-arm and keep waiting.
                        continue;
                    }
                    tracing::debug!(
                        worker = %self.id,
                        threshold_secs = threshold.as_secs(),
                        "job runs long, backgrounding"
                    );
                    let state = Arc::clone(&self.state);
                    let watcher = tokio::spawn(async move {
                        let _ = done_rx.await;
                        state.end_ballooning();
                    });
                    self.balloon_tasks.push(task);
                    self.balloon_tasks.push(watcher);
                    return;
                }
            }
        }
    }

    async fn handle_status_request(&mut self, session_index: usize, delivery: Delivery) {
        let text = status::render(&self.state.snapshot(), &self.config.identifier);
        if let Some(session) = self.sessions.get_mut(session_index) {
            if let Err(e) = session.respond(&delivery.handle, text.as_bytes()).await {
                tracing::debug!(worker = %self.id, error = %e, "status reply failed");
            }
        }
    }

    fn job_started(&self) {
        self.shared.active_jobs.fetch_add(1, Ordering::SeqCst);
        self.state.job_started();
    }

    fn job_finished(&self) {
        self.shared.active_jobs.fetch_sub(1, Ordering::SeqCst);
        self.state.job_finished();
    }

    /// Tell the broker the delivery was handled.
    async fn acknowledge(&mut self, session_index: usize, handle: &str) {
        if let Some(session) = self.sessions.get_mut(session_index) {
            if let Err(e) = session.respond(handle, b"OK").await {
                tracing::debug!(worker = %self.id, error = %e, "job acknowledgement failed");
            }
        }
    }

    /// Drop handles of ballooned tasks that have already finished.
    fn reap_balloons(&mut self) {
        self.balloon_tasks.retain(|task| !task.is_finished());
    }

    async fn reap_task(&self, task: JoinHandle<()>) {
        if let Err(e) = task.await {
            if e.is_panic() {
                tracing::error!(worker = %self.id, error = %e, "job task panicked");
            }
        }
    }

    /// Drop the sessions, then wait out in-flight ballooned jobs bounded
    /// by the job timeout. The graceful deregistration is only sent when
    /// no job is active at this point; a worker torn down mid-job (say, a
    /// disconnect while a ballooned subprocess is still running) just
    /// closes the link. `close` happens unconditionally.
    async fn teardown(mut self) {
        let idle = self.shared.active_jobs.load(Ordering::SeqCst) == 0;
        for mut session in self.sessions.drain(..) {
            if idle {
                session.shutdown().await;
            }
            session.close().await;
        }

        let grace = Duration::from_secs(self.config.job_timeout.max(1));
        for task in self.balloon_tasks.drain(..) {
            match tokio::time::timeout(grace, task).await {
                Ok(Err(e)) if e.is_panic() => {
                    tracing::error!(worker = %self.id, error = %e, "ballooned job panicked");
                }
                Ok(_) => {}
                Err(_elapsed) => {
                    tracing::warn!(worker = %self.id, "ballooned job still running at shutdown");
                }
            }
        }

        self.publisher.lock().await.close().await;
        tracing::debug!(worker = %self.id, jobs = self.jobs_handled, "worker shut down");
    }
}

/// Execute one job and publish its result (skipped for fire-and-forget
/// jobs with no result queue).
async fn run_job<B: Broker>(
    job: &ReceivedJob,
    config: &Config,
    metrics: &Metrics,
    publisher: &tokio::sync::Mutex<ResultPublisher<B>>,
) {
    let result = crate::executor::execute(job, config, &SystemClock).await;
    if result.return_code > 0 {
        metrics.count_error(job.kind);
    }
    if result.result_queue.is_empty() {
        return;
    }
    publisher.lock().await.publish(&result).await;
}

/// Wait on all sessions at once; whichever produces first wins. The
/// abandoned `next_job` futures are cancel safe by contract.
async fn next_delivery<B: Broker>(
    sessions: &mut [B::Session],
) -> Result<(usize, Delivery), BrokerError> {
    let futures: Vec<_> = sessions
        .iter_mut()
        .enumerate()
        .map(|(index, session)| Box::pin(async move { (index, session.next_job().await) }))
        .collect();
    let ((index, result), _, rest) = select_all(futures).await;
    drop(rest);
    result.map(|delivery| (index, delivery))
}

#[cfg(test)]
#[path = "worker_tests.rs"]
mod tests;
