// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory fake broker for testing
#![cfg_attr(coverage_nightly, coverage(off))]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use super::{Broker, BrokerError, BrokerSession, Delivery};

/// A recorded `submit` call.
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub address: String,
    pub queue: String,
    pub payload: Vec<u8>,
}

#[derive(Debug, Default)]
struct MemoryState {
    queues: HashMap<String, VecDeque<Delivery>>,
    submissions: Vec<Submission>,
    responses: Vec<(String, Vec<u8>)>,
    subscriptions: Vec<(String, Vec<String>)>,
    /// Addresses whose sessions deregistered gracefully.
    shutdowns: Vec<String>,
    /// Addresses currently refusing connections and dropping sessions.
    down: HashSet<String>,
    next_handle: u64,
}

#[derive(Debug)]
struct Inner {
    state: Mutex<MemoryState>,
    wakeup: Notify,
}

/// Fake broker shared by every session it hands out. All addresses reach
/// the same queue map, so tests can model several brokers with one fake
/// and still tell submissions apart by address.
#[derive(Clone)]
#[derive(Debug)]
pub struct MemoryBroker {
    inner: Arc<Inner>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(MemoryState::default()),
                wakeup: Notify::new(),
            }),
        }
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a job; returns the broker-assigned handle.
    pub fn push_job(&self, queue: &str, payload: impl Into<Vec<u8>>) -> String {
        let handle = {
            let mut state = self.inner.state.lock();
            state.next_handle += 1;
            let handle = format!("mem:{}", state.next_handle);
            state
                .queues
                .entry(queue.to_string())
                .or_default()
                .push_back(Delivery {
                    handle: handle.clone(),
                    queue: queue.to_string(),
                    payload: payload.into(),
                });
            handle
        };
        self.inner.wakeup.notify_waiters();
        handle
    }

    /// Jobs still sitting in a queue.
    pub fn queued(&self, queue: &str) -> usize {
        self.inner
            .state
            .lock()
            .queues
            .get(queue)
            .map_or(0, VecDeque::len)
    }

    /// All recorded `submit` calls, in order.
    pub fn submissions(&self) -> Vec<Submission> {
        self.inner.state.lock().submissions.clone()
    }

    /// All recorded `respond` calls, in order.
    pub fn responses(&self) -> Vec<(String, Vec<u8>)> {
        self.inner.state.lock().responses.clone()
    }

    /// All recorded `subscribe` calls as (address, queues).
    pub fn subscriptions(&self) -> Vec<(String, Vec<String>)> {
        self.inner.state.lock().subscriptions.clone()
    }

    /// Addresses whose sessions called `shutdown`, in order.
    pub fn shutdowns(&self) -> Vec<String> {
        self.inner.state.lock().shutdowns.clone()
    }

    /// Take an address down: new connects fail, live sessions see
    /// `Disconnected` on their next receive, submits to it fail.
    pub fn set_down(&self, address: &str) {
        self.inner.state.lock().down.insert(address.to_string());
        self.inner.wakeup.notify_waiters();
    }

    /// Bring an address back up.
    pub fn set_up(&self, address: &str) {
        self.inner.state.lock().down.remove(address);
        self.inner.wakeup.notify_waiters();
    }

    fn is_down(&self, address: &str) -> bool {
        self.inner.state.lock().down.contains(address)
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    type Session = MemorySession;

    async fn connect(&self, address: &str) -> Result<MemorySession, BrokerError> {
        if self.is_down(address) {
            return Err(BrokerError::ConnectFailed {
                address: address.to_string(),
                message: "connection refused".to_string(),
            });
        }
        Ok(MemorySession {
            broker: self.clone(),
            address: address.to_string(),
            queues: Vec::new(),
        })
    }
}

/// Session handed out by [`MemoryBroker`].
#[derive(Debug)]
pub struct MemorySession {
    broker: MemoryBroker,
    address: String,
    queues: Vec<String>,
}

impl MemorySession {
    fn disconnected(&self) -> BrokerError {
        BrokerError::Disconnected {
            address: self.address.clone(),
            message: "broker went away".to_string(),
        }
    }
}

#[async_trait]
impl BrokerSession for MemorySession {
    fn address(&self) -> &str {
        &self.address
    }

    async fn subscribe(&mut self, queues: &[String]) -> Result<(), BrokerError> {
        if self.broker.is_down(&self.address) {
            return Err(self.disconnected());
        }
        self.queues = queues.to_vec();
        self.broker
            .inner
            .state
            .lock()
            .subscriptions
            .push((self.address.clone(), queues.to_vec()));
        Ok(())
    }

    async fn next_job(&mut self) -> Result<Delivery, BrokerError> {
        loop {
            // Arm the wakeup before checking so a push between the check
            // and the await is not lost.
            let notified = self.broker.inner.wakeup.notified();
            {
                let mut state = self.broker.inner.state.lock();
                if state.down.contains(&self.address) {
                    return Err(self.disconnected());
                }
                for queue in &self.queues {
                    if let Some(delivery) =
                        state.queues.get_mut(queue).and_then(VecDeque::pop_front)
                    {
                        return Ok(delivery);
                    }
                }
            }
            notified.await;
        }
    }

    async fn respond(&mut self, handle: &str, payload: &[u8]) -> Result<(), BrokerError> {
        if self.broker.is_down(&self.address) {
            return Err(self.disconnected());
        }
        self.broker
            .inner
            .state
            .lock()
            .responses
            .push((handle.to_string(), payload.to_vec()));
        Ok(())
    }

    async fn submit(&mut self, queue: &str, payload: &[u8]) -> Result<(), BrokerError> {
        if self.broker.is_down(&self.address) {
            return Err(self.disconnected());
        }
        self.broker.inner.state.lock().submissions.push(Submission {
            address: self.address.clone(),
            queue: queue.to_string(),
            payload: payload.to_vec(),
        });
        Ok(())
    }

    async fn shutdown(&mut self) {
        self.queues.clear();
        self.broker
            .inner
            .state
            .lock()
            .shutdowns
            .push(self.address.clone());
    }

    async fn close(&mut self) {}
}

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;
