// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Result publication: encrypt once, enqueue on the first healthy primary
//! broker, then copy the identical bytes to every duplicate broker.

use std::collections::HashMap;
use std::sync::Arc;

use gw_adapters::{Broker, BrokerError, BrokerSession};
use gw_core::{CheckResult, Cipher, Config};

use crate::pool::PoolState;

/// Per-worker publisher. Submit sessions are opened lazily and cached per
/// address; a failed session is dropped and reopened on the next publish.
pub struct ResultPublisher<B: Broker> {
    broker: B,
    config: Arc<Config>,
    state: Arc<PoolState>,
    cipher: Arc<Cipher>,
    primary: HashMap<String, B::Session>,
    duplicate: HashMap<String, B::Session>,
}

impl<B: Broker> ResultPublisher<B> {
    pub fn new(
        broker: B,
        config: Arc<Config>,
        state: Arc<PoolState>,
        cipher: Arc<Cipher>,
    ) -> Self {
        Self {
            broker,
            config,
            state,
            cipher,
            primary: HashMap::new(),
            duplicate: HashMap::new(),
        }
    }

    /// Publish one result. Fire-and-forget jobs (empty result queue) are
    /// skipped. Primary failures mark the server and fall through to the
    /// next one; duplicate failures are logged and ignored.
    pub async fn publish(&mut self, result: &CheckResult) {
        if result.result_queue.is_empty() {
            return;
        }
        let payload = self.cipher.encode(&result.to_wire(&self.config.identifier));

        let mut published = false;
        for address in self.state.active_server_list() {
            match submit_via(
                &self.broker,
                &mut self.primary,
                &address,
                &result.result_queue,
                &payload,
            )
            .await
            {
                Ok(()) => {
                    published = true;
                    break;
                }
                Err(e) => {
                    tracing::warn!(address = address.as_str(), error = %e, "result submit failed");
                    self.state.set_server_status(&address, &e.to_string());
                }
            }
        }
        if !published {
            tracing::warn!(
                host = result.host_name.as_str(),
                queue = result.result_queue.as_str(),
                "no broker accepted the result, dropping it"
            );
        }

        for address in self.config.dupservers.clone() {
            if let Err(e) = submit_via(
                &self.broker,
                &mut self.duplicate,
                &address,
                &result.result_queue,
                &payload,
            )
            .await
            {
                tracing::debug!(address = address.as_str(), error = %e, "duplicate submit failed");
            }
        }
    }

    /// Drop all cached sessions.
    pub async fn close(&mut self) {
        for (_, mut session) in self.primary.drain() {
            session.shutdown().await;
            session.close().await;
        }
        for (_, mut session) in self.duplicate.drain() {
            session.shutdown().await;
            session.close().await;
        }
    }
}

/// Submit through a cached session, reconnecting when there is none. On
/// error the session is discarded so the next attempt starts fresh.
async fn submit_via<B: Broker>(
    broker: &B,
    sessions: &mut HashMap<String, B::Session>,
    address: &str,
    queue: &str,
    payload: &[u8],
) -> Result<(), BrokerError> {
    let mut session = match sessions.remove(address) {
        Some(session) => session,
        None => broker.connect(address).await?,
    };
    match session.submit(queue, payload).await {
        Ok(()) => {
            sessions.insert(address.to_string(), session);
            Ok(())
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
#[path = "publisher_tests.rs"]
mod tests;
