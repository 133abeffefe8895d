// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Broker client adapters.
//!
//! The engine never speaks a wire protocol itself; it programs against the
//! [`Broker`]/[`BrokerSession`] traits. `TcpBroker` is the production
//! client, `MemoryBroker` the in-process fake used by tests.

mod frame;
mod tcp;

pub use frame::{Frame, FrameCodec, FrameError, MAX_FRAME_SIZE};
pub use tcp::{TcpBroker, TcpSession};

// Test support - only compiled for tests or when explicitly requested
#[cfg(any(test, feature = "test-support"))]
mod memory;
#[cfg(any(test, feature = "test-support"))]
pub use memory::{MemoryBroker, MemorySession, Submission};

use async_trait::async_trait;
use thiserror::Error;

/// Errors from broker operations.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("connect to {address} failed: {message}")]
    ConnectFailed { address: String, message: String },
    #[error("disconnected from {address}: {message}")]
    Disconnected { address: String, message: String },
    #[error("protocol error from {address}: {message}")]
    Protocol { address: String, message: String },
}

impl BrokerError {
    /// The broker address the error is tied to.
    pub fn address(&self) -> &str {
        match self {
            BrokerError::ConnectFailed { address, .. }
            | BrokerError::Disconnected { address, .. }
            | BrokerError::Protocol { address, .. } => address,
        }
    }
}

/// One job handed to us by the broker. The payload is opaque until the
/// worker decodes it.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    /// Broker-assigned handle, echoed back in the response.
    pub handle: String,
    /// Queue the job was taken from.
    pub queue: String,
    pub payload: Vec<u8>,
}

/// Factory for broker sessions. Cloned into every worker; each clone
/// produces sessions the worker exclusively owns.
#[async_trait]
pub trait Broker: Clone + Send + Sync + 'static {
    type Session: BrokerSession;

    /// Open a session against one broker address.
    async fn connect(&self, address: &str) -> Result<Self::Session, BrokerError>;
}

/// One registered connection to one broker.
#[async_trait]
pub trait BrokerSession: Send + 'static {
    /// The address this session is connected to.
    fn address(&self) -> &str;

    /// Announce the queues this session wants jobs from.
    async fn subscribe(&mut self, queues: &[String]) -> Result<(), BrokerError>;

    /// Block until the broker hands over the next job. Returns
    /// [`BrokerError::Disconnected`] when the link drops. Must be
    /// cancel safe: an abandoned call may not lose an assignment.
    async fn next_job(&mut self) -> Result<Delivery, BrokerError>;

    /// Answer a delivery on its handle (status replies, completion acks).
    async fn respond(&mut self, handle: &str, payload: &[u8]) -> Result<(), BrokerError>;

    /// Enqueue a payload onto a queue (results).
    async fn submit(&mut self, queue: &str, payload: &[u8]) -> Result<(), BrokerError>;

    /// Deregister gracefully. Callers follow up with
    /// [`BrokerSession::close`]; releasing a session fully takes both
    /// calls, and idle teardown paths send this one first.
    async fn shutdown(&mut self);

    /// Drop the connection.
    async fn close(&mut self);
}
