// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error types for the engine

use gw_adapters::BrokerError;
use thiserror::Error;

/// Errors that prevent a worker from being spawned.
#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("no broker is currently accepting registrations")]
    NoActiveServer,
    #[error("broker registration failed: {0}")]
    Broker(#[from] BrokerError),
}
