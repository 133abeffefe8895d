// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! gearworker execution engine: check executor, worker fleet, pool
//! supervisor and result publisher.

mod error;
mod executor;
mod metrics;
mod pool;
mod publisher;
mod status;
mod worker;

pub use error::SpawnError;
pub use executor::execute;
pub use metrics::Metrics;
pub use pool::{PoolSnapshot, PoolState, PoolSupervisor};
pub use publisher::ResultPublisher;
pub use worker::{Worker, WorkerHandle, WorkerRole};
