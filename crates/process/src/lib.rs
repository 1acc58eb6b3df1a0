// Copyright (c) Telcoin, LLC
// SPDX-License-Identifier: Apache-2.0

//! Start, stop and kill node processes.
//!
//! Two executors share one contract: a spawned local binary whose handle is
//! its pid, and a docker container whose handle is its name. `stop` is
//! graceful-then-forceful and idempotent; a target that is already gone is
//! a success.

mod container;
mod local;
mod tail;

pub use container::{ContainerExecutor, ContainerSpec};
pub use local::{LocalExecutor, LocalHandle, StartSpec};
pub use tail::tail_log;
