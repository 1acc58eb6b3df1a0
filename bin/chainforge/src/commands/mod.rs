// Copyright (c) Telcoin, LLC
// SPDX-License-Identifier: Apache-2.0

pub mod deploy;
pub mod destroy;
pub mod export;
pub mod lifecycle;
pub mod node;
pub mod replace;
pub mod reset;
pub mod status;
pub mod upgrade;
