// Copyright (c) Telcoin, LLC
// SPDX-License-Identifier: Apache-2.0

//! chainforge CLI surface.

pub mod cli;
mod commands;
mod context;
mod output;
