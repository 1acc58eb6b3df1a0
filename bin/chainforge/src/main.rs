// Copyright (c) Telcoin, LLC
// SPDX-License-Identifier: Apache-2.0

fn main() {
    std::process::exit(chainforge::cli::run());
}
