// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

//! Clients used by the `send-syslog` and `send-http` tools to feed a running collector.

pub mod http_client;
pub mod syslog_client;

/// Turns a host-less `:port` address into one a client can connect to.
///
/// ```
/// assert_eq!(logflux_tools::connect_address(":8080"), "127.0.0.1:8080");
/// assert_eq!(logflux_tools::connect_address("localhost:5140"), "localhost:5140");
/// ```
pub fn connect_address(address: &str) -> String {
    let trimmed = address.trim();
    match trimmed.strip_prefix(':') {
        Some(port) => format!("127.0.0.1:{port}"),
        None => trimmed.to_string(),
    }
}
