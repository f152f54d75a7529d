// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Utility functions shared by the network sources.

/// Normalizes a bind address.
///
/// An address given as `:port` (no host) binds every interface, so it becomes
/// `0.0.0.0:port`. Anything else is returned trimmed and unchanged.
///
/// # Examples
///
/// ```
/// use logflux::util::normalize_bind_address;
///
/// assert_eq!(normalize_bind_address(":8080"), "0.0.0.0:8080");
/// assert_eq!(normalize_bind_address("127.0.0.1:514"), "127.0.0.1:514");
/// assert_eq!(normalize_bind_address(" localhost:5140 "), "localhost:5140");
/// ```
pub fn normalize_bind_address(address: &str) -> String {
    let trimmed = address.trim();
    match trimmed.strip_prefix(':') {
        Some(port) => format!("0.0.0.0:{port}"),
        None => trimmed.to_string(),
    }
}
