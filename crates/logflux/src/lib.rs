// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

//! Multi-source log collection.
//!
//! Independently scheduled sources (a tailed file, a syslog listener, an HTTP ingestion
//! endpoint) produce [`record::Record`]s into one bounded fan-in queue that a single consumer
//! drains. The [`collector::Collector`] starts and stops every configured source under one
//! cancellation token.

pub mod collector;
pub mod config;
pub mod errors;
pub mod file_tail;
pub mod http;
pub mod http_utils;
pub mod queue;
pub mod record;
pub mod source;
pub mod syslog;
pub mod util;
