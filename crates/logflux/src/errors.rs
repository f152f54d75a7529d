// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;
use std::time::Duration;

use crate::record::Record;

/// Errors raised by a [`crate::source::Source`].
///
/// Setup failures surface from `start` before any background work begins. Transient I/O
/// problems inside a running loop are logged and never reach this type.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("{0} is already running")]
    AlreadyRunning(String),

    #[error("file not found: {}", path.display())]
    FileNotFound { path: PathBuf },

    #[error("I/O error on {}: {err}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        err: std::io::Error,
    },

    #[error("failed to bind to {address}: {err}")]
    Bind {
        address: String,
        #[source]
        err: std::io::Error,
    },

    #[error("unsupported protocol: {0}")]
    UnsupportedProtocol(String),

    #[error("{name} did not stop within {grace:?}")]
    ShutdownTimeout { name: String, grace: Duration },
}

impl SourceError {
    /// True for errors that mean the source never started.
    pub fn is_setup(&self) -> bool {
        !matches!(self, SourceError::ShutdownTimeout { .. })
    }
}

/// Errors raised by the [`crate::collector::Collector`].
#[derive(Debug, thiserror::Error)]
pub enum CollectorError {
    #[error("Collector already started")]
    AlreadyStarted,

    #[error("No sources configured")]
    NoSources,

    #[error("Failed to start {name}: {err}")]
    Setup {
        name: String,
        #[source]
        err: SourceError,
    },

    #[error("{} source(s) failed to stop cleanly", .0.len())]
    Shutdown(Vec<(String, SourceError)>),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// A non-blocking offer into the queue was refused. The record is handed back.
#[derive(Debug, thiserror::Error)]
pub enum OfferError {
    #[error("queue is full")]
    Full(Record),

    #[error("queue is closed")]
    Closed(Record),
}

impl OfferError {
    pub fn into_record(self) -> Record {
        match self {
            OfferError::Full(record) | OfferError::Closed(record) => record,
        }
    }
}

/// A blocking, cancellation-aware send into the queue did not complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error("cancelled while waiting for queue capacity")]
    Cancelled,

    #[error("queue is closed")]
    Closed,
}
