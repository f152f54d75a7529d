// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Bounded fan-in queue between the sources and the single consumer.
//!
//! ```text
//!   file tail ──┐
//!   syslog ─────┼──> RecordSender (clone per producer) ──> [ bounded FIFO ] ──> RecordReceiver
//!   http ───────┘
//! ```
//!
//! Push-triggered producers use [`RecordSender::offer`] and report refusal to their caller.
//! Poll and pull producers use [`RecordSender::send`], which waits for capacity but gives up
//! as soon as their cancellation token fires. Ordering is first come first served across
//! producers and preserved per producer.

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;

use crate::errors::{ConfigError, OfferError, SendError};
use crate::record::Record;

/// Creates a bounded queue holding at most `capacity` records.
pub fn bounded(capacity: usize) -> Result<(RecordSender, RecordReceiver), ConfigError> {
    if capacity == 0 {
        return Err(ConfigError::Invalid(
            "queue capacity must be greater than 0".to_string(),
        ));
    }
    let (tx, rx) = mpsc::channel(capacity);
    Ok((RecordSender { tx }, RecordReceiver { rx }))
}

/// Producer side of the queue. Cheap to clone; each producer task owns one.
#[derive(Clone, Debug)]
pub struct RecordSender {
    tx: mpsc::Sender<Record>,
}

impl RecordSender {
    /// Admits the record only if there is room right now.
    pub fn offer(&self, record: Record) -> Result<(), OfferError> {
        self.tx.try_send(record).map_err(|e| match e {
            TrySendError::Full(record) => OfferError::Full(record),
            TrySendError::Closed(record) => OfferError::Closed(record),
        })
    }

    /// Waits for capacity, returning early if `cancel` fires first.
    pub async fn send(&self, record: Record, cancel: &CancellationToken) -> Result<(), SendError> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(SendError::Cancelled),
            res = self.tx.send(record) => res.map_err(|_| SendError::Closed),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer side of the queue.
#[derive(Debug)]
pub struct RecordReceiver {
    rx: mpsc::Receiver<Record>,
}

impl RecordReceiver {
    /// Next record in arrival order. `None` once every sender is gone and the queue is drained.
    pub async fn recv(&mut self) -> Option<Record> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Record> {
        self.rx.try_recv().ok()
    }

    /// Refuses further records; already queued records can still be received.
    pub fn close(&mut self) {
        self.rx.close();
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
