// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Fan-in orchestrator.
//!
//! The collector owns the shared queue. [`Collector::start`] starts every source in order under
//! a child of the caller's token and hands the consumer end of the queue back; the collector
//! keeps no sender of its own, so the queue reports exhaustion once every source has stopped.

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::CollectorConfig;
use crate::errors::{CollectorError, SourceError};
use crate::queue::{self, RecordReceiver};
use crate::source::Source;

#[derive(Default)]
struct RunState {
    cancel: Option<CancellationToken>,
    started: Vec<Arc<dyn Source>>,
}

pub struct Collector {
    config: CollectorConfig,
    sources: Vec<Arc<dyn Source>>,
    state: Mutex<RunState>,
}

impl Collector {
    pub fn new(config: CollectorConfig) -> Self {
        Self {
            config,
            sources: Vec::new(),
            state: Mutex::new(RunState::default()),
        }
    }

    pub fn config(&self) -> &CollectorConfig {
        &self.config
    }

    /// Registers a source. Sources are started in registration order.
    pub fn add_source(&mut self, source: Arc<dyn Source>) {
        debug!("Registered source {}", source.name());
        self.sources.push(source);
    }

    pub fn source_names(&self) -> Vec<String> {
        self.sources.iter().map(|source| source.name()).collect()
    }

    pub async fn is_running(&self) -> bool {
        self.state.lock().await.cancel.is_some()
    }

    /// Creates the queue and starts every source.
    ///
    /// Returns once all sources finished their setup. If any source fails to set up, the
    /// sources started before it are stopped again and the failure is returned; the collector
    /// is then not running and may be started again.
    pub async fn start(
        &self,
        parent: &CancellationToken,
    ) -> Result<RecordReceiver, CollectorError> {
        let mut state = self.state.lock().await;
        if state.cancel.is_some() {
            return Err(CollectorError::AlreadyStarted);
        }
        if self.sources.is_empty() {
            return Err(CollectorError::NoSources);
        }
        self.config.validate()?;

        let (tx, rx) = queue::bounded(self.config.queue_capacity)?;
        let cancel = parent.child_token();
        let mut started: Vec<Arc<dyn Source>> = Vec::with_capacity(self.sources.len());

        for source in &self.sources {
            let name = source.name();
            if let Err(err) = source.start(cancel.clone(), tx.clone()).await {
                error!("Failed to start {name}: {err}");
                cancel.cancel();
                for (failed, stop_err) in stop_all(&started).await {
                    warn!("Error stopping {failed} after failed startup: {stop_err}");
                }
                return Err(CollectorError::Setup { name, err });
            }
            info!("Started {name}");
            started.push(Arc::clone(source));
        }

        state.cancel = Some(cancel);
        state.started = started;
        info!(
            "Collector running with {} source(s), queue capacity {}",
            self.sources.len(),
            self.config.queue_capacity
        );
        Ok(rx)
    }

    /// Cancels every source and waits for all of them to stop, each bounded by its own grace
    /// period. Calling it while not running is a no-op.
    pub async fn shutdown(&self) -> Result<(), CollectorError> {
        let mut state = self.state.lock().await;
        let Some(cancel) = state.cancel.take() else {
            return Ok(());
        };

        info!("Shutting down collector");
        cancel.cancel();
        let started = std::mem::take(&mut state.started);
        let failures = stop_all(&started).await;

        if failures.is_empty() {
            info!("All sources stopped");
            Ok(())
        } else {
            for (name, err) in &failures {
                error!("Error stopping {name}: {err}");
            }
            Err(CollectorError::Shutdown(failures))
        }
    }
}

/// Stops the given sources concurrently and collects the failures.
async fn stop_all(sources: &[Arc<dyn Source>]) -> Vec<(String, SourceError)> {
    let mut joinset = JoinSet::new();
    for source in sources {
        let source = Arc::clone(source);
        joinset.spawn(async move { (source.name(), source.stop().await) });
    }

    let mut failures = Vec::new();
    while let Some(finished) = joinset.join_next().await {
        match finished {
            Ok((_, Ok(()))) => {}
            Ok((name, Err(err))) => failures.push((name, err)),
            Err(e) => error!("Source stop task failed: {e:?}"),
        }
    }
    failures
}
