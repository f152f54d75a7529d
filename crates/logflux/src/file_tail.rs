// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Tails a growing file, emitting one record per complete line.
//!
//! The file is polled on a fixed interval. Every poll reads all complete, newline terminated
//! lines currently available and advances the byte offset by exactly the bytes consumed. A
//! trailing partial line is left in the file and picked up again on a later poll once its
//! newline arrives. The offset survives `stop`, so starting the same source again resumes
//! where it left off.

use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{DEFAULT_POLL_INTERVAL, DEFAULT_SHUTDOWN_GRACE};
use crate::errors::{SendError, SourceError};
use crate::queue::RecordSender;
use crate::record::Record;
use crate::source::{Lifecycle, Runner, Source, TaskGroup};

#[derive(Debug, Clone)]
pub struct FileTailConfig {
    pub path: PathBuf,
    pub poll_interval: Duration,
    /// Byte offset the first `start` seeks to
    pub start_offset: u64,
    pub shutdown_grace: Duration,
}

impl FileTailConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            start_offset: 0,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }
}

/// Read position and open handle. One lock covers both, shared by the read loop and
/// offset queries.
#[derive(Debug)]
struct TailState {
    offset: u64,
    reader: Option<BufReader<File>>,
}

pub struct FileTailSource {
    config: FileTailConfig,
    state: Arc<Mutex<TailState>>,
    runner: Mutex<Runner>,
}

impl FileTailSource {
    pub fn new(config: FileTailConfig) -> Self {
        let state = TailState {
            offset: config.start_offset,
            reader: None,
        };
        Self {
            config,
            state: Arc::new(Mutex::new(state)),
            runner: Mutex::new(Runner::default()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Bytes consumed so far, counted from the start of the file.
    pub async fn offset(&self) -> u64 {
        self.state.lock().await.offset
    }

    fn io_error(&self, err: io::Error) -> SourceError {
        if err.kind() == io::ErrorKind::NotFound {
            SourceError::FileNotFound {
                path: self.config.path.clone(),
            }
        } else {
            SourceError::Io {
                path: self.config.path.clone(),
                err,
            }
        }
    }
}

#[async_trait]
impl Source for FileTailSource {
    async fn start(
        &self,
        cancel: CancellationToken,
        out: RecordSender,
    ) -> Result<(), SourceError> {
        let mut runner = self.runner.lock().await;
        runner.ensure_startable(&self.name())?;

        let mut file = File::open(&self.config.path)
            .await
            .map_err(|e| self.io_error(e))?;

        let offset = {
            let mut state = self.state.lock().await;
            if state.offset > 0 {
                file.seek(SeekFrom::Start(state.offset))
                    .await
                    .map_err(|e| self.io_error(e))?;
            }
            state.reader = Some(BufReader::new(file));
            state.offset
        };

        let mut tasks = TaskGroup::new(&cancel);
        let tail = TailLoop {
            source_tag: self.config.path.display().to_string(),
            poll_interval: self.config.poll_interval,
            state: Arc::clone(&self.state),
            out,
            cancel: tasks.token(),
        };
        tasks.spawn(tail.run());
        runner.set_running(tasks);

        info!(
            "file tail started on {} at offset {offset}",
            self.config.path.display()
        );
        Ok(())
    }

    async fn stop(&self) -> Result<(), SourceError> {
        let mut runner = self.runner.lock().await;
        let Some(tasks) = runner.begin_stop() else {
            return Ok(());
        };

        let result = tasks
            .shutdown(&self.name(), self.config.shutdown_grace)
            .await;
        // Close the handle; the offset is kept for a later restart.
        self.state.lock().await.reader = None;
        info!("file tail stopped on {}", self.config.path.display());
        result
    }

    fn name(&self) -> String {
        format!("file:{}", self.config.path.display())
    }

    async fn lifecycle(&self) -> Lifecycle {
        self.runner.lock().await.lifecycle()
    }
}

struct TailLoop {
    source_tag: String,
    poll_interval: Duration,
    state: Arc<Mutex<TailState>>,
    out: RecordSender,
    cancel: CancellationToken,
}

impl TailLoop {
    async fn run(self) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if let Err(e) = self.read_available().await {
                debug!("file tail on {} ending: {e}", self.source_tag);
                break;
            }
        }
        debug!("file tail loop on {} exited", self.source_tag);
    }

    /// Emits every complete line currently in the file.
    async fn read_available(&self) -> Result<(), SendError> {
        let mut line = Vec::new();
        loop {
            line.clear();
            let record = {
                let mut state = self.state.lock().await;
                let TailState { offset, reader } = &mut *state;
                let Some(reader) = reader.as_mut() else {
                    return Ok(());
                };

                match reader.read_until(b'\n', &mut line).await {
                    Ok(0) => return Ok(()),
                    Ok(n) if line.ends_with(b"\n") => *offset += n as u64,
                    Ok(_) => {
                        // Partial line: leave it for a later poll.
                        self.rewind(reader, *offset).await;
                        return Ok(());
                    }
                    Err(e) => {
                        warn!("Error reading {}: {e}, retrying on next poll", self.source_tag);
                        self.rewind(reader, *offset).await;
                        return Ok(());
                    }
                }

                Record::new(
                    self.source_tag.as_str(),
                    String::from_utf8_lossy(&line).into_owned(),
                )
            };

            self.out.send(record, &self.cancel).await?;
        }
    }

    async fn rewind(&self, reader: &mut BufReader<File>, offset: u64) {
        if let Err(e) = reader.seek(SeekFrom::Start(offset)).await {
            warn!("Failed to seek {} back to offset {offset}: {e}", self.source_tag);
        }
    }
}
