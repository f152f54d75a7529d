// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The lifecycle contract every producer implements.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::errors::SourceError;
use crate::queue::RecordSender;

#[async_trait]
pub trait Source: Send + Sync {
    /// Performs setup (open the file, bind the socket) and spawns the background producer.
    ///
    /// Returns once setup succeeded; any setup failure is returned before background work
    /// begins. Fails with [`SourceError::AlreadyRunning`] without side effects while running.
    async fn start(&self, cancel: CancellationToken, out: RecordSender)
        -> Result<(), SourceError>;

    /// Stops the background producer, releases held resources and waits until every task of
    /// this source has ended, bounded by the source's grace period. Idempotent.
    async fn stop(&self) -> Result<(), SourceError>;

    /// Stable, human readable origin of this source, e.g. `syslog:udp@0.0.0.0:514`.
    fn name(&self) -> String;

    async fn lifecycle(&self) -> Lifecycle;
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    #[default]
    NotStarted,
    Running,
    Stopped,
}

/// Background tasks of one running source, sharing a child of the caller's token.
#[derive(Debug)]
pub struct TaskGroup {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl TaskGroup {
    pub fn new(parent: &CancellationToken) -> Self {
        Self {
            cancel: parent.child_token(),
            tasks: Vec::new(),
        }
    }

    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn spawn<F>(&mut self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks.push(tokio::spawn(task));
    }

    /// Cancels the group and waits for every task until `grace` elapses. Tasks still alive
    /// at the deadline are aborted and reported as a shutdown timeout.
    pub async fn shutdown(self, name: &str, grace: Duration) -> Result<(), SourceError> {
        self.cancel.cancel();
        let deadline = Instant::now() + grace;
        let mut timed_out = false;

        for mut task in self.tasks {
            match timeout_at(deadline, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) if e.is_panic() => error!("{name}: background task panicked: {e:?}"),
                Ok(Err(_)) => {}
                Err(_) => {
                    warn!("{name}: background task still running after {grace:?}, aborting");
                    task.abort();
                    timed_out = true;
                }
            }
        }

        if timed_out {
            return Err(SourceError::ShutdownTimeout {
                name: name.to_string(),
                grace,
            });
        }
        debug!("{name}: all background tasks finished");
        Ok(())
    }
}

/// Lifecycle flag plus the tasks of the current run. Each source keeps one behind a lock.
#[derive(Debug, Default)]
pub struct Runner {
    lifecycle: Lifecycle,
    tasks: Option<TaskGroup>,
}

impl Runner {
    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    pub fn ensure_startable(&self, name: &str) -> Result<(), SourceError> {
        if self.lifecycle == Lifecycle::Running {
            return Err(SourceError::AlreadyRunning(name.to_string()));
        }
        Ok(())
    }

    pub fn set_running(&mut self, tasks: TaskGroup) {
        self.lifecycle = Lifecycle::Running;
        self.tasks = Some(tasks);
    }

    /// Marks the source stopped and hands out the tasks to wait for. `None` when the source
    /// was not running, so cleanup happens exactly once.
    pub fn begin_stop(&mut self) -> Option<TaskGroup> {
        if self.lifecycle != Lifecycle::Running {
            return None;
        }
        self.lifecycle = Lifecycle::Stopped;
        self.tasks.take()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_shutdown_waits_for_tasks() {
        let parent = CancellationToken::new();
        let mut group = TaskGroup::new(&parent);
        let finished = Arc::new(AtomicBool::new(false));

        let token = group.token();
        let flag = Arc::clone(&finished);
        group.spawn(async move {
            token.cancelled().await;
            tokio::time::sleep(Duration::from_millis(20)).await;
            flag.store(true, Ordering::SeqCst);
        });

        group
            .shutdown("test", Duration::from_secs(1))
            .await
            .unwrap();
        assert!(finished.load(Ordering::SeqCst));
        assert!(!parent.is_cancelled(), "parent token must not be cancelled");
    }

    #[tokio::test]
    async fn test_shutdown_times_out_on_stuck_task() {
        let mut group = TaskGroup::new(&CancellationToken::new());
        group.spawn(std::future::pending());

        let err = group
            .shutdown("stuck", Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::ShutdownTimeout { ref name, .. } if name == "stuck"));
    }

    #[tokio::test]
    async fn test_parent_cancellation_reaches_group() {
        let parent = CancellationToken::new();
        let group = TaskGroup::new(&parent);
        parent.cancel();
        assert!(group.token().is_cancelled());
    }

    #[test]
    fn test_runner_transitions() {
        let mut runner = Runner::default();
        assert_eq!(runner.lifecycle(), Lifecycle::NotStarted);
        assert!(runner.begin_stop().is_none());
        assert_eq!(runner.lifecycle(), Lifecycle::NotStarted);

        runner.ensure_startable("x").unwrap();
        runner.set_running(TaskGroup::new(&CancellationToken::new()));
        assert!(matches!(
            runner.ensure_startable("x"),
            Err(SourceError::AlreadyRunning(_))
        ));

        assert!(runner.begin_stop().is_some());
        assert_eq!(runner.lifecycle(), Lifecycle::Stopped);
        assert!(runner.begin_stop().is_none());
        runner.ensure_startable("x").unwrap();
    }
}
