//! Background task orchestration
//!
//! Approved write sets run as background tasks. Each task applies its
//! operations one at a time through a [`NetworkWriter`], recording per-item
//! failures without stopping. Callers poll snapshots by id or subscribe to
//! the event channel.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{broadcast, RwLock, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::wapi::ClientError;
use crate::config::TaskConfig;
use crate::models::{
    ItemFailure, TaskEvent, TaskId, TaskSnapshot, TaskStatus, TaskSummary, WriteOperation,
    WriteSet,
};

/// Applies a single write to the authority
#[async_trait]
pub trait NetworkWriter: Send + Sync {
    async fn apply(&self, operation: &WriteOperation) -> Result<(), ClientError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    #[error("Task {0} not found")]
    NotFound(TaskId),

    #[error("Task {0} has already finished")]
    AlreadyFinished(TaskId),

    #[error("Task orchestrator is shutting down")]
    ShuttingDown,
}

/// Per-submission overrides
#[derive(Debug, Clone, Copy, Default)]
pub struct SubmitOptions {
    /// Overall deadline, counted from when the task starts running
    pub timeout: Option<Duration>,
}

struct TaskRecord {
    snapshot: TaskSnapshot,
    cancel: CancellationToken,
    finished: Option<Instant>,
}

struct Inner {
    writer: Arc<dyn NetworkWriter>,
    tasks: RwLock<HashMap<TaskId, TaskRecord>>,
    workers: Arc<Semaphore>,
    events: broadcast::Sender<TaskEvent>,
    shutdown: CancellationToken,
    retention: Duration,
    unreachable_threshold: u32,
    default_timeout: Option<Duration>,
}

/// Runs write sets in the background and tracks their progress
#[derive(Clone)]
pub struct TaskOrchestrator {
    inner: Arc<Inner>,
}

impl TaskOrchestrator {
    pub fn new(writer: Arc<dyn NetworkWriter>, config: &TaskConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_buffer.max(1));
        Self {
            inner: Arc::new(Inner {
                writer,
                tasks: RwLock::new(HashMap::new()),
                workers: Arc::new(Semaphore::new(config.max_concurrent_tasks.max(1))),
                events,
                shutdown: CancellationToken::new(),
                retention: Duration::from_secs(config.retention_secs),
                unreachable_threshold: config.unreachable_threshold.max(1),
                default_timeout: config.default_timeout_secs.map(Duration::from_secs),
            }),
        }
    }

    /// Queue a write set; it starts once a worker slot is free
    pub async fn submit(
        &self,
        write_set: WriteSet,
        options: SubmitOptions,
    ) -> Result<TaskId, TaskError> {
        if self.inner.shutdown.is_cancelled() {
            return Err(TaskError::ShuttingDown);
        }

        let id = Uuid::new_v4();
        let total = write_set.len();
        let cancel = self.inner.shutdown.child_token();
        let record = TaskRecord {
            snapshot: TaskSnapshot {
                id,
                total,
                current: 0,
                submitted_at: Utc::now(),
                started_at: None,
                finished_at: None,
                status: TaskStatus::Pending { total },
            },
            cancel: cancel.clone(),
            finished: None,
        };
        self.inner.tasks.write().await.insert(id, record);

        info!(task_id = %id, total, "Task submitted");

        let timeout = options.timeout.or(self.inner.default_timeout);
        let inner = self.inner.clone();
        tokio::spawn(async move {
            inner.run(id, write_set.operations, cancel, timeout).await;
        });

        Ok(id)
    }

    /// Current snapshot of a task
    pub async fn status(&self, id: TaskId) -> Result<TaskSnapshot, TaskError> {
        let mut tasks = self.inner.tasks.write().await;
        match tasks.get(&id) {
            Some(record) if self.inner.is_expired(record) => {
                tasks.remove(&id);
                Err(TaskError::NotFound(id))
            }
            Some(record) => Ok(record.snapshot.clone()),
            None => Err(TaskError::NotFound(id)),
        }
    }

    /// Stop issuing further writes for a task; writes already made stay
    pub async fn cancel(&self, id: TaskId) -> Result<TaskSnapshot, TaskError> {
        let tasks = self.inner.tasks.read().await;
        let record = tasks.get(&id).ok_or(TaskError::NotFound(id))?;
        if record.snapshot.status.is_terminal() {
            return Err(TaskError::AlreadyFinished(id));
        }
        record.cancel.cancel();
        info!(task_id = %id, "Task cancellation requested");
        Ok(record.snapshot.clone())
    }

    /// Retained tasks, most recently submitted first
    pub async fn list(&self) -> Vec<TaskSnapshot> {
        let tasks = self.inner.tasks.read().await;
        let mut snapshots: Vec<TaskSnapshot> = tasks
            .values()
            .filter(|record| !self.inner.is_expired(record))
            .map(|record| record.snapshot.clone())
            .collect();
        snapshots.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at));
        snapshots
    }

    /// Receive events for every task from now on
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.inner.events.subscribe()
    }

    /// Drop finished tasks older than the retention window
    pub async fn evict_expired(&self) -> usize {
        let mut tasks = self.inner.tasks.write().await;
        let before = tasks.len();
        tasks.retain(|_, record| !self.inner.is_expired(record));
        before - tasks.len()
    }

    /// Refuse new submissions and cancel everything in progress
    pub fn shutdown(&self) {
        info!("Shutting down task orchestrator");
        self.inner.shutdown.cancel();
    }
}

impl Inner {
    fn is_expired(&self, record: &TaskRecord) -> bool {
        record
            .finished
            .is_some_and(|finished| finished.elapsed() > self.retention)
    }

    fn emit(&self, event: TaskEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    async fn update<F>(&self, id: TaskId, f: F)
    where
        F: FnOnce(&mut TaskSnapshot),
    {
        if let Some(record) = self.tasks.write().await.get_mut(&id) {
            f(&mut record.snapshot);
        }
    }

    async fn finish(&self, id: TaskId, status: TaskStatus, current: usize) {
        if let Some(record) = self.tasks.write().await.get_mut(&id) {
            record.snapshot.current = current;
            record.snapshot.finished_at = Some(Utc::now());
            record.snapshot.status = status.clone();
            record.finished = Some(Instant::now());
        }
        match &status {
            TaskStatus::Failed { error, .. } => warn!(task_id = %id, error = %error, "Task failed"),
            _ => info!(task_id = %id, "Task finished"),
        }
        self.emit(TaskEvent::Finished {
            task_id: id,
            status,
        });
    }

    async fn run(
        &self,
        id: TaskId,
        operations: Vec<WriteOperation>,
        cancel: CancellationToken,
        timeout: Option<Duration>,
    ) {
        let total = operations.len();

        let _permit = tokio::select! {
            permit = self.workers.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => {
                    self.finish(id, failed("worker pool closed", 0, total, TaskSummary::default()), 0).await;
                    return;
                }
            },
            _ = cancel.cancelled() => {
                self.finish(id, failed("cancelled before start", 0, total, TaskSummary::default()), 0).await;
                return;
            }
        };

        let deadline = timeout.map(|t| tokio::time::Instant::now() + t);
        self.update(id, |snapshot| {
            snapshot.started_at = Some(Utc::now());
            snapshot.status = TaskStatus::Running { current: 0, total };
        })
        .await;
        self.emit(TaskEvent::Started { task_id: id, total });
        debug!(task_id = %id, total, "Task started");

        let mut summary = TaskSummary::default();
        let mut consecutive_unreachable = 0u32;

        for (index, operation) in operations.iter().enumerate() {
            if cancel.is_cancelled() {
                let error = format!("cancelled after {} of {} operations", index, total);
                self.finish(id, failed(error, index, total, summary), index).await;
                return;
            }

            if deadline.is_some_and(|d| tokio::time::Instant::now() >= d) {
                self.time_out(id, &operations, index, summary).await;
                return;
            }

            // An issued write always runs to completion; the deadline only
            // applies to operations not yet started
            let outcome = self.writer.apply(operation).await;

            let failure = match outcome {
                Ok(()) => {
                    consecutive_unreachable = 0;
                    summary.record_success(operation.kind());
                    None
                }
                Err(err) => {
                    if err.is_unreachable() {
                        consecutive_unreachable += 1;
                    } else {
                        consecutive_unreachable = 0;
                    }
                    let failure = ItemFailure {
                        index,
                        cidr: operation.cidr().to_string(),
                        operation: operation.kind(),
                        cause: err.to_string(),
                    };
                    warn!(task_id = %id, index, cidr = %failure.cidr, cause = %failure.cause, "Write failed");
                    summary.record_failure(failure.clone());
                    Some(failure)
                }
            };

            let current = index + 1;
            self.update(id, |snapshot| {
                snapshot.current = current;
                snapshot.status = TaskStatus::Running { current, total };
            })
            .await;
            self.emit(TaskEvent::Progress {
                task_id: id,
                current,
                total,
                failure,
            });

            if consecutive_unreachable >= self.unreachable_threshold {
                let error = format!(
                    "authority unreachable after {} consecutive failures",
                    consecutive_unreachable
                );
                self.finish(id, failed(error, current, total, summary), current).await;
                return;
            }
        }

        self.finish(id, TaskStatus::Succeeded(summary), total).await;
    }

    /// Fail every operation from `from` onward and close the task
    async fn time_out(
        &self,
        id: TaskId,
        operations: &[WriteOperation],
        from: usize,
        mut summary: TaskSummary,
    ) {
        warn!(task_id = %id, remaining = operations.len() - from, "Task deadline exceeded");
        for (index, operation) in operations.iter().enumerate().skip(from) {
            summary.record_failure(ItemFailure {
                index,
                cidr: operation.cidr().to_string(),
                operation: operation.kind(),
                cause: "task timed out".to_string(),
            });
        }
        let total = operations.len();
        self.finish(id, TaskStatus::Succeeded(summary), total).await;
    }
}

fn failed(error: impl Into<String>, current: usize, total: usize, completed: TaskSummary) -> TaskStatus {
    TaskStatus::Failed {
        error: error.into(),
        current,
        total,
        completed,
    }
}

/// Periodically evicts finished tasks past their retention window
pub struct TaskRetentionJob {
    orchestrator: TaskOrchestrator,
    interval: Duration,
}

impl TaskRetentionJob {
    pub fn new(orchestrator: TaskOrchestrator, interval: Duration) -> Self {
        Self {
            orchestrator,
            interval: interval.max(Duration::from_secs(1)),
        }
    }

    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            info!("Starting task retention job");
            let mut ticker = tokio::time::interval(self.interval);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let evicted = self.orchestrator.evict_expired().await;
                if evicted > 0 {
                    debug!(evicted, "Evicted finished tasks");
                }
            }
        })
    }
}
