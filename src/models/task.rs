//! Write sets and background task state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use super::{Cidr, ClassificationResult};

pub type TaskId = Uuid;

/// Kind of write, used in failure reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Create,
    Update,
}

/// One approved change to the authority
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum WriteOperation {
    Create {
        cidr: Cidr,
        network_view: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        comment: Option<String>,
        attributes: BTreeMap<String, String>,
    },
    Update {
        cidr: Cidr,
        reference: String,
        /// Attributes to set; others on the network are left untouched
        attributes: BTreeMap<String, String>,
    },
}

impl WriteOperation {
    pub fn kind(&self) -> OperationKind {
        match self {
            WriteOperation::Create { .. } => OperationKind::Create,
            WriteOperation::Update { .. } => OperationKind::Update,
        }
    }

    pub fn cidr(&self) -> Cidr {
        match self {
            WriteOperation::Create { cidr, .. } | WriteOperation::Update { cidr, .. } => *cidr,
        }
    }
}

/// Which parts of a classification become writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyOptions {
    #[serde(default = "default_true")]
    pub create_new: bool,
    #[serde(default = "default_true")]
    pub update_conflicting: bool,
}

fn default_true() -> bool {
    true
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            create_new: true,
            update_conflicting: true,
        }
    }
}

/// Ordered writes derived from a classification
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WriteSet {
    pub operations: Vec<WriteOperation>,
}

impl WriteSet {
    pub fn new(operations: Vec<WriteOperation>) -> Self {
        Self { operations }
    }

    /// New records become creates, conflicting records become updates.
    ///
    /// A conflicting record found only in another view is created in the
    /// requested view. Unchanged records produce no write.
    pub fn from_classification(result: &ClassificationResult, options: ApplyOptions) -> Self {
        let mut operations = Vec::new();

        if options.create_new {
            operations.extend(result.new.iter().map(|projected| WriteOperation::Create {
                cidr: projected.record.cidr,
                network_view: result.network_view.clone(),
                comment: projected.record.name.clone(),
                attributes: projected.attributes.clone(),
            }));
        }

        if options.update_conflicting {
            for conflict in &result.existing_conflicting {
                let operation = match &conflict.authority_ref {
                    Some(reference) => WriteOperation::Update {
                        cidr: conflict.record.cidr,
                        reference: reference.clone(),
                        attributes: conflict
                            .differences
                            .iter()
                            .map(|d| (d.attribute.clone(), d.incoming_value.clone()))
                            .collect(),
                    },
                    None => WriteOperation::Create {
                        cidr: conflict.record.cidr,
                        network_view: result.network_view.clone(),
                        comment: conflict.record.name.clone(),
                        attributes: conflict.attributes.clone(),
                    },
                };
                operations.push(operation);
            }
        }

        Self { operations }
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

/// Lifecycle state of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Succeeded | TaskState::Failed)
    }
}

/// A write that could not be applied
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemFailure {
    /// Zero-based position in the write set
    pub index: usize,
    pub cidr: String,
    pub operation: OperationKind,
    pub cause: String,
}

/// Outcome counters of a task
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TaskSummary {
    pub created: usize,
    pub updated: usize,
    pub failed: usize,
    pub errors: Vec<ItemFailure>,
}

impl TaskSummary {
    pub fn record_success(&mut self, kind: OperationKind) {
        match kind {
            OperationKind::Create => self.created += 1,
            OperationKind::Update => self.updated += 1,
        }
    }

    pub fn record_failure(&mut self, failure: ItemFailure) {
        self.failed += 1;
        self.errors.push(failure);
    }
}

/// Externally visible task status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state")]
pub enum TaskStatus {
    Pending {
        total: usize,
    },
    Running {
        current: usize,
        total: usize,
    },
    Succeeded(TaskSummary),
    Failed {
        error: String,
        current: usize,
        total: usize,
        completed: TaskSummary,
    },
}

impl TaskStatus {
    pub fn state(&self) -> TaskState {
        match self {
            TaskStatus::Pending { .. } => TaskState::Pending,
            TaskStatus::Running { .. } => TaskState::Running,
            TaskStatus::Succeeded(_) => TaskState::Succeeded,
            TaskStatus::Failed { .. } => TaskState::Failed,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }
}

/// Point-in-time copy of a task for callers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub id: TaskId,
    pub total: usize,
    pub current: usize,
    pub submitted_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub status: TaskStatus,
}

/// Progress notification published while tasks run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TaskEvent {
    Started {
        task_id: TaskId,
        total: usize,
    },
    Progress {
        task_id: TaskId,
        current: usize,
        total: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        failure: Option<ItemFailure>,
    },
    Finished {
        task_id: TaskId,
        status: TaskStatus,
    },
}

impl TaskEvent {
    pub fn task_id(&self) -> TaskId {
        match self {
            TaskEvent::Started { task_id, .. }
            | TaskEvent::Progress { task_id, .. }
            | TaskEvent::Finished { task_id, .. } => *task_id,
        }
    }
}
