//! `WorkflowExecution` and its append-only history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::ids::{ExecutionId, TaskDefinitionId, WorkflowDefinitionId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Draft,
    Active,
    Paused,
    Completed,
    Failed,
    Cancelled,
    Expired,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed
                | ExecutionStatus::Failed
                | ExecutionStatus::Cancelled
                | ExecutionStatus::Expired
        )
    }
}

/// One append-only row in an execution's history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub at: DateTime<Utc>,
    pub event: String,
    pub task_id: Option<TaskDefinitionId>,
    pub detail: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub variables: HashMap<String, serde_json::Value>,
    pub triggered_by: String,
    pub trigger_payload: serde_json::Value,
    pub history: Vec<HistoryEntry>,
}

impl ExecutionContext {
    pub fn record(&mut self, event: impl Into<String>, task_id: Option<TaskDefinitionId>, detail: serde_json::Value) {
        self.history.push(HistoryEntry {
            at: Utc::now(),
            event: event.into(),
            task_id,
            detail,
        });
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub id: ExecutionId,
    pub definition_id: WorkflowDefinitionId,
    pub status: ExecutionStatus,
    pub context: ExecutionContext,
    pub current: HashSet<TaskDefinitionId>,
    pub completed: HashSet<TaskDefinitionId>,
    pub failed: HashSet<TaskDefinitionId>,
    pub progress: u8,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkflowExecution {
    /// A task id appears in at most one of the three sets.
    pub fn sets_are_disjoint(&self) -> bool {
        self.current.is_disjoint(&self.completed)
            && self.current.is_disjoint(&self.failed)
            && self.completed.is_disjoint(&self.failed)
    }

    pub fn recompute_progress(&mut self, total_tasks: usize) {
        self.progress = if total_tasks == 0 {
            100
        } else {
            ((self.completed.len() as f64 / total_tasks as f64) * 100.0).round() as u8
        };
    }
}
