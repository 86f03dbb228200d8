//! `TaskInstance` a.k.a. `ComplianceTask`: a human-facing unit of work
//! spawned from a workflow task or raised standalone.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ExecutionId, TaskDefinitionId, TaskInstanceId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskInstanceStatus {
    Draft,
    Assigned,
    InProgress,
    WaitingReview,
    WaitingApproval,
    Completed,
    Overdue,
    Cancelled,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    Medium,
    High,
    Critical,
}

impl TaskPriority {
    /// Priority propagated from an impact assessment's level.
    pub fn from_impact_level(level: crate::domain::ImpactLevel) -> Self {
        use crate::domain::ImpactLevel;
        match level {
            ImpactLevel::Critical => TaskPriority::Critical,
            ImpactLevel::High => TaskPriority::High,
            ImpactLevel::Medium => TaskPriority::Medium,
            ImpactLevel::Low | ImpactLevel::None => TaskPriority::Low,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assignment {
    pub assignee_id: String,
    pub kind: String,
    pub due_at: Option<DateTime<Utc>>,
    pub delegation_allowed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evidence {
    pub kind: String,
    pub reference: String,
    pub submitted_at: DateTime<Utc>,
    pub submitted_by: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comment {
    pub at: DateTime<Utc>,
    pub author: String,
    pub body: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRecord {
    pub approver: String,
    pub granted_at: DateTime<Utc>,
    /// Retained as an audit record even if the owning workflow is later
    /// cancelled: cancellation never revokes an approval already granted.
    pub retained_after_cancellation: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceTask {
    pub id: TaskInstanceId,
    pub workflow_execution_id: Option<ExecutionId>,
    pub workflow_task_id: Option<TaskDefinitionId>,
    pub parent: Option<TaskInstanceId>,
    pub subtasks: Vec<TaskInstanceId>,
    pub title: String,
    pub status: TaskInstanceStatus,
    pub priority: TaskPriority,
    pub assignment: Option<Assignment>,
    pub progress: u8,
    pub evidence: Vec<Evidence>,
    pub comments: Vec<Comment>,
    pub required_evidence: Vec<String>,
    pub required_approvals: usize,
    pub approvals: Vec<ApprovalRecord>,
    pub effort_estimate_hours: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ComplianceTask {
    /// Completion requires every required-evidence kind present.
    pub fn has_required_evidence(&self) -> bool {
        self.required_evidence
            .iter()
            .all(|kind| self.evidence.iter().any(|e| &e.kind == kind))
    }

    pub fn has_quorum(&self) -> bool {
        self.approvals.len() >= self.required_approvals
    }
}
