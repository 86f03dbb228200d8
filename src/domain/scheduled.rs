//! `ScheduledTask` and `TaskExecution`: background work run on a timer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::ids::{ScheduledTaskId, TaskExecutionId};

/// The closed handler-kind registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduledTaskKind {
    RegulatoryMonitor,
    ComplianceCheck,
    DocumentAnalysis,
    RiskAssessment,
    NotificationCheck,
    Custom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduledTaskStatus {
    Scheduled,
    Running,
    Completed,
    Failed,
    Cancelled,
    Disabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriorityLevel {
    Low,
    Normal,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub id: ScheduledTaskId,
    pub name: String,
    pub kind: ScheduledTaskKind,
    pub payload: serde_json::Value,
    pub interval: Duration,
    pub priority: TaskPriorityLevel,
    pub status: ScheduledTaskStatus,
    pub failure_count: u32,
    pub max_failures: u32,
    pub timeout: Duration,
    pub retry_delay_base: Duration,
    pub enabled: bool,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
}

impl ScheduledTask {
    pub fn new(
        name: impl Into<String>,
        kind: ScheduledTaskKind,
        interval: Duration,
        max_failures: u32,
        timeout: Duration,
        retry_delay_base: Duration,
    ) -> Self {
        Self {
            id: ScheduledTaskId::new(),
            name: name.into(),
            kind,
            payload: serde_json::Value::Null,
            interval,
            priority: TaskPriorityLevel::Normal,
            status: ScheduledTaskStatus::Scheduled,
            failure_count: 0,
            max_failures,
            timeout,
            retry_delay_base,
            enabled: true,
            last_run: None,
            next_run: None,
        }
    }

    /// Retry backoff: `retry_delay_base * 2^min(failure_count-1, 4)`.
    pub fn next_retry_delay(&self) -> Duration {
        let exponent = self.failure_count.saturating_sub(1).min(4);
        self.retry_delay_base * 2u32.pow(exponent)
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.enabled
            && self.status != ScheduledTaskStatus::Running
            && self.next_run.map(|nr| now >= nr).unwrap_or(true)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskExecutionStatus {
    Completed,
    Failed,
}

/// Immutable record of a single scheduled-task run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskExecution {
    pub id: TaskExecutionId,
    pub task_id: ScheduledTaskId,
    pub status: TaskExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration: Duration,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
}
