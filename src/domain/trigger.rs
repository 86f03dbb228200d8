//! `Trigger`: the condition-gated link from an event to a workflow definition.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::ids::{TriggerId, WorkflowDefinitionId};

/// Closed trigger-kind taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    RegulatoryChange,
    Scheduled,
    Manual,
    ThresholdBreach,
    DeadlineApproaching,
    TaskCompletion,
    ApprovalRequired,
    ComplianceViolation,
    SystemEvent,
}

/// A typed predicate over the event payload. `task_types` scopes a
/// `TaskCompletion` condition: it only matches if the completed task's kind
/// is in `task_types` (empty = match any).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TriggerCondition {
    pub field_equals: Vec<(String, serde_json::Value)>,
    pub threshold_field: Option<String>,
    pub threshold_value: Option<f64>,
    pub task_types: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trigger {
    pub id: TriggerId,
    pub name: String,
    pub kind: TriggerKind,
    pub workflow_definition_id: WorkflowDefinitionId,
    pub condition: TriggerCondition,
    pub enabled: bool,
    pub priority: i32,
    pub cooldown: Duration,
    pub last_fired: Option<DateTime<Utc>>,
}

impl Trigger {
    /// Within `cooldown` after `last_fired` a trigger cannot fire again.
    pub fn in_cooldown(&self, now: DateTime<Utc>) -> bool {
        match self.last_fired {
            Some(last) => {
                let elapsed = now.signed_duration_since(last);
                elapsed
                    < chrono::Duration::from_std(self.cooldown).unwrap_or(chrono::Duration::zero())
            }
            None => false,
        }
    }
}
