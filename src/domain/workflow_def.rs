//! `WorkflowDefinition` and `TaskDefinition`: the declarative shape of a
//! DAG-based compliance workflow.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

use crate::config::WorkflowSettings;
use crate::ids::{TaskDefinitionId, WorkflowDefinitionId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskKind {
    Manual,
    Automated,
    Approval,
    Condition,
    Notification,
    Review,
    RiskAssessment,
    ComplianceCheck,
    Filing,
}

/// The closed set of condition evaluators. `Custom` carries a registered
/// tag and is resolved through the engine's evaluator registry rather than
/// matched structurally.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConditionSpec {
    Always,
    Never,
    VariableEquals {
        key: String,
        value: serde_json::Value,
    },
    VariableGreaterThan {
        key: String,
        threshold: f64,
    },
    TaskCompleted {
        task_id: String,
    },
    ApprovalReceived {
        key: String,
    },
    DeadlineApproaching {
        deadline_var: String,
        warning_hours: i64,
    },
    Custom {
        tag: String,
        config: serde_json::Value,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalConfig {
    pub approvers: Vec<String>,
    pub quorum: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AutomationConfig {
    /// Key into the engine's automated-handler registry.
    pub handler: Option<String>,
    pub params: HashMap<String, serde_json::Value>,
}

/// A task node within a `WorkflowDefinition`. `id` is unique within the
/// definition and `prerequisites` must form a DAG.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDefinition {
    pub id: TaskDefinitionId,
    pub key: String,
    pub name: String,
    pub kind: TaskKind,
    pub prerequisites: BTreeSet<TaskDefinitionId>,
    pub condition: Option<ConditionSpec>,
    pub timeout_seconds: Option<u64>,
    pub approval_config: Option<ApprovalConfig>,
    pub automation_config: Option<AutomationConfig>,
    pub required_evidence: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowDefinitionStatus {
    Draft,
    Active,
    Deprecated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub id: WorkflowDefinitionId,
    pub name: String,
    pub version: u32,
    pub category: String,
    pub status: WorkflowDefinitionStatus,
    pub tasks: Vec<TaskDefinition>,
    pub default_variables: HashMap<String, serde_json::Value>,
    pub settings: WorkflowSettings,
}

impl WorkflowDefinition {
    pub fn task(&self, id: TaskDefinitionId) -> Option<&TaskDefinition> {
        self.tasks.iter().find(|t| t.id == id)
    }

    /// Verifies the prerequisite graph is acyclic. Used when a definition
    /// is first registered.
    pub fn prerequisite_graph_is_dag(&self) -> bool {
        let mut visiting = std::collections::HashSet::new();
        let mut visited = std::collections::HashSet::new();

        fn visit(
            def: &WorkflowDefinition,
            id: TaskDefinitionId,
            visiting: &mut std::collections::HashSet<TaskDefinitionId>,
            visited: &mut std::collections::HashSet<TaskDefinitionId>,
        ) -> bool {
            if visited.contains(&id) {
                return true;
            }
            if visiting.contains(&id) {
                return false;
            }
            visiting.insert(id);
            if let Some(t) = def.task(id) {
                for prereq in &t.prerequisites {
                    if !visit(def, *prereq, visiting, visited) {
                        return false;
                    }
                }
            }
            visiting.remove(&id);
            visited.insert(id);
            true
        }

        self.tasks
            .iter()
            .all(|t| visit(self, t.id, &mut visiting, &mut visited))
    }
}
