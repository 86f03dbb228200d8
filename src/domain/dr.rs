//! Disaster-recovery objectives, test results, and events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrObjective {
    pub component: String,
    pub rto: Duration,
    pub rpo: Duration,
    pub priority: u8,
    pub automated: bool,
    pub validation_checks: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrTestKind {
    BackupValidation,
    FailoverTest,
    RecoveryTest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentStatus {
    Healthy,
    Testing,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrTestResult {
    pub component: String,
    pub kind: DrTestKind,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub passed: bool,
    pub rto_achieved: Option<bool>,
    pub rpo_achieved: Option<bool>,
    pub validation: HashMap<String, bool>,
    pub errors: Vec<String>,
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrSeverity {
    Info,
    Warning,
    Critical,
}

/// A distinct DR event feed from `DrTestResult`, for alerts that outlive a
/// single test run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrEvent {
    pub id: uuid::Uuid,
    pub component: String,
    pub severity: DrSeverity,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolution_note: Option<String>,
}
