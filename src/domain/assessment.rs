//! `ImpactAssessment`: the scored impact of an ingested regulatory document.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{AssessmentId, DocumentId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImpactLevel {
    None,
    Low,
    Medium,
    High,
    Critical,
}

impl ImpactLevel {
    /// Score-to-band thresholds.
    pub fn from_score(score: f64) -> Self {
        if score >= 0.8 {
            ImpactLevel::Critical
        } else if score >= 0.6 {
            ImpactLevel::High
        } else if score >= 0.4 {
            ImpactLevel::Medium
        } else if score >= 0.2 {
            ImpactLevel::Low
        } else {
            ImpactLevel::None
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarDocument {
    pub document_id: DocumentId,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImpactAssessment {
    pub id: AssessmentId,
    pub document_id: DocumentId,
    pub level: ImpactLevel,
    pub score: f64,
    pub affected_business_units: Vec<String>,
    pub affected_systems: Vec<String>,
    pub affected_processes: Vec<String>,
    pub required_actions: Vec<String>,
    pub risk_factors: Vec<String>,
    pub mitigation_strategies: Vec<String>,
    pub confidence: f64,
    pub compliance_deadline: Option<DateTime<Utc>>,
    pub similar_regulations: Vec<SimilarDocument>,
    pub rationale: String,
    pub created_at: DateTime<Utc>,
    /// `true` once superseded by a later assessment of the same document.
    pub superseded: bool,
}
