//! Disaster-recovery probing: scheduled backup/failover/recovery tests
//! against configured objectives, a component health score, and
//! auto-resolution of stale critical events.
//!
//! Grounded in the teacher's `observability/health.rs` status-registry
//! shape (`HealthChecker`/`ComponentHealth`/worst-status rollup),
//! generalized from a manually-updated registry into one driven by
//! scheduled probes against [`DrObjective`](crate::domain::dr::DrObjective).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::concurrency::CancelToken;
use crate::domain::dr::{ComponentStatus, DrEvent, DrObjective, DrSeverity, DrTestKind, DrTestResult};
use crate::error::CoreResult;
use crate::sink::{EventSink, NotificationPayload, NotificationSeverity};

/// Inspects backup state for a component. The only collaborator this
/// module cannot implement itself, since "a backup" is storage-specific.
#[async_trait]
pub trait BackupInspector: Send + Sync {
    async fn backup_exists(&self, component: &str) -> CoreResult<bool>;
    async fn backup_age(&self, component: &str) -> CoreResult<Duration>;
    async fn integrity_check(&self, component: &str) -> CoreResult<bool>;
    async fn completeness_check(&self, component: &str) -> CoreResult<bool>;
}

/// Drives an actual (or drilled) failover.
#[async_trait]
pub trait FailoverExecutor: Send + Sync {
    async fn pre_checks(&self, component: &str) -> CoreResult<bool>;
    /// Returns the wall-clock time the failover took.
    async fn execute(&self, component: &str, dry_run: bool) -> CoreResult<Duration>;
    async fn post_checks(&self, component: &str) -> CoreResult<bool>;
}

/// Drives an actual (or drilled) recovery from a backup.
#[async_trait]
pub trait RecoveryExecutor: Send + Sync {
    /// Returns the timestamp recovery completed at.
    async fn execute(&self, component: &str, backup_timestamp: DateTime<Utc>, dry_run: bool) -> CoreResult<DateTime<Utc>>;
    async fn data_integrity_check(&self, component: &str) -> CoreResult<bool>;
}

fn base_score(status: ComponentStatus) -> f64 {
    match status {
        ComponentStatus::Healthy => 100.0,
        ComponentStatus::Testing => 85.0,
        ComponentStatus::Warning => 70.0,
        ComponentStatus::Critical => 0.0,
    }
}

fn staleness_multiplier(last_tested: Option<DateTime<Utc>>, now: DateTime<Utc>) -> f64 {
    match last_tested {
        None => 0.3,
        Some(t) => {
            let days = now.signed_duration_since(t).num_days();
            if days > 30 {
                0.5
            } else if days > 7 {
                0.8
            } else {
                1.0
            }
        }
    }
}

/// Components at priority 1 or 2 are treated as critical for event
/// severity and 30-minute backup-validation scheduling.
fn is_critical(objective: &DrObjective) -> bool {
    objective.priority <= 2
}

const STALE_EVENT_AGE: chrono::Duration = chrono::Duration::hours(24);

pub struct DrSupervisor {
    objectives: Vec<DrObjective>,
    backups: Arc<dyn BackupInspector>,
    failover: Arc<dyn FailoverExecutor>,
    recovery: Arc<dyn RecoveryExecutor>,
    sink: Arc<dyn EventSink>,
    results: RwLock<Vec<DrTestResult>>,
    events: RwLock<Vec<DrEvent>>,
    component_status: DashMap<String, ComponentStatus>,
    last_tested: DashMap<String, DateTime<Utc>>,
}

impl DrSupervisor {
    pub fn new(
        objectives: Vec<DrObjective>,
        backups: Arc<dyn BackupInspector>,
        failover: Arc<dyn FailoverExecutor>,
        recovery: Arc<dyn RecoveryExecutor>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            objectives,
            backups,
            failover,
            recovery,
            sink,
            results: RwLock::new(Vec::new()),
            events: RwLock::new(Vec::new()),
            component_status: DashMap::new(),
            last_tested: DashMap::new(),
        }
    }

    fn objective(&self, component: &str) -> Option<&DrObjective> {
        self.objectives.iter().find(|o| o.component == component)
    }

    fn record_result(&self, result: DrTestResult) {
        self.component_status.insert(
            result.component.clone(),
            if result.passed { ComponentStatus::Healthy } else { ComponentStatus::Warning },
        );
        self.last_tested.insert(result.component.clone(), result.ended_at);
        self.results.write().push(result);
    }

    /// Raises a `warning` DR event for a scheduled task the scheduler just
    /// auto-disabled after exhausting its retries (§4.3, S4). The scheduler
    /// has no concept of DR severities; this is the seam `Supervisor` wires
    /// `SchedulerDisableSink` through.
    pub async fn raise_scheduler_disabled_event(&self, task_name: &str) {
        self.raise_event(
            "scheduler",
            DrSeverity::Warning,
            format!("scheduled task `{task_name}` auto-disabled after exhausting max_failures"),
        )
        .await;
    }

    async fn raise_event(&self, component: &str, severity: DrSeverity, message: String) {
        if severity == DrSeverity::Critical {
            self.component_status.insert(component.to_string(), ComponentStatus::Critical);
        }
        let event = DrEvent {
            id: Uuid::new_v4(),
            component: component.to_string(),
            severity,
            message: message.clone(),
            created_at: Utc::now(),
            resolved_at: None,
            resolution_note: None,
        };
        self.events.write().push(event);
        let notify_severity = match severity {
            DrSeverity::Info => NotificationSeverity::Info,
            DrSeverity::Warning => NotificationSeverity::Warning,
            DrSeverity::Critical => NotificationSeverity::Critical,
        };
        let _ = self
            .sink
            .send(NotificationPayload {
                kind: "dr_event".to_string(),
                severity: notify_severity,
                subject: format!("DR: {component}"),
                body: message,
                tags: vec![component.to_string()],
                dedup_key: format!("dr:{component}"),
            })
            .await;
    }

    pub async fn run_backup_validation(&self, component: &str) -> CoreResult<DrTestResult> {
        let objective = self.objective(component).cloned();
        let started_at = Utc::now();
        let exists = self.backups.backup_exists(component).await?;
        let age = self.backups.backup_age(component).await?;
        let integrity = self.backups.integrity_check(component).await?;
        let completeness = self.backups.completeness_check(component).await?;
        let rpo_ok = objective.as_ref().map(|o| age <= o.rpo).unwrap_or(true);

        let mut validation = HashMap::new();
        validation.insert("backup_exists".to_string(), exists);
        validation.insert("rpo".to_string(), rpo_ok);
        validation.insert("integrity".to_string(), integrity);
        validation.insert("completeness".to_string(), completeness);

        let passed = exists && rpo_ok && integrity && completeness;
        let mut errors = Vec::new();
        if !exists {
            errors.push("no backup found".to_string());
        }
        if !rpo_ok {
            errors.push(format!("backup age {age:?} exceeds RPO"));
        }
        if !integrity {
            errors.push("integrity check failed".to_string());
        }
        if !completeness {
            errors.push("completeness check failed".to_string());
        }

        let result = DrTestResult {
            component: component.to_string(),
            kind: DrTestKind::BackupValidation,
            started_at,
            ended_at: Utc::now(),
            passed,
            rto_achieved: None,
            rpo_achieved: Some(rpo_ok),
            validation,
            errors: errors.clone(),
            recommendations: Vec::new(),
        };

        if !passed {
            let critical = objective.as_ref().map(is_critical).unwrap_or(false);
            let severity = if critical { DrSeverity::Critical } else { DrSeverity::Warning };
            self.raise_event(component, severity, format!("backup validation failed: {}", errors.join("; "))).await;
        }

        self.record_result(result.clone());
        Ok(result)
    }

    pub async fn run_failover_test(&self, component: &str, dry_run: bool) -> CoreResult<DrTestResult> {
        let objective = self.objective(component).cloned();
        let started_at = Utc::now();
        let pre = self.failover.pre_checks(component).await?;
        let elapsed = self.failover.execute(component, dry_run).await?;
        let post = self.failover.post_checks(component).await?;

        let rto_ok = objective.as_ref().map(|o| elapsed <= o.rto).unwrap_or(true);
        let passed = pre && post && rto_ok;

        let mut validation = HashMap::new();
        validation.insert("pre_checks".to_string(), pre);
        validation.insert("post_checks".to_string(), post);
        validation.insert("rto".to_string(), rto_ok);

        let mut errors = Vec::new();
        if !pre {
            errors.push("pre-checks failed".to_string());
        }
        if !post {
            errors.push("post-checks failed".to_string());
        }
        if !rto_ok {
            errors.push(format!("failover took {elapsed:?}, exceeding RTO"));
        }

        let result = DrTestResult {
            component: component.to_string(),
            kind: DrTestKind::FailoverTest,
            started_at,
            ended_at: Utc::now(),
            passed,
            rto_achieved: Some(rto_ok),
            rpo_achieved: None,
            validation,
            errors: errors.clone(),
            recommendations: Vec::new(),
        };

        if !passed {
            let critical = objective.as_ref().map(is_critical).unwrap_or(false);
            let severity = if critical { DrSeverity::Critical } else { DrSeverity::Warning };
            self.raise_event(component, severity, format!("failover test failed: {}", errors.join("; "))).await;
        }

        self.record_result(result.clone());
        Ok(result)
    }

    pub async fn run_recovery_test(
        &self,
        component: &str,
        backup_timestamp: DateTime<Utc>,
        dry_run: bool,
    ) -> CoreResult<DrTestResult> {
        let objective = self.objective(component).cloned();
        let started_at = Utc::now();
        let recovered_at = self.recovery.execute(component, backup_timestamp, dry_run).await?;
        let integrity = self.recovery.data_integrity_check(component).await?;

        let rpo = recovered_at.signed_duration_since(backup_timestamp);
        let rpo_duration = rpo.to_std().unwrap_or(Duration::MAX);
        let rpo_ok = objective.as_ref().map(|o| rpo_duration <= o.rpo).unwrap_or(true);
        let rto_duration = recovered_at.signed_duration_since(started_at).to_std().unwrap_or(Duration::MAX);
        let rto_ok = objective.as_ref().map(|o| rto_duration <= o.rto).unwrap_or(true);

        let passed = integrity && rpo_ok && rto_ok;

        let mut validation = HashMap::new();
        validation.insert("data_integrity".to_string(), integrity);
        validation.insert("rpo".to_string(), rpo_ok);
        validation.insert("rto".to_string(), rto_ok);

        let mut errors = Vec::new();
        if !integrity {
            errors.push("recovered data failed integrity check".to_string());
        }
        if !rpo_ok {
            errors.push("recovery point exceeded RPO".to_string());
        }
        if !rto_ok {
            errors.push("recovery time exceeded RTO".to_string());
        }

        let result = DrTestResult {
            component: component.to_string(),
            kind: DrTestKind::RecoveryTest,
            started_at,
            ended_at: Utc::now(),
            passed,
            rto_achieved: Some(rto_ok),
            rpo_achieved: Some(rpo_ok),
            validation,
            errors: errors.clone(),
            recommendations: Vec::new(),
        };

        if !passed {
            let critical = objective.as_ref().map(is_critical).unwrap_or(false);
            let severity = if critical { DrSeverity::Critical } else { DrSeverity::Warning };
            self.raise_event(component, severity, format!("recovery test failed: {}", errors.join("; "))).await;
        }

        self.record_result(result.clone());
        Ok(result)
    }

    /// Weighted average of per-component scores. Weight is `6 - priority`
    /// (priority 1 is heaviest); score is a status-based base multiplied by
    /// a staleness factor.
    pub fn health_score(&self) -> f64 {
        if self.objectives.is_empty() {
            return 100.0;
        }
        let now = Utc::now();
        let mut weighted_sum = 0.0;
        let mut weight_total = 0.0;
        for objective in &self.objectives {
            let status = self
                .component_status
                .get(&objective.component)
                .map(|s| *s)
                .unwrap_or(ComponentStatus::Healthy);
            let last = self.last_tested.get(&objective.component).map(|t| *t);
            let score = base_score(status) * staleness_multiplier(last, now);
            let weight = (6i32 - objective.priority as i32).max(1) as f64;
            weighted_sum += score * weight;
            weight_total += weight;
        }
        weighted_sum / weight_total
    }

    pub fn component_status(&self, component: &str) -> ComponentStatus {
        self.component_status.get(component).map(|s| *s).unwrap_or(ComponentStatus::Healthy)
    }

    pub fn recent_results(&self, limit: usize) -> Vec<DrTestResult> {
        let results = self.results.read();
        results.iter().rev().take(limit).cloned().collect()
    }

    pub fn open_events(&self) -> Vec<DrEvent> {
        self.events.read().iter().filter(|e| e.resolved_at.is_none()).cloned().collect()
    }

    /// Closes any open critical event older than 24h whose component has
    /// since returned to a healthy status.
    pub fn auto_resolve_stale_critical_events(&self) {
        let now = Utc::now();
        let mut events = self.events.write();
        for event in events.iter_mut() {
            if event.severity != DrSeverity::Critical || event.resolved_at.is_some() {
                continue;
            }
            if now.signed_duration_since(event.created_at) <= STALE_EVENT_AGE {
                continue;
            }
            let status = self.component_status.get(&event.component).map(|s| *s).unwrap_or(ComponentStatus::Healthy);
            if status == ComponentStatus::Healthy {
                event.resolved_at = Some(now);
                event.resolution_note = Some("returned to healthy".to_string());
            }
        }
    }

    /// One dispatcher loop per process: periodic backup validation for
    /// critical components plus stale-event auto-resolution, until
    /// cancelled.
    pub async fn run(&self, period: Duration, cancel: CancelToken) {
        let critical_components: Vec<String> = self
            .objectives
            .iter()
            .filter(|o| is_critical(o))
            .map(|o| o.component.clone())
            .collect();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(period) => {
                    for component in &critical_components {
                        if let Err(err) = self.run_backup_validation(component).await {
                            tracing::warn!(component, error = %err, "backup validation probe failed");
                        }
                    }
                    self.auto_resolve_stale_critical_events();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::TracingEventSink;

    struct FakeBackups {
        exists: bool,
        age: Duration,
        integrity: bool,
        completeness: bool,
    }

    #[async_trait]
    impl BackupInspector for FakeBackups {
        async fn backup_exists(&self, _component: &str) -> CoreResult<bool> {
            Ok(self.exists)
        }
        async fn backup_age(&self, _component: &str) -> CoreResult<Duration> {
            Ok(self.age)
        }
        async fn integrity_check(&self, _component: &str) -> CoreResult<bool> {
            Ok(self.integrity)
        }
        async fn completeness_check(&self, _component: &str) -> CoreResult<bool> {
            Ok(self.completeness)
        }
    }

    struct FakeFailover;

    #[async_trait]
    impl FailoverExecutor for FakeFailover {
        async fn pre_checks(&self, _component: &str) -> CoreResult<bool> {
            Ok(true)
        }
        async fn execute(&self, _component: &str, _dry_run: bool) -> CoreResult<Duration> {
            Ok(Duration::from_secs(30))
        }
        async fn post_checks(&self, _component: &str) -> CoreResult<bool> {
            Ok(true)
        }
    }

    struct FakeRecovery;

    #[async_trait]
    impl RecoveryExecutor for FakeRecovery {
        async fn execute(&self, _component: &str, backup_timestamp: DateTime<Utc>, _dry_run: bool) -> CoreResult<DateTime<Utc>> {
            Ok(backup_timestamp + chrono::Duration::minutes(1))
        }
        async fn data_integrity_check(&self, _component: &str) -> CoreResult<bool> {
            Ok(true)
        }
    }

    fn objective(component: &str, priority: u8) -> DrObjective {
        DrObjective {
            component: component.to_string(),
            rto: Duration::from_secs(3600),
            rpo: Duration::from_secs(900),
            priority,
            automated: true,
            validation_checks: Vec::new(),
        }
    }

    #[tokio::test]
    async fn failed_backup_on_critical_component_raises_critical_event() {
        let supervisor = DrSupervisor::new(
            vec![objective("ledger-db", 1)],
            Arc::new(FakeBackups { exists: false, age: Duration::from_secs(0), integrity: false, completeness: false }),
            Arc::new(FakeFailover),
            Arc::new(FakeRecovery),
            Arc::new(TracingEventSink),
        );
        let result = supervisor.run_backup_validation("ledger-db").await.unwrap();
        assert!(!result.passed);
        let events = supervisor.open_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].severity, DrSeverity::Critical);
    }

    #[tokio::test]
    async fn passing_validation_keeps_component_healthy() {
        let supervisor = DrSupervisor::new(
            vec![objective("ledger-db", 1)],
            Arc::new(FakeBackups { exists: true, age: Duration::from_secs(60), integrity: true, completeness: true }),
            Arc::new(FakeFailover),
            Arc::new(FakeRecovery),
            Arc::new(TracingEventSink),
        );
        supervisor.run_backup_validation("ledger-db").await.unwrap();
        assert_eq!(supervisor.component_status("ledger-db"), ComponentStatus::Healthy);
        assert!((supervisor.health_score() - 100.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn stale_critical_event_auto_resolves_when_healthy() {
        let supervisor = DrSupervisor::new(
            vec![objective("ledger-db", 1)],
            Arc::new(FakeBackups { exists: true, age: Duration::from_secs(60), integrity: true, completeness: true }),
            Arc::new(FakeFailover),
            Arc::new(FakeRecovery),
            Arc::new(TracingEventSink),
        );
        supervisor.raise_event("ledger-db", DrSeverity::Critical, "manual incident".to_string()).await;
        {
            let mut events = supervisor.events.write();
            events[0].created_at = Utc::now() - chrono::Duration::hours(25);
        }
        supervisor.component_status.insert("ledger-db".to_string(), ComponentStatus::Healthy);
        supervisor.auto_resolve_stale_critical_events();
        assert!(supervisor.open_events().is_empty());
    }

    #[tokio::test]
    async fn failover_within_rto_passes() {
        let supervisor = DrSupervisor::new(
            vec![objective("api-gateway", 3)],
            Arc::new(FakeBackups { exists: true, age: Duration::from_secs(1), integrity: true, completeness: true }),
            Arc::new(FakeFailover),
            Arc::new(FakeRecovery),
            Arc::new(TracingEventSink),
        );
        let result = supervisor.run_failover_test("api-gateway", true).await.unwrap();
        assert!(result.passed);
        assert_eq!(result.rto_achieved, Some(true));
    }

    fn idle_supervisor(objectives: Vec<DrObjective>) -> DrSupervisor {
        DrSupervisor::new(
            objectives,
            Arc::new(FakeBackups { exists: true, age: Duration::from_secs(1), integrity: true, completeness: true }),
            Arc::new(FakeFailover),
            Arc::new(FakeRecovery),
            Arc::new(TracingEventSink),
        )
    }

    proptest::proptest! {
        /// P10: the health score is always within [0, 100] regardless of
        /// how many components are configured or what priority they carry.
        #[test]
        fn prop_health_score_bounded(priorities in proptest::collection::vec(1u8..=5, 1..8)) {
            let objectives: Vec<DrObjective> = priorities
                .iter()
                .enumerate()
                .map(|(i, p)| objective(&format!("component-{i}"), *p))
                .collect();
            let supervisor = idle_supervisor(objectives);
            let score = supervisor.health_score();
            proptest::prop_assert!(score >= 0.0 && score <= 100.0);
        }
    }
}
