//! The admin surface: a typed operations table rather than a wire protocol.
//! Every operation here is a thin, logged pass-through onto the subsystem
//! that actually owns the behavior — this module's job is only to give the
//! whole table one place to be discovered and called from.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

use crate::domain::dr::{DrTestKind, DrTestResult};
use crate::domain::{Trigger, WorkflowDefinition};
use crate::error::{CoreError, CoreResult};
use crate::ids::{ExecutionId, TaskDefinitionId, WorkflowDefinitionId};
use crate::orchestrator::Event;
use crate::supervisor::Supervisor;
use crate::workflow::TaskResult;

/// Snapshot returned by `dr_status`.
#[derive(Debug, Clone, Serialize)]
pub struct DrStatusSummary {
    pub health_score: f64,
    pub open_event_count: usize,
    pub recent_results: Vec<DrTestResult>,
}

/// Snapshot returned by `apm_summary`.
#[derive(Debug, Clone, Serialize)]
pub struct ApmSummary {
    pub recent_resource_samples: Vec<crate::apm::ResourceSample>,
    pub slow_query_count: usize,
}

impl Supervisor {
    /// Starts a new workflow execution from a registered definition.
    pub async fn start_workflow(
        &self,
        definition_id: WorkflowDefinitionId,
        triggered_by: impl Into<String>,
        trigger_payload: serde_json::Value,
        initial_vars: HashMap<String, serde_json::Value>,
    ) -> CoreResult<ExecutionId> {
        self.engine
            .start(definition_id, triggered_by, trigger_payload, initial_vars)
            .await
    }

    pub async fn complete_task(
        &self,
        execution_id: ExecutionId,
        task_id: TaskDefinitionId,
        result: TaskResult,
    ) -> CoreResult<()> {
        self.engine.complete_task(execution_id, task_id, result).await
    }

    pub async fn fail_task(&self, execution_id: ExecutionId, task_id: TaskDefinitionId, error: String) -> CoreResult<()> {
        self.engine.fail_task(execution_id, task_id, error).await
    }

    pub async fn cancel_workflow(&self, execution_id: ExecutionId, reason: impl Into<String>) -> CoreResult<()> {
        self.engine.cancel(execution_id, reason).await
    }

    pub async fn pause_workflow(&self, execution_id: ExecutionId) -> CoreResult<()> {
        self.engine.pause(execution_id).await
    }

    pub async fn resume_workflow(&self, execution_id: ExecutionId) -> CoreResult<()> {
        self.engine.resume(execution_id).await
    }

    /// Routes an event through every trigger currently registered, starting
    /// whichever workflows match.
    pub async fn emit_event(&self, event: Event) -> CoreResult<Vec<ExecutionId>> {
        self.orchestrator.handle_event(event).await
    }

    pub fn register_workflow_definition(&self, definition: WorkflowDefinition) -> CoreResult<WorkflowDefinitionId> {
        self.engine.register_definition(definition)
    }

    pub fn register_trigger(&self, trigger: Trigger) {
        self.orchestrator.register_trigger(trigger)
    }

    /// Runs one DR probe on demand, outside its regular schedule.
    pub async fn run_dr_test(&self, kind: DrTestKind, component: &str) -> CoreResult<DrTestResult> {
        match kind {
            DrTestKind::BackupValidation => self.dr.run_backup_validation(component).await,
            DrTestKind::FailoverTest => self.dr.run_failover_test(component, true).await,
            DrTestKind::RecoveryTest => Err(CoreError::Validation(
                "recovery_test requires a backup timestamp; call the DR supervisor directly".into(),
            )),
        }
    }

    pub fn dr_status(&self) -> DrStatusSummary {
        DrStatusSummary {
            health_score: self.dr.health_score(),
            open_event_count: self.dr.open_events().len(),
            recent_results: self.dr.recent_results(20),
        }
    }

    pub fn apm_summary(&self) -> ApmSummary {
        ApmSummary {
            recent_resource_samples: self.apm.resources.recent(),
            slow_query_count: self.apm.db.slow_query_log().len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoreConfig;
    use crate::dr::{BackupInspector, FailoverExecutor, RecoveryExecutor};
    use crate::embeddings::HashEmbeddingProvider;
    use crate::poller::FeedFetcher;
    use crate::similarity::InMemorySimilarityIndex;
    use crate::sink::TracingEventSink;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::time::Duration;

    struct EmptyFetcher;
    #[async_trait]
    impl FeedFetcher for EmptyFetcher {
        async fn fetch(&self, _source: &crate::config::SourceConfig) -> CoreResult<Vec<crate::domain::RawEntry>> {
            Ok(Vec::new())
        }
    }

    struct EmptyDocumentFetcher;
    #[async_trait]
    impl crate::pipeline::DocumentFetcher for EmptyDocumentFetcher {
        async fn fetch(&self, _url: &str) -> CoreResult<Vec<u8>> {
            Ok(Vec::new())
        }
    }

    struct NoopBackups;
    #[async_trait]
    impl BackupInspector for NoopBackups {
        async fn backup_exists(&self, _c: &str) -> CoreResult<bool> {
            Ok(true)
        }
        async fn backup_age(&self, _c: &str) -> CoreResult<Duration> {
            Ok(Duration::from_secs(1))
        }
        async fn integrity_check(&self, _c: &str) -> CoreResult<bool> {
            Ok(true)
        }
        async fn completeness_check(&self, _c: &str) -> CoreResult<bool> {
            Ok(true)
        }
    }

    struct NoopFailover;
    #[async_trait]
    impl FailoverExecutor for NoopFailover {
        async fn pre_checks(&self, _c: &str) -> CoreResult<bool> {
            Ok(true)
        }
        async fn execute(&self, _c: &str, _dry_run: bool) -> CoreResult<Duration> {
            Ok(Duration::from_secs(1))
        }
        async fn post_checks(&self, _c: &str) -> CoreResult<bool> {
            Ok(true)
        }
    }

    struct NoopRecovery;
    #[async_trait]
    impl RecoveryExecutor for NoopRecovery {
        async fn execute(&self, _c: &str, backup_timestamp: chrono::DateTime<chrono::Utc>, _dry_run: bool) -> CoreResult<chrono::DateTime<chrono::Utc>> {
            Ok(backup_timestamp)
        }
        async fn data_integrity_check(&self, _c: &str) -> CoreResult<bool> {
            Ok(true)
        }
    }

    fn build_supervisor() -> Supervisor {
        Supervisor::new(
            CoreConfig::default(),
            Arc::new(MemoryStore::new()),
            Arc::new(EmptyFetcher),
            Arc::new(EmptyDocumentFetcher),
            Arc::new(InMemorySimilarityIndex::new()),
            Arc::new(HashEmbeddingProvider::new(16)),
            Arc::new(TracingEventSink),
            Arc::new(NoopBackups),
            Arc::new(NoopFailover),
            Arc::new(NoopRecovery),
        )
    }

    #[tokio::test]
    async fn dr_status_reflects_supervisor_state() {
        let supervisor = build_supervisor();
        let status = supervisor.dr_status();
        assert_eq!(status.open_event_count, 0);
    }

    #[tokio::test]
    async fn unregistered_definition_start_fails() {
        let supervisor = build_supervisor();
        let result = supervisor
            .start_workflow(WorkflowDefinitionId::new(), "admin", serde_json::Value::Null, HashMap::new())
            .await;
        assert!(result.is_err());
    }
}
