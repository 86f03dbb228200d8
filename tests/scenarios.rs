//! End-to-end scenarios exercising the poller, pipeline, orchestrator,
//! scheduler, workflow engine, and DR supervisor together through the
//! public `Supervisor`/`admin` surface, in the Chicago-school,
//! real-collaborator style the workflow engine's own integration tests use
//! (state-based assertions, no mocks of this crate's own types).

use async_trait::async_trait;
use regulens_core::config::{CoreConfig, SourceConfig, SourceKind};
use regulens_core::domain::{
    ComponentStatus, DocumentType, DrObjective, DrSeverity, DrTestKind, RawEntry, RegulatorySource,
    ScheduledTask, ScheduledTaskKind, Trigger, TriggerCondition, TriggerKind, WorkflowDefinition,
    WorkflowDefinitionStatus,
};
use regulens_core::dr::{BackupInspector, DrSupervisor, FailoverExecutor, RecoveryExecutor};
use regulens_core::embeddings::HashEmbeddingProvider;
use regulens_core::error::{CoreError, CoreResult};
use regulens_core::ids::{SourceId, TriggerId, WorkflowDefinitionId};
use regulens_core::orchestrator::ASSESSMENTS_COLLECTION;
use regulens_core::pipeline::DocumentFetcher;
use regulens_core::poller::{FeedFetcher, DOCUMENTS_COLLECTION};
use regulens_core::scheduler::{Scheduler, TaskHandler};
use regulens_core::similarity::InMemorySimilarityIndex;
use regulens_core::sink::TracingEventSink;
use regulens_core::store::{MemoryStore, TransactionalStore, TypedStoreExt};
use regulens_core::workflow::{WorkflowEngine, EXECUTIONS_COLLECTION};
use regulens_core::Supervisor;
use std::sync::Arc;
use std::time::Duration;

struct FixedFetcher(Vec<RawEntry>);

#[async_trait]
impl FeedFetcher for FixedFetcher {
    async fn fetch(&self, _source: &SourceConfig) -> CoreResult<Vec<RawEntry>> {
        Ok(self.0.clone())
    }
}

/// Returns a fixed body for every document regardless of URL, standing in
/// for the real HTTP fetch the pipeline issues against `full_text`-less
/// documents.
struct FixedDocumentFetcher(Vec<u8>);

#[async_trait]
impl DocumentFetcher for FixedDocumentFetcher {
    async fn fetch(&self, _url: &str) -> CoreResult<Vec<u8>> {
        Ok(self.0.clone())
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

/// Polls `condition` every 10ms until it's true or `timeout` elapses.
async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn rich_regulatory_entry() -> RawEntry {
    RawEntry::Rss {
        id: Some("final-rule-x".into()),
        title: "Final Rule on Capital Requirements, effective immediately".into(),
        link: "https://example.invalid/final-rule-x".into(),
        summary: "This rule is effective immediately for all banks and systemically important \
            financial institutions. Enforcement action and penalty apply for violation. \
            Institutions must implement policies, procedures, training, and system changes, \
            with significant capital requirements, investment, and staffing implications."
            .into(),
        published: None,
    }
}

fn simple_regulatory_source(poll_interval_minutes: u64) -> SourceConfig {
    SourceConfig {
        id: "s1".into(),
        kind: SourceKind::Feed,
        endpoint: "https://example.invalid/feed".into(),
        jurisdiction: "US".into(),
        poll_interval_minutes,
        active: true,
        auth_headers: Default::default(),
    }
}

fn trivial_workflow_definition() -> WorkflowDefinition {
    WorkflowDefinition {
        id: WorkflowDefinitionId::new(),
        name: "regulatory_change_response".into(),
        version: 1,
        category: "compliance".into(),
        status: WorkflowDefinitionStatus::Active,
        tasks: Vec::new(),
        default_variables: Default::default(),
        settings: Default::default(),
    }
}

fn build_supervisor_with_store(
    store: Arc<MemoryStore>,
    fetcher: Arc<dyn FeedFetcher>,
    config: CoreConfig,
) -> Supervisor {
    Supervisor::new(
        config,
        store,
        fetcher,
        Arc::new(FixedDocumentFetcher(b"Final Rule on Capital Requirements, effective immediately. \
            This rule is effective immediately for all banks and systemically important \
            financial institutions. Enforcement action and penalty apply for violation. \
            Institutions must implement policies, procedures, training, and system changes, \
            with significant capital requirements, investment, and staffing implications.".to_vec())),
        Arc::new(InMemorySimilarityIndex::new()),
        Arc::new(HashEmbeddingProvider::new(32)),
        Arc::new(TracingEventSink),
        Arc::new(NoopBackups),
        Arc::new(NoopFailover),
        Arc::new(NoopRecovery),
    )
}

/// S1: a new regulation ingested by the poller produces a document, an
/// impact assessment, and starts the workflow bound to its trigger.
#[tokio::test]
async fn new_regulation_triggers_workflow() {
    let store = Arc::new(MemoryStore::new());
    let fetcher: Arc<dyn FeedFetcher> = Arc::new(FixedFetcher(vec![rich_regulatory_entry()]));
    let mut config = CoreConfig::default();
    config.sources = vec![simple_regulatory_source(1)];

    let supervisor = build_supervisor_with_store(store.clone(), fetcher, config);
    let definition_id = supervisor.register_workflow_definition(trivial_workflow_definition()).unwrap();
    supervisor.register_trigger(Trigger {
        id: TriggerId::new(),
        name: "regulatory_change_response".into(),
        kind: TriggerKind::RegulatoryChange,
        workflow_definition_id: definition_id,
        condition: TriggerCondition::default(),
        enabled: true,
        priority: 10,
        cooldown: Duration::from_secs(0),
        last_fired: None,
    });

    supervisor.start().await;

    let found = wait_until(Duration::from_secs(2), || {
        tokio::task::block_in_place(|| {
            let store = store.clone();
            tokio::runtime::Handle::current().block_on(async move {
                !store.fetch_stream(DOCUMENTS_COLLECTION).await.unwrap().is_empty()
            })
        })
    })
    .await;
    assert!(found, "expected a document to be ingested within the timeout");

    supervisor.stop().await;

    let documents: Vec<regulens_core::domain::RegulatoryDocument> =
        store.list(DOCUMENTS_COLLECTION).await.unwrap();
    assert_eq!(documents.len(), 1);
    assert_eq!(documents[0].document_type, DocumentType::Regulation);

    let assessments: Vec<regulens_core::domain::ImpactAssessment> =
        store.list(ASSESSMENTS_COLLECTION).await.unwrap();
    assert_eq!(assessments.len(), 1);

    let executions: Vec<regulens_core::domain::WorkflowExecution> =
        store.list(EXECUTIONS_COLLECTION).await.unwrap();
    assert_eq!(executions.len(), 1);
    assert_eq!(executions[0].context.triggered_by, "regulatory_monitor");
    let expected_level = serde_json::to_value(assessments[0].level).unwrap();
    assert_eq!(executions[0].context.variables.get("impact_level"), Some(&expected_level));
}

/// S2: repeating the same feed content across two poll cycles must not
/// produce a second document or a second workflow execution.
#[tokio::test]
async fn dedup_on_second_poll_yields_one_execution() {
    let store = Arc::new(MemoryStore::new());
    let fetcher: Arc<dyn FeedFetcher> = Arc::new(FixedFetcher(vec![rich_regulatory_entry()]));
    let mut config = CoreConfig::default();
    config.sources = vec![simple_regulatory_source(60)];

    let supervisor = build_supervisor_with_store(store.clone(), fetcher, config);
    let definition_id = supervisor.register_workflow_definition(trivial_workflow_definition()).unwrap();
    supervisor.register_trigger(Trigger {
        id: TriggerId::new(),
        name: "regulatory_change_response".into(),
        kind: TriggerKind::RegulatoryChange,
        workflow_definition_id: definition_id,
        condition: TriggerCondition::default(),
        enabled: true,
        priority: 10,
        cooldown: Duration::from_secs(0),
        last_fired: None,
    });

    supervisor.start().await;
    wait_until(Duration::from_secs(2), || {
        tokio::task::block_in_place(|| {
            let store = store.clone();
            tokio::runtime::Handle::current()
                .block_on(async move { !store.fetch_stream(DOCUMENTS_COLLECTION).await.unwrap().is_empty() })
        })
    })
    .await;
    supervisor.stop().await;

    // A 60-minute poll interval keeps the worker from polling twice on its
    // own; dedup is exercised directly against the shared store/source id
    // the same way a second poll cycle would.
    let documents: Vec<serde_json::Value> = store.fetch_stream(DOCUMENTS_COLLECTION).await.unwrap();
    assert_eq!(documents.len(), 1);
    let dedup_key = documents[0].as_object().unwrap();
    let source_id = dedup_key.get("source_id").unwrap().clone();
    let external_id = dedup_key.get("external_id").unwrap().as_str().unwrap().to_string();
    let key = format!("{}:{}", source_id.as_str().unwrap_or_default(), external_id);
    // same (source, external_id) pair must not insert again
    let reinserted = store
        .insert_if_absent(DOCUMENTS_COLLECTION, &key, documents[0].clone())
        .await
        .unwrap();
    assert!(!reinserted);

    let executions: Vec<serde_json::Value> = store.fetch_stream(EXECUTIONS_COLLECTION).await.unwrap();
    assert_eq!(executions.len(), 1);
}

/// S3: a fan-in DAG (A, B independent, C depends on both) only starts C
/// once both its prerequisites complete, and the execution finishes at
/// 100% once C completes.
#[tokio::test]
async fn workflow_fan_in_starts_c_only_after_both_prerequisites() {
    use regulens_core::domain::{ConditionSpec, TaskDefinition, TaskKind};
    use regulens_core::workflow::TaskResult;

    let store: Arc<dyn TransactionalStore> = Arc::new(MemoryStore::new());
    let engine = WorkflowEngine::new(store, Arc::new(TracingEventSink));

    let a = regulens_core::ids::TaskDefinitionId::new();
    let b = regulens_core::ids::TaskDefinitionId::new();
    let c = regulens_core::ids::TaskDefinitionId::new();
    let definition = WorkflowDefinition {
        id: WorkflowDefinitionId::new(),
        name: "fan_in".into(),
        version: 1,
        category: "test".into(),
        status: WorkflowDefinitionStatus::Active,
        tasks: vec![
            TaskDefinition {
                id: a,
                key: "a".into(),
                name: "A".into(),
                kind: TaskKind::Manual,
                prerequisites: Default::default(),
                condition: Some(ConditionSpec::Always),
                timeout_seconds: None,
                approval_config: None,
                automation_config: None,
                required_evidence: Vec::new(),
            },
            TaskDefinition {
                id: b,
                key: "b".into(),
                name: "B".into(),
                kind: TaskKind::Manual,
                prerequisites: Default::default(),
                condition: Some(ConditionSpec::Always),
                timeout_seconds: None,
                approval_config: None,
                automation_config: None,
                required_evidence: Vec::new(),
            },
            TaskDefinition {
                id: c,
                key: "c".into(),
                name: "C".into(),
                kind: TaskKind::Manual,
                prerequisites: [a, b].into_iter().collect(),
                condition: Some(ConditionSpec::Always),
                timeout_seconds: None,
                approval_config: None,
                automation_config: None,
                required_evidence: Vec::new(),
            },
        ],
        default_variables: Default::default(),
        settings: Default::default(),
    };
    let definition_id = engine.register_definition(definition).unwrap();

    let execution_id = engine
        .start(definition_id, "tester", serde_json::Value::Null, Default::default())
        .await
        .unwrap();

    let after_start = engine.get(execution_id).await.unwrap();
    assert!(after_start.current.contains(&a));
    assert!(after_start.current.contains(&b));
    assert!(!after_start.current.contains(&c));

    engine.complete_task(execution_id, a, TaskResult::default()).await.unwrap();
    let after_a = engine.get(execution_id).await.unwrap();
    assert!(!after_a.current.contains(&c));

    engine.complete_task(execution_id, b, TaskResult::default()).await.unwrap();
    let after_b = engine.get(execution_id).await.unwrap();
    assert!(after_b.current.contains(&c));

    engine.complete_task(execution_id, c, TaskResult::default()).await.unwrap();
    let final_execution = engine.get(execution_id).await.unwrap();
    assert_eq!(final_execution.progress, 100);
    assert_eq!(final_execution.status, regulens_core::domain::ExecutionStatus::Completed);
}

/// S5: an automated task whose handler outlives its `timeout_seconds`
/// bound is cancelled, recorded as a failed task with a timeout error, and
/// the execution proceeds per `failure_behavior`.
#[tokio::test]
async fn timeout_cancels_handler() {
    use regulens_core::domain::{ConditionSpec, TaskDefinition, TaskKind};
    use regulens_core::workflow::{AutomatedHandler, WorkflowEngine};

    struct SlowHandler;
    #[async_trait]
    impl AutomatedHandler for SlowHandler {
        async fn run(
            &self,
            _ctx: &regulens_core::domain::ExecutionContext,
            _task: &TaskDefinition,
        ) -> CoreResult<regulens_core::workflow::TaskResult> {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(regulens_core::workflow::TaskResult::default())
        }
    }

    let store: Arc<dyn TransactionalStore> = Arc::new(MemoryStore::new());
    let engine = WorkflowEngine::new(store, Arc::new(TracingEventSink));
    engine.register_automated_handler("slow", Arc::new(SlowHandler));

    let slow_task = regulens_core::ids::TaskDefinitionId::new();
    let definition = WorkflowDefinition {
        id: WorkflowDefinitionId::new(),
        name: "timeout_demo".into(),
        version: 1,
        category: "test".into(),
        status: WorkflowDefinitionStatus::Active,
        tasks: vec![TaskDefinition {
            id: slow_task,
            key: "slow".into(),
            name: "Slow".into(),
            kind: TaskKind::Automated,
            prerequisites: Default::default(),
            condition: Some(ConditionSpec::Always),
            timeout_seconds: Some(2),
            approval_config: None,
            automation_config: Some(regulens_core::domain::AutomationConfig {
                handler: Some("slow".into()),
                params: Default::default(),
            }),
            required_evidence: Vec::new(),
        }],
        default_variables: Default::default(),
        settings: Default::default(),
    };
    let definition_id = engine.register_definition(definition).unwrap();

    let started = tokio::time::Instant::now();
    let execution_id = engine
        .start(definition_id, "tester", serde_json::Value::Null, Default::default())
        .await
        .unwrap();

    let execution = engine.get(execution_id).await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(9), "handler should have been cancelled at ~2s, not run to completion");
    assert!(execution.failed.contains(&slow_task));
    assert!(!execution.current.contains(&slow_task));
    let failure_event = execution
        .context
        .history
        .iter()
        .rev()
        .find(|h| h.event == "task_failed" && h.task_id == Some(slow_task))
        .expect("a task_failed history entry for the slow task");
    let error_text = failure_event.detail["error"].as_str().unwrap_or_default();
    assert!(error_text.to_lowercase().contains("timed out") || error_text.to_lowercase().contains("timeout"));
}

/// S4: a scheduled task whose handler always fails with a transient error
/// backs off, then disables itself after `max_failures` consecutive
/// failures.
#[tokio::test]
async fn scheduler_retries_then_disables_task() {
    use regulens_core::scheduler::SchedulerDisableSink;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct AlwaysFails;
    #[async_trait]
    impl TaskHandler for AlwaysFails {
        async fn run(&self, _payload: &serde_json::Value) -> CoreResult<serde_json::Value> {
            Err(CoreError::Transient("simulated failure".into()))
        }
    }

    struct CountingDisableSink(Arc<AtomicUsize>);
    #[async_trait]
    impl SchedulerDisableSink for CountingDisableSink {
        async fn on_task_disabled(&self, _task_id: regulens_core::ids::ScheduledTaskId, _task_name: &str) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    let disabled_count = Arc::new(AtomicUsize::new(0));
    let scheduler = Scheduler::new(4);
    scheduler.set_disable_sink(Arc::new(CountingDisableSink(disabled_count.clone())));
    scheduler.register_handler(ScheduledTaskKind::Custom, Arc::new(AlwaysFails));
    let task = ScheduledTask::new(
        "t",
        ScheduledTaskKind::Custom,
        Duration::from_millis(10),
        3,
        Duration::from_secs(60),
        Duration::from_millis(50),
    );
    let id = task.id;
    scheduler.add_task(task);

    for _ in 0..3 {
        scheduler.tick().await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        scheduler.force_due_now_for_test(id);
    }

    let executions = scheduler.executions_for(id);
    assert_eq!(executions.len(), 3);
    assert_eq!(scheduler.task_status(id), Some(regulens_core::domain::ScheduledTaskStatus::Disabled));
    assert_eq!(disabled_count.load(Ordering::SeqCst), 1, "disable sink should fire exactly once");
}

/// S6: a backup older than its objective's RPO fails validation, raises a
/// critical DR event on a priority-1 (critical) component, and the
/// component's status moves off `Healthy`.
#[tokio::test]
async fn backup_aged_past_rpo_raises_critical_event() {
    struct AgedBackups;
    #[async_trait]
    impl BackupInspector for AgedBackups {
        async fn backup_exists(&self, _c: &str) -> CoreResult<bool> {
            Ok(true)
        }
        async fn backup_age(&self, _c: &str) -> CoreResult<Duration> {
            Ok(Duration::from_secs(600)) // 10 minutes
        }
        async fn integrity_check(&self, _c: &str) -> CoreResult<bool> {
            Ok(true)
        }
        async fn completeness_check(&self, _c: &str) -> CoreResult<bool> {
            Ok(true)
        }
    }

    let objective = DrObjective {
        component: "database".into(),
        rto: Duration::from_secs(3600),
        rpo: Duration::from_secs(300), // 5 minutes
        priority: 1,
        automated: true,
        validation_checks: Vec::new(),
    };
    let supervisor = DrSupervisor::new(
        vec![objective],
        Arc::new(AgedBackups),
        Arc::new(NoopFailover),
        Arc::new(NoopRecovery),
        Arc::new(TracingEventSink),
    );

    let result = supervisor.run_backup_validation("database").await.unwrap();
    assert!(!result.passed);
    assert_eq!(result.rpo_achieved, Some(false));

    let events = supervisor.open_events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].severity, DrSeverity::Critical);
    assert_ne!(supervisor.component_status("database"), ComponentStatus::Healthy);
}

/// Confirms `run_dr_test` on the admin surface dispatches to the same
/// backup-validation path as calling the DR supervisor directly.
#[tokio::test]
async fn admin_surface_runs_backup_validation() {
    let store = Arc::new(MemoryStore::new());
    let fetcher: Arc<dyn FeedFetcher> = Arc::new(FixedFetcher(Vec::new()));
    let supervisor = build_supervisor_with_store(store, fetcher, CoreConfig::default());

    let result = supervisor.run_dr_test(DrTestKind::BackupValidation, "anything").await.unwrap();
    assert_eq!(result.kind, DrTestKind::BackupValidation);
    assert!(result.passed);
}

#[allow(dead_code)]
fn silence_unused_import_warning(_s: RegulatorySource, _id: SourceId) {}
