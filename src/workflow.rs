//! DAG executor over named workflow definitions.
//!
//! Computes ready tasks from prerequisites and conditions, dispatches each
//! by kind, and tracks completion/failure per execution. Per-execution
//! mutation is serialized through a `dashmap`-sharded lock, so independent
//! executions still progress concurrently.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use lru::LruCache;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::num::NonZeroUsize;
use std::sync::Arc;

use crate::config::FailureBehavior;
use crate::domain::{
    ApprovalRecord, ComplianceTask, ConditionSpec, Evidence, ExecutionContext, ExecutionStatus,
    TaskDefinition, TaskInstanceStatus, TaskKind, TaskPriority, WorkflowDefinition,
    WorkflowDefinitionStatus, WorkflowExecution,
};
use crate::error::{CoreError, CoreResult};
use crate::ids::{ExecutionId, TaskDefinitionId, TaskInstanceId, WorkflowDefinitionId};
use crate::sink::{EventSink, NotificationPayload, NotificationSeverity};
use crate::store::{TransactionalStore, TypedStoreExt};

pub const EXECUTIONS_COLLECTION: &str = "workflow_executions";
pub const DEFINITIONS_COLLECTION: &str = "workflow_definitions";
pub const COMPLIANCE_TASKS_COLLECTION: &str = "compliance_tasks";

/// Outcome of completing or failing a task, fed back into the engine.
#[derive(Debug, Clone, Default)]
pub struct TaskResult {
    pub variables: HashMap<String, serde_json::Value>,
}

/// Registered handler for `automated` and domain task kinds (`review`,
/// `risk-assessment`, `compliance-check`, `filing`).
#[async_trait]
pub trait AutomatedHandler: Send + Sync {
    async fn run(
        &self,
        context: &ExecutionContext,
        task: &TaskDefinition,
    ) -> CoreResult<TaskResult>;
}

/// A custom condition evaluator, registered by tag. Implementations must be
/// pure functions of `(context, config)`.
pub trait ConditionEvaluator: Send + Sync {
    fn evaluate(&self, context: &ExecutionContext, config: &serde_json::Value) -> bool;
}

/// Evaluates the closed set of condition evaluators plus any registered
/// custom tags.
pub fn evaluate_condition(
    spec: &ConditionSpec,
    context: &ExecutionContext,
    completed: &HashSet<TaskDefinitionId>,
    definition: &WorkflowDefinition,
    custom: &HashMap<String, Arc<dyn ConditionEvaluator>>,
) -> bool {
    match spec {
        ConditionSpec::Always => true,
        ConditionSpec::Never => false,
        ConditionSpec::VariableEquals { key, value } => {
            context.variables.get(key) == Some(value)
        }
        ConditionSpec::VariableGreaterThan { key, threshold } => context
            .variables
            .get(key)
            .and_then(|v| v.as_f64())
            .map(|v| v > *threshold)
            .unwrap_or(false),
        ConditionSpec::TaskCompleted { task_id } => definition
            .tasks
            .iter()
            .find(|t| &t.key == task_id)
            .map(|t| completed.contains(&t.id))
            .unwrap_or(false),
        ConditionSpec::ApprovalReceived { key } => context
            .variables
            .get(key)
            .and_then(|v| v.as_bool())
            .unwrap_or(false),
        ConditionSpec::DeadlineApproaching {
            deadline_var,
            warning_hours,
        } => context
            .variables
            .get(deadline_var)
            .and_then(|v| v.as_str())
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
            .map(|deadline| {
                let hours_left = deadline
                    .with_timezone(&Utc)
                    .signed_duration_since(Utc::now())
                    .num_hours();
                hours_left <= *warning_hours
            })
            .unwrap_or(false),
        ConditionSpec::Custom { tag, config } => custom
            .get(tag)
            .map(|evaluator| evaluator.evaluate(context, config))
            .unwrap_or(false),
    }
}

/// Process-wide, resumable DAG executor over `WorkflowDefinition`s.
/// Bound on the number of distinct workflow definitions held in memory at
/// once. Definitions are immutable once loaded (§5), so eviction only ever
/// drops the least-recently-started one; a re-registration after eviction
/// is rejected the same as any other duplicate id.
const DEFINITION_CACHE_CAPACITY: usize = 1024;

pub struct WorkflowEngine {
    store: Arc<dyn TransactionalStore>,
    sink: Arc<dyn EventSink>,
    definitions: Mutex<LruCache<WorkflowDefinitionId, WorkflowDefinition>>,
    locks: Arc<DashMap<ExecutionId, Arc<tokio::sync::Mutex<()>>>>,
    automated_handlers: Arc<DashMap<String, Arc<dyn AutomatedHandler>>>,
    custom_conditions: Arc<DashMap<String, Arc<dyn ConditionEvaluator>>>,
    /// The instance record backing every armed `manual`/`approval` task,
    /// keyed by (execution, task definition) since each execution arms its
    /// own copy.
    compliance_tasks: Arc<DashMap<(ExecutionId, TaskDefinitionId), TaskInstanceId>>,
}

impl WorkflowEngine {
    pub fn new(store: Arc<dyn TransactionalStore>, sink: Arc<dyn EventSink>) -> Self {
        Self {
            store,
            sink,
            definitions: Mutex::new(LruCache::new(NonZeroUsize::new(DEFINITION_CACHE_CAPACITY).unwrap())),
            locks: Arc::new(DashMap::new()),
            automated_handlers: Arc::new(DashMap::new()),
            custom_conditions: Arc::new(DashMap::new()),
            compliance_tasks: Arc::new(DashMap::new()),
        }
    }

    pub fn register_automated_handler(&self, key: impl Into<String>, handler: Arc<dyn AutomatedHandler>) {
        self.automated_handlers.insert(key.into(), handler);
    }

    pub fn register_condition(&self, tag: impl Into<String>, evaluator: Arc<dyn ConditionEvaluator>) {
        self.custom_conditions.insert(tag.into(), evaluator);
    }

    /// Register-or-cache a definition. Cache entries are immutable once
    /// loaded: re-registering the same id is a conflict.
    pub fn register_definition(&self, definition: WorkflowDefinition) -> CoreResult<WorkflowDefinitionId> {
        if !definition.prerequisite_graph_is_dag() {
            return Err(CoreError::Validation(
                "task prerequisite graph contains a cycle".into(),
            ));
        }
        let id = definition.id;
        let mut definitions = self.definitions.lock();
        if definitions.contains(&id) {
            return Err(CoreError::Conflict(format!("definition {id} already registered")));
        }
        definitions.put(id, definition);
        Ok(id)
    }

    fn lock_for(&self, execution_id: ExecutionId) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .entry(execution_id)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Starts a new execution and arms its initially ready tasks.
    pub async fn start(
        &self,
        definition_id: WorkflowDefinitionId,
        triggered_by: impl Into<String>,
        trigger_payload: serde_json::Value,
        initial_vars: HashMap<String, serde_json::Value>,
    ) -> CoreResult<ExecutionId> {
        let definition = self
            .definitions
            .lock()
            .get(&definition_id)
            .cloned()
            .ok_or_else(|| CoreError::NotFound(format!("workflow definition {definition_id}")))?;
        if definition.status != WorkflowDefinitionStatus::Active {
            return Err(CoreError::Validation(format!(
                "workflow definition {definition_id} is not active"
            )));
        }

        let mut variables = definition.default_variables.clone();
        variables.extend(initial_vars);

        let execution_id = ExecutionId::new();
        let now = Utc::now();
        let mut execution = WorkflowExecution {
            id: execution_id,
            definition_id,
            status: ExecutionStatus::Active,
            context: ExecutionContext {
                variables,
                triggered_by: triggered_by.into(),
                trigger_payload,
                history: Vec::new(),
            },
            current: HashSet::new(),
            completed: HashSet::new(),
            failed: HashSet::new(),
            progress: 0,
            started_at: now,
            updated_at: now,
            completed_at: None,
        };
        execution.context.record("started", None, serde_json::Value::Null);

        self.persist(&execution).await?;
        self.advance(&mut execution, &definition).await?;
        Ok(execution_id)
    }

    async fn persist(&self, execution: &WorkflowExecution) -> CoreResult<()> {
        self.store
            .put(EXECUTIONS_COLLECTION, &execution.id.to_string(), execution)
            .await
    }

    pub async fn get(&self, execution_id: ExecutionId) -> CoreResult<WorkflowExecution> {
        self.store
            .get(EXECUTIONS_COLLECTION, &execution_id.to_string())
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("execution {execution_id}")))
    }

    fn definition_for(&self, execution: &WorkflowExecution) -> CoreResult<WorkflowDefinition> {
        self.definitions
            .lock()
            .get(&execution.definition_id)
            .cloned()
            .ok_or_else(|| CoreError::NotFound(format!("workflow definition {}", execution.definition_id)))
    }

    /// Recomputes the ready set and arms each newly-ready task.
    async fn advance(&self, execution: &mut WorkflowExecution, definition: &WorkflowDefinition) -> CoreResult<()> {
        loop {
            let ready: Vec<TaskDefinitionId> = definition
                .tasks
                .iter()
                .filter(|t| {
                    !execution.current.contains(&t.id)
                        && !execution.completed.contains(&t.id)
                        && !execution.failed.contains(&t.id)
                        && t.prerequisites.iter().all(|p| execution.completed.contains(p))
                })
                .filter(|t| {
                    t.condition
                        .as_ref()
                        .map(|c| {
                            evaluate_condition(
                                c,
                                &execution.context,
                                &execution.completed,
                                definition,
                                &self.custom_conditions_snapshot(),
                            )
                        })
                        .unwrap_or(true)
                })
                .map(|t| t.id)
                .collect();

            if ready.is_empty() {
                break;
            }

            for task_id in &ready {
                execution.current.insert(*task_id);
                execution
                    .context
                    .record("task_started", Some(*task_id), serde_json::Value::Null);
            }
            self.persist(execution).await?;

            // Arm each newly-ready task per its kind. Condition and
            // notification tasks auto-complete inline; automated tasks run
            // their handler; manual/approval tasks wait for an external call.
            for task_id in ready {
                let task = definition
                    .task(task_id)
                    .expect("task id came from this definition")
                    .clone();
                self.arm_task(execution, definition, &task).await?;
            }

            self.check_terminal(execution, definition).await?;
            if execution.status.is_terminal() {
                break;
            }
        }
        Ok(())
    }

    fn custom_conditions_snapshot(&self) -> HashMap<String, Arc<dyn ConditionEvaluator>> {
        self.custom_conditions
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    async fn arm_task(
        &self,
        execution: &mut WorkflowExecution,
        definition: &WorkflowDefinition,
        task: &TaskDefinition,
    ) -> CoreResult<()> {
        match task.kind {
            TaskKind::Condition => {
                let result = task
                    .condition
                    .as_ref()
                    .map(|c| {
                        evaluate_condition(
                            c,
                            &execution.context,
                            &execution.completed,
                            definition,
                            &self.custom_conditions_snapshot(),
                        )
                    })
                    .unwrap_or(false);
                let mut vars = HashMap::new();
                vars.insert("condition_result".to_string(), serde_json::json!(result));
                self.complete_task_inner(execution, definition, task.id, TaskResult { variables: vars })
                    .await
            }
            TaskKind::Notification => {
                self.complete_task_inner(execution, definition, task.id, TaskResult::default())
                    .await
            }
            TaskKind::Automated
            | TaskKind::Review
            | TaskKind::RiskAssessment
            | TaskKind::ComplianceCheck
            | TaskKind::Filing => {
                let handler_key = task
                    .automation_config
                    .as_ref()
                    .and_then(|c| c.handler.clone())
                    .unwrap_or_else(|| format!("{:?}", task.kind).to_lowercase());
                match self.automated_handlers.get(&handler_key).map(|h| h.clone()) {
                    Some(handler) => {
                        let run = handler.run(&execution.context, task);
                        let outcome = match task.timeout_seconds {
                            Some(secs) => {
                                match tokio::time::timeout(std::time::Duration::from_secs(secs), run).await {
                                    Ok(inner) => inner,
                                    Err(_) => Err(CoreError::Timeout(std::time::Duration::from_secs(secs))),
                                }
                            }
                            None => run.await,
                        };
                        match outcome {
                            Ok(result) => {
                                self.complete_task_inner(execution, definition, task.id, result).await
                            }
                            Err(err) => {
                                // A handler error (including a timeout) never terminates the
                                // engine directly; it converts to fail_task.
                                self.fail_task_inner(execution, definition, task.id, err.to_string())
                                    .await
                            }
                        }
                    }
                    None => {
                        self.fail_task_inner(
                            execution,
                            definition,
                            task.id,
                            format!("no automated handler registered for `{handler_key}`"),
                        )
                        .await
                    }
                }
            }
            // `manual` and `approval` tasks only get armed; an external
            // `complete_task`/`fail_task` call (or quorum of approvals)
            // drives them forward.
            TaskKind::Manual | TaskKind::Approval => self.create_task_instance(execution, task).await,
        }
    }

    /// Creates the `ComplianceTask` instance backing a newly-armed
    /// `manual`/`approval` task.
    async fn create_task_instance(&self, execution: &WorkflowExecution, task: &TaskDefinition) -> CoreResult<()> {
        let now = Utc::now();
        let required_approvals = task.approval_config.as_ref().map(|c| c.quorum).unwrap_or(0);
        let instance = ComplianceTask {
            id: TaskInstanceId::new(),
            workflow_execution_id: Some(execution.id),
            workflow_task_id: Some(task.id),
            parent: None,
            subtasks: Vec::new(),
            title: task.name.clone(),
            status: if task.kind == TaskKind::Approval {
                TaskInstanceStatus::WaitingApproval
            } else {
                TaskInstanceStatus::Assigned
            },
            priority: TaskPriority::Medium,
            assignment: task.approval_config.as_ref().map(|c| crate::domain::Assignment {
                assignee_id: c.approvers.first().cloned().unwrap_or_default(),
                kind: "approver".to_string(),
                due_at: None,
                delegation_allowed: false,
            }),
            progress: 0,
            evidence: Vec::new(),
            comments: Vec::new(),
            required_evidence: task.required_evidence.clone(),
            required_approvals,
            approvals: Vec::new(),
            effort_estimate_hours: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };
        self.compliance_tasks.insert((execution.id, task.id), instance.id);
        self.store
            .put(COMPLIANCE_TASKS_COLLECTION, &instance.id.to_string(), &instance)
            .await?;

        if task.kind == TaskKind::Approval {
            if let Some(config) = &task.approval_config {
                for approver in &config.approvers {
                    let notification = NotificationPayload {
                        kind: "approval_request".to_string(),
                        severity: NotificationSeverity::Info,
                        subject: format!("Approval requested: {}", task.name),
                        body: format!("{} requires your approval ({} of {} needed).", task.name, config.quorum, config.approvers.len()),
                        tags: vec![format!("task_instance_id:{}", instance.id), format!("approver:{approver}")],
                        dedup_key: format!("{}:{approver}", instance.id),
                    };
                    if let Err(err) = self.sink.send(notification).await {
                        tracing::warn!(task_instance_id = %instance.id, approver, error = %err, "failed to notify approver");
                    }
                }
            }
        }

        Ok(())
    }

    async fn task_instance(&self, execution_id: ExecutionId, task_id: TaskDefinitionId) -> CoreResult<ComplianceTask> {
        let instance_id = *self
            .compliance_tasks
            .get(&(execution_id, task_id))
            .ok_or_else(|| CoreError::NotFound(format!("no task instance for task {task_id} in execution {execution_id}")))?;
        self.store
            .get(COMPLIANCE_TASKS_COLLECTION, &instance_id.to_string())
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("task instance {instance_id}")))
    }

    async fn put_task_instance(&self, instance: &ComplianceTask) -> CoreResult<()> {
        self.store
            .put(COMPLIANCE_TASKS_COLLECTION, &instance.id.to_string(), instance)
            .await
    }

    /// Attaches evidence to a `manual` task's instance. Completion requires
    /// every required-evidence kind to be present.
    pub async fn submit_evidence(
        &self,
        execution_id: ExecutionId,
        task_id: TaskDefinitionId,
        evidence: Evidence,
    ) -> CoreResult<()> {
        let mut instance = self.task_instance(execution_id, task_id).await?;
        instance.evidence.push(evidence);
        instance.updated_at = Utc::now();
        self.put_task_instance(&instance).await
    }

    /// Records one approver's decision; once quorum is met the task
    /// instance completes and the owning workflow task is driven forward
    /// through the normal `complete_task` path.
    pub async fn record_approval(
        &self,
        execution_id: ExecutionId,
        task_id: TaskDefinitionId,
        approver: impl Into<String>,
    ) -> CoreResult<()> {
        let mut instance = self.task_instance(execution_id, task_id).await?;
        instance.approvals.push(ApprovalRecord {
            approver: approver.into(),
            granted_at: Utc::now(),
            retained_after_cancellation: true,
        });
        instance.updated_at = Utc::now();
        let quorum_met = instance.has_quorum();
        if quorum_met {
            instance.status = TaskInstanceStatus::Completed;
            instance.completed_at = Some(Utc::now());
        }
        self.put_task_instance(&instance).await?;

        if quorum_met {
            self.complete_task(execution_id, task_id, TaskResult::default()).await?;
        }
        Ok(())
    }

    /// External entry point used by callers driving a task to completion.
    pub async fn complete_task(
        &self,
        execution_id: ExecutionId,
        task_id: TaskDefinitionId,
        result: TaskResult,
    ) -> CoreResult<()> {
        let lock = self.lock_for(execution_id);
        let _guard = lock.lock().await;

        let mut execution = self.get(execution_id).await?;
        let definition = self.definition_for(&execution)?;
        if !execution.current.contains(&task_id) {
            return Err(CoreError::Conflict(format!(
                "task {task_id} is not currently active in execution {execution_id}"
            )));
        }
        if let Some(task) = definition.task(task_id) {
            if matches!(task.kind, TaskKind::Manual | TaskKind::Approval) {
                let mut instance = self.task_instance(execution_id, task_id).await?;
                if !instance.has_required_evidence() {
                    return Err(CoreError::Validation(format!(
                        "task {task_id} is missing required evidence"
                    )));
                }
                instance.status = TaskInstanceStatus::Completed;
                instance.completed_at = Some(Utc::now());
                instance.updated_at = Utc::now();
                self.put_task_instance(&instance).await?;
            }
        }
        self.complete_task_inner(&mut execution, &definition, task_id, result).await
    }

    async fn complete_task_inner(
        &self,
        execution: &mut WorkflowExecution,
        definition: &WorkflowDefinition,
        task_id: TaskDefinitionId,
        result: TaskResult,
    ) -> CoreResult<()> {
        execution.current.remove(&task_id);
        execution.completed.insert(task_id);
        execution.context.variables.extend(result.variables.clone());
        execution.context.record(
            "task_completed",
            Some(task_id),
            serde_json::to_value(&result.variables).unwrap_or(serde_json::Value::Null),
        );
        execution.updated_at = Utc::now();
        execution.recompute_progress(definition.tasks.len());
        self.persist(execution).await?;
        self.advance(execution, definition).await
    }

    pub async fn fail_task(
        &self,
        execution_id: ExecutionId,
        task_id: TaskDefinitionId,
        error: String,
    ) -> CoreResult<()> {
        let lock = self.lock_for(execution_id);
        let _guard = lock.lock().await;

        let mut execution = self.get(execution_id).await?;
        let definition = self.definition_for(&execution)?;
        if !execution.current.contains(&task_id) {
            return Err(CoreError::Conflict(format!(
                "task {task_id} is not currently active in execution {execution_id}"
            )));
        }
        if let Some(task) = definition.task(task_id) {
            if matches!(task.kind, TaskKind::Manual | TaskKind::Approval) {
                if let Ok(mut instance) = self.task_instance(execution_id, task_id).await {
                    instance.status = TaskInstanceStatus::Failed;
                    instance.updated_at = Utc::now();
                    self.put_task_instance(&instance).await?;
                }
            }
        }
        self.fail_task_inner(&mut execution, &definition, task_id, error).await
    }

    async fn fail_task_inner(
        &self,
        execution: &mut WorkflowExecution,
        definition: &WorkflowDefinition,
        task_id: TaskDefinitionId,
        error: String,
    ) -> CoreResult<()> {
        execution.current.remove(&task_id);
        execution.failed.insert(task_id);
        execution
            .context
            .record("task_failed", Some(task_id), serde_json::json!({"error": error}));
        execution.updated_at = Utc::now();
        self.persist(execution).await?;

        match definition.settings.failure_behavior {
            FailureBehavior::Stop => {
                execution.status = ExecutionStatus::Failed;
                execution.completed_at = Some(Utc::now());
                self.persist(execution).await?;
                Ok(())
            }
            FailureBehavior::Continue => {
                self.check_terminal(execution, definition).await?;
                if !execution.status.is_terminal() {
                    self.advance(execution, definition).await?;
                }
                Ok(())
            }
            FailureBehavior::Retry => {
                // Re-queue the same task once (bounded): a second failure
                // is treated as a hard failure via `stop` semantics.
                let already_retried = execution
                    .context
                    .history
                    .iter()
                    .filter(|h| h.event == "task_retried" && h.task_id == Some(task_id))
                    .count()
                    >= 1;
                if already_retried {
                    execution.status = ExecutionStatus::Failed;
                    execution.completed_at = Some(Utc::now());
                    self.persist(execution).await?;
                    Ok(())
                } else {
                    execution.failed.remove(&task_id);
                    execution
                        .context
                        .record("task_retried", Some(task_id), serde_json::Value::Null);
                    execution.current.insert(task_id);
                    self.persist(execution).await?;
                    let task = definition.task(task_id).expect("task exists").clone();
                    self.arm_task(execution, definition, &task).await
                }
            }
        }
    }

    /// Termination rules, checked after every state-changing event.
    async fn check_terminal(&self, execution: &mut WorkflowExecution, definition: &WorkflowDefinition) -> CoreResult<()> {
        let total = definition.tasks.len();
        let elapsed = Utc::now().signed_duration_since(execution.started_at);
        let max_duration = chrono::Duration::seconds(definition.settings.max_duration_seconds as i64);

        if elapsed > max_duration && !execution.status.is_terminal() {
            execution.status = ExecutionStatus::Expired;
            execution.completed_at = Some(Utc::now());
            self.persist(execution).await?;
            return Ok(());
        }

        if execution.completed.len() + execution.failed.len() == total && total > 0 {
            if execution.failed.len() <= definition.settings.max_acceptable_failures {
                execution.status = ExecutionStatus::Completed;
                execution.progress = 100;
            } else {
                execution.status = ExecutionStatus::Failed;
            }
            execution.completed_at = Some(Utc::now());
            self.persist(execution).await?;
        }
        Ok(())
    }

    /// Admin surface `cancel_workflow`: cancels all `current` tasks.
    /// Approvals already granted before cancellation are retained as audit
    /// records, not revoked.
    pub async fn cancel(&self, execution_id: ExecutionId, reason: impl Into<String>) -> CoreResult<()> {
        let lock = self.lock_for(execution_id);
        let _guard = lock.lock().await;

        let mut execution = self.get(execution_id).await?;
        if execution.status.is_terminal() {
            return Err(CoreError::Conflict(format!(
                "execution {execution_id} is already terminal"
            )));
        }
        execution
            .context
            .record("cancelled", None, serde_json::json!({"reason": reason.into()}));
        execution.current.clear();
        execution.status = ExecutionStatus::Cancelled;
        execution.completed_at = Some(Utc::now());
        self.persist(&execution).await
    }

    pub async fn pause(&self, execution_id: ExecutionId) -> CoreResult<()> {
        let lock = self.lock_for(execution_id);
        let _guard = lock.lock().await;
        let mut execution = self.get(execution_id).await?;
        if execution.status != ExecutionStatus::Active {
            return Err(CoreError::Conflict(format!("execution {execution_id} is not active")));
        }
        execution.status = ExecutionStatus::Paused;
        self.persist(&execution).await
    }

    pub async fn resume(&self, execution_id: ExecutionId) -> CoreResult<()> {
        let lock = self.lock_for(execution_id);
        let _guard = lock.lock().await;
        let mut execution = self.get(execution_id).await?;
        if execution.status != ExecutionStatus::Paused {
            return Err(CoreError::Conflict(format!("execution {execution_id} is not paused")));
        }
        execution.status = ExecutionStatus::Active;
        self.persist(&execution).await
    }
}
