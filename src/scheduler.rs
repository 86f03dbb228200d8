//! Tick-driven dispatcher for scheduled background work: a tick/dispatch
//! loop, exponential-backoff retry scheduling, a closed handler-kind table,
//! and compliance sub-check dispatch (AML transaction sweeps, KYC expiry,
//! regulatory deadline checks) built over a shared retry-policy pattern.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::concurrency::CancelToken;
use crate::domain::{
    ScheduledTask, ScheduledTaskKind, ScheduledTaskStatus, TaskExecution, TaskExecutionStatus,
};
use crate::error::{CoreError, CoreResult};
use crate::ids::ScheduledTaskId;

/// A registered handler for one `ScheduledTaskKind`. Unknown kinds fail the
/// execution with `no_handler`.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn run(&self, payload: &serde_json::Value) -> CoreResult<serde_json::Value>;
}

/// Observes tasks the scheduler auto-disables after `max_failures`
/// consecutive failures, so a caller can raise a DR-visible event (§4.3,
/// S4) without the scheduler knowing the DR subsystem exists.
#[async_trait]
pub trait SchedulerDisableSink: Send + Sync {
    async fn on_task_disabled(&self, task_id: ScheduledTaskId, task_name: &str);
}

/// A compliance scheduled-task handler delegates the actual rule checks to
/// this trait; finding concrete findings is out of scope here, only the
/// dispatch mechanism and result shape are.
#[async_trait]
pub trait ComplianceCheck: Send + Sync {
    async fn check(&self) -> CoreResult<Vec<serde_json::Value>>;
}

pub struct ComplianceCheckHandler {
    checks: HashMap<String, Arc<dyn ComplianceCheck>>,
}

impl ComplianceCheckHandler {
    pub fn new() -> Self {
        Self {
            checks: HashMap::new(),
        }
    }

    pub fn register(&mut self, name: impl Into<String>, check: Arc<dyn ComplianceCheck>) {
        self.checks.insert(name.into(), check);
    }
}

impl Default for ComplianceCheckHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskHandler for ComplianceCheckHandler {
    async fn run(&self, payload: &serde_json::Value) -> CoreResult<serde_json::Value> {
        let check_name = payload
            .get("check")
            .and_then(|v| v.as_str())
            .ok_or_else(|| CoreError::Validation("compliance_check payload missing `check`".into()))?;
        let check = self
            .checks
            .get(check_name)
            .ok_or_else(|| CoreError::Validation(format!("unknown compliance check: {check_name}")))?;
        let findings = check.check().await?;
        Ok(serde_json::json!({ "check": check_name, "findings": findings }))
    }
}

struct RuntimeTask {
    task: ScheduledTask,
}

/// Single-threaded tick dispatcher, parallel task execution.
pub struct Scheduler {
    tasks: Arc<DashMap<ScheduledTaskId, RuntimeTask>>,
    handlers: Arc<DashMap<ScheduledTaskKind, Arc<dyn TaskHandler>>>,
    max_concurrent: usize,
    semaphore: Arc<tokio::sync::Semaphore>,
    executions: Arc<DashMap<ScheduledTaskId, Vec<TaskExecution>>>,
    disable_sink: parking_lot::RwLock<Option<Arc<dyn SchedulerDisableSink>>>,
}

impl Scheduler {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            tasks: Arc::new(DashMap::new()),
            handlers: Arc::new(DashMap::new()),
            max_concurrent,
            semaphore: Arc::new(tokio::sync::Semaphore::new(max_concurrent)),
            executions: Arc::new(DashMap::new()),
            disable_sink: parking_lot::RwLock::new(None),
        }
    }

    pub fn register_handler(&self, kind: ScheduledTaskKind, handler: Arc<dyn TaskHandler>) {
        self.handlers.insert(kind, handler);
    }

    /// Registers the sink notified whenever a task auto-disables after
    /// exhausting `max_failures`. Replaces any previously set sink.
    pub fn set_disable_sink(&self, sink: Arc<dyn SchedulerDisableSink>) {
        *self.disable_sink.write() = Some(sink);
    }

    pub fn add_task(&self, task: ScheduledTask) {
        self.tasks.insert(task.id, RuntimeTask { task });
    }

    pub fn task_status(&self, id: ScheduledTaskId) -> Option<ScheduledTaskStatus> {
        self.tasks.get(&id).map(|t| t.task.status)
    }

    pub fn executions_for(&self, id: ScheduledTaskId) -> Vec<TaskExecution> {
        self.executions.get(&id).map(|v| v.clone()).unwrap_or_default()
    }

    /// Forces `next_run` into the past so the next tick treats this task as
    /// due immediately, bypassing its retry backoff. Test-only: production
    /// code has no legitimate reason to skip a scheduled backoff.
    pub fn force_due_now_for_test(&self, id: ScheduledTaskId) {
        if let Some(mut rt) = self.tasks.get_mut(&id) {
            rt.task.next_run = Some(Utc::now() - chrono::Duration::seconds(1));
        }
    }

    /// Runs the tick loop until `cancel` fires. Callers should keep
    /// `tick_period` at 30s or under so retries and deadlines stay timely.
    pub async fn run(&self, tick_period: Duration, cancel: CancelToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(tick_period) => {
                    self.tick().await;
                }
            }
        }
    }

    /// One dispatch tick: sweep timeouts, then run every due task.
    pub async fn tick(&self) {
        let now = Utc::now();

        // Step 2: timeout sweep for running tasks.
        let mut timed_out = Vec::new();
        for mut entry in self.tasks.iter_mut() {
            let rt = entry.value_mut();
            if rt.task.status == ScheduledTaskStatus::Running {
                if let Some(last_run) = rt.task.last_run {
                    if now.signed_duration_since(last_run)
                        > chrono::Duration::from_std(rt.task.timeout).unwrap_or(chrono::Duration::zero())
                    {
                        timed_out.push(rt.task.id);
                    }
                }
            }
        }
        for id in timed_out {
            self.record_failure(id, "timeout".to_string()).await;
        }

        // Step 1: dispatch due tasks, bounded by `max_concurrent`.
        let due: Vec<ScheduledTaskId> = self
            .tasks
            .iter()
            .filter(|e| e.value().task.is_due(now))
            .map(|e| *e.key())
            .collect();

        for id in due {
            if self.semaphore.available_permits() == 0 {
                break; // excess dues are re-evaluated next tick
            }
            let Some(permit) = self.semaphore.clone().try_acquire_owned().ok() else {
                break;
            };

            if let Some(mut rt) = self.tasks.get_mut(&id) {
                rt.task.status = ScheduledTaskStatus::Running;
                rt.task.last_run = Some(now);
                rt.task.next_run = Some(now + chrono::Duration::from_std(rt.task.interval).unwrap_or(chrono::Duration::zero()));
            } else {
                continue;
            }

            let tasks = self.tasks.clone();
            let handlers = self.handlers.clone();
            let executions = self.executions.clone();
            let disable_sink = self.disable_sink.read().clone();
            tokio::spawn(async move {
                let _permit = permit;
                run_one(id, tasks, handlers, executions, disable_sink).await;
            });
        }
    }

    async fn record_failure(&self, id: ScheduledTaskId, error: String) {
        let disabled = record_outcome(&self.tasks, &self.executions, id, Err(error), Utc::now(), Utc::now()).await;
        notify_disabled(&self.disable_sink.read().clone(), disabled).await;
    }
}

async fn run_one(
    id: ScheduledTaskId,
    tasks: Arc<DashMap<ScheduledTaskId, RuntimeTask>>,
    handlers: Arc<DashMap<ScheduledTaskKind, Arc<dyn TaskHandler>>>,
    executions: Arc<DashMap<ScheduledTaskId, Vec<TaskExecution>>>,
    disable_sink: Option<Arc<dyn SchedulerDisableSink>>,
) {
    let (kind, payload, timeout) = match tasks.get(&id) {
        Some(rt) => (rt.task.kind, rt.task.payload.clone(), rt.task.timeout),
        None => return,
    };
    let started_at = Utc::now();

    let handler = handlers.get(&kind).map(|h| h.clone());
    let outcome = match handler {
        None => Err("no_handler".to_string()),
        Some(handler) => match tokio::time::timeout(timeout, handler.run(&payload)).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err("timeout".to_string()),
        },
    };

    let disabled = record_outcome(&tasks, &executions, id, outcome, started_at, Utc::now()).await;
    notify_disabled(&disable_sink, disabled).await;
}

async fn notify_disabled(sink: &Option<Arc<dyn SchedulerDisableSink>>, disabled: Option<(ScheduledTaskId, String)>) {
    if let (Some(sink), Some((id, name))) = (sink, disabled) {
        sink.on_task_disabled(id, &name).await;
    }
}

/// Returns `Some((id, name))` if this outcome pushed the task into
/// `Disabled`, so the caller can notify a `SchedulerDisableSink`.
async fn record_outcome(
    tasks: &DashMap<ScheduledTaskId, RuntimeTask>,
    executions: &DashMap<ScheduledTaskId, Vec<TaskExecution>>,
    id: ScheduledTaskId,
    outcome: Result<serde_json::Value, String>,
    started_at: chrono::DateTime<Utc>,
    ended_at: chrono::DateTime<Utc>,
) -> Option<(ScheduledTaskId, String)> {
    let Some(mut rt) = tasks.get_mut(&id) else {
        return None;
    };

    let duration = (ended_at - started_at).to_std().unwrap_or(Duration::ZERO);
    let execution = match &outcome {
        Ok(result) => TaskExecution {
            id: crate::ids::TaskExecutionId::new(),
            task_id: id,
            status: TaskExecutionStatus::Completed,
            started_at,
            ended_at,
            duration,
            result: Some(result.clone()),
            error: None,
        },
        Err(error) => TaskExecution {
            id: crate::ids::TaskExecutionId::new(),
            task_id: id,
            status: TaskExecutionStatus::Failed,
            started_at,
            ended_at,
            duration,
            result: None,
            error: Some(error.clone()),
        },
    };
    executions.entry(id).or_default().push(execution);

    match outcome {
        Ok(_) => {
            rt.task.status = ScheduledTaskStatus::Completed;
            rt.task.failure_count = 0;
            None
        }
        Err(_) => {
            rt.task.failure_count += 1;
            if rt.task.failure_count >= rt.task.max_failures {
                rt.task.status = ScheduledTaskStatus::Disabled;
                rt.task.enabled = false;
                tracing::warn!(task = %id, "scheduled task auto-disabled after max failures");
                Some((id, rt.task.name.clone()))
            } else {
                rt.task.status = ScheduledTaskStatus::Failed;
                let delay = rt.task.next_retry_delay();
                rt.task.next_run = Some(ended_at + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::zero()));
                None
            }
        }
    }
}
