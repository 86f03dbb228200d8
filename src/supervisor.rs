//! Process-wide composition root: owns every subsystem, wires the poller's
//! `IngestSink` into the pipeline and the orchestrator's regulatory-change
//! fast path, and starts/stops them as one unit.
//!
//! Replaces the teacher's scattered global singletons (the pattern noted
//! against `knhk-workflow-engine`'s module-level statics) with one owning
//! struct whose `start`/`stop` bound every background task's lifetime.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::apm::ApmSupervisor;
use crate::concurrency::CancelToken;
use crate::config::{CoreConfig, SourceConfig};
use crate::dr::{BackupInspector, DrSupervisor, FailoverExecutor, RecoveryExecutor};
use crate::embeddings::EmbeddingProvider;
use crate::error::CoreResult;
use crate::ids::SourceId;
use crate::orchestrator::Orchestrator;
use crate::pipeline::{self, DocumentFetcher, DocumentIndexer, DocumentSource};
use crate::poller::{FeedFetcher, IngestSink, SourcePoller};
use crate::scheduler::{Scheduler, SchedulerDisableSink};
use crate::similarity::SimilarityIndex;
use crate::sink::EventSink;
use crate::store::{TransactionalStore, TypedStoreExt};
use crate::workflow::WorkflowEngine;

/// Bridges a newly ingested document into the pipeline (extraction,
/// fingerprinting, similarity indexing) and then into the orchestrator's
/// regulatory-change fast path. The poller knows neither the pipeline nor
/// the orchestrator exist; this is their only meeting point.
struct PipelineIngestSink {
    store: Arc<dyn TransactionalStore>,
    indexer: DocumentIndexer,
    orchestrator: Arc<Orchestrator>,
    fetcher: Arc<dyn DocumentFetcher>,
    max_file_bytes: u64,
}

#[async_trait]
impl IngestSink for PipelineIngestSink {
    async fn on_new_document(&self, mut document: crate::domain::RegulatoryDocument) {
        // The poller never populates `full_text` itself (§4.1 only fetches
        // feed entries, not bodies); fetch it here so C2 actually runs
        // outside its own unit tests (§2, §4.2).
        let source = match document.full_text.clone() {
            Some(text) => DocumentSource::Bytes(text.into_bytes()),
            None => DocumentSource::Url(document.url.clone()),
        };
        let result = pipeline::fetch_and_process(source, self.fetcher.as_ref(), None, self.max_file_bytes).await;
        if result.success {
            document.full_text = Some(result.text.clone());
            document.content_fingerprint = Some(result.fingerprint.clone());
            if let Err(err) = self
                .indexer
                .index(document.id, &result, std::collections::HashMap::new())
                .await
            {
                tracing::warn!(document_id = %document.id, error = %err, "document indexing failed");
            }
        } else {
            tracing::warn!(document_id = %document.id, error = ?result.error, "pipeline extraction failed");
        }
        document.status = crate::domain::DocumentStatus::Processed;
        if let Err(err) = self
            .store
            .put(crate::poller::DOCUMENTS_COLLECTION, &document.id.to_string(), &document)
            .await
        {
            tracing::warn!(document_id = %document.id, error = %err, "failed to persist processed document");
            return;
        }

        let receipt = self.orchestrator.handle_regulatory_change(&document, false).await;
        if !receipt.success {
            tracing::warn!(document_id = %document.id, errors = ?receipt.errors, "regulatory-change fast path reported errors");
        }
    }
}

/// Forwards the scheduler's auto-disable notifications into the DR
/// subsystem as a `warning` event (§4.3, S4).
struct SchedulerDisableToDr {
    dr: Arc<DrSupervisor>,
}

#[async_trait]
impl SchedulerDisableSink for SchedulerDisableToDr {
    async fn on_task_disabled(&self, _task_id: crate::ids::ScheduledTaskId, task_name: &str) {
        self.dr.raise_scheduler_disabled_event(task_name).await;
    }
}

/// Owns the poller, scheduler, workflow engine, orchestrator, and the
/// APM/DR supervisors for the lifetime of the process.
pub struct Supervisor {
    pub poller: Arc<SourcePoller>,
    pub scheduler: Arc<Scheduler>,
    pub engine: Arc<WorkflowEngine>,
    pub orchestrator: Arc<Orchestrator>,
    pub apm: Arc<ApmSupervisor>,
    pub dr: Arc<DrSupervisor>,
    config: CoreConfig,
    root: CancelToken,
    handles: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl Supervisor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: CoreConfig,
        store: Arc<dyn TransactionalStore>,
        fetcher: Arc<dyn FeedFetcher>,
        document_fetcher: Arc<dyn DocumentFetcher>,
        similarity: Arc<dyn SimilarityIndex>,
        embeddings: Arc<dyn EmbeddingProvider>,
        event_sink: Arc<dyn EventSink>,
        backups: Arc<dyn BackupInspector>,
        failover: Arc<dyn FailoverExecutor>,
        recovery: Arc<dyn RecoveryExecutor>,
    ) -> Self {
        let engine = Arc::new(WorkflowEngine::new(store.clone(), event_sink.clone()));
        let orchestrator = Arc::new(Orchestrator::new(
            store.clone(),
            engine.clone(),
            event_sink.clone(),
            similarity.clone(),
            embeddings.clone(),
        ));
        let indexer = DocumentIndexer::new(embeddings.clone(), similarity.clone());
        let ingest_sink: Arc<dyn IngestSink> = Arc::new(PipelineIngestSink {
            store: store.clone(),
            indexer,
            orchestrator: orchestrator.clone(),
            fetcher: document_fetcher,
            max_file_bytes: config.pipeline.max_file_bytes,
        });
        let poller = Arc::new(SourcePoller::new(store.clone(), fetcher, ingest_sink));
        let scheduler = Arc::new(Scheduler::new(config.scheduler.max_concurrent));
        let apm = Arc::new(ApmSupervisor::new(&config.apm));
        let dr_objectives = config
            .dr_objectives
            .iter()
            .map(|o| crate::domain::dr::DrObjective {
                component: o.component.clone(),
                rto: crate::config::as_duration_minutes(o.rto_minutes),
                rpo: crate::config::as_duration_minutes(o.rpo_minutes),
                priority: o.priority,
                automated: o.automated,
                validation_checks: o.checks.clone(),
            })
            .collect();
        let dr = Arc::new(DrSupervisor::new(dr_objectives, backups, failover, recovery, event_sink));
        scheduler.set_disable_sink(Arc::new(SchedulerDisableToDr { dr: dr.clone() }));

        Self {
            poller,
            scheduler,
            engine,
            orchestrator,
            apm,
            dr,
            config,
            root: CancelToken::new(),
            handles: tokio::sync::Mutex::new(Vec::new()),
        }
    }

    /// Starts every subsystem's dispatcher loop. Idempotent only at the
    /// per-subsystem level (`SourcePoller::start` is idempotent; calling
    /// this twice otherwise double-spawns the tick loops).
    pub async fn start(&self) {
        let sources: Vec<(SourceId, SourceConfig)> = self
            .config
            .sources
            .iter()
            .map(|s| {
                (
                    SourceId::new(),
                    s.clone(),
                )
            })
            .collect();
        let mut handles = self.poller.start(sources, self.root.child_token());

        let scheduler = self.scheduler.clone();
        let tick = std::time::Duration::from_secs(self.config.scheduler.tick_seconds);
        let scheduler_token = self.root.child_token();
        handles.push(tokio::spawn(async move {
            scheduler.run(tick, scheduler_token).await;
        }));

        let apm = self.apm.clone();
        let resource_period = std::time::Duration::from_secs(self.config.apm.resource_sample_seconds);
        let apm_token = self.root.child_token();
        handles.push(tokio::spawn(async move {
            apm.run_resource_sampler(resource_period, apm_token).await;
        }));

        let dr = self.dr.clone();
        let dr_period = crate::config::as_duration_minutes(self.config.apm.dr_backup_validation_minutes);
        let dr_token = self.root.child_token();
        handles.push(tokio::spawn(async move {
            dr.run(dr_period, dr_token).await;
        }));

        *self.handles.lock().await = handles;
    }

    /// Cancels the shared root token, which propagates to every child, then
    /// stops the poller explicitly (its own `stop` carries a grace period)
    /// and joins every spawned task.
    pub async fn stop(&self) {
        self.root.cancel();
        self.poller.stop(&self.root, std::time::Duration::from_millis(50)).await;
        let handles = std::mem::take(&mut *self.handles.lock().await);
        for handle in handles {
            let _ = handle.await;
        }
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::HashEmbeddingProvider;
    use crate::similarity::InMemorySimilarityIndex;
    use crate::sink::TracingEventSink;
    use crate::store::MemoryStore;
    use std::time::Duration;

    struct EmptyFetcher;

    #[async_trait]
    impl FeedFetcher for EmptyFetcher {
        async fn fetch(&self, _source: &SourceConfig) -> CoreResult<Vec<crate::domain::RawEntry>> {
            Ok(Vec::new())
        }
    }

    struct EmptyDocumentFetcher;

    #[async_trait]
    impl DocumentFetcher for EmptyDocumentFetcher {
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
    async fn start_and_stop_is_clean() {
        let supervisor = build_supervisor();
        supervisor.start().await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        supervisor.stop().await;
    }
}
