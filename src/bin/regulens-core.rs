//! Process entry point: loads configuration, wires the default runtime
//! collaborators, starts the supervisor, and waits for a shutdown signal.

use async_trait::async_trait;
use clap::Parser;
use regulens_core::config::{CoreConfig, SourceConfig};
use regulens_core::dr::{BackupInspector, FailoverExecutor, RecoveryExecutor};
use regulens_core::embeddings::HashEmbeddingProvider;
use regulens_core::error::CoreResult;
use regulens_core::pipeline::DocumentFetcher;
use regulens_core::poller::FeedFetcher;
use regulens_core::similarity::InMemorySimilarityIndex;
use regulens_core::sink::TracingEventSink;
use regulens_core::store::MemoryStore;
use regulens_core::Supervisor;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "regulens-core", about = "Regulatory-compliance monitoring and workflow control plane")]
struct Cli {
    /// Optional TOML config file, layered over defaults and `REGULENS_*` env vars.
    #[arg(long, env = "REGULENS_CONFIG")]
    config: Option<PathBuf>,

    /// Directory consulted by the default, filesystem-backed DR backup inspector.
    #[arg(long, env = "REGULENS_BACKUP_DIR", default_value = "./backups")]
    backup_dir: PathBuf,
}

/// Fetches API-style sources over HTTP. RSS/scraped sources need their own
/// parsers, out of scope for the default runtime wiring.
struct HttpFeedFetcher {
    client: reqwest::Client,
}

#[derive(serde::Deserialize)]
struct ApiEntry {
    id: Option<String>,
    title: String,
    link: String,
    body: String,
    published: Option<chrono::DateTime<chrono::Utc>>,
}

#[async_trait]
impl FeedFetcher for HttpFeedFetcher {
    async fn fetch(&self, source: &SourceConfig) -> CoreResult<Vec<regulens_core::domain::RawEntry>> {
        let mut request = self.client.get(&source.endpoint);
        for (name, value) in &source.auth_headers {
            request = request.header(name, value);
        }
        let entries: Vec<ApiEntry> = request.send().await?.json().await?;
        Ok(entries
            .into_iter()
            .map(|e| regulens_core::domain::RawEntry::Api {
                id: e.id,
                title: e.title,
                link: e.link,
                body: e.body,
                published: e.published,
            })
            .collect())
    }
}

/// Downloads a document body over HTTP. Shares the pipeline's only network
/// dependency with `HttpFeedFetcher` rather than standing up a second client.
struct HttpDocumentFetcher {
    client: reqwest::Client,
}

#[async_trait]
impl DocumentFetcher for HttpDocumentFetcher {
    async fn fetch(&self, url: &str) -> CoreResult<Vec<u8>> {
        let bytes = self.client.get(url).send().await?.bytes().await?;
        Ok(bytes.to_vec())
    }
}

/// Treats the presence and mtime of `<backup_dir>/<component>` as the
/// backup record. A real deployment points this at its actual backup
/// inventory; this is the smallest default that is still honest about what
/// it checked.
struct FilesystemBackupInspector {
    backup_dir: PathBuf,
}

impl FilesystemBackupInspector {
    fn path_for(&self, component: &str) -> PathBuf {
        self.backup_dir.join(component)
    }
}

#[async_trait]
impl BackupInspector for FilesystemBackupInspector {
    async fn backup_exists(&self, component: &str) -> CoreResult<bool> {
        Ok(self.path_for(component).exists())
    }

    async fn backup_age(&self, component: &str) -> CoreResult<Duration> {
        let path = self.path_for(component);
        let modified = tokio::fs::metadata(&path).await?.modified()?;
        Ok(modified.elapsed().unwrap_or(Duration::MAX))
    }

    async fn integrity_check(&self, component: &str) -> CoreResult<bool> {
        Ok(tokio::fs::metadata(self.path_for(component)).await.map(|m| m.len() > 0).unwrap_or(false))
    }

    async fn completeness_check(&self, component: &str) -> CoreResult<bool> {
        self.backup_exists(component).await
    }
}

/// No automated failover/recovery target is configured by default; drills
/// run as dry-run no-ops so `run_dr_test` stays callable without infra.
struct NoopFailoverExecutor;

#[async_trait]
impl FailoverExecutor for NoopFailoverExecutor {
    async fn pre_checks(&self, _component: &str) -> CoreResult<bool> {
        Ok(true)
    }

    async fn execute(&self, component: &str, dry_run: bool) -> CoreResult<Duration> {
        info!(component, dry_run, "failover executor has no backing target; treating as a no-op drill");
        Ok(Duration::from_secs(0))
    }

    async fn post_checks(&self, _component: &str) -> CoreResult<bool> {
        Ok(true)
    }
}

struct NoopRecoveryExecutor;

#[async_trait]
impl RecoveryExecutor for NoopRecoveryExecutor {
    async fn execute(
        &self,
        component: &str,
        backup_timestamp: chrono::DateTime<chrono::Utc>,
        dry_run: bool,
    ) -> CoreResult<chrono::DateTime<chrono::Utc>> {
        info!(component, dry_run, "recovery executor has no backing target; treating as a no-op drill");
        Ok(backup_timestamp)
    }

    async fn data_integrity_check(&self, _component: &str) -> CoreResult<bool> {
        Ok(true)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .json()
        .init();

    let cli = Cli::parse();

    let config = CoreConfig::load(cli.config.as_deref())?;
    info!(sources = config.sources.len(), max_concurrent = config.scheduler.max_concurrent, "configuration loaded");

    let store = Arc::new(MemoryStore::new());
    let fetcher: Arc<dyn FeedFetcher> = Arc::new(HttpFeedFetcher { client: reqwest::Client::new() });
    let document_fetcher: Arc<dyn DocumentFetcher> = Arc::new(HttpDocumentFetcher { client: reqwest::Client::new() });
    let similarity = Arc::new(InMemorySimilarityIndex::new());
    let embeddings = Arc::new(HashEmbeddingProvider::new(64));
    let sink = Arc::new(TracingEventSink);
    let backups: Arc<dyn BackupInspector> = Arc::new(FilesystemBackupInspector { backup_dir: cli.backup_dir });
    let failover: Arc<dyn FailoverExecutor> = Arc::new(NoopFailoverExecutor);
    let recovery: Arc<dyn RecoveryExecutor> = Arc::new(NoopRecoveryExecutor);

    let supervisor = Arc::new(Supervisor::new(
        config, store, fetcher, document_fetcher, similarity, embeddings, sink, backups, failover, recovery,
    ));

    info!("starting supervisor");
    supervisor.start().await;

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown signal received"),
        Err(err) => error!(error = %err, "failed to listen for shutdown signal"),
    }

    supervisor.stop().await;
    info!("supervisor stopped");

    Ok(())
}
