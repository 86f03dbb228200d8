//! Independent polling dispatcher, one worker per active regulatory source.
//!
//! One independent dispatcher task per active `RegulatorySource`: a
//! fetch/check-updates loop, keyword-based document-type classification,
//! and content-hash id generation, built over the same dispatcher-loop shape
//! used elsewhere in this crate.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use governor::{Quota, RateLimiter};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::concurrency::CancelToken;
use crate::config::SourceConfig;
use crate::domain::{DocumentStatus, DocumentType, NormalizedEntry, RawEntry, RegulatoryDocument, RegulatorySource};
use crate::error::CoreResult;
use crate::ids::{DocumentId, SourceId};
use crate::store::TransactionalStore;

pub const DOCUMENTS_COLLECTION: &str = "regulatory_documents";
pub const SOURCES_COLLECTION: &str = "regulatory_sources";

/// Consecutive poll failures after which a source is reported degraded.
pub const DEGRADED_AFTER_FAILURES: u32 = 3;

/// Fetches and parses one source's feed into candidate entries. The only
/// collaborator the poller needs beyond the store — isolated behind a
/// trait so tests substitute a fixed feed without a real HTTP client.
#[async_trait]
pub trait FeedFetcher: Send + Sync {
    async fn fetch(&self, source: &SourceConfig) -> CoreResult<Vec<RawEntry>>;
}

/// Observes every newly inserted document so a caller can enqueue a
/// pipeline job and emit a `regulatory_change` event. The poller is
/// decoupled from both the pipeline queue and the orchestrator through this
/// trait.
#[async_trait]
pub trait IngestSink: Send + Sync {
    async fn on_new_document(&self, document: RegulatoryDocument);
}

/// Keyword-based classification table. Order matters: first matching
/// bucket wins.
pub fn classify(title: &str, summary: &str) -> DocumentType {
    let content = format!("{} {}", title, summary).to_lowercase();
    const RULES: &[(&[&str], DocumentType)] = &[
        (&["rule", "regulation", "final rule"], DocumentType::Regulation),
        (&["guidance", "advisory", "interpretation"], DocumentType::Guidance),
        (&["enforcement", "penalty", "fine", "violation"], DocumentType::Enforcement),
        (&["proposal", "comment", "draft"], DocumentType::Proposal),
    ];
    for (keywords, kind) in RULES {
        if keywords.iter().any(|k| content.contains(k)) {
            return *kind;
        }
    }
    DocumentType::Announcement
}

const TOPIC_KEYWORDS: &[(&str, &[&str])] = &[
    ("banking", &["bank", "banking", "deposit", "lending", "credit"]),
    ("securities", &["securities", "investment", "trading", "market"]),
    ("insurance", &["insurance", "insurer", "policy", "coverage"]),
    ("aml", &["anti-money laundering", "aml", "suspicious activity", "sar"]),
    ("kyc", &["know your customer", "kyc", "customer identification"]),
    ("cybersecurity", &["cyber", "security", "data breach", "privacy"]),
    ("fintech", &["fintech", "digital", "cryptocurrency", "blockchain"]),
    ("stress_testing", &["stress test", "capital", "liquidity"]),
    ("compliance", &["compliance", "regulatory", "examination"]),
];

pub fn extract_topics(title: &str, summary: &str) -> std::collections::BTreeSet<String> {
    let content = format!("{} {}", title, summary).to_lowercase();
    TOPIC_KEYWORDS
        .iter()
        .filter(|(_, keywords)| keywords.iter().any(|k| content.contains(k)))
        .map(|(topic, _)| topic.to_string())
        .collect()
}

const REGULATORY_KEYWORDS: &[&str] = &[
    "compliance", "regulation", "guidance", "enforcement", "penalty",
    "capital", "liquidity", "risk management", "stress test",
    "anti-money laundering", "know your customer", "suspicious activity",
    "cybersecurity", "data privacy", "fintech", "digital assets",
];

pub fn extract_keywords(title: &str, summary: &str) -> std::collections::BTreeSet<String> {
    let content = format!("{} {}", title, summary).to_lowercase();
    REGULATORY_KEYWORDS
        .iter()
        .filter(|k| content.contains(&k.to_lowercase()))
        .map(|k| k.to_string())
        .collect()
}

/// Prefers the feed's own id; falls back to a hash of title+link+published.
pub fn external_id_for(entry: &NormalizedEntry) -> String {
    if let Some(id) = &entry.provided_id {
        return id.clone();
    }
    let mut hasher = Sha256::new();
    hasher.update(entry.title.as_bytes());
    hasher.update(entry.link.as_bytes());
    if let Some(p) = entry.published {
        hasher.update(p.to_rfc3339().as_bytes());
    }
    hex::encode(hasher.finalize())
}

struct SourceRuntimeState {
    consecutive_failures: u32,
    last_polled: Option<chrono::DateTime<Utc>>,
}

/// One worker per active source, independently scheduled as a parallel
/// task over a cooperative dispatcher.
pub struct SourcePoller {
    store: Arc<dyn TransactionalStore>,
    fetcher: Arc<dyn FeedFetcher>,
    sink: Arc<dyn IngestSink>,
    running: Arc<AtomicBool>,
    state: Arc<DashMap<SourceId, SourceRuntimeState>>,
}

impl SourcePoller {
    pub fn new(
        store: Arc<dyn TransactionalStore>,
        fetcher: Arc<dyn FeedFetcher>,
        sink: Arc<dyn IngestSink>,
    ) -> Self {
        Self {
            store,
            fetcher,
            sink,
            running: Arc::new(AtomicBool::new(false)),
            state: Arc::new(DashMap::new()),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Idempotent: spawns one loop per active source, does nothing if
    /// already running.
    pub fn start(
        &self,
        sources: Vec<(SourceId, SourceConfig)>,
        cancel: CancelToken,
    ) -> Vec<tokio::task::JoinHandle<()>> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Vec::new();
        }
        sources
            .into_iter()
            .filter(|(_, cfg)| cfg.active)
            .map(|(id, cfg)| {
                let store = self.store.clone();
                let fetcher = self.fetcher.clone();
                let sink = self.sink.clone();
                let state = self.state.clone();
                let token = cancel.child_token();
                state.insert(
                    id,
                    SourceRuntimeState {
                        consecutive_failures: 0,
                        last_polled: None,
                    },
                );
                tokio::spawn(async move {
                    worker_loop(id, cfg, store, fetcher, sink, state, token).await;
                })
            })
            .collect()
    }

    /// Idempotent; returns once all workers observe cancellation or the
    /// grace period elapses.
    pub async fn stop(&self, cancel: &CancelToken, grace: Duration) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        cancel.cancel();
        tokio::time::sleep(grace.min(Duration::from_millis(50))).await;
    }

    pub fn consecutive_failures(&self, source_id: SourceId) -> u32 {
        self.state
            .get(&source_id)
            .map(|s| s.consecutive_failures)
            .unwrap_or(0)
    }

    pub fn is_degraded(&self, source_id: SourceId) -> bool {
        self.consecutive_failures(source_id) >= DEGRADED_AFTER_FAILURES
    }
}

async fn worker_loop(
    source_id: SourceId,
    cfg: SourceConfig,
    store: Arc<dyn TransactionalStore>,
    fetcher: Arc<dyn FeedFetcher>,
    sink: Arc<dyn IngestSink>,
    state: Arc<DashMap<SourceId, SourceRuntimeState>>,
    cancel: CancelToken,
) {
    let interval = Duration::from_secs(cfg.poll_interval_minutes * 60);
    // Enforces the source's configured poll interval as a hard minimum
    // between fetches, independent of how long each poll cycle itself took.
    // A fresh limiter admits its first check immediately, so the first poll
    // still fires without delay.
    let limiter = Quota::with_period(interval).map(RateLimiter::direct);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = async {
                match &limiter {
                    Some(limiter) => {
                        while limiter.check().is_err() {
                            tokio::time::sleep(Duration::from_millis(100)).await;
                        }
                    }
                    None => tokio::time::sleep(interval).await,
                }
            } => {}
        }

        tokio::select! {
            _ = cancel.cancelled() => return,
            result = poll_once(source_id, &cfg, &store, &fetcher, &sink) => {
                match result {
                    Ok(_) => {
                        if let Some(mut s) = state.get_mut(&source_id) {
                            s.consecutive_failures = 0;
                            s.last_polled = Some(Utc::now());
                        }
                    }
                    Err(err) => {
                        tracing::warn!(source = %cfg.id, error = %err, "poll cycle failed");
                        if let Some(mut s) = state.get_mut(&source_id) {
                            s.consecutive_failures += 1;
                            if s.consecutive_failures >= DEGRADED_AFTER_FAILURES {
                                tracing::error!(source = %cfg.id, failures = s.consecutive_failures, "source degraded");
                            }
                        }
                    }
                }
            }
        }
    }
}

/// One poll cycle: fetch, parse, dedup insert-if-absent,
/// emit for each newly inserted document. Entries are processed in feed
/// order so the first-insert-wins tie-break is reproducible per feed.
async fn poll_once(
    source_id: SourceId,
    cfg: &SourceConfig,
    store: &Arc<dyn TransactionalStore>,
    fetcher: &Arc<dyn FeedFetcher>,
    sink: &Arc<dyn IngestSink>,
) -> CoreResult<usize> {
    let entries = fetcher.fetch(cfg).await?;
    let mut inserted = 0;

    for raw in entries {
        let normalized = raw.normalize();
        let external_id = external_id_for(&normalized);
        let doc_type = classify(&normalized.title, &normalized.summary);
        let document = RegulatoryDocument {
            id: DocumentId::new(),
            source_id,
            external_id: external_id.clone(),
            title: normalized.title.clone(),
            document_type: doc_type,
            status: DocumentStatus::New,
            publication_time: normalized.published.unwrap_or_else(Utc::now),
            summary: normalized.summary.clone(),
            full_text: None,
            url: normalized.link.clone(),
            topics: extract_topics(&normalized.title, &normalized.summary),
            keywords: extract_keywords(&normalized.title, &normalized.summary),
            content_fingerprint: None,
            ingested_at: Utc::now(),
        };

        let dedup_key = format!("{}:{}", source_id, external_id);
        let row = serde_json::to_value(&document)?;
        let newly_inserted = store
            .insert_if_absent(DOCUMENTS_COLLECTION, &dedup_key, row)
            .await?;

        if newly_inserted {
            inserted += 1;
            sink.on_new_document(document).await;
        }
    }

    Ok(inserted)
}
