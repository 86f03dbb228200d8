//! Benchmarks for the orchestrator's keyword-weighted impact assessor:
//! the cost of `assess_impact` over documents of varying length, and of
//! a forced re-assessment versus the cached-hit fast path.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use regulens_core::domain::{DocumentStatus, DocumentType, RegulatoryDocument};
use regulens_core::embeddings::HashEmbeddingProvider;
use regulens_core::ids::{DocumentId, SourceId};
use regulens_core::orchestrator::Orchestrator;
use regulens_core::similarity::InMemorySimilarityIndex;
use regulens_core::sink::TracingEventSink;
use regulens_core::store::MemoryStore;
use regulens_core::workflow::WorkflowEngine;
use std::sync::Arc;

const SHORT_BODY: &str = "This rule updates reporting requirements for covered entities.";

fn long_body(paragraphs: usize) -> String {
    let paragraph = "This rule is effective immediately for all banks and financial institutions. \
        Covered entities must update policies, procedures, and reporting systems. \
        Institutions must comply by January 15, 2027 with the new capital requirements \
        and risk management documentation. Training, technology upgrades, and operational \
        expenses are expected across compliance, risk, and technology business units.";
    std::iter::repeat(paragraph).take(paragraphs).collect::<Vec<_>>().join("\n\n")
}

fn build_orchestrator() -> Orchestrator {
    let store = Arc::new(MemoryStore::new());
    let sink = Arc::new(TracingEventSink);
    let engine = Arc::new(WorkflowEngine::new(store.clone(), sink.clone()));
    let similarity = Arc::new(InMemorySimilarityIndex::new());
    let embeddings = Arc::new(HashEmbeddingProvider::new(64));
    Orchestrator::new(store, engine, sink, similarity, embeddings)
}

fn build_document(full_text: Option<String>) -> RegulatoryDocument {
    let now = chrono::Utc::now();
    RegulatoryDocument {
        id: DocumentId::new(),
        source_id: SourceId::new(),
        external_id: "bench-doc".to_string(),
        title: "Updated capital requirements for large banks".to_string(),
        document_type: DocumentType::Regulation,
        status: DocumentStatus::Processed,
        publication_time: now,
        summary: "Summary of the rule change.".to_string(),
        full_text,
        url: "https://example.invalid/rule".to_string(),
        topics: Default::default(),
        keywords: Default::default(),
        content_fingerprint: None,
        ingested_at: now,
    }
}

fn bench_assess_impact_by_length(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("assess_impact_by_length");

    for paragraphs in [0usize, 1, 5, 20] {
        let body = if paragraphs == 0 {
            SHORT_BODY.to_string()
        } else {
            long_body(paragraphs)
        };
        group.throughput(Throughput::Bytes(body.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(paragraphs), &body, |b, body| {
            b.to_async(&runtime).iter(|| async {
                let orchestrator = build_orchestrator();
                let document = build_document(Some(body.clone()));
                let result = orchestrator.assess_impact(black_box(&document), true).await;
                black_box(result.unwrap())
            });
        });
    }

    group.finish();
}

fn bench_cached_vs_forced(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("assess_impact_cache");

    group.bench_function("cache_hit", |b| {
        let orchestrator = build_orchestrator();
        let document = build_document(Some(long_body(5)));
        runtime.block_on(orchestrator.assess_impact(&document, true)).unwrap();
        b.to_async(&runtime).iter(|| async {
            black_box(orchestrator.assess_impact(black_box(&document), false).await.unwrap())
        });
    });

    group.bench_function("forced_reassessment", |b| {
        let orchestrator = build_orchestrator();
        let document = build_document(Some(long_body(5)));
        runtime.block_on(orchestrator.assess_impact(&document, true)).unwrap();
        b.to_async(&runtime).iter(|| async {
            black_box(orchestrator.assess_impact(black_box(&document), true).await.unwrap())
        });
    });

    group.finish();
}

criterion_group!(benches, bench_assess_impact_by_length, bench_cached_vs_forced);
criterion_main!(benches);
