//! In-process observability: three bounded data planes (metrics, errors,
//! resources), a regression detector, and a DB query tracker.
//!
//! Grounded in the teacher's `observability/metrics.rs`/`observability/health.rs`
//! collector shape (generalized here from a no-op placeholder into real
//! ring buffers), forwarding samples into the `metrics`/`metrics-prometheus`
//! crates the teacher already depends on for external scraping. The
//! resource plane uses `sysinfo`, a dependency pulled from the wider
//! example pack (`Alb-O-xeno`, `dropbox-dTOOL`) since the teacher itself
//! has no resource-sampling code.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::future::Future;
use std::sync::OnceLock;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};

/// Closed metric-kind taxonomy (spec §4.6.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    ResponseTime,
    Throughput,
    ErrorRate,
    CpuUsage,
    MemoryUsage,
    DbQueryTime,
    CacheHitRate,
    ExternalApiTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceMetric {
    pub timestamp: DateTime<Utc>,
    pub kind: MetricKind,
    pub value: f64,
    pub unit: String,
    pub service: String,
    pub op: String,
    pub tags: Vec<(String, String)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSeverity {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub timestamp: DateTime<Utc>,
    pub id: Uuid,
    pub error_type: String,
    pub message: String,
    pub stack: Option<String>,
    pub service: String,
    pub op: String,
    pub actor: Option<String>,
    pub severity: ErrorSeverity,
    pub tags: Vec<(String, String)>,
    pub context: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorAggregate {
    pub key: String,
    pub count: u64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub affected_actors: HashSet<String>,
    pub last_stacks: VecDeque<String>,
}

const AGGREGATE_STACK_CAP: usize = 10;

fn aggregate_key(error_type: &str, service: &str, op: &str) -> String {
    format!("{error_type}:{service}:{op}")
}

/// Bounded ring buffer of per-`(service, op, kind)` samples.
#[derive(Default)]
pub struct MetricsPlane {
    ring_size: usize,
    buffers: DashMap<(String, String, MetricKind), RwLock<VecDeque<PerformanceMetric>>>,
}

impl MetricsPlane {
    pub fn new(ring_size: usize) -> Self {
        Self {
            ring_size,
            buffers: DashMap::new(),
        }
    }

    pub fn record(&self, metric: PerformanceMetric) {
        let key = (metric.service.clone(), metric.op.clone(), metric.kind);
        let buf = self
            .buffers
            .entry(key)
            .or_insert_with(|| RwLock::new(VecDeque::with_capacity(self.ring_size)));
        let mut buf = buf.write();
        if buf.len() == self.ring_size {
            buf.pop_front();
        }
        let labels = [("service", metric.service.clone()), ("op", metric.op.clone())];
        metrics::histogram!(metric_name(metric.kind), &labels).record(metric.value);
        buf.push_back(metric);
    }

    pub fn samples(&self, service: &str, op: &str, kind: MetricKind) -> Vec<PerformanceMetric> {
        self.buffers
            .get(&(service.to_string(), op.to_string(), kind))
            .map(|b| b.read().iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Rolling average over the most recent `window` samples (oldest-first
    /// buffer, so the window is the tail).
    pub fn rolling_avg(&self, service: &str, op: &str, kind: MetricKind, window: usize) -> Option<f64> {
        let samples = self.samples(service, op, kind);
        if samples.is_empty() {
            return None;
        }
        let tail: Vec<f64> = samples.iter().rev().take(window).map(|m| m.value).collect();
        Some(tail.iter().sum::<f64>() / tail.len() as f64)
    }

    /// 95th percentile over the last `window` samples, used to refresh
    /// regression baselines.
    pub fn percentile_95(&self, service: &str, op: &str, kind: MetricKind, window: usize) -> Option<f64> {
        let samples = self.samples(service, op, kind);
        if samples.is_empty() {
            return None;
        }
        let mut values: Vec<f64> = samples.iter().rev().take(window).map(|m| m.value).collect();
        values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let idx = ((values.len() as f64) * 0.95).ceil() as usize;
        let idx = idx.saturating_sub(1).min(values.len() - 1);
        Some(values[idx])
    }
}

fn metric_name(kind: MetricKind) -> &'static str {
    match kind {
        MetricKind::ResponseTime => "regulens_response_time_ms",
        MetricKind::Throughput => "regulens_throughput",
        MetricKind::ErrorRate => "regulens_error_rate",
        MetricKind::CpuUsage => "regulens_cpu_usage_pct",
        MetricKind::MemoryUsage => "regulens_memory_usage_pct",
        MetricKind::DbQueryTime => "regulens_db_query_time_ms",
        MetricKind::CacheHitRate => "regulens_cache_hit_rate",
        MetricKind::ExternalApiTime => "regulens_external_api_time_ms",
    }
}

/// Bounded ring of raw events plus count/first-seen/last-seen/actor
/// aggregates keyed `"type:service:op"`.
pub struct ErrorPlane {
    cap: usize,
    events: RwLock<VecDeque<ErrorEvent>>,
    aggregates: DashMap<String, ErrorAggregate>,
}

impl ErrorPlane {
    pub fn new(cap: usize) -> Self {
        Self {
            cap,
            events: RwLock::new(VecDeque::with_capacity(cap.min(1024))),
            aggregates: DashMap::new(),
        }
    }

    pub fn record(&self, event: ErrorEvent) {
        let key = aggregate_key(&event.error_type, &event.service, &event.op);
        {
            let mut agg = self.aggregates.entry(key.clone()).or_insert_with(|| ErrorAggregate {
                key: key.clone(),
                count: 0,
                first_seen: event.timestamp,
                last_seen: event.timestamp,
                affected_actors: HashSet::new(),
                last_stacks: VecDeque::with_capacity(AGGREGATE_STACK_CAP),
            });
            agg.count += 1;
            agg.last_seen = event.timestamp;
            if let Some(actor) = &event.actor {
                agg.affected_actors.insert(actor.clone());
            }
            if let Some(stack) = &event.stack {
                if agg.last_stacks.len() == AGGREGATE_STACK_CAP {
                    agg.last_stacks.pop_front();
                }
                agg.last_stacks.push_back(stack.clone());
            }
        }
        metrics::counter!("regulens_errors_total", &[("service", event.service.clone()), ("op", event.op.clone())])
            .increment(1);

        let mut events = self.events.write();
        if events.len() == self.cap {
            events.pop_front();
        }
        events.push_back(event);
    }

    pub fn aggregate(&self, key: &str) -> Option<ErrorAggregate> {
        self.aggregates.get(key).map(|a| a.clone())
    }

    /// Error rate: count within the last `window_seconds` / window in
    /// minutes.
    pub fn error_rate(&self, key: &str, window_seconds: i64) -> f64 {
        let now = Utc::now();
        let count = self
            .events
            .read()
            .iter()
            .filter(|e| {
                aggregate_key(&e.error_type, &e.service, &e.op) == key
                    && now.signed_duration_since(e.timestamp) <= chrono::Duration::seconds(window_seconds)
            })
            .count();
        let minutes = (window_seconds as f64 / 60.0).max(1.0 / 60.0);
        count as f64 / minutes
    }
}

/// Baseline against which a regression is detected.
#[derive(Debug, Clone, Copy)]
pub struct Baseline {
    pub value: f64,
    pub threshold_pct: f64,
}

#[derive(Debug, Clone)]
pub struct RegressionEvent {
    pub service: String,
    pub op: String,
    pub kind: MetricKind,
    pub rolling_avg: f64,
    pub baseline_value: f64,
    pub threshold_pct: f64,
    pub detected_at: DateTime<Utc>,
}

const REGRESSION_WINDOW: usize = 10;
const BASELINE_REFRESH_WINDOW: usize = 100;
const DEFAULT_THRESHOLD_PCT: f64 = 20.0;

#[derive(Default)]
pub struct RegressionDetector {
    baselines: DashMap<(String, String, MetricKind), Baseline>,
}

impl RegressionDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_baseline(&self, service: &str, op: &str, kind: MetricKind, baseline: Baseline) {
        self.baselines.insert((service.to_string(), op.to_string(), kind), baseline);
    }

    /// `avg(last 10) > baseline * (1 + threshold/100)` emits a regression.
    pub fn check(&self, metrics: &MetricsPlane, service: &str, op: &str, kind: MetricKind) -> Option<RegressionEvent> {
        let baseline = *self.baselines.get(&(service.to_string(), op.to_string(), kind))?;
        let avg = metrics.rolling_avg(service, op, kind, REGRESSION_WINDOW)?;
        if avg > baseline.value * (1.0 + baseline.threshold_pct / 100.0) {
            Some(RegressionEvent {
                service: service.to_string(),
                op: op.to_string(),
                kind,
                rolling_avg: avg,
                baseline_value: baseline.value,
                threshold_pct: baseline.threshold_pct,
                detected_at: Utc::now(),
            })
        } else {
            None
        }
    }

    /// Periodic refresh: baseline becomes the 95th percentile of the last
    /// 100 samples, keeping the previously configured threshold (or the
    /// default on first refresh).
    pub fn refresh_baseline(&self, metrics: &MetricsPlane, service: &str, op: &str, kind: MetricKind) {
        let Some(p95) = metrics.percentile_95(service, op, kind, BASELINE_REFRESH_WINDOW) else {
            return;
        };
        let threshold_pct = self
            .baselines
            .get(&(service.to_string(), op.to_string(), kind))
            .map(|b| b.threshold_pct)
            .unwrap_or(DEFAULT_THRESHOLD_PCT);
        self.set_baseline(service, op, kind, Baseline { value: p95, threshold_pct });
    }
}

/// One sample of process resource usage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceSample {
    pub timestamp: DateTime<Utc>,
    pub cpu_percent: f64,
    pub memory_rss_bytes: u64,
    pub memory_vms_bytes: u64,
    pub memory_percent: f64,
    pub io_read_bytes: u64,
    pub io_write_bytes: u64,
    pub thread_count: u32,
    pub fd_count: u32,
}

pub const CPU_ALERT_THRESHOLD: f64 = 80.0;
pub const MEMORY_ALERT_THRESHOLD: f64 = 85.0;
pub const FD_ALERT_THRESHOLD: u32 = 1000;

impl ResourceSample {
    /// Alert names for every threshold this sample breaches.
    pub fn alerts(&self) -> Vec<&'static str> {
        let mut alerts = Vec::new();
        if self.cpu_percent > CPU_ALERT_THRESHOLD {
            alerts.push("cpu_usage_high");
        }
        if self.memory_percent > MEMORY_ALERT_THRESHOLD {
            alerts.push("memory_usage_high");
        }
        if self.fd_count > FD_ALERT_THRESHOLD {
            alerts.push("fd_count_high");
        }
        alerts
    }
}

/// Samples process resource usage every 30s into a 5-minute ring (10
/// samples at the default cadence).
pub struct ResourcePlane {
    ring_len: usize,
    samples: RwLock<VecDeque<ResourceSample>>,
    system: Mutex<sysinfo::System>,
}

impl ResourcePlane {
    pub fn new(ring_len: usize) -> Self {
        Self {
            ring_len,
            samples: RwLock::new(VecDeque::with_capacity(ring_len)),
            system: Mutex::new(sysinfo::System::new_all()),
        }
    }

    pub fn sample(&self) -> ResourceSample {
        let mut system = self.system.lock();
        system.refresh_all();

        let pid = sysinfo::get_current_pid().ok();
        let (cpu_percent, memory_rss_bytes, memory_vms_bytes) = pid
            .and_then(|pid| system.process(pid))
            .map(|p| (p.cpu_usage() as f64, p.memory(), p.virtual_memory()))
            .unwrap_or((0.0, 0, 0));

        let total_memory = system.total_memory().max(1);
        let memory_percent = memory_rss_bytes as f64 / total_memory as f64 * 100.0;

        let sample = ResourceSample {
            timestamp: Utc::now(),
            cpu_percent,
            memory_rss_bytes,
            memory_vms_bytes,
            memory_percent,
            io_read_bytes: 0,
            io_write_bytes: 0,
            thread_count: thread_count(),
            fd_count: fd_count(),
        };

        let mut samples = self.samples.write();
        if samples.len() == self.ring_len {
            samples.pop_front();
        }
        samples.push_back(sample.clone());
        sample
    }

    pub fn recent(&self) -> Vec<ResourceSample> {
        self.samples.read().iter().cloned().collect()
    }
}

#[cfg(target_os = "linux")]
fn fd_count() -> u32 {
    std::fs::read_dir("/proc/self/fd")
        .map(|rd| rd.count() as u32)
        .unwrap_or(0)
}

#[cfg(not(target_os = "linux"))]
fn fd_count() -> u32 {
    0
}

#[cfg(target_os = "linux")]
fn thread_count() -> u32 {
    std::fs::read_to_string("/proc/self/status")
        .ok()
        .and_then(|status| {
            status.lines().find_map(|l| {
                l.strip_prefix("Threads:").map(|v| v.trim().parse::<u32>().unwrap_or(0))
            })
        })
        .unwrap_or(0)
}

#[cfg(not(target_os = "linux"))]
fn thread_count() -> u32 {
    0
}

/// Per-normalized-query-pattern aggregate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlowQuery {
    pub pattern: String,
    pub duration: Duration,
    pub at: DateTime<Utc>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryAggregate {
    pub pattern: String,
    pub count: u64,
    pub total: Duration,
    pub min: Duration,
    pub max: Duration,
    pub error_count: u64,
    pub slow_queries: VecDeque<SlowQuery>,
}

impl QueryAggregate {
    pub fn mean(&self) -> Duration {
        if self.count == 0 {
            Duration::ZERO
        } else {
            self.total / self.count as u32
        }
    }
}

struct QueryRegexes {
    in_clause: Regex,
    string_literal: Regex,
    positional: Regex,
    integer: Regex,
}

fn query_regexes() -> &'static QueryRegexes {
    static RE: OnceLock<QueryRegexes> = OnceLock::new();
    RE.get_or_init(|| QueryRegexes {
        in_clause: Regex::new(r"(?i)\bIN\s*\([^)]*\)").unwrap(),
        string_literal: Regex::new(r"'[^']*'").unwrap(),
        positional: Regex::new(r"\$\d+").unwrap(),
        integer: Regex::new(r"\b\d+\b").unwrap(),
    })
}

/// Normalization: string literals -> `'?'`, integers -> `?`, positional
/// placeholders -> `$?`, `IN (…)` -> `IN (?)`, uppercased. Order matters —
/// `IN (…)` and positional placeholders are collapsed before the bare
/// integer pass so their digits aren't also rewritten a second way.
/// Idempotent: normalizing an already-normalized query is the identity.
pub fn normalize_query(sql: &str) -> String {
    let re = query_regexes();
    let s = re.in_clause.replace_all(sql, "IN (?)");
    let s = re.string_literal.replace_all(&s, "'?'");
    let s = re.positional.replace_all(&s, "$?");
    let s = re.integer.replace_all(&s, "?");
    s.to_uppercase()
}

pub struct DbQueryTracker {
    slow_threshold: Duration,
    aggregates: DashMap<String, QueryAggregate>,
}

impl DbQueryTracker {
    pub fn new(slow_threshold: Duration) -> Self {
        Self {
            slow_threshold,
            aggregates: DashMap::new(),
        }
    }

    pub fn record(&self, raw_query: &str, duration: Duration, error: Option<String>) {
        let pattern = normalize_query(raw_query);
        let mut agg = self.aggregates.entry(pattern.clone()).or_insert_with(|| QueryAggregate {
            pattern: pattern.clone(),
            count: 0,
            total: Duration::ZERO,
            min: duration,
            max: duration,
            error_count: 0,
            slow_queries: VecDeque::new(),
        });
        agg.count += 1;
        agg.total += duration;
        agg.min = agg.min.min(duration);
        agg.max = agg.max.max(duration);
        if error.is_some() {
            agg.error_count += 1;
        }
        if duration >= self.slow_threshold {
            agg.slow_queries.push_back(SlowQuery {
                pattern: pattern.clone(),
                duration,
                at: Utc::now(),
                error: error.clone(),
            });
        }
        metrics::histogram!("regulens_db_query_time_ms").record(duration.as_secs_f64() * 1000.0);
    }

    pub fn aggregate(&self, pattern: &str) -> Option<QueryAggregate> {
        self.aggregates.get(pattern).map(|a| a.clone())
    }

    /// Slow-query log: every recorded slow sample across every pattern.
    pub fn slow_query_log(&self) -> Vec<SlowQuery> {
        self.aggregates
            .iter()
            .flat_map(|e| e.value().slow_queries.clone())
            .collect()
    }
}

impl Default for Baseline {
    fn default() -> Self {
        Self {
            value: 0.0,
            threshold_pct: DEFAULT_THRESHOLD_PCT,
        }
    }
}

/// Owns the three observability planes and wraps every core-dispatched
/// operation so start/end times, thrown errors, and result tags are
/// recorded uniformly.
pub struct ApmSupervisor {
    pub metrics: MetricsPlane,
    pub errors: ErrorPlane,
    pub resources: ResourcePlane,
    pub regression: RegressionDetector,
    pub db: DbQueryTracker,
}

impl ApmSupervisor {
    pub fn new(config: &crate::config::ApmConfig) -> Self {
        Self {
            metrics: MetricsPlane::new(config.metrics_ring_size),
            errors: ErrorPlane::new(config.errors_ring_size),
            resources: ResourcePlane::new(config.resource_ring_len),
            regression: RegressionDetector::new(),
            db: DbQueryTracker::new(Duration::from_secs(1)),
        }
    }

    /// Wraps a future: records response-time regardless of outcome, and on
    /// error additionally records the error event before re-raising.
    pub async fn wrap<F, T>(&self, service: &str, op: &str, actor: Option<&str>, fut: F) -> CoreResult<T>
    where
        F: Future<Output = CoreResult<T>>,
    {
        let start = Instant::now();
        let result = fut.await;
        let duration = start.elapsed();

        self.metrics.record(PerformanceMetric {
            timestamp: Utc::now(),
            kind: MetricKind::ResponseTime,
            value: duration.as_secs_f64() * 1000.0,
            unit: "ms".to_string(),
            service: service.to_string(),
            op: op.to_string(),
            tags: vec![("success".to_string(), result.is_ok().to_string())],
        });

        if let Err(err) = &result {
            self.errors.record(ErrorEvent {
                timestamp: Utc::now(),
                id: Uuid::new_v4(),
                error_type: format!("{:?}", err.kind()),
                message: err.to_string(),
                stack: None,
                service: service.to_string(),
                op: op.to_string(),
                actor: actor.map(|a| a.to_string()),
                severity: severity_for(err),
                tags: Vec::new(),
                context: serde_json::Value::Null,
            });
        }

        result
    }

    /// Runs the 30s resource-sampling dispatcher until `cancel` fires.
    pub async fn run_resource_sampler(&self, period: Duration, cancel: crate::concurrency::CancelToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(period) => {
                    let sample = self.resources.sample();
                    for alert in sample.alerts() {
                        tracing::warn!(alert, cpu = sample.cpu_percent, memory_pct = sample.memory_percent, fds = sample.fd_count, "resource alert");
                    }
                }
            }
        }
    }
}

fn severity_for(err: &CoreError) -> ErrorSeverity {
    match err {
        CoreError::Fatal(_) => ErrorSeverity::Critical,
        CoreError::Validation(_) | CoreError::Conflict(_) | CoreError::NotFound(_) => ErrorSeverity::Warning,
        CoreError::Transient(_) | CoreError::Timeout(_) | CoreError::Cancelled => ErrorSeverity::Info,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_normalization_is_idempotent() {
        let raw = "SELECT * FROM users WHERE id = 42 AND name = 'Bob' AND status IN (1, 2, 3) AND x = $1";
        let once = normalize_query(raw);
        let twice = normalize_query(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn normalization_collapses_literals_and_placeholders() {
        let normalized = normalize_query("select id from t where name = 'x' and n = 7");
        assert!(normalized.contains("'?'"));
        assert!(normalized.contains("WHERE NAME"));
        assert!(!normalized.contains('7'));
    }

    #[test]
    fn metrics_ring_is_bounded() {
        let plane = MetricsPlane::new(3);
        for i in 0..5 {
            plane.record(PerformanceMetric {
                timestamp: Utc::now(),
                kind: MetricKind::ResponseTime,
                value: i as f64,
                unit: "ms".into(),
                service: "svc".into(),
                op: "op".into(),
                tags: Vec::new(),
            });
        }
        assert_eq!(plane.samples("svc", "op", MetricKind::ResponseTime).len(), 3);
    }

    #[test]
    fn regression_detector_fires_above_threshold() {
        let metrics = MetricsPlane::new(20);
        let detector = RegressionDetector::new();
        detector.set_baseline("svc", "op", MetricKind::ResponseTime, Baseline { value: 100.0, threshold_pct: 10.0 });
        for _ in 0..10 {
            metrics.record(PerformanceMetric {
                timestamp: Utc::now(),
                kind: MetricKind::ResponseTime,
                value: 200.0,
                unit: "ms".into(),
                service: "svc".into(),
                op: "op".into(),
                tags: Vec::new(),
            });
        }
        assert!(detector.check(&metrics, "svc", "op", MetricKind::ResponseTime).is_some());
    }

    #[test]
    fn error_rate_counts_within_window() {
        let plane = ErrorPlane::new(100);
        plane.record(ErrorEvent {
            timestamp: Utc::now(),
            id: Uuid::new_v4(),
            error_type: "Transient".into(),
            message: "boom".into(),
            stack: None,
            service: "svc".into(),
            op: "op".into(),
            actor: Some("actor-1".into()),
            severity: ErrorSeverity::Info,
            tags: Vec::new(),
            context: serde_json::Value::Null,
        });
        let rate = plane.error_rate("Transient:svc:op", 300);
        assert!(rate > 0.0);
    }

    #[tokio::test]
    async fn wrap_records_error_on_failure() {
        let apm = ApmSupervisor::new(&crate::config::ApmConfig::default());
        let result: CoreResult<()> = apm
            .wrap("svc", "op", Some("actor"), async { Err(CoreError::Transient("boom".into())) })
            .await;
        assert!(result.is_err());
        let agg = apm.errors.aggregate("Transient:svc:op");
        assert!(agg.is_some());
        assert_eq!(agg.unwrap().count, 1);
    }

    proptest::proptest! {
        /// P7: normalizing an already-normalized query is the identity.
        #[test]
        fn prop_normalize_is_idempotent(sql in "(?i)(SELECT|select) [a-z*, ]{1,20} (FROM|from) [a-z_]{1,10} (WHERE|where) [a-z]{1,8} = ('[a-z0-9]{0,10}'|[0-9]{1,5})") {
            let once = normalize_query(&sql);
            let twice = normalize_query(&once);
            proptest::prop_assert_eq!(once, twice);
        }
    }
}
