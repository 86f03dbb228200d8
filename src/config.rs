//! Layered configuration: defaults, optional TOML file, `REGULENS_` env overrides.
//!
//! Built on the `config` crate with a `REGULENS_<SECTION>_<FIELD>`
//! env-override pattern, adapted to this project's closed config set.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{CoreError, CoreResult};

/// A configured regulatory source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub id: String,
    pub kind: SourceKind,
    pub endpoint: String,
    pub jurisdiction: String,
    pub poll_interval_minutes: u64,
    pub active: bool,
    #[serde(default)]
    pub auth_headers: std::collections::HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    Feed,
    HttpApi,
    Web,
}

/// Scheduler tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub max_concurrent: usize,
    pub tick_seconds: u64,
    pub default_timeout_seconds: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 8,
            tick_seconds: 15,
            default_timeout_seconds: 120,
        }
    }
}

/// Workflow settings, embedded per-definition but also carries a default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureBehavior {
    Stop,
    Continue,
    Retry,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSettings {
    pub failure_behavior: FailureBehavior,
    pub max_acceptable_failures: usize,
    pub max_duration_seconds: u64,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            failure_behavior: FailureBehavior::Stop,
            max_acceptable_failures: 0,
            max_duration_seconds: 7 * 24 * 3600,
        }
    }
}

/// A disaster-recovery objective, one per monitored component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrObjectiveConfig {
    pub component: String,
    pub rto_minutes: u64,
    pub rpo_minutes: u64,
    pub priority: u8,
    pub automated: bool,
    #[serde(default)]
    pub checks: Vec<String>,
}

/// Document pipeline tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub max_file_bytes: u64,
    pub allowed_content_types: Vec<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_file_bytes: 25 * 1024 * 1024,
            allowed_content_types: vec![
                "application/pdf".into(),
                "text/html".into(),
                "text/plain".into(),
            ],
        }
    }
}

/// Timeouts not otherwise named above.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutsConfig {
    pub http_seconds: u64,
    pub download_seconds: u64,
    pub poller_grace_seconds: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            http_seconds: 30,
            download_seconds: 60,
            poller_grace_seconds: 30,
        }
    }
}

/// APM and DR tunables that aren't entity-shaped config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApmConfig {
    pub metrics_ring_size: usize,
    pub errors_ring_size: usize,
    pub resource_sample_seconds: u64,
    pub resource_ring_len: usize,
    pub error_rate_window_seconds: u64,
    pub dr_backup_validation_minutes: u64,
}

impl Default for ApmConfig {
    fn default() -> Self {
        Self {
            metrics_ring_size: 100,
            errors_ring_size: 10_000,
            resource_sample_seconds: 30,
            resource_ring_len: 10,
            error_rate_window_seconds: 300,
            dr_backup_validation_minutes: 30,
        }
    }
}

/// Top-level configuration for the whole control plane.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CoreConfig {
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub workflow_defaults: WorkflowSettings,
    #[serde(default)]
    pub dr_objectives: Vec<DrObjectiveConfig>,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
    #[serde(default)]
    pub apm: ApmConfig,
}

impl CoreConfig {
    /// Load defaults, optionally layer a TOML file, then layer
    /// `REGULENS_`-prefixed environment variables (double-underscore
    /// separated, e.g. `REGULENS_SCHEDULER__TICK_SECONDS=10`).
    pub fn load(path: Option<&std::path::Path>) -> CoreResult<Self> {
        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&CoreConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("REGULENS")
                .separator("__")
                .try_parsing(true),
        );

        let cfg: CoreConfig = builder.build()?.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> CoreResult<()> {
        if self.scheduler.max_concurrent < 1 {
            return Err(CoreError::Validation(
                "scheduler.max_concurrent must be >= 1".into(),
            ));
        }
        if self.scheduler.tick_seconds == 0 {
            return Err(CoreError::Validation(
                "scheduler.tick_seconds must be > 0".into(),
            ));
        }
        for s in &self.sources {
            if s.poll_interval_minutes == 0 {
                return Err(CoreError::Validation(format!(
                    "source {} poll_interval_minutes must be >= 1",
                    s.id
                )));
            }
        }
        Ok(())
    }
}

pub fn as_duration_minutes(minutes: u64) -> Duration {
    Duration::from_secs(minutes * 60)
}
