//! `RegulatorySource`: a polled external regulatory feed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::SourceKind;
use crate::ids::SourceId;

/// Stable identity for an external regulatory feed. Immutable except
/// `last_polled` and `active`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegulatorySource {
    pub id: SourceId,
    pub name: String,
    pub kind: SourceKind,
    pub endpoint: String,
    pub jurisdiction: String,
    pub poll_interval_minutes: u64,
    pub active: bool,
    pub last_polled: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
}

impl RegulatorySource {
    pub fn new(
        name: impl Into<String>,
        kind: SourceKind,
        endpoint: impl Into<String>,
        jurisdiction: impl Into<String>,
        poll_interval_minutes: u64,
    ) -> Self {
        Self {
            id: SourceId::new(),
            name: name.into(),
            kind,
            endpoint: endpoint.into(),
            jurisdiction: jurisdiction.into(),
            poll_interval_minutes,
            active: true,
            last_polled: None,
            consecutive_failures: 0,
        }
    }

    pub fn record_poll_success(&mut self) {
        self.last_polled = Some(Utc::now());
        self.consecutive_failures = 0;
    }

    pub fn record_poll_failure(&mut self) {
        self.consecutive_failures += 1;
    }

    /// After enough consecutive failures the worker enters a degraded state.
    pub fn is_degraded(&self, degraded_after: u32) -> bool {
        self.consecutive_failures >= degraded_after
    }
}
