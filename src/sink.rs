//! Outbound event sink boundary: one call per notification.
//! The orchestrator supplies `dedup_key` so downstream channels can
//! collapse duplicates; the sink itself is assumed at-least-once.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::CoreResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationSeverity {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub kind: String,
    pub severity: NotificationSeverity,
    pub subject: String,
    pub body: String,
    pub tags: Vec<String>,
    pub dedup_key: String,
}

#[async_trait]
pub trait EventSink: Send + Sync {
    async fn send(&self, payload: NotificationPayload) -> CoreResult<()>;
}

/// Default/test sink: logs via `tracing` rather than delivering anywhere.
/// Delivery transport is out of scope; only a single outbound seam is
/// guaranteed.
pub struct TracingEventSink;

#[async_trait]
impl EventSink for TracingEventSink {
    async fn send(&self, payload: NotificationPayload) -> CoreResult<()> {
        match payload.severity {
            NotificationSeverity::Critical => {
                tracing::error!(kind = %payload.kind, subject = %payload.subject, dedup_key = %payload.dedup_key, "notification")
            }
            NotificationSeverity::Warning => {
                tracing::warn!(kind = %payload.kind, subject = %payload.subject, dedup_key = %payload.dedup_key, "notification")
            }
            NotificationSeverity::Info => {
                tracing::info!(kind = %payload.kind, subject = %payload.subject, dedup_key = %payload.dedup_key, "notification")
            }
        }
        Ok(())
    }
}
