//! Regulatory-compliance monitoring and workflow control plane.
//!
//! One module per subsystem: source polling (`poller`), document ingestion
//! (`pipeline`), background scheduling (`scheduler`), workflow execution
//! (`workflow`), event routing and impact assessment (`orchestrator`),
//! observability and disaster-recovery probing (`apm`, `dr`), composed by
//! `supervisor` and exposed through the typed operations table in `admin`.

pub mod admin;
pub mod apm;
pub mod concurrency;
pub mod config;
pub mod domain;
pub mod dr;
pub mod embeddings;
pub mod error;
pub mod ids;
pub mod orchestrator;
pub mod pipeline;
pub mod poller;
pub mod scheduler;
pub mod similarity;
pub mod sink;
pub mod store;
pub mod supervisor;
pub mod workflow;

pub use error::{CoreError, CoreResult, ErrorKind};
pub use supervisor::Supervisor;
