//! `RegulatoryDocument`: an ingested and deduplicated feed entry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::ids::{DocumentId, SourceId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    Regulation,
    Guidance,
    Enforcement,
    Proposal,
    Announcement,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    New,
    Processed,
    Archived,
}

/// `(source_id, external_id)` uniquely identifies a document; that pair is
/// never reassigned and `content_fingerprint` is stable once set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegulatoryDocument {
    pub id: DocumentId,
    pub source_id: SourceId,
    pub external_id: String,
    pub title: String,
    pub document_type: DocumentType,
    pub status: DocumentStatus,
    pub publication_time: DateTime<Utc>,
    pub summary: String,
    pub full_text: Option<String>,
    pub url: String,
    pub topics: BTreeSet<String>,
    pub keywords: BTreeSet<String>,
    pub content_fingerprint: Option<String>,
    pub ingested_at: DateTime<Utc>,
}

impl RegulatoryDocument {
    pub fn dedup_key(&self) -> (SourceId, &str) {
        (self.source_id, self.external_id.as_str())
    }
}

/// A raw entry fetched from a feed before it becomes a `RegulatoryDocument`.
/// A tagged variant rather than an untyped map crossing the poller/pipeline
/// boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RawEntry {
    Rss {
        id: Option<String>,
        title: String,
        link: String,
        summary: String,
        published: Option<DateTime<Utc>>,
    },
    Api {
        id: Option<String>,
        title: String,
        link: String,
        body: String,
        published: Option<DateTime<Utc>>,
    },
    Scraped {
        title: String,
        link: String,
        excerpt: String,
        published: Option<DateTime<Utc>>,
    },
}

/// Common shape every `RawEntry` variant normalizes to before dedup.
pub struct NormalizedEntry {
    pub provided_id: Option<String>,
    pub title: String,
    pub link: String,
    pub summary: String,
    pub published: Option<DateTime<Utc>>,
}

impl RawEntry {
    pub fn normalize(&self) -> NormalizedEntry {
        match self {
            RawEntry::Rss {
                id,
                title,
                link,
                summary,
                published,
            } => NormalizedEntry {
                provided_id: id.clone(),
                title: title.clone(),
                link: link.clone(),
                summary: summary.clone(),
                published: *published,
            },
            RawEntry::Api {
                id,
                title,
                link,
                body,
                published,
            } => NormalizedEntry {
                provided_id: id.clone(),
                title: title.clone(),
                link: link.clone(),
                summary: body.clone(),
                published: *published,
            },
            RawEntry::Scraped {
                title,
                link,
                excerpt,
                published,
            } => NormalizedEntry {
                provided_id: None,
                title: title.clone(),
                link: link.clone(),
                summary: excerpt.clone(),
                published: *published,
            },
        }
    }
}
