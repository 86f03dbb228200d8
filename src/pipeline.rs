//! Document ingestion pipeline: content sniffing, text cleaning and
//! normalization, metadata extraction, fingerprinting.
//!
//! A deterministic, dependency-free text extractor rather than a full
//! PDF/DOCX/XLSX library stack, since OCR/format-parsing fidelity is
//! explicitly out of scope.

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::OnceLock;

use crate::embeddings::EmbeddingProvider;
use crate::error::{CoreError, CoreResult};
use crate::ids::DocumentId;
use crate::similarity::SimilarityIndex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Pdf,
    Html,
    Text,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ExtractedMetadata {
    pub extracted_dates: Vec<String>,
    pub extracted_emails: Vec<String>,
    pub extracted_phones: Vec<String>,
    pub regulatory_references: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResult {
    pub success: bool,
    pub text: String,
    pub metadata: ExtractedMetadata,
    pub fingerprint: String,
    pub content_type: Option<ContentType>,
    pub error: Option<String>,
}

pub enum DocumentSource {
    Bytes(Vec<u8>),
    Path(PathBuf),
    Url(String),
}

/// Downloads a document body given its URL. The pipeline's only network
/// collaborator, isolated behind a trait the same way the poller isolates
/// `FeedFetcher` — so tests can substitute a fixed body without a real
/// HTTP client.
#[async_trait]
pub trait DocumentFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> CoreResult<Vec<u8>>;
}

const DATE_CAP: usize = 10;
const EMAIL_CAP: usize = 5;
const PHONE_CAP: usize = 5;
const REFERENCE_CAP: usize = 10;

fn regexes() -> &'static Regexes {
    static RE: OnceLock<Regexes> = OnceLock::new();
    RE.get_or_init(Regexes::compile)
}

struct Regexes {
    whitespace: Regex,
    blank_lines: Regex,
    paginator: Regex,
    trailing_spaces_tabs: Regex,
    date_numeric_mdy: Regex,
    date_numeric_ymd: Regex,
    date_month_name: Regex,
    email: Regex,
    phone: Regex,
    regulatory_reference: Regex,
    html_tag: Regex,
    html_script: Regex,
    html_style: Regex,
}

impl Regexes {
    fn compile() -> Self {
        Self {
            whitespace: Regex::new(r"\s+").unwrap(),
            blank_lines: Regex::new(r"\n\s*\n\s*\n+").unwrap(),
            paginator: Regex::new(r"(?m)^Page \d+ of \d+$|^\d+\s*$").unwrap(),
            trailing_spaces_tabs: Regex::new(r"[ \t]+").unwrap(),
            date_numeric_mdy: Regex::new(r"\b\d{1,2}[/-]\d{1,2}[/-]\d{4}\b").unwrap(),
            date_numeric_ymd: Regex::new(r"\b\d{4}[/-]\d{1,2}[/-]\d{1,2}\b").unwrap(),
            date_month_name: Regex::new(
                r"(?i)\b(?:January|February|March|April|May|June|July|August|September|October|November|December)\s+\d{1,2},?\s+\d{4}\b",
            )
            .unwrap(),
            email: Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").unwrap(),
            phone: Regex::new(r"\b(?:\+?1[-.\s]?)?\(?[0-9]{3}\)?[-.\s]?[0-9]{3}[-.\s]?[0-9]{4}\b")
                .unwrap(),
            regulatory_reference: Regex::new(
                r"(?i)\b(?:Section|Rule|Part|Article|Regulation)\s+\d+[A-Za-z]?\b",
            )
            .unwrap(),
            html_tag: Regex::new(r"(?s)<[^>]+>").unwrap(),
            html_script: Regex::new(r"(?is)<script[^>]*>.*?</script>").unwrap(),
            html_style: Regex::new(r"(?is)<style[^>]*>.*?</style>").unwrap(),
        }
    }
}

/// Declared type → magic-byte sniff → fallback text.
pub fn sniff_content_type(bytes: &[u8], declared: Option<ContentType>) -> ContentType {
    if let Some(d) = declared {
        return d;
    }
    if bytes.starts_with(b"%PDF-") {
        return ContentType::Pdf;
    }
    let head = String::from_utf8_lossy(&bytes[..bytes.len().min(1000)]).to_lowercase();
    if ["<html", "<head", "<body", "<!doctype html"]
        .iter()
        .any(|tag| head.contains(tag))
    {
        return ContentType::Html;
    }
    ContentType::Text
}

fn extract_text(bytes: &[u8], content_type: ContentType) -> String {
    let raw = String::from_utf8_lossy(bytes).to_string();
    match content_type {
        ContentType::Html => {
            let re = regexes();
            let no_script = re.html_script.replace_all(&raw, "");
            let no_style = re.html_style.replace_all(&no_script, "");
            re.html_tag.replace_all(&no_style, "").to_string()
        }
        // A real PDF extractor is out of scope; bytes after the header are
        // treated as raw text, a regex fallback for unparseable PDFs.
        ContentType::Pdf | ContentType::Text => raw,
    }
}

/// Text normalization, applied to every successful extraction.
pub fn normalize_text(text: &str) -> String {
    let re = regexes();
    let text = text.replace('\0', "");
    let text = text.replace("\r\n", "\n").replace('\r', "\n");
    let text = re.whitespace.replace_all(&text, " ").to_string();
    let text = re.blank_lines.replace_all(&text, "\n\n").to_string();
    let text = re.paginator.replace_all(&text, "").to_string();
    let text = re.trailing_spaces_tabs.replace_all(&text, " ").to_string();
    text.trim().to_string()
}

fn dedup_capped(values: impl Iterator<Item = String>, cap: usize) -> Vec<String> {
    let mut seen = std::collections::BTreeSet::new();
    let mut out = Vec::new();
    for v in values {
        if seen.insert(v.clone()) {
            out.push(v);
            if out.len() == cap {
                break;
            }
        }
    }
    out
}

/// Metadata extraction, each capped to prevent unbounded memory.
pub fn extract_metadata(text: &str) -> ExtractedMetadata {
    let re = regexes();
    let dates = re
        .date_numeric_mdy
        .find_iter(text)
        .chain(re.date_numeric_ymd.find_iter(text))
        .chain(re.date_month_name.find_iter(text))
        .map(|m| m.as_str().to_string());

    ExtractedMetadata {
        extracted_dates: dedup_capped(dates, DATE_CAP),
        extracted_emails: dedup_capped(
            re.email.find_iter(text).map(|m| m.as_str().to_string()),
            EMAIL_CAP,
        ),
        extracted_phones: dedup_capped(
            re.phone.find_iter(text).map(|m| m.as_str().to_string()),
            PHONE_CAP,
        ),
        regulatory_references: dedup_capped(
            re.regulatory_reference
                .find_iter(text)
                .map(|m| m.as_str().to_string()),
            REFERENCE_CAP,
        ),
    }
}

pub fn fingerprint(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// `process()` never fails the pipeline loop: unrecoverable errors return
/// `success=false` with error metadata rather than propagating.
pub fn process(
    source: DocumentSource,
    declared_content_type: Option<ContentType>,
    max_file_bytes: u64,
) -> PipelineResult {
    let bytes = match source {
        DocumentSource::Bytes(bytes) => bytes,
        // `process` is the pure, deterministic byte-processing core; callers
        // with a `Path`/`Url` source resolve it to bytes through
        // `fetch_and_process` first.
        DocumentSource::Path(_) | DocumentSource::Url(_) => {
            return PipelineResult {
                success: false,
                text: String::new(),
                metadata: ExtractedMetadata::default(),
                fingerprint: String::new(),
                content_type: None,
                error: Some("process() requires DocumentSource::Bytes; use fetch_and_process for Path/Url".into()),
            };
        }
    };

    if bytes.len() as u64 > max_file_bytes {
        return PipelineResult {
            success: false,
            text: String::new(),
            metadata: ExtractedMetadata::default(),
            fingerprint: fingerprint(&bytes),
            content_type: None,
            error: Some(format!(
                "input of {} bytes exceeds max_file_bytes={}",
                bytes.len(),
                max_file_bytes
            )),
        };
    }

    let content_type = sniff_content_type(&bytes, declared_content_type);
    let raw_text = extract_text(&bytes, content_type);
    let text = normalize_text(&raw_text);
    let metadata = extract_metadata(&text);

    PipelineResult {
        success: true,
        text,
        metadata,
        fingerprint: fingerprint(&bytes),
        content_type: Some(content_type),
        error: None,
    }
}

/// Resolves a `Path`/`Url` source to bytes (reading the filesystem or
/// calling the fetcher) and then runs the same deterministic `process()`
/// core. A failed fetch is reported the same way `process()` reports an
/// oversized input: `success=false` with a structured error, never a
/// propagated exception.
pub async fn fetch_and_process(
    source: DocumentSource,
    fetcher: &dyn DocumentFetcher,
    declared_content_type: Option<ContentType>,
    max_file_bytes: u64,
) -> PipelineResult {
    let bytes = match source {
        DocumentSource::Bytes(bytes) => Ok(bytes),
        DocumentSource::Path(path) => tokio::fs::read(&path)
            .await
            .map_err(|err| format!("failed to read {}: {err}", path.display())),
        DocumentSource::Url(url) => fetcher
            .fetch(&url)
            .await
            .map_err(|err| format!("failed to fetch {url}: {err}")),
    };
    match bytes {
        Ok(bytes) => process(DocumentSource::Bytes(bytes), declared_content_type, max_file_bytes),
        Err(error) => PipelineResult {
            success: false,
            text: String::new(),
            metadata: ExtractedMetadata::default(),
            fingerprint: String::new(),
            content_type: None,
            error: Some(error),
        },
    }
}

/// Wires a successful `process()` result into the similarity index. The
/// pipeline is the index's only writer and never reads from it.
pub struct DocumentIndexer {
    embeddings: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn SimilarityIndex>,
}

impl DocumentIndexer {
    pub fn new(embeddings: Arc<dyn EmbeddingProvider>, index: Arc<dyn SimilarityIndex>) -> Self {
        Self { embeddings, index }
    }

    pub async fn index(
        &self,
        document_id: DocumentId,
        result: &PipelineResult,
        extra_payload: HashMap<String, serde_json::Value>,
    ) -> CoreResult<()> {
        if !result.success {
            return Err(CoreError::Validation(
                "cannot index a failed pipeline result".into(),
            ));
        }
        let vector = self.embeddings.embed(&result.text).await?;
        let excerpt: String = result.text.chars().take(500).collect();
        let mut payload = serde_json::to_value(&result.metadata)?;
        if let Some(obj) = payload.as_object_mut() {
            for (k, v) in extra_payload {
                obj.insert(k, v);
            }
        }
        self.index.upsert(document_id, vector, payload, excerpt).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_depends_only_on_bytes() {
        let a = process(DocumentSource::Bytes(b"hello world".to_vec()), None, 1024);
        let b = process(DocumentSource::Bytes(b"hello world".to_vec()), None, 1024);
        assert_eq!(a.fingerprint, b.fingerprint);
        assert_eq!(a.text, b.text);
    }

    #[test]
    fn oversized_input_rejected_without_partial_ingest() {
        let result = process(DocumentSource::Bytes(vec![0u8; 100]), None, 10);
        assert!(!result.success);
        assert!(result.text.is_empty());
    }

    struct FixedDocumentFetcher(Vec<u8>);

    #[async_trait]
    impl DocumentFetcher for FixedDocumentFetcher {
        async fn fetch(&self, _url: &str) -> CoreResult<Vec<u8>> {
            Ok(self.0.clone())
        }
    }

    struct FailingDocumentFetcher;

    #[async_trait]
    impl DocumentFetcher for FailingDocumentFetcher {
        async fn fetch(&self, _url: &str) -> CoreResult<Vec<u8>> {
            Err(CoreError::Transient("connection refused".into()))
        }
    }

    #[tokio::test]
    async fn fetch_and_process_downloads_url_body() {
        let fetcher = FixedDocumentFetcher(b"hello from the network".to_vec());
        let result = fetch_and_process(
            DocumentSource::Url("https://example.invalid/doc".into()),
            &fetcher,
            None,
            1024,
        )
        .await;
        assert!(result.success);
        assert_eq!(result.text, "hello from the network");
    }

    #[tokio::test]
    async fn fetch_and_process_reports_failed_fetch_without_partial_ingest() {
        let result = fetch_and_process(
            DocumentSource::Url("https://example.invalid/doc".into()),
            &FailingDocumentFetcher,
            None,
            1024,
        )
        .await;
        assert!(!result.success);
        assert!(result.text.is_empty());
        assert!(result.error.is_some());
    }

    #[test]
    fn html_is_sniffed_and_stripped() {
        let html = b"<html><body><script>evil()</script><p>Hello   World</p></body></html>".to_vec();
        let result = process(DocumentSource::Bytes(html), None, 1024 * 1024);
        assert_eq!(result.content_type, Some(ContentType::Html));
        assert!(result.text.contains("Hello World"));
        assert!(!result.text.contains("evil"));
    }

    #[test]
    fn metadata_caps_are_enforced() {
        let mut text = String::new();
        for i in 0..20 {
            text.push_str(&format!("Section {} ", i));
        }
        let metadata = extract_metadata(&text);
        assert!(metadata.regulatory_references.len() <= REFERENCE_CAP);
    }

    #[test]
    fn blank_lines_collapse_to_two() {
        let text = "a\n\n\n\n\nb";
        assert_eq!(normalize_text(text), "a\n\nb");
    }

    proptest::proptest! {
        /// P6: fingerprint and normalized text depend only on the raw bytes.
        #[test]
        fn prop_fingerprint_and_text_stable(bytes in proptest::collection::vec(proptest::prelude::any::<u8>(), 0..2048)) {
            let a = process(DocumentSource::Bytes(bytes.clone()), None, 1024 * 1024);
            let b = process(DocumentSource::Bytes(bytes), None, 1024 * 1024);
            proptest::prop_assert_eq!(a.fingerprint, b.fingerprint);
            proptest::prop_assert_eq!(a.text, b.text);
        }
    }
}
