use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use refmark_core::error::AppError;
use serde::{Deserialize, Serialize};

/// Raw extracted text of one source document, as returned by the external
/// document store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceContent {
    pub content: String,
}

/// External document content provider. Any failure (network, not-found)
/// surfaces as `SOURCE_UNAVAILABLE`; the aligner is never invoked without
/// content.
pub trait ContentProvider {
    fn fetch_content(&self, doc_type: &str, doc_id: &str) -> Result<SourceContent, AppError>;
}

/// One referenced source within a chat answer: the source document id and
/// the sentences the answer claims were drawn from it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeReference {
    pub source_id: String,
    pub original_sentences: Vec<String>,
}

/// Reference data supplied per chat answer: node name to its references.
/// Node names are opaque here and not validated.
pub type ReferenceMap = BTreeMap<String, Vec<NodeReference>>;

fn validate_identity(doc_type: &str, doc_id: &str) -> Result<(), AppError> {
    for (label, value) in [("doc_type", doc_type), ("doc_id", doc_id)] {
        if value.is_empty() {
            return Err(
                AppError::new("INPUT_INVALID", "Document identity part is empty")
                    .with_details(label.to_string()),
            );
        }
        if value.contains('/') || value.contains("..") || value.chars().any(char::is_whitespace) {
            return Err(AppError::new(
                "INPUT_INVALID",
                "Document identity part contains forbidden characters",
            )
            .with_details(format!("{label}={value}")));
        }
    }
    Ok(())
}

/// HTTP client for the workspace document store. Strictly limited to
/// `127.0.0.1`, matching the local-only posture of the app backend.
#[derive(Debug, Clone)]
pub struct HttpContentProvider {
    base_url: String,
}

impl HttpContentProvider {
    pub fn new(base_url: &str) -> Result<Self, AppError> {
        let base_url = base_url.trim_end_matches('/').to_string();
        validate_base_url(&base_url)?;
        Ok(Self { base_url })
    }
}

fn validate_base_url(base_url: &str) -> Result<(), AppError> {
    if base_url == "http://127.0.0.1" {
        return Ok(());
    }
    let err = || {
        AppError::new(
            "REMOTE_NOT_ALLOWED",
            "Document store base URL must be localhost (127.0.0.1)",
        )
        .with_details(format!("base_url={base_url}"))
    };
    let port = base_url.strip_prefix("http://127.0.0.1:").ok_or_else(err)?;
    let port: u16 = port.parse().map_err(|_| err())?;
    if port == 0 {
        return Err(err());
    }
    Ok(())
}

impl ContentProvider for HttpContentProvider {
    fn fetch_content(&self, doc_type: &str, doc_id: &str) -> Result<SourceContent, AppError> {
        validate_identity(doc_type, doc_id)?;

        let url = format!("{}/documents/{doc_type}/{doc_id}", self.base_url);
        let resp = ureq::get(&url)
            .timeout(Duration::from_millis(2000))
            .call();

        match resp {
            Ok(r) if r.status() == 200 => r.into_json::<SourceContent>().map_err(|e| {
                AppError::new(
                    "SOURCE_UNAVAILABLE",
                    "Document content response was not valid JSON",
                )
                .with_details(e.to_string())
            }),
            Ok(r) => Err(AppError::new(
                "SOURCE_UNAVAILABLE",
                "Document store returned an error status",
            )
            .with_details(format!("url={url}; status={}", r.status()))),
            Err(e) => Err(AppError::new(
                "SOURCE_UNAVAILABLE",
                "Failed to reach document store on 127.0.0.1",
            )
            .with_details(e.to_string())
            .with_retryable(true)),
        }
    }
}

/// Directory-backed provider: reads `<root>/<doc_type>/<doc_id>.txt`.
/// Used by tests and offline sessions.
#[derive(Debug, Clone)]
pub struct FsContentProvider {
    root: PathBuf,
}

impl FsContentProvider {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

impl ContentProvider for FsContentProvider {
    fn fetch_content(&self, doc_type: &str, doc_id: &str) -> Result<SourceContent, AppError> {
        validate_identity(doc_type, doc_id)?;

        let path = self.root.join(doc_type).join(format!("{doc_id}.txt"));
        let content = fs::read_to_string(&path).map_err(|e| {
            AppError::new("SOURCE_UNAVAILABLE", "Failed to read document content")
                .with_details(format!("path={}; err={}", path.display(), e))
        })?;
        Ok(SourceContent { content })
    }
}
