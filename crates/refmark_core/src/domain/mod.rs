use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Which fallback tier of the aligner produced a match.
///
/// Tiers are ordered by strictness: literal substring, whitespace-normalized
/// substring, punctuation/case-insensitive fuzzy substring.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    Exact,
    Partial,
    Flexible,
}

/// A character span in a document's raw text believed to correspond to a
/// reference sentence.
///
/// `start`/`end` are byte offsets into the original, un-normalized UTF-8
/// content. `end` is exclusive. Offsets always fall on `char` boundaries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MatchRange {
    pub start: usize,
    pub end: usize,
    pub text: String,
    pub kind: MatchKind,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HighlightOrigin {
    /// Created from a manual text selection; persisted.
    User,
    /// Derived from alignment results; session-scoped, never persisted.
    Auto,
}

/// One colored highlight range over a document.
///
/// Invariant: within one store instance, no two highlights overlap.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Highlight {
    pub id: String,
    pub start: usize,
    pub end: usize,
    pub text: String,
    pub color: String,
    pub origin: HighlightOrigin,
    pub created_at: String, // RFC3339
}

/// Composite identity that scopes all persistence and lookup:
/// `(doc_type, doc_id)`, e.g. `("pdf", "42")` or `("memo", "7")`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HighlightKey {
    pub doc_type: String,
    pub doc_id: String,
}

pub const STORAGE_KEY_PREFIX: &str = "highlight:";

impl HighlightKey {
    pub fn new(doc_type: impl Into<String>, doc_id: impl Into<String>) -> Self {
        Self {
            doc_type: doc_type.into(),
            doc_id: doc_id.into(),
        }
    }

    /// Fallback identity for documents without a stable id: the raw URL
    /// becomes the id under the reserved "url" type.
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            doc_type: "url".to_string(),
            doc_id: url.into(),
        }
    }

    /// String form used by the key-value persistence port.
    pub fn storage_key(&self) -> String {
        format!("{}{}:{}", STORAGE_KEY_PREFIX, self.doc_type, self.doc_id)
    }

    /// Inverse of `storage_key`. Returns `None` for keys outside the
    /// highlight namespace.
    pub fn parse(storage_key: &str) -> Option<Self> {
        let rest = storage_key.strip_prefix(STORAGE_KEY_PREFIX)?;
        let (doc_type, doc_id) = rest.split_once(':')?;
        if doc_type.is_empty() || doc_id.is_empty() {
            return None;
        }
        Some(Self::new(doc_type, doc_id))
    }
}

/// One contiguous slice of document content produced for rendering:
/// either plain (`highlight: None`) or covered by exactly one highlight.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Segment {
    pub text: String,
    pub highlight: Option<Highlight>,
}

/// Fixed color for auto highlights from the exact tier.
pub const AUTO_COLOR_EXACT: &str = "#ffe082";
/// Fixed color shared by the partial and flexible tiers.
pub const AUTO_COLOR_FUZZY: &str = "#b2dfdb";

pub fn auto_color(kind: MatchKind) -> &'static str {
    match kind {
        MatchKind::Exact => AUTO_COLOR_EXACT,
        MatchKind::Partial | MatchKind::Flexible => AUTO_COLOR_FUZZY,
    }
}

/// Half-open interval overlap: `[a_start, a_end)` vs `[b_start, b_end)`.
pub fn spans_overlap(a_start: usize, a_end: usize, b_start: usize, b_end: usize) -> bool {
    a_start.max(b_start) < a_end.min(b_end)
}

/// Deterministic fingerprint id for a user highlight.
pub fn user_highlight_id(key: &HighlightKey, start: usize, end: usize, created_at: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.storage_key().as_bytes());
    hasher.update(b"|");
    hasher.update(start.to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(end.to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(created_at.as_bytes());
    let digest = hasher.finalize();
    format!("hl-{}", &hex::encode(digest)[..16])
}

/// Session-scoped id for an auto highlight. The `auto-` prefix keeps the
/// two id namespaces visibly distinct; the id is never persisted.
pub fn auto_highlight_id(ordinal: usize) -> String {
    format!("auto-{ordinal}")
}
