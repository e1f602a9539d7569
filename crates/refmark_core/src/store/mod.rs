use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;

use rusqlite::{params, Connection, OptionalExtension};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::domain::{
    auto_color, auto_highlight_id, spans_overlap, user_highlight_id, Highlight, HighlightKey,
    HighlightOrigin, MatchRange, Segment,
};
use crate::error::{AppError, StoreWarning};

/// Injected key-value persistence port. Any store satisfying this contract
/// can back user highlights; the SQLite implementation below is the default.
pub trait HighlightPersistence {
    fn get(&self, key: &HighlightKey) -> Result<Option<Vec<Highlight>>, AppError>;
    fn set(&self, key: &HighlightKey, highlights: &[Highlight]) -> Result<(), AppError>;
    fn delete(&self, key: &HighlightKey) -> Result<(), AppError>;
    fn list_keys(&self) -> Result<Vec<HighlightKey>, AppError>;
}

// Shared handles satisfy the port too; tests keep one to inspect storage
// after the store has taken ownership of its copy.
impl<T: HighlightPersistence + ?Sized> HighlightPersistence for std::rc::Rc<T> {
    fn get(&self, key: &HighlightKey) -> Result<Option<Vec<Highlight>>, AppError> {
        (**self).get(key)
    }

    fn set(&self, key: &HighlightKey, highlights: &[Highlight]) -> Result<(), AppError> {
        (**self).set(key, highlights)
    }

    fn delete(&self, key: &HighlightKey) -> Result<(), AppError> {
        (**self).delete(key)
    }

    fn list_keys(&self) -> Result<Vec<HighlightKey>, AppError> {
        (**self).list_keys()
    }
}

/// SQLite-backed persistence: one row per document key, JSON payload.
pub struct SqliteHighlightPersistence {
    conn: Connection,
}

impl SqliteHighlightPersistence {
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }

    pub fn into_connection(self) -> Connection {
        self.conn
    }
}

impl HighlightPersistence for SqliteHighlightPersistence {
    fn get(&self, key: &HighlightKey) -> Result<Option<Vec<Highlight>>, AppError> {
        let payload: Option<String> = self
            .conn
            .query_row(
                "SELECT payload FROM highlight_sets WHERE key = ?1",
                [key.storage_key()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| {
                AppError::new("PERSIST_READ_FAILED", "Failed to read highlight set")
                    .with_details(format!("key={}; err={}", key.storage_key(), e))
            })?;

        match payload {
            None => Ok(None),
            Some(p) => serde_json::from_str(&p).map(Some).map_err(|e| {
                AppError::new("PERSIST_DECODE_FAILED", "Failed to decode highlight set")
                    .with_details(format!("key={}; err={}", key.storage_key(), e))
            }),
        }
    }

    fn set(&self, key: &HighlightKey, highlights: &[Highlight]) -> Result<(), AppError> {
        let payload = serde_json::to_string(highlights).map_err(|e| {
            AppError::new("PERSIST_ENCODE_FAILED", "Failed to encode highlight set")
                .with_details(e.to_string())
        })?;

        self.conn
            .execute(
                r#"
        INSERT INTO highlight_sets(key, payload, updated_at)
        VALUES (?1, ?2, strftime('%Y-%m-%dT%H:%M:%fZ','now'))
        ON CONFLICT(key) DO UPDATE SET
          payload = excluded.payload,
          updated_at = excluded.updated_at
        "#,
                params![key.storage_key(), payload],
            )
            .map_err(|e| {
                AppError::new("PERSIST_WRITE_FAILED", "Failed to write highlight set")
                    .with_details(format!("key={}; err={}", key.storage_key(), e))
            })?;
        Ok(())
    }

    fn delete(&self, key: &HighlightKey) -> Result<(), AppError> {
        self.conn
            .execute(
                "DELETE FROM highlight_sets WHERE key = ?1",
                [key.storage_key()],
            )
            .map_err(|e| {
                AppError::new("PERSIST_WRITE_FAILED", "Failed to delete highlight set")
                    .with_details(format!("key={}; err={}", key.storage_key(), e))
            })?;
        Ok(())
    }

    fn list_keys(&self) -> Result<Vec<HighlightKey>, AppError> {
        let mut stmt = self
            .conn
            .prepare("SELECT key FROM highlight_sets ORDER BY key")
            .map_err(|e| {
                AppError::new("PERSIST_READ_FAILED", "Failed to prepare key listing")
                    .with_details(e.to_string())
            })?;

        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| {
                AppError::new("PERSIST_READ_FAILED", "Failed to list highlight keys")
                    .with_details(e.to_string())
            })?;

        let mut out = Vec::new();
        for r in rows {
            let raw = r.map_err(|e| {
                AppError::new("PERSIST_READ_FAILED", "Failed to read highlight key row")
                    .with_details(e.to_string())
            })?;
            if let Some(key) = HighlightKey::parse(&raw) {
                out.push(key);
            }
        }
        Ok(out)
    }
}

/// In-memory persistence for tests and ephemeral sessions.
#[derive(Default)]
pub struct MemoryHighlightPersistence {
    entries: RefCell<BTreeMap<String, Vec<Highlight>>>,
    fail_writes: Cell<bool>,
}

impl MemoryHighlightPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent `set`/`delete` calls fail, to exercise the
    /// best-effort persistence path.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.set(fail);
    }
}

impl HighlightPersistence for MemoryHighlightPersistence {
    fn get(&self, key: &HighlightKey) -> Result<Option<Vec<Highlight>>, AppError> {
        Ok(self.entries.borrow().get(&key.storage_key()).cloned())
    }

    fn set(&self, key: &HighlightKey, highlights: &[Highlight]) -> Result<(), AppError> {
        if self.fail_writes.get() {
            return Err(AppError::new(
                "PERSIST_WRITE_FAILED",
                "Simulated write failure",
            ));
        }
        self.entries
            .borrow_mut()
            .insert(key.storage_key(), highlights.to_vec());
        Ok(())
    }

    fn delete(&self, key: &HighlightKey) -> Result<(), AppError> {
        if self.fail_writes.get() {
            return Err(AppError::new(
                "PERSIST_WRITE_FAILED",
                "Simulated delete failure",
            ));
        }
        self.entries.borrow_mut().remove(&key.storage_key());
        Ok(())
    }

    fn list_keys(&self) -> Result<Vec<HighlightKey>, AppError> {
        Ok(self
            .entries
            .borrow()
            .keys()
            .filter_map(|k| HighlightKey::parse(k))
            .collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreMode {
    /// User highlights from manual selections; every mutation persists.
    Manual,
    /// Auto highlights from alignment results; session-only, never persisted.
    Auto,
}

/// Outcome of `insert_manual`.
#[derive(Debug, Clone)]
pub struct InsertOutcome {
    pub highlight: Highlight,
    /// Ids of the highlights removed because they overlapped the new span.
    pub replaced_ids: Vec<String>,
    /// False when the durable copy could not be updated (see `warnings`).
    pub persisted: bool,
    pub warnings: Vec<StoreWarning>,
}

/// Outcome of `remove` / `clear`.
#[derive(Debug, Clone)]
pub struct MutationOutcome {
    pub persisted: bool,
    pub warnings: Vec<StoreWarning>,
}

impl MutationOutcome {
    fn durable() -> Self {
        Self {
            persisted: true,
            warnings: Vec::new(),
        }
    }
}

/// Authoritative highlight set for one document key.
///
/// The mode is fixed at construction: a manual store loads and persists user
/// highlights through the injected port; an auto store holds the session's
/// alignment-derived working set and never touches storage.
pub struct HighlightStore {
    key: HighlightKey,
    mode: StoreMode,
    highlights: Vec<Highlight>,
    port: Option<Box<dyn HighlightPersistence>>,
    load_warnings: Vec<StoreWarning>,
}

impl HighlightStore {
    /// Manual-mode store. Loads the persisted set; a failed read degrades to
    /// an empty session set and is reported via `load_warnings()`.
    pub fn manual(key: HighlightKey, port: Box<dyn HighlightPersistence>) -> Self {
        let mut store = Self {
            key,
            mode: StoreMode::Manual,
            highlights: Vec::new(),
            port: Some(port),
            load_warnings: Vec::new(),
        };
        if let Err(e) = store.load() {
            store.load_warnings.push(
                StoreWarning::new(
                    "PERSIST_LOAD_DEGRADED",
                    "Stored highlights could not be loaded; starting empty for this session",
                )
                .with_details(e.to_string()),
            );
        }
        store
    }

    /// Auto-mode store for one "view source from this answer" session.
    pub fn auto(key: HighlightKey) -> Self {
        Self {
            key,
            mode: StoreMode::Auto,
            highlights: Vec::new(),
            port: None,
            load_warnings: Vec::new(),
        }
    }

    pub fn key(&self) -> &HighlightKey {
        &self.key
    }

    pub fn mode(&self) -> StoreMode {
        self.mode
    }

    /// Current set, sorted ascending by start.
    pub fn highlights(&self) -> &[Highlight] {
        &self.highlights
    }

    pub fn load_warnings(&self) -> &[StoreWarning] {
        &self.load_warnings
    }

    /// Reload the persisted set, replacing the in-memory one. No-op in auto
    /// mode.
    pub fn load(&mut self) -> Result<(), AppError> {
        let Some(port) = self.port.as_deref() else {
            return Ok(());
        };
        let stored = port.get(&self.key)?.unwrap_or_default();
        self.highlights = sanitize_set(stored);
        Ok(())
    }

    /// Insert a user highlight from a manual selection. Every existing
    /// highlight overlapping `[start, end)` is removed in full before the
    /// insert (last-writer-wins), then the updated set is persisted.
    pub fn insert_manual(
        &mut self,
        start: usize,
        end: usize,
        text: &str,
        color: &str,
    ) -> Result<InsertOutcome, AppError> {
        if self.mode != StoreMode::Manual {
            return Err(AppError::new(
                "STORE_MODE_INVALID",
                "insert_manual requires a manual-mode store",
            ));
        }
        if start >= end {
            return Err(AppError::new(
                "HIGHLIGHT_RANGE_INVALID",
                "Highlight start must be strictly before end",
            )
            .with_details(format!("start={start}; end={end}")));
        }

        let created_at = now_rfc3339()?;
        let highlight = Highlight {
            id: user_highlight_id(&self.key, start, end, &created_at),
            start,
            end,
            text: text.to_string(),
            color: color.to_string(),
            origin: HighlightOrigin::User,
            created_at,
        };

        let mut replaced_ids = Vec::new();
        self.highlights.retain(|h| {
            if spans_overlap(h.start, h.end, start, end) {
                replaced_ids.push(h.id.clone());
                false
            } else {
                true
            }
        });
        self.highlights.push(highlight.clone());
        self.highlights.sort_by_key(|h| (h.start, h.end));

        let warning = self.persist_current();
        Ok(InsertOutcome {
            highlight,
            replaced_ids,
            persisted: warning.is_none(),
            warnings: warning.into_iter().collect(),
        })
    }

    /// Replace the auto working set with highlights derived from alignment
    /// results. Overlaps between ranges of different reference sentences are
    /// resolved first-match-wins in the given order.
    pub fn insert_auto(&mut self, ranges: &[MatchRange]) -> Result<(), AppError> {
        if self.mode != StoreMode::Auto {
            return Err(AppError::new(
                "STORE_MODE_INVALID",
                "insert_auto requires an auto-mode store",
            ));
        }

        let created_at = now_rfc3339()?;
        let mut kept: Vec<&MatchRange> = Vec::new();
        for r in ranges {
            if r.start >= r.end {
                continue;
            }
            if kept
                .iter()
                .any(|k| spans_overlap(k.start, k.end, r.start, r.end))
            {
                continue;
            }
            kept.push(r);
        }

        self.highlights = kept
            .into_iter()
            .enumerate()
            .map(|(i, r)| Highlight {
                id: auto_highlight_id(i),
                start: r.start,
                end: r.end,
                text: r.text.clone(),
                color: auto_color(r.kind).to_string(),
                origin: HighlightOrigin::Auto,
                created_at: created_at.clone(),
            })
            .collect();
        self.highlights.sort_by_key(|h| (h.start, h.end));
        Ok(())
    }

    /// Remove one highlight by id. Unknown ids are a no-op. Removing the
    /// last user highlight deletes the persisted key entirely.
    pub fn remove(&mut self, id: &str) -> Result<MutationOutcome, AppError> {
        let before = self.highlights.len();
        self.highlights.retain(|h| h.id != id);
        if self.highlights.len() == before {
            return Ok(MutationOutcome::durable());
        }

        if self.mode == StoreMode::Auto {
            return Ok(MutationOutcome::durable());
        }
        let warning = self.persist_current();
        Ok(MutationOutcome {
            persisted: warning.is_none(),
            warnings: warning.into_iter().collect(),
        })
    }

    /// Empty the set. Manual mode also deletes the persisted key, even when
    /// the in-memory set is already empty: a degraded load can leave a
    /// stored record behind that the session never saw. Idempotent.
    pub fn clear(&mut self) -> Result<MutationOutcome, AppError> {
        self.highlights.clear();

        if self.mode == StoreMode::Auto {
            return Ok(MutationOutcome::durable());
        }
        let warning = self.persist_current();
        Ok(MutationOutcome {
            persisted: warning.is_none(),
            warnings: warning.into_iter().collect(),
        })
    }

    /// Split `content` into an ordered, content-covering sequence of plain
    /// and highlighted slices. Identical in both modes.
    pub fn segment(&self, content: &str) -> Vec<Segment> {
        segment_content(content, &self.highlights)
    }

    /// Write the current set through the port, or delete the key when the
    /// set became empty. Failures degrade to a warning: the in-memory set
    /// stays authoritative for the session.
    fn persist_current(&self) -> Option<StoreWarning> {
        let port = self.port.as_deref()?;
        let result = if self.highlights.is_empty() {
            port.delete(&self.key)
        } else {
            port.set(&self.key, &self.highlights)
        };
        match result {
            Ok(()) => None,
            Err(e) => Some(
                StoreWarning::new(
                    "PERSIST_DEGRADED",
                    "Highlights work for this session but will not survive reload",
                )
                .with_details(e.to_string()),
            ),
        }
    }
}

/// Drop invalid or mutually overlapping entries from a loaded set
/// (first-match-wins by start order). Storage written by this crate never
/// contains them; this guards against hand-edited or corrupted payloads.
fn sanitize_set(mut stored: Vec<Highlight>) -> Vec<Highlight> {
    stored.sort_by_key(|h| (h.start, h.end));
    let mut out: Vec<Highlight> = Vec::with_capacity(stored.len());
    for h in stored {
        if h.start >= h.end {
            continue;
        }
        if out
            .iter()
            .any(|k| spans_overlap(k.start, k.end, h.start, h.end))
        {
            continue;
        }
        out.push(h);
    }
    out
}

/// Segmentation over an arbitrary highlight slice; every byte of `content`
/// appears in exactly one segment, in original order. Offsets past the end
/// of the content or off a char boundary are clamped, never panicked on.
pub fn segment_content(content: &str, highlights: &[Highlight]) -> Vec<Segment> {
    let mut sorted: Vec<&Highlight> = highlights.iter().collect();
    sorted.sort_by_key(|h| (h.start, h.end));

    let mut out = Vec::new();
    let mut cursor = 0usize;
    for h in sorted {
        let start = clamp_char_boundary(content, h.start);
        let end = clamp_char_boundary(content, h.end);
        if end <= start || start < cursor {
            continue;
        }
        if start > cursor {
            out.push(Segment {
                text: content[cursor..start].to_string(),
                highlight: None,
            });
        }
        out.push(Segment {
            text: content[start..end].to_string(),
            highlight: Some((*h).clone()),
        });
        cursor = end;
    }
    if cursor < content.len() {
        out.push(Segment {
            text: content[cursor..].to_string(),
            highlight: None,
        });
    }
    out
}

fn clamp_char_boundary(content: &str, offset: usize) -> usize {
    let mut idx = offset.min(content.len());
    while idx > 0 && !content.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

/// Cascading cleanup for one deleted document.
pub fn purge_document(port: &dyn HighlightPersistence, key: &HighlightKey) -> Result<(), AppError> {
    port.delete(key)
}

/// Cascading cleanup for a deleted owning project: remove every listed key.
/// Returns the number of keys removed.
pub fn purge_documents(
    port: &dyn HighlightPersistence,
    keys: &[HighlightKey],
) -> Result<u32, AppError> {
    let mut removed = 0u32;
    for key in keys {
        port.delete(key)?;
        removed += 1;
    }
    Ok(removed)
}

/// Enumerate stored keys and remove those matching `pred`. Used when the
/// caller knows the owning project only by a predicate over document
/// identities (e.g. every document id in a deleted project).
pub fn purge_matching(
    port: &dyn HighlightPersistence,
    pred: impl Fn(&HighlightKey) -> bool,
) -> Result<u32, AppError> {
    let mut removed = 0u32;
    for key in port.list_keys()? {
        if pred(&key) {
            port.delete(&key)?;
            removed += 1;
        }
    }
    Ok(removed)
}

fn now_rfc3339() -> Result<String, AppError> {
    OffsetDateTime::now_utc().format(&Rfc3339).map_err(|e| {
        AppError::new("TIME_FORMAT_FAILED", "Failed to format current timestamp")
            .with_details(e.to_string())
    })
}
