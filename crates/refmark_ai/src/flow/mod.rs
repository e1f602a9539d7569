use refmark_core::domain::HighlightKey;
use refmark_core::error::AppError;
use refmark_core::store::HighlightStore;

use crate::align::align_all;
use crate::provider::{ContentProvider, NodeReference};

/// Result of one "open source from this answer" action: the fetched content
/// plus an auto-mode store seeded with the alignment results. A view with
/// zero highlights is normal (the viewer still opens, unhighlighted).
impl std::fmt::Debug for SourceView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceView")
            .field("ticket", &self.ticket)
            .field("content", &self.content)
            .field("matched_sentences", &self.matched_sentences)
            .field("unmatched_sentences", &self.unmatched_sentences)
            .finish_non_exhaustive()
    }
}

pub struct SourceView {
    /// Ticket issued when the action started; stale views carry an older
    /// ticket than the flow and must be discarded by the caller.
    pub ticket: u64,
    pub content: String,
    pub store: HighlightStore,
    pub matched_sentences: usize,
    pub unmatched_sentences: usize,
}

/// Orchestrates fetch -> align -> auto-highlight for source views.
///
/// Each open action bumps a monotonic ticket. When the user rapidly reopens
/// different sources, responses may resolve out of order; the caller checks
/// `is_current` before applying a view so the last *requested* source wins,
/// not the last response to resolve.
pub struct SourceViewFlow<P> {
    provider: P,
    latest_ticket: u64,
}

impl<P: ContentProvider> SourceViewFlow<P> {
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            latest_ticket: 0,
        }
    }

    pub fn is_current(&self, ticket: u64) -> bool {
        ticket == self.latest_ticket
    }

    pub fn open_source_view(
        &mut self,
        doc_type: &str,
        doc_id: &str,
        sentences: &[String],
    ) -> Result<SourceView, AppError> {
        self.latest_ticket += 1;
        let ticket = self.latest_ticket;

        let source = self.provider.fetch_content(doc_type, doc_id)?;
        let summary = align_all(&source.content, sentences);

        let mut store = HighlightStore::auto(HighlightKey::new(doc_type, doc_id));
        store.insert_auto(&summary.ranges)?;

        Ok(SourceView {
            ticket,
            content: source.content,
            store,
            matched_sentences: summary.matched_sentences,
            unmatched_sentences: summary.unmatched_sentences,
        })
    }

    /// Convenience for one entry of a chat answer's reference map.
    pub fn open_from_reference(
        &mut self,
        doc_type: &str,
        reference: &NodeReference,
    ) -> Result<SourceView, AppError> {
        self.open_source_view(doc_type, &reference.source_id, &reference.original_sentences)
    }
}
