use std::fs;

use pretty_assertions::assert_eq;
use tempfile::tempdir;

use refmark_ai::flow::SourceViewFlow;
use refmark_ai::provider::{ContentProvider, FsContentProvider, NodeReference};
use refmark_core::domain::{HighlightOrigin, AUTO_COLOR_EXACT, AUTO_COLOR_FUZZY};

fn seed_doc(root: &std::path::Path, doc_type: &str, doc_id: &str, content: &str) {
    let dir = root.join(doc_type);
    fs::create_dir_all(&dir).expect("mkdir");
    fs::write(dir.join(format!("{doc_id}.txt")), content).expect("write");
}

#[test]
fn open_source_view_seeds_auto_highlights() {
    let tmp = tempdir().unwrap();
    seed_doc(
        tmp.path(),
        "pdf",
        "42",
        "Intro text. The cited sentence lives here. Outro text.",
    );

    let mut flow = SourceViewFlow::new(FsContentProvider::new(tmp.path().to_path_buf()));
    let view = flow
        .open_source_view(
            "pdf",
            "42",
            &["The cited sentence lives here.".to_string()],
        )
        .expect("open");

    assert!(flow.is_current(view.ticket));
    assert_eq!(view.matched_sentences, 1);
    assert_eq!(view.unmatched_sentences, 0);

    let highlights = view.store.highlights();
    assert_eq!(highlights.len(), 1);
    assert_eq!(highlights[0].origin, HighlightOrigin::Auto);
    assert_eq!(highlights[0].color, AUTO_COLOR_EXACT);
    assert_eq!(highlights[0].text, "The cited sentence lives here.");
    assert!(highlights[0].id.starts_with("auto-"));

    // The view's segmentation covers the fetched content exactly.
    let joined: String = view
        .store
        .segment(&view.content)
        .iter()
        .map(|s| s.text.as_str())
        .collect();
    assert_eq!(joined, view.content);
}

#[test]
fn fuzzy_matches_get_the_fuzzy_color() {
    let tmp = tempdir().unwrap();
    seed_doc(tmp.path(), "memo", "9", "The cat, sat!! Something else.");

    let mut flow = SourceViewFlow::new(FsContentProvider::new(tmp.path().to_path_buf()));
    let view = flow
        .open_source_view("memo", "9", &["The cat sat".to_string()])
        .expect("open");

    let highlights = view.store.highlights();
    assert_eq!(highlights.len(), 1);
    assert_eq!(highlights[0].color, AUTO_COLOR_FUZZY);
}

#[test]
fn unmatched_sentences_still_open_the_view() {
    let tmp = tempdir().unwrap();
    seed_doc(tmp.path(), "memo", "1", "Nothing relevant in this document.");

    let mut flow = SourceViewFlow::new(FsContentProvider::new(tmp.path().to_path_buf()));
    let view = flow
        .open_source_view("memo", "1", &["entirely unrelated claim".to_string()])
        .expect("open");

    assert_eq!(view.matched_sentences, 0);
    assert_eq!(view.unmatched_sentences, 1);
    assert!(view.store.highlights().is_empty());
    assert_eq!(view.content, "Nothing relevant in this document.");
}

#[test]
fn stale_views_are_detected_by_ticket() {
    let tmp = tempdir().unwrap();
    seed_doc(tmp.path(), "pdf", "1", "Document one text.");
    seed_doc(tmp.path(), "pdf", "2", "Document two text.");

    let mut flow = SourceViewFlow::new(FsContentProvider::new(tmp.path().to_path_buf()));
    let first = flow
        .open_source_view("pdf", "1", &["Document one text.".to_string()])
        .expect("first");
    let second = flow
        .open_source_view("pdf", "2", &["Document two text.".to_string()])
        .expect("second");

    // The user reopened a different source before the first view was applied:
    // the first result is stale and must be discarded.
    assert!(!flow.is_current(first.ticket));
    assert!(flow.is_current(second.ticket));
}

#[test]
fn cross_sentence_overlaps_resolve_first_match_wins() {
    let tmp = tempdir().unwrap();
    seed_doc(tmp.path(), "memo", "5", "alpha beta gamma delta");

    let mut flow = SourceViewFlow::new(FsContentProvider::new(tmp.path().to_path_buf()));
    // Both sentences match, and their spans overlap on "beta gamma".
    let view = flow
        .open_source_view(
            "memo",
            "5",
            &[
                "alpha beta gamma".to_string(),
                "beta gamma delta".to_string(),
            ],
        )
        .expect("open");

    let spans: Vec<(usize, usize)> = view
        .store
        .highlights()
        .iter()
        .map(|h| (h.start, h.end))
        .collect();
    assert_eq!(spans, vec![(0, 16)]);
}

#[test]
fn missing_document_surfaces_source_unavailable() {
    let tmp = tempdir().unwrap();
    let mut flow = SourceViewFlow::new(FsContentProvider::new(tmp.path().to_path_buf()));

    let err = flow
        .open_source_view("pdf", "missing", &["anything".to_string()])
        .unwrap_err();
    assert_eq!(err.code, "SOURCE_UNAVAILABLE");
}

#[test]
fn open_from_reference_uses_the_reference_sentences() {
    let tmp = tempdir().unwrap();
    seed_doc(tmp.path(), "pdf", "7", "Quoted claim text. Filler.");

    let reference = NodeReference {
        source_id: "7".to_string(),
        original_sentences: vec!["Quoted claim text.".to_string()],
    };
    let mut flow = SourceViewFlow::new(FsContentProvider::new(tmp.path().to_path_buf()));
    let view = flow.open_from_reference("pdf", &reference).expect("open");
    assert_eq!(view.store.highlights().len(), 1);
}

#[test]
fn provider_rejects_malformed_identities() {
    let tmp = tempdir().unwrap();
    let provider = FsContentProvider::new(tmp.path().to_path_buf());
    let err = provider.fetch_content("pdf", "../escape").unwrap_err();
    assert_eq!(err.code, "INPUT_INVALID");
    let err = provider.fetch_content("", "42").unwrap_err();
    assert_eq!(err.code, "INPUT_INVALID");
}
