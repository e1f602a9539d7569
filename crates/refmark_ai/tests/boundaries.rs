use std::fs;
use std::path::{Path, PathBuf};

fn collect_rs_files(root: &Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(p) = stack.pop() {
        let entries = match fs::read_dir(&p) {
            Ok(e) => e,
            Err(_) => continue,
        };
        for ent in entries.flatten() {
            let path = ent.path();
            if path.is_dir() {
                stack.push(path);
            } else if path.extension().and_then(|s| s.to_str()) == Some("rs") {
                out.push(path);
            }
        }
    }
    out.sort();
    out
}

#[test]
fn align_module_performs_no_io() {
    // Guardrail: the aligner is a pure function over in-memory strings.
    // Content fetching belongs to the provider; storage belongs to
    // refmark_core. Matching must never grow an I/O dependency.
    let align_root = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("src/align");
    let files = collect_rs_files(&align_root);
    assert!(!files.is_empty());

    for f in files {
        let text = fs::read_to_string(&f).unwrap_or_default();
        for forbidden in ["std::fs", "ureq", "rusqlite", "std::net"] {
            assert!(
                !text.contains(forbidden),
                "forbidden import `{forbidden}` found in {}",
                f.display()
            );
        }
    }
}

#[test]
fn refmark_ai_does_not_talk_to_sqlite_directly() {
    // Persistence goes through refmark_core's port; the AI crate never
    // opens a database connection of its own.
    let src_root = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("src");
    let files = collect_rs_files(&src_root);
    assert!(!files.is_empty());

    for f in files {
        let text = fs::read_to_string(&f).unwrap_or_default();
        assert!(
            !text.contains("rusqlite"),
            "forbidden dependency found in {}",
            f.display()
        );
        assert!(
            !text.contains("refmark_core::db"),
            "forbidden db-layer import found in {}",
            f.display()
        );
    }
}
