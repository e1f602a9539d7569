//! Reference-to-source text alignment.
//!
//! Given a document's raw text and a sentence an answer claims came from it,
//! locate the sentence's exact spans in the document through three fallback
//! tiers: literal substring, whitespace-normalized substring, and a
//! punctuation/case-insensitive fuzzy search. Extraction noise (re-flowed
//! whitespace, stray punctuation) is expected; a sentence that cannot be
//! located yields no ranges, which is a normal outcome rather than an error.
//!
//! All functions here are pure and synchronous over in-memory strings;
//! fetching document content happens upstream (see `crate::provider`).

use refmark_core::domain::{MatchKind, MatchRange};

/// Locate every span of `sentence` inside `content`.
///
/// The sentence is first split on sentence-terminal punctuation into
/// sub-clauses (the upstream answer may concatenate several source
/// sentences); each sub-clause is aligned independently through the tiers
/// and the results are unioned, deduplicated by span, and sorted by start.
///
/// Offsets in the returned ranges are byte offsets into `content`, always
/// on `char` boundaries.
pub fn align(content: &str, sentence: &str) -> Vec<MatchRange> {
    let mut out = Vec::new();
    for clause in split_clauses(sentence) {
        let mut found = exact_matches(content, clause);
        if found.is_empty() {
            found = partial_matches(content, clause);
        }
        if found.is_empty() {
            found = flexible_matches(content, clause);
        }
        out.append(&mut found);
    }
    dedupe_sort(out)
}

/// Alignment result over a whole reference-sentence list.
#[derive(Debug, Clone)]
pub struct AlignSummary {
    /// Ranges in sentence processing order (each sentence's ranges sorted by
    /// start). Overlap resolution between sentences happens downstream.
    pub ranges: Vec<MatchRange>,
    pub matched_sentences: usize,
    pub unmatched_sentences: usize,
}

/// Align every reference sentence against `content` and union the results.
pub fn align_all(content: &str, sentences: &[String]) -> AlignSummary {
    let mut ranges = Vec::new();
    let mut matched_sentences = 0;
    let mut unmatched_sentences = 0;
    for sentence in sentences {
        let found = align(content, sentence);
        if found.is_empty() {
            unmatched_sentences += 1;
        } else {
            matched_sentences += 1;
            ranges.extend(found);
        }
    }
    AlignSummary {
        ranges,
        matched_sentences,
        unmatched_sentences,
    }
}

/// Split on `.` `!` `?`, keeping the terminator with its clause. Clauses
/// with no substantive character (pure punctuation/whitespace) are dropped;
/// a bare terminator must never reach the matching tiers.
fn split_clauses(sentence: &str) -> Vec<&str> {
    sentence
        .split_inclusive(['.', '!', '?'])
        .map(str::trim)
        .filter(|c| c.chars().any(is_substantive))
        .collect()
}

/// Tier 1: every literal occurrence of the clause, resuming one character
/// past each match end.
fn exact_matches(content: &str, clause: &str) -> Vec<MatchRange> {
    let mut out = Vec::new();
    let mut from = 0usize;
    while from <= content.len() {
        let Some(pos) = content[from..].find(clause) else {
            break;
        };
        let start = from + pos;
        let end = start + clause.len();
        out.push(MatchRange {
            start,
            end,
            text: clause.to_string(),
            kind: MatchKind::Exact,
        });
        from = advance_past(content, end);
    }
    out
}

/// Tier 2: collapse whitespace runs in both strings, search the normalized
/// copy, and map hits back to original offsets through the offset map built
/// during normalization.
fn partial_matches(content: &str, clause: &str) -> Vec<MatchRange> {
    let needle = collapse_ws(clause);
    if needle.is_empty() {
        return Vec::new();
    }
    let (hay, map) = collapse_ws_mapped(content);
    find_mapped(content, &hay, &map, &needle, MatchKind::Partial, false)
}

/// Tier 3: strip everything except word characters, whitespace and Hangul,
/// collapse whitespace, lower-case, then search the cleaned copy. Each hit
/// is verified by cleaning the candidate original span and comparing it to
/// the cleaned clause; unverified hits yield no match.
fn flexible_matches(content: &str, clause: &str) -> Vec<MatchRange> {
    let needle = clean_text(clause);
    // A near-empty cleaned clause would match everywhere.
    if needle.chars().count() < 2 {
        return Vec::new();
    }
    let (hay, map) = clean_mapped(content);
    find_mapped(content, &hay, &map, &needle, MatchKind::Flexible, true)
}

/// Repeated search of `needle` in the transformed `hay`, translating each
/// hit back to a span in `content` via `map` (one original-offset entry per
/// `hay` byte).
fn find_mapped(
    content: &str,
    hay: &str,
    map: &[usize],
    needle: &str,
    kind: MatchKind,
    verify: bool,
) -> Vec<MatchRange> {
    let mut out = Vec::new();
    let mut from = 0usize;
    while from <= hay.len() {
        let Some(pos) = hay[from..].find(needle) else {
            break;
        };
        let npos = from + pos;
        let nlast = npos + needle.len() - 1;
        if let (Some(&start), Some(&last)) = (map.get(npos), map.get(nlast)) {
            let end = char_end(content, last);
            if start < end && end <= content.len() {
                let candidate = &content[start..end];
                if !verify || clean_text(candidate) == needle {
                    out.push(MatchRange {
                        start,
                        end,
                        text: candidate.to_string(),
                        kind,
                    });
                }
            }
        }
        from = advance_past(hay, npos + needle.len());
    }
    out
}

/// Collapse whitespace runs to a single space, recording for every output
/// byte the byte offset of the originating character in `s`.
fn collapse_ws_mapped(s: &str) -> (String, Vec<usize>) {
    let mut out = String::with_capacity(s.len());
    let mut map = Vec::with_capacity(s.len());
    let mut pending_ws: Option<usize> = None;
    for (i, c) in s.char_indices() {
        if c.is_whitespace() {
            if pending_ws.is_none() {
                pending_ws = Some(i);
            }
            continue;
        }
        if let Some(wi) = pending_ws.take() {
            out.push(' ');
            map.push(wi);
        }
        out.push(c);
        for _ in 0..c.len_utf8() {
            map.push(i);
        }
    }
    (out, map)
}

/// Whitespace-collapsed, trimmed copy of `s`.
fn collapse_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Fuzzy-cleaning with the same per-byte offset map as `collapse_ws_mapped`:
/// keep word characters and Hangul, collapse whitespace, lower-case. Every
/// byte produced by a lower-case expansion maps to the source character.
fn clean_mapped(s: &str) -> (String, Vec<usize>) {
    let mut out = String::with_capacity(s.len());
    let mut map = Vec::with_capacity(s.len());
    let mut pending_ws: Option<usize> = None;
    for (i, c) in s.char_indices() {
        if c.is_whitespace() {
            if !out.is_empty() && pending_ws.is_none() {
                pending_ws = Some(i);
            }
            continue;
        }
        if !is_substantive(c) {
            continue;
        }
        if let Some(wi) = pending_ws.take() {
            out.push(' ');
            map.push(wi);
        }
        for lc in c.to_lowercase() {
            out.push(lc);
            for _ in 0..lc.len_utf8() {
                map.push(i);
            }
        }
    }
    (out, map)
}

/// Fuzzy-cleaned form of `s` without offset tracking, used for clauses and
/// candidate verification.
fn clean_text(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut pending_ws = false;
    for c in s.chars() {
        if c.is_whitespace() {
            if !out.is_empty() {
                pending_ws = true;
            }
            continue;
        }
        if !is_substantive(c) {
            continue;
        }
        if pending_ws {
            out.push(' ');
            pending_ws = false;
        }
        out.extend(c.to_lowercase());
    }
    out
}

/// Characters that survive fuzzy cleaning: ASCII word characters plus
/// Hangul (syllables, Jamo, compatibility Jamo).
fn is_substantive(c: char) -> bool {
    c.is_ascii_alphanumeric()
        || c == '_'
        || matches!(c, '\u{AC00}'..='\u{D7A3}' | '\u{1100}'..='\u{11FF}' | '\u{3130}'..='\u{318F}')
}

/// Byte offset one full character past `idx`; past-the-end when `idx` is at
/// the end of `s`, which terminates the scan loops.
fn advance_past(s: &str, idx: usize) -> usize {
    if idx >= s.len() {
        return s.len() + 1;
    }
    match s[idx..].chars().next() {
        Some(c) => idx + c.len_utf8(),
        None => s.len() + 1,
    }
}

/// Exclusive end offset of the character starting at `idx`.
fn char_end(s: &str, idx: usize) -> usize {
    match s.get(idx..).and_then(|rest| rest.chars().next()) {
        Some(c) => idx + c.len_utf8(),
        None => idx,
    }
}

fn dedupe_sort(mut ranges: Vec<MatchRange>) -> Vec<MatchRange> {
    ranges.sort_by_key(|r| (r.start, r.end));
    ranges.dedup_by(|a, b| a.start == b.start && a.end == b.end);
    ranges
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn collapse_ws_mapped_tracks_original_offsets() {
        let (out, map) = collapse_ws_mapped("a  b\n\tc");
        assert_eq!(out, "a b c");
        assert_eq!(map.len(), out.len());
        assert_eq!(map[0], 0); // a
        assert_eq!(map[2], 3); // b
        assert_eq!(map[4], 6); // c
    }

    #[test]
    fn clean_mapped_strips_punctuation_and_lowercases() {
        let (out, map) = clean_mapped("Ab, c!");
        assert_eq!(out, "ab c");
        // The collapsed space maps to the original whitespace at offset 3.
        assert_eq!(map, vec![0, 1, 3, 4]);
    }

    #[test]
    fn clean_text_keeps_hangul() {
        assert_eq!(clean_text("안녕, World!"), "안녕 world");
    }

    #[test]
    fn split_clauses_drops_bare_terminators() {
        assert_eq!(split_clauses("First. Second!! "), vec!["First.", "Second!"]);
        assert_eq!(split_clauses("..."), Vec::<&str>::new());
        assert_eq!(split_clauses(""), Vec::<&str>::new());
    }

    #[test]
    fn exact_scan_resumes_one_char_past_each_match_end() {
        let spans: Vec<(usize, usize)> = exact_matches("aaaa", "aa")
            .iter()
            .map(|r| (r.start, r.end))
            .collect();
        // The rescan starts at offset 3, where only a single "a" remains.
        assert_eq!(spans, vec![(0, 2)]);

        let spans: Vec<(usize, usize)> = exact_matches("ab ab ab", "ab")
            .iter()
            .map(|r| (r.start, r.end))
            .collect();
        assert_eq!(spans, vec![(0, 2), (3, 5), (6, 8)]);
    }
}
