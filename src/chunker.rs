//! Semantic-boundary document chunker.
//!
//! Oversized documents (estimated at more than 20,000 tokens, ~4 chars
//! per token) are split into overlapping chunks so the index operates on
//! bounded-size units. Splitting prefers semantic boundaries — markdown
//! headings, numbered section starts, ALL-CAPS label lines, paragraph
//! breaks — and greedily packs the sections between them into chunks of
//! at most 24,000 characters, seeding each new chunk with the trailing
//! 2,000 characters of the previous one so context at a cut point is
//! never lost. Overlap regions are intentionally duplicated across
//! adjacent chunks rather than deduplicated.
//!
//! Every chunk is a contiguous substring of the source content: nothing
//! is dropped, reordered, or rewritten.

use std::collections::HashMap;

use sha2::{Digest, Sha256};

use crate::models::Document;

/// Approximate chars-per-token ratio used for all size estimates.
const CHARS_PER_TOKEN: usize = 4;
/// Documents estimated above this many tokens get chunked.
const MAX_DOC_TOKENS: usize = 20_000;
/// Upper bound on chunk size: 6,000 tokens.
const MAX_CHUNK_CHARS: usize = 6_000 * CHARS_PER_TOKEN;
/// Context carried from one chunk into the next: 500 tokens.
const OVERLAP_CHARS: usize = 500 * CHARS_PER_TOKEN;
/// Paragraph breaks this close to an existing boundary are ignored.
const BOUNDARY_WINDOW: usize = 100;
/// Chunk titles are searched for within this prefix of the chunk.
const TITLE_WINDOW: usize = 500;

/// Estimated token count for a piece of content.
pub fn estimated_tokens(content: &str) -> usize {
    content.len().div_ceil(CHARS_PER_TOKEN)
}

/// Split a document into chunks if it exceeds the token threshold.
///
/// Under-threshold documents are returned unchanged as a single-element
/// vector. Chunks carry ids of the form `{parent_id}__chunk_{n}`,
/// contiguous 0-based `chunk_index` values, and `total_chunks`
/// back-filled once the count is known.
pub fn chunk_document(doc: &Document) -> Vec<Document> {
    if estimated_tokens(&doc.content) <= MAX_DOC_TOKENS {
        return vec![doc.clone()];
    }

    let texts = split_content(&doc.content);
    let total = texts.len();

    // Every chunk carries the hash of the full source content, so change
    // detection keyed by the parent id compares like with like.
    let source_hash = doc.content_hash.clone().unwrap_or_else(|| {
        format!("{:x}", Sha256::digest(doc.content.as_bytes()))
    });

    texts
        .into_iter()
        .enumerate()
        .map(|(index, text)| {
            Document {
                id: format!("{}__chunk_{}", doc.id, index),
                name: doc.name.clone(),
                mime_type: doc.mime_type.clone(),
                size: text.len() as u64,
                modified_time: doc.modified_time,
                folder_id: doc.folder_id.clone(),
                folder_path: doc.folder_path.clone(),
                space_id: doc.space_id.clone(),
                is_chunk: true,
                parent_document_id: Some(doc.id.clone()),
                chunk_index: Some(index),
                total_chunks: Some(total),
                chunk_title: extract_chunk_title(&text),
                content_hash: Some(source_hash.clone()),
                content: text,
            }
        })
        .collect()
}

/// Split content into chunk texts along semantic boundaries.
fn split_content(content: &str) -> Vec<String> {
    let boundaries = semantic_boundaries(content);

    let mut chunks: Vec<String> = Vec::new();
    let mut buf = String::new();

    for window in boundaries.windows(2) {
        let section = &content[window[0]..window[1]];

        // A single section too large for any chunk: flush the buffer and
        // sub-split the section by sentences, without overlap seeding.
        if section.len() > MAX_CHUNK_CHARS {
            if !buf.is_empty() {
                chunks.push(std::mem::take(&mut buf));
            }
            split_giant_section(section, &mut chunks);
            continue;
        }

        if !buf.is_empty() && buf.len() + section.len() > MAX_CHUNK_CHARS {
            let overlap = tail_on_char_boundary(&buf, OVERLAP_CHARS).to_string();
            chunks.push(std::mem::take(&mut buf));
            buf = overlap;
        }
        buf.push_str(section);
    }

    if !buf.is_empty() {
        chunks.push(buf);
    }

    chunks
}

/// Boundary offsets for `content`: 0, the content length, the starts of
/// heading/numbered/ALL-CAPS lines, and paragraph breaks that are not
/// within [`BOUNDARY_WINDOW`] of a boundary already found.
fn semantic_boundaries(content: &str) -> Vec<usize> {
    let mut boundaries: Vec<usize> = vec![0];

    let mut offset = 0usize;
    for line in content.split_inclusive('\n') {
        if offset > 0 {
            let trimmed = line.trim();
            if is_heading_line(trimmed) || is_numbered_section(trimmed) || is_caps_label(trimmed) {
                boundaries.push(offset);
            }
        }
        offset += line.len();
    }

    for (pos, _) in content.match_indices("\n\n") {
        let after = pos + 2;
        if after >= content.len() {
            continue;
        }
        if !boundaries.iter().any(|&b| b.abs_diff(after) < BOUNDARY_WINDOW) {
            boundaries.push(after);
        }
    }

    boundaries.push(content.len());
    boundaries.sort_unstable();
    boundaries.dedup();
    boundaries
}

/// Sub-split a section larger than [`MAX_CHUNK_CHARS`] on sentence
/// boundaries, greedily accumulating sentences into chunks.
fn split_giant_section(section: &str, chunks: &mut Vec<String>) {
    let mut buf = String::new();

    for sentence in split_sentences(section) {
        if sentence.len() > MAX_CHUNK_CHARS {
            if !buf.is_empty() {
                chunks.push(std::mem::take(&mut buf));
            }
            hard_split(sentence, chunks);
            continue;
        }
        if !buf.is_empty() && buf.len() + sentence.len() > MAX_CHUNK_CHARS {
            chunks.push(std::mem::take(&mut buf));
        }
        buf.push_str(sentence);
    }

    if !buf.is_empty() {
        chunks.push(buf);
    }
}

/// Split text after `.`/`!`/`?` followed by whitespace. The pieces cover
/// the input exactly; trailing whitespace stays with the next sentence.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;

    let mut iter = text.char_indices().peekable();
    while let Some((_, c)) = iter.next() {
        if matches!(c, '.' | '!' | '?') {
            if let Some(&(next_idx, next)) = iter.peek() {
                if next.is_whitespace() {
                    out.push(&text[start..next_idx]);
                    start = next_idx;
                }
            }
        }
    }

    if start < text.len() {
        out.push(&text[start..]);
    }
    out
}

/// Last resort for a single sentence larger than a chunk: cut at the
/// nearest newline or space below the limit.
fn hard_split(sentence: &str, chunks: &mut Vec<String>) {
    let mut remaining = sentence;
    while remaining.len() > MAX_CHUNK_CHARS {
        let mut cut = MAX_CHUNK_CHARS;
        while !remaining.is_char_boundary(cut) {
            cut -= 1;
        }
        let cut = remaining[..cut]
            .rfind('\n')
            .or_else(|| remaining[..cut].rfind(' '))
            .map(|pos| pos + 1)
            .unwrap_or(cut);
        chunks.push(remaining[..cut].to_string());
        remaining = &remaining[cut..];
    }
    if !remaining.is_empty() {
        chunks.push(remaining.to_string());
    }
}

fn is_heading_line(line: &str) -> bool {
    let hashes = line.chars().take_while(|&c| c == '#').count();
    (1..=6).contains(&hashes) && line[hashes..].starts_with(' ')
}

/// `1. Title`, `2) Title`, `3.4 Subsection` style section starts.
fn is_numbered_section(line: &str) -> bool {
    let Some((label, rest)) = line.split_once(char::is_whitespace) else {
        return false;
    };
    if rest.trim().is_empty() {
        return false;
    }
    let marked = label.ends_with('.') || label.ends_with(')') || label.contains('.');
    let digits = label
        .trim_end_matches(['.', ')'])
        .split('.')
        .all(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_digit()));
    marked && digits
}

/// A short line of only uppercase letters, digits, and label punctuation.
fn is_caps_label(line: &str) -> bool {
    if line.len() < 3 || line.len() > 100 {
        return false;
    }
    let letters = line.chars().filter(|c| c.is_ascii_uppercase()).count();
    letters >= 3
        && line.chars().all(|c| {
            c.is_ascii_uppercase()
                || c.is_ascii_digit()
                || c.is_whitespace()
                || matches!(c, ':' | '-' | '&' | '.' | ',')
        })
}

/// Best-effort title for a chunk: the first markdown heading in the
/// first 500 characters, else a numbered section label, else the first
/// line when it is 10–100 characters long.
fn extract_chunk_title(content: &str) -> Option<String> {
    let window = head_on_char_boundary(content, TITLE_WINDOW);

    for line in window.lines() {
        let trimmed = line.trim();
        if is_heading_line(trimmed) {
            let title = trimmed.trim_start_matches('#').trim();
            if !title.is_empty() {
                return Some(title.to_string());
            }
        }
    }

    for line in window.lines() {
        let trimmed = line.trim();
        if is_numbered_section(trimmed) {
            return Some(trimmed.to_string());
        }
    }

    let first = content.lines().next().map(str::trim).unwrap_or("");
    if (10..=100).contains(&first.len()) {
        Some(first.to_string())
    } else {
        None
    }
}

fn tail_on_char_boundary(s: &str, n: usize) -> &str {
    if s.len() <= n {
        return s;
    }
    let mut i = s.len() - n;
    while !s.is_char_boundary(i) {
        i += 1;
    }
    &s[i..]
}

fn head_on_char_boundary(s: &str, n: usize) -> &str {
    if s.len() <= n {
        return s;
    }
    let mut i = n;
    while !s.is_char_boundary(i) {
        i -= 1;
    }
    &s[..i]
}

/// A document paired with its relevance score, as produced by ranking.
#[derive(Debug, Clone)]
pub struct ScoredDocument {
    pub document: Document,
    pub score: f64,
}

/// Collapse chunk-level results to one best-scoring entry per source
/// document.
///
/// Grouping uses `parent_document_id` when present, falling back to
/// stripping a `__chunk_N` suffix from the id. Group order follows the
/// first appearance of each group in the input; applying the merge to
/// already-merged output is a no-op.
pub fn merge_chunk_results(results: Vec<ScoredDocument>) -> Vec<ScoredDocument> {
    let mut order: Vec<String> = Vec::new();
    let mut best: HashMap<String, ScoredDocument> = HashMap::new();

    for item in results {
        let key = item
            .document
            .parent_document_id
            .clone()
            .unwrap_or_else(|| strip_chunk_suffix(&item.document.id).to_string());

        match best.get(&key) {
            Some(existing) if existing.score >= item.score => {}
            Some(_) => {
                best.insert(key, item);
            }
            None => {
                order.push(key.clone());
                best.insert(key, item);
            }
        }
    }

    order.into_iter().filter_map(|k| best.remove(&k)).collect()
}

/// Strip a trailing `__chunk_N` suffix from an id, if present.
pub fn strip_chunk_suffix(id: &str) -> &str {
    if let Some(pos) = id.rfind("__chunk_") {
        let suffix = &id[pos + "__chunk_".len()..];
        if !suffix.is_empty() && suffix.chars().all(|c| c.is_ascii_digit()) {
            return &id[..pos];
        }
    }
    id
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_doc(id: &str, content: &str) -> Document {
        Document {
            id: id.to_string(),
            name: format!("{id}.md"),
            content: content.to_string(),
            mime_type: "text/markdown".to_string(),
            size: content.len() as u64,
            modified_time: 1_700_000_000,
            folder_id: "folder1".to_string(),
            folder_path: "/docs".to_string(),
            space_id: None,
            is_chunk: false,
            parent_document_id: None,
            chunk_index: None,
            total_chunks: None,
            chunk_title: None,
            content_hash: None,
        }
    }

    fn big_content() -> String {
        // Well over the 80,000-char threshold, with headings and paragraphs.
        let mut out = String::new();
        for section in 0..40 {
            out.push_str(&format!("# Section {}\n\n", section));
            for para in 0..10 {
                out.push_str(&format!(
                    "Paragraph {} of section {}. It talks about deployment and indexing. ",
                    para, section
                ));
                out.push_str(&"More filler text to grow the document body. ".repeat(8));
                out.push_str("\n\n");
            }
        }
        out
    }

    #[test]
    fn test_small_document_unchanged() {
        let doc = make_doc("d1", "Short content that fits in one unit.");
        let chunks = chunk_document(&doc);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].id, "d1");
        assert!(!chunks[0].is_chunk);
        assert_eq!(chunks[0].content, doc.content);
    }

    #[test]
    fn test_oversized_document_chunked() {
        let content = big_content();
        assert!(content.len() > 80_000);
        let doc = make_doc("d1", &content);
        let chunks = chunk_document(&doc);

        assert!(chunks.len() > 1);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.id, format!("d1__chunk_{}", i));
            assert!(chunk.is_chunk);
            assert_eq!(chunk.parent_document_id.as_deref(), Some("d1"));
            assert_eq!(chunk.chunk_index, Some(i));
            assert_eq!(chunk.total_chunks, Some(chunks.len()));
            assert!(chunk.content.len() <= MAX_CHUNK_CHARS + OVERLAP_CHARS);
        }
    }

    #[test]
    fn test_chunks_carry_source_document_hash() {
        let content = big_content();
        let mut doc = make_doc("d1", &content);
        doc.content_hash = Some("precomputed".to_string());

        let chunks = chunk_document(&doc);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert_eq!(chunk.content_hash.as_deref(), Some("precomputed"));
        }

        // Without a precomputed hash, chunks share the hash of the full
        // content rather than hashing their own text.
        doc.content_hash = None;
        let expected = format!("{:x}", Sha256::digest(content.as_bytes()));
        for chunk in chunk_document(&doc) {
            assert_eq!(chunk.content_hash.as_deref(), Some(expected.as_str()));
        }
    }

    #[test]
    fn test_chunks_cover_original_content() {
        let content = big_content();
        let doc = make_doc("d1", &content);
        let chunks = chunk_document(&doc);

        // Each chunk is a contiguous substring; together they cover the
        // original in order with no gaps.
        let mut covered_to = 0usize;
        let mut search_from = 0usize;
        for chunk in &chunks {
            let pos = content[search_from..]
                .find(&chunk.content)
                .map(|p| p + search_from)
                .expect("chunk must be a substring of the original");
            assert!(pos <= covered_to, "gap before chunk at {}", pos);
            covered_to = covered_to.max(pos + chunk.content.len());
            search_from = pos;
        }
        assert_eq!(covered_to, content.len());
    }

    #[test]
    fn test_adjacent_chunks_share_overlap() {
        let content = big_content();
        let doc = make_doc("d1", &content);
        let chunks = chunk_document(&doc);
        assert!(chunks.len() > 1);

        let first = &chunks[0].content;
        let second = &chunks[1].content;
        let overlap = tail_on_char_boundary(first, OVERLAP_CHARS);
        assert!(second.starts_with(overlap));
    }

    #[test]
    fn test_giant_section_sentence_split() {
        // One huge paragraph with no semantic boundaries at all.
        let sentence = "This sentence repeats to build a giant section. ";
        let content = sentence.repeat(2_000);
        assert!(content.len() > 80_000);

        let doc = make_doc("d1", &content);
        let chunks = chunk_document(&doc);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.content.len() <= MAX_CHUNK_CHARS);
        }
    }

    #[test]
    fn test_chunk_title_prefers_heading() {
        let title = extract_chunk_title("# Deployment Guide\n\nBody text follows here.");
        assert_eq!(title.as_deref(), Some("Deployment Guide"));
    }

    #[test]
    fn test_chunk_title_numbered_section() {
        let title = extract_chunk_title("2.1 Rollout strategy\n\nDetails follow.");
        assert_eq!(title.as_deref(), Some("2.1 Rollout strategy"));
    }

    #[test]
    fn test_chunk_title_first_line_fallback() {
        let title = extract_chunk_title("A plain opening line\nmore text");
        assert_eq!(title.as_deref(), Some("A plain opening line"));

        // Too short and too long first lines produce no title.
        assert_eq!(extract_chunk_title("short\nrest"), None);
        let long_line = "x".repeat(150);
        assert_eq!(extract_chunk_title(&format!("{long_line}\nrest")), None);
    }

    #[test]
    fn test_boundary_detection() {
        let content =
            "Intro paragraph here.\n\n# Heading One\nBody.\nOVERVIEW SECTION\nMore body text.\n";
        let boundaries = semantic_boundaries(content);
        assert_eq!(boundaries[0], 0);
        assert_eq!(*boundaries.last().unwrap(), content.len());
        let heading_pos = content.find("# Heading One").unwrap();
        assert!(boundaries.contains(&heading_pos));
        let caps_pos = content.find("OVERVIEW SECTION").unwrap();
        assert!(boundaries.contains(&caps_pos));
    }

    #[test]
    fn test_strip_chunk_suffix() {
        assert_eq!(strip_chunk_suffix("doc1__chunk_3"), "doc1");
        assert_eq!(strip_chunk_suffix("doc1__chunk_12"), "doc1");
        assert_eq!(strip_chunk_suffix("doc1"), "doc1");
        assert_eq!(strip_chunk_suffix("doc1__chunk_x"), "doc1__chunk_x");
        assert_eq!(strip_chunk_suffix("doc1__chunk_"), "doc1__chunk_");
    }

    #[test]
    fn test_merge_keeps_best_chunk_per_parent() {
        let mut c0 = make_doc("p1__chunk_0", "first chunk");
        c0.is_chunk = true;
        c0.parent_document_id = Some("p1".to_string());
        let mut c1 = make_doc("p1__chunk_1", "second chunk");
        c1.is_chunk = true;
        c1.parent_document_id = Some("p1".to_string());
        let plain = make_doc("p2", "standalone");

        let merged = merge_chunk_results(vec![
            ScoredDocument { document: c0, score: 1.0 },
            ScoredDocument { document: c1.clone(), score: 2.5 },
            ScoredDocument { document: plain, score: 0.5 },
        ]);

        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].document.id, "p1__chunk_1");
        assert!((merged[0].score - 2.5).abs() < 1e-9);
        assert_eq!(merged[1].document.id, "p2");
    }

    #[test]
    fn test_merge_idempotent() {
        let mut c1 = make_doc("p1__chunk_1", "chunk");
        c1.is_chunk = true;
        c1.parent_document_id = Some("p1".to_string());
        let plain = make_doc("p2", "standalone");

        let once = merge_chunk_results(vec![
            ScoredDocument { document: c1, score: 2.0 },
            ScoredDocument { document: plain, score: 1.0 },
        ]);
        let twice = merge_chunk_results(once.clone());

        assert_eq!(once.len(), twice.len());
        for (a, b) in once.iter().zip(twice.iter()) {
            assert_eq!(a.document.id, b.document.id);
            assert_eq!(a.score, b.score);
        }
    }

    #[test]
    fn test_merge_suffix_fallback_without_parent_field() {
        // No parent_document_id set: grouping falls back to the suffix.
        let a = make_doc("p1__chunk_0", "a");
        let b = make_doc("p1__chunk_1", "b");
        let merged = merge_chunk_results(vec![
            ScoredDocument { document: a, score: 1.0 },
            ScoredDocument { document: b, score: 3.0 },
        ]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].document.id, "p1__chunk_1");
    }
}
