//! Token-bounded, overlap-padded windowing over raw document text.
//!
//! Windows are emitted at ingestion/candidate-generation time. When
//! `preserve_units` is set, window boundaries snap to detected structural
//! units (functions, classes, markdown sections) so a unit is only split
//! when it alone exceeds the window size; such fragments are flagged
//! incomplete and share a stitching key for later merging.

pub mod stitch;

pub use stitch::{stitch_windows, StitchedChunk};

use common::types::ChunkKind;
use serde::{Deserialize, Serialize};

/// One window over a source document. Token positions index the
/// whitespace-token stream; char positions slice the original text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Window {
    pub window_id: String,
    pub source_doc_id: String,
    pub start_token: usize,
    pub end_token: usize,
    pub text: String,
    pub kind: ChunkKind,
    pub complete: bool,
    pub stitching_key: Option<String>,
    pub char_start: usize,
    pub char_end: usize,
}

/// Overlap between consecutive windows, absolute or relative.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Overlap {
    Tokens(usize),
    Percent(u8),
}

#[derive(Debug, Clone)]
pub struct WindowOptions {
    pub max_tokens: usize,
    pub overlap: Overlap,
    pub preserve_units: bool,
}

impl WindowOptions {
    pub(crate) fn overlap_tokens(&self) -> usize {
        let raw = match self.overlap {
            Overlap::Tokens(tokens) => tokens,
            Overlap::Percent(pct) => self.max_tokens * usize::from(pct.min(100)) / 100,
        };
        // A window must always advance by at least one token.
        raw.min(self.max_tokens.saturating_sub(1))
    }
}

#[derive(Debug, Clone, Copy)]
struct Token {
    start: usize,
    end: usize,
}

fn tokenize(text: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut start = None;
    for (idx, ch) in text.char_indices() {
        if ch.is_whitespace() {
            if let Some(s) = start.take() {
                tokens.push(Token { start: s, end: idx });
            }
        } else if start.is_none() {
            start = Some(idx);
        }
    }
    if let Some(s) = start {
        tokens.push(Token {
            start: s,
            end: text.len(),
        });
    }
    tokens
}

/// Splits a document into ordered, overlap-padded windows.
///
/// Empty or whitespace-only input yields zero windows.
pub fn window_document(doc_id: &str, text: &str, options: &WindowOptions) -> Vec<Window> {
    if options.max_tokens == 0 {
        return Vec::new();
    }
    let tokens = tokenize(text);
    if tokens.is_empty() {
        return Vec::new();
    }

    let mut windows = Vec::new();
    if options.preserve_units {
        let units = detect_units(doc_id, text, &tokens);
        emit_unit_windows(doc_id, text, &tokens, &units, options, &mut windows);
    } else {
        emit_plain_windows(
            doc_id,
            text,
            &tokens,
            0,
            tokens.len(),
            options,
            ChunkKind::Prose,
            None,
            true,
            &mut windows,
        );
    }

    windows
}

#[allow(clippy::too_many_arguments)]
fn emit_plain_windows(
    doc_id: &str,
    text: &str,
    tokens: &[Token],
    span_start: usize,
    span_end: usize,
    options: &WindowOptions,
    kind: ChunkKind,
    stitching_key: Option<&str>,
    complete: bool,
    out: &mut Vec<Window>,
) {
    let overlap = options.overlap_tokens();
    let step = options.max_tokens - overlap;
    let mut start = span_start;
    loop {
        let end = (start + options.max_tokens).min(span_end);
        out.push(make_window(
            doc_id, text, tokens, start, end, kind, complete, stitching_key,
            out.len(),
        ));
        if end == span_end {
            break;
        }
        start += step;
    }
}

#[allow(clippy::too_many_arguments)]
fn make_window(
    doc_id: &str,
    text: &str,
    tokens: &[Token],
    start_token: usize,
    end_token: usize,
    kind: ChunkKind,
    complete: bool,
    stitching_key: Option<&str>,
    index: usize,
) -> Window {
    let char_start = tokens[start_token].start;
    let char_end = tokens[end_token - 1].end;
    Window {
        window_id: format!("{doc_id}#{index}"),
        source_doc_id: doc_id.to_owned(),
        start_token,
        end_token,
        text: text[char_start..char_end].to_owned(),
        kind,
        complete,
        stitching_key: stitching_key.map(str::to_owned),
        char_start,
        char_end,
    }
}

#[derive(Debug, Clone)]
struct Unit {
    start_token: usize,
    end_token: usize,
    kind: ChunkKind,
    key: String,
}

/// Detects structural unit boundaries by line prefix. A new unit begins at
/// function/class definitions and markdown headings; everything before the
/// first boundary is one prose unit.
fn detect_units(doc_id: &str, text: &str, tokens: &[Token]) -> Vec<Unit> {
    let mut boundaries: Vec<(usize, ChunkKind)> = Vec::new();
    let mut offset = 0usize;
    for line in text.split_inclusive('\n') {
        if let Some(kind) = unit_kind(line) {
            boundaries.push((offset, kind));
        }
        offset += line.len();
    }

    if boundaries.first().map_or(true, |(start, _)| *start > 0) {
        boundaries.insert(0, (0, ChunkKind::Prose));
    }

    let mut units = Vec::with_capacity(boundaries.len());
    for (idx, (char_start, kind)) in boundaries.iter().enumerate() {
        let char_end = boundaries
            .get(idx + 1)
            .map_or(text.len(), |(next, _)| *next);
        let start_token = tokens.partition_point(|t| t.start < *char_start);
        let end_token = tokens.partition_point(|t| t.start < char_end);
        if start_token == end_token {
            continue;
        }
        units.push(Unit {
            start_token,
            end_token,
            kind: *kind,
            key: format!("{doc_id}:unit{}", units.len()),
        });
    }
    units
}

fn unit_kind(line: &str) -> Option<ChunkKind> {
    let trimmed = line.trim_start();
    let function_prefixes = ["fn ", "pub fn ", "async fn ", "pub async fn ", "def ", "async def "];
    let class_prefixes = ["class ", "struct ", "pub struct ", "impl ", "enum ", "pub enum ", "trait ", "pub trait "];

    if function_prefixes.iter().any(|p| trimmed.starts_with(p)) {
        return Some(ChunkKind::CodeFunction);
    }
    if class_prefixes.iter().any(|p| trimmed.starts_with(p)) {
        return Some(ChunkKind::CodeClass);
    }
    // Markdown heading: 1-6 hashes followed by a space. The space matters,
    // otherwise Python/shell comments open spurious units.
    let hashes = trimmed.chars().take_while(|c| *c == '#').count();
    if (1..=6).contains(&hashes) && trimmed[hashes..].starts_with(' ') {
        return Some(ChunkKind::Prose);
    }
    None
}

fn emit_unit_windows(
    doc_id: &str,
    text: &str,
    tokens: &[Token],
    units: &[Unit],
    options: &WindowOptions,
    out: &mut Vec<Window>,
) {
    let mut idx = 0usize;
    while idx < units.len() {
        let unit = &units[idx];
        let unit_len = unit.end_token - unit.start_token;

        if unit_len > options.max_tokens {
            // The unit alone exceeds the window size: hard-split with the
            // configured overlap and flag every fragment incomplete.
            emit_plain_windows(
                doc_id,
                text,
                tokens,
                unit.start_token,
                unit.end_token,
                options,
                unit.kind,
                Some(&unit.key),
                false,
                out,
            );
            idx += 1;
            continue;
        }

        // Pack whole consecutive units into one window while they fit.
        let start = unit.start_token;
        let mut end = unit.end_token;
        let mut last = idx;
        while last + 1 < units.len() {
            let next = &units[last + 1];
            if next.end_token - start > options.max_tokens {
                break;
            }
            end = next.end_token;
            last += 1;
        }

        let single_unit = last == idx;
        out.push(make_window(
            doc_id,
            text,
            tokens,
            start,
            end,
            unit.kind,
            true,
            single_unit.then_some(unit.key.as_str()),
            out.len(),
        ));
        idx = last + 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(count: usize) -> String {
        (0..count)
            .map(|i| format!("word{i}"))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn options(max_tokens: usize, overlap: Overlap) -> WindowOptions {
        WindowOptions {
            max_tokens,
            overlap,
            preserve_units: false,
        }
    }

    #[test]
    fn empty_input_yields_zero_windows() {
        let opts = options(50, Overlap::Percent(33));
        assert!(window_document("doc", "", &opts).is_empty());
        assert!(window_document("doc", "   \n\t  ", &opts).is_empty());
    }

    #[test]
    fn short_document_fits_one_window_starting_at_zero() {
        // ~40 tokens against a 50-token window.
        let opts = options(50, Overlap::Percent(33));
        let windows = window_document("doc", &words(40), &opts);
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].start_token, 0);
        assert_eq!(windows[0].end_token, 40);
        assert!(windows[0].complete);
    }

    #[test]
    fn long_document_produces_overlapping_windows() {
        // ~220 tokens, 50-token windows, 33% overlap.
        let opts = options(50, Overlap::Percent(33));
        let windows = window_document("doc", &words(220), &opts);
        assert!(windows.len() >= 4, "got {} windows", windows.len());

        let overlap = 50 * 33 / 100;
        for pair in windows.windows(2) {
            assert_eq!(pair[0].end_token - pair[1].start_token, overlap);
        }
    }

    #[test]
    fn windows_cover_document_without_gaps() {
        let opts = options(20, Overlap::Tokens(5));
        let windows = window_document("doc", &words(100), &opts);
        assert_eq!(windows[0].start_token, 0);
        assert_eq!(windows.last().unwrap().end_token, 100);
        for pair in windows.windows(2) {
            assert!(pair[1].start_token < pair[0].end_token);
        }
    }

    #[test]
    fn token_positions_satisfy_ordering_invariant() {
        let opts = options(10, Overlap::Tokens(3));
        for window in window_document("doc", &words(37), &opts) {
            assert!(window.start_token < window.end_token);
        }
    }

    #[test]
    fn window_text_matches_token_span() {
        let opts = options(4, Overlap::Tokens(1));
        let windows = window_document("doc", "alpha beta gamma delta epsilon zeta", &opts);
        assert_eq!(windows[0].text, "alpha beta gamma delta");
        assert_eq!(windows[1].start_token, 3);
        assert!(windows[1].text.starts_with("delta"));
    }

    #[test]
    fn preserve_units_keeps_small_functions_whole() {
        let text = "fn alpha() {\n  a();\n}\nfn beta() {\n  b();\n  c();\n}\n";
        let opts = WindowOptions {
            max_tokens: 8,
            overlap: Overlap::Tokens(2),
            preserve_units: true,
        };
        let windows = window_document("lib.rs", text, &opts);
        for window in &windows {
            assert!(window.complete);
            // No window starts mid-unit.
            assert!(window.text.trim_start().starts_with("fn "));
        }
    }

    #[test]
    fn oversized_unit_is_hard_split_and_flagged_incomplete() {
        let body = (0..30).map(|i| format!("stmt{i}();")).collect::<Vec<_>>().join("\n  ");
        let text = format!("fn huge() {{\n  {body}\n}}\n");
        let opts = WindowOptions {
            max_tokens: 10,
            overlap: Overlap::Tokens(2),
            preserve_units: true,
        };
        let windows = window_document("big.rs", &text, &opts);
        assert!(windows.len() > 1);
        for window in &windows {
            assert!(!window.complete);
            assert_eq!(window.kind, ChunkKind::CodeFunction);
            assert_eq!(window.stitching_key.as_deref(), Some("big.rs:unit0"));
        }
    }

    #[test]
    fn hash_comments_inside_code_do_not_open_units() {
        let text = "def fetch():\n    # retry later\n    return None\n";
        let opts = WindowOptions {
            max_tokens: 32,
            overlap: Overlap::Tokens(4),
            preserve_units: true,
        };
        let windows = window_document("job.py", text, &opts);
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].kind, ChunkKind::CodeFunction);
        assert!(windows[0].text.contains("# retry later"));
    }

    #[test]
    fn markdown_headings_start_prose_units() {
        let text = "# Intro\nsome text here\n## Details\nmore text follows\n";
        let opts = WindowOptions {
            max_tokens: 4,
            overlap: Overlap::Tokens(1),
            preserve_units: true,
        };
        let windows = window_document("readme.md", text, &opts);
        assert!(windows.iter().all(|w| w.kind == ChunkKind::Prose));
        assert!(windows[0].text.starts_with("# Intro"));
    }
}
