use common::types::ChunkKind;
use serde::{Deserialize, Serialize};

use super::Window;

/// Result of merging adjacent windows that belong to one structural unit.
/// Source window ids are kept as provenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StitchedChunk {
    pub source_doc_id: String,
    pub stitching_key: Option<String>,
    pub start_token: usize,
    pub end_token: usize,
    pub text: String,
    pub kind: ChunkKind,
    pub complete: bool,
    pub source_window_ids: Vec<String>,
}

/// Merges adjacent windows sharing a stitching key, up to `max_merged_tokens`
/// per merged chunk. Windows without a key pass through as singletons.
///
/// `doc_text` must be the text the windows were cut from; merged text is
/// re-sliced from it so overlap regions are not duplicated.
pub fn stitch_windows(
    doc_text: &str,
    windows: &[Window],
    max_merged_tokens: usize,
) -> Vec<StitchedChunk> {
    let mut stitched = Vec::new();
    let mut idx = 0usize;

    while idx < windows.len() {
        let first = &windows[idx];
        let mut last = idx;

        if first.stitching_key.is_some() {
            while last + 1 < windows.len() {
                let next = &windows[last + 1];
                if next.stitching_key != first.stitching_key {
                    break;
                }
                if next.end_token - first.start_token > max_merged_tokens {
                    break;
                }
                last += 1;
            }
        }

        let run = &windows[idx..=last];
        let final_window = &windows[last];
        stitched.push(StitchedChunk {
            source_doc_id: first.source_doc_id.clone(),
            stitching_key: first.stitching_key.clone(),
            start_token: first.start_token,
            end_token: final_window.end_token,
            text: doc_text[first.char_start..final_window.char_end].to_owned(),
            kind: first.kind,
            // A merge that absorbed every fragment of the unit restores it.
            complete: run.iter().all(|w| w.complete) || run_covers_unit(windows, idx, last),
            source_window_ids: run.iter().map(|w| w.window_id.clone()).collect(),
        });

        idx = last + 1;
    }

    stitched
}

fn run_covers_unit(windows: &[Window], first: usize, last: usize) -> bool {
    let key = &windows[first].stitching_key;
    if key.is_none() {
        return false;
    }
    let before = first
        .checked_sub(1)
        .map(|i| &windows[i])
        .is_some_and(|w| w.stitching_key == *key);
    let after = windows
        .get(last + 1)
        .is_some_and(|w| w.stitching_key == *key);
    !before && !after
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::{window_document, Overlap, WindowOptions};

    #[test]
    fn stitching_restores_a_hard_split_unit() {
        let body = (0..30)
            .map(|i| format!("stmt{i}();"))
            .collect::<Vec<_>>()
            .join("\n  ");
        let text = format!("fn huge() {{\n  {body}\n}}\n");
        let opts = WindowOptions {
            max_tokens: 10,
            overlap: Overlap::Tokens(2),
            preserve_units: true,
        };
        let windows = window_document("big.rs", &text, &opts);
        assert!(windows.len() > 1);

        let stitched = stitch_windows(&text, &windows, 100);
        assert_eq!(stitched.len(), 1);
        let merged = &stitched[0];
        assert_eq!(merged.text, text.trim_end_matches('\n'));
        assert!(merged.complete);
        assert_eq!(merged.source_window_ids.len(), windows.len());
    }

    #[test]
    fn merge_stops_at_the_size_ceiling() {
        let body = (0..60)
            .map(|i| format!("stmt{i}();"))
            .collect::<Vec<_>>()
            .join("\n  ");
        let text = format!("fn huge() {{\n  {body}\n}}\n");
        let opts = WindowOptions {
            max_tokens: 10,
            overlap: Overlap::Tokens(2),
            preserve_units: true,
        };
        let windows = window_document("big.rs", &text, &opts);
        let stitched = stitch_windows(&text, &windows, 30);

        assert!(stitched.len() > 1);
        for chunk in &stitched {
            assert!(chunk.end_token - chunk.start_token <= 30);
            assert!(!chunk.source_window_ids.is_empty());
        }
        assert!(!stitched[0].complete);
    }

    #[test]
    fn keyless_windows_pass_through_unmerged() {
        let text: String = (0..40)
            .map(|i| format!("word{i}"))
            .collect::<Vec<_>>()
            .join(" ");
        let opts = WindowOptions {
            max_tokens: 10,
            overlap: Overlap::Tokens(2),
            preserve_units: false,
        };
        let windows = window_document("plain.txt", &text, &opts);
        let stitched = stitch_windows(&text, &windows, 100);
        assert_eq!(stitched.len(), windows.len());
        for (chunk, window) in stitched.iter().zip(windows.iter()) {
            assert_eq!(chunk.source_window_ids, vec![window.window_id.clone()]);
        }
    }
}
