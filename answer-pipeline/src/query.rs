//! Deterministic query rewriting. The raw question is turned into a small
//! set of variants that play to the strengths of each retrieval channel,
//! plus an optional document hint when the question names a specific file.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::scoring::extract_keywords;

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "can", "do", "does", "for", "from", "how",
    "in", "is", "it", "of", "on", "or", "that", "the", "this", "to", "was", "what", "when",
    "where", "which", "who", "why", "will", "with", "you",
];

const HINT_EXTENSIONS: &[&str] = &[
    ".md", ".rs", ".py", ".txt", ".toml", ".yaml", ".yml", ".json", ".ts", ".js", ".go", ".java",
];

const SHORT_MAX_TERMS: usize = 8;
const TITLE_MAX_TERMS: usize = 6;

/// A file the question explicitly points at; retrieval prefetches its
/// chunks so the pointer cannot be lost to ranking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentHint {
    pub file_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryVariants {
    pub raw: String,
    /// Content terms in original order, lowercased, stopwords removed.
    pub short: String,
    /// Capitalized form of the leading content terms, for title matching.
    pub title: String,
    /// Sorted deduplicated keywords, for the lexical index.
    pub lexical: String,
    pub document_hint: Option<DocumentHint>,
}

/// Rewrites a question into its retrieval variants. Same input always
/// yields the same output; no model call is involved.
pub fn rewrite_question(question: &str) -> QueryVariants {
    let content_terms: Vec<String> = question
        .split(|c: char| !c.is_alphanumeric() && c != '.' && c != '/' && c != '_' && c != '-')
        .filter(|t| !t.is_empty())
        .map(str::to_ascii_lowercase)
        .filter(|t| !STOPWORDS.contains(&t.as_str()))
        .collect();

    let short = content_terms
        .iter()
        .take(SHORT_MAX_TERMS)
        .cloned()
        .collect::<Vec<_>>()
        .join(" ");

    let title = content_terms
        .iter()
        .take(TITLE_MAX_TERMS)
        .map(|t| capitalize(t))
        .collect::<Vec<_>>()
        .join(" ");

    let lexical = extract_keywords(question).join(" ");

    let document_hint = detect_document_hint(question);
    if let Some(hint) = &document_hint {
        debug!(file_path = %hint.file_path, "question carries a document hint");
    }

    QueryVariants {
        raw: question.to_owned(),
        short,
        title,
        lexical,
        document_hint,
    }
}

fn capitalize(term: &str) -> String {
    let mut chars = term.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Finds an explicit file reference in the question. Three shapes are
/// recognized: a token with a known extension, a backtick-quoted path,
/// and the phrase "according to <path>".
fn detect_document_hint(question: &str) -> Option<DocumentHint> {
    if let Some(path) = backticked_path(question) {
        return Some(DocumentHint { file_path: path });
    }

    let tokens: Vec<&str> = question.split_whitespace().collect();

    for (i, token) in tokens.iter().enumerate() {
        let cleaned = trim_punctuation(token);
        if looks_like_path(cleaned) {
            return Some(DocumentHint {
                file_path: cleaned.to_owned(),
            });
        }
        // "according to X" where X is the next token, even without a
        // recognized extension, as long as it contains a separator.
        if token.eq_ignore_ascii_case("according")
            && tokens.get(i + 1).is_some_and(|t| t.eq_ignore_ascii_case("to"))
        {
            if let Some(next) = tokens.get(i + 2) {
                let cleaned = trim_punctuation(next);
                if cleaned.contains('/') || cleaned.contains('.') {
                    return Some(DocumentHint {
                        file_path: cleaned.to_owned(),
                    });
                }
            }
        }
    }

    None
}

fn backticked_path(question: &str) -> Option<String> {
    let start = question.find('`')?;
    let rest = &question[start + 1..];
    let end = rest.find('`')?;
    let inner = rest[..end].trim();
    if inner.is_empty() || inner.contains(char::is_whitespace) {
        return None;
    }
    (looks_like_path(inner) || inner.contains('/')).then(|| inner.to_owned())
}

fn looks_like_path(token: &str) -> bool {
    HINT_EXTENSIONS
        .iter()
        .any(|ext| token.len() > ext.len() && token.to_ascii_lowercase().ends_with(ext))
}

fn trim_punctuation(token: &str) -> &str {
    token.trim_matches(|c: char| !c.is_alphanumeric() && c != '.' && c != '/' && c != '_' && c != '-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewriting_is_deterministic() {
        let a = rewrite_question("How does the windowing overlap work?");
        let b = rewrite_question("How does the windowing overlap work?");
        assert_eq!(a.short, b.short);
        assert_eq!(a.title, b.title);
        assert_eq!(a.lexical, b.lexical);
        assert_eq!(a.document_hint, b.document_hint);
    }

    #[test]
    fn short_variant_drops_stopwords_and_keeps_order() {
        let variants = rewrite_question("What is the default overlap between windows?");
        assert_eq!(variants.short, "default overlap between windows");
    }

    #[test]
    fn title_variant_capitalizes_leading_terms() {
        let variants = rewrite_question("what is the retrieval fusion weighting?");
        assert_eq!(variants.title, "Retrieval Fusion Weighting");
    }

    #[test]
    fn lexical_variant_is_sorted_keywords() {
        let variants = rewrite_question("windows overlap windows");
        assert_eq!(variants.lexical, "overlap windows");
    }

    #[test]
    fn filename_token_becomes_a_document_hint() {
        let variants = rewrite_question("What does CHANGELOG.md say about v2?");
        assert_eq!(
            variants.document_hint,
            Some(DocumentHint {
                file_path: "CHANGELOG.md".to_owned()
            })
        );
    }

    #[test]
    fn backticked_path_becomes_a_document_hint() {
        let variants = rewrite_question("Summarize the loop in `src/pipeline/mod.rs` please");
        assert_eq!(
            variants.document_hint,
            Some(DocumentHint {
                file_path: "src/pipeline/mod.rs".to_owned()
            })
        );
    }

    #[test]
    fn according_to_phrase_becomes_a_document_hint() {
        let variants = rewrite_question("According to docs/setup.md, which port is used?");
        assert_eq!(
            variants.document_hint,
            Some(DocumentHint {
                file_path: "docs/setup.md".to_owned()
            })
        );
    }

    #[test]
    fn plain_question_has_no_hint() {
        let variants = rewrite_question("Why does retrieval fail open?");
        assert_eq!(variants.document_hint, None);
    }
}
