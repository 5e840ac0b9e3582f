//! Question cleanup and keyword extraction.

use std::collections::BTreeSet;

/// Tokens at or below this many characters are discarded.
const MIN_TOKEN_CHARS: usize = 4;

/// Keywords composing the primary lexical search text.
pub const DEFAULT_SEARCH_KEYWORDS: usize = 5;

/// Question words, articles and generic dosage units in English and French.
const STOP_WORDS: &[&str] = &[
    "what", "are", "the", "is", "a", "an", "how", "much", "which", "does", "with", "from",
    "that", "this", "have", "dose", "dosage", "ingredients", "composition", "contain",
    "contains", "ppm", "mg", "ml", "les", "des", "une", "pour", "dans", "avec", "quelle",
    "quel", "quels", "quelles", "est", "sont", "combien", "contient", "comment", "posologie",
];

/// Keyword form of a raw question.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NormalizedQuery {
    /// Distinct keywords, longest first, ties in lexicographic order.
    pub keywords: Vec<String>,
    /// Top keywords joined by single spaces.
    pub search_text: String,
}

impl NormalizedQuery {
    /// All keywords joined by single spaces.
    pub fn canonical(&self) -> String {
        self.keywords.join(" ")
    }

    /// The `count` most discriminative keywords.
    pub fn top_keywords(&self, count: usize) -> &[String] {
        &self.keywords[..count.min(self.keywords.len())]
    }

    pub fn is_empty(&self) -> bool {
        self.keywords.is_empty()
    }
}

/// Normalize a question using the default search keyword count.
pub fn normalize_query(raw: &str) -> NormalizedQuery {
    normalize_query_with(raw, DEFAULT_SEARCH_KEYWORDS)
}

/// Normalize a question, composing the search text from `search_keywords` terms.
pub fn normalize_query_with(raw: &str, search_keywords: usize) -> NormalizedQuery {
    let spaced = split_letter_digit_runs(&raw.to_lowercase());
    let unique: BTreeSet<String> = spaced
        .split_whitespace()
        .filter(|token| token.chars().count() >= MIN_TOKEN_CHARS)
        .filter(|token| !STOP_WORDS.contains(token))
        .map(str::to_string)
        .collect();

    let mut keywords: Vec<String> = unique.into_iter().collect();
    // BTreeSet already yields lexicographic order; the stable sort keeps it for ties.
    keywords.sort_by_key(|keyword| std::cmp::Reverse(keyword.chars().count()));
    let search_text = keywords
        .iter()
        .take(search_keywords)
        .cloned()
        .collect::<Vec<_>>()
        .join(" ");
    NormalizedQuery {
        keywords,
        search_text,
    }
}

/// Replace punctuation with spaces and separate adjacent letters and digits.
fn split_letter_digit_runs(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 8);
    let mut previous: Option<char> = None;
    for ch in text.chars() {
        if !ch.is_alphanumeric() {
            out.push(' ');
            previous = None;
            continue;
        }
        if let Some(prev) = previous {
            let boundary = (prev.is_alphabetic() && ch.is_numeric())
                || (prev.is_numeric() && ch.is_alphabetic());
            if boundary {
                out.push(' ');
            }
        }
        out.push(ch);
        previous = Some(ch);
    }
    out
}
