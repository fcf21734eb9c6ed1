//! Query and corpus text preprocessing.
//!
//! Pipeline: lowercase, strip everything but letters, whitespace tokenize,
//! drop stopwords, Snowball-stem, drop single-character tokens.  The same
//! pipeline runs over corpus documents at fit time and over queries at
//! resolve time so both land in the same token space.

use std::sync::OnceLock;

use regex::Regex;
use rust_stemmers::{Algorithm, Stemmer};

/// Common English stopwords removed before stemming.
const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "has",
    "have", "he", "her", "his", "i", "in", "is", "it", "its", "my", "of",
    "on", "or", "our", "she", "that", "the", "their", "them", "they", "this",
    "to", "was", "we", "were", "what", "which", "who", "will", "with", "you",
    "your", "about", "into", "over", "under", "not", "no", "do", "does",
    "did", "can", "could", "should", "would", "me", "show", "all", "any",
];

fn non_letter() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^a-z\s]").expect("static pattern compiles"))
}

fn is_stopword(token: &str) -> bool {
    STOPWORDS.contains(&token)
}

/// Preprocess raw text into normalized, stemmed tokens.
#[must_use]
pub fn preprocess(text: &str) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }

    let lowered = text.to_lowercase();
    let scrubbed = non_letter().replace_all(&lowered, " ");
    let stemmer = Stemmer::create(Algorithm::English);

    scrubbed
        .split_whitespace()
        .filter(|t| !is_stopword(t))
        .map(|t| stemmer.stem(t).into_owned())
        .filter(|t| t.len() > 1)
        .collect()
}

/// Preprocess and rejoin into a single normalized string.  Used for
/// exact-name comparison.
#[must_use]
pub fn normalize(text: &str) -> String {
    preprocess(text).join(" ")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
