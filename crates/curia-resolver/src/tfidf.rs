//! Sparse TF-IDF vectorization.
//!
//! Token n-grams (unigram through trigram by default), sublinear term
//! frequency, smoothed IDF, L2-normalized sparse vectors.  The vocabulary
//! is capped by document frequency with deterministic tie-breaking so a
//! refit over the same corpus always produces the same model.

use std::collections::HashMap;

use crate::error::{Result, ResolverError};

/// Vectorizer knobs.
#[derive(Debug, Clone)]
pub struct TfidfConfig {
    /// Vocabulary size cap.
    pub max_features: usize,
    /// Smallest n-gram length.
    pub ngram_min: usize,
    /// Largest n-gram length.
    pub ngram_max: usize,
    /// Drop n-grams present in more than this fraction of documents.
    pub max_df_ratio: f32,
}

impl Default for TfidfConfig {
    fn default() -> Self {
        Self {
            max_features: 5000,
            ngram_min: 1,
            ngram_max: 3,
            max_df_ratio: 0.95,
        }
    }
}

/// A sparse vector: `(vocabulary index, weight)` pairs sorted by index.
pub type SparseVector = Vec<(usize, f32)>;

/// Cosine similarity of two L2-normalized sparse vectors (their dot
/// product).  Both inputs must be sorted by index.
#[must_use]
pub fn cosine_similarity(a: &SparseVector, b: &SparseVector) -> f32 {
    let (mut i, mut j) = (0, 0);
    let mut dot = 0.0;
    while i < a.len() && j < b.len() {
        match a[i].0.cmp(&b[j].0) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                dot += a[i].1 * b[j].1;
                i += 1;
                j += 1;
            }
        }
    }
    dot
}

/// Produce the n-grams of a token sequence as space-joined strings.
fn ngrams(tokens: &[String], min: usize, max: usize) -> Vec<String> {
    let mut out = Vec::new();
    for n in min..=max.min(tokens.len()) {
        for window in tokens.windows(n) {
            out.push(window.join(" "));
        }
    }
    out
}

/// An immutable fitted vectorizer.
#[derive(Debug)]
pub struct FittedVectorizer {
    vocabulary: HashMap<String, usize>,
    idf: Vec<f32>,
    config: TfidfConfig,
}

impl FittedVectorizer {
    /// Fit over preprocessed token documents.
    ///
    /// # Errors
    ///
    /// [`ResolverError::EmptyVocabulary`] when no n-gram survives the
    /// document-frequency filters.
    pub fn fit(documents: &[Vec<String>], config: TfidfConfig) -> Result<Self> {
        let n_docs = documents.len();

        // Document frequency per n-gram.
        let mut df: HashMap<String, usize> = HashMap::new();
        for doc in documents {
            let unique: std::collections::HashSet<String> =
                ngrams(doc, config.ngram_min, config.ngram_max)
                    .into_iter()
                    .collect();
            for gram in unique {
                *df.entry(gram).or_insert(0) += 1;
            }
        }

        // Apply the max-df cutoff, then cap by document frequency with
        // lexicographic tie-breaking for determinism.
        let max_df = ((n_docs as f32) * config.max_df_ratio).ceil() as usize;
        let mut terms: Vec<(String, usize)> = df
            .into_iter()
            .filter(|(_, count)| n_docs <= 1 || *count <= max_df)
            .collect();
        terms.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        terms.truncate(config.max_features);

        if terms.is_empty() {
            return Err(ResolverError::EmptyVocabulary);
        }

        let mut vocabulary = HashMap::with_capacity(terms.len());
        let mut idf = Vec::with_capacity(terms.len());
        for (index, (term, count)) in terms.into_iter().enumerate() {
            vocabulary.insert(term, index);
            // Smoothed inverse document frequency.
            idf.push((((1 + n_docs) as f32 / (1 + count) as f32).ln()) + 1.0);
        }

        Ok(Self {
            vocabulary,
            idf,
            config,
        })
    }

    /// Transform preprocessed tokens into a normalized sparse vector.
    #[must_use]
    pub fn transform(&self, tokens: &[String]) -> SparseVector {
        let mut counts: HashMap<usize, f32> = HashMap::new();
        for gram in ngrams(tokens, self.config.ngram_min, self.config.ngram_max) {
            if let Some(&index) = self.vocabulary.get(&gram) {
                *counts.entry(index).or_insert(0.0) += 1.0;
            }
        }

        // Sublinear TF scaled by IDF.
        let mut vector: SparseVector = counts
            .into_iter()
            .map(|(index, tf)| (index, (1.0 + tf.ln()) * self.idf[index]))
            .collect();
        vector.sort_by_key(|(index, _)| *index);

        // L2 normalization.
        let norm: f32 = vector.iter().map(|(_, w)| w * w).sum::<f32>().sqrt();
        if norm > 0.0 {
            for (_, w) in &mut vector {
                *w /= norm;
            }
        }
        vector
    }

    /// Vocabulary size of the fitted model.
    #[must_use]
    pub fn vocabulary_size(&self) -> usize {
        self.vocabulary.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(text: &str) -> Vec<String> {
        text.split_whitespace().map(str::to_owned).collect()
    }

    #[test]
    fn ngrams_cover_configured_range() {
        let tokens = doc("alpha beta gamma");
        let grams = ngrams(&tokens, 1, 3);
        assert!(grams.contains(&"alpha".to_owned()));
        assert!(grams.contains(&"alpha beta".to_owned()));
        assert!(grams.contains(&"alpha beta gamma".to_owned()));
        assert_eq!(grams.len(), 6);
    }

    #[test]
    fn transformed_vectors_are_normalized() {
        let docs = vec![doc("acme rockets"), doc("globex power")];
        let vectorizer = FittedVectorizer::fit(&docs, TfidfConfig::default()).unwrap();

        let v = vectorizer.transform(&doc("acme rockets"));
        let norm: f32 = v.iter().map(|(_, w)| w * w).sum();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn identical_document_has_highest_similarity() {
        let docs = vec![
            doc("acme rocket supplies"),
            doc("globex power systems"),
            doc("initech software consulting"),
        ];
        let vectorizer = FittedVectorizer::fit(&docs, TfidfConfig::default()).unwrap();

        let query = vectorizer.transform(&doc("acme rocket supplies"));
        let sims: Vec<f32> = docs
            .iter()
            .map(|d| cosine_similarity(&query, &vectorizer.transform(d)))
            .collect();

        assert!((sims[0] - 1.0).abs() < 1e-5);
        assert!(sims[0] > sims[1]);
        assert!(sims[0] > sims[2]);
    }

    #[test]
    fn disjoint_documents_have_zero_similarity() {
        let docs = vec![doc("alpha beta"), doc("gamma delta")];
        let vectorizer = FittedVectorizer::fit(&docs, TfidfConfig::default()).unwrap();

        let a = vectorizer.transform(&doc("alpha beta"));
        let b = vectorizer.transform(&doc("gamma delta"));
        assert_eq!(cosine_similarity(&a, &b), 0.0);
    }

    #[test]
    fn unknown_tokens_produce_empty_vector() {
        let docs = vec![doc("alpha")];
        let vectorizer = FittedVectorizer::fit(&docs, TfidfConfig::default()).unwrap();
        assert!(vectorizer.transform(&doc("omega")).is_empty());
    }

    #[test]
    fn max_features_caps_vocabulary() {
        let docs = vec![doc("a b c d e f g h"), doc("a b c")];
        let config = TfidfConfig {
            max_features: 4,
            ..TfidfConfig::default()
        };
        let vectorizer = FittedVectorizer::fit(&docs, config).unwrap();
        assert_eq!(vectorizer.vocabulary_size(), 4);
    }

    #[test]
    fn empty_corpus_is_rejected() {
        let err = FittedVectorizer::fit(&[], TfidfConfig::default()).unwrap_err();
        assert!(matches!(err, ResolverError::EmptyVocabulary));
    }

    #[test]
    fn refit_is_deterministic() {
        let docs = vec![doc("acme rockets"), doc("acme power"), doc("globex labs")];
        let a = FittedVectorizer::fit(&docs, TfidfConfig::default()).unwrap();
        let b = FittedVectorizer::fit(&docs, TfidfConfig::default()).unwrap();

        let va = a.transform(&doc("acme"));
        let vb = b.transform(&doc("acme"));
        assert_eq!(va, vb);
    }
}
