//! Account resolution over a fitted TF-IDF model.
//!
//! `resolve` ranks corpus records by cosine similarity to the preprocessed
//! query, short-circuiting to a perfect score when the query is the
//! record's canonical name (or an alias) verbatim.  Candidates outside the
//! caller's access scope never surface.

use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use curia_auth::AccessScope;

use crate::error::{Result, ResolverError};
use crate::text::{normalize, preprocess};
use crate::tfidf::{FittedVectorizer, SparseVector, TfidfConfig, cosine_similarity};

// ---------------------------------------------------------------------------
// Records and outcomes
// ---------------------------------------------------------------------------

/// One entity in the resolution corpus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountRecord {
    /// Canonical entity ID (opaque; this is what access scopes reference).
    pub id: String,
    /// Canonical display name.
    pub name: String,
    /// Free-text description.
    #[serde(default)]
    pub description: Option<String>,
    /// Industry label.
    #[serde(default)]
    pub industry: Option<String>,
    /// Entity type label (customer, partner, ...).
    #[serde(default)]
    pub entity_type: Option<String>,
    /// Alternate names.
    #[serde(default)]
    pub aliases: Vec<String>,
}

impl AccountRecord {
    /// The searchable text for this record: every field concatenated.
    fn corpus_text(&self) -> String {
        let mut parts = vec![self.name.clone()];
        parts.extend(self.aliases.iter().cloned());
        if let Some(d) = &self.description {
            parts.push(d.clone());
        }
        if let Some(i) = &self.industry {
            parts.push(i.clone());
        }
        if let Some(t) = &self.entity_type {
            parts.push(t.clone());
        }
        parts.join(" ")
    }
}

/// A scored candidate.
#[derive(Debug, Clone)]
pub struct AccountMatch {
    /// The matched record.
    pub record: AccountRecord,
    /// Cosine similarity in `[0, 1]` (1.0 for verbatim name matches).
    pub similarity: f32,
}

/// Outcome of resolving one mention.
#[derive(Debug, Clone)]
pub enum Resolution {
    /// A single candidate cleared the confident threshold.
    Confident(AccountMatch),
    /// Multiple plausible candidates; the caller should disambiguate.
    Ambiguous(Vec<AccountMatch>),
    /// Nothing accessible matched above the similarity floor.
    None,
}

/// Resolver knobs.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Candidates below this similarity are dropped.
    pub min_similarity: f32,
    /// A lone candidate at or above this similarity resolves directly.
    pub confident_threshold: f32,
    /// Maximum candidates returned for disambiguation.
    pub max_candidates: usize,
    /// Vectorizer configuration.
    pub tfidf: TfidfConfig,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            min_similarity: 0.3,
            confident_threshold: 0.7,
            max_candidates: 10,
            tfidf: TfidfConfig::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

/// Everything derived from one corpus version.  Immutable once built.
struct FittedModel {
    vectorizer: FittedVectorizer,
    vectors: Vec<SparseVector>,
    records: Vec<AccountRecord>,
    /// Normalized name and alias forms per record, for the exact short
    /// circuit.
    exact_forms: Vec<Vec<String>>,
}

/// Thread-safe account resolver.  `fit`/`refit` swap the model pointer;
/// readers clone the `Arc` and never block each other.
pub struct AccountResolver {
    config: ResolverConfig,
    model: RwLock<Option<Arc<FittedModel>>>,
}

impl AccountResolver {
    /// Create an unfitted resolver.
    #[must_use]
    pub fn new(config: ResolverConfig) -> Self {
        Self {
            config,
            model: RwLock::new(None),
        }
    }

    /// Fit (or refit) the resolver over a corpus.  Existing readers keep
    /// the old model until their request completes.
    pub fn fit(&self, corpus: Vec<AccountRecord>) -> Result<()> {
        if corpus.is_empty() {
            return Err(ResolverError::EmptyCorpus);
        }

        let documents: Vec<Vec<String>> = corpus
            .iter()
            .map(|r| preprocess(&r.corpus_text()))
            .collect();
        let vectorizer = FittedVectorizer::fit(&documents, self.config.tfidf.clone())?;
        let vectors = documents.iter().map(|d| vectorizer.transform(d)).collect();
        let exact_forms = corpus
            .iter()
            .map(|r| {
                let mut forms = vec![normalize(&r.name)];
                forms.extend(r.aliases.iter().map(|a| normalize(a)));
                forms.retain(|f| !f.is_empty());
                forms
            })
            .collect();

        tracing::info!(
            records = corpus.len(),
            vocabulary = vectorizer.vocabulary_size(),
            "account resolver fitted"
        );

        let model = Arc::new(FittedModel {
            vectorizer,
            vectors,
            records: corpus,
            exact_forms,
        });
        *self.model.write().expect("resolver model lock poisoned") = Some(model);
        Ok(())
    }

    /// Whether a model is available.
    #[must_use]
    pub fn is_fitted(&self) -> bool {
        self.model
            .read()
            .expect("resolver model lock poisoned")
            .is_some()
    }

    fn current_model(&self) -> Option<Arc<FittedModel>> {
        self.model
            .read()
            .expect("resolver model lock poisoned")
            .clone()
    }

    /// Resolve one free-text mention against the corpus, constrained by
    /// the caller's access scope.
    pub fn resolve(&self, query: &str, scope: &AccessScope) -> Resolution {
        let Some(model) = self.current_model() else {
            tracing::warn!("account resolver not fitted, returning no candidates");
            return Resolution::None;
        };

        let tokens = preprocess(query);
        if tokens.is_empty() {
            return Resolution::None;
        }
        let normalized = tokens.join(" ");
        let query_vector = model.vectorizer.transform(&tokens);

        let mut candidates: Vec<AccountMatch> = Vec::new();
        for (index, record) in model.records.iter().enumerate() {
            if !scope.can_access(&record.id) {
                continue;
            }

            // Verbatim canonical name (or alias) is a perfect match.
            let similarity = if model.exact_forms[index].iter().any(|f| *f == normalized) {
                1.0
            } else {
                cosine_similarity(&query_vector, &model.vectors[index])
            };

            if similarity >= self.config.min_similarity {
                candidates.push(AccountMatch {
                    record: record.clone(),
                    similarity,
                });
            }
        }

        // Higher similarity first, then lexicographic name.
        candidates.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.record.name.cmp(&b.record.name))
        });
        candidates.truncate(self.config.max_candidates);

        let confident_count = candidates
            .iter()
            .filter(|c| c.similarity >= self.config.confident_threshold)
            .count();

        tracing::debug!(
            query = %query,
            candidates = candidates.len(),
            confident = confident_count,
            "resolved entity mention"
        );

        match (candidates.len(), confident_count) {
            (0, _) => Resolution::None,
            (_, 1) if candidates[0].similarity >= self.config.confident_threshold => {
                Resolution::Confident(candidates.swap_remove(0))
            }
            _ => Resolution::Ambiguous(candidates),
        }
    }

    /// Batch-resolve a list of mentions; only confident resolutions are
    /// returned.  Ambiguous or inaccessible mentions are dropped.
    pub fn resolve_names(&self, names: &[String], scope: &AccessScope) -> Vec<AccountMatch> {
        names
            .iter()
            .filter_map(|name| match self.resolve(name, scope) {
                Resolution::Confident(m) => Some(m),
                _ => None,
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
