//! Resolver error types.

/// Unified error type for the resolver crate.
#[derive(Debug, thiserror::Error)]
pub enum ResolverError {
    /// `fit` was called with no usable records.
    #[error("cannot fit resolver on an empty corpus")]
    EmptyCorpus,

    /// The corpus produced no vocabulary (e.g. every field was stopwords).
    #[error("corpus produced an empty vocabulary")]
    EmptyVocabulary,
}

/// Convenience alias used throughout the resolver crate.
pub type Result<T> = std::result::Result<T, ResolverError>;
