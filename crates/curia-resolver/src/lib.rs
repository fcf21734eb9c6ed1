//! Entity resolution for Curia.
//!
//! Maps free-text entity mentions extracted by the LLM (company names,
//! customers) to canonical records before capability servers build their
//! filters.  Matching is TF-IDF cosine similarity over a corpus built from
//! each record's name, description, industry, type, and aliases, with an
//! exact-name short circuit, filtered through the caller's access scope.
//!
//! The fitted model is immutable; `refit` swaps an `Arc` so readers never
//! block on a rebuild.

pub mod error;
pub mod resolver;
pub mod text;
pub mod tfidf;

pub use error::{ResolverError, Result};
pub use resolver::{
    AccountMatch, AccountRecord, AccountResolver, Resolution, ResolverConfig,
};
pub use tfidf::{FittedVectorizer, SparseVector, TfidfConfig, cosine_similarity};
