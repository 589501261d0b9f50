//! Error types for the join-path engine.

use thiserror::Error;

/// Result type alias using the engine's [`Error`] type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by join-path exploration.
#[derive(Debug, Error)]
pub enum Error {
    /// An argument violated the public contract (empty path, vertex already on
    /// the path, non-positive limit).
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// Every complete join path underflowed to zero estimated cardinality
    /// without an exact sample confirming emptiness.
    #[error("join graph produced no join paths with reliable positive cardinality")]
    NoSolutions,

    /// The sampling executor failed; the underlying error is preserved
    /// verbatim.
    #[error("cutoff join sampling failed: {0}")]
    Sampler(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
    /// Wrap an executor-side failure.
    pub fn sampler(err: impl std::error::Error + Send + Sync + 'static) -> Error {
        Error::Sampler(Box::new(err))
    }
}
