//! Error types for the segmented cache.

use thiserror::Error;

/// Result type alias using the cache's [`Error`] type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the cache's public API.
///
/// Internal invariant violations (recency transitions from the wrong source
/// state, policy bookkeeping drift) are programming errors and abort via
/// assertions rather than appearing here.
#[derive(Debug, Error)]
pub enum Error {
    /// A construction parameter was out of range.
    #[error("invalid configuration: {0}")]
    InvalidArgument(&'static str),
}
