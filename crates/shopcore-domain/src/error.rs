//! Domain error types for caching operations.

use thiserror::Error;

/// Domain-specific errors for cache and resource operations.
///
/// Errors are `Clone` because a single failed revalidation is fanned out
/// to every caller waiting on it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    /// The cached-getter tier failed.
    #[error("cache lookup failed: {message}")]
    CacheLookup { message: String },

    /// Fetching a fresh value from the source of truth failed.
    #[error("fresh fetch failed: {message}")]
    FreshFetch { message: String },

    /// Writing a fetched value back to the cache tier failed.
    #[error("persist failed: {message}")]
    Persist { message: String },

    /// The request argument could not be encoded into a cache key.
    #[error("cannot derive cache key: {message}")]
    KeyEncoding { message: String },

    /// The task producing a shared result went away without reporting one.
    #[error("in-flight operation for '{resource}' was abandoned")]
    Abandoned { resource: String },
}

impl DomainError {
    pub fn cache_lookup(message: impl Into<String>) -> Self {
        Self::CacheLookup {
            message: message.into(),
        }
    }

    pub fn fresh_fetch(message: impl Into<String>) -> Self {
        Self::FreshFetch {
            message: message.into(),
        }
    }

    pub fn persist(message: impl Into<String>) -> Self {
        Self::Persist {
            message: message.into(),
        }
    }
}

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;
