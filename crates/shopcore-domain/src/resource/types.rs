//! Collaborator trait and configuration for cache-aside resources.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::DomainResult;

/// A value read from the cache tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResource<R> {
    pub resource: R,
    /// True when the entry is stale and should be refreshed.
    pub should_revalidate: bool,
}

impl<R> CachedResource<R> {
    pub fn fresh(resource: R) -> Self {
        Self {
            resource,
            should_revalidate: false,
        }
    }

    pub fn stale(resource: R) -> Self {
        Self {
            resource,
            should_revalidate: true,
        }
    }
}

/// The cached-getter / fresh-getter / persist triple behind a
/// [`SingleFlightResource`](super::SingleFlightResource).
///
/// Implementations are the consumers of this crate: a commerce API client,
/// a database repository, a session store.
#[async_trait]
pub trait ResourceProvider: Send + Sync + 'static {
    /// Request argument. Its serialized form identifies the resource.
    type Argument: Serialize + Send + Sync + 'static;
    /// Value served to callers.
    type Resource: Clone + Send + Sync + 'static;

    /// Reads the cache tier. Errors are treated as a miss.
    async fn get_cached(
        &self,
        argument: &Self::Argument,
    ) -> DomainResult<Option<CachedResource<Self::Resource>>>;

    /// Reads the source of truth.
    async fn get_fresh(&self, argument: &Self::Argument) -> DomainResult<Option<Self::Resource>>;

    /// Writes `resource` back to the cache tier. `None` removes the entry.
    async fn persist(
        &self,
        argument: &Self::Argument,
        resource: Option<&Self::Resource>,
    ) -> DomainResult<()>;
}

/// How long a key's failure streak survives without another failed
/// revalidation.
pub const DEFAULT_FAILURE_STREAK_TTL: Duration = Duration::from_secs(600);

/// Configuration for a cache-aside resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceConfig {
    /// Serve stale cached values immediately and refresh them on a
    /// background task.
    pub revalidate_in_background: bool,
    /// After this many consecutive failed revalidations of one key, persist
    /// `None` so the stale entry stops being served. `None` only logs.
    pub evict_after_failures: Option<u32>,
    /// A failure streak is forgotten this long after its last failure.
    /// Unused unless `evict_after_failures` is set.
    pub failure_streak_ttl: Duration,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            revalidate_in_background: false,
            evict_after_failures: None,
            failure_streak_ttl: DEFAULT_FAILURE_STREAK_TTL,
        }
    }
}

impl ResourceConfig {
    /// Enables or disables stale-while-revalidate.
    pub fn with_background_revalidation(mut self, enabled: bool) -> Self {
        self.revalidate_in_background = enabled;
        self
    }

    /// Sets the consecutive-failure threshold for dropping stale entries.
    pub fn with_evict_after_failures(mut self, failures: u32) -> Self {
        self.evict_after_failures = Some(failures);
        self
    }

    pub fn with_failure_streak_ttl(mut self, ttl: Duration) -> Self {
        self.failure_streak_ttl = ttl;
        self
    }
}
