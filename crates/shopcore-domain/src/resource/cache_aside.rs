//! Cache-aside resource with single-flight revalidation.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::key::stable_key;
use super::singleflight::{Singleflight, SingleflightGuard, SingleflightSlot};
use super::types::{ResourceConfig, ResourceProvider};
use crate::cache::TtlCache;
use crate::error::{DomainError, DomainResult};

type Outcome<R> = DomainResult<Option<R>>;

/// Cache-aside wrapper that runs at most one fresh fetch per argument.
///
/// Each revalidation runs on its own task, so it completes (and persists)
/// even if every caller waiting on it goes away. That is what lets
/// stale-while-revalidate hand back the cached value immediately.
pub struct SingleFlightResource<P>
where
    P: ResourceProvider,
{
    label: Arc<str>,
    provider: Arc<P>,
    config: ResourceConfig,
    in_flight: Arc<Singleflight<String, Outcome<P::Resource>>>,
    /// Consecutive revalidation failures per key. Only tracked when
    /// `evict_after_failures` is set; a quiet streak expires.
    failures: Arc<TtlCache<String, u32>>,
}

impl<P> std::fmt::Debug for SingleFlightResource<P>
where
    P: ResourceProvider,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleFlightResource")
            .field("label", &self.label)
            .field("config", &self.config)
            .field("in_flight", &self.in_flight.len())
            .finish()
    }
}

impl<P> SingleFlightResource<P>
where
    P: ResourceProvider,
{
    /// Creates a resource. `label` names it in logs and errors.
    pub fn new(label: impl Into<String>, provider: Arc<P>, config: ResourceConfig) -> Self {
        Self {
            label: Arc::from(label.into()),
            provider,
            in_flight: Arc::new(Singleflight::new()),
            failures: Arc::new(TtlCache::new(config.failure_streak_ttl)),
            config,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn config(&self) -> &ResourceConfig {
        &self.config
    }

    /// Number of revalidations currently running.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Number of keys with an open failure streak.
    pub fn failure_streaks(&self) -> usize {
        self.failures.len()
    }

    /// Resolves `argument`, consulting the cache tier first.
    ///
    /// - fresh cache hit: returned without fetching;
    /// - stale hit with background revalidation: stale value returned, the
    ///   refresh continues unobserved;
    /// - otherwise: joins (or starts) the in-flight fetch for this argument
    ///   and returns its outcome.
    pub async fn get(&self, argument: P::Argument) -> DomainResult<Option<P::Resource>> {
        let key = stable_key(&argument)?;

        let cached = match self.provider.get_cached(&argument).await {
            Ok(cached) => cached,
            Err(err) => {
                metrics::counter!("shopcore_resource_lookup_failures_total").increment(1);
                warn!(
                    resource = %self.label,
                    key = %key,
                    error = %err,
                    "cache lookup failed, treating as miss"
                );
                None
            }
        };

        let stale = match cached {
            Some(cached) if !cached.should_revalidate => {
                metrics::counter!("shopcore_resource_cache_hits_total").increment(1);
                return Ok(Some(cached.resource));
            }
            other => other,
        };

        let receiver = self.revalidate(key, argument);

        if let Some(stale) = stale {
            if self.config.revalidate_in_background {
                debug!(resource = %self.label, "serving stale value while revalidating");
                return Ok(Some(stale.resource));
            }
        }

        self.wait_for(receiver).await
    }

    /// Joins the in-flight revalidation for `key`, starting one if needed.
    fn revalidate(
        &self,
        key: String,
        argument: P::Argument,
    ) -> broadcast::Receiver<Outcome<P::Resource>> {
        let sender = match self.in_flight.acquire(key.clone()) {
            SingleflightSlot::Follower(receiver) => return receiver,
            SingleflightSlot::Leader(sender) => sender,
        };

        // Subscribe before spawning so the leader's own caller cannot miss
        // the broadcast.
        let receiver = sender.subscribe();
        let guard = SingleflightGuard::new(Arc::clone(&self.in_flight), key.clone());
        let provider = Arc::clone(&self.provider);
        let failures = Arc::clone(&self.failures);
        let evict_after = self.config.evict_after_failures;
        let label = Arc::clone(&self.label);

        metrics::counter!("shopcore_resource_revalidations_total").increment(1);
        debug!(resource = %label, key = %key, "starting revalidation");

        tokio::spawn(async move {
            let outcome = fetch_and_persist(provider.as_ref(), &argument).await;

            match &outcome {
                Ok(_) => {
                    failures.delete(&key);
                }
                Err(err) => {
                    warn!(resource = %label, key = %key, error = %err, "revalidation failed");

                    if let Some(limit) = evict_after {
                        // Revalidations of one key never overlap, so this
                        // read-then-write cannot race.
                        let consecutive = failures.get(&key).unwrap_or(0) + 1;
                        if consecutive < limit {
                            failures.set(key.clone(), consecutive);
                        } else {
                            failures.delete(&key);
                            match provider.persist(&argument, None).await {
                                Ok(()) => warn!(
                                    resource = %label,
                                    key = %key,
                                    consecutive,
                                    "dropped stale entry after repeated revalidation failures"
                                ),
                                Err(evict_err) => warn!(
                                    resource = %label,
                                    key = %key,
                                    error = %evict_err,
                                    "failed to drop stale entry"
                                ),
                            }
                        }
                    }
                }
            }

            guard.complete();
            // No receivers is fine: every caller may have taken the stale path.
            let _ = sender.send(outcome);
        });

        receiver
    }

    async fn wait_for(
        &self,
        mut receiver: broadcast::Receiver<Outcome<P::Resource>>,
    ) -> DomainResult<Option<P::Resource>> {
        match receiver.recv().await {
            Ok(outcome) => outcome,
            // Sender dropped without sending: the revalidation task panicked.
            Err(_) => Err(DomainError::Abandoned {
                resource: self.label.to_string(),
            }),
        }
    }
}

async fn fetch_and_persist<P>(
    provider: &P,
    argument: &P::Argument,
) -> DomainResult<Option<P::Resource>>
where
    P: ResourceProvider,
{
    let fresh = provider.get_fresh(argument).await?;
    provider.persist(argument, fresh.as_ref()).await?;
    Ok(fresh)
}

/// Registers resource metric descriptions.
pub fn register_resource_metrics() {
    metrics::describe_counter!(
        "shopcore_resource_cache_hits_total",
        "Total number of cache-aside lookups served without revalidation"
    );
    metrics::describe_counter!(
        "shopcore_resource_revalidations_total",
        "Total number of fresh fetches started"
    );
    metrics::describe_counter!(
        "shopcore_resource_lookup_failures_total",
        "Total number of cache tier lookups that failed and were treated as misses"
    );
}
