//! Partitioned micro-batching.
//!
//! Absorbs duplicate lookups issued by unrelated concurrent requests. The
//! window is a few milliseconds long and starts when a partition opens, so a
//! caller that is not actually concurrent with anyone waits at most
//! `max_batch_time`.

use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use shopcore_domain::TimerHandle;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use super::types::{BatchError, BatchResult, PartitionConfig};

/// Processor for one partition's worth of arguments.
#[async_trait]
pub trait PartitionProcessor: Send + Sync + 'static {
    type Argument: Send + Sync + 'static;
    /// Groups submissions, e.g. a shop or transaction id.
    type Partition: Clone + Eq + Hash + Debug + Send + Sync + 'static;
    /// Identifies which result belongs to which argument.
    type MatchKey: Clone + Eq + Hash + Send + Sync + 'static;
    type Output: Clone + Send + Sync + 'static;

    fn label(&self) -> &str;

    fn partition(&self, argument: &Self::Argument) -> Self::Partition;

    fn match_key(&self, argument: &Self::Argument) -> Self::MatchKey;

    /// Returns one entry per argument, in argument order; `None` when an
    /// argument has no result. Never called with an empty vector.
    async fn process(
        &self,
        partition: &Self::Partition,
        arguments: Vec<Self::Argument>,
    ) -> BatchResult<Vec<Option<Self::Output>>>;
}

type Reply<P> = oneshot::Sender<BatchResult<Option<<P as PartitionProcessor>::Output>>>;

struct Submission<P: PartitionProcessor> {
    argument: P::Argument,
    reply: Reply<P>,
}

struct Partition<P: PartitionProcessor> {
    submissions: Vec<Submission<P>>,
    timer: Option<TimerHandle>,
    generation: u64,
}

struct BatcherState<P: PartitionProcessor> {
    processor: Arc<P>,
    config: PartitionConfig,
    partitions: DashMap<P::Partition, Partition<P>>,
    next_generation: AtomicU64,
}

/// Merges concurrent submissions that share a partition key into one
/// processor call.
pub struct PartitionedBatcher<P: PartitionProcessor> {
    state: Arc<BatcherState<P>>,
}

impl<P: PartitionProcessor> Clone for PartitionedBatcher<P> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<P: PartitionProcessor> std::fmt::Debug for PartitionedBatcher<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartitionedBatcher")
            .field("processor", &self.state.processor.label())
            .field("config", &self.state.config)
            .field("pending_partitions", &self.state.partitions.len())
            .finish()
    }
}

impl<P: PartitionProcessor> PartitionedBatcher<P> {
    pub fn new(processor: Arc<P>, config: PartitionConfig) -> Self {
        Self {
            state: Arc::new(BatcherState {
                processor,
                config,
                partitions: DashMap::new(),
                next_generation: AtomicU64::new(0),
            }),
        }
    }

    pub fn config(&self) -> &PartitionConfig {
        &self.state.config
    }

    /// Number of partitions currently accepting submissions.
    pub fn pending_partitions(&self) -> usize {
        self.state.partitions.len()
    }

    /// Submits `argument` and waits for its matched result.
    pub async fn submit(&self, argument: P::Argument) -> BatchResult<Option<P::Output>> {
        let key = self.state.processor.partition(&argument);
        let (reply, receiver) = oneshot::channel();
        let submission = Submission { argument, reply };

        let claimed = match self.state.partitions.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                let partition = occupied.get_mut();
                partition.submissions.push(submission);
                if partition.submissions.len() >= self.state.config.max_batch_size {
                    Some(occupied.remove())
                } else {
                    None
                }
            }
            Entry::Vacant(vacant) => {
                let mut partition = Partition {
                    submissions: vec![submission],
                    timer: None,
                    generation: self.state.next_generation.fetch_add(1, Ordering::Relaxed),
                };
                if partition.submissions.len() >= self.state.config.max_batch_size {
                    Some(partition)
                } else {
                    // Fixed window: armed once at creation, never re-armed.
                    partition.timer = Some(BatcherState::arm(
                        &self.state,
                        key.clone(),
                        partition.generation,
                    ));
                    vacant.insert(partition);
                    None
                }
            }
        };

        if let Some(partition) = claimed {
            let state = Arc::clone(&self.state);
            tokio::spawn(async move { state.flush(key, partition).await });
        }

        receiver.await.unwrap_or_else(|_| {
            Err(BatchError::Abandoned {
                label: self.state.processor.label().to_string(),
            })
        })
    }
}

impl<P: PartitionProcessor> BatcherState<P> {
    fn arm(state: &Arc<Self>, key: P::Partition, generation: u64) -> TimerHandle {
        let weak: Weak<Self> = Arc::downgrade(state);
        TimerHandle::schedule(state.config.max_batch_time, move || async move {
            let Some(state) = weak.upgrade() else {
                return;
            };
            let claimed = state
                .partitions
                .remove_if(&key, |_, partition| partition.generation == generation);
            if let Some((key, mut partition)) = claimed {
                partition.timer = None;
                state.flush(key, partition).await;
            }
        })
    }

    async fn flush(&self, key: P::Partition, partition: Partition<P>) {
        let Partition {
            submissions, timer, ..
        } = partition;
        if let Some(timer) = timer {
            timer.cancel();
        }

        // Arguments with the same match key are processed once.
        let mut arguments: Vec<P::Argument> = Vec::new();
        let mut processed_keys: Vec<P::MatchKey> = Vec::new();
        let mut seen: HashSet<P::MatchKey> = HashSet::new();
        let mut waiters: Vec<(P::MatchKey, Reply<P>)> = Vec::with_capacity(submissions.len());
        for Submission { argument, reply } in submissions {
            let match_key = self.processor.match_key(&argument);
            if seen.insert(match_key.clone()) {
                processed_keys.push(match_key.clone());
                arguments.push(argument);
            }
            waiters.push((match_key, reply));
        }

        if arguments.is_empty() {
            return;
        }

        let label = self.processor.label();
        let expected = arguments.len();
        metrics::counter!("shopcore_partition_flushes_total").increment(1);
        debug!(
            batcher = %label,
            partition = ?key,
            arguments = expected,
            waiters = waiters.len(),
            "flushing partition"
        );

        let outcome = match self.processor.process(&key, arguments).await {
            Ok(outputs) if outputs.len() == expected => Ok(outputs),
            Ok(outputs) => Err(BatchError::ResultLengthMismatch {
                label: label.to_string(),
                expected,
                actual: outputs.len(),
            }),
            Err(err) => Err(err),
        };

        match outcome {
            Ok(outputs) => {
                let by_key: HashMap<P::MatchKey, Option<P::Output>> =
                    processed_keys.into_iter().zip(outputs).collect();
                for (match_key, reply) in waiters {
                    let output = by_key.get(&match_key).cloned().flatten();
                    let _ = reply.send(Ok(output));
                }
            }
            Err(err) => {
                metrics::counter!("shopcore_batch_failures_total").increment(1);
                warn!(batcher = %label, partition = ?key, error = %err, "partition flush failed");
                for (_, reply) in waiters {
                    let _ = reply.send(Err(err.clone()));
                }
            }
        }
    }
}
