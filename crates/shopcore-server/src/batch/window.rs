//! Debounced batch window.

use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use shopcore_domain::TimerHandle;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use super::types::{BatchError, BatchResult, BatchWindowConfig};

/// Downstream call that serves a whole batch at once.
///
/// `handle` must return exactly one output per input, in input order.
#[async_trait]
pub trait BatchHandler<I, O, G>: Send + Sync {
    /// Names the handler in errors and logs.
    fn label(&self) -> &str;

    async fn handle(&self, inputs: Vec<I>, group: &G) -> BatchResult<Vec<O>>;
}

/// [`BatchHandler`] backed by a closure.
pub struct FnHandler<F> {
    label: String,
    f: F,
}

impl<F> FnHandler<F> {
    pub fn new(label: impl Into<String>, f: F) -> Self {
        Self {
            label: label.into(),
            f,
        }
    }
}

#[async_trait]
impl<I, O, G, F, Fut> BatchHandler<I, O, G> for FnHandler<F>
where
    I: Send + 'static,
    O: Send + 'static,
    G: Clone + Send + Sync + 'static,
    F: Fn(Vec<I>, G) -> Fut + Send + Sync,
    Fut: Future<Output = BatchResult<Vec<O>>> + Send + 'static,
{
    fn label(&self) -> &str {
        &self.label
    }

    async fn handle(&self, inputs: Vec<I>, group: &G) -> BatchResult<Vec<O>> {
        (self.f)(inputs, group.clone()).await
    }
}

type Reply<O> = oneshot::Sender<BatchResult<O>>;

/// One pending caller.
struct QueueItem<I, O> {
    input: I,
    reply: Reply<O>,
}

/// Batches are keyed by handler identity plus group parameter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct BatchKey<G> {
    handler: usize,
    group: G,
}

struct Batch<I, O, G> {
    handler: Arc<dyn BatchHandler<I, O, G>>,
    queue: Vec<QueueItem<I, O>>,
    timer: Option<TimerHandle>,
    /// Bumped on every re-arm; a timer only flushes the generation it armed.
    generation: u64,
}

impl<I, O, G> Batch<I, O, G> {
    fn new(handler: Arc<dyn BatchHandler<I, O, G>>) -> Self {
        Self {
            handler,
            queue: Vec::new(),
            timer: None,
            generation: 0,
        }
    }
}

struct WindowState<I, O, G> {
    batches: DashMap<BatchKey<G>, Batch<I, O, G>>,
    config: BatchWindowConfig,
    next_generation: AtomicU64,
}

/// Coalesces concurrent requests into one downstream call per
/// `(handler, group)` pair.
///
/// A batch flushes `wait` after its most recent enqueue, or immediately once
/// it holds `max_size` items. Outputs are delivered by position; a failed
/// flush fails every caller in it with the same error.
///
/// Cloning yields another handle to the same registry.
pub struct BatchWindow<I, O, G> {
    state: Arc<WindowState<I, O, G>>,
}

impl<I, O, G> Clone for BatchWindow<I, O, G> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<I, O, G> std::fmt::Debug for BatchWindow<I, O, G>
where
    G: Eq + Hash,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchWindow")
            .field("config", &self.state.config)
            .field("pending_batches", &self.state.batches.len())
            .finish()
    }
}

impl<I, O, G> BatchWindow<I, O, G>
where
    I: Send + Sync + 'static,
    O: Send + 'static,
    G: Clone + Eq + Hash + Send + Sync + 'static,
{
    pub fn new(config: BatchWindowConfig) -> Self {
        Self {
            state: Arc::new(WindowState {
                batches: DashMap::new(),
                config,
                next_generation: AtomicU64::new(0),
            }),
        }
    }

    pub fn config(&self) -> &BatchWindowConfig {
        &self.state.config
    }

    /// Number of batches currently accepting items.
    pub fn pending_batches(&self) -> usize {
        self.state.batches.len()
    }

    /// Queues `input` for `handler` under `group` and waits for its output.
    ///
    /// Handler identity is the `Arc` allocation: two handler instances never
    /// share a batch, even with the same label.
    pub async fn enqueue(
        &self,
        handler: Arc<dyn BatchHandler<I, O, G>>,
        group: G,
        input: I,
    ) -> BatchResult<O> {
        let label = handler.label().to_string();
        let key = BatchKey {
            handler: handler_id(&handler),
            group,
        };
        let (reply, receiver) = oneshot::channel();
        let item = QueueItem { input, reply };

        let claimed = match self.state.batches.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                let batch = occupied.get_mut();
                batch.queue.push(item);
                if self.state.is_full(batch.queue.len()) {
                    Some(occupied.remove())
                } else {
                    WindowState::arm(&self.state, key.clone(), batch);
                    None
                }
            }
            Entry::Vacant(vacant) => {
                let mut batch = Batch::new(handler);
                batch.queue.push(item);
                if self.state.is_full(batch.queue.len()) {
                    Some(batch)
                } else {
                    WindowState::arm(&self.state, key.clone(), &mut batch);
                    vacant.insert(batch);
                    None
                }
            }
        };

        if let Some(batch) = claimed {
            debug!(batch = %label, size = batch.queue.len(), "batch full, flushing early");
            // Flushing on a task keeps delivery independent of this caller
            // staying around.
            let state = Arc::clone(&self.state);
            tokio::spawn(async move { state.flush(key.group, batch).await });
        }

        receiver
            .await
            .unwrap_or(Err(BatchError::Abandoned { label }))
    }
}

impl<I, O, G> WindowState<I, O, G>
where
    I: Send + Sync + 'static,
    O: Send + 'static,
    G: Clone + Eq + Hash + Send + Sync + 'static,
{
    fn is_full(&self, len: usize) -> bool {
        self.config.max_size.is_some_and(|max| len >= max)
    }

    /// Cancels the batch's pending timer and arms a new one.
    fn arm(state: &Arc<Self>, key: BatchKey<G>, batch: &mut Batch<I, O, G>) {
        if let Some(previous) = batch.timer.take() {
            previous.cancel();
        }

        let generation = state.next_generation.fetch_add(1, Ordering::Relaxed);
        let weak: Weak<Self> = Arc::downgrade(state);
        batch.generation = generation;
        batch.timer = Some(TimerHandle::schedule(state.config.wait, move || async move {
            let Some(state) = weak.upgrade() else {
                return;
            };
            let claimed = state
                .batches
                .remove_if(&key, |_, batch| batch.generation == generation);
            if let Some((key, mut batch)) = claimed {
                // This task is the timer; dropping the handle must not abort it.
                batch.timer = None;
                state.flush(key.group, batch).await;
            }
        }));
    }

    async fn flush(&self, group: G, batch: Batch<I, O, G>) {
        let Batch {
            handler,
            queue,
            timer,
            ..
        } = batch;
        if let Some(timer) = timer {
            timer.cancel();
        }

        let label = handler.label().to_string();
        let (inputs, replies): (Vec<I>, Vec<Reply<O>>) = queue
            .into_iter()
            .map(|item| (item.input, item.reply))
            .unzip();
        let expected = inputs.len();

        metrics::counter!("shopcore_batch_flushes_total").increment(1);
        debug!(batch = %label, size = expected, "flushing batch");

        let outcome = match handler.handle(inputs, &group).await {
            Ok(outputs) if outputs.len() == expected => Ok(outputs),
            Ok(outputs) => Err(BatchError::ResultLengthMismatch {
                label: label.clone(),
                expected,
                actual: outputs.len(),
            }),
            Err(err) => Err(err),
        };

        match outcome {
            Ok(outputs) => {
                for (reply, output) in replies.into_iter().zip(outputs) {
                    // Receiver gone means that caller stopped waiting.
                    let _ = reply.send(Ok(output));
                }
            }
            Err(err) => {
                metrics::counter!("shopcore_batch_failures_total").increment(1);
                warn!(batch = %label, size = expected, error = %err, "batch flush failed");
                for reply in replies {
                    let _ = reply.send(Err(err.clone()));
                }
            }
        }
    }
}

fn handler_id<T: ?Sized>(handler: &Arc<T>) -> usize {
    Arc::as_ptr(handler) as *const () as usize
}
