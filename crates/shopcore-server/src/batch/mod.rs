//! Request coalescing.
//!
//! Two independent primitives turn many concurrent logical requests into a
//! single downstream call:
//!
//! 1. **[`BatchWindow`]**: debounced, per `(handler, group)` queue. Flushes
//!    after a quiet period or at `max_size`; outputs are delivered by
//!    position.
//! 2. **[`PartitionedBatcher`]**: fixed micro-window per extracted partition
//!    key. Duplicate arguments are processed once and results are matched
//!    back structurally.
//!
//! Both keep their open batches in an instance-owned registry. A batch is
//! removed from the registry in the same step that claims it for flushing,
//! so no queued caller is ever part of two flushes, and a failed flush only
//! affects its own callers.
//!
//! # Example
//!
//! ```rust,ignore
//! use shopcore_server::batch::{BatchWindow, BatchWindowConfig, FnHandler};
//! use std::sync::Arc;
//!
//! let window = BatchWindow::new(BatchWindowConfig::default().with_max_size(50));
//! let prices = Arc::new(FnHandler::new("variant-prices", |ids: Vec<u64>, catalog: String| async move {
//!     client.fetch_prices(&catalog, &ids).await
//! }));
//!
//! let price = window.enqueue(prices, "catalog-eu".to_string(), 42).await?;
//! ```

mod partition;
mod types;
mod window;

pub use partition::{PartitionProcessor, PartitionedBatcher};
pub use types::{
    BatchError, BatchResult, BatchWindowConfig, PartitionConfig, DEFAULT_MAX_BATCH_SIZE,
    DEFAULT_MAX_BATCH_TIME, DEFAULT_WAIT,
};
pub use window::{BatchHandler, BatchWindow, FnHandler};

/// Registers batching metric descriptions.
pub fn register_batch_metrics() {
    metrics::describe_counter!(
        "shopcore_batch_flushes_total",
        "Total number of batch window flushes"
    );
    metrics::describe_counter!(
        "shopcore_partition_flushes_total",
        "Total number of partition flushes"
    );
    metrics::describe_counter!(
        "shopcore_batch_failures_total",
        "Total number of flushes that failed every caller"
    );
}
