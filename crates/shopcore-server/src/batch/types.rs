//! Errors and configuration shared by the batching primitives.

use std::time::Duration;

use shopcore_domain::DomainError;

/// Default quiet period before a batch window flushes.
pub const DEFAULT_WAIT: Duration = Duration::from_millis(50);

/// Default micro-window for partitioned batching.
pub const DEFAULT_MAX_BATCH_TIME: Duration = Duration::from_millis(5);

/// Default eager-flush threshold for partitioned batching.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 100;

/// Errors delivered to callers of a batch or partition flush.
///
/// A flush fails as a whole, so the same error is cloned to every caller
/// that was part of it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BatchError {
    /// The downstream handler or processor reported a failure.
    #[error("batch handler '{label}' failed: {message}")]
    Handler { label: String, message: String },

    /// The handler returned a different number of results than inputs.
    #[error("batch handler '{label}' returned {actual} results for {expected} inputs")]
    ResultLengthMismatch {
        label: String,
        expected: usize,
        actual: usize,
    },

    /// The flush task went away without delivering a result.
    #[error("batch '{label}' was abandoned before delivering a result")]
    Abandoned { label: String },

    /// A handler propagated a domain error with `?`.
    #[error("domain error: {0}")]
    Domain(#[from] DomainError),
}

impl BatchError {
    pub fn handler(label: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Handler {
            label: label.into(),
            message: message.into(),
        }
    }
}

/// Result type for batching operations.
pub type BatchResult<T> = Result<T, BatchError>;

/// Configuration for a [`BatchWindow`](super::BatchWindow).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchWindowConfig {
    /// Quiet period after the most recent enqueue before a batch flushes.
    pub wait: Duration,
    /// Flush as soon as a batch holds this many items.
    pub max_size: Option<usize>,
}

impl Default for BatchWindowConfig {
    fn default() -> Self {
        Self {
            wait: DEFAULT_WAIT,
            max_size: None,
        }
    }
}

impl BatchWindowConfig {
    /// Sets the debounce period.
    pub fn with_wait(mut self, wait: Duration) -> Self {
        self.wait = wait;
        self
    }

    /// Sets the eager-flush threshold.
    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = Some(max_size);
        self
    }
}

/// Configuration for a [`PartitionedBatcher`](super::PartitionedBatcher).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionConfig {
    /// Flush a partition once it holds this many submissions.
    pub max_batch_size: usize,
    /// Fixed window, measured from partition creation.
    pub max_batch_time: Duration,
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            max_batch_time: DEFAULT_MAX_BATCH_TIME,
        }
    }
}

impl PartitionConfig {
    pub fn with_max_batch_size(mut self, max_batch_size: usize) -> Self {
        self.max_batch_size = max_batch_size;
        self
    }

    pub fn with_max_batch_time(mut self, max_batch_time: Duration) -> Self {
        self.max_batch_time = max_batch_time;
        self
    }
}
