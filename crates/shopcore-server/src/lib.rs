//! shopcore-server: request coalescing and runtime wiring
//!
//! This crate builds on the caching primitives in `shopcore-domain`:
//! - Debounced batch windows keyed by handler and group
//! - Partitioned micro-batching with duplicate absorption
//! - A registry of named shared primitives
//! - Configuration loading and structured logging
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │                 shopcore-server                  │
//! ├──────────────────────────────────────────────────┤
//! │  batch/          - Request coalescing            │
//! │    window.rs        - Debounced batch window     │
//! │    partition.rs     - Partitioned micro-batching │
//! │  registry.rs     - Named shared instances        │
//! │  config.rs       - Configuration management      │
//! │  observability/  - Logging and metrics           │
//! └──────────────────────────────────────────────────┘
//! ```

pub mod batch;
pub mod config;
pub mod observability;
pub mod registry;

// Re-exports for convenience
pub use batch::{
    BatchError, BatchHandler, BatchResult, BatchWindow, BatchWindowConfig, FnHandler,
    PartitionConfig, PartitionProcessor, PartitionedBatcher,
};
pub use config::{ConfigLoadError, CoreConfig};
pub use registry::PrimitiveRegistry;
