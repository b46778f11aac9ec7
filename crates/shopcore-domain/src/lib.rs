//! shopcore-domain: Caching primitives
//!
//! This crate contains the caching half of the request core:
//! - TTL-expiring map with per-key, cancellable eviction timers
//! - Cache-aside resources with single-flight revalidation
//! - Stable argument hashing for de-duplication keys
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │              shopcore-domain                 │
//! ├─────────────────────────────────────────────┤
//! │  timer.rs    - Cancellable timer handles    │
//! │  cache/      - TtlCache                     │
//! │  resource/   - SingleFlightResource         │
//! │  error.rs    - Domain errors                │
//! └─────────────────────────────────────────────┘
//! ```

pub mod cache;
pub mod error;
pub mod resource;
pub mod timer;

// Re-export commonly used types at the crate root
pub use cache::TtlCache;
pub use error::{DomainError, DomainResult};
pub use resource::{CachedResource, ResourceConfig, ResourceProvider, SingleFlightResource};
pub use timer::TimerHandle;
