//! Cache-aside resources with de-duplicated revalidation.
//!
//! A [`SingleFlightResource`] sits in front of a [`ResourceProvider`]
//! (cached getter, fresh getter, persist) and guarantees:
//!
//! 1. **Single-flight**: at most one fresh fetch per argument is running at
//!    any time; concurrent callers with equal arguments share its outcome.
//! 2. **Stale-while-revalidate** (opt-in): a stale cached value is returned
//!    immediately while the refresh runs in the background.
//! 3. **Degraded cache tier tolerance**: a failing cache lookup is logged and
//!    treated as a miss.
//!
//! Arguments are identified by [`stable_key`], a hash of their canonical
//! JSON form.
//!
//! # Example
//!
//! ```rust,ignore
//! use shopcore_domain::resource::{ResourceConfig, SingleFlightResource};
//! use std::sync::Arc;
//!
//! let products = SingleFlightResource::new(
//!     "products",
//!     Arc::new(ProductProvider::new(client, cache)),
//!     ResourceConfig::default().with_background_revalidation(true),
//! );
//!
//! let product = products.get(ProductQuery { shop, id }).await?;
//! ```

mod cache_aside;
mod key;
mod singleflight;
mod types;

pub use cache_aside::{register_resource_metrics, SingleFlightResource};
pub use key::stable_key;
pub use singleflight::{Singleflight, SingleflightGuard, SingleflightSlot};
pub use types::{CachedResource, ResourceConfig, ResourceProvider, DEFAULT_FAILURE_STREAK_TTL};
