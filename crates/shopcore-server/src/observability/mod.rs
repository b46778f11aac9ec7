//! Observability: structured logging and metric descriptions.

pub mod logging;

pub use logging::{create_json_layer, init_logging, LoggingConfig};

/// Registers descriptions for every metric emitted by the primitives.
///
/// Installing a recorder (Prometheus or otherwise) is left to the
/// application; without one the counters are no-ops.
pub fn register_metrics() {
    crate::batch::register_batch_metrics();
    shopcore_domain::resource::register_resource_metrics();
    shopcore_domain::cache::register_ttl_cache_metrics();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_metrics_without_recorder() {
        register_metrics();
        register_metrics();
    }
}
