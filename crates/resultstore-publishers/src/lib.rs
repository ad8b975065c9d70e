use resultstore_core::config::NotifyConfig;
use resultstore_core::errors::StoreResult;
use resultstore_core::notify::Publisher;
use std::sync::Arc;

pub mod dummy;
pub mod message_bus;
pub mod registry;
pub mod stomp;

/// Activates the built-in backends named by the configuration. Fails fast on
/// an unknown backend name; the caller is expected to treat that as fatal.
pub fn activate_backends(cfg: &NotifyConfig) -> StoreResult<Vec<Arc<dyn Publisher>>> {
    registry::PublisherRegistry::builtin().activate(cfg)
}
