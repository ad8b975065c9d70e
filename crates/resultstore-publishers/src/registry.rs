use resultstore_core::config::{BackendSettings, NotifyConfig};
use resultstore_core::errors::{StoreError, StoreResult};
use resultstore_core::notify::Publisher;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

type Factory = fn(&BackendSettings) -> StoreResult<Arc<dyn Publisher>>;

/// Startup-time table mapping configured backend names to constructors.
/// Built once, consulted once; there is no hot-reload.
pub struct PublisherRegistry {
    factories: BTreeMap<&'static str, Factory>,
}

impl PublisherRegistry {
    pub fn builtin() -> Self {
        let mut registry = Self {
            factories: BTreeMap::new(),
        };
        // Names are write-once; the expects can only fire on a duplicate
        // literal below, which is a programming error.
        registry
            .register("dummy", |_| {
                Ok(Arc::new(crate::dummy::DummyPublisher::new()) as Arc<dyn Publisher>)
            })
            .expect("duplicate builtin backend");
        registry
            .register("message-bus", |settings| {
                Ok(Arc::new(crate::message_bus::MessageBusPublisher::from_settings(settings)?)
                    as Arc<dyn Publisher>)
            })
            .expect("duplicate builtin backend");
        registry
            .register("stomp", |settings| {
                Ok(Arc::new(crate::stomp::StompPublisher::from_settings(settings)?)
                    as Arc<dyn Publisher>)
            })
            .expect("duplicate builtin backend");
        registry
    }

    /// Registers a backend factory. Startup only; a name can be bound once.
    pub fn register(&mut self, name: &'static str, factory: Factory) -> StoreResult<()> {
        if self.factories.contains_key(name) {
            return Err(StoreError::Configuration(format!(
                "backend '{name}' registered twice"
            )));
        }
        self.factories.insert(name, factory);
        Ok(())
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.factories.keys().copied().collect()
    }

    /// Instantiates every backend the configuration enables. An unrecognized
    /// name is a fatal configuration error.
    pub fn activate(&self, cfg: &NotifyConfig) -> StoreResult<Vec<Arc<dyn Publisher>>> {
        let mut backends = Vec::with_capacity(cfg.backends.len());
        for settings in &cfg.backends {
            let factory = self.factories.get(settings.backend.as_str()).ok_or_else(|| {
                StoreError::Configuration(format!(
                    "unknown notification backend '{}' (known: {})",
                    settings.backend,
                    self.names().join(", ")
                ))
            })?;
            let publisher = factory(settings)?;
            info!(backend = publisher.backend_name(), "notification backend active");
            backends.push(publisher);
        }
        Ok(backends)
    }
}
