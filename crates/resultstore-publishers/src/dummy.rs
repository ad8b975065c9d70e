use async_trait::async_trait;
use resultstore_core::errors::DeliveryError;
use resultstore_core::notify::{Publisher, ResultNotification};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// No-op backend for tests and disabled configurations. Always succeeds and
/// keeps the payloads it saw so tests can assert on delivery.
#[derive(Clone, Default)]
pub struct DummyPublisher {
    history: Arc<Mutex<Vec<ResultNotification>>>,
}

impl DummyPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn history(&self) -> Vec<ResultNotification> {
        self.history.lock().unwrap().clone()
    }
}

#[async_trait]
impl Publisher for DummyPublisher {
    fn backend_name(&self) -> &'static str {
        "dummy"
    }

    async fn publish(&self, payload: &ResultNotification) -> Result<(), DeliveryError> {
        debug!(result_id = %payload.id, "dummy publish");
        self.history.lock().unwrap().push(payload.clone());
        Ok(())
    }
}
