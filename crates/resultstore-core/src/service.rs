use crate::dispatch::{DispatchStatus, Dispatcher};
use crate::errors::StoreResult;
use crate::model::{NewResult, ResultRecord};
use crate::notify::ResultNotification;
use crate::storage::Store;
use std::sync::Arc;
use tracing::{debug, warn};

/// Ties the storage model to the notification dispatcher. Creation commits
/// first; fan-out happens after and its outcome never reaches the caller.
#[derive(Clone)]
pub struct ResultService {
    store: Store,
    dispatcher: Arc<Dispatcher>,
}

impl ResultService {
    pub fn new(store: Store, dispatcher: Arc<Dispatcher>) -> Self {
        Self { store, dispatcher }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Creates the result and notifies all active backends. The returned
    /// Result reflects storage only: delivery failures are logged inside the
    /// dispatcher and visible in traces, not here.
    pub async fn create_result(&self, new: &NewResult) -> StoreResult<ResultRecord> {
        let record = self.store.create_result(new)?;

        let payload = ResultNotification::from_record(&record);
        debug!(result_id = %record.id, status = ?DispatchStatus::Pending, "notification queued");
        let dispatcher = self.dispatcher.clone();
        // Spawned so a caller dropping this future after commit cannot cancel
        // in-flight deliveries.
        let handle = tokio::spawn(async move { dispatcher.dispatch(&payload).await });
        match handle.await {
            Ok(report) => {
                debug!(result_id = %record.id, status = ?report.status, "dispatch finished")
            }
            Err(e) => warn!(result_id = %record.id, error = %e, "dispatch task failed"),
        }

        Ok(record)
    }
}
