use crate::notify::{Publisher, ResultNotification};
use serde::Serialize;
use std::sync::Arc;
use tokio::time::{timeout, Duration};
use tracing::{debug, info, warn};

/// Terminal observation of one dispatch. There is no retry loop at this
/// level; transient retries live inside each publisher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchStatus {
    Pending,
    Dispatching,
    Delivered,
    PartiallyDelivered,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeliveryAttempt {
    pub backend: String,
    /// None means delivered.
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DispatchReport {
    pub status: DispatchStatus,
    pub attempts: Vec<DeliveryAttempt>,
}

/// Fans one committed result out to every active publisher. Each backend
/// runs in its own task under its own deadline; one backend failing or
/// hanging never blocks the others, and nothing here can fail the caller.
pub struct Dispatcher {
    backends: Vec<Arc<dyn Publisher>>,
    publish_timeout: Duration,
}

impl Dispatcher {
    pub fn new(backends: Vec<Arc<dyn Publisher>>) -> Self {
        Self {
            backends,
            publish_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_timeout(mut self, publish_timeout: Duration) -> Self {
        self.publish_timeout = publish_timeout;
        self
    }

    pub fn backend_count(&self) -> usize {
        self.backends.len()
    }

    pub async fn dispatch(&self, payload: &ResultNotification) -> DispatchReport {
        if self.backends.is_empty() {
            debug!(result_id = %payload.id, "no notification backends active");
            return DispatchReport {
                status: DispatchStatus::Delivered,
                attempts: Vec::new(),
            };
        }

        debug!(
            result_id = %payload.id,
            backends = self.backends.len(),
            status = ?DispatchStatus::Dispatching,
            "dispatching"
        );

        let mut handles = Vec::with_capacity(self.backends.len());
        for backend in &self.backends {
            let backend = backend.clone();
            let payload = payload.clone();
            let deadline = self.publish_timeout;
            // Spawned so in-flight deliveries survive cancellation of the
            // original request future.
            handles.push(tokio::spawn(async move {
                let name = backend.backend_name();
                match timeout(deadline, backend.publish(&payload)).await {
                    Ok(Ok(())) => {
                        info!(backend = name, result_id = %payload.id, "notification delivered");
                        DeliveryAttempt {
                            backend: name.to_string(),
                            error: None,
                        }
                    }
                    Ok(Err(e)) => {
                        warn!(backend = name, result_id = %payload.id, error = %e, "notification delivery failed");
                        DeliveryAttempt {
                            backend: name.to_string(),
                            error: Some(e.to_string()),
                        }
                    }
                    Err(_) => {
                        warn!(backend = name, result_id = %payload.id, timeout_ms = deadline.as_millis() as u64, "notification delivery timed out");
                        DeliveryAttempt {
                            backend: name.to_string(),
                            error: Some(format!(
                                "publish timed out after {} ms",
                                deadline.as_millis()
                            )),
                        }
                    }
                }
            }));
        }

        let mut attempts = Vec::with_capacity(handles.len());
        for h in handles {
            match h.await {
                Ok(attempt) => attempts.push(attempt),
                Err(e) => {
                    warn!(result_id = %payload.id, error = %e, "publisher task panicked");
                    attempts.push(DeliveryAttempt {
                        backend: "unknown".to_string(),
                        error: Some(format!("task error: {e}")),
                    });
                }
            }
        }

        let delivered = attempts.iter().filter(|a| a.error.is_none()).count();
        let status = if delivered == attempts.len() {
            DispatchStatus::Delivered
        } else if delivered > 0 {
            DispatchStatus::PartiallyDelivered
        } else {
            DispatchStatus::Failed
        };

        DispatchReport { status, attempts }
    }
}
