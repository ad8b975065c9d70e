use crate::errors::DeliveryError;
use crate::model::{ResultData, ResultRecord, TestCase};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Outbound message built from a committed result. External consumers depend
/// on this serde shape; changes here are a compatibility break.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultNotification {
    pub id: String,
    pub testcase: TestCase,
    pub outcome: String,
    pub groups: Vec<String>,
    /// UTC milliseconds.
    pub submit_time: i64,
    pub note: Option<String>,
    pub ref_url: Option<String>,
    pub data: ResultData,
}

impl ResultNotification {
    pub fn from_record(record: &ResultRecord) -> Self {
        Self {
            id: record.id.clone(),
            testcase: record.testcase.clone(),
            outcome: record.outcome.clone(),
            groups: record.groups.clone(),
            submit_time: record.submit_time,
            note: record.note.clone(),
            ref_url: record.ref_url.clone(),
            data: record.data.clone(),
        }
    }
}

/// A backend capable of delivering one notification to an external system.
/// Instances are shared across dispatch calls and must tolerate concurrent
/// publish invocations; transports that cannot interleave writes serialize
/// internally.
#[async_trait]
pub trait Publisher: Send + Sync {
    fn backend_name(&self) -> &'static str;

    async fn publish(&self, payload: &ResultNotification) -> Result<(), DeliveryError>;
}

impl std::fmt::Debug for dyn Publisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("backend", &self.backend_name())
            .finish()
    }
}
