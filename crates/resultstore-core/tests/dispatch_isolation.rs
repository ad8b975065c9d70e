use async_trait::async_trait;
use resultstore_core::dispatch::{DispatchStatus, Dispatcher};
use resultstore_core::errors::DeliveryError;
use resultstore_core::model::{GroupRef, NewResult};
use resultstore_core::notify::{Publisher, ResultNotification};
use resultstore_core::query::{Page, QueryFilter};
use resultstore_core::service::ResultService;
use resultstore_core::storage::Store;
use std::sync::{Arc, Mutex};
use tokio::time::Duration;

struct RecordingPublisher {
    history: Mutex<Vec<ResultNotification>>,
}

impl RecordingPublisher {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            history: Mutex::new(Vec::new()),
        })
    }

    fn history(&self) -> Vec<ResultNotification> {
        self.history.lock().unwrap().clone()
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    fn backend_name(&self) -> &'static str {
        "recording"
    }

    async fn publish(&self, payload: &ResultNotification) -> Result<(), DeliveryError> {
        self.history.lock().unwrap().push(payload.clone());
        Ok(())
    }
}

struct FailingPublisher;

#[async_trait]
impl Publisher for FailingPublisher {
    fn backend_name(&self) -> &'static str {
        "failing"
    }

    async fn publish(&self, _payload: &ResultNotification) -> Result<(), DeliveryError> {
        Err(DeliveryError::Connection("broker unreachable".into()))
    }
}

struct SlowRecordingPublisher {
    delay: Duration,
    history: Mutex<Vec<ResultNotification>>,
}

impl SlowRecordingPublisher {
    fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            history: Mutex::new(Vec::new()),
        })
    }

    fn history(&self) -> Vec<ResultNotification> {
        self.history.lock().unwrap().clone()
    }
}

#[async_trait]
impl Publisher for SlowRecordingPublisher {
    fn backend_name(&self) -> &'static str {
        "slow"
    }

    async fn publish(&self, payload: &ResultNotification) -> Result<(), DeliveryError> {
        tokio::time::sleep(self.delay).await;
        self.history.lock().unwrap().push(payload.clone());
        Ok(())
    }
}

struct HangingPublisher;

#[async_trait]
impl Publisher for HangingPublisher {
    fn backend_name(&self) -> &'static str {
        "hanging"
    }

    async fn publish(&self, _payload: &ResultNotification) -> Result<(), DeliveryError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(())
    }
}

fn sample() -> NewResult {
    NewResult {
        testcase: "fedora-ci.koji-build./plans/basic.functional".into(),
        outcome: "FAILED".into(),
        groups: vec![GroupRef::by_uuid("g1")],
        data: vec![
            ("item".into(), "foo-1.0".into()),
            ("arch".into(), "x86_64".into()),
        ],
        ..NewResult::default()
    }
}

#[tokio::test]
async fn failing_backend_never_blocks_creation_or_peers() -> anyhow::Result<()> {
    let store = Store::memory()?;
    store.init_schema()?;

    let recording = RecordingPublisher::new();
    let dispatcher = Arc::new(Dispatcher::new(vec![
        Arc::new(FailingPublisher) as Arc<dyn Publisher>,
        recording.clone(),
    ]));
    let service = ResultService::new(store, dispatcher);

    let record = service.create_result(&sample()).await?;

    let history = recording.history();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].id, record.id);
    assert_eq!(history[0].outcome, "FAILED");
    assert_eq!(history[0].groups, vec!["g1"]);
    assert_eq!(history[0].data["item"], vec!["foo-1.0"]);

    // the record is durable regardless of the failing backend
    assert_eq!(service.store().get_result(&record.id)?, record);
    Ok(())
}

#[tokio::test]
async fn report_reflects_partial_delivery() -> anyhow::Result<()> {
    let recording = RecordingPublisher::new();
    let dispatcher = Dispatcher::new(vec![
        Arc::new(FailingPublisher) as Arc<dyn Publisher>,
        recording.clone(),
    ]);

    let store = Store::memory()?;
    store.init_schema()?;
    let record = store.create_result(&sample())?;
    let payload = ResultNotification::from_record(&record);

    let report = dispatcher.dispatch(&payload).await;
    assert_eq!(report.status, DispatchStatus::PartiallyDelivered);
    assert_eq!(report.attempts.len(), 2);
    let failed = report
        .attempts
        .iter()
        .find(|a| a.backend == "failing")
        .unwrap();
    assert!(failed.error.as_deref().unwrap().contains("broker unreachable"));
    Ok(())
}

#[tokio::test]
async fn all_backends_failing_marks_dispatch_failed() -> anyhow::Result<()> {
    let dispatcher = Dispatcher::new(vec![
        Arc::new(FailingPublisher) as Arc<dyn Publisher>,
        Arc::new(FailingPublisher),
    ]);

    let store = Store::memory()?;
    store.init_schema()?;
    let record = store.create_result(&sample())?;

    let report = dispatcher
        .dispatch(&ResultNotification::from_record(&record))
        .await;
    assert_eq!(report.status, DispatchStatus::Failed);
    Ok(())
}

#[tokio::test]
async fn no_backends_is_trivially_delivered() -> anyhow::Result<()> {
    let dispatcher = Dispatcher::new(Vec::new());
    let store = Store::memory()?;
    store.init_schema()?;
    let record = store.create_result(&sample())?;

    let report = dispatcher
        .dispatch(&ResultNotification::from_record(&record))
        .await;
    assert_eq!(report.status, DispatchStatus::Delivered);
    assert!(report.attempts.is_empty());
    Ok(())
}

#[tokio::test]
async fn aborted_caller_does_not_cancel_in_flight_delivery() -> anyhow::Result<()> {
    let store = Store::memory()?;
    store.init_schema()?;

    let slow = SlowRecordingPublisher::new(Duration::from_millis(200));
    let dispatcher = Arc::new(Dispatcher::new(vec![
        slow.clone() as Arc<dyn Publisher>
    ]));
    let service = ResultService::new(store.clone(), dispatcher);

    let caller = tokio::spawn({
        let service = service.clone();
        async move { service.create_result(&sample()).await }
    });

    // wait until the commit is visible, then drop the caller while the
    // publisher is still sleeping
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let page = store.query_results(&QueryFilter::default(), &Page::default())?;
        if !page.results.is_empty() {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "result never committed"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    caller.abort();
    let _ = caller.await;

    tokio::time::sleep(Duration::from_secs(1)).await;
    let history = slow.history();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].outcome, "FAILED");
    Ok(())
}

#[tokio::test]
async fn hanging_backend_is_cut_off_by_timeout() -> anyhow::Result<()> {
    let recording = RecordingPublisher::new();
    let dispatcher = Dispatcher::new(vec![
        Arc::new(HangingPublisher) as Arc<dyn Publisher>,
        recording.clone(),
    ])
    .with_timeout(Duration::from_millis(50));

    let store = Store::memory()?;
    store.init_schema()?;
    let record = store.create_result(&sample())?;

    let report = dispatcher
        .dispatch(&ResultNotification::from_record(&record))
        .await;
    assert_eq!(report.status, DispatchStatus::PartiallyDelivered);
    let hung = report
        .attempts
        .iter()
        .find(|a| a.backend == "hanging")
        .unwrap();
    assert!(hung.error.as_deref().unwrap().contains("timed out"));
    assert_eq!(recording.history().len(), 1);
    Ok(())
}
