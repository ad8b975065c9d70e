use async_trait::async_trait;
use resultstore_core::config::{BackendSettings, RetrySettings};
use resultstore_core::errors::{DeliveryError, StoreResult};
use resultstore_core::notify::{Publisher, ResultNotification};
use serde::Serialize;
use tokio::time::Duration;
use tracing::{debug, warn};

/// Publishes results to an HTTP message bus: the payload is wrapped in a
/// topic envelope and POSTed to `{broker_url}/topics/{topic}`. Transport
/// errors and broker 5xx responses are retried with exponential backoff
/// within the configured budget; a 4xx is a reject and not retried.
pub struct MessageBusPublisher {
    client: reqwest::Client,
    endpoint: String,
    topic: String,
    retry: RetrySettings,
}

#[derive(Serialize)]
struct Envelope<'a> {
    topic: &'a str,
    body: &'a ResultNotification,
}

impl MessageBusPublisher {
    pub fn from_settings(settings: &BackendSettings) -> StoreResult<Self> {
        let topic = settings.require_topic()?.to_string();
        let broker_url = settings.require_broker_url()?;
        let endpoint = format!("{}/topics/{}", broker_url.trim_end_matches('/'), topic);
        Ok(Self {
            client: reqwest::Client::new(),
            endpoint,
            topic,
            retry: settings.retry.clone(),
        })
    }

    async fn try_publish(&self, payload: &ResultNotification) -> Result<(), DeliveryError> {
        let envelope = Envelope {
            topic: &self.topic,
            body: payload,
        };
        let response = self
            .client
            .post(&self.endpoint)
            .json(&envelope)
            .send()
            .await
            .map_err(|e| DeliveryError::Connection(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        if status.is_client_error() {
            return Err(DeliveryError::Rejected(format!(
                "broker answered {status} for topic {}",
                self.topic
            )));
        }
        Err(DeliveryError::Connection(format!(
            "broker answered {status}"
        )))
    }
}

#[async_trait]
impl Publisher for MessageBusPublisher {
    fn backend_name(&self) -> &'static str {
        "message-bus"
    }

    async fn publish(&self, payload: &ResultNotification) -> Result<(), DeliveryError> {
        let mut backoff = Duration::from_millis(self.retry.initial_backoff_ms);
        let max_backoff = Duration::from_millis(self.retry.max_backoff_ms);
        let mut last_err = None;

        for attempt in 1..=self.retry.max_attempts {
            match self.try_publish(payload).await {
                Ok(()) => {
                    debug!(result_id = %payload.id, attempt, "message-bus publish ok");
                    return Ok(());
                }
                // rejects are deterministic; retrying cannot help
                Err(e @ DeliveryError::Rejected(_)) => return Err(e),
                Err(e) => {
                    warn!(result_id = %payload.id, attempt, error = %e, "message-bus publish failed");
                    last_err = Some(e);
                }
            }
            if attempt < self.retry.max_attempts {
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(max_backoff);
            }
        }

        Err(last_err
            .unwrap_or_else(|| DeliveryError::Connection("retry budget exhausted".into())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use resultstore_core::model::TestCase;
    use std::collections::BTreeMap;

    #[test]
    fn endpoint_joins_broker_and_topic() {
        let settings = BackendSettings {
            backend: "message-bus".into(),
            topic: Some("resultstore.result.new".into()),
            broker_url: Some("http://bus.example.org:8080/".into()),
            ..BackendSettings::default()
        };
        let publisher = MessageBusPublisher::from_settings(&settings).unwrap();
        assert_eq!(
            publisher.endpoint,
            "http://bus.example.org:8080/topics/resultstore.result.new"
        );
    }

    #[test]
    fn missing_topic_is_a_configuration_error() {
        let settings = BackendSettings {
            backend: "message-bus".into(),
            broker_url: Some("http://bus.example.org".into()),
            ..BackendSettings::default()
        };
        assert!(MessageBusPublisher::from_settings(&settings).is_err());
    }

    #[test]
    fn envelope_shape_is_stable() {
        let payload = ResultNotification {
            id: "01H8XGJWBWBAQ4ZBBY4R1CE2QF".into(),
            testcase: TestCase {
                name: "check_rpm".into(),
                ref_url: None,
            },
            outcome: "FAILED".into(),
            groups: vec!["g1".into()],
            submit_time: 1_700_000_000_123,
            note: None,
            ref_url: None,
            data: BTreeMap::from([("arch".to_string(), vec!["x86_64".to_string()])]),
        };
        let envelope = Envelope {
            topic: "resultstore.result.new",
            body: &payload,
        };
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["topic"], "resultstore.result.new");
        assert_eq!(json["body"]["testcase"]["name"], "check_rpm");
        assert_eq!(json["body"]["outcome"], "FAILED");
        assert_eq!(json["body"]["data"]["arch"][0], "x86_64");
    }
}
