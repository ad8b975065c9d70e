use async_trait::async_trait;
use resultstore_core::config::{BackendSettings, RetrySettings};
use resultstore_core::errors::{DeliveryError, StoreResult};
use resultstore_core::notify::{Publisher, ResultNotification};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::Duration;
use tracing::{debug, warn};

const MAX_FRAME_BYTES: usize = 64 * 1024;

/// Publishes results as STOMP SEND frames over one persistent broker
/// connection. The session is re-established with backoff when the broker
/// drops it; the retry budget bounds connect+send together. A STOMP session
/// cannot take interleaved writers, so publishes serialize on the session
/// mutex.
pub struct StompPublisher {
    address: String,
    destination: String,
    login: Option<String>,
    passcode: Option<String>,
    retry: RetrySettings,
    session: Mutex<Option<StompSession>>,
}

impl StompPublisher {
    pub fn from_settings(settings: &BackendSettings) -> StoreResult<Self> {
        let destination = settings.require_topic()?.to_string();
        let address = settings.require_broker_url()?.to_string();
        Ok(Self {
            address,
            destination,
            login: settings.login.clone(),
            passcode: settings.passcode.clone(),
            retry: settings.retry.clone(),
            session: Mutex::new(None),
        })
    }
}

#[async_trait]
impl Publisher for StompPublisher {
    fn backend_name(&self) -> &'static str {
        "stomp"
    }

    async fn publish(&self, payload: &ResultNotification) -> Result<(), DeliveryError> {
        let body = serde_json::to_vec(payload)
            .map_err(|e| DeliveryError::Rejected(format!("payload serialization: {e}")))?;

        let mut session = self.session.lock().await;
        let mut backoff = Duration::from_millis(self.retry.initial_backoff_ms);
        let max_backoff = Duration::from_millis(self.retry.max_backoff_ms);
        let mut last_err = None;

        for attempt in 1..=self.retry.max_attempts {
            if session.is_none() {
                match StompSession::connect(
                    &self.address,
                    self.login.as_deref(),
                    self.passcode.as_deref(),
                )
                .await
                {
                    Ok(s) => {
                        debug!(broker = %self.address, attempt, "stomp session established");
                        *session = Some(s);
                    }
                    Err(e) => {
                        warn!(broker = %self.address, attempt, error = %e, "stomp connect failed");
                        last_err = Some(e);
                        if attempt < self.retry.max_attempts {
                            tokio::time::sleep(backoff).await;
                            backoff = (backoff * 2).min(max_backoff);
                        }
                        continue;
                    }
                }
            }

            if let Some(sess) = session.as_mut() {
                match sess.send(&self.destination, &body).await {
                    Ok(()) => {
                        debug!(result_id = %payload.id, attempt, "stomp publish ok");
                        return Ok(());
                    }
                    Err(e) => {
                        warn!(result_id = %payload.id, attempt, error = %e, "stomp send failed, dropping session");
                        *session = None;
                        last_err = Some(e);
                        if attempt < self.retry.max_attempts {
                            tokio::time::sleep(backoff).await;
                            backoff = (backoff * 2).min(max_backoff);
                        }
                    }
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| DeliveryError::Connection("retry budget exhausted".into())))
    }
}

struct StompSession {
    stream: TcpStream,
}

impl StompSession {
    async fn connect(
        address: &str,
        login: Option<&str>,
        passcode: Option<&str>,
    ) -> Result<Self, DeliveryError> {
        let mut stream = TcpStream::connect(address)
            .await
            .map_err(|e| DeliveryError::Connection(format!("connect {address}: {e}")))?;

        let host = address.split(':').next().unwrap_or(address);
        let mut headers = vec![("accept-version", "1.2"), ("host", host)];
        if let Some(login) = login {
            headers.push(("login", login));
        }
        if let Some(passcode) = passcode {
            headers.push(("passcode", passcode));
        }

        let frame = encode_frame("CONNECT", &headers, b"");
        stream
            .write_all(&frame)
            .await
            .map_err(|e| DeliveryError::Connection(e.to_string()))?;
        stream
            .flush()
            .await
            .map_err(|e| DeliveryError::Connection(e.to_string()))?;

        let reply = read_frame(&mut stream).await?;
        if !reply.starts_with("CONNECTED") {
            let first_line = reply.lines().next().unwrap_or("").to_string();
            return Err(DeliveryError::Rejected(format!(
                "broker answered '{first_line}' to CONNECT"
            )));
        }

        Ok(Self { stream })
    }

    async fn send(&mut self, destination: &str, body: &[u8]) -> Result<(), DeliveryError> {
        let content_length = body.len().to_string();
        let headers = [
            ("destination", destination),
            ("content-type", "application/json"),
            ("content-length", content_length.as_str()),
        ];
        let frame = encode_frame("SEND", &headers, body);
        self.stream
            .write_all(&frame)
            .await
            .map_err(|e| DeliveryError::Connection(e.to_string()))?;
        self.stream
            .flush()
            .await
            .map_err(|e| DeliveryError::Connection(e.to_string()))
    }
}

/// STOMP 1.2 frame: command line, header lines, blank line, body, NUL.
fn encode_frame(command: &str, headers: &[(&str, &str)], body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + 64);
    out.extend_from_slice(command.as_bytes());
    out.push(b'\n');
    for (key, value) in headers {
        out.extend_from_slice(escape_header(key).as_bytes());
        out.push(b':');
        out.extend_from_slice(escape_header(value).as_bytes());
        out.push(b'\n');
    }
    out.push(b'\n');
    out.extend_from_slice(body);
    out.push(0);
    out
}

fn escape_header(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            ':' => out.push_str("\\c"),
            _ => out.push(c),
        }
    }
    out
}

async fn read_frame(stream: &mut TcpStream) -> Result<String, DeliveryError> {
    let mut buf = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        let n = stream
            .read(&mut byte)
            .await
            .map_err(|e| DeliveryError::Connection(e.to_string()))?;
        if n == 0 {
            return Err(DeliveryError::Connection(
                "broker closed connection mid-frame".into(),
            ));
        }
        if byte[0] == 0 {
            break;
        }
        buf.push(byte[0]);
        if buf.len() > MAX_FRAME_BYTES {
            return Err(DeliveryError::Rejected("oversized broker frame".into()));
        }
    }
    // brokers may send EOL padding between frames
    Ok(String::from_utf8_lossy(&buf)
        .trim_start_matches(['\r', '\n'])
        .to_string())
}
