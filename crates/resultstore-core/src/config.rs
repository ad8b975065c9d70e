use crate::errors::{StoreError, StoreResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub database: PathBuf,
    #[serde(default)]
    pub notify: NotifyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    #[serde(default)]
    pub backends: Vec<BackendSettings>,
    /// Upper bound on one publish attempt as seen by the dispatcher.
    #[serde(default = "default_dispatch_timeout")]
    pub dispatch_timeout_seconds: u64,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            backends: Vec::new(),
            dispatch_timeout_seconds: default_dispatch_timeout(),
        }
    }
}

fn default_dispatch_timeout() -> u64 {
    30
}

/// Connection parameters for one configured backend. Which fields are
/// required depends on the backend; `require_*` helpers turn absence into
/// configuration errors at activation time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendSettings {
    /// Registry name: dummy | message-bus | stomp.
    pub backend: String,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub broker_url: Option<String>,
    #[serde(default)]
    pub login: Option<String>,
    #[serde(default)]
    pub passcode: Option<String>,
    #[serde(default)]
    pub retry: RetrySettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 250,
            max_backoff_ms: 5_000,
        }
    }
}

impl BackendSettings {
    pub fn require_topic(&self) -> StoreResult<&str> {
        self.topic.as_deref().ok_or_else(|| {
            StoreError::Configuration(format!("backend '{}' requires a topic", self.backend))
        })
    }

    pub fn require_broker_url(&self) -> StoreResult<&str> {
        self.broker_url.as_deref().ok_or_else(|| {
            StoreError::Configuration(format!("backend '{}' requires a broker_url", self.backend))
        })
    }
}

pub fn load_config(path: &Path) -> StoreResult<StoreConfig> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        StoreError::Configuration(format!("failed to read config {}: {}", path.display(), e))
    })?;
    let cfg: StoreConfig = serde_yaml::from_str(&raw).map_err(|e| {
        StoreError::Configuration(format!("failed to parse config {}: {}", path.display(), e))
    })?;

    if cfg.database.as_os_str().is_empty() {
        return Err(StoreError::Configuration(
            "database path must be non-empty".into(),
        ));
    }
    for b in &cfg.notify.backends {
        if b.backend.trim().is_empty() {
            return Err(StoreError::Configuration(
                "backend name must be non-empty".into(),
            ));
        }
        if b.retry.max_attempts == 0 {
            return Err(StoreError::Configuration(format!(
                "backend '{}': retry.max_attempts must be greater than 0",
                b.backend
            )));
        }
        if b.retry.max_backoff_ms < b.retry.initial_backoff_ms {
            return Err(StoreError::Configuration(format!(
                "backend '{}': retry.max_backoff_ms must be >= initial_backoff_ms",
                b.backend
            )));
        }
    }

    Ok(cfg)
}

pub fn write_sample_config(path: &Path) -> StoreResult<()> {
    let sample = r#"database: results.db
notify:
  dispatch_timeout_seconds: 30
  backends:
    - backend: dummy
    # - backend: message-bus
    #   topic: resultstore.result.new
    #   broker_url: http://bus.example.org:8080
    #   retry: { max_attempts: 3, initial_backoff_ms: 250, max_backoff_ms: 5000 }
    # - backend: stomp
    #   topic: /topic/resultstore.result.new
    #   broker_url: stomp.example.org:61613
    #   login: resultstore
    #   passcode: secret
"#;
    std::fs::write(path, sample).map_err(|e| {
        StoreError::Configuration(format!("failed to write config {}: {}", path.display(), e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_config() {
        let raw = r#"
database: results.db
notify:
  backends:
    - backend: dummy
    - backend: message-bus
      topic: resultstore.result.new
      broker_url: http://bus.example.org:8080
      retry: { max_attempts: 5, initial_backoff_ms: 100, max_backoff_ms: 2000 }
"#;
        let cfg: StoreConfig = serde_yaml::from_str(raw).unwrap();
        assert_eq!(cfg.notify.backends.len(), 2);
        assert_eq!(cfg.notify.backends[1].retry.max_attempts, 5);
        assert_eq!(cfg.notify.dispatch_timeout_seconds, 30);
    }

    #[test]
    fn rejects_zero_retry_budget() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.yaml");
        std::fs::write(
            &path,
            "database: x.db\nnotify:\n  backends:\n    - backend: stomp\n      retry: { max_attempts: 0, initial_backoff_ms: 1, max_backoff_ms: 1 }\n",
        )
        .unwrap();
        assert!(matches!(
            load_config(&path),
            Err(StoreError::Configuration(_))
        ));
    }

    #[test]
    fn sample_config_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("resultstore.yaml");
        write_sample_config(&path).unwrap();
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.notify.backends.len(), 1);
        assert_eq!(cfg.notify.backends[0].backend, "dummy");
    }
}
