//! Fire-and-forget run status callback.
//!
//! When both `AGENTHUB_BASE_URL` and `AGENT_SERVICE_KEY` are set, agent runs
//! that carry a `runId` report their outcome to
//! `{base}/api/runs/callback`. Delivery problems are logged and never
//! reach the caller; an unconfigured notifier does nothing.

use anyhow::Result;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{CallbackConfig, Secrets};

pub const SERVICE_KEY_HEADER: &str = "X-AGENT-SERVICE-KEY";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Failed,
}

/// Callback body. Absent optional fields are omitted from the JSON.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunEvent {
    pub run_id: String,
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl RunEvent {
    pub fn success(run_id: impl Into<String>, summary: impl Into<String>, metadata: Value) -> Self {
        Self {
            run_id: run_id.into(),
            status: RunStatus::Success,
            summary: Some(summary.into()),
            result_url: None,
            error: None,
            metadata: Some(metadata),
        }
    }

    pub fn failed(run_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            status: RunStatus::Failed,
            summary: None,
            result_url: None,
            error: Some(error.into()),
            metadata: None,
        }
    }
}

struct Endpoint {
    url: String,
    service_key: String,
}

pub struct RunNotifier {
    http: reqwest::Client,
    endpoint: Option<Endpoint>,
}

impl RunNotifier {
    pub fn new(secrets: &Secrets, config: &CallbackConfig) -> Result<Self> {
        let endpoint = match (&secrets.agenthub_base_url, &secrets.agent_service_key) {
            (Some(base), Some(key)) => Some(Endpoint {
                url: format!("{}/api/runs/callback", base.trim_end_matches('/')),
                service_key: key.clone(),
            }),
            _ => None,
        };
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { http, endpoint })
    }

    /// A notifier that never sends anything.
    pub fn disabled() -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.endpoint.is_some()
    }

    /// Sends the event and waits for the outcome. Never fails.
    pub async fn notify(&self, event: &RunEvent) {
        let Some(endpoint) = &self.endpoint else {
            return;
        };

        let result = self
            .http
            .post(&endpoint.url)
            .header(SERVICE_KEY_HEADER, &endpoint.service_key)
            .json(event)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                tracing::debug!(run_id = %event.run_id, "run callback delivered");
            }
            Ok(response) => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                tracing::warn!(
                    run_id = %event.run_id,
                    url = %endpoint.url,
                    %status,
                    %body,
                    "run callback rejected"
                );
            }
            Err(e) => {
                tracing::error!(
                    run_id = %event.run_id,
                    url = %endpoint.url,
                    error = %e,
                    "run callback failed"
                );
            }
        }
    }

    /// Spawns [`notify`](Self::notify) on the runtime and returns at once.
    pub fn notify_detached(self: &Arc<Self>, event: RunEvent) {
        if !self.is_enabled() {
            return;
        }
        let notifier = Arc::clone(self);
        tokio::spawn(async move {
            notifier.notify(&event).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_omits_absent_fields() {
        let event = RunEvent::failed("run-1", "boom");
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value, json!({"runId": "run-1", "status": "failed", "error": "boom"}));
    }

    #[test]
    fn test_success_event_shape() {
        let event = RunEvent::success("run-2", "done", json!({"sourcesUsed": 2}));
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["status"], "success");
        assert_eq!(value["summary"], "done");
        assert_eq!(value["metadata"]["sourcesUsed"], 2);
        assert!(value.get("resultUrl").is_none());
    }

    #[test]
    fn test_requires_both_url_and_key() {
        let config = CallbackConfig::default();
        let only_url = Secrets {
            agenthub_base_url: Some("http://hub".to_string()),
            ..Default::default()
        };
        assert!(!RunNotifier::new(&only_url, &config).unwrap().is_enabled());

        let both = Secrets {
            agenthub_base_url: Some("http://hub/".to_string()),
            agent_service_key: Some("k".to_string()),
            ..Default::default()
        };
        let notifier = RunNotifier::new(&both, &config).unwrap();
        assert_eq!(
            notifier.endpoint.as_ref().unwrap().url,
            "http://hub/api/runs/callback"
        );
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_does_not_fail() {
        let secrets = Secrets {
            agenthub_base_url: Some("http://127.0.0.1:9".to_string()),
            agent_service_key: Some("k".to_string()),
            ..Default::default()
        };
        let notifier = RunNotifier::new(&secrets, &CallbackConfig { timeout_secs: 1 }).unwrap();
        notifier.notify(&RunEvent::failed("r", "e")).await;
    }
}
