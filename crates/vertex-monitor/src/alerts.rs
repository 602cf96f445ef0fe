use crate::budget::{BudgetStatus, ThresholdTier};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};
use vertex_core::{VertexError, VertexResult};

/// Notification emitted whenever the budget tier changes, in either direction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdAlert {
    pub from: ThresholdTier,
    pub to: ThresholdTier,
    pub status: BudgetStatus,
    pub at: DateTime<Utc>,
}

impl ThresholdAlert {
    pub fn escalated(&self) -> bool {
        self.to > self.from
    }
}

/// External alerting channel.
#[async_trait]
pub trait AlertSink: Send + Sync {
    fn name(&self) -> &str;
    async fn notify(&self, alert: &ThresholdAlert) -> VertexResult<()>;
}

/// Writes alerts to the tracing log.
pub struct LogAlertSink;

#[async_trait]
impl AlertSink for LogAlertSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn notify(&self, alert: &ThresholdAlert) -> VertexResult<()> {
        if alert.escalated() {
            warn!(
                from = %alert.from,
                to = %alert.to,
                max_ratio = alert.status.ratios.max(),
                "Budget threshold crossed"
            );
        } else {
            info!(from = %alert.from, to = %alert.to, "Budget tier relaxed");
        }
        Ok(())
    }
}

/// A webhook endpoint receiving threshold alerts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookSinkConfig {
    pub name: String,
    pub url: String,
    /// Sent as `x-webhook-secret` when set.
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default = "default_webhook_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_webhook_timeout_ms() -> u64 {
    5_000
}

/// POSTs each alert as JSON to a configured URL.
pub struct WebhookAlertSink {
    config: WebhookSinkConfig,
    http: reqwest::Client,
}

impl WebhookAlertSink {
    pub fn new(config: WebhookSinkConfig) -> VertexResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| VertexError::Http(e.to_string()))?;
        Ok(Self { config, http })
    }
}

#[async_trait]
impl AlertSink for WebhookAlertSink {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn notify(&self, alert: &ThresholdAlert) -> VertexResult<()> {
        let mut request = self.http.post(&self.config.url).json(alert);
        if let Some(secret) = &self.config.secret {
            request = request.header("x-webhook-secret", secret);
        }
        let response = request
            .send()
            .await
            .map_err(|e| VertexError::Http(format!("{}: {e}", self.config.name)))?;
        if !response.status().is_success() {
            return Err(VertexError::Http(format!(
                "{} responded {}",
                self.config.name,
                response.status()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_log_sink_never_fails() {
        let alert = ThresholdAlert {
            from: ThresholdTier::Normal,
            to: ThresholdTier::Warn,
            status: BudgetStatus::initial(),
            at: Utc::now(),
        };
        assert!(alert.escalated());
        assert!(LogAlertSink.notify(&alert).await.is_ok());
    }
}
