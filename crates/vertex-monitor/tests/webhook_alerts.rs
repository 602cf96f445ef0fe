#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Threshold alerts delivered to webhook endpoints.

use std::sync::Arc;
use std::time::Duration;
use vertex_core::CancelToken;
use vertex_monitor::{
    AlertSink, LogAlertSink, ManualSampler, MonitorConfig, MonitorEvent, RawUsage,
    ResourceMonitor, ThresholdAlert, ThresholdTier, WebhookAlertSink, WebhookSinkConfig,
};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn sink_for(server: &MockServer, secret: Option<&str>) -> WebhookAlertSink {
    WebhookAlertSink::new(WebhookSinkConfig {
        name: "ops".into(),
        url: format!("{}/alerts", server.uri()),
        secret: secret.map(String::from),
        timeout_ms: 2_000,
    })
    .unwrap()
}

#[tokio::test]
async fn test_tier_crossing_posts_webhook_with_secret() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/alerts"))
        .and(header("x-webhook-secret", "s3cret"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1..)
        .mount(&server)
        .await;

    let sampler = ManualSampler::new(RawUsage::default());
    let shutdown = CancelToken::new();
    let sinks: Vec<Arc<dyn AlertSink>> = vec![
        Arc::new(LogAlertSink),
        Arc::new(sink_for(&server, Some("s3cret"))),
    ];
    let (_handle, mut events) = ResourceMonitor::spawn(
        MonitorConfig {
            interval_ms: 10,
            ..MonitorConfig::default()
        },
        sampler.clone(),
        sinks,
        shutdown.clone(),
    )
    .unwrap();

    sampler.set_memory_percent(80.0);
    let to = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if let Some(MonitorEvent::TierChanged { to, .. }) = events.recv().await {
                return to;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(to, ThresholdTier::Warn);

    // Delivery happens on a detached task.
    tokio::time::sleep(Duration::from_millis(200)).await;
    shutdown.cancel();

    let received = server.received_requests().await.unwrap();
    assert!(!received.is_empty());
    let body: serde_json::Value = serde_json::from_slice(&received[0].body).unwrap();
    assert_eq!(body["to"], "warn");
    assert_eq!(body["from"], "normal");
}

#[tokio::test]
async fn test_webhook_error_status_reported() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let sink = sink_for(&server, None);
    let alert = ThresholdAlert {
        from: ThresholdTier::Warn,
        to: ThresholdTier::Throttle,
        status: vertex_monitor::BudgetStatus::initial(),
        at: chrono::Utc::now(),
    };
    let err = sink.notify(&alert).await.unwrap_err();
    assert_eq!(err.kind(), "HttpError");
}
