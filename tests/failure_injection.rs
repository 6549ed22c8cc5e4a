//! Failure injection tests against real sockets.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use serde_json::Value;

mod common;
use common::{
    client, config_with, service, start_gateway, start_programmable_backend, start_streaming_backend,
};

#[tokio::test]
async fn test_circuit_opens_then_recovers() {
    let calls = Arc::new(AtomicU32::new(0));
    let healthy = Arc::new(AtomicBool::new(false));
    let (c, h) = (calls.clone(), healthy.clone());
    let backend = start_programmable_backend(move |_| {
        let (c, h) = (c.clone(), h.clone());
        async move {
            c.fetch_add(1, Ordering::SeqCst);
            if h.load(Ordering::SeqCst) {
                (200, "reply".into())
            } else {
                (500, "model crashed".into())
            }
        }
    })
    .await;

    let mut ai = service("ai", format!("http://{backend}"), "/api/ai");
    ai.circuit_breaker.failure_threshold = 3;
    ai.circuit_breaker.reset_timeout_ms = 500;
    let (gateway, shutdown) = start_gateway(config_with(vec![ai])).await;
    let client = client();
    let url = format!("http://{gateway}/api/ai/chat");

    for _ in 0..3 {
        let res = client.get(&url).send().await.expect("Gateway unreachable");
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    let res = client.get(&url).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert!(res.headers().contains_key("retry-after"));
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"]["code"], "SERVICE_UNAVAILABLE");
    assert_eq!(calls.load(Ordering::SeqCst), 3, "Open circuit must not reach the service");

    healthy.store(true, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(600)).await;

    let res = client.get(&url).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK, "Probe should be admitted after the reset timeout");
    assert_eq!(res.text().await.unwrap(), "reply");

    for _ in 0..3 {
        let res = client.get(&url).send().await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 7);

    shutdown.trigger();
}

#[tokio::test]
async fn test_failed_probe_reopens_circuit() {
    let backend = start_programmable_backend(|_| async { (503, "still down".into()) }).await;

    let mut ai = service("ai", format!("http://{backend}"), "/api/ai");
    ai.circuit_breaker.failure_threshold = 2;
    ai.circuit_breaker.reset_timeout_ms = 300;
    let (gateway, shutdown) = start_gateway(config_with(vec![ai])).await;
    let client = client();
    let url = format!("http://{gateway}/api/ai/chat");

    for _ in 0..2 {
        client.get(&url).send().await.unwrap();
    }
    tokio::time::sleep(Duration::from_millis(400)).await;

    // The probe reaches the service and fails.
    let res = client.get(&url).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(res.text().await.unwrap(), "still down");

    // Rejected by the gateway itself this time.
    let res = client.get(&url).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"]["code"], "SERVICE_UNAVAILABLE");

    shutdown.trigger();
}

#[tokio::test]
async fn test_unreachable_service_is_bad_gateway() {
    let dead = common::dead_address().await;
    let (gateway, shutdown) =
        start_gateway(config_with(vec![service("rest", format!("http://{dead}"), "/api/v1")])).await;

    let res = client()
        .get(format!("http://{gateway}/api/v1/conversations"))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::BAD_GATEWAY);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"]["code"], "BAD_GATEWAY");

    shutdown.trigger();
}

#[tokio::test]
async fn test_slow_service_times_out() {
    let backend = start_programmable_backend(|_| async {
        tokio::time::sleep(Duration::from_millis(800)).await;
        (200, "late".into())
    })
    .await;

    let mut ai = service("ai", format!("http://{backend}"), "/api/ai");
    ai.timeout_ms = 200;
    let (gateway, shutdown) = start_gateway(config_with(vec![ai])).await;

    let res = client()
        .get(format!("http://{gateway}/api/ai/chat"))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::GATEWAY_TIMEOUT);

    shutdown.trigger();
}

#[tokio::test]
async fn test_streamed_body_may_outlast_service_timeout() {
    let backend = start_streaming_backend(vec![
        (Duration::ZERO, "hello "),
        (Duration::from_millis(1_000), "world"),
    ])
    .await;

    let mut ai = service("ai", format!("http://{backend}"), "/api/ai");
    ai.timeout_ms = 500;
    let (gateway, shutdown) = start_gateway(config_with(vec![ai])).await;

    let res = client()
        .get(format!("http://{gateway}/api/ai/stream"))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.text().await.unwrap(), "hello world");

    shutdown.trigger();
}

#[tokio::test]
async fn test_prefix_rewrite_reaches_service() {
    let backend = start_programmable_backend(|target| async move { (200, target) }).await;
    let (gateway, shutdown) =
        start_gateway(config_with(vec![service("rest", format!("http://{backend}"), "/api/v1")])).await;

    let res = client()
        .get(format!("http://{gateway}/api/v1/conversations/7?page=2"))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.text().await.unwrap(), "/conversations/7?page=2");

    shutdown.trigger();
}

#[tokio::test]
async fn test_health_endpoint_probes_services() {
    let up = start_programmable_backend(|target| async move {
        if target == "/health" {
            (200, "{\"status\":\"ok\"}".into())
        } else {
            (404, String::new())
        }
    })
    .await;
    let dead = common::dead_address().await;

    let (gateway, shutdown) = start_gateway(config_with(vec![
        service("ai", format!("http://{up}"), "/api/ai"),
        service("websocket", format!("http://{dead}"), "/ws"),
    ]))
    .await;

    let res = client().get(format!("http://{gateway}/health")).send().await.unwrap();

    assert_eq!(res.status(), StatusCode::MULTI_STATUS);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["services"][0]["isHealthy"], true);
    assert_eq!(body["services"][0]["statusCode"], 200);
    assert_eq!(body["services"][1]["isHealthy"], false);
    assert!(body["services"][1]["error"].is_string());

    shutdown.trigger();
}
