use chrono::{TimeDelta, Utc};
use directory::Directory;
use hyper::body::Bytes;
use hyper::{Method, Request, StatusCode};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use telemetry::Pipeline;
use telemetry::aggregator::{Aggregator, Window};
use telemetry::api::TelemetryService;
use telemetry::config::Config;
use telemetry::store::MemoryStore;
use tokio_util::sync::CancellationToken;

const CONFIG: &str = r#"
listener: {host: 127.0.0.1, port: 18000}
admin_listener: {host: 127.0.0.1, port: 18001}
queue: {capacity: 64, workers: 3}
aggregation: {interval_secs: 3600}
"#;

async fn call(
    service: &TelemetryService,
    method: Method,
    uri: &str,
    key: &str,
    body: Value,
) -> (StatusCode, Value) {
    let body = match body {
        Value::Null => Bytes::new(),
        body => Bytes::from(body.to_string()),
    };
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("X-API-KEY", key)
        .body(body)
        .unwrap();
    let response = service.handle(request).await;
    let status = response.status();
    let value = if response.body().is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(response.body()).unwrap()
    };
    (status, value)
}

async fn wait_for(mut done: impl FnMut() -> bool) {
    for _ in 0..200 {
        if done() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_ingest_group_aggregate_query() {
    let config: Config = serde_yaml::from_str(CONFIG).unwrap();
    config.validate().unwrap();

    let directory = Directory::new();
    let project = directory.register("storefront");
    let other = directory.register("backoffice");
    let store = Arc::new(MemoryStore::new());
    let pipeline = Pipeline::start(&config, directory.clone(), store.clone());
    let service = pipeline.service();
    let key = project.api_key.as_str();

    for duration in [100, 200, 300, 400, 1000] {
        let (status, _) = call(
            &service,
            Method::POST,
            "/ingest",
            key,
            json!({"type": "performance", "payload": {
                "url": "/api/cart", "method": "GET", "status_code": 200, "duration_ms": duration
            }}),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
    }
    let (status, _) = call(
        &service,
        Method::POST,
        "/ingest",
        key,
        json!({"type": "performance", "payload": {
            "url": "/api/search", "method": "GET", "status_code": "200", "duration_ms": "1500"
        }}),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);

    for user_id in [17, 4242, 9] {
        let (status, _) = call(
            &service,
            Method::POST,
            "/ingest/",
            key,
            json!({"type": "error", "payload": {
                "error_type": "LookupError",
                "error_message": format!("no cart for user {user_id}"),
                "traceback": "File \"cart.py\", line 31, in load",
                "url": "/api/cart",
                "method": "GET"
            }}),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
    }

    wait_for(|| store.performance_sample_count() == 6 && store.error_event_count() == 3).await;

    let (status, errors) = call(&service, Method::GET, "/errors", key, Value::Null).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(errors["count"], 1);
    let group = &errors["results"][0];
    assert_eq!(group["occurrence_count"], 3);
    assert_eq!(group["error_type"], "LookupError");

    let fingerprint = group["fingerprint"].as_str().unwrap().to_string();
    let (status, detail) = call(
        &service,
        Method::GET,
        &format!("/errors/{fingerprint}"),
        key,
        Value::Null,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(detail["latest_event"]["method"], "GET");

    let now = Utc::now();
    let window = Window::trailing(now + TimeDelta::minutes(1), TimeDelta::minutes(10));
    let report = Aggregator::new(store.clone(), Duration::from_secs(600))
        .run_window(window, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.windows_written, 3);

    let (_, top) = call(
        &service,
        Method::GET,
        "/metrics/top-endpoints",
        key,
        Value::Null,
    )
    .await;
    assert_eq!(
        top,
        json!([
            {"url": "/api/search", "max_p95": 1500},
            {"url": "/api/cart", "max_p95": 1000}
        ])
    );

    let (_, metrics) = call(&service, Method::GET, "/metrics?url=cart", key, Value::Null).await;
    assert_eq!(metrics["count"], 1);
    assert_eq!(metrics["results"][0]["request_count"], 5);
    assert_eq!(metrics["results"][0]["avg_duration_ms"], 400);
    assert_eq!(metrics["results"][0]["p50_duration_ms"], 300);
    assert_eq!(metrics["results"][0]["p95_duration_ms"], 1000);

    // Another project sees none of it
    let (_, errors) = call(&service, Method::GET, "/errors", &other.api_key, Value::Null).await;
    assert_eq!(errors["count"], 0);

    // Keys stop working once the project is gone
    directory.remove(project.id).unwrap();
    let (status, _) = call(&service, Method::GET, "/errors", key, Value::Null).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    drop(service);
    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_drains_with_connections_open() {
    let config: Config = serde_yaml::from_str(CONFIG).unwrap();
    let directory = Directory::new();
    let project = directory.register("storefront");
    let store = Arc::new(MemoryStore::new());
    let pipeline = Pipeline::start(&config, directory, store.clone());
    let service = pipeline.service();

    for i in 0..20 {
        let (status, _) = call(
            &service,
            Method::POST,
            "/ingest",
            &project.api_key,
            json!({"type": "performance", "payload": {
                "url": "/", "method": "GET", "status_code": 200, "duration_ms": i
            }}),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
    }

    // `service` stands in for a keep-alive connection still holding a clone
    tokio::time::timeout(Duration::from_secs(2), pipeline.shutdown())
        .await
        .unwrap();
    assert_eq!(store.performance_sample_count(), 20);

    let (status, _) = call(
        &service,
        Method::POST,
        "/ingest",
        &project.api_key,
        json!({"type": "performance", "payload": {
            "url": "/", "method": "GET", "status_code": 200, "duration_ms": 1
        }}),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(store.performance_sample_count(), 20);
}
