use assert_json_diff::assert_json_include;
use reqwest::StatusCode;
use serde_json::{json, Value};

use crate::common::*;
mod common;

fn event(topic: &str, event_id: &str) -> Value {
    json!({
        "topic": topic,
        "event_id": event_id,
        "timestamp": "2025-10-23T10:00:00Z",
        "source": "auth",
        "payload": {}
    })
}

#[tokio::test]
async fn it_serves_the_service_index() {
    let server = ServerHandle::for_config(test_config()).await;

    let res = server.get("/").await;
    assert_eq!(StatusCode::OK, res.status());

    let body: Value = res.json().await.unwrap();
    assert_eq!(body["service"], "event-ingest");
    assert_eq!(body["status"], "running");
    assert!(body["endpoints"].is_object());
}

#[tokio::test]
async fn it_deduplicates_retries_of_a_processed_event() {
    let server = ServerHandle::for_config(test_config()).await;
    let login = event("user.login", "e1");

    let res = server.publish(&login).await;
    assert_eq!(StatusCode::OK, res.status());
    assert_json_include!(
        actual: res.json::<Value>().await.unwrap(),
        expected: json!({"received": 1, "accepted": 1, "duplicates": 0})
    );

    server.wait_for_unique_processed(1).await;

    // Retries are now caught at admission, before the queue.
    for _ in 0..2 {
        let res = server.publish(&login).await;
        assert_eq!(StatusCode::OK, res.status());
        assert_json_include!(
            actual: res.json::<Value>().await.unwrap(),
            expected: json!({"received": 1, "accepted": 0, "duplicates": 1})
        );
    }

    let stats = server.stats().await;
    assert_eq!(stats["unique_processed"], 1);
    assert_eq!(stats["duplicate_dropped"], 0);
    assert_eq!(stats["received"], 3);

    let events: Value = server
        .get("/events?topic=user.login")
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(events["topic"], "user.login");
    assert_eq!(events["count"], 1);
    assert_eq!(events["events"][0]["event_id"], "e1");
    assert!(events["events"][0]["payload"]["processed_at"].is_string());
}

#[tokio::test]
async fn it_rejects_replays_within_a_batch() {
    let server = ServerHandle::for_config(test_config()).await;
    let repeated = event("orders", "e2");

    let res = server
        .publish(&json!({"events": [repeated.clone(), repeated.clone(), repeated]}))
        .await;
    assert_eq!(StatusCode::OK, res.status());
    assert_json_include!(
        actual: res.json::<Value>().await.unwrap(),
        expected: json!({"received": 3, "accepted": 1, "duplicates": 2})
    );

    server.wait_for_unique_processed(1).await;
}

#[tokio::test]
async fn it_handles_mixed_batches_of_new_and_replayed_events() {
    let server = ServerHandle::for_config(test_config()).await;

    server.publish(&event("user.login", "e1")).await;
    server.publish(&event("orders", "e2")).await;
    server.wait_for_unique_processed(2).await;

    let batch: Vec<Value> = (1..=5)
        .map(|i| event("mixed", &format!("m{}", i)))
        .chain([event("user.login", "e1"), event("orders", "e2")])
        .collect();

    let res = server.publish(&json!({"events": batch})).await;
    assert_json_include!(
        actual: res.json::<Value>().await.unwrap(),
        expected: json!({"received": 7, "accepted": 5, "duplicates": 2})
    );

    server.wait_for_unique_processed(7).await;
}

#[tokio::test]
async fn it_processes_the_same_event_id_once_per_topic() {
    let server = ServerHandle::for_config(test_config()).await;

    let res = server
        .publish(&json!({"events": [event("a", "x"), event("b", "x")]}))
        .await;
    assert_json_include!(
        actual: res.json::<Value>().await.unwrap(),
        expected: json!({"received": 2, "accepted": 2, "duplicates": 0})
    );

    server.wait_for_unique_processed(2).await;

    let stats = server.stats().await;
    assert_eq!(stats["topics"], json!(["a", "b"]));
}

#[tokio::test]
async fn it_remains_idempotent_across_restarts() {
    let config = test_config();

    {
        let server = ServerHandle::for_config(config.clone()).await;
        server.publish(&event("user.login", "e3")).await;
        server.wait_for_unique_processed(1).await;
    }

    // Same database file, fresh process state.
    let server = ServerHandle::for_config(config).await;
    let res = server.publish(&event("user.login", "e3")).await;
    assert_json_include!(
        actual: res.json::<Value>().await.unwrap(),
        expected: json!({"received": 1, "accepted": 0, "duplicates": 1})
    );

    let stats = server.stats().await;
    assert_eq!(stats["unique_processed"], 1);
}

#[tokio::test]
async fn it_returns_events_most_recent_first() {
    let server = ServerHandle::for_config(test_config()).await;

    server.publish(&event("audit", "first")).await;
    server.wait_for_unique_processed(1).await;
    server.publish(&event("audit", "second")).await;
    server.wait_for_unique_processed(2).await;

    let events: Value = server
        .get("/events?topic=audit&limit=10")
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(events["count"], 2);
    assert_eq!(events["events"][0]["event_id"], "second");
    assert_eq!(events["events"][1]["event_id"], "first");
}

#[tokio::test]
async fn it_reports_health_and_uptime() {
    let server = ServerHandle::for_config(test_config()).await;

    let health: Value = server.get("/health").await.json().await.unwrap();
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["consumer_running"], true);
    assert_eq!(health["queue_size"], 0);
    assert!(health["timestamp"].is_string());

    // The consumer reports liveness asynchronously, so give it a moment.
    let mut liveness = server.get("/_liveness").await;
    for _ in 0..50 {
        if liveness.status() == StatusCode::OK {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        liveness = server.get("/_liveness").await;
    }
    assert_eq!(StatusCode::OK, liveness.status());

    let stats = server.stats().await;
    assert!(stats["uptime_seconds"].as_f64().unwrap() >= 0.0);
    assert!(stats["uptime_human"].as_str().unwrap().ends_with('s'));
}

#[tokio::test]
async fn it_rejects_malformed_envelopes() {
    let server = ServerHandle::for_config(test_config()).await;

    // Empty batch
    let res = server.publish(&json!({"events": []})).await;
    assert_eq!(StatusCode::UNPROCESSABLE_ENTITY, res.status());

    // Missing required fields
    let res = server
        .publish(&json!({"topic": "t", "event_id": "e"}))
        .await;
    assert_eq!(StatusCode::UNPROCESSABLE_ENTITY, res.status());

    // Unparseable timestamp
    let mut bad = event("t", "e");
    bad["timestamp"] = json!("not-a-timestamp");
    let res = server.publish(&bad).await;
    assert_eq!(StatusCode::UNPROCESSABLE_ENTITY, res.status());

    // Empty topic
    let res = server.publish(&event("", "e")).await;
    assert_eq!(StatusCode::UNPROCESSABLE_ENTITY, res.status());

    // Not JSON at all
    let res = server.publish_raw("not json".to_string()).await;
    assert_eq!(StatusCode::UNPROCESSABLE_ENTITY, res.status());

    // Nothing made it past validation.
    let stats = server.stats().await;
    assert_eq!(stats["received"], 0);
}

#[tokio::test]
async fn it_validates_the_events_query() {
    let server = ServerHandle::for_config(test_config()).await;

    let res = server.get("/events").await;
    assert_eq!(StatusCode::UNPROCESSABLE_ENTITY, res.status());

    let res = server.get("/events?topic=t&limit=0").await;
    assert_eq!(StatusCode::UNPROCESSABLE_ENTITY, res.status());

    let res = server.get("/events?topic=t&limit=1001").await;
    assert_eq!(StatusCode::UNPROCESSABLE_ENTITY, res.status());

    // An unknown topic is not an error, just empty.
    let res = server.get("/events?topic=unknown&limit=5").await;
    assert_eq!(StatusCode::OK, res.status());
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["count"], 0);
}
