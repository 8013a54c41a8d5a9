//! # Pull Mode Integration Tests
//!
//! Scheduled inputs end to end: configuration in, events out of the sink.

mod common;

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use common::{channel_sink, collect_for, config, next_event, MockClient};
use firebase_input::constants::{fields, tags};
use firebase_input::{
    ClientError, FirebaseInput, InputConfig, InputError, InputState, RemoteDataClient, RunMode,
};

const HOURLY: &str = r#"
url: https://example.firebaseio.com
refs:
  u:
    path: /u
schedule:
  every: 1h
"#;

#[tokio::test]
async fn test_scheduled_fetch_emits_normalized_event() {
    let client = MockClient::new();
    client.script_fetch("/u", Ok(json!({ "name": "x" })));
    let (sink, mut events) = channel_sink();

    let input = FirebaseInput::register(&config(HOURLY), client.clone(), sink).unwrap();
    assert_eq!(input.mode(), RunMode::Scheduled);

    let runner = tokio::spawn({
        let input = input.clone();
        async move { input.run().await }
    });

    let event = next_event(&mut events).await;
    let body = event.body(Some(fields::METADATA));
    assert_eq!(serde_json::Value::Object(body), json!({ "name": "x" }));

    let metadata = event.get(fields::METADATA).unwrap();
    assert_eq!(metadata["event"], "get");
    assert_eq!(metadata["query_name"], "u");
    assert_eq!(metadata["query"], json!({ "path": "/u" }));
    assert!(metadata["runtime_seconds"].as_f64().unwrap() >= 0.0);

    // The next trigger is an hour away
    assert!(collect_for(&mut events, Duration::from_millis(100))
        .await
        .is_empty());

    let report = input.stop().await;
    assert!(report.schedule_stopped);
    assert!(report.client_shutdown);
    runner.await.unwrap().unwrap();
    assert_eq!(input.state(), InputState::Stopped);
    assert_eq!(client.shutdown_calls(), 1);
}

#[tokio::test]
async fn test_scheduled_fetch_timeout_emits_failure_event() {
    let client = MockClient::new();
    client.script_fetch("/u", Err(ClientError::Timeout("after 10s".to_string())));
    let (sink, mut events) = channel_sink();

    let input = FirebaseInput::register(&config(HOURLY), client, sink).unwrap();
    let runner = tokio::spawn({
        let input = input.clone();
        async move { input.run().await }
    });

    let event = next_event(&mut events).await;
    assert!(event.has_tag(tags::FAILURE));

    let record = event.get(fields::FAILURE).unwrap();
    assert_eq!(record["query_name"], "u");
    assert!(record["error"].as_str().unwrap().contains("timed out"));
    assert!(record["runtime_seconds"].is_number());
    assert_eq!(
        event.get(fields::METADATA).unwrap()["event"],
        json!("error")
    );

    let mut body_keys: Vec<_> = event
        .body(Some(fields::METADATA))
        .keys()
        .cloned()
        .collect();
    body_keys.sort();
    assert_eq!(body_keys, vec![fields::FAILURE, fields::TAGS]);

    input.stop().await;
    runner.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_failing_query_does_not_block_the_others() {
    let client = MockClient::new();
    client.script_fetch("/a", Err(ClientError::Transport("connection reset".to_string())));
    client.script_fetch("/b", Ok(json!({ "ok": true })));
    client.script_fetch("/c", Ok(json!("plain")));
    let (sink, mut events) = channel_sink();

    let input = FirebaseInput::register(
        &config(
            r#"
url: https://example.firebaseio.com
refs:
  a: { path: /a }
  b: { path: /b }
  c: { path: /c }
schedule:
  every: 1h
"#,
        ),
        client.clone(),
        sink,
    )
    .unwrap();

    let summary = input.run_once().await.unwrap();
    assert_eq!(summary.attempted, 3);
    assert_eq!(summary.failed, 1);

    let emitted = collect_for(&mut events, Duration::from_millis(50)).await;
    assert_eq!(emitted.len(), 3);
    assert_eq!(
        emitted.iter().filter(|e| e.has_tag(tags::FAILURE)).count(),
        1
    );
    assert!(emitted
        .iter()
        .any(|e| e.get(fields::VALUE) == Some(&json!("plain"))));

    let mut calls = client.fetch_calls();
    calls.sort();
    assert_eq!(calls, vec!["/a", "/b", "/c"]);
    assert_eq!(input.state(), InputState::Stopped);
}

#[tokio::test]
async fn test_one_shot_schedule_fires_once_with_target() {
    let client = MockClient::new();
    client.script_fetch("/count", Ok(json!(42)));
    let (sink, mut events) = channel_sink();

    let input = FirebaseInput::register(
        &config(
            r#"
url: https://example.firebaseio.com
target: payload
metadata_target: ""
refs:
  count:
    path: /count
    orderBy: $value
    limitToFirst: 1
schedule:
  in: 20ms
"#,
        ),
        client.clone(),
        sink,
    )
    .unwrap();

    let runner = tokio::spawn({
        let input = input.clone();
        async move { input.run().await }
    });

    let emitted = collect_for(&mut events, Duration::from_millis(300)).await;
    assert_eq!(emitted.len(), 1);
    assert_eq!(
        serde_json::to_value(&emitted[0]).unwrap(),
        json!({ "payload": { "value": 42 } })
    );
    assert_eq!(client.fetch_calls().len(), 1);

    input.stop().await;
    runner.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_run_is_rejected_outside_registered_state() {
    let client = MockClient::new();
    client.script_fetch("/u", Ok(json!({})));
    let (sink, _events) = channel_sink();
    let input = FirebaseInput::register(&config(HOURLY), client, sink).unwrap();

    let runner = tokio::spawn({
        let input = input.clone();
        async move { input.run().await }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(input.state(), InputState::Running(RunMode::Scheduled));
    assert!(matches!(input.run().await, Err(InputError::InvalidState(_))));

    let handle = input.stop_handle();
    assert!(handle.stop().await.performed);
    assert!(handle.is_stopped());
    runner.await.unwrap().unwrap();

    // Stopped is terminal and stopping again is a no-op
    assert!(matches!(input.run().await, Err(InputError::InvalidState(_))));
    assert!(matches!(input.run_once().await, Err(InputError::InvalidState(_))));
    assert!(!input.stop().await.performed);
}

#[tokio::test]
async fn test_single_cycle_holds_the_running_state() {
    let client = MockClient::new();
    client.script_fetch("/u", Ok(json!({ "name": "x" })));
    client.delay_fetches(Duration::from_millis(100));
    let (sink, mut events) = channel_sink();
    let input = FirebaseInput::register(&config(HOURLY), client.clone(), sink).unwrap();

    let cycle = tokio::spawn({
        let input = input.clone();
        async move { input.run_once().await }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(input.state(), InputState::Running(RunMode::Scheduled));
    assert!(matches!(input.run().await, Err(InputError::InvalidState(_))));

    let summary = cycle.await.unwrap().unwrap();
    assert_eq!(summary.attempted, 1);
    assert_eq!(summary.succeeded, 1);
    assert_eq!(next_event(&mut events).await.get("name"), Some(&json!("x")));
    assert_eq!(input.state(), InputState::Stopped);
    assert_eq!(client.fetch_calls().len(), 1);
}

#[tokio::test]
async fn test_single_cycle_is_rejected_for_streaming_inputs() {
    let client = MockClient::new();
    client.script_fetch("/u", Ok(json!({})));
    let (sink, _events) = channel_sink();
    let input = FirebaseInput::register(
        &config("url: https://example.firebaseio.com\nrefs:\n  u: { path: /u }\n"),
        client.clone(),
        sink,
    )
    .unwrap();
    assert_eq!(input.mode(), RunMode::Streaming);

    assert!(matches!(input.run_once().await, Err(InputError::InvalidState(_))));
    assert_eq!(input.state(), InputState::Registered);
    assert!(client.fetch_calls().is_empty());
}

#[tokio::test]
async fn test_invalid_schedule_prevents_registration() {
    let client = MockClient::new();
    let (sink, _events) = channel_sink();

    // Parsed without validation so the error surfaces at registration
    let config: InputConfig = serde_yaml::from_str(
        r#"
url: https://example.firebaseio.com
refs:
  u: { path: /u }
schedule:
  every: 1h
  cron: "* * * * *"
"#,
    )
    .unwrap();
    let result = FirebaseInput::register(
        &config,
        Arc::clone(&client) as Arc<dyn RemoteDataClient>,
        sink,
    );

    let error = result.unwrap_err();
    assert!(matches!(error, InputError::Configuration(_)));
    assert!(error.is_fatal());
    assert!(client.fetch_calls().is_empty());
}
