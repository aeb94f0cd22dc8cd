//! HTTP-level tests against the real router

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use sensor_relay::{
    create_router,
    telemetry::{Channel, ManualClock, NEVER_SEEN_MS},
    RelayConfig, RelayState,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

fn create_test_router() -> (Router, Arc<RelayState>, Arc<ManualClock>) {
    create_test_router_with(RelayConfig::default())
}

fn create_test_router_with(config: RelayConfig) -> (Router, Arc<RelayState>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(1_000));
    let state = Arc::new(RelayState::with_clock(config, clock.clone()));
    (create_router(state.clone()), state, clock)
}

async fn send_request(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router
        .clone()
        .oneshot(request)
        .await
        .expect("Failed to send request");

    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: Value = serde_json::from_slice(&body).unwrap_or(json!({}));

    (status, json)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_ingest_sample_then_pull() {
    let (router, _, clock) = create_test_router();

    let (status, body) = send_request(
        &router,
        post_json(
            "/api/emg/ingest",
            json!({"type": "sample", "muscleActivity": 2048, "timestamp": 42}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "received");
    assert_eq!(body["timestamp"], 1_000);
    assert_eq!(body["dataCount"], 1);
    assert_eq!(body["isConnected"], true);

    clock.advance(250);
    let (status, body) = send_request(&router, get("/api/emg/data")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    assert_eq!(body["dataCount"], 1);
    assert_eq!(body["isConnected"], true);
    assert_eq!(body["timeSinceLastHeartbeat"], 250);

    let sample = &body["data"][0];
    assert_eq!(sample["timestamp"], 1_000);
    assert_eq!(sample["deviceTimestamp"], 42);
    assert_eq!(sample["muscleActivity"], 2048.0);
}

#[tokio::test]
async fn test_pull_before_any_data() {
    let (router, _, _) = create_test_router();

    let (status, body) = send_request(&router, get("/api/thermal/data")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], json!([]));
    assert_eq!(body["dataCount"], 0);
    assert_eq!(body["isConnected"], false);
    assert_eq!(body["timeSinceLastHeartbeat"], NEVER_SEEN_MS);
}

#[tokio::test]
async fn test_heartbeat_and_calibration_statuses() {
    let (router, state, _) = create_test_router();

    let (status, body) =
        send_request(&router, post_json("/api/thermal/ingest", json!({"type": "heartbeat"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "alive");
    assert_eq!(body["dataCount"], 0);
    assert_eq!(body["isConnected"], true);

    let (status, body) = send_request(
        &router,
        post_json("/api/emg/ingest", json!({"type": "calibration", "min": 100, "max": 900})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "calibrated");
    assert!(state.hub.calibration(Channel::Emg).is_some());

    let (_, body) = send_request(&router, get("/api/emg/data")).await;
    assert_eq!(body["calibration"]["min"], 100.0);
    assert_eq!(body["calibration"]["max"], 900.0);
}

#[tokio::test]
async fn test_malformed_messages_are_rejected() {
    let (router, state, _) = create_test_router();

    let bad_json = Request::builder()
        .method(Method::POST)
        .uri("/api/emg/ingest")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, body) = send_request(&router, bad_json).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "malformed_message");

    let (status, _) =
        send_request(&router, post_json("/api/emg/ingest", json!({"type": "reboot"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) =
        send_request(&router, post_json("/api/emg/ingest", json!({"muscleActivity": 1}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send_request(
        &router,
        post_json("/api/thermal/ingest", json!({"type": "sample", "thermal_data": []})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_field");

    assert_eq!(state.hub.total_count(Channel::Emg), 0);
    assert_eq!(state.hub.total_count(Channel::Thermal), 0);
    assert!(!state.hub.is_connected(Channel::Emg));
}

#[tokio::test]
async fn test_unknown_channel_is_not_found() {
    let (router, _, _) = create_test_router();

    let (status, body) = send_request(&router, get("/api/ecg/data")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "unknown_channel");

    let (status, _) =
        send_request(&router, post_json("/api/ecg/ingest", json!({"type": "heartbeat"}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_legacy_routes() {
    let (router, _, clock) = create_test_router();

    let (status, body) = send_request(
        &router,
        post_json("/api/emg/ws", json!({"type": "emg_data", "muscleActivity": 300})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "received");
    assert_eq!(body["channel"], "emg");

    // Frame as the Bluetooth bridge sends it, with an offset-less ISO timestamp
    let frame = json!({
        "type": "thermal_data",
        "thermal_data": [[20.0, 21.0], [22.0, 23.0]],
        "grid_size": {"width": 2, "height": 2},
        "sensor_info": {"model": "AMG8833"},
        "status": "active",
        "timestamp": "2024-05-01T12:00:00.250000"
    });
    let (status, body) = send_request(&router, post_json("/api/thermal/bt", frame)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["channel"], "thermal");

    clock.advance(400);
    let (status, body) = send_request(&router, get("/api/thermal/bt")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    assert_eq!(body["thermal_data"], json!([[20.0, 21.0], [22.0, 23.0]]));
    assert_eq!(body["grid_size"], json!({"width": 2, "height": 2}));
    assert_eq!(body["sensor_info"]["model"], "AMG8833");
    assert_eq!(body["stats"]["max"], 23.0);
    assert_eq!(body["timestamp"], 1_000);
    assert_eq!(body["deviceTimestamp"], 1_714_564_800_250i64);
    assert_eq!(body["isConnected"], true);
    assert_eq!(body["timeSinceLastUpdate"], 400);
    assert_eq!(body["lastUpdateTime"], 1_000);
    assert!(body.get("data").is_none());
}

#[tokio::test]
async fn test_legacy_thermal_pull_without_frames() {
    let (router, _, _) = create_test_router();
    send_request(&router, post_json("/api/thermal/ingest", json!({"type": "heartbeat"}))).await;

    let (status, body) = send_request(&router, get("/api/thermal/bt")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "no_data");
    assert_eq!(body["data"], Value::Null);
    assert!(body.get("data").is_some());
    assert_eq!(body["isConnected"], true);
    assert_eq!(body["timeSinceLastUpdate"], NEVER_SEEN_MS);
}

#[tokio::test]
async fn test_device_command_roundtrip() {
    let (router, _, clock) = create_test_router();

    let (status, body) = send_request(&router, get("/api/emg/command")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["hasCommand"], false);
    assert_eq!(body["command"], Value::Null);
    assert_eq!(body["calibrationData"], Value::Null);

    let (status, body) = send_request(
        &router,
        post_json("/api/emg/command", json!({"command": "start_calibration"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "command_received");
    assert_eq!(body["command"], "START_CALIBRATION");
    assert_eq!(body["timestamp"], 1_000);

    clock.advance(10_000);
    let (_, body) = send_request(&router, get("/api/emg/command")).await;
    assert_eq!(body["hasCommand"], true);
    assert_eq!(body["command"], "START_CALIBRATION");
    assert_eq!(body["timestamp"], 1_000);

    clock.advance(1);
    let (_, body) = send_request(&router, get("/api/emg/command")).await;
    assert_eq!(body["hasCommand"], false);
    assert_eq!(body["command"], Value::Null);
}

#[tokio::test]
async fn test_calibration_progress_via_command_endpoint() {
    let (router, state, clock) = create_test_router();

    clock.set(5_000);
    let (status, body) = send_request(
        &router,
        post_json(
            "/api/emg/command",
            json!({"calibrationData": {"rawValue": 640, "min": 200, "max": 1800, "progress": 40}}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "calibration_data_received");
    assert_eq!(body["timestamp"], 5_000);
    assert!(state.hub.is_connected(Channel::Emg));

    let (_, body) = send_request(&router, get("/api/emg/command")).await;
    assert_eq!(body["hasCommand"], false);
    let calibration = &body["calibrationData"];
    assert_eq!(calibration["rawValue"], 640.0);
    assert_eq!(calibration["min"], 200.0);
    assert_eq!(calibration["max"], 1800.0);
    assert_eq!(calibration["progress"], 40.0);
    assert_eq!(calibration["timestamp"], 5_000);

    let (_, body) = send_request(&router, get("/api/emg/data")).await;
    assert_eq!(body["calibration"]["min"], 200.0);
    assert_eq!(body["calibration"]["max"], 1800.0);
}

#[tokio::test]
async fn test_command_requires_command_field() {
    let (router, _, _) = create_test_router();

    let (status, body) =
        send_request(&router, post_json("/api/emg/command", json!({"note": "hi"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_field");

    let (status, _) =
        send_request(&router, post_json("/api/ecg/command", json!({"command": "start"}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_recent_window_in_pull() {
    let (router, _, clock) = create_test_router();

    for i in 0..60 {
        clock.set(1_000 + i);
        let (status, _) = send_request(
            &router,
            post_json("/api/emg/ingest", json!({"type": "sample", "muscleActivity": i})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (_, body) = send_request(&router, get("/api/emg/data")).await;
    let data = body["data"].as_array().unwrap();
    assert_eq!(body["dataCount"], 60);
    assert_eq!(data.len(), 50);
    assert_eq!(data[0]["timestamp"], 1_010);
    assert_eq!(data[49]["timestamp"], 1_059);
}

#[tokio::test]
async fn test_body_limit() {
    let config = RelayConfig {
        max_body_size: 64,
        ..RelayConfig::default()
    };
    let (router, _, _) = create_test_router_with(config);

    let padding = "x".repeat(256);
    let (status, _) = send_request(
        &router,
        post_json("/api/emg/ingest", json!({"type": "heartbeat", "note": padding})),
    )
    .await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn test_health() {
    let (router, _, _) = create_test_router();
    send_request(&router, post_json("/api/emg/ingest", json!({"type": "heartbeat"}))).await;

    let (status, body) = send_request(&router, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));

    let channels = body["channels"].as_array().unwrap();
    assert_eq!(channels.len(), 2);
    assert_eq!(channels[0]["channel"], "emg");
    assert_eq!(channels[0]["isConnected"], true);
    assert_eq!(channels[0]["dataCount"], 0);
    assert_eq!(channels[0]["retainedCount"], 0);
    assert_eq!(channels[0]["evictedCount"], 0);
    assert_eq!(channels[1]["channel"], "thermal");
    assert_eq!(channels[1]["isConnected"], false);
    assert!(body.get("uptimeSeconds").is_some());
}

#[tokio::test]
async fn test_cors_headers() {
    let (router, _, _) = create_test_router();

    let request = Request::builder()
        .uri("/api/emg/data")
        .header(header::ORIGIN, "http://localhost:3000")
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(request).await.expect("Failed to send request");

    assert!(response.headers().contains_key("access-control-allow-origin"));
}

#[tokio::test]
async fn test_stream_starts_with_initial_snapshot() {
    let (router, state, _) = create_test_router();
    send_request(
        &router,
        post_json("/api/emg/ingest", json!({"type": "sample", "muscleActivity": 5})),
    )
    .await;

    let response = router
        .clone()
        .oneshot(get("/api/emg/stream"))
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers();
    assert_eq!(headers[header::CONTENT_TYPE], "text/event-stream");
    assert_eq!(headers[header::CACHE_CONTROL], "no-cache, no-transform");
    assert_eq!(headers["x-accel-buffering"], "no");
    assert_eq!(state.hub.subscriber_count(Channel::Emg), 1);

    let mut body = response.into_body();
    let frame = body.frame().await.unwrap().unwrap();
    let text = String::from_utf8(frame.into_data().unwrap().to_vec()).unwrap();
    let payload = text
        .lines()
        .find_map(|line| line.strip_prefix("data: "))
        .unwrap();
    let event: Value = serde_json::from_str(payload).unwrap();

    assert_eq!(event["type"], "initial");
    assert_eq!(event["dataCount"], 1);
    assert_eq!(event["data"][0]["muscleActivity"], 5.0);

    // Dropping the body closes the stream and releases the subscription
    drop(body);
    assert_eq!(state.hub.subscriber_count(Channel::Emg), 0);
}

#[tokio::test]
async fn test_stream_delivers_updates_and_ends_on_shutdown() {
    let (router, state, clock) = create_test_router();

    let response = router
        .clone()
        .oneshot(get("/api/emg/stream"))
        .await
        .expect("Failed to send request");
    let mut body = response.into_body();
    body.frame().await.unwrap().unwrap();

    clock.set(2_000);
    send_request(
        &router,
        post_json("/api/emg/ingest", json!({"type": "sample", "muscleActivity": 9})),
    )
    .await;

    let frame = body.frame().await.unwrap().unwrap();
    let text = String::from_utf8(frame.into_data().unwrap().to_vec()).unwrap();
    let payload = text
        .lines()
        .find_map(|line| line.strip_prefix("data: "))
        .unwrap();
    let event: Value = serde_json::from_str(payload).unwrap();
    assert_eq!(event["type"], "update");
    assert_eq!(event["newData"]["timestamp"], 2_000);
    assert_eq!(event["dataCount"], 1);

    state.shutdown.cancel();
    assert!(body.frame().await.is_none());
    assert_eq!(state.hub.subscriber_count(Channel::Emg), 0);
}
