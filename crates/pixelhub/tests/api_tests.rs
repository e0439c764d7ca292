//! API integration tests.

use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode, header},
};
use pixelhub::hub::Outbound;
use pixelhub_protocol::{ClientRole, Frame, LogKind, events};
use serde_json::{Value, json};
use tower::ServiceExt;

mod common;
use common::{TEST_TOKEN, test_app, test_app_with_token};

async fn get_json(app: Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .oneshot(
            Request::builder()
                .uri(uri)
                .method(Method::GET)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    read_json(response).await
}

async fn post_json(app: Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let response = app
        .oneshot(
            Request::builder()
                .uri(uri)
                .method(Method::POST)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(serde_json::to_string(&body).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();
    read_json(response).await
}

async fn read_json(response: axum::response::Response) -> (StatusCode, Value) {
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    let json = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, json)
}

/// Test that health endpoint works without a token.
#[tokio::test]
async fn test_health_endpoint() {
    let (status, json) = get_json(test_app(), "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
}

#[tokio::test]
async fn test_list_nodes_empty() {
    let (status, json) = get_json(test_app(), "/api/nodes").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["nodes"], json!([]));
}

#[tokio::test]
async fn test_list_nodes_and_clients() {
    let (app, state) = test_app_with_token();
    let (node, _node_rx) = state.hub.connect(ClientRole::Engine, None).await.unwrap();
    let (_console, _console_rx) = state
        .hub
        .connect(ClientRole::Console, Some("ops".to_string()))
        .await
        .unwrap();

    let (status, json) = get_json(app.clone(), "/api/nodes").await;
    assert_eq!(status, StatusCode::OK);
    let nodes = json["nodes"].as_array().unwrap();
    assert_eq!(nodes.len(), 1);
    assert_eq!(nodes[0]["id"], node.id.as_str());
    assert_eq!(nodes[0]["alias"], "Game Server");

    let (status, json) = get_json(app, "/api/clients").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["clients"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_list_logs_filters_by_kind() {
    let (app, state) = test_app_with_token();
    state.hub.logs().push(LogKind::Engine, "engine line");
    state.hub.logs().push(LogKind::Hub, "hub line");

    let (status, json) = get_json(app, "/api/logs?kind=engine").await;
    assert_eq!(status, StatusCode::OK);
    let logs = json["logs"].as_array().unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0]["message"], "engine line");
}

/// Control API is disabled until a token is configured.
#[tokio::test]
async fn test_control_disabled_without_token() {
    let (status, json) = post_json(
        test_app(),
        "/api/control",
        json!({ "token": "x", "action": "socket", "target": "unity", "event": "reload" }),
    )
    .await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json["code"], "SERVICE_UNAVAILABLE");
}

#[tokio::test]
async fn test_control_rejects_bad_token() {
    let (app, _state) = test_app_with_token();
    let (status, json) = post_json(
        app,
        "/api/control",
        json!({ "token": "wrong", "action": "socket", "target": "unity", "event": "reload" }),
    )
    .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn test_control_unsupported_action() {
    let (app, _state) = test_app_with_token();
    let (status, _) = post_json(
        app,
        "/api/control",
        json!({ "token": TEST_TOKEN, "action": "http", "target": "unity", "event": "reload" }),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_IMPLEMENTED);
}

#[tokio::test]
async fn test_control_broadcasts_to_engines() {
    let (app, state) = test_app_with_token();
    let (_node, mut node_rx) = state.hub.connect(ClientRole::Engine, None).await.unwrap();
    // welcome
    let _ = node_rx.recv().await.unwrap();

    let (status, json) = post_json(
        app,
        "/api/control",
        json!({
            "token": TEST_TOKEN,
            "action": "socket",
            "target": "unity",
            "event": "reload",
            "data": { "force": true }
        }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["delivered"], 1);

    let Outbound::Frame(frame) = node_rx.recv().await.unwrap() else {
        panic!("expected a frame");
    };
    assert_eq!(frame.event, events::UNITY_COMMAND);
    assert_eq!(frame.data["cmd"], "reload");
    assert_eq!(frame.data["data"]["force"], true);
}

#[tokio::test]
async fn test_control_with_no_recipients() {
    let (app, _state) = test_app_with_token();
    let (status, json) = post_json(
        app,
        "/api/control",
        json!({
            "token": TEST_TOKEN,
            "action": "socket",
            "target": "webconsole",
            "event": "notice"
        }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["delivered"], 0);
}

#[tokio::test]
async fn test_fetch_unknown_node() {
    let (app, _state) = test_app_with_token();
    let (status, json) = post_json(
        app,
        "/api/nodes/missing/fetch",
        json!({ "token": TEST_TOKEN, "cmd": "zones:list" }),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_fetch_rejects_console_id() {
    let (app, state) = test_app_with_token();
    let (console, _rx) = state.hub.connect(ClientRole::Console, None).await.unwrap();

    let (status, _) = post_json(
        app,
        &format!("/api/nodes/{}/fetch", console.id),
        json!({ "token": TEST_TOKEN, "cmd": "zones:list" }),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

/// A silent node yields a timed-out result rather than an HTTP error.
#[tokio::test]
async fn test_fetch_silent_node_times_out() {
    let (app, state) = test_app_with_token();
    let (node, _node_rx) = state.hub.connect(ClientRole::Engine, None).await.unwrap();

    let (status, json) = post_json(
        app,
        &format!("/api/nodes/{}/fetch", node.id),
        json!({ "token": TEST_TOKEN, "cmd": "zones:list", "timeoutMs": 50 }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["code"], 408);
    assert_eq!(json["results"][0]["nodeId"], node.id.as_str());
    assert_eq!(json["results"][0]["code"], 408);
    assert_eq!(state.hub.pending_requests(), 0);
}

#[tokio::test]
async fn test_fetch_collects_node_reply() {
    let (app, state) = test_app_with_token();
    let (node, mut node_rx) = state.hub.connect(ClientRole::Engine, None).await.unwrap();

    // Answer like a game server would.
    let hub = state.hub.clone();
    let node_id = node.id.clone();
    let responder = tokio::spawn(async move {
        while let Some(outbound) = node_rx.recv().await {
            let Outbound::Frame(frame) = outbound else {
                continue;
            };
            if frame.event != events::UNITY_COMMAND {
                continue;
            }
            let token = frame.data["token"].clone();
            let reply = Frame::new(
                events::COMMAND_RESPONSE,
                json!({
                    "token": token,
                    "code": 100,
                    "message": "ok",
                    "data": { "zones": ["lobby"] }
                }),
            );
            hub.handle_frame(&node_id, reply).await;
            break;
        }
    });

    let (status, json) = post_json(
        app,
        &format!("/api/nodes/{}/fetch", node.id),
        json!({ "token": TEST_TOKEN, "cmd": "zones:list", "timeoutMs": 2000 }),
    )
    .await;
    responder.await.unwrap();

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["code"], 100);
    assert_eq!(json["results"][0]["code"], 100);
    assert_eq!(json["results"][0]["data"]["zones"], json!(["lobby"]));
}

/// Log entries pushed after subscribing arrive as `new-log` events.
#[tokio::test]
async fn test_log_stream_delivers_new_entries() {
    use futures::StreamExt;

    let (app, state) = test_app_with_token();
    state.hub.logs().push(LogKind::Hub, "before subscribe");

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/logs/stream?kind=hub")
                .method(Method::GET)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(
        response.headers()[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("text/event-stream")
    );

    state.hub.logs().push(LogKind::Engine, "filtered out");
    state.hub.logs().push(LogKind::Hub, "Stop requested for n1");

    let mut body = response.into_body().into_data_stream();
    let chunk = tokio::time::timeout(std::time::Duration::from_secs(5), body.next())
        .await
        .expect("no log event received")
        .unwrap()
        .unwrap();
    let text = String::from_utf8(chunk.to_vec()).unwrap();

    assert!(text.contains("event: new-log"));
    assert!(text.contains("Stop requested for n1"));
    assert!(!text.contains("filtered out"));
    assert!(!text.contains("before subscribe"));
}
