//! End-to-end tests over real sockets.

use axum::{http::HeaderMap, http::StatusCode, response::IntoResponse, routing::post, Json};
use futures_util::{SinkExt, StreamExt};
use herald_core::{Hosts, MemoryStore};
use herald_server::config::ClientConfig;
use herald_server::{Config, Herald};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const APP_ID: &str = "app";
const APP_KEY: &str = "secret";

async fn auth_endpoint(headers: HeaderMap, Json(body): Json<Value>) -> axum::response::Response {
    let channel = body["channel_name"].as_str().unwrap_or_default();
    if channel == "private-forbidden" {
        return StatusCode::FORBIDDEN.into_response();
    }
    if channel == "private-slow" {
        tokio::time::sleep(Duration::from_secs(2)).await;
    }

    let user: u64 = headers
        .get("x-user")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .unwrap_or(1);
    Json(json!({
        "channel_data": {
            "user_id": user,
            "user_info": { "name": format!("user-{user}") }
        }
    }))
    .into_response()
}

async fn spawn_auth_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = axum::Router::new().route("/broadcasting/auth", post(auth_endpoint));
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

struct TestServer {
    addr: SocketAddr,
    herald: Herald,
}

async fn spawn_server() -> TestServer {
    let auth_addr = spawn_auth_server().await;

    let config = Config {
        auth_host: Some(Hosts::One(format!("http://{auth_addr}"))),
        clients: vec![ClientConfig {
            app_id: APP_ID.into(),
            key: APP_KEY.into(),
        }],
        ..Config::default()
    };

    let mut herald = Herald::with_store(config, Arc::new(MemoryStore::new())).unwrap();
    herald.spawn_dispatcher();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = herald.app();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestServer { addr, herald }
}

async fn connect(addr: SocketAddr) -> (Client, String) {
    let (mut ws, _) = connect_async(format!("ws://{addr}/socket")).await.unwrap();
    let connected = next_frame(&mut ws).await;
    assert_eq!(connected["event"], "connected");
    let socket_id = connected["args"][0]["socket_id"].as_str().unwrap().to_string();
    (ws, socket_id)
}

async fn next_frame(ws: &mut Client) -> Value {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => return serde_json::from_str(&text).unwrap(),
                Some(Ok(_)) => continue,
                other => panic!("socket closed: {other:?}"),
            }
        }
    })
    .await
    .expect("timed out waiting for a frame")
}

async fn send(ws: &mut Client, frame: Value) {
    ws.send(Message::Text(frame.to_string())).await.unwrap();
}

async fn wait_for_subscribers(addr: SocketAddr, channel: &str, count: u64) {
    let client = reqwest::Client::new();
    for _ in 0..100 {
        let body: Value = client
            .get(format!("http://{addr}/apps/{APP_ID}/channels/{channel}"))
            .bearer_auth(APP_KEY)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        if body["subscription_count"] == count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("{channel} never reached {count} subscribers");
}

#[tokio::test]
async fn test_http_event_reaches_public_subscriber() {
    let server = spawn_server().await;
    let (mut ws, _) = connect(server.addr).await;

    send(&mut ws, json!({"event": "subscribe", "data": {"channel": "news"}})).await;
    wait_for_subscribers(server.addr, "news", 1).await;

    let response = reqwest::Client::new()
        .post(format!("http://{}/apps/{APP_ID}/events", server.addr))
        .bearer_auth(APP_KEY)
        .json(&json!({
            "channel": "news",
            "name": "ArticlePublished",
            "data": "{\"id\":42}"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body, json!({"message": "OK"}));

    let frame = next_frame(&mut ws).await;
    assert_eq!(
        frame,
        json!({"event": "ArticlePublished", "args": ["news", {"id": 42}]})
    );
}

async fn publish(addr: SocketAddr, channel: &str, name: &str, data: &str) {
    let response = reqwest::Client::new()
        .post(format!("http://{addr}/apps/{APP_ID}/events"))
        .bearer_auth(APP_KEY)
        .json(&json!({"channel": channel, "name": name, "data": data}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
}

#[tokio::test]
async fn test_broadcasts_flow_while_auth_is_pending() {
    let server = spawn_server().await;
    let (mut ws, _) = connect(server.addr).await;

    send(&mut ws, json!({"event": "subscribe", "data": {"channel": "news"}})).await;
    wait_for_subscribers(server.addr, "news", 1).await;

    send(&mut ws, json!({"event": "subscribe", "data": {"channel": "private-slow"}})).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    publish(server.addr, "news", "Flash", "{\"n\":1}").await;

    let frame = tokio::time::timeout(Duration::from_secs(1), next_frame(&mut ws))
        .await
        .expect("broadcast held back by a pending join");
    assert_eq!(frame, json!({"event": "Flash", "args": ["news", {"n": 1}]}));

    wait_for_subscribers(server.addr, "private-slow", 1).await;
}

#[tokio::test]
async fn test_presence_join_and_leave_are_announced() {
    let server = spawn_server().await;
    let (mut alice, alice_id) = connect(server.addr).await;
    let (mut bob, _) = connect(server.addr).await;

    send(
        &mut alice,
        json!({"event": "subscribe", "data": {"channel": "presence-lobby", "auth": {"headers": {"X-User": "1"}}}}),
    )
    .await;
    let roster = next_frame(&mut alice).await;
    assert_eq!(roster["event"], "presence:subscribed");
    assert_eq!(roster["args"][0], "presence-lobby");
    assert_eq!(roster["args"][1][0]["user_id"], 1);
    assert_eq!(roster["args"][1][0]["socket_id"], alice_id.as_str());

    send(
        &mut bob,
        json!({"event": "subscribe", "data": {"channel": "presence-lobby", "auth": {"headers": {"X-User": "2"}}}}),
    )
    .await;
    let roster = next_frame(&mut bob).await;
    assert_eq!(roster["event"], "presence:subscribed");
    assert_eq!(roster["args"][1].as_array().unwrap().len(), 2);

    let joining = next_frame(&mut alice).await;
    assert_eq!(joining["event"], "presence:joining");
    assert_eq!(joining["args"][1]["user_id"], 2);
    assert_eq!(joining["args"][1]["user_info"]["name"], "user-2");

    bob.close(None).await.unwrap();

    let leaving = next_frame(&mut alice).await;
    assert_eq!(leaving["event"], "presence:leaving");
    assert_eq!(leaving["args"][1]["user_id"], 2);
    assert_eq!(leaving["args"][1]["socket_id"], "");

    let users: Value = reqwest::Client::new()
        .get(format!(
            "http://{}/apps/{APP_ID}/channels/presence-lobby/users",
            server.addr
        ))
        .query(&[("auth_key", APP_KEY)])
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(users, json!({"users": [1]}));
}

#[tokio::test]
async fn test_rejected_private_subscription() {
    let server = spawn_server().await;
    let (mut ws, _) = connect(server.addr).await;

    send(
        &mut ws,
        json!({"event": "subscribe", "data": {"channel": "private-forbidden"}}),
    )
    .await;

    let frame = next_frame(&mut ws).await;
    assert_eq!(
        frame,
        json!({"event": "subscription_error", "args": ["private-forbidden", 403]})
    );
    assert_eq!(server.herald.state().transport.room_size("private-forbidden"), 0);
}

#[tokio::test]
async fn test_client_event_relayed_to_other_members() {
    let server = spawn_server().await;
    let (mut alice, _) = connect(server.addr).await;
    let (mut bob, _) = connect(server.addr).await;

    for ws in [&mut alice, &mut bob] {
        send(ws, json!({"event": "subscribe", "data": {"channel": "private-room"}})).await;
    }
    wait_for_subscribers(server.addr, "private-room", 2).await;

    send(
        &mut alice,
        json!({"event": "client event", "data": {"channel": "private-room", "event": "client-typing", "data": {"user": 1}}}),
    )
    .await;

    let frame = next_frame(&mut bob).await;
    assert_eq!(
        frame,
        json!({"event": "client-typing", "args": ["private-room", {"user": 1}]})
    );
}

#[tokio::test]
async fn test_api_requires_app_key() {
    let server = spawn_server().await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("http://{}/apps/{APP_ID}/events", server.addr))
        .json(&json!({"channel": "news", "name": "e", "data": "{}"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 403);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body, json!({"error": "Unauthorized"}));

    let response = client
        .get(format!("http://{}/apps/{APP_ID}/status", server.addr))
        .bearer_auth("wrong")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 403);

    let response = client
        .get(format!("http://{}/", server.addr))
        .send()
        .await
        .unwrap();
    assert_eq!(response.text().await.unwrap(), "OK");
}

#[tokio::test]
async fn test_shutdown_refuses_new_joins() {
    let server = spawn_server().await;
    let (mut ws, _) = connect(server.addr).await;

    server.herald.state().router.close();
    send(&mut ws, json!({"event": "subscribe", "data": {"channel": "news"}})).await;

    let frame = next_frame(&mut ws).await;
    assert_eq!(
        frame,
        json!({"event": "subscription_error", "args": ["news", 503]})
    );
}
