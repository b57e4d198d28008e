//! End-to-end integration tests using a real WebSocket client.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use doccollab_auth::{TokenIssuer, TokenVerifier};
use doccollab_core::{DocumentId, UserId};
use doccollab_server::config::ServerConfig;
use doccollab_server::providers::{MemoryContentStore, StaticAccessOracle};
use doccollab_server::server::CollabServer;

const TIMEOUT: Duration = Duration::from_secs(5);
const SECRET: &[u8] = b"integration-test-secret";

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

struct TestHarness {
    ws_url: String,
    http_url: String,
    server: Arc<CollabServer>,
    store: Arc<MemoryContentStore>,
}

/// Boot a test server on an ephemeral port.
///
/// Grants: `alice` and `bob` may access `doc-1`; nobody may access
/// `doc-locked`.
async fn boot_server() -> TestHarness {
    boot_server_with_config(ServerConfig::default()).await
}

async fn boot_server_with_config(config: ServerConfig) -> TestHarness {
    let oracle = StaticAccessOracle::new()
        .grant(UserId::from("alice"), DocumentId::from("doc-1"))
        .grant(UserId::from("bob"), DocumentId::from("doc-1"));
    let store = Arc::new(MemoryContentStore::new());

    let server = Arc::new(CollabServer::new(
        config,
        TokenVerifier::new(SECRET),
        Arc::new(oracle),
        Arc::clone(&store) as Arc<dyn doccollab_core::ContentStore>,
    ));
    let (addr, _handle) = server.listen().await.unwrap();

    TestHarness {
        ws_url: format!("ws://{addr}/ws"),
        http_url: format!("http://{addr}"),
        server,
        store,
    }
}

fn token_for(user: &str) -> String {
    TokenIssuer::new(SECRET)
        .issue(&UserId::from(user), 3600)
        .unwrap()
}

fn expired_token_for(user: &str) -> String {
    TokenIssuer::new(SECRET)
        .issue(&UserId::from(user), -3600)
        .unwrap()
}

async fn connect(harness: &TestHarness) -> WsStream {
    let (ws, _) = connect_async(&harness.ws_url).await.unwrap();
    ws
}

async fn send_json(ws: &mut WsStream, value: Value) {
    ws.send(Message::Text(value.to_string().into()))
        .await
        .unwrap();
}

/// Receive the next JSON text frame, skipping control frames.
async fn recv_json(ws: &mut WsStream) -> Value {
    loop {
        let msg = timeout(TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for message")
            .expect("connection closed")
            .unwrap();
        match msg {
            Message::Text(text) => return serde_json::from_str(&text).unwrap(),
            Message::Ping(_) | Message::Pong(_) => {}
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

/// Receive the close frame, skipping anything that is not a close.
async fn recv_close_code(ws: &mut WsStream) -> u16 {
    loop {
        let msg = timeout(TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for close")
            .expect("stream ended without close frame")
            .unwrap();
        match msg {
            Message::Close(Some(frame)) => return frame.code.into(),
            Message::Close(None) => panic!("close frame carried no code"),
            _ => {}
        }
    }
}

/// Assert that nothing arrives on `ws` within a short window.
async fn assert_silent(ws: &mut WsStream) {
    let result = timeout(Duration::from_millis(300), ws.next()).await;
    match result {
        Err(_) => {}
        Ok(Some(Ok(Message::Ping(_) | Message::Pong(_)))) => {}
        Ok(other) => panic!("expected silence, got {other:?}"),
    }
}

/// Authenticate `user` and join `doc`, consuming both success replies.
async fn auth_and_join(ws: &mut WsStream, user: &str, doc: &str) {
    send_json(ws, json!({"type": "auth", "token": token_for(user)})).await;
    let reply = recv_json(ws).await;
    assert_eq!(reply["type"], "auth_success");

    send_json(ws, json!({"type": "join", "fileId": doc})).await;
    let reply = recv_json(ws).await;
    assert_eq!(reply["type"], "join_success");
    assert_eq!(reply["fileId"], doc);
}

#[tokio::test]
async fn auth_with_valid_token_succeeds() {
    let harness = boot_server().await;
    let mut ws = connect(&harness).await;

    send_json(&mut ws, json!({"type": "auth", "token": token_for("alice")})).await;
    let reply = recv_json(&mut ws).await;
    assert_eq!(reply["type"], "auth_success");
    assert_eq!(reply["message"], "Authentication successful");
}

#[tokio::test]
async fn auth_with_expired_token_closes_with_4001() {
    let harness = boot_server().await;
    let mut ws = connect(&harness).await;

    send_json(
        &mut ws,
        json!({"type": "auth", "token": expired_token_for("alice")}),
    )
    .await;
    let reply = recv_json(&mut ws).await;
    assert_eq!(reply["type"], "error");
    assert_eq!(reply["message"], "Invalid token");
    assert_eq!(recv_close_code(&mut ws).await, 4001);
}

#[tokio::test]
async fn auth_without_token_closes_with_4001() {
    let harness = boot_server().await;
    let mut ws = connect(&harness).await;

    send_json(&mut ws, json!({"type": "auth"})).await;
    let reply = recv_json(&mut ws).await;
    assert_eq!(reply["type"], "error");
    assert_eq!(reply["message"], "Authentication required");
    assert_eq!(recv_close_code(&mut ws).await, 4001);
}

#[tokio::test]
async fn rejected_session_leaves_no_room_state() {
    let harness = boot_server().await;
    let mut ws = connect(&harness).await;

    send_json(
        &mut ws,
        json!({"type": "auth", "token": expired_token_for("alice")}),
    )
    .await;
    let _ = recv_json(&mut ws).await;
    let _ = recv_close_code(&mut ws).await;

    // Give the session task a moment to run its teardown.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(harness.server.rooms().room_count().await, 0);
}

#[tokio::test]
async fn join_before_auth_is_rejected_but_session_survives() {
    let harness = boot_server().await;
    let mut ws = connect(&harness).await;

    send_json(&mut ws, json!({"type": "join", "fileId": "doc-1"})).await;
    let reply = recv_json(&mut ws).await;
    assert_eq!(reply["type"], "error");
    assert_eq!(reply["message"], "Authentication required");

    // The same connection can still authenticate.
    send_json(&mut ws, json!({"type": "auth", "token": token_for("alice")})).await;
    let reply = recv_json(&mut ws).await;
    assert_eq!(reply["type"], "auth_success");
}

#[tokio::test]
async fn join_denied_by_oracle() {
    let harness = boot_server().await;
    let mut ws = connect(&harness).await;

    send_json(&mut ws, json!({"type": "auth", "token": token_for("alice")})).await;
    let _ = recv_json(&mut ws).await;

    send_json(&mut ws, json!({"type": "join", "fileId": "doc-locked"})).await;
    let reply = recv_json(&mut ws).await;
    assert_eq!(reply["type"], "error");
    assert_eq!(
        reply["message"],
        "You do not have permission to access this file"
    );

    // The denied join granted no write access either.
    send_json(
        &mut ws,
        json!({"type": "content-change", "fileId": "doc-locked", "content": {"x": 1}}),
    )
    .await;
    let reply = recv_json(&mut ws).await;
    assert_eq!(reply["type"], "error");
    assert_eq!(reply["message"], "You have not joined this file");
}

#[tokio::test]
async fn content_change_broadcasts_to_peers_but_not_sender() {
    let harness = boot_server().await;
    let mut alice = connect(&harness).await;
    let mut bob = connect(&harness).await;
    auth_and_join(&mut alice, "alice", "doc-1").await;
    auth_and_join(&mut bob, "bob", "doc-1").await;

    let content = json!({"type": "doc", "content": [{"type": "paragraph", "content": [{"type": "text", "text": "hello"}]}]});
    send_json(
        &mut alice,
        json!({"type": "content-change", "fileId": "doc-1", "content": content}),
    )
    .await;

    let update = recv_json(&mut bob).await;
    assert_eq!(update["type"], "content-updated");
    assert_eq!(update["fileId"], "doc-1");
    assert_eq!(update["content"], content);

    // No echo to the sender.
    assert_silent(&mut alice).await;
}

#[tokio::test]
async fn content_change_persists_before_broadcast() {
    use doccollab_core::ContentStore;

    let harness = boot_server().await;
    let mut alice = connect(&harness).await;
    let mut bob = connect(&harness).await;
    auth_and_join(&mut alice, "alice", "doc-1").await;
    auth_and_join(&mut bob, "bob", "doc-1").await;

    let content = json!({"v": 42});
    send_json(
        &mut alice,
        json!({"type": "content-change", "fileId": "doc-1", "content": content}),
    )
    .await;
    let _ = recv_json(&mut bob).await;

    // A reader arriving after the broadcast sees the persisted body.
    let stored = harness.store.get(&DocumentId::from("doc-1")).await.unwrap();
    assert_eq!(stored, content);
}

#[tokio::test]
async fn broadcasts_stay_within_their_room() {
    let harness = boot_server().await;
    let mut alice = connect(&harness).await;
    let mut bob = connect(&harness).await;
    auth_and_join(&mut alice, "alice", "doc-1").await;

    send_json(&mut bob, json!({"type": "auth", "token": token_for("bob")})).await;
    let reply = recv_json(&mut bob).await;
    assert_eq!(reply["type"], "auth_success");

    send_json(
        &mut alice,
        json!({"type": "content-change", "fileId": "doc-1", "content": {"x": 1}}),
    )
    .await;

    // bob never joined doc-1's room, so nothing reaches him.
    assert_silent(&mut bob).await;
}

#[tokio::test]
async fn leave_stops_delivery() {
    let harness = boot_server().await;
    let mut alice = connect(&harness).await;
    let mut bob = connect(&harness).await;
    auth_and_join(&mut alice, "alice", "doc-1").await;
    auth_and_join(&mut bob, "bob", "doc-1").await;

    send_json(&mut bob, json!({"type": "leave", "fileId": "doc-1"})).await;
    // leave has no success reply; settle before writing.
    tokio::time::sleep(Duration::from_millis(100)).await;

    send_json(
        &mut alice,
        json!({"type": "content-change", "fileId": "doc-1", "content": {"x": 2}}),
    )
    .await;
    assert_silent(&mut bob).await;
}

#[tokio::test]
async fn disconnect_cleans_up_room_membership() {
    let harness = boot_server().await;
    let mut alice = connect(&harness).await;
    auth_and_join(&mut alice, "alice", "doc-1").await;
    assert_eq!(harness.server.rooms().room_count().await, 1);

    alice.close(None).await.unwrap();
    drop(alice);

    // Wait for the server-side teardown (empty rooms are pruned).
    let deadline = tokio::time::Instant::now() + TIMEOUT;
    loop {
        if harness.server.rooms().room_count().await == 0 {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "room membership not cleaned up after disconnect"
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test]
async fn unresponsive_client_is_torn_down() {
    let config = ServerConfig {
        heartbeat_interval_secs: 1,
        heartbeat_timeout_secs: 1,
        ..ServerConfig::default()
    };
    let harness = boot_server_with_config(config).await;
    let mut ws = connect(&harness).await;
    auth_and_join(&mut ws, "alice", "doc-1").await;
    assert_eq!(harness.server.rooms().room_count().await, 1);

    // Stop reading the stream: the client library never flushes its pong
    // replies, so server pings go unanswered while TCP stays open. The
    // heartbeat must tear the whole session down, rooms included.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(8);
    while harness.server.rooms().room_count().await != 0 {
        assert!(
            tokio::time::Instant::now() < deadline,
            "unresponsive client kept its room membership"
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    drop(ws);
}

#[tokio::test]
async fn malformed_json_gets_error_but_session_survives() {
    let harness = boot_server().await;
    let mut ws = connect(&harness).await;

    ws.send(Message::Text("{not json".into())).await.unwrap();
    let reply = recv_json(&mut ws).await;
    assert_eq!(reply["type"], "error");
    assert!(
        reply["message"]
            .as_str()
            .unwrap()
            .starts_with("Error processing message:")
    );

    send_json(&mut ws, json!({"type": "auth", "token": token_for("alice")})).await;
    let reply = recv_json(&mut ws).await;
    assert_eq!(reply["type"], "auth_success");
}

#[tokio::test]
async fn unknown_message_type_gets_error() {
    let harness = boot_server().await;
    let mut ws = connect(&harness).await;

    send_json(&mut ws, json!({"type": "bogus"})).await;
    let reply = recv_json(&mut ws).await;
    assert_eq!(reply["type"], "error");
    assert_eq!(reply["message"], "Unknown message type 'bogus'");
}

#[tokio::test]
async fn connection_cap_refuses_extra_upgrades() {
    let config = ServerConfig {
        max_connections: 1,
        ..ServerConfig::default()
    };
    let harness = boot_server_with_config(config).await;

    let _first = connect(&harness).await;
    let err = connect_async(&harness.ws_url).await;
    assert!(err.is_err(), "second upgrade should be refused");
}

#[tokio::test]
async fn connection_cap_slot_frees_after_disconnect() {
    let config = ServerConfig {
        max_connections: 1,
        ..ServerConfig::default()
    };
    let harness = boot_server_with_config(config).await;

    let mut first = connect(&harness).await;
    first.close(None).await.unwrap();
    drop(first);

    // Once the first session is fully torn down its slot is reusable.
    let deadline = tokio::time::Instant::now() + TIMEOUT;
    loop {
        if connect_async(&harness.ws_url).await.is_ok() {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "connection slot never freed after disconnect"
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test]
async fn health_endpoint_reports_connections() {
    let harness = boot_server().await;
    let _ws = connect(&harness).await;
    // Let the session task register.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let body: Value = reqwest::get(format!("{}/health", harness.http_url))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["connections"], 1);
}

#[tokio::test]
async fn shutdown_closes_sessions_and_rooms() {
    let harness = boot_server().await;
    let mut ws = connect(&harness).await;
    auth_and_join(&mut ws, "alice", "doc-1").await;

    harness.server.shutdown().shutdown();

    // The server ends the session; the stream terminates.
    let deadline = tokio::time::Instant::now() + TIMEOUT;
    loop {
        match timeout(TIMEOUT, ws.next()).await.expect("no shutdown close") {
            None | Some(Ok(Message::Close(_))) => break,
            Some(Ok(_)) => {}
            Some(Err(_)) => break,
        }
        assert!(tokio::time::Instant::now() < deadline);
    }

    let deadline = tokio::time::Instant::now() + TIMEOUT;
    while harness.server.rooms().room_count().await != 0 {
        assert!(
            tokio::time::Instant::now() < deadline,
            "rooms not emptied on shutdown"
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
