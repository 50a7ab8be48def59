//! Integration tests for the send-then-push REST surface.

use futures_util::StreamExt;
use serde_json::json;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

use courier_server::auth::jwt::{issue_access_token, ACCESS_TOKEN_TTL_SECS};
use courier_server::config::WsConfig;
use courier_server::db::store;
use courier_server::state::AppState;

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// Helper: start the server on a random port and return (base_url, addr, state).
async fn start_test_server() -> (String, SocketAddr, AppState) {
    let tmp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let data_dir = tmp_dir.path().to_str().unwrap().to_string();

    let db = courier_server::db::init_db(&data_dir).expect("Failed to init DB");
    let jwt_secret = courier_server::auth::jwt::load_or_generate_jwt_secret(&data_dir)
        .expect("Failed to generate JWT secret");
    let state = AppState::new(db, jwt_secret, WsConfig::default());

    let app = courier_server::routes::build_router(state.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
        let _keep = tmp_dir;
    });

    (format!("http://{}", addr), addr, state)
}

/// Create a user directly in the store and return an access token.
/// These accounts never log in with a password.
fn register_user(state: &AppState, username: &str) -> String {
    store::create_user(&state.db, username, "!").unwrap();
    issue_access_token(&state.jwt_secret, username, ACCESS_TOKEN_TTL_SECS).unwrap()
}

/// Open a presence connection and wait until the registry sees it.
async fn connect_presence(addr: SocketAddr, state: &AppState, username: &str, token: &str) -> WsStream {
    let url = format!("ws://{}/ws?token={}", addr, token);
    let (ws, _) = tokio_tungstenite::connect_async(&url)
        .await
        .expect("Failed to connect to WebSocket");
    for _ in 0..100 {
        if state.connections.is_online(username) {
            return ws;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("{} never came online", username);
}

async fn next_event(ws: &mut WsStream) -> serde_json::Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("Expected an event within timeout")
            .expect("Stream ended")
            .expect("WebSocket error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

async fn assert_no_event(ws: &mut WsStream) {
    let result = tokio::time::timeout(Duration::from_millis(300), async {
        loop {
            if let Some(Ok(Message::Text(text))) = ws.next().await {
                return text;
            }
        }
    })
    .await;
    assert!(result.is_err(), "Expected no event, got {:?}", result);
}

#[tokio::test]
async fn test_send_requires_bearer_token() {
    let (base_url, _addr, _state) = start_test_server().await;

    let resp = reqwest::Client::new()
        .post(format!("{}/send", base_url))
        .json(&json!({"receiver": "bob", "content": "hi"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
}

#[tokio::test]
async fn test_send_pushes_to_online_receiver() {
    let (base_url, addr, state) = start_test_server().await;
    let alice_token = register_user(&state, "alice");
    let bob_token = register_user(&state, "bob");
    let mut bob = connect_presence(addr, &state, "bob", &bob_token).await;

    let resp = reqwest::Client::new()
        .post(format!("{}/send", base_url))
        .bearer_auth(&alice_token)
        .json(&json!({"receiver": "bob", "content": "hello"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body, json!({"message": "Message sent", "delivered": true}));

    let event = next_event(&mut bob).await;
    assert_eq!(event["type"], "new_message");
    assert_eq!(event["data"]["sender"], "alice");
    assert_eq!(event["data"]["receiver"], "bob");
    assert_eq!(event["data"]["content"], "hello");
    assert!(event["data"]["timestamp"].is_string());
}

#[tokio::test]
async fn test_send_to_offline_receiver_is_stored() {
    let (base_url, _addr, state) = start_test_server().await;
    let alice_token = register_user(&state, "alice");
    let bob_token = register_user(&state, "bob");
    let client = reqwest::Client::new();

    let body: serde_json::Value = client
        .post(format!("{}/send", base_url))
        .bearer_auth(&alice_token)
        .json(&json!({"receiver": "bob", "content": "later"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["delivered"], false);

    let history: Vec<serde_json::Value> = client
        .get(format!("{}/messages", base_url))
        .bearer_auth(&bob_token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0]["sender"], "alice");
    assert_eq!(history[0]["content"], "later");
}

#[tokio::test]
async fn test_send_to_unknown_receiver_is_404() {
    let (base_url, _addr, state) = start_test_server().await;
    let alice_token = register_user(&state, "alice");

    let resp = reqwest::Client::new()
        .post(format!("{}/send", base_url))
        .bearer_auth(&alice_token)
        .json(&json!({"receiver": "nobody", "content": "hi"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn test_voice_message_carries_file_url() {
    let (base_url, addr, state) = start_test_server().await;
    let alice_token = register_user(&state, "alice");
    let bob_token = register_user(&state, "bob");
    let mut bob = connect_presence(addr, &state, "bob", &bob_token).await;

    let resp = reqwest::Client::new()
        .post(format!("{}/send/voice", base_url))
        .bearer_auth(&alice_token)
        .json(&json!({"receiver": "bob", "audio_file_id": "f00d"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let event = next_event(&mut bob).await;
    assert_eq!(event["type"], "new_voice_message");
    assert_eq!(event["data"]["audio_url"], "/files/f00d");
    assert!(event["data"].get("content").is_none());
}

#[tokio::test]
async fn test_group_message_fans_out_except_sender() {
    let (base_url, addr, state) = start_test_server().await;
    let alice_token = register_user(&state, "alice");
    let bob_token = register_user(&state, "bob");
    let carol_token = register_user(&state, "carol");
    register_user(&state, "dave");

    let group = store::create_group(&state.db, "friends", "alice").unwrap();
    for member in ["bob", "carol", "dave"] {
        store::add_group_member(&state.db, &group.id, member).unwrap();
    }

    let mut alice = connect_presence(addr, &state, "alice", &alice_token).await;
    let mut bob = connect_presence(addr, &state, "bob", &bob_token).await;
    let mut carol = connect_presence(addr, &state, "carol", &carol_token).await;

    let body: serde_json::Value = reqwest::Client::new()
        .post(format!("{}/groups/message/send", base_url))
        .bearer_auth(&alice_token)
        .json(&json!({"group_id": group.id, "content": "hey all"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    // dave is offline
    assert_eq!(body["delivered"], 2);

    for ws in [&mut bob, &mut carol] {
        let event = next_event(ws).await;
        assert_eq!(event["type"], "new_message");
        assert_eq!(event["data"]["group_id"], group.id.as_str());
        assert_eq!(event["data"]["content"], "hey all");
    }
    assert_no_event(&mut alice).await;
}

#[tokio::test]
async fn test_group_voice_message_event() {
    let (base_url, addr, state) = start_test_server().await;
    let alice_token = register_user(&state, "alice");
    let bob_token = register_user(&state, "bob");
    let group = store::create_group(&state.db, "band", "alice").unwrap();
    store::add_group_member(&state.db, &group.id, "bob").unwrap();
    let mut bob = connect_presence(addr, &state, "bob", &bob_token).await;

    let resp = reqwest::Client::new()
        .post(format!("{}/groups/message/send", base_url))
        .bearer_auth(&alice_token)
        .json(&json!({"group_id": group.id, "audio_file_id": "clip1"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let event = next_event(&mut bob).await;
    assert_eq!(event["type"], "new_group_voice_message");
    assert_eq!(event["data"]["audio_url"], "/files/clip1");
}

#[tokio::test]
async fn test_group_send_rejections() {
    let (base_url, _addr, state) = start_test_server().await;
    let alice_token = register_user(&state, "alice");
    let mallory_token = register_user(&state, "mallory");
    let group = store::create_group(&state.db, "private", "alice").unwrap();
    let client = reqwest::Client::new();
    let url = format!("{}/groups/message/send", base_url);

    let unknown = client
        .post(&url)
        .bearer_auth(&alice_token)
        .json(&json!({"group_id": "missing", "content": "x"}))
        .send()
        .await
        .unwrap();
    assert_eq!(unknown.status(), 404);

    let outsider = client
        .post(&url)
        .bearer_auth(&mallory_token)
        .json(&json!({"group_id": group.id, "content": "x"}))
        .send()
        .await
        .unwrap();
    assert_eq!(outsider.status(), 403);

    let empty = client
        .post(&url)
        .bearer_auth(&alice_token)
        .json(&json!({"group_id": group.id}))
        .send()
        .await
        .unwrap();
    assert_eq!(empty.status(), 400);

    let history = client
        .get(format!("{}/groups/{}/messages", base_url, group.id))
        .bearer_auth(&mallory_token)
        .send()
        .await
        .unwrap();
    assert_eq!(history.status(), 403);
}

#[tokio::test]
async fn test_group_create_join_and_history() {
    let (base_url, _addr, state) = start_test_server().await;
    let alice_token = register_user(&state, "alice");
    let bob_token = register_user(&state, "bob");
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/groups/create", base_url))
        .bearer_auth(&alice_token)
        .json(&json!({"name": "climbing"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let created: serde_json::Value = resp.json().await.unwrap();
    let group_id = created["group_id"].as_str().unwrap().to_string();

    let joined: serde_json::Value = client
        .post(format!("{}/groups/join", base_url))
        .bearer_auth(&bob_token)
        .json(&json!({"invite_key": created["invite_key"]}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(joined["group_id"], group_id.as_str());

    let bad_key = client
        .post(format!("{}/groups/join", base_url))
        .bearer_auth(&bob_token)
        .json(&json!({"invite_key": "nope"}))
        .send()
        .await
        .unwrap();
    assert_eq!(bad_key.status(), 404);

    for (token, text) in [(&alice_token, "first"), (&bob_token, "second")] {
        let resp = client
            .post(format!("{}/groups/message/send", base_url))
            .bearer_auth(token)
            .json(&json!({"group_id": group_id, "content": text}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
    }

    let history: Vec<serde_json::Value> = client
        .get(format!("{}/groups/{}/messages", base_url, group_id))
        .bearer_auth(&bob_token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let contents: Vec<_> = history.iter().map(|m| m["content"].as_str().unwrap()).collect();
    assert_eq!(contents, vec!["first", "second"]);
}

#[tokio::test]
async fn test_health_reports_load() {
    let (base_url, addr, state) = start_test_server().await;
    let token = register_user(&state, "alice");
    let _ws = connect_presence(addr, &state, "alice", &token).await;

    let body: serde_json::Value = reqwest::get(format!("{}/health", base_url))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["online_users"], 1);
    assert_eq!(body["active_calls"], 0);
}

#[tokio::test]
async fn test_register_login_then_connect() {
    let (base_url, addr, state) = start_test_server().await;
    let client = reqwest::Client::new();
    let alice_token = register_user(&state, "alice");

    let resp = client
        .post(format!("{}/register", base_url))
        .json(&json!({"username": "bob", "password": "correct horse"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);

    let resp = client
        .post(format!("{}/token", base_url))
        .json(&json!({"username": "bob", "password": "correct horse"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["token_type"], "bearer");
    let bob_token = body["access_token"].as_str().unwrap().to_string();

    let mut bob = connect_presence(addr, &state, "bob", &bob_token).await;

    let body: serde_json::Value = client
        .post(format!("{}/send", base_url))
        .bearer_auth(&alice_token)
        .json(&json!({"receiver": "bob", "content": "welcome"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["delivered"], true);

    let event = next_event(&mut bob).await;
    assert_eq!(event["data"]["content"], "welcome");
}

#[tokio::test]
async fn test_register_and_login_rejections() {
    let (base_url, _addr, _state) = start_test_server().await;
    let client = reqwest::Client::new();
    let register = format!("{}/register", base_url);
    let token = format!("{}/token", base_url);

    let first = client
        .post(&register)
        .json(&json!({"username": "carol", "password": "s3cret!"}))
        .send()
        .await
        .unwrap();
    assert_eq!(first.status(), 201);

    let duplicate = client
        .post(&register)
        .json(&json!({"username": "carol", "password": "other-pass"}))
        .send()
        .await
        .unwrap();
    assert_eq!(duplicate.status(), 400);

    let bad_name = client
        .post(&register)
        .json(&json!({"username": "no/slashes", "password": "s3cret!"}))
        .send()
        .await
        .unwrap();
    assert_eq!(bad_name.status(), 400);

    let wrong_password = client
        .post(&token)
        .json(&json!({"username": "carol", "password": "guess"}))
        .send()
        .await
        .unwrap();
    assert_eq!(wrong_password.status(), 401);

    let unknown_user = client
        .post(&token)
        .json(&json!({"username": "nobody", "password": "s3cret!"}))
        .send()
        .await
        .unwrap();
    assert_eq!(unknown_user.status(), 401);
}

#[tokio::test]
async fn test_token_for_missing_account_is_rejected() {
    let (base_url, _addr, state) = start_test_server().await;
    register_user(&state, "bob");
    let ghost_token = issue_access_token(&state.jwt_secret, "ghost", ACCESS_TOKEN_TTL_SECS).unwrap();
    let client = reqwest::Client::new();

    let send = client
        .post(format!("{}/send", base_url))
        .bearer_auth(&ghost_token)
        .json(&json!({"receiver": "bob", "content": "boo"}))
        .send()
        .await
        .unwrap();
    assert_eq!(send.status(), 401);

    let create = client
        .post(format!("{}/groups/create", base_url))
        .bearer_auth(&ghost_token)
        .json(&json!({"name": "haunt"}))
        .send()
        .await
        .unwrap();
    assert_eq!(create.status(), 401);

    assert!(store::messages_for_user(&state.db, "bob").unwrap().is_empty());
}

#[tokio::test]
async fn test_group_list_shows_memberships() {
    let (base_url, _addr, state) = start_test_server().await;
    let alice_token = register_user(&state, "alice");
    let bob_token = register_user(&state, "bob");
    let carol_token = register_user(&state, "carol");
    let shared = store::create_group(&state.db, "shared", "alice").unwrap();
    store::add_group_member(&state.db, &shared.id, "bob").unwrap();
    store::create_group(&state.db, "solo", "alice").unwrap();
    let client = reqwest::Client::new();
    let url = format!("{}/groups/list", base_url);

    let alice_groups: Vec<serde_json::Value> = client
        .get(&url)
        .bearer_auth(&alice_token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(alice_groups.len(), 2);

    let bob_groups: Vec<serde_json::Value> = client
        .get(&url)
        .bearer_auth(&bob_token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(bob_groups.len(), 1);
    assert_eq!(bob_groups[0]["id"], shared.id.as_str());
    assert_eq!(bob_groups[0]["name"], "shared");
    assert_eq!(bob_groups[0]["admin"], "alice");
    assert_eq!(bob_groups[0]["members"], json!(["alice", "bob"]));

    let carol_groups: Vec<serde_json::Value> = client
        .get(&url)
        .bearer_auth(&carol_token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(carol_groups.is_empty());
}

#[tokio::test]
async fn test_group_delete_is_admin_only() {
    let (base_url, _addr, state) = start_test_server().await;
    let alice_token = register_user(&state, "alice");
    let bob_token = register_user(&state, "bob");
    let group = store::create_group(&state.db, "temp", "alice").unwrap();
    store::add_group_member(&state.db, &group.id, "bob").unwrap();
    store::insert_group_message(&state.db, &group.id, "bob", Some("hi"), None).unwrap();
    let client = reqwest::Client::new();
    let url = format!("{}/groups/{}", base_url, group.id);

    let by_member = client.delete(&url).bearer_auth(&bob_token).send().await.unwrap();
    assert_eq!(by_member.status(), 403);
    assert!(store::group_exists(&state.db, &group.id).unwrap());

    let by_admin = client.delete(&url).bearer_auth(&alice_token).send().await.unwrap();
    assert_eq!(by_admin.status(), 200);
    assert!(!store::group_exists(&state.db, &group.id).unwrap());
    assert!(store::group_members(&state.db, &group.id).unwrap().is_empty());

    let history = client
        .get(format!("{}/groups/{}/messages", base_url, group.id))
        .bearer_auth(&bob_token)
        .send()
        .await
        .unwrap();
    assert_eq!(history.status(), 404);

    let again = client.delete(&url).bearer_auth(&alice_token).send().await.unwrap();
    assert_eq!(again.status(), 404);
}
