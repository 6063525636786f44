//! API Integration Tests
//!
//! Tests the HTTP API endpoints with a real database.
//! The streaming chat flow is exercised against a stubbed relay task feeding
//! the process-global TASK_SENDER channel, so no network access is needed.
//!
//! Tests are serialized because they share a global test pool, the session
//! registry, and the relay channel.
//!
//! Note: The `more-di` DI framework doesn't support injecting custom pools.
//! We work around this by using `DatabaseConnection::set_test_pool()` to set
//! a global pool that the DI-created DatabaseConnection will use.

use axum::{
    body::Body,
    http::{Request, StatusCode, header},
};
use chrono::Utc;
use di::{Injectable, ServiceCollection};
use di_axum::RouterServiceProviderExtensions;
use serde_json::Value;
use serial_test::serial;
use sqlx::SqlitePool;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::mpsc;
use tokio_personal_chat_api::{
    TASK_SENDER, api, core::assistant::CompletionTask, core::openai::OpenAiClient,
    core::services::MyConversationService, infrastructure::database::DatabaseConnection,
    infrastructure::repositories::DbConversationRepository,
};
use tower::ServiceExt;
use uuid::Uuid;

/// Counter for unique test database URIs
static TEST_DB_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Setup test database with migrations and returns pool
/// Uses in-memory SQLite for test isolation
async fn setup_test_db() -> SqlitePool {
    let db_num = TEST_DB_COUNTER.fetch_add(1, Ordering::SeqCst);
    // Use file URI format with shared cache - each test gets a unique DB
    let db_url = format!("sqlite:file:testdb{}?mode=memory&cache=shared", db_num);

    let pool = SqlitePool::connect(&db_url).await.unwrap();
    sqlx::migrate!().run(&pool).await.unwrap();

    // Set this pool as the global test pool so DI uses it
    DatabaseConnection::set_test_pool(pool.clone());

    pool
}

/// Clean up after test
fn cleanup_test_db() {
    DatabaseConnection::clear_test_pool();
}

/// Point the OpenAI client at an unroutable endpoint so that any call it
/// makes (title generation, for instance) fails fast instead of reaching
/// the network.
fn set_test_env() {
    // SAFETY: all tests in this file run serially and nothing else reads
    // these variables concurrently.
    unsafe {
        std::env::set_var("OPENAI_API_KEY", "test-key");
        std::env::set_var("OPENAI_BASE_URL", "http://127.0.0.1:9");
    }
}

/// Installs a relay stub on the global TASK_SENDER channel that answers
/// every completion task with a fixed two-part reply.
async fn install_stub_relay() {
    TASK_SENDER
        .get_or_init(|| async {
            let (sender, mut receiver) = mpsc::channel::<CompletionTask>(10);
            // Run the relay on a dedicated thread with its own runtime. Each
            // `#[tokio::test]` spins up (and tears down) its own current-thread
            // runtime, so a `tokio::spawn`ed relay would be killed when the
            // first test that installed it finishes, breaking every later
            // streaming test. A standalone runtime outlives the test runtimes.
            std::thread::spawn(move || {
                let rt = tokio::runtime::Builder::new_current_thread()
                    .build()
                    .unwrap();
                rt.block_on(async move {
                    while let Some(task) = receiver.recv().await {
                        task.send_part("Hello".to_string()).await.unwrap();
                        task.send_part(" world".to_string()).await.unwrap();
                    }
                });
            });
            sender
        })
        .await;
}

/// Create test app - uses the global test pool set by setup_test_db()
fn create_test_app() -> axum::Router {
    let provider = ServiceCollection::new()
        .add(DatabaseConnection::transient())
        .add(DbConversationRepository::scoped())
        .add(MyConversationService::scoped())
        .add(OpenAiClient::singleton())
        .build_provider()
        .unwrap();

    axum::Router::new()
        .nest("/auth", api::auth::router())
        .nest("/conversations", api::conversations::router())
        .nest("/images", api::images::router())
        .nest("/audio", api::audio::router())
        .with_provider(provider)
}

/// Opens a session directly in the registry and returns the cookie header
/// value for it.
fn auth_cookie() -> String {
    format!("session_id={}", api::auth::open_session())
}

async fn insert_conversation(pool: &SqlitePool, conversation_id: Uuid, title: &str) {
    sqlx::query("INSERT INTO conversations (id, title, created_at) VALUES (?, ?, ?)")
        .bind(conversation_id)
        .bind(title)
        .bind(Utc::now())
        .execute(pool)
        .await
        .unwrap();
}

#[tokio::test]
#[serial]
async fn test_list_conversations_empty() {
    let _pool = setup_test_db().await;

    let app = create_test_app();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/conversations")
                .header(header::COOKIE, auth_cookie())
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: Value = serde_json::from_slice(&body).unwrap();

    assert_eq!(json["conversations"].as_array().unwrap().len(), 0);

    cleanup_test_db();
}

#[tokio::test]
#[serial]
async fn test_list_conversations_requires_auth() {
    let _pool = setup_test_db().await;

    let app = create_test_app();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/conversations")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    // Should fail without a session cookie
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    cleanup_test_db();
}

#[tokio::test]
#[serial]
async fn test_login_sets_session_cookie() {
    let _pool = setup_test_db().await;

    let app = create_test_app();

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/auth/login")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    r#"{"username": "admin", "password": "changeme"}"#,
                ))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .expect("login should set a cookie")
        .to_str()
        .unwrap();
    assert!(cookie.starts_with("session_id="));

    // The minted session authorizes API calls
    let session_pair = cookie.split(';').next().unwrap().to_string();
    let app = create_test_app();
    let response = app
        .oneshot(
            Request::builder()
                .uri("/conversations")
                .header(header::COOKIE, session_pair)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    cleanup_test_db();
}

#[tokio::test]
#[serial]
async fn test_login_rejects_bad_credentials() {
    let _pool = setup_test_db().await;

    let app = create_test_app();

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/auth/login")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"username": "admin", "password": "wrong"}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(response.headers().get(header::SET_COOKIE).is_none());

    cleanup_test_db();
}

#[tokio::test]
#[serial]
async fn test_logout_invalidates_session() {
    let _pool = setup_test_db().await;

    let cookie = auth_cookie();

    let app = create_test_app();
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/auth/logout")
                .header(header::COOKIE, cookie.clone())
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    // The session no longer authorizes API calls
    let app = create_test_app();
    let response = app
        .oneshot(
            Request::builder()
                .uri("/conversations")
                .header(header::COOKIE, cookie)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    cleanup_test_db();
}

#[tokio::test]
#[serial]
async fn test_get_messages_nonexistent_conversation() {
    let _pool = setup_test_db().await;

    let app = create_test_app();

    let fake_conversation_id = Uuid::new_v4();

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/conversations/{}/messages", fake_conversation_id))
                .header(header::COOKIE, auth_cookie())
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    // API returns 200 OK with empty messages for non-existent conversation
    // (The query just returns no rows, not an error)
    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["messages"].as_array().unwrap().len(), 0);

    cleanup_test_db();
}

#[tokio::test]
#[serial]
async fn test_get_messages_success() {
    let pool = setup_test_db().await;

    let conversation_id = Uuid::new_v4();
    let message_id = Uuid::new_v4();

    insert_conversation(&pool, conversation_id, "Greetings").await;

    // Create a message - bind Uuid directly to match production code
    sqlx::query(
        "INSERT INTO messages (id, conversation_id, kind, content_kind, created_at, content) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(message_id)
    .bind(conversation_id)
    .bind(3) // User message
    .bind(1) // Text content
    .bind(Utc::now())
    .bind("Hello!")
    .execute(&pool)
    .await
    .unwrap();

    let app = create_test_app();

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/conversations/{}/messages", conversation_id))
                .header(header::COOKIE, auth_cookie())
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: Value = serde_json::from_slice(&body).unwrap();

    let messages = json["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["content"], "Hello!");
    assert_eq!(messages[0]["kind"], "User");
    assert_eq!(messages[0]["content_kind"], "Text");

    cleanup_test_db();
}

#[tokio::test]
#[serial]
async fn test_list_conversations_with_data() {
    let pool = setup_test_db().await;

    let conversation_id = Uuid::new_v4();
    insert_conversation(&pool, conversation_id, "One conversation").await;

    let app = create_test_app();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/conversations")
                .header(header::COOKIE, auth_cookie())
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: Value = serde_json::from_slice(&body).unwrap();

    let conversations = json["conversations"].as_array().unwrap();
    assert_eq!(conversations.len(), 1);
    assert_eq!(conversations[0]["id"], conversation_id.to_string());
    assert_eq!(conversations[0]["title"], "One conversation");

    cleanup_test_db();
}

#[tokio::test]
#[serial]
async fn test_delete_conversation_removes_messages() {
    let pool = setup_test_db().await;

    let conversation_id = Uuid::new_v4();
    insert_conversation(&pool, conversation_id, "Doomed").await;

    sqlx::query(
        "INSERT INTO messages (id, conversation_id, kind, content_kind, created_at, content) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(Uuid::new_v4())
    .bind(conversation_id)
    .bind(3)
    .bind(1)
    .bind(Utc::now())
    .bind("Test")
    .execute(&pool)
    .await
    .unwrap();

    let app = create_test_app();

    let response = app
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/conversations/{}", conversation_id))
                .header(header::COOKIE, auth_cookie())
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let conversations: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM conversations")
        .fetch_one(&pool)
        .await
        .unwrap();
    let messages: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM messages")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(conversations.0, 0);
    assert_eq!(messages.0, 0);

    cleanup_test_db();
}

#[tokio::test]
#[serial]
async fn test_delete_unknown_conversation() {
    let _pool = setup_test_db().await;

    let app = create_test_app();

    let response = app
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/conversations/{}", Uuid::new_v4()))
                .header(header::COOKIE, auth_cookie())
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    cleanup_test_db();
}

#[tokio::test]
#[serial]
async fn test_chat_flow_persists_messages() {
    let pool = setup_test_db().await;
    set_test_env();
    install_stub_relay().await;

    let app = create_test_app();

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/conversations")
                .header(header::COOKIE, auth_cookie())
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"message": "Hi there"}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    // Drain the SSE body; the stream ends once the relay stub hangs up and
    // the assistant message is stored.
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = String::from_utf8(body.to_vec()).unwrap();
    assert!(body.contains("event: new_message"));
    assert!(body.contains("event: message_part"));
    assert!(body.contains("Hello"));

    // The conversation holds system + user + assistant messages
    let conversation: (Uuid,) = sqlx::query_as("SELECT id FROM conversations")
        .fetch_one(&pool)
        .await
        .unwrap();

    let messages: Vec<(i64, String)> = sqlx::query_as(
        "SELECT kind, content FROM messages WHERE conversation_id = ? ORDER BY created_at ASC",
    )
    .bind(conversation.0)
    .fetch_all(&pool)
    .await
    .unwrap();

    assert_eq!(messages.len(), 3);
    assert_eq!(messages[0].0, 1); // system prompt
    assert_eq!(messages[1], (3, "Hi there".to_string()));
    assert_eq!(messages[2], (2, "Hello world".to_string()));

    cleanup_test_db();
}

#[tokio::test]
#[serial]
async fn test_image_generation_rejects_empty_prompt() {
    let _pool = setup_test_db().await;
    set_test_env();

    let app = create_test_app();

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/images/generations")
                .header(header::COOKIE, auth_cookie())
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"prompt": "   "}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    cleanup_test_db();
}

#[tokio::test]
#[serial]
async fn test_image_generation_upstream_failure_keeps_user_message() {
    let pool = setup_test_db().await;
    set_test_env();

    let app = create_test_app();

    // The OpenAI endpoint is unroutable in tests, so generation fails after
    // the conversation and the user message were stored.
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/images/generations")
                .header(header::COOKIE, auth_cookie())
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"prompt": "a red cat"}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

    let conversation: (Uuid, String) = sqlx::query_as("SELECT id, title FROM conversations")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(conversation.1, "Image: a red cat...");

    let messages: Vec<(i64, String)> =
        sqlx::query_as("SELECT kind, content FROM messages WHERE conversation_id = ?")
            .bind(conversation.0)
            .fetch_all(&pool)
            .await
            .unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0], (3, "Generate image: a red cat".to_string()));

    cleanup_test_db();
}

#[tokio::test]
#[serial]
async fn test_audio_upload_requires_a_file() {
    let _pool = setup_test_db().await;
    set_test_env();

    let app = create_test_app();

    // Well-formed multipart body with no fields at all
    let boundary = "test-boundary";
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/audio/transcriptions")
                .header(header::COOKIE, auth_cookie())
                .header(
                    header::CONTENT_TYPE,
                    format!("multipart/form-data; boundary={boundary}"),
                )
                .body(Body::from(format!("--{boundary}--\r\n")))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["error"], "no audio file uploaded");

    cleanup_test_db();
}

#[tokio::test]
#[serial]
async fn test_audio_upload_rejects_non_audio_files() {
    let _pool = setup_test_db().await;
    set_test_env();

    let app = create_test_app();

    let boundary = "test-boundary";
    let body = format!(
        "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"notes.txt\"\r\nContent-Type: text/plain\r\n\r\nhello\r\n--{boundary}--\r\n"
    );
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/audio/transcriptions")
                .header(header::COOKIE, auth_cookie())
                .header(
                    header::CONTENT_TYPE,
                    format!("multipart/form-data; boundary={boundary}"),
                )
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    cleanup_test_db();
}

#[tokio::test]
#[serial]
async fn test_chat_flow_follow_up_message() {
    let pool = setup_test_db().await;
    set_test_env();
    install_stub_relay().await;

    let conversation_id = Uuid::new_v4();
    insert_conversation(&pool, conversation_id, "Ongoing").await;

    let app = create_test_app();

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/conversations/{}/messages", conversation_id))
                .header(header::COOKIE, auth_cookie())
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"text": "And another thing"}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let _ = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();

    let messages: Vec<(i64, String)> = sqlx::query_as(
        "SELECT kind, content FROM messages WHERE conversation_id = ? ORDER BY created_at ASC",
    )
    .bind(conversation_id)
    .fetch_all(&pool)
    .await
    .unwrap();

    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0], (3, "And another thing".to_string()));
    assert_eq!(messages[1], (2, "Hello world".to_string()));

    cleanup_test_db();
}
