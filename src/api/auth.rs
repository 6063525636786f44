//! Login gate endpoints and the in-process session registry.
//!
//! A single hardcoded credential pair (overridable through the environment)
//! guards the whole API; a successful login mints a session id that lives in
//! an HttpOnly cookie until logout or process exit.

use crate::api::error::ApiError;
use crate::api::{ExtractSession, SESSION_COOKIE};
use axum::http::header::SET_COOKIE;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use log::{info, warn};
use serde::Deserialize;
use std::collections::HashSet;
use std::env;
use std::sync::{LazyLock, RwLock};
use uuid::Uuid;

static SESSIONS: LazyLock<RwLock<HashSet<Uuid>>> = LazyLock::new(|| RwLock::new(HashSet::new()));

pub fn session_is_active(session_id: Uuid) -> bool {
    SESSIONS
        .read()
        .expect("session lock poisoned")
        .contains(&session_id)
}

pub fn open_session() -> Uuid {
    let session_id = Uuid::new_v4();
    SESSIONS
        .write()
        .expect("session lock poisoned")
        .insert(session_id);
    session_id
}

pub fn close_session(session_id: Uuid) {
    SESSIONS
        .write()
        .expect("session lock poisoned")
        .remove(&session_id);
}

pub fn router() -> Router {
    Router::new()
        .route("/login", post(login))
        .route("/logout", post(logout))
}

#[derive(Deserialize, Debug)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

async fn login(Json(credentials): Json<LoginRequest>) -> Result<(StatusCode, HeaderMap), ApiError> {
    dotenvy::dotenv().ok();
    let username = env::var("CHAT_USERNAME").unwrap_or_else(|_| "admin".to_owned());
    let password = env::var("CHAT_PASSWORD").unwrap_or_else(|_| "changeme".to_owned());

    if credentials.username != username || credentials.password != password {
        warn!("rejected login for {:?}", credentials.username);
        return Err(ApiError::Unauthorized("invalid credentials"));
    }

    let session_id = open_session();
    info!("session {session_id} opened");

    let mut headers = HeaderMap::new();
    headers.insert(
        SET_COOKIE,
        format!("{SESSION_COOKIE}={session_id}; HttpOnly; Path=/; SameSite=Lax")
            .parse()
            .expect("session cookie should be a valid header value"),
    );

    Ok((StatusCode::NO_CONTENT, headers))
}

async fn logout(ExtractSession(session_id): ExtractSession) -> (StatusCode, HeaderMap) {
    close_session(session_id);
    info!("session {session_id} closed");

    let mut headers = HeaderMap::new();
    headers.insert(
        SET_COOKIE,
        format!("{SESSION_COOKIE}=; Max-Age=0; HttpOnly; Path=/")
            .parse()
            .expect("session cookie should be a valid header value"),
    );

    (StatusCode::NO_CONTENT, headers)
}
