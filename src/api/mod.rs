use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::StatusCode;
use axum::http::request::Parts;
use std::str::FromStr;
use uuid::Uuid;

pub mod audio;
pub mod auth;
pub mod conversations;
pub mod error;
pub mod images;

const SESSION_COOKIE: &str = "session_id";

/// Extracts and validates the login session from the request cookies.
#[derive(Debug)]
pub struct ExtractSession(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for ExtractSession
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> Result<Self, (StatusCode, &'static str)> {
        let Some(cookies) = parts.headers.get(axum::http::header::COOKIE) else {
            return Err((StatusCode::UNAUTHORIZED, "`session_id` cookie is missing"));
        };

        let cookies = cookies
            .to_str()
            .map_err(|_| (StatusCode::UNAUTHORIZED, "invalid cookie header"))?;

        let token = cookies
            .split(';')
            .find_map(|pair| {
                let (name, value) = pair.trim().split_once('=')?;
                (name == SESSION_COOKIE).then_some(value)
            })
            .ok_or((StatusCode::UNAUTHORIZED, "`session_id` cookie is missing"))?;

        let session_id = Uuid::from_str(token)
            .map_err(|_| (StatusCode::UNAUTHORIZED, "invalid session id"))?;

        if auth::session_is_active(session_id) {
            Ok(ExtractSession(session_id))
        } else {
            Err((StatusCode::UNAUTHORIZED, "unknown or expired session"))
        }
    }
}
