//! Audio transcription endpoints
//!
//! Accepts an audio file via multipart/form-data, relays it to the
//! speech-to-text endpoint, then asks the chat model to respond to the
//! transcript. Both turns are persisted like an ordinary exchange.

use crate::api::ExtractSession;
use crate::api::error::ApiError;
use crate::core::openai::{ChatCompletionMessage, OpenAiClient};
use crate::core::traits::ConversationService;
use axum::extract::{DefaultBodyLimit, Multipart};
use axum::routing::post;
use axum::{Json, Router};
use di_axum::Inject;
use log::{debug, info};
use serde::Serialize;
use std::str::FromStr;
use uuid::Uuid;

const MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

const ALLOWED_MIME_TYPES: &[&str] = &[
    "audio/mpeg",  // MP3
    "audio/mp3",   // MP3 (alternative)
    "audio/wav",   // WAV
    "audio/wave",  // WAV (alternative)
    "audio/x-wav", // WAV (alternative)
    "audio/mp4",   // M4A
    "audio/x-m4a", // M4A (alternative)
    "audio/ogg",   // OGG
];

pub fn router() -> Router {
    Router::new()
        .route("/transcriptions", post(transcribe_upload))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES + 64 * 1024))
}

#[derive(Serialize, Debug)]
pub struct TranscriptionOutcome {
    pub conversation_id: Uuid,
    pub transcription: String,
    pub reply: String,
}

async fn transcribe_upload(
    Inject(conversation_service): Inject<dyn ConversationService>,
    Inject(openai): Inject<OpenAiClient>,
    ExtractSession(_session): ExtractSession,
    mut multipart: Multipart,
) -> Result<Json<TranscriptionOutcome>, ApiError> {
    let mut file_bytes: Vec<u8> = Vec::new();
    let mut file_name = String::new();
    let mut conversation: Option<Uuid> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("failed to read multipart field: {e}")))?
    {
        let field_name = field.name().unwrap_or("unknown").to_string();

        match field_name.as_str() {
            "file" => {
                file_name = field.file_name().unwrap_or("upload").to_string();

                let content_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();

                if !content_type.starts_with("audio/") {
                    return Err(ApiError::BadRequest(format!(
                        "invalid file type: {content_type}. Only audio files are allowed."
                    )));
                }

                if !ALLOWED_MIME_TYPES.contains(&content_type.as_str()) {
                    return Err(ApiError::BadRequest(format!(
                        "unsupported audio format: {content_type}. Supported formats: MP3, WAV, M4A, OGG"
                    )));
                }

                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("failed to read file: {e}")))?;

                if data.len() > MAX_UPLOAD_BYTES {
                    return Err(ApiError::BadRequest(format!(
                        "file too large: {} bytes exceeds maximum of {} bytes",
                        data.len(),
                        MAX_UPLOAD_BYTES
                    )));
                }

                file_bytes = data.to_vec();
            }
            "conversation" => {
                let raw = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("failed to read field: {e}")))?;
                conversation = Some(
                    Uuid::from_str(&raw)
                        .map_err(|_| ApiError::BadRequest("invalid conversation id".to_owned()))?,
                );
            }
            other => {
                return Err(ApiError::BadRequest(format!("unknown field: {other}")));
            }
        }
    }

    if file_bytes.is_empty() {
        return Err(ApiError::BadRequest("no audio file uploaded".to_owned()));
    }

    debug!(
        "received audio upload {file_name} ({} bytes)",
        file_bytes.len()
    );

    let conversation_id = match conversation {
        Some(id) => id,
        None => {
            conversation_service
                .create_bare_conversation(format!("Audio: {file_name}"))
                .await
                .id
        }
    };

    let transcription = openai.transcribe(file_name, file_bytes).await?;

    conversation_service
        .create_user_message(conversation_id, format!("(Audio): {transcription}"))
        .await
        .map_err(|()| ApiError::NotFound("conversation does not exist".to_owned()))?;

    // The transcript alone is sent for the answer, not the conversation
    // history.
    let reply = openai
        .chat(vec![ChatCompletionMessage::user(transcription.clone())])
        .await?;

    conversation_service
        .create_bot_message(conversation_id, reply.clone())
        .await?;

    info!("audio processed for conversation {conversation_id}");

    Ok(Json(TranscriptionOutcome {
        conversation_id,
        transcription,
        reply,
    }))
}
