//! Image generation endpoints

use crate::api::ExtractSession;
use crate::api::conversations::schemas;
use crate::api::error::ApiError;
use crate::core::openai::OpenAiClient;
use crate::core::traits::ConversationService;
use axum::routing::post;
use axum::{Json, Router};
use di_axum::Inject;
use log::info;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const DEFAULT_SIZE: &str = "1024x1024";

pub fn router() -> Router {
    Router::new().route("/generations", post(generate_image))
}

#[derive(Deserialize, Debug)]
pub struct CreateImage {
    pub prompt: String,
    #[serde(default)]
    pub size: Option<String>,
    /// Conversation to append to; a fresh one is created when absent.
    #[serde(default)]
    pub conversation: Option<Uuid>,
}

#[derive(Serialize, Debug)]
pub struct ImageOutcome {
    pub conversation_id: Uuid,
    pub messages: Vec<schemas::Message>,
}

async fn generate_image(
    Inject(conversation_service): Inject<dyn ConversationService>,
    Inject(openai): Inject<OpenAiClient>,
    ExtractSession(_session): ExtractSession,
    Json(request): Json<CreateImage>,
) -> Result<Json<ImageOutcome>, ApiError> {
    if request.prompt.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "please describe the image".to_owned(),
        ));
    }

    let conversation_id = match request.conversation {
        Some(id) => id,
        None => {
            conversation_service
                .create_bare_conversation(image_title(&request.prompt))
                .await
                .id
        }
    };

    let user_message = conversation_service
        .create_user_message(
            conversation_id,
            format!("Generate image: {}", request.prompt),
        )
        .await
        .map_err(|()| ApiError::NotFound("conversation does not exist".to_owned()))?;

    let size = request.size.as_deref().unwrap_or(DEFAULT_SIZE);
    let url = openai.generate_image(&request.prompt, size).await?;

    let image_message = conversation_service
        .create_image_message(conversation_id, url)
        .await?;

    info!("image generated for conversation {conversation_id}");

    Ok(Json(ImageOutcome {
        conversation_id,
        messages: vec![user_message.into(), image_message.into()],
    }))
}

fn image_title(prompt: &str) -> String {
    let prefix: String = prompt.chars().take(20).collect();
    format!("Image: {prefix}...")
}
