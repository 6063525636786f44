//! Conversations endpoints

use crate::TASK_SENDER;
use crate::api::ExtractSession;
use crate::api::conversations::schemas::{ConversationList, CreateConversation, CreateMessage};
use crate::api::error::ApiError;
use crate::core::assistant::{ChatMessage, CompletionTask};
use crate::core::openai::OpenAiClient;
use crate::core::traits::ConversationService;
use crate::infrastructure::entities::ContentKind;
use async_stream::stream;
use axum::extract::Path;
use axum::http::StatusCode;
use axum::response::Sse;
use axum::response::sse::{Event, KeepAlive};
use axum::routing::{delete, get};
use axum::{Json, Router};
use di::Ref;
use di_axum::Inject;
use futures_util::Stream;
use log::{error, info};
use std::time::Duration;
use uuid::Uuid;

/// Placeholder shown until the first exchange produces a generated title.
pub const DEFAULT_TITLE: &str = "New conversation";

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_conversations).post(new_conversation))
        .route("/:id", delete(delete_conversation))
        .route(
            "/:id/messages",
            get(conversation_messages).post(post_message),
        )
}

async fn list_conversations(
    Inject(conversation_service): Inject<dyn ConversationService>,
    ExtractSession(_session): ExtractSession,
) -> (StatusCode, Json<ConversationList>) {
    let conversations = conversation_service.list_conversations().await;

    (
        StatusCode::OK,
        ConversationList {
            conversations: conversations
                .into_iter()
                .map(schemas::Conversation::from)
                .collect(),
        }
        .into(),
    )
}

async fn new_conversation(
    Inject(conversation_service): Inject<dyn ConversationService>,
    Inject(openai): Inject<OpenAiClient>,
    ExtractSession(_session): ExtractSession,
    Json(create_conversation): Json<CreateConversation>,
) -> Result<Sse<impl Stream<Item = Result<Event, &'static str>>>, ApiError> {
    let conversation = conversation_service
        .create_conversation(DEFAULT_TITLE.to_owned())
        .await;

    save_message_and_generate_response(
        conversation_service,
        openai,
        conversation.id,
        create_conversation.message,
    )
    .await
}

async fn delete_conversation(
    Inject(conversation_service): Inject<dyn ConversationService>,
    ExtractSession(_session): ExtractSession,
    Path(conversation_id): Path<Uuid>,
) -> StatusCode {
    match conversation_service.delete_conversation(conversation_id).await {
        Ok(()) => {
            info!("conversation {conversation_id} deleted");
            StatusCode::NO_CONTENT
        }
        Err(()) => StatusCode::NOT_FOUND,
    }
}

async fn conversation_messages(
    Inject(conversation_service): Inject<dyn ConversationService>,
    Path(conversation_id): Path<Uuid>,
    ExtractSession(_session): ExtractSession,
) -> (StatusCode, Json<schemas::MessagesList>) {
    let messages = conversation_service.list_messages(conversation_id).await;

    if let Ok(messages) = messages {
        (
            StatusCode::OK,
            Json(schemas::MessagesList {
                messages: messages.into_iter().map(schemas::Message::from).collect(),
            }),
        )
    } else {
        (
            StatusCode::BAD_REQUEST,
            Json(schemas::MessagesList::default()),
        )
    }
}

async fn post_message(
    Inject(conversation_service): Inject<dyn ConversationService>,
    Inject(openai): Inject<OpenAiClient>,
    ExtractSession(_session): ExtractSession,
    Path(conversation_id): Path<Uuid>,
    Json(message): Json<schemas::CreateMessage>,
) -> Result<Sse<impl Stream<Item = Result<Event, &'static str>>>, ApiError> {
    save_message_and_generate_response(conversation_service, openai, conversation_id, message.text)
        .await
}

async fn save_message_and_generate_response(
    conversation_service: Ref<dyn ConversationService>,
    openai: Ref<OpenAiClient>,
    conversation_id: Uuid,
    message: String,
) -> Result<Sse<impl Stream<Item = Result<Event, &'static str>> + Sized>, ApiError> {
    let user_prompt = message.clone();

    let message = conversation_service
        .create_user_message(conversation_id, message)
        .await
        .map_err(|()| ApiError::NotFound("conversation does not exist".to_owned()))?;

    let message_id = Uuid::new_v4();
    let conversation_id = message.conversation_id;

    let conversation_messages = conversation_service
        .list_messages(conversation_id)
        .await?;

    // Image messages carry a URL, not prose; they are left out of the
    // relayed history.
    let chat_messages: Vec<ChatMessage> = conversation_messages
        .into_iter()
        .filter(|m| m.content_kind == ContentKind::Text)
        .map(ChatMessage::from)
        .collect();

    // System prompt + the message stored above and nothing else: this is the
    // conversation's first exchange, worth a generated title afterwards.
    let needs_title = chat_messages.len() <= 2;

    let (task, mut receiver) = CompletionTask::new(chat_messages);

    let task_sender = TASK_SENDER.get().expect("TASK_SENDER should be set");

    task_sender
        .send(task)
        .await
        .map_err(|_| ApiError::Internal)?;

    let stream = stream! {
        yield Ok(Event::default().event("new_message").json_data(schemas::Message::from(message)).unwrap());

        let mut assistant_message = String::new();

        while let Some(message_part) = receiver.recv().await {
            assistant_message.push_str(&message_part);
            yield Ok(Event::default().event("message_part").retry(Duration::from_millis(100)).json_data(schemas::MessagePart {
                conversation_id,
                message_id,
                message_part
            }).expect("message part should serialize"));
        }

        conversation_service
            .create_bot_message_with_id(conversation_id, assistant_message.clone(), message_id)
            .await.expect("failed to save assistant message! this is bad");

        if needs_title {
            match openai.generate_title(&user_prompt, &assistant_message).await {
                Ok(title) if !title.is_empty() => {
                    if conversation_service.rename_conversation(conversation_id, &title).await.is_ok() {
                        yield Ok(Event::default().event("title").json_data(schemas::TitleUpdate {
                            conversation_id,
                            title
                        }).expect("title update should serialize"));
                    }
                }
                Ok(_) => {}
                Err(e) => error!("title generation failed: {e}"),
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

pub mod schemas {
    use crate::infrastructure::entities;
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Serialize};
    use uuid::Uuid;

    #[derive(Deserialize, Debug)]
    pub struct CreateConversation {
        pub message: String,
    }

    #[derive(Serialize, Debug)]
    pub struct Conversation {
        pub id: Uuid,
        pub created_at: DateTime<Utc>,
        pub title: String,
    }

    impl From<entities::Conversation> for Conversation {
        fn from(conversation: entities::Conversation) -> Self {
            Conversation {
                id: conversation.id,
                created_at: conversation.created_at,
                title: conversation.title,
            }
        }
    }

    #[derive(Serialize, Debug)]
    pub struct ConversationList {
        pub conversations: Vec<Conversation>,
    }

    #[derive(Serialize, Debug, Default)]
    pub struct MessagesList {
        pub messages: Vec<Message>,
    }

    #[derive(Serialize, Debug)]
    pub enum MessageKind {
        System,
        Bot,
        User,
    }

    impl From<entities::MessageKind> for MessageKind {
        fn from(kind: entities::MessageKind) -> Self {
            match kind {
                entities::MessageKind::System => MessageKind::System,
                entities::MessageKind::Bot => MessageKind::Bot,
                entities::MessageKind::User => MessageKind::User,
            }
        }
    }

    #[derive(Serialize, Debug)]
    pub enum ContentKind {
        Text,
        ImageUrl,
    }

    impl From<entities::ContentKind> for ContentKind {
        fn from(kind: entities::ContentKind) -> Self {
            match kind {
                entities::ContentKind::Text => ContentKind::Text,
                entities::ContentKind::ImageUrl => ContentKind::ImageUrl,
            }
        }
    }

    #[derive(Serialize, Debug)]
    pub struct Message {
        pub conversation_id: Uuid,
        pub id: Uuid,
        pub kind: MessageKind,
        pub content_kind: ContentKind,
        pub content: String,
        pub created_at: DateTime<Utc>,
    }

    impl From<entities::Message> for Message {
        fn from(message: entities::Message) -> Self {
            Message {
                conversation_id: message.conversation_id,
                id: message.id,
                kind: message.kind.into(),
                content_kind: message.content_kind.into(),
                content: message.content,
                created_at: message.created_at,
            }
        }
    }

    #[derive(Deserialize, Debug)]
    pub struct CreateMessage {
        pub text: String,
    }

    #[derive(Serialize, Debug)]
    pub struct MessagePart {
        pub conversation_id: Uuid,
        pub message_id: Uuid,
        pub message_part: String,
    }

    #[derive(Serialize, Debug)]
    pub struct TitleUpdate {
        pub conversation_id: Uuid,
        pub title: String,
    }
}
