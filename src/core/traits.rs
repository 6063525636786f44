//! DI "Interfaces"

use crate::infrastructure::entities;
use crate::infrastructure::entities::{ContentKind, MessageKind};
use async_trait::async_trait;
use uuid::Uuid;

#[async_trait]
pub trait ConversationService: Send + Sync {
    /// Lists all conversations, newest first.
    async fn list_conversations(&self) -> Vec<entities::Conversation>;

    /// Creates a new conversation with the given title, seeded with the
    /// assistant system prompt.
    async fn create_conversation(&self, title: String) -> entities::Conversation;

    /// Creates a new conversation with the given title and no seed messages.
    ///
    /// Used by the image and audio flows, whose payloads never include
    /// conversation history.
    async fn create_bare_conversation(&self, title: String) -> entities::Conversation;

    /// Deletes a conversation and all of its messages.
    ///
    /// Returns `Err` if the conversation did not exist.
    async fn delete_conversation(&self, conversation_id: Uuid) -> Result<(), ()>;

    /// Replaces a conversation's title.
    async fn rename_conversation(&self, conversation_id: Uuid, title: &str) -> Result<(), ()>;

    /// List all messages in a conversation, oldest first.
    async fn list_messages(&self, conversation_id: Uuid) -> Result<Vec<entities::Message>, ()>;

    /// Creates a new message in a conversation.
    ///
    /// The helper functions `create_X_message` should be used instead for clarity.
    async fn create_raw_message(
        &self,
        conversation_id: Uuid,
        kind: MessageKind,
        content_kind: ContentKind,
        content: String,
        message_id: Uuid,
    ) -> Result<entities::Message, ()>;

    /// Create a new user message in a conversation.
    ///
    /// Returns `Err` if the conversation does not exist.
    async fn create_user_message(
        &self,
        conversation_id: Uuid,
        message: String,
    ) -> Result<entities::Message, ()> {
        self.create_raw_message(
            conversation_id,
            MessageKind::User,
            ContentKind::Text,
            message,
            Uuid::new_v4(),
        )
        .await
    }

    /// Create a new bot message in a conversation.
    ///
    /// Returns `Err` if the conversation doesn't exist.
    async fn create_bot_message(
        &self,
        conversation_id: Uuid,
        message: String,
    ) -> Result<entities::Message, ()> {
        self.create_raw_message(
            conversation_id,
            MessageKind::Bot,
            ContentKind::Text,
            message,
            Uuid::new_v4(),
        )
        .await
    }

    async fn create_bot_message_with_id(
        &self,
        conversation_id: Uuid,
        message: String,
        message_id: Uuid,
    ) -> Result<entities::Message, ()> {
        self.create_raw_message(
            conversation_id,
            MessageKind::Bot,
            ContentKind::Text,
            message,
            message_id,
        )
        .await
    }

    /// Create a bot message holding the URL of a generated image.
    async fn create_image_message(
        &self,
        conversation_id: Uuid,
        url: String,
    ) -> Result<entities::Message, ()> {
        self.create_raw_message(
            conversation_id,
            MessageKind::Bot,
            ContentKind::ImageUrl,
            url,
            Uuid::new_v4(),
        )
        .await
    }

    /// Create a new system message in a conversation.
    ///
    /// Returns `Err` if the conversation doesn't exist.
    async fn create_system_message(
        &self,
        conversation_id: Uuid,
        message: String,
    ) -> Result<entities::Message, ()> {
        self.create_raw_message(
            conversation_id,
            MessageKind::System,
            ContentKind::Text,
            message,
            Uuid::new_v4(),
        )
        .await
    }
}
