//! DB Repository abstractions

use crate::infrastructure::database::DatabaseConnection;
use crate::infrastructure::entities::{Conversation, Message};
use crate::infrastructure::traits::ConversationRepository;
use async_trait::async_trait;
use di::{Ref, injectable};
use log::error;
use uuid::Uuid;

#[injectable(ConversationRepository)]
pub struct DbConversationRepository {
    connection: Ref<DatabaseConnection>,
}

#[async_trait]
impl ConversationRepository for DbConversationRepository {
    async fn list_conversations(&self) -> Result<Vec<Conversation>, ()> {
        sqlx::query_as("SELECT * FROM conversations ORDER BY datetime(created_at) DESC")
            .fetch_all(&**self.connection)
            .await
            .map_err(|e| error!("{e}"))
    }

    async fn create_conversation(&self, conversation: Conversation) -> Result<Conversation, ()> {
        sqlx::query_as(
            "INSERT INTO conversations (id, title, created_at) VALUES (?, ?, ?) RETURNING *",
        )
        .bind(conversation.id)
        .bind(conversation.title)
        .bind(conversation.created_at)
        .fetch_one(&**self.connection)
        .await
        .map_err(|e| error!("{e}"))
    }

    async fn delete_conversation(&self, conversation_id: Uuid) -> Result<(), ()> {
        // Messages go first so the delete works even on connections without
        // the foreign_keys pragma; the schema cascade is a backstop.
        let mut tx = (**self.connection).begin().await.map_err(|e| error!("{e}"))?;

        sqlx::query("DELETE FROM messages WHERE conversation_id = ?")
            .bind(conversation_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| error!("{e}"))?;

        let deleted = sqlx::query("DELETE FROM conversations WHERE id = ?")
            .bind(conversation_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| error!("{e}"))?;

        tx.commit().await.map_err(|e| error!("{e}"))?;

        if deleted.rows_affected() == 0 { Err(()) } else { Ok(()) }
    }

    async fn rename_conversation(&self, conversation_id: Uuid, title: &str) -> Result<(), ()> {
        sqlx::query("UPDATE conversations SET title = ? WHERE id = ?")
            .bind(title)
            .bind(conversation_id)
            .execute(&**self.connection)
            .await
            .map(|_| ())
            .map_err(|e| error!("{e}"))
    }

    async fn list_conversation_messages(&self, conversation: Uuid) -> Result<Vec<Message>, ()> {
        sqlx::query_as(
            "SELECT id, conversation_id, kind, content_kind, created_at, content FROM messages WHERE conversation_id = ? ORDER BY created_at ASC",
        )
        .bind(conversation)
        .fetch_all(&**self.connection)
        .await
        .map_err(|e| error!("{e}"))
    }

    async fn create_message_in_conversation(
        &self,
        conversation_id: Uuid,
        message: Message,
    ) -> Result<Message, ()> {
        sqlx::query_as(
            "INSERT INTO messages (id, conversation_id, kind, content_kind, created_at, content) VALUES (?, ?, ?, ?, ?, ?) RETURNING *",
        )
        .bind(message.id)
        .bind(conversation_id)
        .bind(message.kind)
        .bind(message.content_kind)
        .bind(message.created_at)
        .bind(message.content)
        .fetch_one(&**self.connection)
        .await
        .map_err(|e| error!("{e}"))
    }
}
