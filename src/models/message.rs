use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool, Type};
use uuid::Uuid;

use crate::errors::AppResult;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(rename_all = "lowercase")] // SQL value name
#[serde(rename_all = "lowercase")] // JSON value name
pub enum Role {
    User,
    Assistant,
}

/// Append-only: rows are never updated after insertion and disappear only
/// when their conversation is deleted.
#[derive(Debug, Clone, FromRow)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Idempotent user-turn insert: a client retry carrying the same message
    /// id must not duplicate the row. The uniqueness key is `(id,
    /// conversation_id)`, so an id reused in another conversation still
    /// inserts there. Returns whether a row was written.
    pub async fn insert_user_if_absent(
        pool: &SqlitePool,
        id: &str,
        conversation_id: &str,
        content: &str,
    ) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO message (id, conversation_id, role, content, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(id)
        .bind(conversation_id)
        .bind(Role::User)
        .bind(content)
        .bind(Utc::now())
        .execute(pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn insert_assistant(
        pool: &SqlitePool,
        conversation_id: &str,
        content: &str,
    ) -> AppResult<Self> {
        let message = Message {
            id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            role: Role::Assistant,
            content: content.to_string(),
            created_at: Utc::now(),
        };

        sqlx::query(
            r#"
            INSERT INTO message (id, conversation_id, role, content, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&message.id)
        .bind(&message.conversation_id)
        .bind(message.role)
        .bind(&message.content)
        .bind(message.created_at)
        .execute(pool)
        .await?;

        Ok(message)
    }

    /// History reads back in insertion-timestamp order, never id order.
    pub async fn all_for_conversation(
        pool: &SqlitePool,
        conversation_id: &str,
    ) -> AppResult<Vec<Self>> {
        let rows = sqlx::query_as::<_, Message>(
            r#"
            SELECT id, conversation_id, role, content, created_at
            FROM message
            WHERE conversation_id = ?
            ORDER BY created_at ASC
            "#,
        )
        .bind(conversation_id)
        .fetch_all(pool)
        .await?;
        Ok(rows)
    }

    /// Preview snippet for the conversation list: the earliest user-authored
    /// message, if any.
    pub async fn first_user_text(
        pool: &SqlitePool,
        conversation_id: &str,
    ) -> AppResult<Option<String>> {
        let row = sqlx::query_as::<_, (String,)>(
            r#"
            SELECT content FROM message
            WHERE conversation_id = ? AND role = 'user'
            ORDER BY created_at ASC
            LIMIT 1
            "#,
        )
        .bind(conversation_id)
        .fetch_optional(pool)
        .await?;
        Ok(row.map(|(content,)| content))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::models::Conversation;

    #[tokio::test]
    async fn duplicate_user_message_id_inserts_once() {
        let pool = db::connect_in_memory().await.unwrap();
        Conversation::insert(&pool, "c1", "alice", "prompt", "m1")
            .await
            .unwrap();

        assert!(Message::insert_user_if_absent(&pool, "msg-1", "c1", "hello")
            .await
            .unwrap());
        assert!(!Message::insert_user_if_absent(&pool, "msg-1", "c1", "hello")
            .await
            .unwrap());

        let messages = Message::all_for_conversation(&pool, "c1").await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "hello");
        assert_eq!(messages[0].role, Role::User);
    }

    #[tokio::test]
    async fn same_message_id_in_two_conversations_persists_both() {
        let pool = db::connect_in_memory().await.unwrap();
        Conversation::insert(&pool, "c1", "alice", "prompt", "m1")
            .await
            .unwrap();
        Conversation::insert(&pool, "c2", "alice", "prompt", "m1")
            .await
            .unwrap();

        assert!(Message::insert_user_if_absent(&pool, "msg-1", "c1", "in c1")
            .await
            .unwrap());
        assert!(Message::insert_user_if_absent(&pool, "msg-1", "c2", "in c2")
            .await
            .unwrap());

        let c1 = Message::all_for_conversation(&pool, "c1").await.unwrap();
        let c2 = Message::all_for_conversation(&pool, "c2").await.unwrap();
        assert_eq!(c1.len(), 1);
        assert_eq!(c2.len(), 1);
        assert_eq!(c1[0].content, "in c1");
        assert_eq!(c2[0].content, "in c2");
    }

    #[tokio::test]
    async fn preview_is_the_earliest_user_message() {
        let pool = db::connect_in_memory().await.unwrap();
        Conversation::insert(&pool, "c1", "alice", "prompt", "m1")
            .await
            .unwrap();

        Message::insert_user_if_absent(&pool, "m-1", "c1", "first question")
            .await
            .unwrap();
        Message::insert_assistant(&pool, "c1", "an answer").await.unwrap();
        Message::insert_user_if_absent(&pool, "m-2", "c1", "second question")
            .await
            .unwrap();

        let preview = Message::first_user_text(&pool, "c1").await.unwrap();
        assert_eq!(preview.as_deref(), Some("first question"));
    }

    #[tokio::test]
    async fn deleting_a_conversation_cascades_to_messages() {
        let pool = db::connect_in_memory().await.unwrap();
        Conversation::insert(&pool, "c1", "alice", "prompt", "m1")
            .await
            .unwrap();
        Message::insert_user_if_absent(&pool, "m-1", "c1", "hello")
            .await
            .unwrap();

        Conversation::delete(&pool, "c1").await.unwrap();
        let messages = Message::all_for_conversation(&pool, "c1").await.unwrap();
        assert!(messages.is_empty());
    }
}
