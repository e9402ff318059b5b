use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqlitePool};
use tracing::debug;

use crate::errors::{AppError, AppResult};

#[derive(Debug, Clone, FromRow)]
pub struct Conversation {
    pub id: String,
    pub user_id: String,
    pub system_prompt: String,
    pub model: String,
    pub active_stream_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// The ownership chokepoint: id and owner are checked in one query so a
    /// row is never read before ownership is confirmed. Zero rows is always
    /// `NotFound`, whether the conversation is missing or belongs to someone
    /// else.
    pub async fn find_owned(pool: &SqlitePool, id: &str, user_id: &str) -> AppResult<Self> {
        sqlx::query_as::<_, Conversation>(
            r#"
            SELECT id, user_id, system_prompt, model, active_stream_id, created_at, updated_at
            FROM conversation
            WHERE id = ? AND user_id = ?
            LIMIT 1
            "#,
        )
        .bind(id)
        .bind(user_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::not_found("Conversation", id))
    }

    pub async fn all_for_owner(pool: &SqlitePool, user_id: &str) -> AppResult<Vec<Self>> {
        let rows = sqlx::query_as::<_, Conversation>(
            r#"
            SELECT id, user_id, system_prompt, model, active_stream_id, created_at, updated_at
            FROM conversation
            WHERE user_id = ?
            ORDER BY updated_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(pool)
        .await?;
        Ok(rows)
    }

    pub async fn insert(
        pool: &SqlitePool,
        id: &str,
        user_id: &str,
        system_prompt: &str,
        model: &str,
    ) -> AppResult<Self> {
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO conversation (id, user_id, system_prompt, model, active_stream_id, created_at, updated_at)
            VALUES (?, ?, ?, ?, NULL, ?, ?)
            "#,
        )
        .bind(id)
        .bind(user_id)
        .bind(system_prompt)
        .bind(model)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await?;

        debug!("conversation created: {id}");
        Ok(Conversation {
            id: id.to_string(),
            user_id: user_id.to_string(),
            system_prompt: system_prompt.to_string(),
            model: model.to_string(),
            active_stream_id: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Messages cascade through the foreign key. Callers must have run the
    /// ownership check first.
    pub async fn delete(pool: &SqlitePool, id: &str) -> AppResult<()> {
        sqlx::query("DELETE FROM conversation WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await?;
        debug!("conversation deleted: {id}");
        Ok(())
    }

    pub async fn update_model(pool: &SqlitePool, id: &str, model: &str) -> AppResult<()> {
        sqlx::query("UPDATE conversation SET model = ?, updated_at = ? WHERE id = ?")
            .bind(model)
            .bind(Utc::now())
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Narrow pointer read for the resume path; fetches nothing but the
    /// `active_stream_id` column, ownership-filtered like every other read.
    pub async fn active_stream_pointer(
        pool: &SqlitePool,
        id: &str,
        user_id: &str,
    ) -> AppResult<Option<String>> {
        let row = sqlx::query_as::<_, (Option<String>,)>(
            "SELECT active_stream_id FROM conversation WHERE id = ? AND user_id = ?",
        )
        .bind(id)
        .bind(user_id)
        .fetch_optional(pool)
        .await?;

        match row {
            Some((pointer,)) => Ok(pointer),
            None => Err(AppError::not_found("Conversation", id)),
        }
    }

    /// Overwrite the pointer. Each write fully determines the new value, so
    /// there is no read-modify-write window.
    pub async fn set_pointer(
        pool: &SqlitePool,
        id: &str,
        stream_id: Option<&str>,
    ) -> AppResult<()> {
        sqlx::query("UPDATE conversation SET active_stream_id = ? WHERE id = ?")
            .bind(stream_id)
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// End-of-stream bookkeeping: clear the pointer and bump `updated_at` in
    /// one atomic update, but only while the row still points at this
    /// stream. A pointer superseded by a newer turn is left alone. Used both
    /// on normal completion and when a resume call discovers a stale pointer.
    pub async fn finish_stream(pool: &SqlitePool, id: &str, stream_id: &str) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE conversation SET active_stream_id = NULL, updated_at = ?
            WHERE id = ? AND active_stream_id = ?
            "#,
        )
        .bind(Utc::now())
        .bind(id)
        .bind(stream_id)
        .execute(pool)
        .await?;
        Ok(())
    }
}
