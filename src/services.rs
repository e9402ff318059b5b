use futures::future::join_all;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::errors::{AppError, AppResult};
use crate::llm::{is_valid_model, DEFAULT_MODEL, SYSTEM_PROMPT};
use crate::middleware::auth::Principal;
use crate::models::{Conversation, Message};

/// Per-request service scope: the store handle and the resolved principal,
/// bundled once per inbound call and passed to every operation. Nothing here
/// outlives the request, and no operation trusts an ownership result from an
/// earlier call; every mutating method re-runs the guard.
pub struct Scope<'a> {
    pool: &'a SqlitePool,
    principal: &'a Principal,
}

impl<'a> Scope<'a> {
    pub fn new(pool: &'a SqlitePool, principal: &'a Principal) -> Self {
        Self { pool, principal }
    }

    /// The ownership guard. Every conversation read or write funnels through
    /// this single fetch-and-verify.
    pub async fn conversation(&self, id: &str) -> AppResult<Conversation> {
        Conversation::find_owned(self.pool, id, &self.principal.user_id).await
    }

    /// All conversations for the caller, newest-updated first, each carrying
    /// its preview snippet. Previews for independent conversations are
    /// fetched concurrently (bounded by the pool's connection limit) and
    /// reassembled by conversation index.
    pub async fn conversations(&self) -> AppResult<Vec<(Conversation, Option<String>)>> {
        let conversations =
            Conversation::all_for_owner(self.pool, &self.principal.user_id).await?;

        let previews = join_all(
            conversations
                .iter()
                .map(|c| Message::first_user_text(self.pool, &c.id)),
        )
        .await;

        let mut out = Vec::with_capacity(conversations.len());
        for (conversation, preview) in conversations.into_iter().zip(previews) {
            out.push((conversation, preview?));
        }
        Ok(out)
    }

    pub async fn conversation_with_messages(
        &self,
        id: &str,
    ) -> AppResult<(Conversation, Vec<Message>)> {
        let conversation = self.conversation(id).await?;
        let messages = Message::all_for_conversation(self.pool, id).await?;
        Ok((conversation, messages))
    }

    pub async fn create_conversation(&self, model: Option<&str>) -> AppResult<Conversation> {
        if let Some(model) = model {
            if !is_valid_model(model) {
                return Err(AppError::validation_field("Invalid model", "model"));
            }
        }

        let id = Uuid::new_v4().to_string();
        Conversation::insert(
            self.pool,
            &id,
            &self.principal.user_id,
            SYSTEM_PROMPT,
            model.unwrap_or(DEFAULT_MODEL),
        )
        .await
    }

    pub async fn delete_conversation(&self, id: &str) -> AppResult<()> {
        self.conversation(id).await?;
        Conversation::delete(self.pool, id).await
    }

    pub async fn update_model(&self, id: &str, model: &str) -> AppResult<()> {
        self.conversation(id).await?;
        Conversation::update_model(self.pool, id, model).await
    }

    /// Narrow, ownership-checked pointer read for the resume path.
    pub async fn active_stream_pointer(&self, id: &str) -> AppResult<Option<String>> {
        Conversation::active_stream_pointer(self.pool, id, &self.principal.user_id).await
    }

    /// Unconditional pointer clear before a new turn starts: a prior stream
    /// is presumed abandoned once a new turn arrives (last-start-wins).
    pub async fn supersede_stream(&self, id: &str) -> AppResult<()> {
        self.conversation(id).await?;
        Conversation::set_pointer(self.pool, id, None).await
    }

    /// Record the inbound user turn unless this message id was already
    /// persisted by an earlier attempt.
    pub async fn record_user_turn(
        &self,
        conversation_id: &str,
        message_id: &str,
        content: &str,
    ) -> AppResult<bool> {
        Message::insert_user_if_absent(self.pool, message_id, conversation_id, content).await
    }
}
