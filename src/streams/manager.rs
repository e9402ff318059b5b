use std::sync::Arc;

use anyhow::anyhow;
use futures::stream::{self, StreamExt};
use sqlx::SqlitePool;
use tokio::sync::oneshot;
use tracing::{error, info};
use uuid::Uuid;

use super::{delta_frame, error_frame, finish_frame, start_frame, FrameStream, StreamBroker};
use crate::errors::{AppError, AppResult};
use crate::llm::TokenStream;
use crate::models::{Conversation, Message};

/// Owns the stream lifecycle protocol: minting a durable channel for a new
/// turn, recording its identity on the conversation row, retiring it on
/// completion, and healing pointers whose channel has expired.
///
/// Only this type ever writes `active_stream_id`. Pointer writes are single
/// atomic column updates, and the pointer is written strictly after the
/// channel is readable and cleared strictly after (or in lieu of) the
/// assistant message being persisted.
#[derive(Clone)]
pub struct StreamManager {
    pool: SqlitePool,
    broker: Arc<dyn StreamBroker>,
}

impl StreamManager {
    pub fn new(pool: SqlitePool, broker: Arc<dyn StreamBroker>) -> Self {
        Self { pool, broker }
    }

    /// Wrap a generation's token stream in a durable channel and return a
    /// live reader for the requesting client.
    ///
    /// Ordering is the crux: the channel is registered first, the pointer is
    /// written second, and the relay's completion bookkeeping waits for the
    /// pointer write before it clears, so a racing resume can never observe
    /// a pointer to an unreadable channel, and a fast generation can never
    /// leave a cleared pointer behind the pointer write.
    pub async fn begin(&self, conversation_id: &str, tokens: TokenStream) -> AppResult<FrameStream> {
        let stream_id = Uuid::new_v4().to_string();
        let (registered_tx, registered_rx) = oneshot::channel();

        let source = relay(
            self.pool.clone(),
            conversation_id.to_string(),
            stream_id.clone(),
            tokens,
            registered_rx,
        );
        self.broker.create(&stream_id, source).await?;

        Conversation::set_pointer(&self.pool, conversation_id, Some(&stream_id)).await?;
        let _ = registered_tx.send(());

        info!("stream {stream_id} started on conversation {conversation_id}");
        self.broker
            .resume(&stream_id)
            .await?
            .ok_or_else(|| AppError::db(anyhow!("stream {stream_id} expired before first read")))
    }

    /// Reattach to the channel named by a conversation's pointer. A pointer
    /// whose channel is gone (expired, or lost to a restart) is cleared here,
    /// so a crash mid-generation can never leave a conversation permanently
    /// claiming an in-flight stream.
    pub async fn resume(
        &self,
        conversation_id: &str,
        stream_id: &str,
    ) -> AppResult<Option<FrameStream>> {
        match self.broker.resume(stream_id).await? {
            Some(frames) => Ok(Some(frames)),
            None => {
                info!("clearing stale stream pointer {stream_id} on conversation {conversation_id}");
                Conversation::finish_stream(&self.pool, conversation_id, stream_id).await?;
                Ok(None)
            }
        }
    }
}

enum Phase {
    Start,
    Streaming,
    Done,
}

struct Relay {
    pool: SqlitePool,
    conversation_id: String,
    stream_id: String,
    tokens: TokenStream,
    text: String,
    registered: Option<oneshot::Receiver<()>>,
    phase: Phase,
}

impl Relay {
    /// End-of-generation bookkeeping. Runs after the pointer write (the
    /// handshake) and clears the pointer whether or not a message was
    /// persisted, so the conversation never stays pointed at a dead stream.
    /// The clear is keyed on this relay's stream id; a newer turn that has
    /// already superseded it keeps its own pointer.
    async fn finish(&mut self, persist: bool) {
        if let Some(registered) = self.registered.take() {
            let _ = registered.await;
        }
        if persist {
            if let Err(e) =
                Message::insert_assistant(&self.pool, &self.conversation_id, &self.text).await
            {
                error!(
                    "failed to persist assistant message for {}: {e:?}",
                    self.conversation_id
                );
            }
        }
        if let Err(e) =
            Conversation::finish_stream(&self.pool, &self.conversation_id, &self.stream_id).await
        {
            error!(
                "failed to retire stream on {}: {e:?}",
                self.conversation_id
            );
        }
    }
}

/// Turn a token stream into the framed source the broker buffers: a start
/// event, one delta per token, and a terminal finish or error event. The
/// terminal frame is emitted only after persistence and pointer retirement,
/// so a reader that sees it can rely on the conversation being settled.
fn relay(
    pool: SqlitePool,
    conversation_id: String,
    stream_id: String,
    tokens: TokenStream,
    registered: oneshot::Receiver<()>,
) -> FrameStream {
    let state = Relay {
        pool,
        conversation_id,
        stream_id,
        tokens,
        text: String::new(),
        registered: Some(registered),
        phase: Phase::Start,
    };

    stream::unfold(state, |mut s| async move {
        match s.phase {
            Phase::Start => {
                s.phase = Phase::Streaming;
                Some((start_frame(), s))
            }
            Phase::Streaming => match s.tokens.next().await {
                Some(Ok(token)) => {
                    s.text.push_str(&token);
                    Some((delta_frame(&token), s))
                }
                Some(Err(e)) => {
                    // A failure after streaming began must never become a
                    // transport error; the stream ends with an error event
                    // and no assistant message is persisted.
                    error!(
                        "generation failed mid-stream on {}: {e:?}",
                        s.conversation_id
                    );
                    s.finish(false).await;
                    s.phase = Phase::Done;
                    Some((error_frame("The response was interrupted"), s))
                }
                None => {
                    s.finish(true).await;
                    s.phase = Phase::Done;
                    Some((finish_frame(), s))
                }
            },
            Phase::Done => None,
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::streams::MemoryStreamBroker;
    use bytes::Bytes;
    use std::time::Duration;

    async fn manager_with_conversation() -> (StreamManager, SqlitePool) {
        let pool = db::connect_in_memory().await.unwrap();
        Conversation::insert(&pool, "c1", "alice", "prompt", "m1")
            .await
            .unwrap();
        let broker = Arc::new(MemoryStreamBroker::new(Duration::from_secs(60)));
        (StreamManager::new(pool.clone(), broker), pool)
    }

    fn frames_to_text(frames: &[Bytes]) -> String {
        frames
            .iter()
            .map(|b| String::from_utf8(b.to_vec()).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn completed_turn_persists_message_and_clears_pointer() {
        let (manager, pool) = manager_with_conversation().await;
        let before = Conversation::find_owned(&pool, "c1", "alice").await.unwrap();

        let tokens = stream::iter(vec![Ok("Hello".to_string()), Ok(", world".to_string())]).boxed();
        let reader = manager.begin("c1", tokens).await.unwrap();
        let frames: Vec<Bytes> = reader.collect().await;

        let text = frames_to_text(&frames);
        assert!(text.starts_with("data: {\"type\":\"start\"}"));
        assert!(text.contains("Hello"));
        assert!(text.contains("\"type\":\"finish\""));

        let messages = Message::all_for_conversation(&pool, "c1").await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "Hello, world");

        let after = Conversation::find_owned(&pool, "c1", "alice").await.unwrap();
        assert!(after.active_stream_id.is_none());
        assert!(after.updated_at > before.updated_at);
    }

    #[tokio::test]
    async fn failed_generation_clears_pointer_without_persisting() {
        let (manager, pool) = manager_with_conversation().await;

        let tokens = stream::iter(vec![
            Ok("partial".to_string()),
            Err(AppError::db(anyhow!("provider hung up"))),
        ])
        .boxed();
        let reader = manager.begin("c1", tokens).await.unwrap();
        let frames: Vec<Bytes> = reader.collect().await;

        let text = frames_to_text(&frames);
        assert!(text.contains("\"type\":\"error\""));
        assert!(!text.contains("\"type\":\"finish\""));

        assert!(Message::all_for_conversation(&pool, "c1")
            .await
            .unwrap()
            .is_empty());
        let conv = Conversation::find_owned(&pool, "c1", "alice").await.unwrap();
        assert!(conv.active_stream_id.is_none());
    }

    #[tokio::test]
    async fn stale_pointer_heals_on_resume() {
        let (manager, pool) = manager_with_conversation().await;
        Conversation::set_pointer(&pool, "c1", Some("ghost"))
            .await
            .unwrap();

        assert!(manager.resume("c1", "ghost").await.unwrap().is_none());
        let pointer = Conversation::active_stream_pointer(&pool, "c1", "alice")
            .await
            .unwrap();
        assert!(pointer.is_none());

        // Healing is idempotent.
        assert!(manager.resume("c1", "ghost").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn healing_never_wipes_a_superseding_stream() {
        let (manager, pool) = manager_with_conversation().await;
        Conversation::set_pointer(&pool, "c1", Some("newer"))
            .await
            .unwrap();

        // A late resume of the superseded stream heals nothing but also
        // disturbs nothing.
        assert!(manager.resume("c1", "older").await.unwrap().is_none());
        let pointer = Conversation::active_stream_pointer(&pool, "c1", "alice")
            .await
            .unwrap();
        assert_eq!(pointer.as_deref(), Some("newer"));
    }

    #[tokio::test]
    async fn live_stream_resumes_from_buffered_start() {
        let (manager, pool) = manager_with_conversation().await;

        let (mut tx, rx) = futures::channel::mpsc::unbounded::<Result<String, AppError>>();
        use futures::SinkExt;
        tx.send(Ok("first ".to_string())).await.unwrap();

        let reader = manager.begin("c1", rx.boxed()).await.unwrap();
        drop(reader); // the original client disconnects

        tokio::time::sleep(Duration::from_millis(10)).await;

        let pointer = Conversation::active_stream_pointer(&pool, "c1", "alice")
            .await
            .unwrap()
            .expect("stream still in flight");
        let resumed = manager.resume("c1", &pointer).await.unwrap().unwrap();

        tx.send(Ok("second".to_string())).await.unwrap();
        drop(tx);

        let text = frames_to_text(&resumed.collect::<Vec<Bytes>>().await);
        assert!(text.contains("first "));
        assert!(text.contains("second"));
        assert!(text.contains("\"type\":\"finish\""));

        let messages = Message::all_for_conversation(&pool, "c1").await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "first second");
    }
}
