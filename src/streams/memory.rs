use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use moka::future::Cache;
use tokio::sync::{broadcast, Mutex};
use tracing::warn;

use super::{FrameStream, StreamBroker};
use crate::errors::AppResult;

#[derive(Clone)]
enum Frame {
    Chunk(Bytes),
    End,
}

#[derive(Default)]
struct EntryState {
    chunks: Vec<Bytes>,
    finished: bool,
}

struct Entry {
    state: Mutex<EntryState>,
    live: broadcast::Sender<Frame>,
}

/// In-process broker: a TTL cache of buffered channels with a broadcast
/// relay for live readers. Suitable for a single-instance deployment; the
/// Redis broker covers multi-instance setups.
#[derive(Clone)]
pub struct MemoryStreamBroker {
    entries: Cache<String, Arc<Entry>>,
}

impl MemoryStreamBroker {
    pub fn new(ttl: Duration) -> Self {
        let entries = Cache::builder()
            .max_capacity(10_000)
            .time_to_live(ttl)
            .build();
        Self { entries }
    }
}

#[async_trait]
impl StreamBroker for MemoryStreamBroker {
    async fn create(&self, token: &str, mut source: FrameStream) -> AppResult<()> {
        let (live, _) = broadcast::channel(1024);
        let entry = Arc::new(Entry {
            state: Mutex::new(EntryState::default()),
            live,
        });
        self.entries.insert(token.to_string(), entry.clone()).await;

        // Drain the source independently of any reader. Appending and
        // broadcasting happen under the entry lock so a resuming reader
        // cannot miss a frame between its snapshot and its subscription.
        tokio::spawn(async move {
            while let Some(chunk) = source.next().await {
                let mut state = entry.state.lock().await;
                state.chunks.push(chunk.clone());
                let _ = entry.live.send(Frame::Chunk(chunk));
            }
            let mut state = entry.state.lock().await;
            state.finished = true;
            let _ = entry.live.send(Frame::End);
        });

        Ok(())
    }

    async fn resume(&self, token: &str) -> AppResult<Option<FrameStream>> {
        let Some(entry) = self.entries.get(token).await else {
            return Ok(None);
        };

        let (buffered, finished, rx) = {
            let state = entry.state.lock().await;
            (
                state.chunks.clone(),
                state.finished,
                entry.live.subscribe(),
            )
        };

        let replay = stream::iter(buffered);
        if finished {
            return Ok(Some(replay.boxed()));
        }

        let live = stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(Frame::Chunk(chunk)) => return Some((chunk, rx)),
                    Ok(Frame::End) => return None,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("stream reader lagged by {n} frames");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });

        Ok(Some(replay.chain(live).boxed()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::mpsc;
    use futures::SinkExt;

    fn broker() -> MemoryStreamBroker {
        MemoryStreamBroker::new(Duration::from_secs(60))
    }

    #[tokio::test]
    async fn unknown_token_resumes_to_nothing() {
        let b = broker();
        assert!(b.resume("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn completed_stream_replays_in_full() {
        let b = broker();
        let source = stream::iter(vec![Bytes::from("a"), Bytes::from("b")]).boxed();
        b.create("t1", source).await.unwrap();

        // Let the drain task finish.
        tokio::time::sleep(Duration::from_millis(10)).await;

        let frames: Vec<Bytes> = b.resume("t1").await.unwrap().unwrap().collect().await;
        assert_eq!(frames, vec![Bytes::from("a"), Bytes::from("b")]);

        // A second resume replays the same bytes again.
        let again: Vec<Bytes> = b.resume("t1").await.unwrap().unwrap().collect().await;
        assert_eq!(again, frames);
    }

    #[tokio::test]
    async fn mid_stream_resume_replays_buffer_then_continues_live() {
        let b = broker();
        let (mut tx, rx) = mpsc::unbounded::<Bytes>();
        b.create("t1", rx.boxed()).await.unwrap();

        tx.send(Bytes::from("one")).await.unwrap();
        tx.send(Bytes::from("two")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let mut reader = b.resume("t1").await.unwrap().unwrap();
        assert_eq!(reader.next().await, Some(Bytes::from("one")));
        assert_eq!(reader.next().await, Some(Bytes::from("two")));

        tx.send(Bytes::from("three")).await.unwrap();
        drop(tx);

        assert_eq!(reader.next().await, Some(Bytes::from("three")));
        assert_eq!(reader.next().await, None);
    }

    #[tokio::test]
    async fn entries_expire_after_ttl() {
        let b = MemoryStreamBroker::new(Duration::from_millis(20));
        let source = stream::iter(vec![Bytes::from("a")]).boxed();
        b.create("t1", source).await.unwrap();

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(b.resume("t1").await.unwrap().is_none());
    }
}
