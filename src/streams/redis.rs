use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use redis::aio::ConnectionManager;
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use tracing::{info, warn};

use super::{FrameStream, StreamBroker};
use crate::errors::AppResult;

const KEY_PREFIX: &str = "everstream:stream";
const READ_BLOCK_MS: usize = 5_000;
const READ_BATCH: usize = 64;

/// Redis-backed broker: each channel is a Redis stream, one XADD entry per
/// frame plus a terminator entry, expiring via key TTL. Buffers survive
/// process restarts and are shared across instances.
#[derive(Clone)]
pub struct RedisStreamBroker {
    manager: ConnectionManager,
    ttl: Duration,
}

impl RedisStreamBroker {
    pub async fn connect(url: &str, ttl: Duration) -> AppResult<Self> {
        let client = redis::Client::open(url)?;
        let manager = ConnectionManager::new(client).await?;
        info!("connected to redis stream store");
        Ok(Self { manager, ttl })
    }

    fn key(token: &str) -> String {
        format!("{KEY_PREFIX}:{token}")
    }
}

struct Cursor {
    conn: ConnectionManager,
    key: String,
    last_id: String,
    pending: VecDeque<Bytes>,
    done: bool,
}

/// Feed every frame of `source` into `append`. A failed append stops
/// writing but keeps consuming: the source carries its own completion
/// bookkeeping (message persistence, pointer retirement) and must always be
/// polled to exhaustion. Returns whether every frame was written.
async fn drain<F, Fut, E>(mut source: FrameStream, mut append: F) -> bool
where
    F: FnMut(Bytes) -> Fut,
    Fut: std::future::Future<Output = Result<(), E>>,
    E: std::fmt::Display,
{
    let mut ok = true;
    while let Some(chunk) = source.next().await {
        if !ok {
            continue;
        }
        if let Err(e) = append(chunk).await {
            warn!("stream append failed, draining the remaining frames: {e}");
            ok = false;
        }
    }
    ok
}

#[async_trait]
impl StreamBroker for RedisStreamBroker {
    async fn create(&self, token: &str, source: FrameStream) -> AppResult<()> {
        let key = Self::key(token);
        let mut conn = self.manager.clone();
        let ttl_secs = self.ttl.as_secs() as i64;

        // The open marker makes the key visible before any output exists, so
        // the pointer written right after this call always names a readable
        // channel.
        let _: String = conn.xadd(&key, "*", &[("ctl", "open")]).await?;
        let _: i64 = conn.expire(&key, ttl_secs).await?;

        tokio::spawn(async move {
            let append_conn = conn.clone();
            let append_key = key.clone();
            let all_written = drain(source, move |chunk| {
                let mut conn = append_conn.clone();
                let key = append_key.clone();
                async move {
                    let appended: Result<String, redis::RedisError> =
                        conn.xadd(&key, "*", &[("d", chunk.as_ref())]).await;
                    appended.map(|_| ())
                }
            })
            .await;

            if all_written {
                let ended: Result<String, redis::RedisError> =
                    conn.xadd(&key, "*", &[("ctl", "end")]).await;
                match ended {
                    Ok(_) => {
                        let _: Result<i64, redis::RedisError> =
                            conn.expire(&key, ttl_secs).await;
                    }
                    Err(e) => {
                        // Readers blocked on this key must not wait out the
                        // TTL for a terminator that will never come.
                        warn!("stream {key}: terminator write failed: {e}");
                        let _: Result<i64, redis::RedisError> = conn.del(&key).await;
                    }
                }
            } else {
                // The buffer is truncated. Drop the key so attached readers
                // terminate and a later resume heals the pointer instead of
                // replaying a partial turn as complete.
                let _: Result<i64, redis::RedisError> = conn.del(&key).await;
            }
        });

        Ok(())
    }

    async fn resume(&self, token: &str) -> AppResult<Option<FrameStream>> {
        let key = Self::key(token);
        let mut conn = self.manager.clone();

        let exists: bool = conn.exists(&key).await?;
        if !exists {
            return Ok(None);
        }

        let cursor = Cursor {
            conn,
            key,
            last_id: "0".to_string(),
            pending: VecDeque::new(),
            done: false,
        };

        let frames = stream::unfold(cursor, |mut c| async move {
            loop {
                if let Some(chunk) = c.pending.pop_front() {
                    return Some((chunk, c));
                }
                if c.done {
                    return None;
                }

                let options = StreamReadOptions::default()
                    .block(READ_BLOCK_MS)
                    .count(READ_BATCH);
                let reply: StreamReadReply = match c
                    .conn
                    .xread_options(&[&c.key], &[&c.last_id], &options)
                    .await
                {
                    Ok(reply) => reply,
                    Err(e) => {
                        warn!("stream read on {} failed: {e}", c.key);
                        return None;
                    }
                };

                if reply.keys.is_empty() {
                    // Block timeout. If the key expired underneath us the
                    // stream is over; otherwise keep waiting for the writer.
                    match c.conn.exists::<_, bool>(&c.key).await {
                        Ok(true) => continue,
                        _ => return None,
                    }
                }

                for stream_key in reply.keys {
                    for entry in stream_key.ids {
                        c.last_id = entry.id.clone();
                        if let Some(redis::Value::BulkString(data)) = entry.map.get("d") {
                            c.pending.push_back(Bytes::from(data.clone()));
                        }
                        if let Some(redis::Value::BulkString(ctl)) = entry.map.get("ctl") {
                            if ctl.as_slice() == b"end" {
                                c.done = true;
                            }
                        }
                    }
                }
            }
        });

        Ok(Some(frames.boxed()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    // The relay source runs message persistence and pointer retirement when
    // it is polled to completion, so a store failure mid-append must never
    // abandon the source early.
    #[tokio::test]
    async fn failed_append_still_drains_the_source_to_exhaustion() {
        let polled = Arc::new(AtomicUsize::new(0));
        let polled_counter = polled.clone();
        let source = stream::iter(vec![Bytes::from("a"), Bytes::from("b"), Bytes::from("c")])
            .inspect(move |_| {
                polled_counter.fetch_add(1, Ordering::SeqCst);
            })
            .boxed();

        let attempts = Arc::new(AtomicUsize::new(0));
        let attempt_counter = attempts.clone();
        let all_written = drain(source, move |_chunk| {
            let attempts = attempt_counter.clone();
            async move {
                if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                    Ok(())
                } else {
                    Err("store went away")
                }
            }
        })
        .await;

        assert!(!all_written);
        // Every frame was consumed, but writes stopped after the failure.
        assert_eq!(polled.load(Ordering::SeqCst), 3);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }
}
