//! Behavioral coverage for the Redis-backed broker, mirroring the memory
//! broker's suite. These talk to a real server (`REDIS_URL`, defaulting to
//! `redis://127.0.0.1:6379`) and are ignored by default; run them with
//! `cargo test --test redis_broker -- --ignored` next to a local Redis.

use std::time::Duration;

use bytes::Bytes;
use futures::channel::mpsc;
use futures::stream::{self, StreamExt};
use futures::SinkExt;
use uuid::Uuid;

use everstream::streams::{RedisStreamBroker, StreamBroker};

fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
}

async fn broker(ttl: Duration) -> RedisStreamBroker {
    RedisStreamBroker::connect(&redis_url(), ttl)
        .await
        .expect("redis reachable")
}

fn token() -> String {
    Uuid::new_v4().to_string()
}

#[tokio::test]
#[ignore = "needs a running redis"]
async fn unknown_token_resumes_to_nothing() {
    let b = broker(Duration::from_secs(60)).await;
    assert!(b.resume(&token()).await.unwrap().is_none());
}

#[tokio::test]
#[ignore = "needs a running redis"]
async fn completed_stream_replays_in_full() {
    let b = broker(Duration::from_secs(60)).await;
    let t = token();
    let source = stream::iter(vec![Bytes::from("a"), Bytes::from("b")]).boxed();
    b.create(&t, source).await.unwrap();

    // Let the drain task write the terminator.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let frames: Vec<Bytes> = b.resume(&t).await.unwrap().unwrap().collect().await;
    assert_eq!(frames, vec![Bytes::from("a"), Bytes::from("b")]);

    // A second resume replays the same bytes again.
    let again: Vec<Bytes> = b.resume(&t).await.unwrap().unwrap().collect().await;
    assert_eq!(again, frames);
}

#[tokio::test]
#[ignore = "needs a running redis"]
async fn mid_stream_resume_replays_buffer_then_continues_live() {
    let b = broker(Duration::from_secs(60)).await;
    let t = token();
    let (mut tx, rx) = mpsc::unbounded::<Bytes>();
    b.create(&t, rx.boxed()).await.unwrap();

    tx.send(Bytes::from("one")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let mut reader = b.resume(&t).await.unwrap().unwrap();
    assert_eq!(reader.next().await, Some(Bytes::from("one")));

    tx.send(Bytes::from("two")).await.unwrap();
    drop(tx);

    // The blocked XREAD picks up the live entry, then the terminator.
    assert_eq!(reader.next().await, Some(Bytes::from("two")));
    assert_eq!(reader.next().await, None);
}

#[tokio::test]
#[ignore = "needs a running redis"]
async fn entries_expire_after_ttl() {
    let b = broker(Duration::from_secs(1)).await;
    let t = token();
    b.create(&t, stream::iter(vec![Bytes::from("a")]).boxed())
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert!(b.resume(&t).await.unwrap().is_none());
}
