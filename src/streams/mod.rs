pub mod manager;
pub mod memory;
pub mod redis;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use serde_json::json;

use crate::errors::AppResult;

pub use manager::StreamManager;
pub use memory::MemoryStreamBroker;
pub use redis::RedisStreamBroker;

/// Framed output chunks as they travel through a durable channel. Frames are
/// stored pre-serialized so a resumed reader replays byte-identical output.
pub type FrameStream = BoxStream<'static, Bytes>;

/// The durable, resumable channel a stream lives in while generation is in
/// flight. Backends buffer every frame, relay live frames to any number of
/// concurrent readers, and expire entries on their own schedule; the resume
/// protocol's self-healing path covers whatever expiry leaves behind.
#[async_trait]
pub trait StreamBroker: Send + Sync {
    /// Register a channel under `token` and start draining `source` into it
    /// in the background. Returns once the channel is readable, not once the
    /// source is exhausted; callers persist the discovery pointer right
    /// after this call.
    async fn create(&self, token: &str, source: FrameStream) -> AppResult<()>;

    /// Reattach to a channel: buffered frames replay first, live frames
    /// follow. `None` means the channel expired or never existed.
    async fn resume(&self, token: &str) -> AppResult<Option<FrameStream>>;
}

// ─── SSE framing ───
// One `data: {json}\n\n` event per frame, the shape streaming chat clients
// expect: start, text-delta*, then finish (or a terminal error event).

pub const SSE_CONTENT_TYPE: &str = "text/event-stream";

fn event(value: serde_json::Value) -> Bytes {
    Bytes::from(format!("data: {value}\n\n"))
}

pub fn start_frame() -> Bytes {
    event(json!({ "type": "start" }))
}

pub fn delta_frame(text: &str) -> Bytes {
    event(json!({ "type": "text-delta", "delta": text }))
}

pub fn finish_frame() -> Bytes {
    event(json!({ "type": "finish" }))
}

pub fn error_frame(message: &str) -> Bytes {
    event(json!({ "type": "error", "message": message }))
}
