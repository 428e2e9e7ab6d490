// Seams between the stream client and the backend

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::models::StatusUpdate;
use crate::sse::SseFrame;
use crate::types::AppResult;

/// Frames of one open status channel. An `Err` item or the end of the stream
/// both count as a transport drop.
pub type FrameStream = BoxStream<'static, AppResult<SseFrame>>;

/// Opens the live push channel for a job
#[async_trait]
pub trait StatusChannel: Send + Sync {
    async fn open(&self, job_id: &str) -> AppResult<FrameStream>;
}

/// Out-of-band lookup of a job's current status, used before reconnecting
#[async_trait]
pub trait StatusQuery: Send + Sync {
    /// Returns `Ok(None)` when the job no longer exists.
    async fn current_status(&self, job_id: &str) -> AppResult<Option<StatusUpdate>>;
}
