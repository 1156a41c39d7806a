use anyhow::Result;
use async_trait::async_trait;

use crate::models::LogEntry;

use super::Watermark;

/// The access-log query the poller pages through.
#[async_trait]
pub trait LogSource: Send + Sync {
    /// Up to `limit` rows with `(timestamp, id)` strictly greater than
    /// `watermark`, ascending by `(timestamp, id)`.
    async fn fetch_after(&self, watermark: Watermark, limit: usize) -> Result<Vec<LogEntry>>;
}
