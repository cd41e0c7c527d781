//! Injectable loop pacing.
//!
//! The coordinator never calls `tokio::time::sleep` directly; it waits on a
//! [`Ticker`] so tests can drive sessions without real delays.

use std::time::Duration;

use async_trait::async_trait;

#[async_trait]
pub trait Ticker: Send + Sync {
    /// Wait for one loop period.
    async fn sleep(&self, period: Duration);
}

/// Wall-clock ticker backed by the tokio timer.
pub struct TokioTicker;

#[async_trait]
impl Ticker for TokioTicker {
    async fn sleep(&self, period: Duration) {
        tokio::time::sleep(period).await;
    }
}
