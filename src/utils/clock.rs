use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::time::Instant;

/// Source of wall-clock time, monotonic time and sleeping for the tracking loop. Tests swap it
/// for a clock driven by tokio's paused time.
#[async_trait]
pub trait Clock: Sync + Send + 'static {
    /// Wall-clock time, used for interval boundaries and timestamps.
    fn time(&self) -> DateTime<Utc>;

    /// Monotonic time, used for rate limiting.
    fn instant(&self) -> Instant;

    async fn sleep(&self, duration: Duration);
}

pub struct DefaultClock;

#[async_trait]
impl Clock for DefaultClock {
    fn time(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn instant(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
