use std::{sync::Arc, time::Duration};

use chrono::{DateTime, FixedOffset, Timelike};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::sync::endpoint::IngestionEndpoint;

/// Hours of the day during which sampling is allowed. When `start_hour < end_hour` the window is
/// `[start_hour, end_hour)`, otherwise it wraps past midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShiftWindow {
    pub start_hour: u32,
    pub end_hour: u32,
}

impl ShiftWindow {
    /// # Panics
    /// When either hour is outside `0..=23`.
    pub const fn new(start_hour: u32, end_hour: u32) -> Self {
        assert!(start_hour < 24 && end_hour < 24);
        Self {
            start_hour,
            end_hour,
        }
    }

    pub fn from_hours(start_hour: i64, end_hour: i64) -> Option<Self> {
        let start_hour = u32::try_from(start_hour).ok().filter(|h| *h < 24)?;
        let end_hour = u32::try_from(end_hour).ok().filter(|h| *h < 24)?;
        Some(Self {
            start_hour,
            end_hour,
        })
    }

    pub fn contains_hour(&self, hour: u32) -> bool {
        if self.start_hour < self.end_hour {
            self.start_hour <= hour && hour < self.end_hour
        } else {
            hour >= self.start_hour || hour < self.end_hour
        }
    }
}

impl Default for ShiftWindow {
    fn default() -> Self {
        Self::new(9, 18)
    }
}

/// Holds the currently known [ShiftWindow] and keeps it in sync with the endpoint.
pub struct ShiftWindowGate {
    window: ShiftWindow,
    endpoint: Arc<dyn IngestionEndpoint>,
    refresh_interval: Duration,
    last_attempt: Option<Instant>,
}

impl ShiftWindowGate {
    pub fn new(
        initial: ShiftWindow,
        endpoint: Arc<dyn IngestionEndpoint>,
        refresh_interval: Duration,
    ) -> Self {
        Self {
            window: initial,
            endpoint,
            refresh_interval,
            last_attempt: None,
        }
    }

    pub fn window(&self) -> ShiftWindow {
        self.window
    }

    /// Fetches the shift configuration for `identity`, at most once per refresh interval. The
    /// first call always goes out. Failures keep the current window.
    pub async fn refresh(&mut self, identity: &str, now: Instant) {
        if let Some(last) = self.last_attempt {
            if now.saturating_duration_since(last) < self.refresh_interval {
                return;
            }
        }
        self.last_attempt = Some(now);

        match self.endpoint.fetch_shift_window(identity).await {
            Ok(window) if window != self.window => {
                info!(
                    "Shift updated: now tracking {}:00 to {}:00",
                    window.start_hour, window.end_hour
                );
                self.window = window;
            }
            Ok(_) => debug!("Shift unchanged"),
            Err(e) => warn!("Failed to refresh shift configuration, keeping {:?}: {e}", self.window),
        }
    }

    pub fn is_active(&self, now: DateTime<FixedOffset>) -> bool {
        self.window.contains_hour(now.hour())
    }
}
