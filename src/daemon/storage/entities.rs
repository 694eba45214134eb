use std::sync::Arc;

use chrono::{DateTime, Duration, FixedOffset};
use serde::{Deserialize, Serialize};

use crate::utils::time::format_record_timestamp;

/// One continuous span during which a single application held focus. Records are created when
/// the focus switches away from the application and are never modified afterwards.
#[derive(PartialEq, Debug, Serialize, Deserialize, Clone)]
pub struct UsageRecord {
    pub identity: Arc<str>,
    pub application: Arc<str>,
    pub duration_seconds: f64,
    pub location: Arc<str>,
    /// End of the interval in the agent's fixed timezone, `YYYY-MM-DD HH:MM:SS`.
    pub end_timestamp: String,
}

impl UsageRecord {
    pub fn new(
        identity: Arc<str>,
        application: Arc<str>,
        duration: Duration,
        location: Arc<str>,
        end: DateTime<FixedOffset>,
    ) -> Self {
        Self {
            identity,
            application,
            duration_seconds: duration_to_seconds(duration),
            location,
            end_timestamp: format_record_timestamp(end),
        }
    }
}

/// A record as stored in the queue. The sequence id only addresses deletion.
#[derive(PartialEq, Debug, Clone)]
pub struct QueueEntry {
    pub id: i64,
    pub record: UsageRecord,
}

pub fn duration_to_seconds(duration: Duration) -> f64 {
    duration.num_milliseconds() as f64 / 1000.
}
