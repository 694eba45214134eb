use chrono::{DateTime, FixedOffset, TimeZone, Utc};

/// The standard format for interval end timestamps, both on disk and on the wire.
pub const RECORD_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn format_record_timestamp<Tz: TimeZone>(moment: DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    moment.format(RECORD_TIMESTAMP_FORMAT).to_string()
}

/// Converts a UTC moment into the agent's fixed timezone.
pub fn to_local(moment: DateTime<Utc>, offset: FixedOffset) -> DateTime<FixedOffset> {
    moment.with_timezone(&offset)
}
