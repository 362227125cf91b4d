//! UTC timestamps in the format the service expects, and the clock they are read from.
use time::format_description::FormatItem;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime, UtcOffset};

const UTC_FORMAT: &[FormatItem<'static>] =
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]Z");

#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("unable to format timestamp: {0}")]
    Format(String),
    #[error("timestamp is not in yyyy-mm-ddThh:mm:ss.fffZ form: {0}")]
    Parse(String),
}

/// Formats `date` as `2011-03-08T17:04:05.123Z`, converting to UTC first.
pub fn to_utc_string(date: OffsetDateTime) -> Result<String, Error> {
    date.to_offset(UtcOffset::UTC)
        .format(UTC_FORMAT)
        .map_err(|e| Error::Format(e.to_string()))
}

/// Inverse of [to_utc_string].
pub fn from_utc_string(value: &str) -> Result<OffsetDateTime, Error> {
    PrimitiveDateTime::parse(value.trim(), UTC_FORMAT)
        .map(PrimitiveDateTime::assume_utc)
        .map_err(|e| Error::Parse(e.to_string()))
}

/// Wall-clock source for message timestamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// A clock that always reports the same instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub OffsetDateTime);

impl Clock for FixedClock {
    fn now(&self) -> OffsetDateTime {
        self.0
    }
}
