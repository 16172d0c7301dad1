use std::fmt;

use chrono::{DateTime, Utc};

/// Microseconds since 1970-01-01T00:00:00 UTC, the wire's TIMESTAMP shape.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(i64);

impl Timestamp {
    pub fn from_micros(micros: i64) -> Self {
        Timestamp(micros)
    }

    pub fn now() -> Self {
        Timestamp(Utc::now().timestamp_micros())
    }

    pub fn micros(&self) -> i64 {
        self.0
    }

    /// `None` when the microsecond count is outside chrono's representable
    /// range.
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_micros(self.0)
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        Timestamp(dt.timestamp_micros())
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_datetime() {
            Some(dt) => dt.fmt(f),
            None => write!(f, "{}us", self.0),
        }
    }
}
