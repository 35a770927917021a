use time::format_description::well_known::Iso8601;
use time::{OffsetDateTime, PrimitiveDateTime};

/// Clock abstraction so that commit stamps and age cutoffs can be pinned
/// in tests.
pub trait TimeSource {
    fn now(&self) -> OffsetDateTime;

    /// The current time as an ISO-8601 string, the form stored in
    /// `processed_at` columns and returned by the health endpoint.
    fn current_time(&self) -> String {
        self.now()
            .format(&Iso8601::DEFAULT)
            .expect("failed to iso8601 format timestamp")
    }
}

#[derive(Clone)]
pub struct SystemTime {}

impl TimeSource for SystemTime {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// True iff `value` parses as an ISO-8601 date-time. Fractional seconds and
/// the UTC offset are optional; a trailing "Z" designates +00:00. Naive
/// date-times (no offset) are accepted and stored as given.
pub fn is_valid_timestamp(value: &str) -> bool {
    OffsetDateTime::parse(value, &Iso8601::DEFAULT).is_ok()
        || PrimitiveDateTime::parse(value, &Iso8601::DEFAULT).is_ok()
}
