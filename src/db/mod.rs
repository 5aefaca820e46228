mod ledger;
mod repository;
mod schema;

pub use ledger::Ledger;
pub use repository::Repository;

use chrono::{DateTime, Utc};

/// Parse timestamps as stored by sqlite or by us (RFC3339).
pub(crate) fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }
    None
}
