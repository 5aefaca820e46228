use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Operating status of a news source. Sources are soft-deactivated via
/// status changes and never hard-deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceStatus {
    Active,
    Discontinued,
    Suspended,
    Merged,
}

impl SourceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceStatus::Active => "active",
            SourceStatus::Discontinued => "discontinued",
            SourceStatus::Suspended => "suspended",
            SourceStatus::Merged => "merged",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(SourceStatus::Active),
            "discontinued" => Some(SourceStatus::Discontinued),
            "suspended" => Some(SourceStatus::Suspended),
            "merged" => Some(SourceStatus::Merged),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub id: i64,
    pub name: String,
    /// Stable key used to match configuration entries to rows.
    pub slug: String,
    pub home_url: Option<String>,
    pub language: String,
    pub status: SourceStatus,
    /// Publication cadence label, e.g. "daily" or "hourly".
    pub cadence: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
