use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Aborted,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Aborted => "aborted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(RunStatus::Running),
            "completed" => Some(RunStatus::Completed),
            "failed" => Some(RunStatus::Failed),
            "aborted" => Some(RunStatus::Aborted),
            _ => None,
        }
    }
}

/// One ingestion cycle as recorded in the ledger.
#[derive(Debug, Clone, Serialize)]
pub struct RunRecord {
    pub run_id: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub articles_created: i64,
    pub articles_updated: i64,
    pub articles_skipped: i64,
    pub sources_processed: i64,
    pub sources_failed: i64,
    pub duration_seconds: i64,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeStatus {
    Succeeded,
    Failed,
    Skipped,
}

impl OutcomeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeStatus::Succeeded => "succeeded",
            OutcomeStatus::Failed => "failed",
            OutcomeStatus::Skipped => "skipped",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "succeeded" => Some(OutcomeStatus::Succeeded),
            "failed" => Some(OutcomeStatus::Failed),
            "skipped" => Some(OutcomeStatus::Skipped),
            _ => None,
        }
    }
}

/// Per-source outcome within a run. Owned by its parent run row.
#[derive(Debug, Clone)]
pub struct SourceOutcome {
    pub source_slug: String,
    pub status: OutcomeStatus,
    pub articles_created: i64,
    pub articles_updated: i64,
    pub articles_skipped: i64,
    pub duration_ms: i64,
    pub error_message: Option<String>,
}

impl SourceOutcome {
    pub fn skipped(slug: &str) -> Self {
        Self {
            source_slug: slug.to_string(),
            status: OutcomeStatus::Skipped,
            articles_created: 0,
            articles_updated: 0,
            articles_skipped: 0,
            duration_ms: 0,
            error_message: None,
        }
    }

    pub fn failed(slug: &str, duration_ms: i64, error: String) -> Self {
        Self {
            source_slug: slug.to_string(),
            status: OutcomeStatus::Failed,
            articles_created: 0,
            articles_updated: 0,
            articles_skipped: 0,
            duration_ms,
            error_message: Some(error),
        }
    }
}

/// Aggregate result of one cycle, returned by the orchestrator and written
/// into the run's final ledger entry.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub articles_created: i64,
    pub articles_updated: i64,
    pub articles_skipped: i64,
    pub sources_processed: i64,
    pub sources_failed: i64,
    pub sources_skipped: i64,
}

impl RunSummary {
    pub fn absorb(&mut self, outcome: &SourceOutcome) {
        self.articles_created += outcome.articles_created;
        self.articles_updated += outcome.articles_updated;
        self.articles_skipped += outcome.articles_skipped;
        match outcome.status {
            OutcomeStatus::Succeeded => self.sources_processed += 1,
            OutcomeStatus::Failed => self.sources_failed += 1,
            OutcomeStatus::Skipped => self.sources_skipped += 1,
        }
    }
}

/// Additive counters merged into one day's statistics row.
#[derive(Debug, Clone, Copy, Default)]
pub struct DailyDelta {
    pub articles_processed: i64,
    pub duplicates_url: i64,
    pub duplicates_fingerprint: i64,
    pub duplicates_title: i64,
    pub articles_updated: i64,
    pub articles_skipped: i64,
    /// Total detection latency for the processed articles, in milliseconds.
    /// Folded into the day's running average weighted by processed count.
    pub detection_ms_total: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DailyStats {
    pub day: NaiveDate,
    pub articles_processed: i64,
    pub duplicates_url: i64,
    pub duplicates_fingerprint: i64,
    pub duplicates_title: i64,
    pub articles_updated: i64,
    pub articles_skipped: i64,
    pub avg_detection_ms: f64,
}
