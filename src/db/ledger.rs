use chrono::{NaiveDate, Utc};
use rusqlite::{params, OptionalExtension, Row};
use tokio_rusqlite::Connection;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{DailyDelta, DailyStats, OutcomeStatus, RunRecord, RunStatus, RunSummary, SourceOutcome};

use super::parse_datetime;
use super::schema::SCHEMA;

/// Durable record of ingestion cycle lifecycles and aggregated statistics.
/// Run rows are append/finalize only; daily statistics are upserted by date
/// with additive merges.
pub struct Ledger {
    conn: Connection,
}

impl Ledger {
    pub async fn new(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path).await?;

        conn.call(|conn| {
            conn.execute_batch("PRAGMA foreign_keys = ON;")?;
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;

        Ok(Self { conn })
    }

    /// Open a new run in `running` state. The identifier is supplied by the
    /// caller so it can be recorded in the cycle lock before this row exists.
    pub async fn begin_run(&self, run_id: &str) -> Result<()> {
        let id = run_id.to_string();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO runs (run_id, status) VALUES (?1, 'running')",
                    params![id],
                )?;
                Ok(())
            })
            .await?;
        tracing::info!(run_id = %run_id, "started ingestion run");
        Ok(())
    }

    /// Fresh globally-unique run identifier.
    pub fn new_run_id() -> String {
        Uuid::new_v4().to_string()
    }

    pub async fn record_source_outcome(&self, run_id: &str, outcome: SourceOutcome) -> Result<()> {
        let run_id = run_id.to_string();
        self.conn
            .call(move |conn| {
                conn.execute(
                    r#"INSERT INTO run_sources
                       (run_id, source_slug, status, articles_created, articles_updated,
                        articles_skipped, duration_ms, error_message)
                       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"#,
                    params![
                        run_id,
                        outcome.source_slug,
                        outcome.status.as_str(),
                        outcome.articles_created,
                        outcome.articles_updated,
                        outcome.articles_skipped,
                        outcome.duration_ms,
                        outcome.error_message,
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Transition a run to a terminal state. Guarded so the transition can
    /// happen at most once; a repeat call is a warning, not an error.
    pub async fn finalize_run(
        &self,
        run_id: &str,
        status: RunStatus,
        summary: &RunSummary,
        duration_seconds: i64,
        error_message: Option<String>,
    ) -> Result<()> {
        let id = run_id.to_string();
        let summary = summary.clone();
        let changed = self
            .conn
            .call(move |conn| {
                let changed = conn.execute(
                    r#"UPDATE runs SET
                           status = ?1,
                           completed_at = datetime('now'),
                           articles_created = ?2,
                           articles_updated = ?3,
                           articles_skipped = ?4,
                           sources_processed = ?5,
                           sources_failed = ?6,
                           duration_seconds = ?7,
                           error_message = ?8
                       WHERE run_id = ?9 AND status = 'running'"#,
                    params![
                        status.as_str(),
                        summary.articles_created,
                        summary.articles_updated,
                        summary.articles_skipped,
                        summary.sources_processed,
                        summary.sources_failed,
                        duration_seconds,
                        error_message,
                        id,
                    ],
                )?;
                Ok(changed)
            })
            .await?;

        if changed == 0 {
            tracing::warn!(run_id = %run_id, "finalize_run on a run that is not running");
        } else {
            tracing::info!(run_id = %run_id, status = status.as_str(), "finalized ingestion run");
        }
        Ok(())
    }

    /// Additive merge into one day's statistics row. Counters add; the
    /// latency average is re-weighted by processed counts, so merges
    /// commute and can arrive in any order.
    pub async fn merge_daily_stats(&self, day: NaiveDate, delta: DailyDelta) -> Result<()> {
        let day = day.format("%Y-%m-%d").to_string();
        self.conn
            .call(move |conn| {
                conn.execute(
                    r#"INSERT INTO daily_stats
                       (day, articles_processed, duplicates_url, duplicates_fingerprint,
                        duplicates_title, articles_updated, articles_skipped, avg_detection_ms)
                       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7,
                               CASE WHEN ?2 > 0 THEN CAST(?8 AS REAL) / ?2 ELSE 0 END)
                       ON CONFLICT(day) DO UPDATE SET
                           avg_detection_ms = CASE
                               WHEN articles_processed + excluded.articles_processed > 0
                               THEN (avg_detection_ms * articles_processed + ?8)
                                    / (articles_processed + excluded.articles_processed)
                               ELSE 0 END,
                           articles_processed = articles_processed + excluded.articles_processed,
                           duplicates_url = duplicates_url + excluded.duplicates_url,
                           duplicates_fingerprint = duplicates_fingerprint + excluded.duplicates_fingerprint,
                           duplicates_title = duplicates_title + excluded.duplicates_title,
                           articles_updated = articles_updated + excluded.articles_updated,
                           articles_skipped = articles_skipped + excluded.articles_skipped"#,
                    params![
                        day,
                        delta.articles_processed,
                        delta.duplicates_url,
                        delta.duplicates_fingerprint,
                        delta.duplicates_title,
                        delta.articles_updated,
                        delta.articles_skipped,
                        delta.detection_ms_total,
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    // Read side for operational tooling

    #[allow(dead_code)]
    pub async fn get_run(&self, run_id: &str) -> Result<Option<RunRecord>> {
        let run_id = run_id.to_string();
        let run = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {RUN_COLUMNS} FROM runs WHERE run_id = ?1"
                ))?;
                let run = stmt
                    .query_row(params![run_id], |row| Ok(run_from_row(row)))
                    .optional()?;
                Ok(run)
            })
            .await?;
        Ok(run)
    }

    pub async fn recent_runs(&self, limit: i64) -> Result<Vec<RunRecord>> {
        let runs = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {RUN_COLUMNS} FROM runs ORDER BY started_at DESC LIMIT ?1"
                ))?;
                let runs = stmt
                    .query_map(params![limit], |row| Ok(run_from_row(row)))?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(runs)
            })
            .await?;
        Ok(runs)
    }

    #[allow(dead_code)]
    pub async fn run_sources(&self, run_id: &str) -> Result<Vec<SourceOutcome>> {
        let run_id = run_id.to_string();
        let outcomes = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT source_slug, status, articles_created, articles_updated,
                            articles_skipped, duration_ms, error_message
                     FROM run_sources WHERE run_id = ?1 ORDER BY recorded_at",
                )?;
                let outcomes = stmt
                    .query_map(params![run_id], |row| Ok(outcome_from_row(row)))?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(outcomes)
            })
            .await?;
        Ok(outcomes)
    }

    #[allow(dead_code)]
    pub async fn daily_stats(&self, day: NaiveDate) -> Result<Option<DailyStats>> {
        let key = day.format("%Y-%m-%d").to_string();
        let stats = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT day, articles_processed, duplicates_url, duplicates_fingerprint,
                            duplicates_title, articles_updated, articles_skipped, avg_detection_ms
                     FROM daily_stats WHERE day = ?1",
                )?;
                let stats = stmt
                    .query_row(params![key], |row| Ok(stats_from_row(row)))
                    .optional()?;
                Ok(stats)
            })
            .await?;
        Ok(stats)
    }
}

const RUN_COLUMNS: &str = "run_id, status, started_at, completed_at, articles_created, \
                           articles_updated, articles_skipped, sources_processed, \
                           sources_failed, duration_seconds, error_message";

fn run_from_row(row: &Row) -> RunRecord {
    RunRecord {
        run_id: row.get(0).unwrap(),
        status: row
            .get::<_, String>(1)
            .ok()
            .and_then(|s| RunStatus::parse(&s))
            .unwrap_or(RunStatus::Failed),
        started_at: row
            .get::<_, String>(2)
            .ok()
            .and_then(|s| parse_datetime(&s))
            .unwrap_or_else(Utc::now),
        completed_at: row
            .get::<_, Option<String>>(3)
            .unwrap()
            .and_then(|s| parse_datetime(&s)),
        articles_created: row.get(4).unwrap(),
        articles_updated: row.get(5).unwrap(),
        articles_skipped: row.get(6).unwrap(),
        sources_processed: row.get(7).unwrap(),
        sources_failed: row.get(8).unwrap(),
        duration_seconds: row.get(9).unwrap(),
        error_message: row.get(10).unwrap(),
    }
}

fn outcome_from_row(row: &Row) -> SourceOutcome {
    SourceOutcome {
        source_slug: row.get(0).unwrap(),
        status: row
            .get::<_, String>(1)
            .ok()
            .and_then(|s| OutcomeStatus::parse(&s))
            .unwrap_or(OutcomeStatus::Failed),
        articles_created: row.get(2).unwrap(),
        articles_updated: row.get(3).unwrap(),
        articles_skipped: row.get(4).unwrap(),
        duration_ms: row.get(5).unwrap(),
        error_message: row.get(6).unwrap(),
    }
}

fn stats_from_row(row: &Row) -> DailyStats {
    DailyStats {
        day: row
            .get::<_, String>(0)
            .ok()
            .and_then(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok())
            .unwrap_or_else(|| Utc::now().date_naive()),
        articles_processed: row.get(1).unwrap(),
        duplicates_url: row.get(2).unwrap(),
        duplicates_fingerprint: row.get(3).unwrap(),
        duplicates_title: row.get(4).unwrap(),
        articles_updated: row.get(5).unwrap(),
        articles_skipped: row.get(6).unwrap(),
        avg_detection_ms: row.get(7).unwrap(),
    }
}
