use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::stream::{self, StreamExt};
use tokio::sync::watch;

use crate::config::Config;
use crate::db::{Ledger, Repository};
use crate::dedup::{fingerprint, Detector};
use crate::error::Result;
use crate::extract::ExtractionAgent;
use crate::models::{
    ArticleCandidate, Classification, DailyDelta, MatchReason, NewArticle, OutcomeStatus,
    RunStatus, RunSummary, Source, SourceOutcome,
};

/// One ingestion cycle: iterate the configured sources, run every candidate
/// through the duplicate detector, apply the matching repository write, and
/// record per-source outcomes to the ledger as it goes.
pub struct Orchestrator {
    repo: Arc<Repository>,
    ledger: Arc<Ledger>,
    agent: Arc<dyn ExtractionAgent>,
    config: Config,
}

struct SourceResult {
    outcome: SourceOutcome,
    delta: DailyDelta,
}

impl Orchestrator {
    pub fn new(
        repo: Arc<Repository>,
        ledger: Arc<Ledger>,
        agent: Arc<dyn ExtractionAgent>,
        config: Config,
    ) -> Self {
        Self {
            repo,
            ledger,
            agent,
            config,
        }
    }

    /// Run one cycle over the given sources. Per-source failures are
    /// contained; only repository/ledger errors are fatal and bubble up
    /// as `Err`. The returned status is `aborted` when a shutdown cut
    /// sources off, `failed` when a majority of attempted sources failed,
    /// and `completed` otherwise.
    pub async fn run_cycle(
        &self,
        run_id: &str,
        sources: Vec<Source>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<(RunStatus, RunSummary)> {
        let mut summary = RunSummary::default();

        // Sources have no ordering dependency on each other, so they run
        // under a bounded pool. Writes all funnel through one sqlite
        // connection, which serializes the per-URL upsert.
        let results: Vec<Result<SourceResult>> = stream::iter(sources)
            .map(|source| {
                let shutdown = shutdown.clone();
                async move {
                    // Cancellation is cooperative and checked only at
                    // source boundaries; an in-flight source finishes its
                    // writes.
                    if *shutdown.borrow() {
                        tracing::info!(source = %source.slug, "shutdown requested, skipping source");
                        return Ok(SourceResult {
                            outcome: SourceOutcome::skipped(&source.slug),
                            delta: DailyDelta::default(),
                        });
                    }
                    self.process_source(&source).await
                }
            })
            .buffer_unordered(self.config.max_concurrent_sources)
            .collect()
            .await;

        let mut delta = DailyDelta::default();
        for result in results {
            let result = result?;
            self.ledger
                .record_source_outcome(run_id, result.outcome.clone())
                .await?;
            summary.absorb(&result.outcome);
            delta = merge_deltas(delta, result.delta);
        }

        self.ledger
            .merge_daily_stats(Utc::now().date_naive(), delta)
            .await?;

        let attempted = summary.sources_processed + summary.sources_failed;
        let status = if summary.sources_skipped > 0 && *shutdown.borrow() {
            RunStatus::Aborted
        } else if attempted > 0 && summary.sources_failed * 2 > attempted {
            RunStatus::Failed
        } else {
            RunStatus::Completed
        };

        Ok((status, summary))
    }

    /// Extract and ingest one source. Extraction failures and timeouts
    /// become a `failed` outcome; repository errors propagate.
    async fn process_source(&self, source: &Source) -> Result<SourceResult> {
        let start = Instant::now();
        let timeout = Duration::from_secs(self.config.source_timeout_secs);

        let candidates = match tokio::time::timeout(timeout, self.agent.extract(source)).await {
            Ok(Ok(candidates)) => candidates,
            Ok(Err(e)) => {
                tracing::warn!(source = %source.slug, error = %e, "extraction failed");
                return Ok(SourceResult {
                    outcome: SourceOutcome::failed(
                        &source.slug,
                        start.elapsed().as_millis() as i64,
                        e.to_string(),
                    ),
                    delta: DailyDelta::default(),
                });
            }
            Err(_) => {
                tracing::warn!(source = %source.slug, "extraction timed out");
                return Ok(SourceResult {
                    outcome: SourceOutcome::failed(
                        &source.slug,
                        start.elapsed().as_millis() as i64,
                        format!("extraction timed out after {}s", timeout.as_secs()),
                    ),
                    delta: DailyDelta::default(),
                });
            }
        };

        let detector = Detector::new(&self.repo, self.config.detection.clone());
        let mut outcome = SourceOutcome {
            source_slug: source.slug.clone(),
            status: OutcomeStatus::Succeeded,
            articles_created: 0,
            articles_updated: 0,
            articles_skipped: 0,
            duration_ms: 0,
            error_message: None,
        };
        let mut delta = DailyDelta::default();

        for candidate in candidates {
            // Malformed candidates never reach the detector.
            if !candidate.is_well_formed() {
                tracing::debug!(source = %source.slug, url = %candidate.url, "discarding malformed candidate");
                outcome.articles_skipped += 1;
                delta.articles_skipped += 1;
                continue;
            }

            let detect_start = Instant::now();
            let classification = detector.classify(&candidate).await?;
            delta.articles_processed += 1;
            delta.detection_ms_total += detect_start.elapsed().as_millis() as i64;

            match classification {
                Classification::New => {
                    let id = self
                        .repo
                        .insert_article(new_article(source.id, &candidate))
                        .await?;
                    tracing::debug!(source = %source.slug, article_id = id, url = %candidate.url, "stored new article");
                    outcome.articles_created += 1;
                }
                Classification::UpdateOf { id } => {
                    self.repo
                        .update_article(id, new_article(source.id, &candidate))
                        .await?;
                    tracing::debug!(source = %source.slug, article_id = id, url = %candidate.url, "updated revised article");
                    outcome.articles_updated += 1;
                    delta.articles_updated += 1;
                }
                Classification::DuplicateOf { id, reason } => {
                    tracing::debug!(
                        source = %source.slug,
                        article_id = id,
                        url = %candidate.url,
                        reason = ?reason,
                        "discarding duplicate"
                    );
                    outcome.articles_skipped += 1;
                    delta.articles_skipped += 1;
                    match reason {
                        MatchReason::ExactUrl => delta.duplicates_url += 1,
                        MatchReason::Fingerprint => delta.duplicates_fingerprint += 1,
                        MatchReason::TitleSimilarity { .. }
                        | MatchReason::ContentSimilarity { .. } => delta.duplicates_title += 1,
                    }
                }
            }
        }

        outcome.duration_ms = start.elapsed().as_millis() as i64;
        tracing::info!(
            source = %source.slug,
            created = outcome.articles_created,
            updated = outcome.articles_updated,
            skipped = outcome.articles_skipped,
            duration_ms = outcome.duration_ms,
            "source processed"
        );
        Ok(SourceResult { outcome, delta })
    }
}

fn new_article(source_id: i64, candidate: &ArticleCandidate) -> NewArticle {
    NewArticle {
        url: candidate.url.clone(),
        title: candidate.title.clone(),
        body: candidate.body.clone(),
        author: candidate.author.clone(),
        publish_date: candidate.publish_date,
        language: candidate.language.clone(),
        source_id,
        fingerprint: fingerprint(candidate.body.as_deref()),
        is_paywalled: candidate.is_paywalled,
        word_count: candidate.word_count(),
        tags: candidate.tags.clone(),
    }
}

fn merge_deltas(a: DailyDelta, b: DailyDelta) -> DailyDelta {
    DailyDelta {
        articles_processed: a.articles_processed + b.articles_processed,
        duplicates_url: a.duplicates_url + b.duplicates_url,
        duplicates_fingerprint: a.duplicates_fingerprint + b.duplicates_fingerprint,
        duplicates_title: a.duplicates_title + b.duplicates_title,
        articles_updated: a.articles_updated + b.articles_updated,
        articles_skipped: a.articles_skipped + b.articles_skipped,
        detection_ms_total: a.detection_ms_total + b.detection_ms_total,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use async_trait::async_trait;
    use chrono::Utc;

    /// Canned extraction agent: per-slug candidate lists, designated
    /// failing slugs.
    struct FakeAgent {
        failing: Vec<String>,
        candidates: Vec<(String, Vec<ArticleCandidate>)>,
    }

    #[async_trait]
    impl ExtractionAgent for FakeAgent {
        async fn extract(&self, source: &Source) -> Result<Vec<ArticleCandidate>> {
            if self.failing.contains(&source.slug) {
                return Err(AppError::Extraction(format!(
                    "simulated timeout for {}",
                    source.slug
                )));
            }
            Ok(self
                .candidates
                .iter()
                .find(|(slug, _)| *slug == source.slug)
                .map(|(_, c)| c.clone())
                .unwrap_or_default())
        }
    }

    async fn fixture(agent: FakeAgent, slugs: &[&str]) -> (tempfile::TempDir, Orchestrator, Vec<Source>, Arc<Ledger>) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db").to_str().unwrap().to_string();
        let repo = Arc::new(Repository::new(&path).await.unwrap());
        let ledger = Arc::new(Ledger::new(&path).await.unwrap());

        let defs: Vec<_> = slugs
            .iter()
            .map(|slug| crate::config::SourceDef {
                slug: slug.to_string(),
                name: slug.to_string(),
                home_url: None,
                language: "de".into(),
                status: crate::models::SourceStatus::Active,
                cadence: "daily".into(),
            })
            .collect();
        repo.sync_sources(defs).await.unwrap();
        let sources = repo.get_active_sources().await.unwrap();

        let config = Config {
            db_path: path,
            ..Default::default()
        };
        let orchestrator = Orchestrator::new(repo, ledger.clone(), Arc::new(agent), config);
        (dir, orchestrator, sources, ledger)
    }

    fn candidate(url: &str, title: &str, body: &str) -> ArticleCandidate {
        ArticleCandidate {
            url: url.into(),
            title: title.into(),
            body: Some(body.into()),
            author: None,
            publish_date: Some(Utc::now()),
            language: "de".into(),
            is_paywalled: false,
            tags: Vec::new(),
        }
    }

    fn no_shutdown() -> watch::Receiver<bool> {
        watch::channel(false).1
    }

    #[tokio::test]
    async fn one_failing_source_does_not_fail_the_cycle() {
        let slugs = ["s1", "s2", "s3", "s4", "s5"];
        let agent = FakeAgent {
            failing: vec!["s3".into()],
            candidates: slugs
                .iter()
                .map(|slug| {
                    (
                        slug.to_string(),
                        vec![candidate(
                            &format!("https://{slug}.ch/a"),
                            &format!("Story from {slug}"),
                            &format!("Body text unique to {slug}."),
                        )],
                    )
                })
                .collect(),
        };
        let (_dir, orchestrator, sources, ledger) = fixture(agent, &slugs).await;

        let run_id = Ledger::new_run_id();
        ledger.begin_run(&run_id).await.unwrap();
        let (status, summary) = orchestrator
            .run_cycle(&run_id, sources, no_shutdown())
            .await
            .unwrap();

        assert_eq!(status, RunStatus::Completed);
        assert_eq!(summary.sources_processed, 4);
        assert_eq!(summary.sources_failed, 1);
        assert_eq!(summary.articles_created, 4);

        let outcomes = ledger.run_sources(&run_id).await.unwrap();
        assert_eq!(outcomes.len(), 5);
        let failed: Vec<_> = outcomes
            .iter()
            .filter(|o| o.status == OutcomeStatus::Failed)
            .collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].source_slug, "s3");
        assert!(failed[0].error_message.is_some());
    }

    #[tokio::test]
    async fn majority_failure_fails_the_cycle() {
        let slugs = ["s1", "s2", "s3"];
        let agent = FakeAgent {
            failing: vec!["s1".into(), "s2".into()],
            candidates: vec![(
                "s3".into(),
                vec![candidate("https://s3.ch/a", "Story", "Body.")],
            )],
        };
        let (_dir, orchestrator, sources, ledger) = fixture(agent, &slugs).await;

        let run_id = Ledger::new_run_id();
        ledger.begin_run(&run_id).await.unwrap();
        let (status, summary) = orchestrator
            .run_cycle(&run_id, sources, no_shutdown())
            .await
            .unwrap();

        assert_eq!(status, RunStatus::Failed);
        assert_eq!(summary.sources_failed, 2);
        assert_eq!(summary.sources_processed, 1);
    }

    #[tokio::test]
    async fn malformed_candidates_are_counted_skipped() {
        let agent = FakeAgent {
            failing: vec![],
            candidates: vec![(
                "s1".into(),
                vec![
                    candidate("https://s1.ch/a", "Good story", "Body."),
                    ArticleCandidate {
                        url: "".into(),
                        title: "No url".into(),
                        body: Some("Body.".into()),
                        author: None,
                        publish_date: None,
                        language: "de".into(),
                        is_paywalled: false,
                        tags: Vec::new(),
                    },
                    ArticleCandidate {
                        url: "https://s1.ch/b".into(),
                        title: "   ".into(),
                        body: None,
                        author: None,
                        publish_date: None,
                        language: "de".into(),
                        is_paywalled: false,
                        tags: Vec::new(),
                    },
                ],
            )],
        };
        let (_dir, orchestrator, sources, ledger) = fixture(agent, &["s1"]).await;

        let run_id = Ledger::new_run_id();
        ledger.begin_run(&run_id).await.unwrap();
        let (status, summary) = orchestrator
            .run_cycle(&run_id, sources, no_shutdown())
            .await
            .unwrap();

        assert_eq!(status, RunStatus::Completed);
        assert_eq!(summary.articles_created, 1);
        assert_eq!(summary.articles_skipped, 2);
    }

    #[tokio::test]
    async fn repeated_cycle_reports_duplicates_and_updates() {
        let slugs = ["s1"];
        let make_agent = |body: &str| FakeAgent {
            failing: vec![],
            candidates: vec![(
                "s1".into(),
                vec![candidate("https://x.ch/a", "Storm hits Zurich", body)],
            )],
        };

        let (_dir, orchestrator, sources, ledger) = fixture(make_agent("First version."), &slugs).await;

        let run_id = Ledger::new_run_id();
        ledger.begin_run(&run_id).await.unwrap();
        let (_, summary) = orchestrator
            .run_cycle(&run_id, sources.clone(), no_shutdown())
            .await
            .unwrap();
        assert_eq!(summary.articles_created, 1);

        // Same URL, revised body: update, not a new row.
        let orchestrator = Orchestrator {
            agent: Arc::new(make_agent("Second, revised version.")),
            ..orchestrator
        };
        let run_id = Ledger::new_run_id();
        ledger.begin_run(&run_id).await.unwrap();
        let (_, summary) = orchestrator
            .run_cycle(&run_id, sources.clone(), no_shutdown())
            .await
            .unwrap();
        assert_eq!(summary.articles_created, 0);
        assert_eq!(summary.articles_updated, 1);

        // Identical page once more: duplicate, skipped.
        let run_id = Ledger::new_run_id();
        ledger.begin_run(&run_id).await.unwrap();
        let (_, summary) = orchestrator
            .run_cycle(&run_id, sources, no_shutdown())
            .await
            .unwrap();
        assert_eq!(summary.articles_created, 0);
        assert_eq!(summary.articles_updated, 0);
        assert_eq!(summary.articles_skipped, 1);
    }

    #[tokio::test]
    async fn shutdown_before_start_aborts_with_skips() {
        let agent = FakeAgent {
            failing: vec![],
            candidates: vec![(
                "s1".into(),
                vec![candidate("https://s1.ch/a", "Story", "Body.")],
            )],
        };
        let (_dir, orchestrator, sources, ledger) = fixture(agent, &["s1", "s2"]).await;

        let (tx, rx) = watch::channel(true);
        let run_id = Ledger::new_run_id();
        ledger.begin_run(&run_id).await.unwrap();
        let (status, summary) = orchestrator.run_cycle(&run_id, sources, rx).await.unwrap();
        drop(tx);

        assert_eq!(status, RunStatus::Aborted);
        assert_eq!(summary.sources_skipped, 2);
        assert_eq!(summary.articles_created, 0);
    }
}
