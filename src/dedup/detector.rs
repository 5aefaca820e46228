use crate::config::DetectionConfig;
use crate::db::Repository;
use crate::error::Result;
use crate::models::{ArticleCandidate, Classification, MatchReason};

use super::text::{content_similarity, fingerprint, title_similarity, ZERO_FINGERPRINT};

/// Weights of the combined title/body score compared against
/// `content_threshold`.
const TITLE_WEIGHT: f64 = 0.6;
const CONTENT_WEIGHT: f64 = 0.4;

/// Layered duplicate detection over repository reads plus an immutable
/// configuration snapshot. Owns no persistent state.
///
/// Signals are evaluated in order of ascending cost and short-circuit on
/// the first confident match: exact URL, body fingerprint, then title and
/// weighted title/body similarity bounded by the look-back window.
pub struct Detector<'a> {
    repo: &'a Repository,
    config: DetectionConfig,
}

impl<'a> Detector<'a> {
    pub fn new(repo: &'a Repository, config: DetectionConfig) -> Self {
        Self { repo, config }
    }

    pub async fn classify(&self, candidate: &ArticleCandidate) -> Result<Classification> {
        let fp = fingerprint(candidate.body.as_deref());

        // A URL hit is never New: either the content was revised in place
        // (update) or we are re-seeing the identical page (duplicate).
        if let Some(existing) = self.repo.get_article_by_url(&candidate.url).await? {
            if existing.fingerprint == fp {
                return Ok(Classification::DuplicateOf {
                    id: existing.id,
                    reason: MatchReason::ExactUrl,
                });
            }
            return Ok(Classification::UpdateOf { id: existing.id });
        }

        // Identical body under a different URL: syndication or a mirror.
        // The zero sentinel never matches, and paywalled candidates are
        // exempt from content comparison entirely.
        if self.config.enable_fingerprint && !candidate.is_paywalled && fp != ZERO_FINGERPRINT {
            if let Some(existing) = self.repo.find_by_fingerprint(&fp).await? {
                return Ok(Classification::DuplicateOf {
                    id: existing.id,
                    reason: MatchReason::Fingerprint,
                });
            }
        }

        if self.config.enable_title_similarity {
            if let Some((id, reason)) = self.best_similarity_match(candidate).await? {
                return Ok(Classification::DuplicateOf { id, reason });
            }
        }

        Ok(Classification::New)
    }

    /// Scan the look-back window (and, when enabled, the publish-time
    /// proximity window around the candidate) for the best similarity
    /// match. A row qualifies by title alone at or above the title
    /// threshold, or by the weighted title/body score at or above the
    /// content threshold. Ties on score go to the most recently published
    /// record.
    async fn best_similarity_match(
        &self,
        candidate: &ArticleCandidate,
    ) -> Result<Option<(i64, MatchReason)>> {
        let proximity = if self.config.enable_time_proximity {
            candidate
                .publish_date
                .map(|d| (d, self.config.time_proximity_hours))
        } else {
            None
        };

        let pool = self
            .repo
            .similarity_pool(self.config.lookback_days, proximity)
            .await?;

        // Paywalled candidates are exempt from body comparison, same as
        // the fingerprint layer.
        let body = if candidate.is_paywalled {
            None
        } else {
            candidate.body.as_deref()
        };

        let mut best: Option<(i64, f64, MatchReason, Option<chrono::DateTime<chrono::Utc>>)> =
            None;
        for row in pool {
            let title_score = title_similarity(&candidate.title, &row.title);

            let mut hit: Option<(f64, MatchReason)> = None;
            if title_score >= self.config.title_threshold {
                hit = Some((title_score, MatchReason::TitleSimilarity { score: title_score }));
            }
            if let (Some(body), Some(row_body)) = (body, row.body.as_deref()) {
                let overall = TITLE_WEIGHT * title_score
                    + CONTENT_WEIGHT * content_similarity(body, row_body);
                if overall >= self.config.content_threshold
                    && hit.as_ref().map(|(s, _)| overall > *s).unwrap_or(true)
                {
                    hit = Some((overall, MatchReason::ContentSimilarity { score: overall }));
                }
            }
            let (score, reason) = match hit {
                Some(hit) => hit,
                None => continue,
            };

            let replace = match &best {
                None => true,
                Some((_, best_score, _, best_date)) => {
                    score > best_score + 1e-9
                        || ((score - best_score).abs() <= 1e-9 && row.publish_date > *best_date)
                }
            };
            if replace {
                best = Some((row.id, score, reason, row.publish_date));
            }
        }

        Ok(best.map(|(id, _, reason, _)| (id, reason)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewArticle;
    use chrono::{Duration, Utc};

    async fn test_repo() -> (tempfile::TempDir, Repository, i64, String) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db").to_str().unwrap().to_string();
        let repo = Repository::new(&path).await.unwrap();
        repo.sync_sources(vec![crate::config::SourceDef {
            slug: "nzz".into(),
            name: "Neue Zürcher Zeitung".into(),
            home_url: None,
            language: "de".into(),
            status: crate::models::SourceStatus::Active,
            cadence: "daily".into(),
        }])
        .await
        .unwrap();
        let source_id = repo.get_source_by_slug("nzz").await.unwrap().unwrap().id;
        (dir, repo, source_id, path)
    }

    fn candidate(url: &str, title: &str, body: Option<&str>) -> ArticleCandidate {
        ArticleCandidate {
            url: url.into(),
            title: title.into(),
            body: body.map(Into::into),
            author: None,
            publish_date: Some(Utc::now()),
            language: "de".into(),
            is_paywalled: false,
            tags: Vec::new(),
        }
    }

    fn stored(source_id: i64, c: &ArticleCandidate) -> NewArticle {
        NewArticle {
            url: c.url.clone(),
            title: c.title.clone(),
            body: c.body.clone(),
            author: c.author.clone(),
            publish_date: c.publish_date,
            language: c.language.clone(),
            source_id,
            fingerprint: fingerprint(c.body.as_deref()),
            is_paywalled: c.is_paywalled,
            word_count: c.word_count(),
            tags: c.tags.clone(),
        }
    }

    #[tokio::test]
    async fn novel_candidate_is_new() {
        let (_dir, repo, _sid, _path) = test_repo().await;
        let detector = Detector::new(&repo, DetectionConfig::default());

        let c = candidate("https://x.ch/a", "Storm hits Zurich", Some("Heavy winds."));
        assert_eq!(detector.classify(&c).await.unwrap(), Classification::New);
    }

    #[tokio::test]
    async fn same_url_same_body_is_duplicate_then_revision_is_update() {
        let (_dir, repo, sid, _path) = test_repo().await;
        let detector = Detector::new(&repo, DetectionConfig::default());

        let first = candidate("https://x.ch/a", "Storm hits Zurich", Some("Heavy winds."));
        assert_eq!(detector.classify(&first).await.unwrap(), Classification::New);
        let id = repo.insert_article(stored(sid, &first)).await.unwrap();

        // Identical page seen again.
        match detector.classify(&first).await.unwrap() {
            Classification::DuplicateOf { id: got, reason } => {
                assert_eq!(got, id);
                assert_eq!(reason, MatchReason::ExactUrl);
            }
            other => panic!("expected duplicate, got {other:?}"),
        }

        // Same URL, revised body.
        let revised = candidate(
            "https://x.ch/a",
            "Storm hits Zurich",
            Some("Heavy winds and flooding across the canton."),
        );
        assert_eq!(
            detector.classify(&revised).await.unwrap(),
            Classification::UpdateOf { id }
        );
    }

    #[tokio::test]
    async fn syndicated_body_across_outlets_is_duplicate_of_earliest() {
        let (_dir, repo, sid, _path) = test_repo().await;
        let detector = Detector::new(&repo, DetectionConfig::default());

        let original = candidate("https://a.ch/1", "Storm hits Zurich", Some("Shared wire text."));
        let id = repo.insert_article(stored(sid, &original)).await.unwrap();

        let mirror = candidate("https://b.ch/1", "Sturm über Zürich", Some("Shared wire text."));
        match detector.classify(&mirror).await.unwrap() {
            Classification::DuplicateOf { id: got, reason } => {
                assert_eq!(got, id);
                assert_eq!(reason, MatchReason::Fingerprint);
            }
            other => panic!("expected fingerprint duplicate, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn paywalled_empty_bodies_never_match_each_other() {
        let (_dir, repo, sid, _path) = test_repo().await;
        let detector = Detector::new(&repo, DetectionConfig::default());

        let mut first = candidate("https://a.ch/paid", "Exclusive report", None);
        first.is_paywalled = true;
        repo.insert_article(stored(sid, &first)).await.unwrap();

        let mut second = candidate("https://b.ch/paid", "Completely different story", None);
        second.is_paywalled = true;
        assert_eq!(detector.classify(&second).await.unwrap(), Classification::New);
    }

    #[tokio::test]
    async fn near_identical_title_within_window_is_duplicate_with_score() {
        let (_dir, repo, sid, _path) = test_repo().await;
        let detector = Detector::new(&repo, DetectionConfig::default());

        let seen = candidate(
            "https://a.ch/storm",
            "Sturm trifft Zürich mit voller Wucht",
            Some("Ein schwerer Sturm."),
        );
        let id = repo.insert_article(stored(sid, &seen)).await.unwrap();

        let rephrased = candidate(
            "https://b.ch/storm",
            "Sturm trifft Zürich mit voller Wucht!",
            Some("Anderer Text, gleiche Geschichte."),
        );
        match detector.classify(&rephrased).await.unwrap() {
            Classification::DuplicateOf { id: got, reason } => {
                assert_eq!(got, id);
                match reason {
                    MatchReason::TitleSimilarity { score } => assert!(score >= 0.85),
                    other => panic!("expected title similarity, got {other:?}"),
                }
            }
            other => panic!("expected duplicate, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn lightly_edited_copy_is_caught_by_weighted_content_similarity() {
        let (_dir, repo, sid, _path) = test_repo().await;
        // Title threshold pinned to 1.0 so only the weighted title/body
        // score can match the non-identical titles below.
        let mut config = DetectionConfig::default();
        config.title_threshold = 1.0;
        let detector = Detector::new(&repo, config.clone());

        let seen = candidate(
            "https://a.ch/storm",
            "Sturm trifft Zürich mit voller Wucht",
            Some("Der Sturm erreichte Zürich am frühen Morgen und deckte zahlreiche Dächer ab. Mehrere Strassen wurden gesperrt."),
        );
        let id = repo.insert_article(stored(sid, &seen)).await.unwrap();

        // One sentence appended, one word added to the title: the
        // fingerprint misses and the titles are not identical.
        let edited = candidate(
            "https://b.ch/storm",
            "Sturm trifft Zürich mit voller Wucht heute",
            Some("Der Sturm erreichte Zürich am frühen Morgen und deckte zahlreiche Dächer ab. Mehrere Strassen wurden gesperrt. Die Feuerwehr stand im Dauereinsatz."),
        );
        match detector.classify(&edited).await.unwrap() {
            Classification::DuplicateOf { id: got, reason } => {
                assert_eq!(got, id);
                match reason {
                    MatchReason::ContentSimilarity { score } => {
                        assert!(score >= config.content_threshold)
                    }
                    other => panic!("expected content similarity, got {other:?}"),
                }
            }
            other => panic!("expected duplicate, got {other:?}"),
        }

        // Raising the content threshold to the ceiling turns the same
        // candidate back into New, so the knob is observable.
        let mut strict = config;
        strict.content_threshold = 1.0;
        let detector = Detector::new(&repo, strict);
        assert_eq!(
            detector.classify(&edited).await.unwrap(),
            Classification::New
        );
    }

    #[tokio::test]
    async fn title_tie_resolves_to_most_recently_published() {
        let (_dir, repo, sid, _path) = test_repo().await;
        let detector = Detector::new(&repo, DetectionConfig::default());

        let mut older = candidate(
            "https://a.ch/1",
            "Sturm trifft Zürich mit voller Wucht",
            Some("Früher Bericht."),
        );
        older.publish_date = Some(Utc::now() - Duration::hours(20));
        repo.insert_article(stored(sid, &older)).await.unwrap();

        let mut newer = candidate(
            "https://b.ch/1",
            "Sturm trifft Zürich mit voller Wucht",
            Some("Späterer Bericht."),
        );
        newer.publish_date = Some(Utc::now() - Duration::hours(1));
        let newer_id = repo.insert_article(stored(sid, &newer)).await.unwrap();

        // Both stored titles score identically; the later publish wins.
        let fresh = candidate(
            "https://c.ch/1",
            "Sturm trifft Zürich mit voller Wucht",
            Some("Dritter, anderer Text."),
        );
        match detector.classify(&fresh).await.unwrap() {
            Classification::DuplicateOf { id, .. } => assert_eq!(id, newer_id),
            other => panic!("expected duplicate, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn title_match_outside_proximity_window_is_new() {
        let (_dir, repo, sid, _path) = test_repo().await;
        let detector = Detector::new(&repo, DetectionConfig::default());

        let mut old = candidate(
            "https://a.ch/old",
            "Sturm trifft Zürich mit voller Wucht",
            Some("Alter Artikel."),
        );
        old.publish_date = Some(Utc::now() - Duration::days(10));
        repo.insert_article(stored(sid, &old)).await.unwrap();

        // Same title, published well outside the 24h proximity window.
        let fresh = candidate(
            "https://b.ch/new",
            "Sturm trifft Zürich mit voller Wucht",
            Some("Neuer, anderer Text."),
        );
        assert_eq!(detector.classify(&fresh).await.unwrap(), Classification::New);
    }

    #[tokio::test]
    async fn title_scan_never_reaches_past_the_lookback_window() {
        let (_dir, repo, sid, path) = test_repo().await;
        let mut config = DetectionConfig::default();
        config.enable_time_proximity = false;
        let detector = Detector::new(&repo, config);

        let old = candidate(
            "https://a.ch/ancient",
            "Sturm trifft Zürich mit voller Wucht",
            Some("Archivtext."),
        );
        repo.insert_article(stored(sid, &old)).await.unwrap();

        // Backdate the stored row past the 90-day look-back window.
        let conn = rusqlite::Connection::open(&path).unwrap();
        conn.execute(
            "UPDATE articles SET first_seen = datetime('now', '-120 days')",
            [],
        )
        .unwrap();
        drop(conn);

        let fresh = candidate(
            "https://b.ch/new",
            "Sturm trifft Zürich mit voller Wucht",
            Some("Neuer Text."),
        );
        assert_eq!(detector.classify(&fresh).await.unwrap(), Classification::New);
    }

    #[tokio::test]
    async fn disabled_checks_are_skipped() {
        let (_dir, repo, sid, _path) = test_repo().await;
        let mut config = DetectionConfig::default();
        config.enable_fingerprint = false;
        config.enable_title_similarity = false;
        let detector = Detector::new(&repo, config);

        let original = candidate("https://a.ch/1", "Storm hits Zurich", Some("Shared text."));
        repo.insert_article(stored(sid, &original)).await.unwrap();

        // Identical body, different URL: with both checks off this is New.
        let mirror = candidate("https://b.ch/1", "Storm hits Zurich", Some("Shared text."));
        assert_eq!(detector.classify(&mirror).await.unwrap(), Classification::New);
    }
}
