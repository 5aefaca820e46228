use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A canonical article record as stored in the repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    pub id: i64,
    pub url: String,
    pub title: String,
    /// Absent for access-restricted (paywalled) pages.
    pub body: Option<String>,
    pub author: Option<String>,
    pub publish_date: Option<DateTime<Utc>>,
    pub first_seen: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub language: String,
    pub source_id: i64,
    /// Hex SHA-256 over the normalized body. Derived, never supplied by callers.
    pub fingerprint: String,
    pub is_paywalled: bool,
    pub word_count: i64,
    pub tags: Vec<String>,
}

/// A freshly extracted article awaiting a duplicate-detection decision.
///
/// Produced by the external extraction agent; `fingerprint` and timestamps
/// are filled in on our side.
#[derive(Debug, Clone, Deserialize)]
pub struct ArticleCandidate {
    pub url: String,
    pub title: String,
    pub body: Option<String>,
    pub author: Option<String>,
    pub publish_date: Option<DateTime<Utc>>,
    pub language: String,
    #[serde(default)]
    pub is_paywalled: bool,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl ArticleCandidate {
    /// Candidates without a URL or title are discarded at the orchestrator
    /// boundary before reaching the detector.
    pub fn is_well_formed(&self) -> bool {
        !self.url.trim().is_empty()
            && !self.title.trim().is_empty()
            && url::Url::parse(&self.url).is_ok()
    }

    pub fn word_count(&self) -> i64 {
        self.body
            .as_deref()
            .map(|b| b.split_whitespace().count() as i64)
            .unwrap_or(0)
    }
}

/// An article row ready for insert, with derived fields attached.
#[derive(Debug, Clone)]
pub struct NewArticle {
    pub url: String,
    pub title: String,
    pub body: Option<String>,
    pub author: Option<String>,
    pub publish_date: Option<DateTime<Utc>>,
    pub language: String,
    pub source_id: i64,
    pub fingerprint: String,
    pub is_paywalled: bool,
    pub word_count: i64,
    pub tags: Vec<String>,
}

/// Why an existing record matched a candidate.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchReason {
    ExactUrl,
    Fingerprint,
    TitleSimilarity { score: f64 },
    /// Weighted title-plus-body similarity; catches lightly edited copies
    /// whose fingerprints differ and whose titles were rephrased.
    ContentSimilarity { score: f64 },
}

/// Outcome of duplicate detection for one candidate.
#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    New,
    UpdateOf { id: i64 },
    DuplicateOf { id: i64, reason: MatchReason },
}
