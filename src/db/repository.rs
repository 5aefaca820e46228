use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, OptionalExtension, Row};
use tokio_rusqlite::Connection;

use crate::config::SourceDef;
use crate::error::Result;
use crate::models::{Article, NewArticle, Source, SourceStatus};

use super::parse_datetime;
use super::schema::SCHEMA;

/// Durable store of canonical article and source records.
pub struct Repository {
    conn: Connection,
}

/// Projection used by the similarity scan: titles always, bodies where the
/// stored record has one.
#[derive(Debug, Clone)]
pub struct SimilarityRow {
    pub id: i64,
    pub title: String,
    pub body: Option<String>,
    pub publish_date: Option<DateTime<Utc>>,
}

impl Repository {
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

    // Source operations

    /// Upsert configured sources by slug. Rows are never deleted here;
    /// removing a source from the config leaves its row (and its articles)
    /// untouched.
    pub async fn sync_sources(&self, defs: Vec<SourceDef>) -> Result<()> {
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                for def in &defs {
                    tx.execute(
                        r#"INSERT INTO sources (name, slug, home_url, language, status, cadence)
                           VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                           ON CONFLICT(slug) DO UPDATE SET
                               name = excluded.name,
                               home_url = excluded.home_url,
                               language = excluded.language,
                               status = excluded.status,
                               cadence = excluded.cadence,
                               updated_at = datetime('now')"#,
                        params![
                            def.name,
                            def.slug,
                            def.home_url,
                            def.language,
                            def.status.as_str(),
                            def.cadence,
                        ],
                    )?;
                }
                tx.commit()?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    #[allow(dead_code)]
    pub async fn get_source_by_slug(&self, slug: &str) -> Result<Option<Source>> {
        let slug = slug.to_string();
        let source = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, name, slug, home_url, language, status, cadence, created_at, updated_at
                     FROM sources WHERE slug = ?1",
                )?;
                let source = stmt
                    .query_row(params![slug], |row| Ok(source_from_row(row)))
                    .optional()?;
                Ok(source)
            })
            .await?;
        Ok(source)
    }

    pub async fn get_active_sources(&self) -> Result<Vec<Source>> {
        let sources = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, name, slug, home_url, language, status, cadence, created_at, updated_at
                     FROM sources WHERE status = 'active' ORDER BY slug",
                )?;
                let sources = stmt
                    .query_map([], |row| Ok(source_from_row(row)))?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(sources)
            })
            .await?;
        Ok(sources)
    }

    // Article operations

    #[allow(dead_code)]
    pub async fn get_article(&self, id: i64) -> Result<Option<Article>> {
        let article = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {ARTICLE_COLUMNS} FROM articles WHERE id = ?1"
                ))?;
                let article = stmt
                    .query_row(params![id], |row| Ok(article_from_row(row)))
                    .optional()?;
                Ok(article)
            })
            .await?;
        Ok(article)
    }

    pub async fn get_article_by_url(&self, url: &str) -> Result<Option<Article>> {
        let url = url.to_string();
        let article = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {ARTICLE_COLUMNS} FROM articles WHERE url = ?1"
                ))?;
                let article = stmt
                    .query_row(params![url], |row| Ok(article_from_row(row)))
                    .optional()?;
                Ok(article)
            })
            .await?;
        Ok(article)
    }

    /// Earliest-seen article carrying the given fingerprint. Syndicated
    /// copies always resolve to the first record we stored.
    pub async fn find_by_fingerprint(&self, fingerprint: &str) -> Result<Option<Article>> {
        let fingerprint = fingerprint.to_string();
        let article = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {ARTICLE_COLUMNS} FROM articles
                     WHERE fingerprint = ?1
                     ORDER BY first_seen ASC
                     LIMIT 1"
                ))?;
                let article = stmt
                    .query_row(params![fingerprint], |row| Ok(article_from_row(row)))
                    .optional()?;
                Ok(article)
            })
            .await?;
        Ok(article)
    }

    /// Candidate pool for the similarity scan. Bounded by the look-back
    /// window; optionally narrowed to publish dates within the
    /// time-proximity window around `around`.
    pub async fn similarity_pool(
        &self,
        lookback_days: i64,
        proximity: Option<(DateTime<Utc>, i64)>,
    ) -> Result<Vec<SimilarityRow>> {
        // first_seen rows carry sqlite's datetime() format, so the cutoff
        // must use the same shape to compare lexicographically.
        let cutoff = (Utc::now() - Duration::days(lookback_days))
            .format("%Y-%m-%d %H:%M:%S")
            .to_string();
        let window = proximity.map(|(around, hours)| {
            (
                (around - Duration::hours(hours)).to_rfc3339(),
                (around + Duration::hours(hours)).to_rfc3339(),
            )
        });
        let rows = self
            .conn
            .call(move |conn| {
                let rows = match &window {
                    Some((start, end)) => {
                        let mut stmt = conn.prepare(
                            "SELECT id, title, body, publish_date FROM articles
                             WHERE first_seen >= ?1
                               AND publish_date IS NOT NULL
                               AND publish_date BETWEEN ?2 AND ?3",
                        )?;
                        let rows = stmt
                            .query_map(params![cutoff, start, end], |row| {
                                Ok(similarity_row_from_row(row))
                            })?
                            .collect::<std::result::Result<Vec<_>, _>>()?;
                        rows
                    }
                    None => {
                        let mut stmt = conn.prepare(
                            "SELECT id, title, body, publish_date FROM articles WHERE first_seen >= ?1",
                        )?;
                        let rows = stmt
                            .query_map(params![cutoff], |row| Ok(similarity_row_from_row(row)))?
                            .collect::<std::result::Result<Vec<_>, _>>()?;
                        rows
                    }
                };
                Ok(rows)
            })
            .await?;
        Ok(rows)
    }

    pub async fn insert_article(&self, article: NewArticle) -> Result<i64> {
        let tags_json = serde_json::to_string(&article.tags)?;
        let id = self
            .conn
            .call(move |conn| {
                conn.execute(
                    r#"INSERT INTO articles
                       (url, title, body, author, publish_date, language, source_id,
                        fingerprint, is_paywalled, word_count, tags)
                       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"#,
                    params![
                        article.url,
                        article.title,
                        article.body,
                        article.author,
                        article.publish_date.map(|dt| dt.to_rfc3339()),
                        article.language,
                        article.source_id,
                        article.fingerprint,
                        article.is_paywalled,
                        article.word_count,
                        tags_json,
                    ],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await?;
        Ok(id)
    }

    /// Revise an existing record in place. Preserves first_seen, bumps
    /// last_updated.
    pub async fn update_article(&self, id: i64, article: NewArticle) -> Result<()> {
        let tags_json = serde_json::to_string(&article.tags)?;
        self.conn
            .call(move |conn| {
                conn.execute(
                    r#"UPDATE articles SET
                           title = ?1,
                           body = ?2,
                           author = ?3,
                           publish_date = ?4,
                           fingerprint = ?5,
                           is_paywalled = ?6,
                           word_count = ?7,
                           tags = ?8,
                           last_updated = datetime('now')
                       WHERE id = ?9"#,
                    params![
                        article.title,
                        article.body,
                        article.author,
                        article.publish_date.map(|dt| dt.to_rfc3339()),
                        article.fingerprint,
                        article.is_paywalled,
                        article.word_count,
                        tags_json,
                        id,
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Recency range read used by the API layer.
    #[allow(dead_code)]
    pub async fn articles_since(&self, since: DateTime<Utc>, limit: i64) -> Result<Vec<Article>> {
        let since = since.format("%Y-%m-%d %H:%M:%S").to_string();
        let articles = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {ARTICLE_COLUMNS} FROM articles
                     WHERE first_seen >= ?1
                     ORDER BY publish_date DESC NULLS LAST, first_seen DESC
                     LIMIT ?2"
                ))?;
                let articles = stmt
                    .query_map(params![since, limit], |row| Ok(article_from_row(row)))?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(articles)
            })
            .await?;
        Ok(articles)
    }
}

const ARTICLE_COLUMNS: &str = "id, url, title, body, author, publish_date, first_seen, \
                               last_updated, language, source_id, fingerprint, is_paywalled, \
                               word_count, tags";

fn article_from_row(row: &Row) -> Article {
    let tags: Vec<String> = row
        .get::<_, String>(13)
        .ok()
        .and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_default();
    Article {
        id: row.get(0).unwrap(),
        url: row.get(1).unwrap(),
        title: row.get(2).unwrap(),
        body: row.get(3).unwrap(),
        author: row.get(4).unwrap(),
        publish_date: row
            .get::<_, Option<String>>(5)
            .unwrap()
            .and_then(|s| parse_datetime(&s)),
        first_seen: row
            .get::<_, String>(6)
            .ok()
            .and_then(|s| parse_datetime(&s))
            .unwrap_or_else(Utc::now),
        last_updated: row
            .get::<_, String>(7)
            .ok()
            .and_then(|s| parse_datetime(&s))
            .unwrap_or_else(Utc::now),
        language: row.get(8).unwrap(),
        source_id: row.get(9).unwrap(),
        fingerprint: row.get(10).unwrap(),
        is_paywalled: row.get::<_, i64>(11).unwrap() != 0,
        word_count: row.get(12).unwrap(),
        tags,
    }
}

fn similarity_row_from_row(row: &Row) -> SimilarityRow {
    SimilarityRow {
        id: row.get(0).unwrap(),
        title: row.get(1).unwrap(),
        body: row.get(2).unwrap(),
        publish_date: row
            .get::<_, Option<String>>(3)
            .unwrap()
            .and_then(|s| parse_datetime(&s)),
    }
}

fn source_from_row(row: &Row) -> Source {
    Source {
        id: row.get(0).unwrap(),
        name: row.get(1).unwrap(),
        slug: row.get(2).unwrap(),
        home_url: row.get(3).unwrap(),
        language: row.get(4).unwrap(),
        status: row
            .get::<_, String>(5)
            .ok()
            .and_then(|s| SourceStatus::parse(&s))
            .unwrap_or(SourceStatus::Active),
        cadence: row.get(6).unwrap(),
        created_at: row
            .get::<_, String>(7)
            .ok()
            .and_then(|s| parse_datetime(&s))
            .unwrap_or_else(Utc::now),
        updated_at: row
            .get::<_, String>(8)
            .ok()
            .and_then(|s| parse_datetime(&s))
            .unwrap_or_else(Utc::now),
    }
}
