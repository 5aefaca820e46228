use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::{ArticleCandidate, Source};

/// The external scraping collaborator: given a source, produce zero or
/// more article candidates. A per-source hard failure surfaces as an error
/// value, never as a candidate.
#[async_trait]
pub trait ExtractionAgent: Send + Sync {
    async fn extract(&self, source: &Source) -> Result<Vec<ArticleCandidate>>;
}

#[derive(Debug, Serialize)]
struct ExtractRequest<'a> {
    source: &'a str,
    home_url: Option<&'a str>,
    language: &'a str,
}

#[derive(Debug, Deserialize)]
struct ExtractResponse {
    articles: Vec<ArticleCandidate>,
}

/// HTTP client for the extraction-agent service.
pub struct HttpExtractionAgent {
    client: Client,
    endpoint: String,
}

impl HttpExtractionAgent {
    pub fn new(endpoint: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .connect_timeout(Duration::from_secs(10))
            .user_agent("newswatch/0.1")
            .build()
            .expect("Failed to create HTTP client");

        Self { client, endpoint }
    }
}

#[async_trait]
impl ExtractionAgent for HttpExtractionAgent {
    async fn extract(&self, source: &Source) -> Result<Vec<ArticleCandidate>> {
        let request = ExtractRequest {
            source: &source.slug,
            home_url: source.home_url.as_deref(),
            language: &source.language,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AppError::Extraction(format!(
                "agent returned HTTP {} for {}",
                response.status(),
                source.slug
            )));
        }

        let body: ExtractResponse = response.json().await?;
        tracing::debug!(
            source = %source.slug,
            candidates = body.articles.len(),
            "extraction agent returned candidates"
        );
        Ok(body.articles)
    }
}
