//! Retrieval collaborator: snippets relevant to a query, optionally scoped to one document.
//!
//! The engine never embeds or searches itself; it asks an external retrieval service
//! (`HttpRetriever`) or, when none is configured, gets nothing back (`NoRetriever`),
//! which makes every grounded item fall back to topic-only generation.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::error::CollaboratorError;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Snippet {
    /// Document the chunk came from (used for scope filtering).
    pub source_id: String,
    #[serde(default)]
    pub chunk_index: u32,
    pub text: String,
}

impl Snippet {
    /// Stable identifier recorded in question provenance.
    pub fn reference(&self) -> String {
        format!("{}::{}", self.source_id, self.chunk_index)
    }
}

/// One hit; `score` is higher-is-better when the backend reports one.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RetrievedSnippet {
    pub snippet: Snippet,
    #[serde(default)]
    pub score: Option<f32>,
}

#[async_trait]
pub trait Retriever: Send + Sync {
    /// Up to `top_k` hits for `text`; may be empty.
    async fn query(
        &self,
        text: &str,
        top_k: usize,
        scope: Option<&str>,
    ) -> Result<Vec<RetrievedSnippet>, CollaboratorError>;
}

#[derive(Clone, Default)]
pub struct NoRetriever;

#[async_trait]
impl Retriever for NoRetriever {
    async fn query(&self, _text: &str, _top_k: usize, _scope: Option<&str>) -> Result<Vec<RetrievedSnippet>, CollaboratorError> {
        Ok(Vec::new())
    }
}

#[derive(Serialize)]
struct QueryRequest<'a> {
    text: &'a str,
    top_k: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    scope: Option<&'a str>,
}

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    hits: Vec<RetrievedSnippet>,
}

/// JSON-over-HTTP client for an external retrieval service (`POST {base}/query`).
#[derive(Clone)]
pub struct HttpRetriever {
    client: reqwest::Client,
    base_url: String,
}

impl HttpRetriever {
    /// Construct the client if RETRIEVAL_URL is set; otherwise return None.
    pub fn from_env() -> Option<Self> {
        let base_url = std::env::var("RETRIEVAL_URL").ok().filter(|u| !u.trim().is_empty())?;
        let client = reqwest::Client::builder().timeout(Duration::from_secs(10)).build().ok()?;
        Some(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl Retriever for HttpRetriever {
    #[instrument(level = "debug", skip(self, text), fields(text_len = text.len(), scope = ?scope))]
    async fn query(&self, text: &str, top_k: usize, scope: Option<&str>) -> Result<Vec<RetrievedSnippet>, CollaboratorError> {
        let url = format!("{}/query", self.base_url);
        let res = self
            .client
            .post(&url)
            .header(USER_AGENT, "skillcheck-backend/0.1")
            .header(CONTENT_TYPE, "application/json")
            .json(&QueryRequest { text, top_k, scope })
            .send()
            .await?;

        if !res.status().is_success() {
            let status = res.status().as_u16();
            let message = res.text().await.unwrap_or_default();
            warn!(target: "generation", status, "Retrieval service returned an error");
            return Err(CollaboratorError::Status { status, message });
        }

        let body: QueryResponse = res.json().await?;
        debug!(target: "generation", hits = body.hits.len(), "Retrieval hits received");
        Ok(body.hits)
    }
}
