//! graphql indexing-service client

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::error::{MixerError, Result};

/// attempts after the first failed POST
pub const INDEXER_RETRIES: u32 = 3;

/// back-off grows by this much per attempt
pub const INDEXER_BACKOFF_STEP: Duration = Duration::from_secs(2);

#[async_trait]
pub trait GraphQuery: Send + Sync {
    fn endpoint(&self) -> &str;

    /// run `query` and return the response's `data` object
    async fn query(&self, query: &str, variables: Value) -> Result<Value>;
}

#[derive(Debug, Deserialize)]
struct GraphResponse {
    data: Option<Value>,
    errors: Option<Value>,
}

#[derive(Clone)]
pub struct IndexerClient {
    url: String,
    client: Client,
    retries: u32,
    backoff_step: Duration,
}

impl IndexerClient {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MixerError::Indexer(e.to_string()))?;
        Ok(Self {
            url: url.to_string(),
            client,
            retries: INDEXER_RETRIES,
            backoff_step: INDEXER_BACKOFF_STEP,
        })
    }

    pub fn with_retries(mut self, retries: u32, backoff_step: Duration) -> Self {
        self.retries = retries;
        self.backoff_step = backoff_step;
        self
    }

    async fn post_once(&self, payload: &Value) -> Result<Value> {
        let response = self
            .client
            .post(&self.url)
            .json(payload)
            .send()
            .await
            .map_err(|e| MixerError::Indexer(e.to_string()))?
            .error_for_status()
            .map_err(|e| MixerError::Indexer(e.to_string()))?;

        let body: GraphResponse = response
            .json()
            .await
            .map_err(|e| MixerError::Indexer(e.to_string()))?;

        if let Some(errors) = body.errors {
            return Err(MixerError::Indexer(format!("query rejected: {}", errors)));
        }
        body.data
            .ok_or_else(|| MixerError::Indexer("no data in response".into()))
    }
}

#[async_trait]
impl GraphQuery for IndexerClient {
    fn endpoint(&self) -> &str {
        &self.url
    }

    async fn query(&self, query: &str, variables: Value) -> Result<Value> {
        let payload = json!({ "query": query, "variables": variables });
        let mut attempt = 0;
        loop {
            tokio::time::sleep(self.backoff_step * attempt).await;
            match self.post_once(&payload).await {
                Ok(data) => return Ok(data),
                Err(e) if attempt < self.retries => {
                    debug!("indexer attempt {} failed: {}", attempt + 1, e);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
