//! Client for OpenAI-compatible embeddings endpoints

use crate::error::{Error, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Serialize)]
struct EmbeddingsRequest<'a> {
    input: &'a [String],
    model: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    /// Position of the corresponding input; authoritative for ordering,
    /// servers may return `data` in any order.
    index: usize,
    embedding: Vec<f32>,
}

/// Batch client for `/embeddings`; one instance is shared by every source
pub struct EmbeddingClient {
    client: Client,
}

impl EmbeddingClient {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| Error::Embedding(format!("failed to create HTTP client: {e}")))?;

        Ok(Self { client })
    }

    /// Embed a batch of chunks, returning one vector per chunk in order.
    ///
    /// An empty API key is sent as a single dash so endpoints without
    /// authentication still accept the request.
    pub async fn embed(
        &self,
        base_url: &str,
        model: &str,
        api_key: &str,
        chunks: &[String],
    ) -> Result<Vec<Vec<f32>>> {
        if chunks.is_empty() {
            return Ok(Vec::new());
        }

        let endpoint = format!("{}/embeddings", base_url.trim_end_matches('/'));
        let key = if api_key.is_empty() { "-" } else { api_key };

        let response = self
            .client
            .post(&endpoint)
            .bearer_auth(key)
            .json(&EmbeddingsRequest { input: chunks, model })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Embedding(format!(
                "embeddings endpoint returned HTTP {status}"
            )));
        }

        let mut body: EmbeddingsResponse = response.json().await?;
        if body.data.len() != chunks.len() {
            return Err(Error::Embedding(format!(
                "expected {} embeddings, got {}",
                chunks.len(),
                body.data.len()
            )));
        }

        body.data.sort_by_key(|d| d.index);
        Ok(body.data.into_iter().map(|d| d.embedding).collect())
    }
}
