//! HTTP client for the external embedding capability.
//!
//! One request per batch: a list of texts, the embedding kind, the model
//! identifier, and an optional query instruction. The response carries one
//! base64 byte-blob per input, in input order, each of length
//! `dimension × sizeof(precision)`.
//!
//! Calls are blocking from the engine's point of view; the watcher paths
//! run the whole pipeline on blocking tasks so no async worker is held up.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::{EngineConfig, Precision};
use crate::error::EngineError;

/// What the text will be used for; asymmetric models embed the two sides
/// differently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingKind {
    Document,
    Query,
}

impl EmbeddingKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EmbeddingKind::Document => "document",
            EmbeddingKind::Query => "query",
        }
    }
}

/// The embedding capability as the engine sees it. The HTTP implementation
/// below is the production seam; tests substitute deterministic providers.
pub trait EmbeddingProvider: Send + Sync {
    /// Embed `texts`, returning one raw byte-blob per input in input order.
    fn embed(&self, texts: &[String], kind: EmbeddingKind) -> Result<Vec<Vec<u8>>, EngineError>;

    fn model(&self) -> &str;
    fn dimension(&self) -> usize;
    fn precision(&self) -> Precision;
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    input: &'a [String],
    kind: &'static str,
    model: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    instruction: Option<&'a str>,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<String>,
}

/// Blocking HTTP implementation of the embedding capability.
pub struct HttpEmbeddingProvider {
    client: Client,
    endpoint: String,
    model: String,
    dimension: usize,
    precision: Precision,
    query_instruction: Option<String>,
}

impl HttpEmbeddingProvider {
    pub fn new(config: &EngineConfig) -> Result<Self, EngineError> {
        let mut headers = HeaderMap::new();
        if let Some(key) = &config.api_key {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", key)).map_err(|_| {
                EngineError::EmbeddingPermanent(
                    "api key contains invalid header characters".to_string(),
                )
            })?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .default_headers(headers)
            .build()
            .map_err(|e| {
                EngineError::EmbeddingPermanent(format!("failed to build HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            dimension: config.dimension,
            precision: config.precision,
            query_instruction: config.query_instruction.clone(),
        })
    }

    fn expected_blob_len(&self) -> usize {
        self.dimension * self.precision.element_size()
    }
}

impl EmbeddingProvider for HttpEmbeddingProvider {
    fn embed(&self, texts: &[String], kind: EmbeddingKind) -> Result<Vec<Vec<u8>>, EngineError> {
        let request = EmbedRequest {
            input: texts,
            kind: kind.as_str(),
            model: &self.model,
            instruction: match kind {
                EmbeddingKind::Query => self.query_instruction.as_deref(),
                EmbeddingKind::Document => None,
            },
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(map_status_error(status, &body));
        }

        let payload: EmbedResponse = response.json().map_err(|e| {
            EngineError::EmbeddingPermanent(format!("failed to decode response: {}", e))
        })?;

        if payload.embeddings.len() != texts.len() {
            return Err(EngineError::EmbeddingPermanent(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                payload.embeddings.len()
            )));
        }

        let expected = self.expected_blob_len();
        let mut blobs = Vec::with_capacity(payload.embeddings.len());
        for encoded in payload.embeddings {
            let blob = BASE64.decode(&encoded).map_err(|e| {
                EngineError::EmbeddingPermanent(format!("invalid base64 embedding: {}", e))
            })?;
            if blob.len() != expected {
                return Err(EngineError::invariant(format!(
                    "embedding blob of {} bytes, expected {} ({} × {}-byte {})",
                    blob.len(),
                    expected,
                    self.dimension,
                    self.precision.element_size(),
                    self.precision.as_str()
                )));
            }
            blobs.push(blob);
        }

        Ok(blobs)
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn precision(&self) -> Precision {
        self.precision
    }
}

fn map_transport_error(error: reqwest::Error) -> EngineError {
    // Connection and timeout failures are worth retrying; anything else in
    // the transport layer is not.
    if error.is_timeout() || error.is_connect() {
        EngineError::EmbeddingTransient(error.to_string())
    } else {
        EngineError::EmbeddingPermanent(error.to_string())
    }
}

fn map_status_error(status: StatusCode, body: &str) -> EngineError {
    let summary = format!("{}: {}", status, body.chars().take(200).collect::<String>());
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::BAD_REQUEST => {
            EngineError::EmbeddingPermanent(summary)
        }
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            EngineError::EmbeddingTransient(summary)
        }
        s if s.is_server_error() => EngineError::EmbeddingTransient(summary),
        _ => EngineError::EmbeddingPermanent(summary),
    }
}
