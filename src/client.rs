use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};

use crate::error::SyncError;

/// Fetches a distribution payload. One attempt per call, no retries.
pub trait DistributionClient: Send + Sync {
    fn download(&self, url: &str) -> Result<Vec<u8>, SyncError>;
}

#[derive(Clone)]
pub struct CatalogHttpClient {
    client: Client,
}

impl CatalogHttpClient {
    pub fn new(timeout: Option<Duration>) -> Result<Self, SyncError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("catalog-sync/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| SyncError::Http(err.to_string()))?,
        );
        let mut builder = Client::builder().default_headers(headers);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|err| SyncError::Http(err.to_string()))?;
        Ok(Self { client })
    }

    fn handle_status(
        response: reqwest::blocking::Response,
    ) -> Result<reqwest::blocking::Response, SyncError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .ok()
            .map(|body| body.trim().chars().take(200).collect::<String>())
            .filter(|body| !body.is_empty())
            .unwrap_or_else(|| "download request failed".to_string());
        Err(SyncError::HttpStatus { status, message })
    }
}

impl DistributionClient for CatalogHttpClient {
    fn download(&self, url: &str) -> Result<Vec<u8>, SyncError> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|err| SyncError::Http(err.to_string()))?;
        let response = Self::handle_status(response)?;
        let bytes = response
            .bytes()
            .map_err(|err| SyncError::Http(err.to_string()))?;
        Ok(bytes.to_vec())
    }
}
