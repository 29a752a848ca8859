//! Download of extraction result bundles

use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;

use crate::error::{Error, Result};

/// Trait for fetching a finished job's result bundle
#[async_trait]
pub trait BundleFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Bytes>;
}

/// Plain HTTP GET with a generous timeout
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl BundleFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Bytes> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::materialization(format!("Bundle download failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::materialization(format!(
                "Bundle download failed ({}): {}",
                response.status(),
                url
            )));
        }

        response
            .bytes()
            .await
            .map_err(|e| Error::materialization(format!("Bundle download interrupted: {}", e)))
    }
}
