//! MinerU v4 extraction API client

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::MineruConfig;
use crate::error::{Error, Result};

use super::extraction::{ExtractionJobClient, ExtractionJobState, ExtractionOptions};

/// HTTP client for `{base_url}/extract/task`
pub struct MineruClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl MineruClient {
    /// Create a client; fails without an API token
    pub fn new(config: &MineruConfig) -> Result<Self> {
        let token = config
            .api_token
            .clone()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                Error::Config("MinerU API token not configured (MINERU_API_TOKEN)".to_string())
            })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        what: &str,
    ) -> Result<T> {
        let response = request
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| Error::collaborator(format!("MinerU {} request failed: {}", what, e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::collaborator(format!(
                "MinerU {} failed ({}): {}",
                what, status, body
            )));
        }

        let envelope: Envelope<T> = response.json().await.map_err(|e| {
            Error::collaborator(format!("Failed to parse MinerU {} response: {}", what, e))
        })?;

        if envelope.code != 0 {
            return Err(Error::collaborator(format!(
                "MinerU API error: {}",
                envelope.msg.unwrap_or_else(|| "unknown error".to_string())
            )));
        }

        envelope
            .data
            .ok_or_else(|| Error::collaborator(format!("MinerU {} response has no data", what)))
    }
}

#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
struct Envelope<T> {
    code: i64,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    data: Option<T>,
}

#[derive(Debug, Serialize)]
struct SubmitRequest<'a> {
    url: &'a str,
    #[serde(flatten)]
    options: &'a ExtractionOptions,
}

#[derive(Debug, Deserialize)]
struct SubmitData {
    task_id: String,
}

#[derive(Debug, Deserialize)]
struct TaskData {
    #[serde(default)]
    state: String,
    #[serde(default)]
    full_zip_url: Option<String>,
    #[serde(default)]
    err_msg: Option<String>,
    #[serde(default)]
    extract_progress: Option<ExtractProgress>,
}

#[derive(Debug, Deserialize)]
struct ExtractProgress {
    #[serde(default)]
    extracted_pages: Option<u64>,
    #[serde(default)]
    total_pages: Option<u64>,
}

fn job_state(data: TaskData) -> ExtractionJobState {
    match data.state.as_str() {
        "done" => match data.full_zip_url.filter(|u| !u.is_empty()) {
            Some(bundle_url) => ExtractionJobState::Done { bundle_url },
            None => ExtractionJobState::Failed {
                reason: "extraction finished without a result bundle URL".to_string(),
            },
        },
        "failed" | "error" => ExtractionJobState::Failed {
            reason: data
                .err_msg
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| "extraction failed".to_string()),
        },
        _ => ExtractionJobState::Pending {
            progress: data.extract_progress.and_then(|p| {
                match (p.extracted_pages, p.total_pages) {
                    (Some(done), Some(total)) => Some(format!("{}/{} pages", done, total)),
                    _ => None,
                }
            }),
        },
    }
}

#[async_trait]
impl ExtractionJobClient for MineruClient {
    async fn submit(&self, source_url: &str, options: &ExtractionOptions) -> Result<String> {
        let endpoint = format!("{}/extract/task", self.base_url);
        let body = SubmitRequest {
            url: source_url,
            options,
        };

        let data: SubmitData = self
            .send(self.client.post(&endpoint).json(&body), "submit")
            .await?;

        if data.task_id.is_empty() {
            return Err(Error::collaborator("MinerU returned an empty task_id"));
        }
        Ok(data.task_id)
    }

    async fn status(&self, job_id: &str) -> Result<ExtractionJobState> {
        let endpoint = format!("{}/extract/task/{}", self.base_url, job_id);
        let data: TaskData = self.send(self.client.get(&endpoint), "status").await?;
        Ok(job_state(data))
    }

    fn name(&self) -> &str {
        "mineru"
    }
}
