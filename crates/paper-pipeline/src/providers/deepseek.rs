//! DeepSeek analysis client (OpenAI-compatible chat completions)
//!
//! Every configured question is an independent conversation containing the
//! whole artifact. A failed question is recorded in place and the rest still run.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::config::{AnalysisConfig, AnalysisQuestion};
use crate::error::{Error, Result};

use super::analysis::AnalysisClient;

/// Prefix stored for a question that could not be answered
pub const FAILED_ANSWER_PREFIX: &str = "analysis failed: ";

/// Chat-completions client
pub struct DeepSeekClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    system_prompt: String,
    max_tokens: u32,
    enable_thinking: bool,
    question_delay: Duration,
    questions: Vec<AnalysisQuestion>,
}

impl DeepSeekClient {
    /// Create a client; fails without an API key
    pub fn new(config: &AnalysisConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                Error::Config("DeepSeek API key not configured (DEEPSEEK_API_KEY)".to_string())
            })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            model: config.model.clone(),
            system_prompt: config.system_prompt.clone(),
            max_tokens: config.max_tokens,
            enable_thinking: config.enable_thinking,
            question_delay: Duration::from_millis(config.question_delay_ms),
            questions: config.questions.clone(),
        })
    }

    fn request<'a>(&'a self, artifact_text: &str, question: &AnalysisQuestion) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: self.system_prompt.clone(),
                },
                ChatMessage {
                    role: "user",
                    content: user_message(artifact_text, &question.prompt),
                },
            ],
            stream: false,
            max_tokens: self.max_tokens,
            thinking: self.enable_thinking.then_some(Thinking { kind: "enabled" }),
        }
    }

    async fn ask(&self, artifact_text: &str, question: &AnalysisQuestion) -> Result<String> {
        let request = self.request(artifact_text, question);

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::collaborator(format!("DeepSeek request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::collaborator(format!(
                "DeepSeek completion failed ({}): {}",
                status, body
            )));
        }

        let completion: ChatResponse = response.json().await.map_err(|e| {
            Error::collaborator(format!("Failed to parse DeepSeek response: {}", e))
        })?;

        completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| Error::collaborator("No content in DeepSeek response"))
    }
}

fn user_message(artifact_text: &str, prompt: &str) -> String {
    format!(
        "以下是一篇学术论文的 Markdown 内容：\n\n{}\n\n问题：{}",
        artifact_text, prompt
    )
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    stream: bool,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    thinking: Option<Thinking>,
}

#[derive(Debug, Serialize)]
struct Thinking {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl AnalysisClient for DeepSeekClient {
    async fn analyze(&self, doc_key: &str, artifact_text: &str) -> Result<BTreeMap<String, String>> {
        let mut results = BTreeMap::new();
        let mut failures = Vec::new();

        for (i, question) in self.questions.iter().enumerate() {
            if i > 0 && !self.question_delay.is_zero() {
                tokio::time::sleep(self.question_delay).await;
            }

            tracing::info!("[{}] Asking [{}]", doc_key, question.key);
            match self.ask(artifact_text, question).await {
                Ok(answer) => {
                    tracing::info!(
                        "[{}] [{}] answered ({} chars)",
                        doc_key,
                        question.key,
                        answer.chars().count()
                    );
                    results.insert(question.key.clone(), answer);
                }
                Err(e) => {
                    tracing::warn!("[{}] [{}] failed: {}", doc_key, question.key, e);
                    results.insert(
                        question.key.clone(),
                        format!("{}{}", FAILED_ANSWER_PREFIX, e),
                    );
                    failures.push(e.to_string());
                }
            }
        }

        if !self.questions.is_empty() && failures.len() == self.questions.len() {
            return Err(Error::collaborator(format!(
                "all {} analysis questions failed: {}",
                failures.len(),
                failures.join("; ")
            )));
        }

        Ok(results)
    }

    fn name(&self) -> &str {
        "deepseek"
    }
}
