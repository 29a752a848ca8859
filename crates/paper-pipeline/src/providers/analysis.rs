//! Analysis client trait (LLM-based section analysis)

use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::error::Result;

/// Trait for the remote analysis service
///
/// Implementations:
/// - `DeepSeekClient`: OpenAI-compatible chat completions, one request per question
#[async_trait]
pub trait AnalysisClient: Send + Sync {
    /// Analyze the artifact text, returning section name to answer text
    async fn analyze(&self, doc_key: &str, artifact_text: &str) -> Result<BTreeMap<String, String>>;

    /// Get provider name for logging
    fn name(&self) -> &str;
}
