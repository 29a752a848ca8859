//! Configuration for the document pipeline

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Main pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PipelineConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Local storage locations
    #[serde(default)]
    pub storage: StorageConfig,
    /// MinerU extraction service
    #[serde(default)]
    pub mineru: MineruConfig,
    /// DeepSeek analysis service
    #[serde(default)]
    pub analysis: AnalysisConfig,
    /// Orchestration tuning
    #[serde(default)]
    pub processing: ProcessingConfig,
}

impl PipelineConfig {
    /// Load configuration from an optional TOML file, then apply environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path).map_err(|e| {
                    Error::Config(format!("Failed to read {}: {}", path.display(), e))
                })?;
                Self::from_toml(&content)?
            }
            None => Self::default(),
        };

        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Invalid config: {}", e)))
    }

    /// Override secrets and endpoints from the environment
    pub fn apply_env(&mut self) {
        if let Ok(token) = std::env::var("MINERU_API_TOKEN") {
            if !token.is_empty() {
                self.mineru.api_token = Some(token);
            }
        }
        if let Ok(key) = std::env::var("DEEPSEEK_API_KEY") {
            if !key.is_empty() {
                self.analysis.api_key = Some(key);
            }
        }
        if let Ok(url) = std::env::var("DEEPSEEK_BASE_URL") {
            if !url.is_empty() {
                self.analysis.base_url = url;
            }
        }
    }

    /// Reject settings the orchestrators cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.processing.poll_interval_ms == 0 {
            return Err(Error::Config("processing.poll_interval_ms must be > 0".to_string()));
        }
        if self.processing.max_poll_attempts == 0 {
            return Err(Error::Config("processing.max_poll_attempts must be > 0".to_string()));
        }
        if self.processing.max_concurrent_jobs == Some(0) {
            return Err(Error::Config("processing.max_concurrent_jobs must be > 0".to_string()));
        }
        if self.analysis.questions.is_empty() {
            return Err(Error::Config("analysis.questions must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host address
    pub host: String,
    /// Port number
    pub port: u16,
    /// Enable CORS
    pub enable_cors: bool,
    /// Maximum size of one uploaded file in bytes (default: 100MB)
    pub max_upload_size: usize,
    /// Maximum size of a whole multipart upload request in bytes (default: 1GB)
    pub max_request_size: usize,
    /// Externally reachable base URL, used to build blob URLs for the extraction service
    pub public_base_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            enable_cors: true,
            max_upload_size: 100 * 1024 * 1024, // 100MB
            max_request_size: 1024 * 1024 * 1024, // 1GB
            public_base_url: "http://127.0.0.1:8000".to_string(),
        }
    }
}

/// Storage locations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root for extracted artifacts and analysis output
    pub working_dir: PathBuf,
    /// SQLite database path (default: `<working_dir>/papers.db`)
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    /// Directory backing the local blob store (default: `<working_dir>/blobs`)
    #[serde(default)]
    pub blob_dir: Option<PathBuf>,
}

impl StorageConfig {
    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| self.working_dir.join("papers.db"))
    }

    pub fn blob_dir(&self) -> PathBuf {
        self.blob_dir
            .clone()
            .unwrap_or_else(|| self.working_dir.join("blobs"))
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let working_dir = dirs::data_local_dir()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
            .join("paper-pipeline")
            .join("working_dir");

        Self {
            working_dir,
            database_path: None,
            blob_dir: None,
        }
    }
}

/// MinerU extraction service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MineruConfig {
    /// API base URL
    pub base_url: String,
    /// Bearer token (usually from MINERU_API_TOKEN)
    #[serde(default)]
    pub api_token: Option<String>,
    /// Model version: `pipeline` or `vlm`
    pub model_version: String,
    /// Formula recognition
    pub enable_formula: bool,
    /// Table recognition
    pub enable_table: bool,
    /// Document language
    pub language: String,
    /// Force OCR
    pub is_ocr: bool,
    /// Page ranges, e.g. "1-600"
    #[serde(default)]
    pub page_ranges: Option<String>,
    /// Timeout for submit/status calls in seconds
    pub request_timeout_secs: u64,
    /// Timeout for downloading the result bundle in seconds
    pub download_timeout_secs: u64,
}

impl Default for MineruConfig {
    fn default() -> Self {
        Self {
            base_url: "https://mineru.net/api/v4".to_string(),
            api_token: None,
            model_version: "vlm".to_string(),
            enable_formula: true,
            enable_table: true,
            language: "ch".to_string(),
            is_ocr: false,
            page_ranges: None,
            request_timeout_secs: 30,
            download_timeout_secs: 300,
        }
    }
}

/// One analysis question, answered independently against the artifact
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AnalysisQuestion {
    /// Section name used as the key in the results map
    pub key: String,
    /// Prompt sent to the model
    pub prompt: String,
}

impl AnalysisQuestion {
    pub fn new(key: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            prompt: prompt.into(),
        }
    }
}

/// DeepSeek (OpenAI-compatible) analysis configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// API base URL
    pub base_url: String,
    /// API key (usually from DEEPSEEK_API_KEY)
    #[serde(default)]
    pub api_key: Option<String>,
    /// Chat model
    pub model: String,
    /// System prompt for every question
    pub system_prompt: String,
    /// Completion token budget
    pub max_tokens: u32,
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// Pause between questions in milliseconds
    pub question_delay_ms: u64,
    /// Ask the model to reason before answering (`thinking: {type: enabled}`)
    pub enable_thinking: bool,
    /// Questions asked for every document
    #[serde(default = "default_questions")]
    pub questions: Vec<AnalysisQuestion>,
}

fn default_questions() -> Vec<AnalysisQuestion> {
    vec![
        AnalysisQuestion::new("abstract", "请提取abstract部分并翻译为中文"),
        AnalysisQuestion::new("introduction", "请提取introduction部分并翻译为中文"),
    ]
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.deepseek.com".to_string(),
            api_key: None,
            model: "deepseek-reasoner".to_string(),
            system_prompt: "你是一个专业的学术论文分析助手，擅长理解和分析学术论文内容。"
                .to_string(),
            max_tokens: 65536,
            timeout_secs: 600,
            question_delay_ms: 1000,
            enable_thinking: true,
            questions: default_questions(),
        }
    }
}

/// Orchestration configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    /// Interval between job status polls in milliseconds (default: 10s)
    pub poll_interval_ms: u64,
    /// Hard cap on poll attempts before a job is treated as timed out (default: 300 ≈ 50 min)
    pub max_poll_attempts: u32,
    /// Delay between starts in a batch, in milliseconds (default: 500)
    pub batch_start_delay_ms: u64,
    /// Maximum batch-started orchestrations alive at once (default: CPU count, max 8)
    #[serde(default)]
    pub max_concurrent_jobs: Option<usize>,
    /// Re-attach to in-flight extraction jobs after a restart
    pub resume_on_startup: bool,
    /// Delete the source blob once the artifact is materialized
    pub delete_source_after_extraction: bool,
    /// File to pick out of the extraction bundle
    pub artifact_name: String,
}

impl ProcessingConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn batch_start_delay(&self) -> Duration {
        Duration::from_millis(self.batch_start_delay_ms)
    }

    pub fn max_concurrent_jobs(&self) -> usize {
        self.max_concurrent_jobs
            .unwrap_or_else(|| num_cpus::get().min(8))
    }
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 10_000,
            max_poll_attempts: 300,
            batch_start_delay_ms: 500,
            max_concurrent_jobs: None,
            resume_on_startup: true,
            delete_source_after_extraction: true,
            artifact_name: "full.md".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_source_behavior() {
        let config = PipelineConfig::default();
        assert_eq!(config.processing.poll_interval(), Duration::from_secs(10));
        assert_eq!(config.processing.max_poll_attempts, 300);
        assert_eq!(config.processing.batch_start_delay(), Duration::from_millis(500));
        assert_eq!(config.mineru.model_version, "vlm");
        assert_eq!(config.analysis.questions.len(), 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = PipelineConfig::from_toml(
            r#"
            [processing]
            max_poll_attempts = 5
            resume_on_startup = false

            [[analysis.questions]]
            key = "summary"
            prompt = "Summarize the paper"
            "#,
        )
        .unwrap();

        assert_eq!(config.processing.max_poll_attempts, 5);
        assert_eq!(config.processing.poll_interval_ms, 10_000);
        assert!(!config.processing.resume_on_startup);
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.analysis.questions.len(), 1);
        assert_eq!(config.analysis.questions[0].key, "summary");
    }

    #[test]
    fn test_validate_rejects_zero_budget() {
        let mut config = PipelineConfig::default();
        config.processing.max_poll_attempts = 0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = PipelineConfig::default();
        config.analysis.questions.clear();
        assert!(config.validate().is_err());
    }
}
