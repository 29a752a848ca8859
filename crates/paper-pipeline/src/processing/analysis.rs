//! Analysis orchestration: artifact text -> LLM answers -> `done`

use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::OwnedSemaphorePermit;

use crate::error::{Error, Result};
use crate::processing::lifecycle::{self, Transition};
use crate::processing::materialize::Materializer;
use crate::processing::registry::{TaskHandle, TaskKind, TaskRegistry};
use crate::providers::AnalysisClient;
use crate::storage::DocumentStore;

/// Drives documents from `extracted` to `done`
#[derive(Clone)]
pub struct AnalysisOrchestrator {
    store: DocumentStore,
    registry: TaskRegistry,
    client: Arc<dyn AnalysisClient>,
    materializer: Materializer,
}

impl AnalysisOrchestrator {
    pub fn new(
        store: DocumentStore,
        registry: TaskRegistry,
        client: Arc<dyn AnalysisClient>,
        materializer: Materializer,
    ) -> Self {
        Self {
            store,
            registry,
            client,
            materializer,
        }
    }

    /// Start analysis for one document
    pub fn start(&self, doc_key: &str) -> Result<()> {
        self.start_inner(doc_key, None)
    }

    /// Start analysis holding a batch concurrency permit for the whole run
    pub fn start_with_permit(&self, doc_key: &str, permit: OwnedSemaphorePermit) -> Result<()> {
        self.start_inner(doc_key, Some(permit))
    }

    fn start_inner(&self, doc_key: &str, permit: Option<OwnedSemaphorePermit>) -> Result<()> {
        let handle = self.registry.try_acquire(doc_key, TaskKind::Analysis)?;

        let record = self.store.require(doc_key)?;
        lifecycle::check(&record, &Transition::StartAnalysis)?;
        self.store.transition(doc_key, Transition::StartAnalysis)?;
        tracing::info!("[{}] Analysis started ({})", doc_key, self.client.name());

        let this = self.clone();
        tokio::spawn(async move {
            let _permit = permit;
            this.run(handle).await;
        });

        Ok(())
    }

    async fn run(&self, handle: TaskHandle) {
        let doc_key = handle.doc_key().to_string();
        let cancel = handle.token().clone();

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Canceled),
            results = self.analyze(&doc_key) => results,
        };

        let transition = match outcome {
            Ok(results) => {
                tracing::info!("[{}] Analysis complete ({} sections)", doc_key, results.len());
                Transition::AnalysisSucceeded { results }
            }
            Err(e) if e.is_canceled() => {
                tracing::info!("[{}] Analysis stopped", doc_key);
                Transition::Stop
            }
            Err(e) => {
                tracing::error!("[{}] Analysis failed: {}", doc_key, e);
                Transition::Fail { reason: e.reason() }
            }
        };

        if let Err(e) = self.store.transition(&doc_key, transition) {
            tracing::error!("[{}] Failed to record analysis outcome: {}", doc_key, e);
        }
        drop(handle);
    }

    async fn analyze(&self, doc_key: &str) -> Result<BTreeMap<String, String>> {
        let record = self.store.require(doc_key)?;
        let artifact_path = record.artifact_path.ok_or_else(|| {
            Error::validation(format!("[{}] no extracted artifact to analyze", doc_key))
        })?;

        let text = self.materializer.read_artifact(&artifact_path).await?;
        tracing::debug!("[{}] Artifact loaded ({} chars)", doc_key, text.chars().count());

        let results = self.client.analyze(doc_key, &text).await?;
        let written = self.materializer.write_analysis(&artifact_path, &results).await?;
        tracing::debug!("[{}] Analysis results written to {}", doc_key, written.display());

        Ok(results)
    }
}
