//! In-memory registry of active orchestrations
//!
//! At most one task per document key. A [`TaskHandle`] is the proof that a run
//! owns the key; dropping it (normal completion, early return or panic) removes
//! the entry, but only if the entry still belongs to that run's generation.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Which orchestration holds the key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Extraction,
    Analysis,
    /// Held while a document is being deleted
    Deletion,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Extraction => "extraction",
            TaskKind::Analysis => "analysis",
            TaskKind::Deletion => "deletion",
        }
    }
}

struct TaskEntry {
    kind: TaskKind,
    token: CancellationToken,
    generation: u64,
    done: watch::Receiver<()>,
}

struct RegistryInner {
    tasks: DashMap<String, TaskEntry>,
    generation: AtomicU64,
}

/// Process-wide map of document key to active task
#[derive(Clone)]
pub struct TaskRegistry {
    inner: Arc<RegistryInner>,
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                tasks: DashMap::new(),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Claim `doc_key` for a new run; `Conflict` if another run holds it
    pub fn try_acquire(&self, doc_key: &str, kind: TaskKind) -> Result<TaskHandle> {
        let token = CancellationToken::new();
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst);
        let (done_tx, done_rx) = watch::channel(());

        match self.inner.tasks.entry(doc_key.to_string()) {
            Entry::Occupied(entry) => {
                return Err(Error::conflict(format!(
                    "[{}] {} task already active",
                    doc_key,
                    entry.get().kind.as_str()
                )));
            }
            Entry::Vacant(entry) => {
                entry.insert(TaskEntry {
                    kind,
                    token: token.clone(),
                    generation,
                    done: done_rx,
                });
            }
        }

        tracing::debug!("[{}] acquired {} task (gen={})", doc_key, kind.as_str(), generation);

        Ok(TaskHandle {
            doc_key: doc_key.to_string(),
            kind,
            token,
            generation,
            registry: Arc::downgrade(&self.inner),
            _done: done_tx,
        })
    }

    /// Signal cancellation without waiting for the run to observe it
    pub fn cancel(&self, doc_key: &str) -> bool {
        match self.inner.tasks.get(doc_key) {
            Some(entry) => {
                entry.token.cancel();
                tracing::info!("[{}] cancellation requested", doc_key);
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self, doc_key: &str) -> bool {
        self.inner.tasks.contains_key(doc_key)
    }

    pub fn active_kind(&self, doc_key: &str) -> Option<TaskKind> {
        self.inner.tasks.get(doc_key).map(|entry| entry.kind)
    }

    pub fn len(&self) -> usize {
        self.inner.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.tasks.is_empty()
    }

    /// Wait until no task is registered
    pub async fn wait_idle(&self) {
        loop {
            let pending: Vec<TaskCompletion> = self
                .inner
                .tasks
                .iter()
                .map(|entry| TaskCompletion {
                    done: entry.done.clone(),
                })
                .collect();

            if pending.is_empty() {
                return;
            }
            for completion in pending {
                completion.wait().await;
            }
        }
    }
}

/// Resolves once the owning [`TaskHandle`] is dropped
struct TaskCompletion {
    done: watch::Receiver<()>,
}

impl TaskCompletion {
    async fn wait(mut self) {
        // the sender never sends; `changed` returns once it is dropped
        let _ = self.done.changed().await;
    }
}

/// Ownership of a document key for the lifetime of one run
pub struct TaskHandle {
    doc_key: String,
    kind: TaskKind,
    token: CancellationToken,
    generation: u64,
    registry: Weak<RegistryInner>,
    _done: watch::Sender<()>,
}

impl TaskHandle {
    pub fn doc_key(&self) -> &str {
        &self.doc_key
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_canceled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl std::fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("doc_key", &self.doc_key)
            .field("kind", &self.kind)
            .field("generation", &self.generation)
            .finish()
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        if let Some(inner) = self.registry.upgrade() {
            let generation = self.generation;
            inner
                .tasks
                .remove_if(&self.doc_key, |_, entry| entry.generation == generation);
        }
        tracing::debug!(
            "[{}] released {} task (gen={})",
            self.doc_key,
            self.kind.as_str(),
            self.generation
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_second_acquire_conflicts() {
        let registry = TaskRegistry::new();
        let handle = registry.try_acquire("a.pdf", TaskKind::Extraction).unwrap();
        assert!(registry.is_active("a.pdf"));

        let err = registry.try_acquire("a.pdf", TaskKind::Analysis).unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));

        drop(handle);
        assert!(!registry.is_active("a.pdf"));
        assert!(registry.try_acquire("a.pdf", TaskKind::Analysis).is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_acquire_yields_one_winner() {
        let registry = TaskRegistry::new();
        let barrier = Arc::new(tokio::sync::Barrier::new(16));

        let attempts = (0..16).map(|_| {
            let registry = registry.clone();
            let barrier = barrier.clone();
            tokio::spawn(async move {
                barrier.wait().await;
                registry.try_acquire("same.pdf", TaskKind::Extraction)
            })
        });

        let results = futures::future::join_all(attempts).await;
        let handles: Vec<TaskHandle> = results
            .into_iter()
            .map(|r| r.unwrap())
            .filter_map(|r| r.ok())
            .collect();

        assert_eq!(handles.len(), 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_cancel_signals_without_removing() {
        let registry = TaskRegistry::new();
        assert!(!registry.cancel("missing.pdf"));

        let handle = registry.try_acquire("a.pdf", TaskKind::Analysis).unwrap();
        assert!(registry.cancel("a.pdf"));
        assert!(handle.is_canceled());
        // cooperative: the entry stays until the run lets go
        assert_eq!(registry.active_kind("a.pdf"), Some(TaskKind::Analysis));
    }

    #[test]
    fn test_canceled_run_keeps_key_until_dropped() {
        let registry = TaskRegistry::new();
        let first = registry.try_acquire("a.pdf", TaskKind::Extraction).unwrap();
        registry.cancel("a.pdf");

        // a second run cannot start while the canceled one is still unwinding
        assert!(matches!(
            registry.try_acquire("a.pdf", TaskKind::Extraction),
            Err(Error::Conflict(_))
        ));

        drop(first);
        let second = registry.try_acquire("a.pdf", TaskKind::Extraction).unwrap();
        assert!(!second.is_canceled());
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_wait_idle_resolves_on_drop() {
        let registry = TaskRegistry::new();
        let handle = registry.try_acquire("a.pdf", TaskKind::Extraction).unwrap();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            drop(handle);
        });

        tokio::time::timeout(Duration::from_secs(1), registry.wait_idle())
            .await
            .unwrap();
        assert!(registry.is_empty());
    }
}
