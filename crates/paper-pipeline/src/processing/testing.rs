//! In-process collaborators and a pipeline harness for tests

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::Instant;

use crate::config::PipelineConfig;
use crate::error::{Error, Result};
use crate::processing::pipeline::{Collaborators, Pipeline};
use crate::providers::{
    AnalysisClient, BlobStore, BundleFetcher, ExtractionJobClient, ExtractionJobState,
    ExtractionOptions, LocalBlobStore, StoredBlob,
};
use crate::storage::DocumentStore;
use crate::types::{DocumentRecord, DocumentStatus};

/// Build an in-memory zip archive
pub fn zip_bundle(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default();
    for (name, data) in files {
        writer.start_file(*name, options).unwrap();
        writer.write_all(data).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

/// Serves the same bundle for every URL
pub struct FakeFetcher {
    bundle: Vec<u8>,
    fetches: AtomicUsize,
    delay: Mutex<Duration>,
}

impl FakeFetcher {
    pub fn with_bundle(bundle: Vec<u8>) -> Self {
        Self {
            bundle,
            fetches: AtomicUsize::new(0),
            delay: Mutex::new(Duration::ZERO),
        }
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BundleFetcher for FakeFetcher {
    async fn fetch(&self, _url: &str) -> Result<Bytes> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(Bytes::from(self.bundle.clone()))
    }
}

/// How every job of a [`FakeExtractionClient`] behaves, counted in polls
#[derive(Debug, Clone)]
pub enum JobScript {
    SucceedAfter(u32),
    FailAfter(u32, String),
    NeverFinish,
    QueryErrorAfter(u32),
}

pub struct FakeExtractionClient {
    script: Mutex<JobScript>,
    polls: Mutex<HashMap<String, u32>>,
    submits: Mutex<Vec<(String, Instant)>>,
    failing_sources: Mutex<HashSet<String>>,
    submit_delay: Mutex<Duration>,
    next_id: AtomicUsize,
}

impl FakeExtractionClient {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(JobScript::SucceedAfter(1)),
            polls: Mutex::new(HashMap::new()),
            submits: Mutex::new(Vec::new()),
            failing_sources: Mutex::new(HashSet::new()),
            submit_delay: Mutex::new(Duration::ZERO),
            next_id: AtomicUsize::new(1),
        }
    }

    pub fn set_script(&self, script: JobScript) {
        *self.script.lock() = script;
    }

    pub fn fail_submit_for(&self, source_url: &str) {
        self.failing_sources.lock().insert(source_url.to_string());
    }

    pub fn clear_submit_failures(&self) {
        self.failing_sources.lock().clear();
    }

    /// Make every submission take `delay` before the service answers
    pub fn set_submit_delay(&self, delay: Duration) {
        *self.submit_delay.lock() = delay;
    }

    /// Status queries across all jobs
    pub fn polls(&self) -> u32 {
        self.polls.lock().values().sum()
    }

    /// Submissions that reached the service, failed ones included
    pub fn submits(&self) -> usize {
        self.submits.lock().len()
    }

    pub fn submit_times(&self) -> Vec<Instant> {
        self.submits.lock().iter().map(|(_, at)| *at).collect()
    }
}

#[async_trait]
impl ExtractionJobClient for FakeExtractionClient {
    async fn submit(&self, source_url: &str, _options: &ExtractionOptions) -> Result<String> {
        self.submits
            .lock()
            .push((source_url.to_string(), Instant::now()));
        let delay = *self.submit_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.failing_sources.lock().contains(source_url) {
            return Err(Error::collaborator(format!("submit rejected: {}", source_url)));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(format!("job-{}", id))
    }

    async fn status(&self, job_id: &str) -> Result<ExtractionJobState> {
        let n = {
            let mut polls = self.polls.lock();
            let count = polls.entry(job_id.to_string()).or_insert(0);
            *count += 1;
            *count
        };
        let pending = ExtractionJobState::Pending {
            progress: Some(format!("{}/10 pages", n.min(10))),
        };

        let script = self.script.lock().clone();
        Ok(match script {
            JobScript::SucceedAfter(k) if n >= k => ExtractionJobState::Done {
                bundle_url: format!("https://bundles/{}.zip", job_id),
            },
            JobScript::FailAfter(k, reason) if n >= k => ExtractionJobState::Failed { reason },
            JobScript::QueryErrorAfter(k) if n >= k => {
                return Err(Error::collaborator("status query failed"))
            }
            _ => pending,
        })
    }

    fn name(&self) -> &str {
        "fake-extraction"
    }
}

enum AnalysisScript {
    Answer,
    Fail(String),
}

pub struct FakeAnalysisClient {
    script: Mutex<AnalysisScript>,
    delay: Mutex<Duration>,
    calls: AtomicUsize,
}

impl FakeAnalysisClient {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(AnalysisScript::Answer),
            delay: Mutex::new(Duration::ZERO),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn fail_with(&self, reason: &str) {
        *self.script.lock() = AnalysisScript::Fail(reason.to_string());
    }

    pub fn succeed(&self) {
        *self.script.lock() = AnalysisScript::Answer;
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AnalysisClient for FakeAnalysisClient {
    async fn analyze(&self, _doc_key: &str, artifact_text: &str) -> Result<BTreeMap<String, String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let failure = match &*self.script.lock() {
            AnalysisScript::Answer => None,
            AnalysisScript::Fail(reason) => Some(reason.clone()),
        };
        match failure {
            Some(reason) => Err(Error::Collaborator(reason)),
            None => Ok(BTreeMap::from([
                ("summary".to_string(), "a short summary".to_string()),
                ("length".to_string(), artifact_text.len().to_string()),
            ])),
        }
    }

    fn name(&self) -> &str {
        "fake-analysis"
    }
}

/// Local blob store that remembers deletions and can be told to fail them
pub struct RecordingBlobStore {
    inner: LocalBlobStore,
    deleted: Mutex<Vec<String>>,
    fail_deletes: AtomicBool,
}

impl RecordingBlobStore {
    pub fn new(root: PathBuf) -> Self {
        Self {
            inner: LocalBlobStore::new(root, "http://blobs.test").unwrap(),
            deleted: Mutex::new(Vec::new()),
            fail_deletes: AtomicBool::new(false),
        }
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().clone()
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl BlobStore for RecordingBlobStore {
    async fn put(&self, filename: &str, data: Bytes) -> Result<StoredBlob> {
        self.inner.put(filename, data).await
    }

    async fn get(&self, key: &str) -> Result<Bytes> {
        self.inner.get(key).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(Error::collaborator(format!("delete refused: {}", key)));
        }
        self.deleted.lock().push(key.to_string());
        self.inner.delete(key).await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.inner.exists(key).await
    }

    fn url(&self, key: &str) -> String {
        self.inner.url(key)
    }

    fn name(&self) -> &str {
        "recording"
    }
}

/// A pipeline wired to fakes, with paths under a temporary directory
pub struct Harness {
    pub pipeline: Pipeline,
    pub extraction: Arc<FakeExtractionClient>,
    pub analysis: Arc<FakeAnalysisClient>,
    pub blobs: Arc<RecordingBlobStore>,
    pub fetcher: Arc<FakeFetcher>,
    _dir: TempDir,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    pub async fn with_config(configure: impl FnOnce(&mut PipelineConfig)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = DocumentStore::in_memory().unwrap();
        Self::build(dir, store, configure)
    }

    /// Harness over an existing store, e.g. one left behind by a previous process
    pub fn with_store(
        dir: TempDir,
        store: DocumentStore,
        configure: impl FnOnce(&mut PipelineConfig),
    ) -> Self {
        Self::build(dir, store, configure)
    }

    fn build(
        dir: TempDir,
        store: DocumentStore,
        configure: impl FnOnce(&mut PipelineConfig),
    ) -> Self {
        let mut config = PipelineConfig::default();
        config.storage.working_dir = dir.path().join("work");
        configure(&mut config);

        let extraction = Arc::new(FakeExtractionClient::new());
        let analysis = Arc::new(FakeAnalysisClient::new());
        let blobs = Arc::new(RecordingBlobStore::new(dir.path().join("blobs")));
        let fetcher = Arc::new(FakeFetcher::with_bundle(zip_bundle(&[
            ("full.md", "# Paper\n\nSome findings.".as_bytes()),
            ("images/fig1.png", b"png".as_slice()),
        ])));

        let pipeline = Pipeline::new(
            config,
            store,
            Collaborators {
                blobs: blobs.clone(),
                extraction: extraction.clone(),
                analysis: analysis.clone(),
                fetcher: fetcher.clone(),
            },
        );

        Self {
            pipeline,
            extraction,
            analysis,
            blobs,
            fetcher,
            _dir: dir,
        }
    }

    pub fn working_dir(&self) -> &Path {
        &self.pipeline.config().storage.working_dir
    }

    /// Upload a small PDF, returning its key
    pub async fn upload(&self, filename: &str) -> String {
        self.pipeline
            .upload_document(filename, Bytes::from_static(b"%PDF-1.7 test"))
            .await
            .unwrap()
            .doc_key
    }

    /// Upload and run extraction to completion
    pub async fn extracted(&self, filename: &str) -> String {
        let key = self.upload(filename).await;
        self.pipeline.start_extraction(&key).await.unwrap();
        self.pipeline.wait_idle().await;
        assert_eq!(self.status(&key), DocumentStatus::Extracted);
        key
    }

    pub fn record(&self, key: &str) -> DocumentRecord {
        self.pipeline.get_document(key).unwrap()
    }

    pub fn status(&self, key: &str) -> DocumentStatus {
        self.record(key).status
    }
}
