//! Local materialization of extraction results
//!
//! Layout under the working directory:
//!
//! ```text
//! <working_dir>/<job_id>/<job_id>.zip
//! <working_dir>/<job_id>/.../full.md
//! <working_dir>/<job_id>/.../analysis_results.json
//! ```

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::providers::BundleFetcher;

pub const ANALYSIS_RESULTS_FILE: &str = "analysis_results.json";

/// Downloads bundles and manages the artifacts unpacked from them
#[derive(Clone)]
pub struct Materializer {
    working_dir: PathBuf,
    artifact_name: String,
    fetcher: Arc<dyn BundleFetcher>,
}

impl Materializer {
    pub fn new(
        working_dir: PathBuf,
        artifact_name: impl Into<String>,
        fetcher: Arc<dyn BundleFetcher>,
    ) -> Self {
        Self {
            working_dir,
            artifact_name: artifact_name.into(),
            fetcher,
        }
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// Download, unpack and locate the artifact; returns its working-dir-relative path
    pub async fn materialize(&self, doc_key: &str, job_id: &str, bundle_url: &str) -> Result<String> {
        let job_dir = self.job_dir(job_id)?;

        tracing::info!("[{}] Downloading result bundle", doc_key);
        let data = self.fetcher.fetch(bundle_url).await?;

        tokio::fs::create_dir_all(&job_dir).await.map_err(|e| {
            Error::materialization(format!("Failed to create {}: {}", job_dir.display(), e))
        })?;
        let zip_path = job_dir.join(format!("{}.zip", job_id));
        tokio::fs::write(&zip_path, &data).await.map_err(|e| {
            Error::materialization(format!("Failed to write {}: {}", zip_path.display(), e))
        })?;
        tracing::debug!("[{}] Saved bundle ({} bytes) to {}", doc_key, data.len(), zip_path.display());

        let artifact_name = self.artifact_name.clone();
        let unpack_dir = job_dir.clone();
        let artifact = tokio::task::spawn_blocking(move || {
            unpack(&zip_path, &unpack_dir)?;
            find_artifact(&unpack_dir, &artifact_name)
        })
        .await
        .map_err(|e| Error::Internal(format!("Task join error: {}", e)))??;

        let relative = relative_path(&self.working_dir, &artifact)?;
        tracing::info!("[{}] Artifact materialized at {}", doc_key, relative);
        Ok(relative)
    }

    /// Absolute path of a stored artifact path
    pub fn resolve(&self, artifact_path: &str) -> PathBuf {
        let normalized = artifact_path.replace('\\', "/");
        let path = Path::new(&normalized);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.working_dir.join(path)
        }
    }

    /// Read the artifact text
    pub async fn read_artifact(&self, artifact_path: &str) -> Result<String> {
        let path = self.resolve(artifact_path);
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NotFound(format!("artifact {}", path.display())))
            }
            Err(e) => Err(Error::materialization(format!(
                "Failed to read {}: {}",
                path.display(),
                e
            ))),
        }
    }

    /// Write `analysis_results.json` next to the artifact
    pub async fn write_analysis(
        &self,
        artifact_path: &str,
        results: &BTreeMap<String, String>,
    ) -> Result<PathBuf> {
        let artifact = self.resolve(artifact_path);
        let target = artifact
            .parent()
            .unwrap_or(&self.working_dir)
            .join(ANALYSIS_RESULTS_FILE);

        let json = serde_json::to_string_pretty(results)?;
        tokio::fs::write(&target, json).await.map_err(|e| {
            Error::materialization(format!("Failed to write {}: {}", target.display(), e))
        })?;
        Ok(target)
    }

    /// Remove everything unpacked for `job_id`; a missing directory is fine
    pub async fn remove_job(&self, job_id: &str) -> Result<()> {
        let job_dir = self.job_dir(job_id)?;
        match tokio::fs::remove_dir_all(&job_dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn job_dir(&self, job_id: &str) -> Result<PathBuf> {
        let mut components = Path::new(job_id).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => Ok(self.working_dir.join(job_id)),
            _ => Err(Error::materialization(format!("Invalid job id: {}", job_id))),
        }
    }
}

fn unpack(zip_path: &Path, target: &Path) -> Result<()> {
    let file = std::fs::File::open(zip_path)
        .map_err(|e| Error::materialization(format!("Failed to open bundle: {}", e)))?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|e| Error::materialization(format!("Invalid bundle archive: {}", e)))?;
    archive
        .extract(target)
        .map_err(|e| Error::materialization(format!("Failed to unpack bundle: {}", e)))
}

fn find_artifact(root: &Path, name: &str) -> Result<PathBuf> {
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .find(|entry| entry.file_name() == name)
        .map(|entry| entry.into_path())
        .ok_or_else(|| Error::materialization(format!("{} not found in result bundle", name)))
}

fn relative_path(base: &Path, path: &Path) -> Result<String> {
    let relative = path.strip_prefix(base).map_err(|_| {
        Error::materialization(format!("{} is outside the working directory", path.display()))
    })?;

    Ok(relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/"))
}
