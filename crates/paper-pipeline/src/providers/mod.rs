//! Provider abstractions for the external collaborators
//!
//! Each collaborator is a trait object (`Arc<dyn Trait>`) so the orchestrators
//! can run against the real services or in-process fakes.

pub mod analysis;
pub mod blob_store;
pub mod deepseek;
pub mod extraction;
pub mod fetch;
pub mod mineru;

pub use analysis::AnalysisClient;
pub use blob_store::{BlobStore, LocalBlobStore, StoredBlob};
pub use deepseek::DeepSeekClient;
pub use extraction::{ExtractionJobClient, ExtractionJobState, ExtractionOptions};
pub use fetch::{BundleFetcher, HttpFetcher};
pub use mineru::MineruClient;
