//! Package metadata: the runtime license text and the project's own files.

use crate::config::MetadataConfig;
use crate::error::{PackageError, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

const USER_AGENT: &str = concat!("distpack/", env!("CARGO_PKG_VERSION"));

/// Fetches static assets over the network.
#[async_trait]
pub trait AssetFetcher: Send + Sync {
    /// Body of `url`, or [`PackageError::Network`] on transport failure or a
    /// non-success status.
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

/// [`AssetFetcher`] backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Build a client; `timeout_secs == 0` keeps reqwest's default (none).
    pub fn new(timeout_secs: u64) -> Result<Self> {
        let mut builder = reqwest::Client::builder().user_agent(USER_AGENT);
        if timeout_secs > 0 {
            builder = builder.timeout(Duration::from_secs(timeout_secs));
        }
        let client = builder
            .build()
            .map_err(|e| PackageError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl AssetFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| PackageError::Network(format!("failed to fetch {url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PackageError::Network(format!("HTTP {status} from {url}")));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| PackageError::Network(format!("failed to read body of {url}: {e}")))?;
        Ok(bytes.to_vec())
    }
}

/// Files written into `meta/` by [`MetadataAssembler::assemble`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledMetadata {
    pub runtime_license: PathBuf,
    pub project_files: Vec<PathBuf>,
}

/// Writes the runtime license and copies project files into `meta/`.
pub struct MetadataAssembler {
    fetcher: Arc<dyn AssetFetcher>,
    config: MetadataConfig,
}

impl MetadataAssembler {
    pub fn new(fetcher: Arc<dyn AssetFetcher>, config: MetadataConfig) -> Self {
        Self { fetcher, config }
    }

    /// Populate `meta_dir` from the network and from `project_root`.
    pub async fn assemble(&self, project_root: &Path, meta_dir: &Path) -> Result<AssembledMetadata> {
        let runtime_dir = meta_dir.join(&self.config.runtime);
        std::fs::create_dir_all(&runtime_dir).map_err(|e| {
            PackageError::Metadata(format!("failed to create {}: {e}", runtime_dir.display()))
        })?;

        info!(url = %self.config.runtime_license_url, "Fetching runtime license");
        let text = self.fetcher.fetch(&self.config.runtime_license_url).await?;
        let runtime_license = runtime_dir.join("license.txt");
        std::fs::write(&runtime_license, text).map_err(|e| {
            PackageError::Metadata(format!("failed to write {}: {e}", runtime_license.display()))
        })?;

        let mut project_files = Vec::with_capacity(self.config.project_files.len());
        for name in &self.config.project_files {
            let from = project_root.join(name);
            if !from.is_file() {
                return Err(PackageError::Metadata(format!(
                    "project file {name} not found in {}",
                    project_root.display()
                )));
            }
            let to = meta_dir.join(name);
            std::fs::copy(&from, &to)
                .map_err(|e| PackageError::Metadata(format!("failed to copy {name}: {e}")))?;
            project_files.push(to);
        }

        Ok(AssembledMetadata {
            runtime_license,
            project_files,
        })
    }
}
