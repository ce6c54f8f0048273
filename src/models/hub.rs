use crate::error::{BielikError, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// One file to pull from a model repository
#[derive(Debug, Clone)]
pub struct FetchRequest<'a> {
    pub repo_id: &'a str,
    pub file_name: &'a str,
    pub cache_dir: &'a Path,
    pub force: bool,
    /// Expected download size, checked against free disk space when known
    pub size_hint_mb: Option<u64>,
}

/// Remote model repository
#[async_trait]
pub trait ModelHub: Send + Sync {
    /// List file names in the repository
    async fn list_files(&self, repo_id: &str) -> Result<Vec<String>>;

    /// Download one file into `cache_dir`, returning its local path
    async fn fetch(&self, request: FetchRequest<'_>) -> Result<PathBuf>;
}

/// Hugging Face Hub over the `hf-hub` tokio API
#[derive(Default)]
pub struct HfHub {
    token: Option<String>,
}

impl HfHub {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a bearer token for gated repositories
    #[must_use]
    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    fn api(&self, cache_dir: Option<&Path>) -> Result<hf_hub::api::tokio::Api> {
        let mut builder = hf_hub::api::tokio::ApiBuilder::new()
            .with_progress(false)
            .with_token(self.token.clone());
        if let Some(dir) = cache_dir {
            builder = builder.with_cache_dir(dir.to_path_buf());
        }
        builder
            .build()
            .map_err(|e| BielikError::Hub(format!("Failed to initialize HuggingFace API: {e}")))
    }
}

impl std::fmt::Debug for HfHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HfHub")
            .field("token", &self.token.as_ref().map(|_| "***"))
            .finish()
    }
}

#[async_trait]
impl ModelHub for HfHub {
    async fn list_files(&self, repo_id: &str) -> Result<Vec<String>> {
        let api = self.api(None)?;
        let info = api
            .model(repo_id.to_string())
            .info()
            .await
            .map_err(|e| BielikError::Hub(format!("Failed to list files for {repo_id}: {e}")))?;

        Ok(info.siblings.into_iter().map(|s| s.rfilename).collect())
    }

    async fn fetch(&self, request: FetchRequest<'_>) -> Result<PathBuf> {
        std::fs::create_dir_all(request.cache_dir)?;
        if let Some(required_mb) = request.size_hint_mb {
            check_disk_space(request.cache_dir, required_mb)?;
        }

        let api = self.api(Some(request.cache_dir))?;
        let repo = api.model(request.repo_id.to_string());

        tracing::info!("Downloading {} from {}", request.file_name, request.repo_id);

        let result = if request.force {
            repo.download(request.file_name).await
        } else {
            repo.get(request.file_name).await
        };

        result.map_err(|e| {
            BielikError::Hub(format!(
                "Failed to download {} from {}: {e}",
                request.file_name, request.repo_id
            ))
        })
    }
}

/// Check if enough disk space is available in `dir`
#[cfg(unix)]
pub fn check_disk_space(dir: &Path, required_mb: u64) -> Result<()> {
    let stats = nix::sys::statvfs::statvfs(dir)
        .map_err(|e| BielikError::Other(format!("Failed to check disk space: {e}")))?;

    #[allow(clippy::unnecessary_cast, clippy::useless_conversion)]
    let available_bytes = u64::from(stats.blocks_available()) * u64::from(stats.fragment_size());
    let required_bytes = required_mb * 1_024 * 1_024;

    // 100MB headroom
    let required_with_buffer = required_bytes + (100 * 1_024 * 1_024);

    if available_bytes < required_with_buffer {
        let available_mb = available_bytes / (1_024 * 1_024);
        let required_mb_with_buffer = required_with_buffer / (1_024 * 1_024);

        return Err(BielikError::Hub(format!(
            "Not enough disk space: {required_mb_with_buffer} MB required, {available_mb} MB available"
        )));
    }

    Ok(())
}

#[cfg(not(unix))]
pub fn check_disk_space(_dir: &Path, _required_mb: u64) -> Result<()> {
    Ok(())
}

/// Format bytes as human-readable string
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}
