use crate::error::{BielikError, Result};
use crate::models::catalog::{CatalogEntry, CATALOG};
use crate::models::hub::{FetchRequest, ModelHub};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// File name of the registry inside the models directory
pub const REGISTRY_FILE: &str = "model_registry.json";

/// On-disk format of a downloaded model
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ModelType {
    #[default]
    Gguf,
}

/// Information about a downloaded model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModelInfo {
    pub name: String,
    pub repo_id: String,
    pub file_name: String,
    pub local_path: PathBuf,
    pub size_bytes: u64,
    pub downloaded_at: String,
    #[serde(default)]
    pub model_type: ModelType,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parameters: String,
    #[serde(default)]
    pub version: String,
}

impl ModelInfo {
    fn file_exists(&self) -> bool {
        self.local_path.is_file()
    }
}

/// Tunables for file selection
#[derive(Debug, Clone)]
pub struct RegistryOptions {
    /// Quantization tags in order of preference, matched case-insensitively
    pub quant_preference: Vec<String>,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            quant_preference: ["q4_0", "q4_1", "q5_0", "q5_1", "q8_0", "f16", "f32"]
                .iter()
                .map(|q| (*q).to_string())
                .collect(),
        }
    }
}

/// Aggregate size of the valid registry entries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageStats {
    pub count: usize,
    pub total_bytes: u64,
    pub per_model: Vec<(String, u64)>,
    pub models_dir: PathBuf,
    pub registry_file: PathBuf,
}

/// Registry of downloaded models, persisted as JSON next to the model files
pub struct ModelRegistry {
    models_dir: PathBuf,
    registry_file: PathBuf,
    entries: BTreeMap<String, ModelInfo>,
    hub: Arc<dyn ModelHub>,
    options: RegistryOptions,
}

impl ModelRegistry {
    /// Open the registry in `models_dir`, creating the directory if needed
    pub fn open(models_dir: impl Into<PathBuf>, hub: Arc<dyn ModelHub>) -> Result<Self> {
        Self::with_options(models_dir, hub, RegistryOptions::default())
    }

    pub fn with_options(
        models_dir: impl Into<PathBuf>,
        hub: Arc<dyn ModelHub>,
        options: RegistryOptions,
    ) -> Result<Self> {
        let models_dir = models_dir.into();
        fs::create_dir_all(&models_dir).map_err(|e| {
            BielikError::Registry(format!(
                "Cannot create models directory {}: {e}",
                models_dir.display()
            ))
        })?;

        let registry_file = models_dir.join(REGISTRY_FILE);
        let entries = load_entries(&registry_file);

        tracing::debug!(
            "Model registry opened at {} ({} entries)",
            models_dir.display(),
            entries.len()
        );

        Ok(Self {
            models_dir,
            registry_file,
            entries,
            hub,
            options,
        })
    }

    #[must_use]
    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    #[must_use]
    pub fn registry_file(&self) -> &Path {
        &self.registry_file
    }

    /// Catalog of models that can be downloaded
    #[must_use]
    pub fn available_models() -> &'static [CatalogEntry] {
        CATALOG
    }

    /// True if `name` is registered and its file is still on disk.
    /// A dangling entry is dropped and the registry rewritten.
    pub fn is_downloaded(&mut self, name: &str) -> bool {
        let Some(info) = self.entries.get(name) else {
            return false;
        };

        if info.file_exists() {
            return true;
        }

        tracing::warn!("Model file missing: {}", info.local_path.display());
        self.entries.remove(name);
        self.persist();
        false
    }

    /// Download a catalog model. Never fails loudly: every error is logged
    /// and reported as `None`.
    pub async fn download(&mut self, name: &str, force: bool) -> Option<ModelInfo> {
        let Some(entry) = CatalogEntry::find(name) else {
            match CatalogEntry::suggest(name) {
                Some(suggestion) => tracing::error!(
                    "Unknown model: {name}. Did you mean '{suggestion}'?"
                ),
                None => tracing::error!(
                    "Unknown model: {name}. Available models: {}",
                    CatalogEntry::all_names().join(", ")
                ),
            }
            return None;
        };

        if !force && self.is_downloaded(name) {
            tracing::info!("Model {name} already downloaded");
            return self.entries.get(name).cloned();
        }

        tracing::info!("Downloading model {name} from {}", entry.repo_id);

        let files = match self.hub.list_files(entry.repo_id).await {
            Ok(files) => files,
            Err(e) => {
                tracing::error!("{e}");
                return None;
            }
        };

        let gguf_files: Vec<String> = files
            .into_iter()
            .filter(|f| f.to_lowercase().ends_with(".gguf"))
            .collect();

        let Some(target_file) = select_best_file(&gguf_files, &self.options.quant_preference)
        else {
            tracing::error!("No GGUF files found in {}", entry.repo_id);
            return None;
        };
        let target_file = target_file.to_string();

        tracing::info!("Downloading file: {target_file}");

        let request = FetchRequest {
            repo_id: entry.repo_id,
            file_name: &target_file,
            cache_dir: &self.models_dir,
            force,
            size_hint_mb: Some(entry.size_mb),
        };
        let local_path = match self.hub.fetch(request).await {
            Ok(path) => path,
            Err(e) => {
                tracing::error!("Failed to download {name}: {e}");
                return None;
            }
        };

        let size_bytes = match fs::metadata(&local_path) {
            Ok(meta) => meta.len(),
            Err(e) => {
                tracing::error!(
                    "Downloaded file {} is not readable: {e}",
                    local_path.display()
                );
                return None;
            }
        };

        let info = ModelInfo {
            name: name.to_string(),
            repo_id: entry.repo_id.to_string(),
            file_name: target_file,
            local_path,
            size_bytes,
            downloaded_at: chrono::Utc::now().to_rfc3339(),
            model_type: ModelType::Gguf,
            description: entry.description.to_string(),
            parameters: entry.parameters.to_string(),
            version: entry.version.to_string(),
        };

        self.entries.insert(name.to_string(), info.clone());
        self.persist();

        tracing::info!(
            "Successfully downloaded {name} to {} ({})",
            info.local_path.display(),
            crate::models::hub::format_bytes(size_bytes)
        );

        Some(info)
    }

    /// Remove the model file and its entry; false if `name` was never registered
    pub fn delete(&mut self, name: &str) -> bool {
        let Some(info) = self.entries.get(name) else {
            tracing::warn!("Model {name} not found in registry");
            return false;
        };

        if let Err(e) = remove_model_file(&info.local_path) {
            tracing::error!("Failed to delete model {name}: {e}");
            return false;
        }

        self.entries.remove(name);
        self.persist();
        tracing::info!("Successfully deleted model {name}");
        true
    }

    /// Valid entries only; stale ones are pruned from the store
    pub fn list_downloaded(&mut self) -> BTreeMap<String, ModelInfo> {
        let before = self.entries.len();
        self.entries.retain(|_, info| {
            let exists = info.file_exists();
            if !exists {
                tracing::warn!("Model file missing: {}", info.local_path.display());
            }
            exists
        });

        if self.entries.len() != before {
            self.persist();
        }

        self.entries.clone()
    }

    /// Local path of a downloaded model
    pub fn model_path(&mut self, name: &str) -> Option<PathBuf> {
        if !self.is_downloaded(name) {
            return None;
        }
        self.entries.get(name).map(|info| info.local_path.clone())
    }

    pub fn storage_stats(&mut self) -> StorageStats {
        let valid = self.list_downloaded();
        let per_model: Vec<(String, u64)> = valid
            .values()
            .map(|info| (info.name.clone(), info.size_bytes))
            .collect();

        StorageStats {
            count: per_model.len(),
            total_bytes: per_model.iter().map(|(_, bytes)| bytes).sum(),
            per_model,
            models_dir: self.models_dir.clone(),
            registry_file: self.registry_file.clone(),
        }
    }

    /// Write the registry atomically (tmp + rename)
    fn save(&self) -> Result<()> {
        let tmp_path = self.registry_file.with_extension("tmp");
        let content = serde_json::to_string_pretty(&self.entries)?;

        fs::write(&tmp_path, content)?;
        fs::rename(&tmp_path, &self.registry_file)?;

        Ok(())
    }

    fn persist(&self) {
        if let Err(e) = self.save() {
            tracing::error!("Failed to save model registry: {e}");
        }
    }
}

/// Read the registry file; missing or corrupt files load as empty
fn load_entries(path: &Path) -> BTreeMap<String, ModelInfo> {
    if !path.exists() {
        return BTreeMap::new();
    }

    let parsed = fs::read_to_string(path)
        .map_err(BielikError::from)
        .and_then(|content| serde_json::from_str(&content).map_err(BielikError::from));

    match parsed {
        Ok(entries) => entries,
        Err(e) => {
            tracing::error!("Failed to load model registry {}: {e}", path.display());
            BTreeMap::new()
        }
    }
}

/// Pick a file by quantization preference, falling back to the first one
#[must_use]
pub fn select_best_file<'a>(files: &'a [String], preference: &[String]) -> Option<&'a str> {
    preference
        .iter()
        .find_map(|quant| {
            let quant = quant.to_lowercase();
            files.iter().find(|f| f.to_lowercase().contains(&quant))
        })
        .or_else(|| files.first())
        .map(String::as_str)
}

/// Remove a model file; a hub snapshot symlink takes its blob with it
fn remove_model_file(path: &Path) -> std::io::Result<()> {
    let Ok(meta) = fs::symlink_metadata(path) else {
        return Ok(());
    };

    let blob = if meta.file_type().is_symlink() {
        fs::canonicalize(path).ok()
    } else {
        None
    };

    fs::remove_file(path)?;
    tracing::info!("Deleted model file: {}", path.display());

    if let Some(blob) = blob.filter(|b| b.as_path() != path && b.exists()) {
        fs::remove_file(&blob)?;
        tracing::info!("Deleted model blob: {}", blob.display());
    }
    Ok(())
}
