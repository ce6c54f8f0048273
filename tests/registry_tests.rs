use async_trait::async_trait;
use bielik::models::hub::FetchRequest;
use bielik::models::registry::REGISTRY_FILE;
use bielik::models::{ModelHub, ModelRegistry};
use bielik::Result;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

const MODEL: &str = "bielik-4.5b-v3.0-instruct";

/// Hub serving a fixed file list and writing small fake weights
struct FakeHub {
    files: Vec<String>,
    fetches: AtomicUsize,
}

impl FakeHub {
    fn new(files: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            files: files.iter().map(|f| (*f).to_string()).collect(),
            fetches: AtomicUsize::new(0),
        })
    }

    fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelHub for FakeHub {
    async fn list_files(&self, _repo_id: &str) -> Result<Vec<String>> {
        Ok(self.files.clone())
    }

    async fn fetch(&self, request: FetchRequest<'_>) -> Result<PathBuf> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let path = request.cache_dir.join(request.file_name);
        std::fs::write(&path, vec![0u8; 1024])?;
        Ok(path)
    }
}

/// Hub laying files out like the hf-hub cache: a snapshot symlink into `blobs/`
#[cfg(unix)]
struct SnapshotHub;

#[cfg(unix)]
#[async_trait]
impl ModelHub for SnapshotHub {
    async fn list_files(&self, _repo_id: &str) -> Result<Vec<String>> {
        Ok(vec!["bielik-4.5b-v3.0-instruct.Q4_0.gguf".to_string()])
    }

    async fn fetch(&self, request: FetchRequest<'_>) -> Result<PathBuf> {
        let blobs = request.cache_dir.join("blobs");
        let snapshot = request.cache_dir.join("snapshots").join("abc123");
        std::fs::create_dir_all(&blobs)?;
        std::fs::create_dir_all(&snapshot)?;

        let blob = blobs.join("5f2e9d0c");
        std::fs::write(&blob, vec![0u8; 2048])?;
        let link = snapshot.join(request.file_name);
        std::os::unix::fs::symlink(&blob, &link)?;
        Ok(link)
    }
}

fn gguf_hub() -> Arc<FakeHub> {
    FakeHub::new(&[
        "README.md",
        "bielik-4.5b-v3.0-instruct.Q8_0.gguf",
        "bielik-4.5b-v3.0-instruct.Q4_0.gguf",
    ])
}

#[tokio::test]
async fn test_unknown_model_returns_none() {
    let temp_dir = TempDir::new().unwrap();
    let hub = gguf_hub();
    let mut registry = ModelRegistry::open(temp_dir.path(), hub.clone()).unwrap();

    assert!(registry.download("bielik-99b", false).await.is_none());
    assert_eq!(hub.fetches(), 0);
    assert!(registry.list_downloaded().is_empty());
    assert!(!temp_dir.path().join(REGISTRY_FILE).exists());
}

#[tokio::test]
async fn test_download_then_is_downloaded() {
    let temp_dir = TempDir::new().unwrap();
    let mut registry = ModelRegistry::open(temp_dir.path(), gguf_hub()).unwrap();

    let info = registry.download(MODEL, false).await.unwrap();

    assert_eq!(info.file_name, "bielik-4.5b-v3.0-instruct.Q4_0.gguf");
    assert_eq!(info.size_bytes, 1024);
    assert!(info.local_path.is_file());
    assert!(registry.is_downloaded(MODEL));
    assert_eq!(registry.model_path(MODEL), Some(info.local_path.clone()));

    // Persisted across reopen
    let mut reopened = ModelRegistry::open(temp_dir.path(), gguf_hub()).unwrap();
    assert!(reopened.is_downloaded(MODEL));
}

#[tokio::test]
async fn test_repeated_download_is_idempotent() {
    let temp_dir = TempDir::new().unwrap();
    let hub = gguf_hub();
    let mut registry = ModelRegistry::open(temp_dir.path(), hub.clone()).unwrap();

    let first = registry.download(MODEL, false).await.unwrap();
    let second = registry.download(MODEL, false).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(hub.fetches(), 1);
    assert_eq!(registry.list_downloaded().len(), 1);
}

#[tokio::test]
async fn test_forced_download_fetches_again() {
    let temp_dir = TempDir::new().unwrap();
    let hub = gguf_hub();
    let mut registry = ModelRegistry::open(temp_dir.path(), hub.clone()).unwrap();

    registry.download(MODEL, false).await.unwrap();
    registry.download(MODEL, true).await.unwrap();

    assert_eq!(hub.fetches(), 2);
    assert_eq!(registry.list_downloaded().len(), 1);
}

#[tokio::test]
async fn test_delete() {
    let temp_dir = TempDir::new().unwrap();
    let mut registry = ModelRegistry::open(temp_dir.path(), gguf_hub()).unwrap();

    let info = registry.download(MODEL, false).await.unwrap();
    assert!(registry.delete(MODEL));

    assert!(!registry.is_downloaded(MODEL));
    assert!(!info.local_path.exists());
    assert!(!registry.delete(MODEL));
}

#[cfg(unix)]
#[tokio::test]
async fn test_delete_removes_snapshot_blob() {
    let temp_dir = TempDir::new().unwrap();
    let mut registry = ModelRegistry::open(temp_dir.path(), Arc::new(SnapshotHub)).unwrap();

    let info = registry.download(MODEL, false).await.unwrap();
    let blob = std::fs::canonicalize(&info.local_path).unwrap();
    assert_eq!(info.size_bytes, 2048);
    assert!(blob.ends_with("blobs/5f2e9d0c"));

    assert!(registry.delete(MODEL));

    assert!(std::fs::symlink_metadata(&info.local_path).is_err());
    assert!(!blob.exists());
    assert!(!registry.is_downloaded(MODEL));
}

#[tokio::test]
async fn test_external_removal_is_pruned() {
    let temp_dir = TempDir::new().unwrap();
    let mut registry = ModelRegistry::open(temp_dir.path(), gguf_hub()).unwrap();

    let info = registry.download(MODEL, false).await.unwrap();
    std::fs::remove_file(&info.local_path).unwrap();

    assert!(!registry.is_downloaded(MODEL));
    assert_eq!(registry.model_path(MODEL), None);

    let content = std::fs::read_to_string(temp_dir.path().join(REGISTRY_FILE)).unwrap();
    assert!(!content.contains(MODEL));
}

#[test]
fn test_stale_entry_pruned_and_rewritten() {
    let temp_dir = TempDir::new().unwrap();
    let registry_path = temp_dir.path().join(REGISTRY_FILE);
    let missing = temp_dir.path().join("modelA.gguf");

    let stale = serde_json::json!({
        "modelA": {
            "name": "modelA",
            "repo_id": "org/modelA",
            "file_name": "modelA.gguf",
            "local_path": missing,
            "size_bytes": 10,
            "downloaded_at": "2026-01-01T00:00:00Z",
            "model_type": "gguf"
        }
    });
    std::fs::write(&registry_path, serde_json::to_string_pretty(&stale).unwrap()).unwrap();

    let mut registry = ModelRegistry::open(temp_dir.path(), gguf_hub()).unwrap();
    assert!(registry.list_downloaded().is_empty());

    let content = std::fs::read_to_string(&registry_path).unwrap();
    assert!(!content.contains("modelA"));
}

#[test]
fn test_corrupt_registry_loads_empty() {
    let temp_dir = TempDir::new().unwrap();
    std::fs::write(temp_dir.path().join(REGISTRY_FILE), "{ not json").unwrap();

    let mut registry = ModelRegistry::open(temp_dir.path(), gguf_hub()).unwrap();
    assert!(registry.list_downloaded().is_empty());
}

#[tokio::test]
async fn test_repository_without_gguf() {
    let temp_dir = TempDir::new().unwrap();
    let hub = FakeHub::new(&["README.md", "config.json"]);
    let mut registry = ModelRegistry::open(temp_dir.path(), hub.clone()).unwrap();

    assert!(registry.download(MODEL, false).await.is_none());
    assert_eq!(hub.fetches(), 0);
    assert!(!registry.is_downloaded(MODEL));
}

#[tokio::test]
async fn test_storage_stats() {
    let temp_dir = TempDir::new().unwrap();
    let mut registry = ModelRegistry::open(temp_dir.path(), gguf_hub()).unwrap();

    let empty = registry.storage_stats();
    assert_eq!(empty.count, 0);
    assert_eq!(empty.total_bytes, 0);

    registry.download(MODEL, false).await.unwrap();
    let stats = registry.storage_stats();

    assert_eq!(stats.count, 1);
    assert_eq!(stats.total_bytes, 1024);
    assert_eq!(stats.per_model, vec![(MODEL.to_string(), 1024)]);
    assert_eq!(stats.models_dir, temp_dir.path());
    assert_eq!(stats.registry_file, temp_dir.path().join(REGISTRY_FILE));
}
