use super::{InferenceModel, ModelLoader, RunnerParams};
use crate::error::LoadError;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Loader backed by llama.cpp when the `local` feature is enabled
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeLoader;

impl ModelLoader for NativeLoader {
    fn is_available(&self) -> bool {
        cfg!(feature = "local")
    }

    #[cfg(feature = "local")]
    fn load(
        &self,
        path: &Path,
        params: &RunnerParams,
    ) -> Result<Arc<dyn InferenceModel>, LoadError> {
        let model = super::native::LlamaInference::load(path, params)?;
        Ok(Arc::new(model))
    }

    #[cfg(not(feature = "local"))]
    fn load(
        &self,
        _path: &Path,
        _params: &RunnerParams,
    ) -> Result<Arc<dyn InferenceModel>, LoadError> {
        Err(LoadError::NotInstalled)
    }
}

/// Run `loader` on a blocking task and give up after `timeout`.
///
/// An expired load is abandoned rather than killed; the blocking thread keeps
/// running until the native call returns.
pub async fn load_with_timeout<T, F>(loader: F, timeout: Duration) -> Result<T, LoadError>
where
    F: FnOnce() -> Result<T, LoadError> + Send + 'static,
    T: Send + 'static,
{
    let handle = tokio::task::spawn_blocking(loader);

    match tokio::time::timeout(timeout, handle).await {
        Err(_) => {
            tracing::warn!("Model loading timed out after {timeout:?}");
            Err(LoadError::Timeout(timeout))
        }
        Ok(Err(join_err)) => Err(LoadError::Failed(format!(
            "loader task panicked: {join_err}"
        ))),
        Ok(Ok(result)) => result,
    }
}

/// Load with the configured GPU layers, retrying once on CPU if that fails.
///
/// A timed-out GPU load is not retried: the abandoned load keeps running on
/// its blocking thread, and a second one would compete with it for memory.
pub async fn load_model(
    path: &Path,
    params: &RunnerParams,
    loader: Arc<dyn ModelLoader>,
) -> Result<Arc<dyn InferenceModel>, LoadError> {
    let first = attempt(path, params.clone(), Arc::clone(&loader)).await;

    match first {
        Ok(model) => Ok(model),
        Err(LoadError::Timeout(limit)) => Err(LoadError::Timeout(limit)),
        Err(e) if params.gpu_layers > 0 => {
            tracing::warn!(
                "GPU load failed ({e}), retrying with gpu_layers=0 for {}",
                path.display()
            );
            let cpu_params = RunnerParams {
                gpu_layers: 0,
                ..params.clone()
            };
            attempt(path, cpu_params, loader).await
        }
        Err(e) => Err(e),
    }
}

async fn attempt(
    path: &Path,
    params: RunnerParams,
    loader: Arc<dyn ModelLoader>,
) -> Result<Arc<dyn InferenceModel>, LoadError> {
    let path = path.to_path_buf();
    let timeout = params.load_timeout;
    load_with_timeout(move || loader.load(&path, &params), timeout).await
}
