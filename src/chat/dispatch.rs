//! Local-vs-remote routing and the remote fallback chain

use crate::backends::{ChatBackend, HfApiClient, OllamaClient, RestClient};
use crate::chat::ConversationMessage;
use crate::config::Config;
use crate::error::{ChatError, ChatResult, LoadError};
use crate::models::{CatalogEntry, ModelRegistry};
use crate::runner::{LocalRunner, ModelLoader, NativeLoader, RunnerParams};
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Routes chat requests to a local runner or the remote backends.
///
/// Remote backends are tried in order: REST, then the Ollama native API
/// (when enabled), then the hosted Hugging Face API (when enabled). The
/// first success wins; otherwise the last error is returned.
pub struct Dispatcher {
    registry: Arc<Mutex<ModelRegistry>>,
    loader: Arc<dyn ModelLoader>,
    runner_params: RunnerParams,
    runners: DashMap<PathBuf, Arc<LocalRunner>>,
    rest: Arc<dyn ChatBackend>,
    ollama_lib: Option<Arc<dyn ChatBackend>>,
    hf_api: Option<Arc<dyn ChatBackend>>,
}

impl Dispatcher {
    /// Dispatcher with only the REST backend and the native loader
    pub fn new(registry: Arc<Mutex<ModelRegistry>>, rest: Arc<dyn ChatBackend>) -> Self {
        Self {
            registry,
            loader: Arc::new(NativeLoader),
            runner_params: RunnerParams::default(),
            runners: DashMap::new(),
            rest,
            ollama_lib: None,
            hf_api: None,
        }
    }

    /// Wire every backend from config
    #[must_use]
    pub fn from_config(config: &Config, registry: Arc<Mutex<ModelRegistry>>) -> Self {
        let ollama_lib = config
            .remote
            .ollama_lib
            .then(|| Arc::new(OllamaClient::from_config(config)) as Arc<dyn ChatBackend>);
        let hf_api = config
            .remote
            .hf_api
            .then(|| Arc::new(HfApiClient::from_config(&config.remote)) as Arc<dyn ChatBackend>);

        Self::new(registry, Arc::new(RestClient::from_config(config)))
            .with_loader(Arc::new(NativeLoader), RunnerParams::from(&config.local))
            .with_ollama_lib(ollama_lib)
            .with_hf_api(hf_api)
    }

    #[must_use]
    pub fn with_loader(mut self, loader: Arc<dyn ModelLoader>, params: RunnerParams) -> Self {
        self.loader = loader;
        self.runner_params = params;
        self
    }

    #[must_use]
    pub fn with_ollama_lib(mut self, backend: Option<Arc<dyn ChatBackend>>) -> Self {
        self.ollama_lib = backend;
        self
    }

    #[must_use]
    pub fn with_hf_api(mut self, backend: Option<Arc<dyn ChatBackend>>) -> Self {
        self.hf_api = backend;
        self
    }

    /// Shared handle to the model registry
    #[must_use]
    pub fn registry(&self) -> Arc<Mutex<ModelRegistry>> {
        Arc::clone(&self.registry)
    }

    /// Whether `model` is served locally without the explicit flag
    #[must_use]
    pub fn is_local_model(model: &str) -> bool {
        CatalogEntry::find(model).is_some() || is_gguf_file(Path::new(model))
    }

    /// Send `messages` to `model`.
    ///
    /// With `use_local` set, a local failure is returned as is. Otherwise a
    /// local failure for a catalog model or `.gguf` path falls through to the
    /// remote chain.
    pub async fn send_chat(
        &self,
        messages: &[ConversationMessage],
        model: &str,
        use_local: bool,
    ) -> ChatResult {
        let mut last_error = None;

        if use_local || Self::is_local_model(model) {
            match self.send_local(messages, model).await {
                Ok(text) => return Ok(text),
                Err(e) if use_local => return Err(e),
                Err(e) => {
                    tracing::warn!("Local model failed, trying remote backends: {e}");
                    last_error = Some(e);
                }
            }
        }

        for backend in self.remote_chain() {
            match backend.chat(messages, model).await {
                Ok(text) => {
                    tracing::debug!("Response from {} backend", backend.backend_name());
                    return Ok(text);
                }
                Err(e) => {
                    tracing::warn!("{} backend failed: {e}", backend.backend_name());
                    last_error = Some(e);
                }
            }
        }

        let last = last_error.unwrap_or_else(|| ChatError::generic("no backend configured"));
        if self.hf_api.is_some() {
            Err(last)
        } else {
            Err(ChatError::generic(format!("all backends failed: {last}")))
        }
    }

    /// Whether the local runtime can load models at all
    #[must_use]
    pub fn local_available(&self) -> bool {
        self.loader.is_available()
    }

    /// Number of loaded runners kept in memory
    #[must_use]
    pub fn cached_runners(&self) -> usize {
        self.runners.len()
    }

    /// Drop every loaded runner
    pub fn clear_runner_cache(&self) {
        let count = self.runners.len();
        self.runners.clear();
        tracing::info!("Cleared {count} cached model runner(s)");
    }

    fn remote_chain(&self) -> impl Iterator<Item = &Arc<dyn ChatBackend>> {
        std::iter::once(&self.rest)
            .chain(self.ollama_lib.iter())
            .chain(self.hf_api.iter())
    }

    async fn send_local(&self, messages: &[ConversationMessage], model: &str) -> ChatResult {
        if !self.loader.is_available() {
            return Err(LoadError::NotInstalled.into());
        }

        let path = self.resolve_local_path(model).await?;
        let runner = self.runner_for(path).await?;
        let reply = runner.chat(messages).await?;
        tracing::info!("Local model response received for {model}");
        Ok(reply)
    }

    async fn resolve_local_path(&self, model: &str) -> Result<PathBuf, ChatError> {
        if CatalogEntry::find(model).is_none() && is_gguf_file(Path::new(model)) {
            return Ok(PathBuf::from(model));
        }

        self.registry
            .lock()
            .await
            .model_path(model)
            .ok_or_else(|| {
                ChatError::local(format!("Model {model} not downloaded. Use :download {model}"))
            })
    }

    async fn runner_for(&self, path: PathBuf) -> Result<Arc<LocalRunner>, ChatError> {
        if let Some(runner) = self.runners.get(&path).map(|r| Arc::clone(r.value())) {
            return Ok(runner);
        }

        let runner = LocalRunner::load(
            path.clone(),
            self.runner_params.clone(),
            Arc::clone(&self.loader),
        )
        .await?;

        // A concurrent load of the same path may have finished first; keep that one
        let runner = Arc::clone(self.runners.entry(path).or_insert(Arc::new(runner)).value());
        Ok(runner)
    }
}

fn is_gguf_file(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("gguf"))
        && path.is_file()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, Result};
    use crate::models::hub::{FetchRequest, ModelHub};
    use crate::runner::{GenerationProgress, InferenceModel, SamplingParams};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct NoHub;

    #[async_trait]
    impl ModelHub for NoHub {
        async fn list_files(&self, _repo_id: &str) -> Result<Vec<String>> {
            Ok(Vec::new())
        }

        async fn fetch(&self, _request: FetchRequest<'_>) -> Result<PathBuf> {
            Err(crate::error::BielikError::Hub("offline".to_string()))
        }
    }

    struct Fixed {
        name: &'static str,
        reply: ChatResult,
        calls: AtomicUsize,
    }

    impl Fixed {
        fn ok(name: &'static str, text: &str) -> Arc<Self> {
            Arc::new(Self {
                name,
                reply: Ok(text.to_string()),
                calls: AtomicUsize::new(0),
            })
        }

        fn err(name: &'static str, err: ChatError) -> Arc<Self> {
            Arc::new(Self {
                name,
                reply: Err(err),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ChatBackend for Fixed {
        async fn chat(&self, _messages: &[ConversationMessage], _model: &str) -> ChatResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.reply.clone()
        }

        fn backend_name(&self) -> &'static str {
            self.name
        }
    }

    struct Parrot;

    impl InferenceModel for Parrot {
        fn generate(
            &self,
            _prompt: &str,
            _params: &SamplingParams,
            _progress: &mut GenerationProgress,
        ) -> Result<String> {
            Ok(" lokalnie ".to_string())
        }
    }

    #[derive(Default)]
    struct CountingLoader {
        loads: AtomicUsize,
    }

    impl ModelLoader for CountingLoader {
        fn load(
            &self,
            _path: &Path,
            _params: &RunnerParams,
        ) -> std::result::Result<Arc<dyn InferenceModel>, LoadError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(Parrot))
        }
    }

    fn registry(dir: &TempDir) -> Arc<Mutex<ModelRegistry>> {
        Arc::new(Mutex::new(
            ModelRegistry::open(dir.path(), Arc::new(NoHub)).unwrap(),
        ))
    }

    fn messages() -> Vec<ConversationMessage> {
        vec![ConversationMessage::user("Cześć")]
    }

    #[tokio::test]
    async fn test_remote_model_uses_rest_first() {
        let dir = TempDir::new().unwrap();
        let rest = Fixed::ok("rest", "hola");
        let lib = Fixed::ok("ollama", "unused");
        let dispatcher = Dispatcher::new(registry(&dir), rest.clone())
            .with_ollama_lib(Some(lib.clone()));

        let reply = dispatcher.send_chat(&messages(), "bielik", false).await;
        assert_eq!(reply.unwrap(), "hola");
        assert_eq!(lib.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_hf_error_wins_when_attempted() {
        let dir = TempDir::new().unwrap();
        let dispatcher = Dispatcher::new(registry(&dir), Fixed::err("rest", ChatError::rest("down")))
            .with_ollama_lib(Some(Fixed::err("ollama", ChatError::ollama_lib("down"))))
            .with_hf_api(Some(Fixed::err("hf_api", ChatError::hf_api("quota"))));

        let err = dispatcher.send_chat(&messages(), "bielik", false).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::HfApi);
        assert_eq!(err.to_string(), "[HF API ERROR] quota");
    }

    #[tokio::test]
    async fn test_generic_error_when_hf_disabled() {
        let dir = TempDir::new().unwrap();
        let dispatcher =
            Dispatcher::new(registry(&dir), Fixed::err("rest", ChatError::rest("timeout")));

        let err = dispatcher.send_chat(&messages(), "bielik", false).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Generic);
        assert!(err.to_string().starts_with("[ERROR] all backends failed"));
        assert!(err.message.contains("timeout"));
    }

    #[tokio::test]
    async fn test_undownloaded_catalog_model_explicit_local() {
        let dir = TempDir::new().unwrap();
        let rest = Fixed::ok("rest", "remote");
        let dispatcher = Dispatcher::new(registry(&dir), rest.clone())
            .with_loader(Arc::new(CountingLoader::default()), RunnerParams::default());

        let err = dispatcher
            .send_chat(&messages(), "bielik-7b-instruct-v0.1", true)
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "[LOCAL MODEL ERROR] Model bielik-7b-instruct-v0.1 not downloaded. Use :download bielik-7b-instruct-v0.1"
        );
        assert_eq!(rest.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_local_failure_falls_through_without_flag() {
        let dir = TempDir::new().unwrap();
        let rest = Fixed::ok("rest", "remote");
        let dispatcher = Dispatcher::new(registry(&dir), rest.clone())
            .with_loader(Arc::new(CountingLoader::default()), RunnerParams::default());

        let reply = dispatcher
            .send_chat(&messages(), "bielik-7b-instruct-v0.1", false)
            .await;
        assert_eq!(reply.unwrap(), "remote");
        assert_eq!(rest.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_gguf_path_runs_locally_and_caches_runner() {
        let dir = TempDir::new().unwrap();
        let model_file = dir.path().join("tiny.gguf");
        std::fs::write(&model_file, b"GGUF").unwrap();

        let loader = Arc::new(CountingLoader::default());
        let rest = Fixed::ok("rest", "remote");
        let dispatcher = Dispatcher::new(registry(&dir), rest.clone())
            .with_loader(loader.clone(), RunnerParams::default());

        let model = model_file.to_string_lossy().to_string();
        for _ in 0..2 {
            let reply = dispatcher.send_chat(&messages(), &model, false).await;
            assert_eq!(reply.unwrap(), "lokalnie");
        }

        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
        assert_eq!(dispatcher.cached_runners(), 1);
        assert_eq!(rest.calls.load(Ordering::SeqCst), 0);

        dispatcher.clear_runner_cache();
        assert_eq!(dispatcher.cached_runners(), 0);
        dispatcher.send_chat(&messages(), &model, false).await.unwrap();
        assert_eq!(loader.loads.load(Ordering::SeqCst), 2);
    }

    #[cfg(not(feature = "local"))]
    #[tokio::test]
    async fn test_native_loader_not_installed() {
        let dir = TempDir::new().unwrap();
        let dispatcher = Dispatcher::new(registry(&dir), Fixed::ok("rest", "remote"));

        let err = dispatcher
            .send_chat(&messages(), "bielik-4.5b-v3.0-instruct", true)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::LocalModel);
        assert!(err.message.contains("not installed"));
    }

    #[test]
    fn test_is_local_model() {
        assert!(Dispatcher::is_local_model("bielik-11b-v2.3-instruct"));
        assert!(!Dispatcher::is_local_model("SpeakLeash/bielik-7b-instruct-v0.1-gguf"));
        assert!(!Dispatcher::is_local_model("/nonexistent/model.gguf"));
    }
}
