//! GGUF inference through llama.cpp

use super::decode::{generation_budget, stop_position, PieceDecoder};
use super::{GenerationProgress, InferenceModel, RunnerParams, SamplingParams};
use crate::error::{BielikError, LoadError, Result};
use llama_cpp_2::context::params::LlamaContextParams;
use llama_cpp_2::llama_backend::LlamaBackend;
use llama_cpp_2::llama_batch::LlamaBatch;
use llama_cpp_2::model::params::LlamaModelParams;
use llama_cpp_2::model::{AddBos, LlamaModel, Special};
use llama_cpp_2::sampling::LlamaSampler;
use once_cell::sync::OnceCell;
use std::num::NonZeroU32;
use std::path::Path;

/// llama.cpp limits how many tokens a single decode may take
const PREFILL_BATCH_SIZE: usize = 512;

/// The backend may only be initialised once per process
static BACKEND: OnceCell<LlamaBackend> = OnceCell::new();

fn backend(verbose: bool) -> std::result::Result<&'static LlamaBackend, LoadError> {
    BACKEND.get_or_try_init(|| {
        let mut backend = LlamaBackend::init().map_err(|e| LoadError::Failed(e.to_string()))?;
        if !verbose {
            backend.void_logs();
        }
        Ok(backend)
    })
}

fn inference_err(e: impl std::fmt::Display) -> BielikError {
    BielikError::Other(e.to_string())
}

/// A GGUF model held by llama.cpp
pub struct LlamaInference {
    backend: &'static LlamaBackend,
    model: LlamaModel,
    context_length: u32,
    threads: i32,
}

impl LlamaInference {
    pub fn load(path: &Path, params: &RunnerParams) -> std::result::Result<Self, LoadError> {
        if !path.is_file() {
            return Err(LoadError::Failed(format!(
                "model file not found: {}",
                path.display()
            )));
        }

        let backend = backend(params.verbose)?;
        let model_params = LlamaModelParams::default().with_n_gpu_layers(params.gpu_layers);
        let model = LlamaModel::load_from_file(backend, path, &model_params)
            .map_err(|e| LoadError::Failed(e.to_string()))?;

        let threads = params.threads.map_or_else(
            || {
                std::thread::available_parallelism()
                    .map(|n| i32::try_from(n.get()).unwrap_or(4))
                    .unwrap_or(4)
            },
            |t| i32::try_from(t).unwrap_or(4),
        );

        Ok(Self {
            backend,
            model,
            context_length: params.context_length,
            threads,
        })
    }
}

impl InferenceModel for LlamaInference {
    #[allow(clippy::cast_possible_wrap, clippy::cast_possible_truncation)]
    fn generate(
        &self,
        prompt: &str,
        params: &SamplingParams,
        progress: &mut GenerationProgress,
    ) -> Result<String> {
        let n_ctx = NonZeroU32::new(self.context_length)
            .or(NonZeroU32::new(4096))
            .ok_or_else(|| inference_err("invalid context size"))?;

        let tokens = self
            .model
            .str_to_token(prompt, AddBos::Always)
            .map_err(inference_err)?;

        let budget = generation_budget(tokens.len(), params.max_tokens, n_ctx.get() as usize)?;

        let ctx_params = LlamaContextParams::default()
            .with_n_ctx(Some(n_ctx))
            .with_n_threads(self.threads)
            .with_n_threads_batch(self.threads);

        let mut ctx = self
            .model
            .new_context(self.backend, ctx_params)
            .map_err(inference_err)?;

        let mut batch = LlamaBatch::new(PREFILL_BATCH_SIZE, 1);
        let last_pos = (tokens.len() as i32).saturating_sub(1);

        let mut pos = 0i32;
        for chunk in tokens.chunks(PREFILL_BATCH_SIZE) {
            batch.clear();
            for (j, &token) in chunk.iter().enumerate() {
                let p = pos + j as i32;
                batch
                    .add(token, p, &[0], p == last_pos)
                    .map_err(inference_err)?;
            }
            ctx.decode(&mut batch).map_err(inference_err)?;
            pos += chunk.len() as i32;
        }

        let mut sampler = LlamaSampler::chain_simple([
            LlamaSampler::top_p(params.top_p, 1),
            LlamaSampler::temp(params.temperature),
            LlamaSampler::dist(rand_seed()),
        ]);

        let mut output = String::new();
        let mut decoder = PieceDecoder::new();
        let mut n_cur = tokens.len() as i32;

        for _ in 0..budget {
            let token = sampler.sample(&ctx, batch.n_tokens() - 1);
            sampler.accept(token);

            if self.model.is_eog_token(token) {
                break;
            }

            let bytes = self
                .model
                .token_to_bytes(token, Special::Tokenize)
                .map_err(inference_err)?;
            output.push_str(&decoder.push(&bytes));
            progress.tick();

            if let Some(cut) = stop_position(&output, &params.stop) {
                output.truncate(cut);
                return Ok(output);
            }

            batch.clear();
            batch.add(token, n_cur, &[0], true).map_err(inference_err)?;
            n_cur += 1;

            ctx.decode(&mut batch).map_err(inference_err)?;
        }

        output.push_str(&decoder.finish());
        if let Some(cut) = stop_position(&output, &params.stop) {
            output.truncate(cut);
        }
        Ok(output)
    }
}

fn rand_seed() -> u32 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(1234, |d| d.subsec_nanos())
}
