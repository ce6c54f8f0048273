//! Token budget and detokenization helpers for the native runner

use crate::error::{BielikError, Result};

/// How many tokens may be generated after a prompt of `prompt_tokens`.
///
/// Fails when the prompt alone fills the context, otherwise caps
/// `max_tokens` at the room left.
pub fn generation_budget(prompt_tokens: usize, max_tokens: usize, n_ctx: usize) -> Result<usize> {
    if prompt_tokens >= n_ctx {
        return Err(BielikError::ContextOverflow {
            prompt_tokens,
            context_length: n_ctx,
        });
    }

    let room = n_ctx - prompt_tokens;
    if max_tokens > room {
        tracing::warn!(
            "Prompt ({prompt_tokens} tokens) leaves room for {room} of {max_tokens} requested tokens"
        );
    }
    Ok(max_tokens.min(room))
}

/// Incremental UTF-8 decoder for token pieces.
///
/// Byte-fallback tokens can split a character across pieces, so incomplete
/// trailing bytes are held until the next piece completes them.
#[derive(Debug, Default)]
pub struct PieceDecoder {
    pending: Vec<u8>,
}

impl PieceDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `bytes` and return whatever now decodes
    pub fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);

        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    return out;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    // valid_up_to always lands on a char boundary
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match e.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + bad);
                        }
                        None => {
                            self.pending.drain(..valid);
                            return out;
                        }
                    }
                }
            }
        }
    }

    /// Flush bytes that never completed a character
    pub fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        rest
    }
}

/// Byte offset of the first stop sequence found in `text`
#[must_use]
pub fn stop_position(text: &str, stop: &[String]) -> Option<usize> {
    stop.iter()
        .filter(|s| !s.is_empty())
        .filter_map(|s| text.find(s.as_str()))
        .min()
}
