//! Driving a model's token iterator under the end-of-sequence rules.

use crate::core::error::GenerationError;
use crate::core::model::{LanguageModel, SamplingOptions};
use crate::core::tokenizer::Tokenizer;
use crate::core::{Result, TokenId};
use std::collections::HashSet;
use std::time::Duration;

/// Per-token answer from the consumer of the token stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Continue,
    Stop,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParameters {
    pub temperature: f32,
    pub top_p: f32,
    pub repetition_penalty: Option<f32>,
    pub repetition_context_size: usize,
    pub max_tokens: usize,
    /// Publish decoded output every N tokens.
    pub display_every: usize,
    pub extra_eos_tokens: Vec<String>,
    pub turn_timeout: Option<Duration>,
}

impl Default for GenerationParameters {
    fn default() -> Self {
        Self {
            temperature: 0.6,
            top_p: 1.0,
            repetition_penalty: None,
            repetition_context_size: 20,
            max_tokens: 240,
            display_every: 4,
            extra_eos_tokens: Vec::new(),
            turn_timeout: None,
        }
    }
}

impl GenerationParameters {
    pub fn max_tokens(mut self, max: usize) -> Self {
        self.max_tokens = max;
        self
    }

    pub fn display_every(mut self, n: usize) -> Self {
        self.display_every = n;
        self
    }

    pub fn temperature(mut self, temp: f32) -> Self {
        self.temperature = temp;
        self
    }

    pub fn top_p(mut self, p: f32) -> Self {
        self.top_p = p;
        self
    }

    pub fn repetition_penalty(mut self, penalty: f32, context_size: usize) -> Self {
        self.repetition_penalty = Some(penalty);
        self.repetition_context_size = context_size;
        self
    }

    pub fn extra_eos_token(mut self, token: impl Into<String>) -> Self {
        self.extra_eos_tokens.push(token.into());
        self
    }

    pub fn turn_timeout(mut self, timeout: Duration) -> Self {
        self.turn_timeout = Some(timeout);
        self
    }

    pub fn validate(&self) -> std::result::Result<(), GenerationError> {
        let invalid = |msg: String| Err(GenerationError::InvalidParameters(msg));

        if self.max_tokens == 0 {
            return invalid("max_tokens must be greater than 0".to_string());
        }
        if self.display_every == 0 {
            return invalid("display_every must be greater than 0".to_string());
        }
        if !(self.temperature >= 0.0) {
            return invalid(format!("temperature must not be negative, got {}", self.temperature));
        }
        if !(self.top_p > 0.0 && self.top_p <= 1.0) {
            return invalid(format!("top_p must be in (0, 1], got {}", self.top_p));
        }
        Ok(())
    }

    pub fn sampling(&self, seed: u64) -> SamplingOptions {
        SamplingOptions {
            seed,
            temperature: self.temperature,
            top_p: self.top_p,
            repetition_penalty: self.repetition_penalty,
            repetition_context_size: self.repetition_context_size,
        }
    }
}

/// Token ids that end the stream as soon as the model produces them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StopTokens {
    ids: HashSet<TokenId>,
}

impl StopTokens {
    /// The tokenizer's own end-of-sequence ids plus every extra string that
    /// maps to a single vocabulary entry. Unknown strings are skipped.
    pub fn resolve<'a>(tokenizer: &dyn Tokenizer, extra: impl IntoIterator<Item = &'a String>) -> Self {
        let mut ids: HashSet<TokenId> = tokenizer.eos_tokens().into_iter().collect();
        for token in extra {
            match tokenizer.token_to_id(token) {
                Some(id) => {
                    ids.insert(id);
                }
                None => tracing::debug!(token = %token, "extra end-of-sequence token not in vocabulary"),
            }
        }
        Self { ids }
    }

    pub fn contains(&self, token: TokenId) -> bool {
        self.ids.contains(&token)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Runs the model over `input`, handing every growing prefix of generated
/// tokens to `did_generate`. Ends on a stop token (not included in the
/// output) or when the callback answers `Stop`. Returns the generated
/// tokens.
pub fn generate<F>(
    input: &[TokenId],
    sampling: &SamplingOptions,
    model: &dyn LanguageModel,
    stop: &StopTokens,
    mut did_generate: F,
) -> Result<Vec<TokenId>>
where
    F: FnMut(&[TokenId]) -> Disposition,
{
    let mut iterator = model.start(input, sampling)?;
    let mut tokens = Vec::new();

    loop {
        let token = iterator.next_token()?;
        if stop.contains(token) {
            tracing::debug!(token = token.0, generated = tokens.len(), "end of sequence");
            break;
        }

        tokens.push(token);
        if did_generate(&tokens) == Disposition::Stop {
            break;
        }
    }

    Ok(tokens)
}
