use crate::core::{Result, TokenId};

/// A constructed model, ready to produce tokens.
///
/// `start` is called once per turn and must not disturb other turns: any
/// per-turn state (key/value cache, sampler) belongs to the returned
/// iterator.
pub trait LanguageModel: Send + Sync {
    fn model_type(&self) -> &str;

    fn start<'a>(
        &'a self,
        input: &[TokenId],
        sampling: &SamplingOptions,
    ) -> Result<Box<dyn TokenIterator + 'a>>;
}

pub trait TokenIterator {
    /// Produces the next token. The caller decides whether to keep going.
    fn next_token(&mut self) -> Result<TokenId>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct SamplingOptions {
    pub seed: u64,
    pub temperature: f32,
    pub top_p: f32,
    pub repetition_penalty: Option<f32>,
    pub repetition_context_size: usize,
}

impl Default for SamplingOptions {
    fn default() -> Self {
        Self {
            seed: 0,
            temperature: 0.6,
            top_p: 1.0,
            repetition_penalty: None,
            repetition_context_size: 20,
        }
    }
}

impl SamplingOptions {
    pub fn temperature(&self) -> Option<f64> {
        if self.temperature <= 0.0 {
            None
        } else {
            Some(self.temperature as f64)
        }
    }

    pub fn top_p(&self) -> Option<f64> {
        if self.top_p >= 1.0 {
            None
        } else {
            Some(self.top_p as f64)
        }
    }
}
