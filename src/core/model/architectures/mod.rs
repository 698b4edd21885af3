pub mod llama;
pub mod qwen2;

use crate::core::model::traits::{SamplingOptions, TokenIterator};
use crate::core::{Result, TokenId};
use candle_core::{DType, Device, Tensor};
use candle_transformers::generation::LogitsProcessor;

/// One forward step of a causal language model: logits for the last
/// position of `input`, which starts at `index_pos` in the sequence.
pub trait CausalStep {
    fn forward(&mut self, input: &Tensor, index_pos: usize) -> candle_core::Result<Tensor>;
}

/// Prompt prefill followed by one-token decode steps, sampling each next
/// token from the model's logits.
pub struct SampledTokens<S: CausalStep> {
    step: S,
    device: Device,
    sampler: LogitsProcessor,
    repetition_penalty: Option<f32>,
    repetition_context_size: usize,
    pending: Vec<u32>,
    history: Vec<u32>,
    index_pos: usize,
}

impl<S: CausalStep> SampledTokens<S> {
    pub fn new(step: S, device: Device, input: &[TokenId], sampling: &SamplingOptions) -> Self {
        let prompt: Vec<u32> = input.iter().map(|t| t.0).collect();
        Self {
            step,
            device,
            sampler: LogitsProcessor::new(sampling.seed, sampling.temperature(), sampling.top_p()),
            repetition_penalty: sampling.repetition_penalty,
            repetition_context_size: sampling.repetition_context_size,
            history: prompt.clone(),
            pending: prompt,
            index_pos: 0,
        }
    }
}

impl<S: CausalStep> TokenIterator for SampledTokens<S> {
    fn next_token(&mut self) -> Result<TokenId> {
        if self.pending.is_empty() {
            anyhow::bail!("cannot generate from an empty prompt");
        }

        let input = Tensor::new(self.pending.as_slice(), &self.device)?.unsqueeze(0)?;
        let logits = self.step.forward(&input, self.index_pos)?;
        let mut logits = logits.flatten_all()?.to_dtype(DType::F32)?;
        self.index_pos += self.pending.len();

        if let Some(penalty) = self.repetition_penalty {
            let start = self.history.len().saturating_sub(self.repetition_context_size);
            logits = candle_transformers::utils::apply_repeat_penalty(&logits, penalty, &self.history[start..])?;
        }

        let next = self.sampler.sample(&logits)?;
        self.history.push(next);
        self.pending = vec![next];
        Ok(TokenId(next))
    }
}
