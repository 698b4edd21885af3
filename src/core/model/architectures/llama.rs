use super::{CausalStep, SampledTokens};
use crate::core::model::factory::ModelDirectory;
use crate::core::model::traits::{LanguageModel, SamplingOptions, TokenIterator};
use crate::core::{Result, TokenId};
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::llama::{Cache, Config, Llama, LlamaConfig};

pub struct LlamaModel {
    model: Llama,
    config: Config,
    device: Device,
    dtype: DType,
}

pub fn create(dir: &ModelDirectory) -> Result<Box<dyn LanguageModel>> {
    let config: LlamaConfig = serde_json::from_value(dir.config.clone())?;
    let config = config.into_config(false);

    // SAFETY: shards are memory mapped read only and not modified while mapped.
    let vb = unsafe { VarBuilder::from_mmaped_safetensors(dir.require_weights()?, dir.dtype, &dir.device)? };
    let model = Llama::load(vb, &config)?;

    Ok(Box::new(LlamaModel {
        model,
        config,
        device: dir.device.clone(),
        dtype: dir.dtype,
    }))
}

struct LlamaStep<'a> {
    model: &'a Llama,
    cache: Cache,
}

impl CausalStep for LlamaStep<'_> {
    fn forward(&mut self, input: &Tensor, index_pos: usize) -> candle_core::Result<Tensor> {
        self.model.forward(input, index_pos, &mut self.cache)
    }
}

impl LanguageModel for LlamaModel {
    fn model_type(&self) -> &str {
        "llama"
    }

    fn start<'a>(
        &'a self,
        input: &[TokenId],
        sampling: &SamplingOptions,
    ) -> Result<Box<dyn TokenIterator + 'a>> {
        let cache = Cache::new(true, self.dtype, &self.config, &self.device)?;
        let step = LlamaStep { model: &self.model, cache };
        Ok(Box::new(SampledTokens::new(step, self.device.clone(), input, sampling)))
    }
}
