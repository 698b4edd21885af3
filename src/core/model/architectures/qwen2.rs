use super::{CausalStep, SampledTokens};
use crate::core::model::factory::ModelDirectory;
use crate::core::model::traits::{LanguageModel, SamplingOptions, TokenIterator};
use crate::core::{Result, TokenId};
use candle_core::{Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::qwen2::{Config, ModelForCausalLM};

pub struct Qwen2Model {
    model: ModelForCausalLM,
    device: Device,
}

pub fn create(dir: &ModelDirectory) -> Result<Box<dyn LanguageModel>> {
    let config: Config = serde_json::from_value(dir.config.clone())?;

    // SAFETY: shards are memory mapped read only and not modified while mapped.
    let vb = unsafe { VarBuilder::from_mmaped_safetensors(dir.require_weights()?, dir.dtype, &dir.device)? };
    let model = ModelForCausalLM::new(&config, vb)?;

    Ok(Box::new(Qwen2Model {
        model,
        device: dir.device.clone(),
    }))
}

// The qwen2 model keeps its key/value cache internally, so each turn works
// on its own copy; weight tensors are reference counted and not duplicated.
struct Qwen2Step(ModelForCausalLM);

impl CausalStep for Qwen2Step {
    fn forward(&mut self, input: &Tensor, index_pos: usize) -> candle_core::Result<Tensor> {
        self.0.forward(input, index_pos)
    }
}

impl LanguageModel for Qwen2Model {
    fn model_type(&self) -> &str {
        "qwen2"
    }

    fn start<'a>(
        &'a self,
        input: &[TokenId],
        sampling: &SamplingOptions,
    ) -> Result<Box<dyn TokenIterator + 'a>> {
        let mut model = self.model.clone();
        model.clear_kv_cache();
        Ok(Box::new(SampledTokens::new(Qwen2Step(model), self.device.clone(), input, sampling)))
    }
}
