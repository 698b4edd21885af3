pub mod traits;
pub mod config;
pub mod factory;
pub mod registry;
pub mod architectures;

pub use traits::{LanguageModel, TokenIterator, SamplingOptions};
pub use config::{ModelConfiguration, ModelConfigurationBuilder};
pub use factory::{ModelFactory, ModelDirectory, ModelCreator, TokenizerLoader};
pub use registry::ModelRegistry;

use crate::core::tokenizer::{Message, Tokenizer};
use crate::core::error::GenerationError;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TokenId(pub u32);

impl From<u32> for TokenId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

pub fn raw_ids(tokens: &[TokenId]) -> Vec<u32> {
    tokens.iter().map(|t| t.0).collect()
}

/// Tokens handed to the engine for one turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedInput {
    pub tokens: Vec<TokenId>,
    /// False when the chat template failed and contents were concatenated.
    pub templated: bool,
}

/// A loaded model with its tokenizer. Shared across turns, never mutated.
#[derive(Clone)]
pub struct ModelHandle {
    configuration: ModelConfiguration,
    model: Arc<dyn LanguageModel>,
    tokenizer: Arc<dyn Tokenizer>,
}

impl ModelHandle {
    pub fn new(
        configuration: ModelConfiguration,
        model: Arc<dyn LanguageModel>,
        tokenizer: Arc<dyn Tokenizer>,
    ) -> Self {
        Self { configuration, model, tokenizer }
    }

    pub fn configuration(&self) -> &ModelConfiguration {
        &self.configuration
    }

    pub fn model(&self) -> &Arc<dyn LanguageModel> {
        &self.model
    }

    pub fn tokenizer(&self) -> &Arc<dyn Tokenizer> {
        &self.tokenizer
    }

    /// Renders the conversation through the chat template. A template
    /// failure is not an error: the message contents are joined and
    /// tokenized as plain text instead.
    pub fn prepare(&self, messages: &[Message]) -> Result<PreparedInput, GenerationError> {
        match self.tokenizer.apply_chat_template(messages) {
            Ok(tokens) => Ok(PreparedInput { tokens, templated: true }),
            Err(err) => {
                tracing::warn!(model = %self.configuration.id, "chat template unavailable, concatenating messages: {}", err);
                let text = messages
                    .iter()
                    .map(|m| m.content.as_str())
                    .collect::<Vec<_>>()
                    .join("\n");
                let tokens = self
                    .tokenizer
                    .encode(&text)
                    .map_err(|e| GenerationError::Tokenize(e.to_string()))?;
                Ok(PreparedInput { tokens, templated: false })
            }
        }
    }
}

impl std::fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelHandle")
            .field("id", &self.configuration.id)
            .field("model_type", &self.model.model_type())
            .finish()
    }
}

impl PartialEq for ModelHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.model, &other.model) && Arc::ptr_eq(&self.tokenizer, &other.tokenizer)
    }
}
