pub mod error;
pub mod model;
pub mod tokenizer;
pub mod generation;

pub use error::{GenerationError, LoadError, TemplateError};
pub use model::{
    LanguageModel, ModelConfiguration, ModelFactory, ModelHandle, ModelRegistry, PreparedInput,
    SamplingOptions, TokenId, TokenIterator,
};
pub use tokenizer::{Message, Role, Tokenizer};
pub use generation::{Disposition, GenerationParameters, StopTokens};

pub type Result<T> = anyhow::Result<T>;
