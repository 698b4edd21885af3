pub mod app;
pub mod cmd;
pub mod core;
pub mod envconfig;
pub mod progress;
pub mod rng;

#[cfg(test)]
pub(crate) mod testing;

pub use crate::app::{
    ChatState, ChatWorker, Evaluator, Event, EventBus, EventHandler, GenerationResult, LoadState, LocalSource,
    ModelLoader, ModelSource, StopReason, SubmitError, TurnOutcome,
};
pub use crate::core::{
    GenerationError, GenerationParameters, LanguageModel, LoadError, Message, ModelConfiguration, ModelFactory,
    ModelHandle, ModelRegistry, Result, Role, SamplingOptions, TokenId, TokenIterator, Tokenizer,
};
pub use crate::rng::{ClockSeed, FixedSeed, SeedSource};
