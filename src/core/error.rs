use thiserror::Error;

/// Failure to bring a model into the `Ready` state.
///
/// Stored inside `LoadState::Failed`, so every variant carries owned text
/// and the type stays `Clone`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    #[error("model files for {id} are not available: {reason}")]
    Fetch { id: String, reason: String },

    #[error("failed to decode model: {0}")]
    Decode(String),

    #[error("unsupported model type: {0}")]
    UnsupportedModelType(String),

    #[error("failed to load tokenizer: {0}")]
    Tokenizer(String),

    #[error("model load interrupted: {0}")]
    Interrupted(String),
}

impl LoadError {
    pub fn decode(err: impl std::fmt::Display) -> Self {
        Self::Decode(err.to_string())
    }

    pub fn tokenizer(err: impl std::fmt::Display) -> Self {
        Self::Tokenizer(err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("no chat template registered")]
    Missing,

    #[error("chat template failed: {0}")]
    Render(String),

    #[error("failed to tokenize templated prompt: {0}")]
    Encode(String),
}

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("invalid generation parameters: {0}")]
    InvalidParameters(String),

    #[error("failed to tokenize prompt: {0}")]
    Tokenize(String),

    #[error(transparent)]
    Inference(#[from] anyhow::Error),

    #[error("generation task stopped unexpectedly: {0}")]
    Interrupted(String),
}
