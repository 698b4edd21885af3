use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq)]
pub struct ModelConfiguration {
    /// Repository style identifier, e.g. `Qwen/Qwen2.5-0.5B-Instruct`.
    pub id: String,
    /// Explicit local directory; when unset the source resolves it from `id`.
    pub directory: Option<PathBuf>,
    /// End-of-sequence strings beyond the tokenizer's own.
    pub extra_eos_tokens: Vec<String>,
    pub default_prompt: String,
    pub system_prompt: Option<String>,
}

impl ModelConfiguration {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            directory: None,
            extra_eos_tokens: Vec::new(),
            default_prompt: "hello".to_string(),
            system_prompt: None,
        }
    }

    pub fn builder(id: impl Into<String>) -> ModelConfigurationBuilder {
        ModelConfigurationBuilder::new(id)
    }

    pub fn name(&self) -> &str {
        self.id.rsplit('/').next().unwrap_or(&self.id)
    }
}

pub struct ModelConfigurationBuilder {
    config: ModelConfiguration,
}

impl ModelConfigurationBuilder {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            config: ModelConfiguration::new(id),
        }
    }

    pub fn directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.directory = Some(dir.into());
        self
    }

    pub fn extra_eos_token(mut self, token: impl Into<String>) -> Self {
        self.config.extra_eos_tokens.push(token.into());
        self
    }

    pub fn default_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.default_prompt = prompt.into();
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn build(self) -> ModelConfiguration {
        self.config
    }
}
