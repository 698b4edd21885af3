use super::template::ChatTemplate;
use super::traits::{Message, Tokenizer};
use crate::core::error::{LoadError, TemplateError};
use crate::core::{Result, TokenId};
use crate::core::model::raw_ids;
use serde_json::Value;
use std::path::Path;

/// `tokenizer.json` tokenizer with the chat template and special tokens
/// from `tokenizer_config.json`.
pub struct HfTokenizer {
    inner: tokenizers::Tokenizer,
    template: Option<ChatTemplate>,
    eos_tokens: Vec<TokenId>,
}

impl HfTokenizer {
    pub fn new(inner: tokenizers::Tokenizer) -> Self {
        Self {
            inner,
            template: None,
            eos_tokens: Vec::new(),
        }
    }

    pub fn with_template(mut self, template: ChatTemplate) -> Self {
        self.template = Some(template);
        self
    }

    pub fn with_eos_tokens(mut self, ids: impl IntoIterator<Item = TokenId>) -> Self {
        for id in ids {
            if !self.eos_tokens.contains(&id) {
                self.eos_tokens.push(id);
            }
        }
        self
    }

    pub fn from_dir(root: &Path, config_eos: Vec<TokenId>) -> std::result::Result<Self, LoadError> {
        let inner = tokenizers::Tokenizer::from_file(root.join("tokenizer.json"))
            .map_err(LoadError::tokenizer)?;

        let config_path = root.join("tokenizer_config.json");
        let config: Value = if config_path.exists() {
            let raw = std::fs::read_to_string(&config_path).map_err(LoadError::tokenizer)?;
            serde_json::from_str(&raw).map_err(LoadError::tokenizer)?
        } else {
            Value::Null
        };

        let bos = special_token(&config, "bos_token");
        let eos = special_token(&config, "eos_token");

        let template_file = root.join("chat_template.jinja");
        let source = if template_file.exists() {
            Some(std::fs::read_to_string(&template_file).map_err(LoadError::tokenizer)?)
        } else {
            chat_template_source(&config)
        };

        let eos_from_config = eos.as_deref().and_then(|t| inner.token_to_id(t)).map(TokenId);

        let mut tokenizer = Self::new(inner).with_eos_tokens(config_eos).with_eos_tokens(eos_from_config);
        if let Some(source) = source {
            tokenizer = tokenizer.with_template(ChatTemplate::new(source).with_special_tokens(bos, eos));
        }

        tracing::debug!(
            dir = %root.display(),
            has_template = tokenizer.template.is_some(),
            eos = ?tokenizer.eos_tokens,
            "tokenizer loaded"
        );
        Ok(tokenizer)
    }
}

/// `bos_token`/`eos_token` are either plain strings or added-token objects.
fn special_token(config: &Value, key: &str) -> Option<String> {
    match config.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Object(obj) => obj.get("content").and_then(|c| c.as_str()).map(String::from),
        _ => None,
    }
}

/// `chat_template` is a single source or a list of named templates, in
/// which case `default` wins over the first entry.
fn chat_template_source(config: &Value) -> Option<String> {
    match config.get("chat_template")? {
        Value::String(s) => Some(s.clone()),
        Value::Array(entries) => {
            let named = |entry: &Value| {
                Some((
                    entry.get("name")?.as_str()?.to_string(),
                    entry.get("template")?.as_str()?.to_string(),
                ))
            };
            let templates: Vec<(String, String)> = entries.iter().filter_map(named).collect();
            templates
                .iter()
                .find(|(name, _)| name == "default")
                .or_else(|| templates.first())
                .map(|(_, source)| source.clone())
        }
        _ => None,
    }
}

impl Tokenizer for HfTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<TokenId>> {
        let encoding = self.inner.encode(text, true).map_err(anyhow::Error::msg)?;
        Ok(encoding.get_ids().iter().copied().map(TokenId).collect())
    }

    fn decode(&self, tokens: &[TokenId]) -> Result<String> {
        self.inner
            .decode(&raw_ids(tokens), true)
            .map_err(anyhow::Error::msg)
    }

    fn apply_chat_template(&self, messages: &[Message]) -> std::result::Result<Vec<TokenId>, TemplateError> {
        let template = self.template.as_ref().ok_or(TemplateError::Missing)?;
        let prompt = template.render(messages, true)?;

        // The template already carries the special tokens it needs.
        let encoding = self
            .inner
            .encode(prompt, false)
            .map_err(|e| TemplateError::Encode(e.to_string()))?;
        Ok(encoding.get_ids().iter().copied().map(TokenId).collect())
    }

    fn eos_tokens(&self) -> Vec<TokenId> {
        self.eos_tokens.clone()
    }

    fn token_to_id(&self, token: &str) -> Option<TokenId> {
        self.inner.token_to_id(token).map(TokenId)
    }
}
