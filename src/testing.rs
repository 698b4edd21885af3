//! In-memory engines, tokenizers and sources for unit tests.

use crate::app::loader::ModelSource;
use crate::core::error::{LoadError, TemplateError};
use crate::core::model::{LanguageModel, ModelDirectory, ModelFactory, SamplingOptions, TokenIterator};
use crate::core::tokenizer::{Message, Tokenizer};
use crate::core::{ModelConfiguration, Result, TokenId};
use crate::rng::SeedSource;
use async_trait::async_trait;
use parking_lot::{Condvar, Mutex};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

pub const EOS: u32 = 0;

/// Holds token production until opened.
#[derive(Clone, Default)]
pub struct Gate {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl Gate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self) {
        let (open, cvar) = &*self.inner;
        *open.lock() = true;
        cvar.notify_all();
    }

    fn wait(&self) {
        let (open, cvar) = &*self.inner;
        let mut open = open.lock();
        while !*open {
            cvar.wait(&mut open);
        }
    }
}

#[derive(Clone)]
enum Script {
    Tokens(Vec<u32>),
    Endless,
    Failing,
}

/// Emits a fixed token script, then `EOS` forever.
#[derive(Clone)]
pub struct ScriptedModel {
    script: Script,
    gate: Option<Gate>,
    seeds: Arc<Mutex<Vec<u64>>>,
}

impl ScriptedModel {
    pub fn new(script: Vec<u32>) -> Self {
        Self::with_script(Script::Tokens(script))
    }

    /// Cycles through the letters and never produces `EOS`.
    pub fn endless() -> Self {
        Self::with_script(Script::Endless)
    }

    pub fn failing() -> Self {
        Self::with_script(Script::Failing)
    }

    fn with_script(script: Script) -> Self {
        Self {
            script,
            gate: None,
            seeds: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_gate(mut self, gate: Gate) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn seeds(&self) -> Vec<u64> {
        self.seeds.lock().clone()
    }
}

struct ScriptedIterator {
    script: Script,
    gate: Option<Gate>,
    position: usize,
}

impl TokenIterator for ScriptedIterator {
    fn next_token(&mut self) -> Result<TokenId> {
        if let Some(gate) = &self.gate {
            gate.wait();
        }
        let token = match &self.script {
            Script::Tokens(tokens) => tokens.get(self.position).copied().unwrap_or(EOS),
            Script::Endless => (self.position % 26) as u32 + 1,
            Script::Failing => anyhow::bail!("scripted failure"),
        };
        self.position += 1;
        Ok(TokenId(token))
    }
}

impl LanguageModel for ScriptedModel {
    fn model_type(&self) -> &str {
        "scripted"
    }

    fn start<'a>(&'a self, _input: &[TokenId], sampling: &SamplingOptions) -> Result<Box<dyn TokenIterator + 'a>> {
        self.seeds.lock().push(sampling.seed);
        Ok(Box::new(ScriptedIterator {
            script: self.script.clone(),
            gate: self.gate.clone(),
            position: 0,
        }))
    }
}

/// One token per lowercase letter: `a` is 1 through `z` at 26, space is 27.
/// Anything else encodes as 28 and decodes to nothing.
#[derive(Clone)]
pub struct CharTokenizer {
    template_fails: bool,
    last_encoded: Arc<Mutex<Option<String>>>,
}

impl CharTokenizer {
    pub const END_MARKER: u32 = 99;

    pub fn new() -> Self {
        Self {
            template_fails: false,
            last_encoded: Arc::new(Mutex::new(None)),
        }
    }

    pub fn without_template() -> Self {
        Self {
            template_fails: true,
            ..Self::new()
        }
    }

    pub fn last_encoded(&self) -> Option<String> {
        self.last_encoded.lock().clone()
    }
}

impl Tokenizer for CharTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<TokenId>> {
        *self.last_encoded.lock() = Some(text.to_string());
        Ok(text
            .chars()
            .map(|c| match c {
                'a'..='z' => TokenId(c as u32 - 'a' as u32 + 1),
                ' ' => TokenId(27),
                _ => TokenId(28),
            })
            .collect())
    }

    fn decode(&self, tokens: &[TokenId]) -> Result<String> {
        Ok(tokens
            .iter()
            .filter_map(|t| match t.0 {
                id @ 1..=26 => char::from_u32('a' as u32 + id - 1),
                27 => Some(' '),
                _ => None,
            })
            .collect())
    }

    fn apply_chat_template(&self, messages: &[Message]) -> std::result::Result<Vec<TokenId>, TemplateError> {
        if self.template_fails {
            return Err(TemplateError::Missing);
        }
        let mut rendered = String::new();
        for message in messages {
            rendered.push_str(&format!("{} {} ", message.role, message.content));
        }
        rendered.push_str("assistant ");
        self.encode(&rendered).map_err(|e| TemplateError::Encode(e.to_string()))
    }

    fn eos_tokens(&self) -> Vec<TokenId> {
        vec![TokenId(EOS)]
    }

    fn token_to_id(&self, token: &str) -> Option<TokenId> {
        match token {
            "<end>" => Some(TokenId(Self::END_MARKER)),
            _ => None,
        }
    }
}

/// A fresh directory holding only `config.json`.
pub fn scratch_dir(config: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("slmchat-test-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("config.json"), config).unwrap();
    dir
}

/// Factory serving `model` and `tokenizer` for `model_type: scripted`.
pub fn scripted_factory(model: ScriptedModel, tokenizer: CharTokenizer, constructions: Arc<AtomicUsize>) -> ModelFactory {
    ModelFactory::new()
        .with_creator(
            "scripted",
            Arc::new(move |_dir: &ModelDirectory| -> Result<Box<dyn LanguageModel>> {
                constructions.fetch_add(1, Ordering::SeqCst);
                Ok(Box::new(model.clone()))
            }),
        )
        .with_tokenizer_loader(Arc::new(
            move |_dir: &ModelDirectory| -> std::result::Result<Arc<dyn Tokenizer>, LoadError> {
                Ok(Arc::new(tokenizer.clone()))
            },
        ))
}

pub fn counting_factory(constructions: Arc<AtomicUsize>, script: Vec<u32>) -> ModelFactory {
    scripted_factory(ScriptedModel::new(script), CharTokenizer::new(), constructions)
}

/// Serves a scratch directory after an optional delay, reporting a fixed
/// list of progress fractions.
pub struct StaticSource {
    config: Option<String>,
    delay_ms: u64,
    progress: Vec<f64>,
    fetches: Arc<AtomicUsize>,
}

impl StaticSource {
    pub fn scripted() -> Self {
        Self::with_config(r#"{"model_type": "scripted"}"#)
    }

    pub fn with_config(config: &str) -> Self {
        Self {
            config: Some(config.to_string()),
            delay_ms: 0,
            progress: vec![0.0, 1.0],
            fetches: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn failing() -> Self {
        Self {
            config: None,
            ..Self::scripted()
        }
    }

    pub fn with_delay_ms(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }

    pub fn with_progress(mut self, progress: Vec<f64>) -> Self {
        self.progress = progress;
        self
    }

    pub fn fetch_count(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.fetches)
    }
}

#[async_trait]
impl ModelSource for StaticSource {
    async fn fetch(
        &self,
        configuration: &ModelConfiguration,
        progress: &(dyn Fn(f64) + Send + Sync),
    ) -> std::result::Result<PathBuf, LoadError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
        }
        for fraction in &self.progress {
            progress(*fraction);
        }

        match &self.config {
            Some(config) => Ok(scratch_dir(config)),
            None => Err(LoadError::Fetch {
                id: configuration.id.clone(),
                reason: "network unreachable".to_string(),
            }),
        }
    }
}

/// Hands out 1, 2, 3, ...
#[derive(Default)]
pub struct CountingSeeds {
    next: AtomicU64,
}

impl CountingSeeds {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SeedSource for CountingSeeds {
    fn next_seed(&self) -> u64 {
        self.next.fetch_add(1, Ordering::SeqCst) + 1
    }
}
