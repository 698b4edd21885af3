use super::config::ModelConfiguration;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Model id to configuration lookup. Built at startup and passed by
/// reference; there is no process-wide instance.
pub struct ModelRegistry {
    configurations: RwLock<HashMap<String, ModelConfiguration>>,
    aliases: RwLock<HashMap<String, String>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self {
            configurations: RwLock::new(HashMap::new()),
            aliases: RwLock::new(HashMap::new()),
        }
    }

    /// Registry seeded with the small chat models known to work with the
    /// bundled architectures.
    pub fn with_defaults() -> Self {
        let registry = Self::new();

        registry.register(
            ModelConfiguration::builder("HuggingFaceTB/SmolLM2-135M-Instruct")
                .default_prompt("Tell me about the history of Spain.")
                .build(),
        );
        registry.register(
            ModelConfiguration::builder("HuggingFaceTB/SmolLM2-360M-Instruct")
                .default_prompt("Tell me about the history of Spain.")
                .build(),
        );
        registry.register(
            ModelConfiguration::builder("Qwen/Qwen2.5-0.5B-Instruct")
                .extra_eos_token("<|im_end|>")
                .default_prompt("Why is the sky blue?")
                .build(),
        );
        registry.register(
            ModelConfiguration::builder("meta-llama/Llama-3.2-1B-Instruct")
                .extra_eos_token("<|eot_id|>")
                .default_prompt("What is the difference between a fruit and a vegetable?")
                .build(),
        );
        registry.register(
            ModelConfiguration::builder("TinyLlama/TinyLlama-1.1B-Chat-v1.0")
                .default_prompt("Write a haiku about the ocean.")
                .build(),
        );

        registry.register_alias("smollm", "HuggingFaceTB/SmolLM2-135M-Instruct");
        registry.register_alias("qwen", "Qwen/Qwen2.5-0.5B-Instruct");
        registry.register_alias("llama", "meta-llama/Llama-3.2-1B-Instruct");

        registry
    }

    pub fn register(&self, configuration: ModelConfiguration) {
        self.configurations
            .write()
            .insert(configuration.id.clone(), configuration);
    }

    pub fn register_alias<A, T>(&self, alias: A, target: T)
    where
        A: Into<String>,
        T: Into<String>,
    {
        self.aliases.write().insert(alias.into(), target.into());
    }

    pub fn get(&self, id: &str) -> Option<ModelConfiguration> {
        let configurations = self.configurations.read();

        if let Some(config) = configurations.get(id) {
            return Some(config.clone());
        }

        let aliases = self.aliases.read();
        aliases
            .get(id)
            .and_then(|target| configurations.get(target))
            .cloned()
    }

    /// Like `get`, but an unknown id yields a plain configuration for it so
    /// that any local model directory can be used.
    pub fn configuration(&self, id: &str) -> ModelConfiguration {
        self.get(id).unwrap_or_else(|| ModelConfiguration::new(id))
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.configurations.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn aliases(&self) -> Vec<(String, String)> {
        let mut aliases: Vec<(String, String)> = self
            .aliases
            .read()
            .iter()
            .map(|(a, t)| (a.clone(), t.clone()))
            .collect();
        aliases.sort();
        aliases
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
