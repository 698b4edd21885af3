use crate::core::GenerationParameters;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_MODEL: &str = "smollm";

pub struct EnvConfig {
    pub models_dir: PathBuf,
    pub model: String,
    pub max_tokens: usize,
    pub temperature: f32,
    pub top_p: f32,
    pub display_every: usize,
    /// Seconds; 0 disables the per-turn deadline.
    pub timeout: u64,
    pub log: String,
}

impl EnvConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = GenerationParameters::default();
        let parsed = |key: &str| lookup(key).and_then(|v| v.trim().parse().ok());

        Self {
            models_dir: expand_home(&lookup("SLMCHAT_MODELS").unwrap_or_else(|| "~/.slmchat/models".to_string())),
            model: lookup("SLMCHAT_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            max_tokens: parsed("SLMCHAT_MAX_TOKENS").unwrap_or(defaults.max_tokens),
            temperature: lookup("SLMCHAT_TEMPERATURE")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(defaults.temperature),
            top_p: lookup("SLMCHAT_TOP_P")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(defaults.top_p),
            display_every: parsed("SLMCHAT_DISPLAY_EVERY").unwrap_or(defaults.display_every),
            timeout: lookup("SLMCHAT_TIMEOUT")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(0),
            log: lookup("SLMCHAT_LOG").unwrap_or_else(|| "warn".to_string()),
        }
    }

    pub fn parameters(&self) -> GenerationParameters {
        let mut parameters = GenerationParameters::default()
            .max_tokens(self.max_tokens)
            .temperature(self.temperature)
            .top_p(self.top_p)
            .display_every(self.display_every);
        if self.timeout > 0 {
            parameters = parameters.turn_timeout(Duration::from_secs(self.timeout));
        }
        parameters
    }
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
