use super::config::ModelConfiguration;
use super::traits::LanguageModel;
use super::{architectures, ModelHandle, TokenId};
use crate::core::error::LoadError;
use crate::core::tokenizer::{HfTokenizer, Tokenizer};
use crate::core::Result;
use candle_core::{DType, Device};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub type ModelCreator = Arc<dyn Fn(&ModelDirectory) -> Result<Box<dyn LanguageModel>> + Send + Sync>;

pub type TokenizerLoader =
    Arc<dyn Fn(&ModelDirectory) -> std::result::Result<Arc<dyn Tokenizer>, LoadError> + Send + Sync>;

/// A model directory on local disk: `config.json`, weight shards and
/// tokenizer files.
#[derive(Debug, Clone)]
pub struct ModelDirectory {
    pub root: PathBuf,
    pub config: serde_json::Value,
    pub weights: Vec<PathBuf>,
    pub device: Device,
    pub dtype: DType,
}

impl ModelDirectory {
    pub fn open(root: &Path) -> std::result::Result<Self, LoadError> {
        let config_path = root.join("config.json");
        let raw = std::fs::read_to_string(&config_path)
            .map_err(|e| LoadError::Decode(format!("{}: {}", config_path.display(), e)))?;
        let config: serde_json::Value = serde_json::from_str(&raw)
            .map_err(|e| LoadError::Decode(format!("{}: {}", config_path.display(), e)))?;

        let mut weights: Vec<PathBuf> = std::fs::read_dir(root)
            .map_err(|e| LoadError::Decode(format!("{}: {}", root.display(), e)))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().map(|ext| ext == "safetensors").unwrap_or(false))
            .collect();
        weights.sort();

        let device = select_device().map_err(LoadError::decode)?;
        let dtype = if device.is_cpu() { DType::F32 } else { DType::F16 };

        Ok(Self {
            root: root.to_path_buf(),
            config,
            weights,
            device,
            dtype,
        })
    }

    pub fn model_type(&self) -> std::result::Result<&str, LoadError> {
        self.config
            .get("model_type")
            .and_then(|v| v.as_str())
            .ok_or_else(|| LoadError::Decode("config.json has no model_type".to_string()))
    }

    /// `eos_token_id` from `config.json`; either a single id or a list.
    pub fn eos_token_ids(&self) -> Vec<TokenId> {
        match self.config.get("eos_token_id") {
            Some(serde_json::Value::Number(n)) => n
                .as_u64()
                .and_then(|id| u32::try_from(id).ok())
                .map(|id| vec![TokenId(id)])
                .unwrap_or_default(),
            Some(serde_json::Value::Array(ids)) => ids
                .iter()
                .filter_map(|v| v.as_u64())
                .filter_map(|id| u32::try_from(id).ok())
                .map(TokenId)
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn require_weights(&self) -> Result<&[PathBuf]> {
        if self.weights.is_empty() {
            anyhow::bail!("no .safetensors weight shards in {}", self.root.display());
        }
        Ok(&self.weights)
    }
}

pub fn select_device() -> Result<Device> {
    let device = if candle_core::utils::cuda_is_available() {
        Device::new_cuda(0)?
    } else if candle_core::utils::metal_is_available() {
        Device::new_metal(0)?
    } else {
        Device::Cpu
    };
    Ok(device)
}

/// Builds models from a directory by dispatching on `model_type`.
pub struct ModelFactory {
    creators: HashMap<String, ModelCreator>,
    aliases: HashMap<String, String>,
    tokenizer_loader: TokenizerLoader,
}

impl ModelFactory {
    pub fn new() -> Self {
        Self {
            creators: HashMap::new(),
            aliases: HashMap::new(),
            tokenizer_loader: Arc::new(|dir: &ModelDirectory| -> std::result::Result<Arc<dyn Tokenizer>, LoadError> {
                let tokenizer = HfTokenizer::from_dir(&dir.root, dir.eos_token_ids())?;
                Ok(Arc::new(tokenizer) as Arc<dyn Tokenizer>)
            }),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new()
            .with_creator("llama", Arc::new(architectures::llama::create))
            .with_creator("qwen2", Arc::new(architectures::qwen2::create))
            .with_alias("mistral", "llama")
    }

    pub fn with_creator(mut self, model_type: impl Into<String>, creator: ModelCreator) -> Self {
        self.creators.insert(model_type.into(), creator);
        self
    }

    pub fn with_alias(mut self, alias: impl Into<String>, target: impl Into<String>) -> Self {
        self.aliases.insert(alias.into(), target.into());
        self
    }

    pub fn with_tokenizer_loader(mut self, loader: TokenizerLoader) -> Self {
        self.tokenizer_loader = loader;
        self
    }

    pub fn model_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self
            .creators
            .keys()
            .chain(self.aliases.keys())
            .cloned()
            .collect();
        types.sort();
        types
    }

    fn creator(&self, model_type: &str) -> Option<&ModelCreator> {
        self.creators.get(model_type).or_else(|| {
            self.aliases
                .get(model_type)
                .and_then(|target| self.creators.get(target))
        })
    }

    /// Constructs the model and binds its tokenizer. Blocking: reads and
    /// maps weight files.
    pub fn load(
        &self,
        configuration: &ModelConfiguration,
        root: &Path,
    ) -> std::result::Result<ModelHandle, LoadError> {
        let dir = ModelDirectory::open(root)?;
        let model_type = dir.model_type()?;

        let creator = self
            .creator(model_type)
            .ok_or_else(|| LoadError::UnsupportedModelType(model_type.to_string()))?;

        tracing::info!(model = %configuration.id, model_type, device = ?dir.device, "constructing model");
        let model = creator(&dir).map_err(|e| LoadError::Decode(format!("{:#}", e)))?;
        let tokenizer = (self.tokenizer_loader)(&dir)?;

        Ok(ModelHandle::new(configuration.clone(), Arc::from(model), tokenizer))
    }
}

impl Default for ModelFactory {
    fn default() -> Self {
        Self::with_defaults()
    }
}
