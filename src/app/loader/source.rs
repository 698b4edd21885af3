use crate::core::{LoadError, ModelConfiguration};
use async_trait::async_trait;
use std::path::PathBuf;

/// Where model directories come from. Reports progress as a fraction in
/// `[0, 1]`.
#[async_trait]
pub trait ModelSource: Send + Sync {
    async fn fetch(
        &self,
        configuration: &ModelConfiguration,
        progress: &(dyn Fn(f64) + Send + Sync),
    ) -> Result<PathBuf, LoadError>;
}

/// Models already present on disk under `<models_dir>/<id>`, or in the
/// configuration's explicit directory.
pub struct LocalSource {
    models_dir: PathBuf,
}

impl LocalSource {
    pub fn new(models_dir: impl Into<PathBuf>) -> Self {
        Self {
            models_dir: models_dir.into(),
        }
    }

    pub fn directory_for(&self, configuration: &ModelConfiguration) -> PathBuf {
        configuration
            .directory
            .clone()
            .unwrap_or_else(|| self.models_dir.join(&configuration.id))
    }
}

#[async_trait]
impl ModelSource for LocalSource {
    async fn fetch(
        &self,
        configuration: &ModelConfiguration,
        progress: &(dyn Fn(f64) + Send + Sync),
    ) -> Result<PathBuf, LoadError> {
        let dir = self.directory_for(configuration);
        progress(0.0);

        let config_exists = tokio::fs::metadata(dir.join("config.json"))
            .await
            .map(|m| m.is_file())
            .unwrap_or(false);
        if !config_exists {
            return Err(LoadError::Fetch {
                id: configuration.id.clone(),
                reason: format!("no config.json in {}", dir.display()),
            });
        }

        progress(1.0);
        Ok(dir)
    }
}
