//! Building collaborators from configuration.

use anyhow::Result;
use skillmem_ai::{FallbackSynthesizer, OllamaSynthesizer, Synthesizer, TimeoutSynthesizer};
use skillmem_core::{StorageBackend, StorageConfig, SynthesizerConfig};
use skillmem_storage::{JsonStorage, Storage};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Open the configured storage backend.
pub async fn open_storage(config: &StorageConfig) -> Result<Arc<dyn Storage>> {
    match config.backend {
        StorageBackend::Json => {
            info!("Opening JSON store at {}", config.path.display());
            Ok(Arc::new(JsonStorage::new(&config.path).await?))
        }
        StorageBackend::Sqlite => open_sqlite(config).await,
    }
}

#[cfg(feature = "sqlite")]
async fn open_sqlite(config: &StorageConfig) -> Result<Arc<dyn Storage>> {
    if let Some(parent) = config.path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    info!("Opening SQLite store at {}", config.path.display());
    let url = format!("sqlite://{}", config.path.display());
    Ok(Arc::new(skillmem_storage::SqliteStorage::new(&url).await?))
}

#[cfg(not(feature = "sqlite"))]
async fn open_sqlite(_config: &StorageConfig) -> Result<Arc<dyn Storage>> {
    anyhow::bail!("the sqlite backend requires building with the `sqlite` feature")
}

/// Build the text synthesizer.
///
/// The remote model is always wrapped in a timeout; when disabled, only the
/// deterministic fallback runs.
pub fn build_synthesizer(config: &SynthesizerConfig) -> Arc<dyn Synthesizer> {
    if !config.enabled {
        return Arc::new(FallbackSynthesizer::new());
    }
    let timeout = Duration::from_secs(config.timeout_secs);
    info!("Using model {} at {}", config.model, config.ollama_url);
    let model = OllamaSynthesizer::new(config.ollama_url.clone(), config.model.clone(), timeout);
    Arc::new(TimeoutSynthesizer::new(Arc::new(model), timeout))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_model_uses_fallback() {
        let synthesizer = build_synthesizer(&SynthesizerConfig::default());
        assert_eq!(synthesizer.name(), "fallback");
    }

    #[tokio::test]
    async fn opens_json_store_in_directory() {
        let dir = tempfile::tempdir().unwrap();
        let config = StorageConfig {
            path: dir.path().join("store"),
            backend: StorageBackend::Json,
        };
        let storage = open_storage(&config).await.unwrap();
        assert_eq!(storage.count_skills().await.unwrap(), 0);
    }

    #[cfg(not(feature = "sqlite"))]
    #[tokio::test]
    async fn sqlite_without_feature_is_an_error() {
        let config = StorageConfig {
            path: "x.db".into(),
            backend: StorageBackend::Sqlite,
        };
        assert!(open_storage(&config).await.is_err());
    }
}
