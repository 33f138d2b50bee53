//! Process-wide application state shared by the HTTP server and the CLI.
//!
//! Built once at startup: configuration, the ECG analysis service (with its
//! classifier loaded or marked unavailable) and the on-disk layout.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

use crate::config::{AppConfig, ConfigError};
use crate::db;
use crate::ecg::{EcgAnalysisPipeline, EcgService, InferenceAdapter};

// ═══════════════════════════════════════════════════════════
// CoreState
// ═══════════════════════════════════════════════════════════

/// Wrapped in `Arc` at startup and handed to every handler.
pub struct CoreState {
    pub config: AppConfig,
    pub ecg: EcgService,
}

impl CoreState {
    /// Assemble state around an already built adapter (tests inject mocks here).
    pub fn new(config: AppConfig, adapter: Arc<InferenceAdapter>) -> Self {
        let ecg = EcgService::new(EcgAnalysisPipeline::new(adapter), config.read_timeout);
        Self { config, ecg }
    }

    /// Create the data layout, migrate the database and load the classifier.
    pub fn initialize(config: AppConfig) -> Result<Self, CoreError> {
        std::fs::create_dir_all(config.ecg_files_dir()).map_err(|e| CoreError::DataDir {
            path: config.ecg_files_dir(),
            reason: e.to_string(),
        })?;
        db::open_database(&config.database_path())?;

        let adapter = Arc::new(InferenceAdapter::load(&config.model));
        if !adapter.is_available() {
            tracing::warn!("ECG analysis disabled: visits can be stored but not analyzed");
        }
        Ok(Self::new(config, adapter))
    }

    pub fn open_db(&self) -> Result<rusqlite::Connection, CoreError> {
        db::open_database(&self.config.database_path()).map_err(CoreError::Database)
    }

    pub fn ecg_files_dir(&self) -> PathBuf {
        self.config.ecg_files_dir()
    }

    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    pub fn analysis_enabled(&self) -> bool {
        self.ecg.is_available()
    }
}

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Database error: {0}")]
    Database(#[from] db::DatabaseError),
    #[error("Cannot prepare data directory {}: {reason}", path.display())]
    DataDir { path: PathBuf, reason: String },
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::config::{ComputeDevice, ModelConfig};
    use crate::ecg::MockClassifier;
    use std::time::Duration;

    pub fn test_config(data_dir: &Path) -> AppConfig {
        AppConfig {
            data_dir: data_dir.to_path_buf(),
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            model: ModelConfig {
                model_path: data_dir.join("models").join("missing.onnx"),
                device: ComputeDevice::Cpu,
            },
            read_timeout: Duration::from_secs(5),
            max_upload_bytes: 10 * 1024 * 1024,
        }
    }

    /// State rooted in `data_dir` with the given classifier double.
    pub fn state_with(data_dir: &Path, mock: Arc<MockClassifier>) -> CoreState {
        let config = test_config(data_dir);
        std::fs::create_dir_all(config.ecg_files_dir()).unwrap();
        CoreState::new(config, Arc::new(InferenceAdapter::new(mock)))
    }

    /// State with no classifier loaded.
    pub fn state_without_model(data_dir: &Path) -> CoreState {
        let config = test_config(data_dir);
        std::fs::create_dir_all(config.ecg_files_dir()).unwrap();
        CoreState::new(config, Arc::new(InferenceAdapter::unavailable("no model file")))
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn initialize_without_model_disables_analysis() {
        let dir = tempfile::tempdir().unwrap();
        let state = CoreState::initialize(test_config(dir.path())).unwrap();
        assert!(!state.analysis_enabled());
        assert!(state.ecg_files_dir().is_dir());
        assert!(state.config.database_path().exists());
    }

    #[test]
    fn open_db_is_migrated() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_without_model(dir.path());
        let conn = state.open_db().unwrap();
        assert!(db::list_visits(&conn).unwrap().is_empty());
    }

    #[test]
    fn mock_state_has_analysis_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_with(
            dir.path(),
            Arc::new(crate::ecg::MockClassifier::new(vec![0.0; 9])),
        );
        assert!(state.analysis_enabled());
        assert_eq!(state.data_dir(), dir.path());
    }
}
