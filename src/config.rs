use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

/// Application-level constants
pub const APP_NAME: &str = "ClinicEcg";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// File name of the exported classifier graph
pub const MODEL_FILE_NAME: &str = "resnet34_model.onnx";

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8080";
pub const DEFAULT_READ_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_MAX_UPLOAD_MB: usize = 50;

/// Default tracing filter when `RUST_LOG` is unset
pub fn default_log_filter() -> &'static str {
    if cfg!(debug_assertions) {
        "info,clinic_ecg_lib=debug"
    } else {
        "info"
    }
}

/// Get the application data directory
/// ~/ClinicEcg/ on all platforms
pub fn app_data_dir() -> Result<PathBuf, ConfigError> {
    dirs::home_dir()
        .map(|home| home.join(APP_NAME))
        .ok_or(ConfigError::NoHomeDir)
}

/// Uploaded ECG record pairs, one sub-directory per upload
pub fn ecg_files_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("ecg_files")
}

/// Get the models directory
pub fn models_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("models")
}

pub fn database_path(data_dir: &Path) -> PathBuf {
    data_dir.join("clinic.db")
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot determine home directory; set CLINIC_DATA_DIR")]
    NoHomeDir,

    #[error("Invalid value for {var}: '{value}' ({reason})")]
    InvalidValue {
        var: &'static str,
        value: String,
        reason: String,
    },
}

// ═══════════════════════════════════════════════════════════
// Model configuration
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ComputeDevice {
    #[default]
    Cpu,
    Cuda,
}

impl FromStr for ComputeDevice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cpu" => Ok(ComputeDevice::Cpu),
            "cuda" | "gpu" => Ok(ComputeDevice::Cuda),
            other => Err(format!("unknown device '{other}', expected cpu or cuda")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelConfig {
    pub model_path: PathBuf,
    pub device: ComputeDevice,
}

impl ModelConfig {
    pub fn device_is_gpu(&self) -> bool {
        self.device == ComputeDevice::Cuda
    }
}

// ═══════════════════════════════════════════════════════════
// AppConfig
// ═══════════════════════════════════════════════════════════

/// Process configuration, read once at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub bind_addr: SocketAddr,
    pub model: ModelConfig,
    pub read_timeout: Duration,
    pub max_upload_bytes: usize,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let data_dir = match var("CLINIC_DATA_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => app_data_dir()?,
        };

        let model_path = var("ECG_MODEL_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| models_dir(&data_dir).join(MODEL_FILE_NAME));

        let device = match var("ECG_DEVICE") {
            Some(v) => parse_var("ECG_DEVICE", &v)?,
            None => ComputeDevice::Cpu,
        };

        let bind_addr = parse_var(
            "CLINIC_BIND_ADDR",
            &var("CLINIC_BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
        )?;

        let read_timeout_secs: u64 = match var("ECG_READ_TIMEOUT_SECS") {
            Some(v) => positive("ECG_READ_TIMEOUT_SECS", &v)?,
            None => DEFAULT_READ_TIMEOUT_SECS,
        };
        let max_upload_mb: usize = match var("CLINIC_MAX_UPLOAD_MB") {
            Some(v) => positive("CLINIC_MAX_UPLOAD_MB", &v)?,
            None => DEFAULT_MAX_UPLOAD_MB,
        };

        Ok(Self {
            data_dir,
            bind_addr,
            model: ModelConfig {
                model_path,
                device,
            },
            read_timeout: Duration::from_secs(read_timeout_secs),
            max_upload_bytes: max_upload_mb * 1024 * 1024,
        })
    }

    pub fn ecg_files_dir(&self) -> PathBuf {
        ecg_files_dir(&self.data_dir)
    }

    pub fn database_path(&self) -> PathBuf {
        database_path(&self.data_dir)
    }
}

fn parse_var<T>(var: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        var,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

fn positive<T>(var: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr + PartialOrd + Default,
    T::Err: std::fmt::Display,
{
    let parsed: T = parse_var(var, value)?;
    if parsed <= T::default() {
        return Err(ConfigError::InvalidValue {
            var,
            value: value.to_string(),
            reason: "must be greater than zero".into(),
        });
    }
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_with(vars: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_under_data_dir() {
        let config = config_with(&[("CLINIC_DATA_DIR", "/srv/clinic")]).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/srv/clinic"));
        assert_eq!(
            config.model.model_path,
            PathBuf::from("/srv/clinic/models/resnet34_model.onnx")
        );
        assert_eq!(config.bind_addr, "127.0.0.1:8080".parse().unwrap());
        assert_eq!(config.read_timeout, Duration::from_secs(30));
        assert_eq!(config.max_upload_bytes, 50 * 1024 * 1024);
        assert_eq!(config.model.device, ComputeDevice::Cpu);
        assert_eq!(config.ecg_files_dir(), PathBuf::from("/srv/clinic/ecg_files"));
        assert_eq!(config.database_path(), PathBuf::from("/srv/clinic/clinic.db"));
    }

    #[test]
    fn explicit_values_override_defaults() {
        let config = config_with(&[
            ("CLINIC_DATA_DIR", "/data"),
            ("ECG_MODEL_PATH", "/models/ecg.onnx"),
            ("ECG_DEVICE", "cuda"),
            ("CLINIC_BIND_ADDR", "0.0.0.0:9000"),
            ("ECG_READ_TIMEOUT_SECS", "5"),
            ("CLINIC_MAX_UPLOAD_MB", "2"),
        ])
        .unwrap();
        assert_eq!(config.model.model_path, PathBuf::from("/models/ecg.onnx"));
        assert!(config.model.device_is_gpu());
        assert_eq!(config.bind_addr.port(), 9000);
        assert_eq!(config.read_timeout, Duration::from_secs(5));
        assert_eq!(config.max_upload_bytes, 2 * 1024 * 1024);
    }

    #[test]
    fn blank_values_are_ignored() {
        let config = config_with(&[("CLINIC_DATA_DIR", "/d"), ("ECG_DEVICE", "  ")]).unwrap();
        assert_eq!(config.model.device, ComputeDevice::Cpu);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let err = config_with(&[("CLINIC_DATA_DIR", "/d"), ("ECG_DEVICE", "tpu")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { var: "ECG_DEVICE", .. }));

        let err = config_with(&[("CLINIC_DATA_DIR", "/d"), ("ECG_READ_TIMEOUT_SECS", "0")]).unwrap_err();
        assert!(err.to_string().contains("greater than zero"));

        let err = config_with(&[("CLINIC_DATA_DIR", "/d"), ("CLINIC_BIND_ADDR", "nowhere")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { var: "CLINIC_BIND_ADDR", .. }));
    }

    #[test]
    fn device_names_parse() {
        assert_eq!("GPU".parse::<ComputeDevice>().unwrap(), ComputeDevice::Cuda);
        assert_eq!(" cpu ".parse::<ComputeDevice>().unwrap(), ComputeDevice::Cpu);
        assert!("tpu".parse::<ComputeDevice>().is_err());
    }

    #[test]
    fn app_name_is_clinic_ecg() {
        assert_eq!(APP_NAME, "ClinicEcg");
    }

    #[test]
    fn log_filter_mentions_info() {
        assert!(default_log_filter().starts_with("info"));
    }
}
