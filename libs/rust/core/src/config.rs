//! Process-scoped configuration: layered settings plus the immutable tracking URI.

use std::fmt;
use std::path::{Path, PathBuf};

use once_cell::sync::OnceCell;
use serde::Deserialize;
use tracing::info;

use crate::error::{LifecycleError, Result};
use crate::registry::{ModelReference, Stage};

static CONFIG: OnceCell<LifecycleConfig> = OnceCell::new();
static TRACKING_URI: OnceCell<TrackingUri> = OnceCell::new();

pub const DEFAULT_TRACKING_URI: &str = "sled://mlruns.db";
pub const DEFAULT_EXPERIMENT: &str = "Wine_Quality_MLOps";
pub const DEFAULT_MODEL_NAME: &str = "WineQualityBestModel";
pub const PROJECT_TAG: &str = "Wine Quality Prediction MLOps";
pub const EXPERIMENT_NOTE: &str = "Wine Quality MLOps experiment with model registry and promotion.";

#[derive(Debug, Deserialize, Clone)]
pub struct LifecycleConfig {
    pub service_name: String,
    pub tracking_uri: String,
    pub experiment_name: String,
    pub project_tag: String,
    pub experiment_note: String,
    pub model_name: String,
    pub model_stage: String,
    pub host: String,
    pub port: u16,
    pub data_path: PathBuf,
    pub seed: u64,
    pub log_level: String,
}

impl LifecycleConfig {
    pub fn model_reference(&self) -> Result<ModelReference> {
        Ok(ModelReference::new(self.model_name.clone(), self.model_stage.parse::<Stage>()?))
    }

    pub fn experiment_tags(&self) -> Vec<(String, String)> {
        vec![
            ("project".to_string(), self.project_tag.clone()),
            (crate::tracking::NOTE_TAG.to_string(), self.experiment_note.clone()),
        ]
    }

    pub fn bind_addr(&self) -> String { format!("{}:{}", self.host, self.port) }
}

/// Loads configuration once per process: defaults, then `MLOPS_CONFIG_FILE`, then `MLOPS__*` env vars.
pub fn load_config(service: &str) -> Result<LifecycleConfig> {
    let cfg = CONFIG.get_or_try_init(|| {
        let cfg = load_uncached(service)?;
        info!(target: "mlops_core::config", service, tracking_uri = %cfg.tracking_uri, "config loaded");
        Ok::<_, LifecycleError>(cfg)
    })?;
    Ok(cfg.clone())
}

pub fn load_uncached(service: &str) -> Result<LifecycleConfig> {
    let mut builder = config::Config::builder()
        .set_default("service_name", service)?
        .set_default("tracking_uri", DEFAULT_TRACKING_URI)?
        .set_default("experiment_name", DEFAULT_EXPERIMENT)?
        .set_default("project_tag", PROJECT_TAG)?
        .set_default("experiment_note", EXPERIMENT_NOTE)?
        .set_default("model_name", DEFAULT_MODEL_NAME)?
        .set_default("model_stage", "Production")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", 8000_i64)?
        .set_default("data_path", "data/winequality-red.csv")?
        .set_default("seed", 42_i64)?
        .set_default("log_level", "info")?;
    if let Ok(file) = std::env::var("MLOPS_CONFIG_FILE") {
        builder = builder.add_source(config::File::with_name(&file).required(false));
    }
    builder = builder.add_source(config::Environment::with_prefix("MLOPS").separator("__"));
    Ok(builder.build()?.try_deserialize()?)
}

/// Location of the embedded tracking store, `sled://<path>` or `file://<path>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackingUri {
    raw: String,
    path: PathBuf,
}

impl TrackingUri {
    pub fn parse(raw: &str) -> Result<Self> {
        let rest = ["sled://", "file://"]
            .iter()
            .find_map(|scheme| raw.strip_prefix(scheme))
            .ok_or_else(|| LifecycleError::Configuration(format!("unsupported tracking uri '{raw}'")))?;
        if rest.trim().is_empty() {
            return Err(LifecycleError::Configuration(format!("tracking uri '{raw}' has no path")));
        }
        Ok(Self { raw: raw.to_string(), path: PathBuf::from(rest) })
    }

    pub fn for_path(path: &Path) -> Self {
        Self { raw: format!("sled://{}", path.display()), path: path.to_path_buf() }
    }

    pub fn path(&self) -> &Path { &self.path }
}

impl fmt::Display for TrackingUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.raw) }
}

/// Fixes the process-wide tracking URI. Re-setting the same value is a no-op; a different value fails.
pub fn set_tracking_uri(raw: &str) -> Result<&'static TrackingUri> {
    let wanted = TrackingUri::parse(raw)?;
    let current = TRACKING_URI.get_or_init(|| wanted.clone());
    if *current != wanted {
        return Err(LifecycleError::Configuration(format!(
            "tracking uri already set to '{current}', refusing '{wanted}'"
        )));
    }
    Ok(current)
}

pub fn tracking_uri() -> Option<&'static TrackingUri> { TRACKING_URI.get() }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_supported_schemes() {
        assert_eq!(TrackingUri::parse("sled://mlruns.db").unwrap().path(), Path::new("mlruns.db"));
        assert_eq!(TrackingUri::parse("file:///tmp/store").unwrap().path(), Path::new("/tmp/store"));
    }

    #[test]
    fn rejects_unknown_scheme_and_empty_path() {
        assert!(matches!(TrackingUri::parse("sqlite:///mlflow.db"), Err(LifecycleError::Configuration(_))));
        assert!(matches!(TrackingUri::parse("sled://"), Err(LifecycleError::Configuration(_))));
    }

    #[test]
    fn tracking_uri_is_set_once() {
        let first = set_tracking_uri("sled://once.db").unwrap();
        assert_eq!(first.to_string(), "sled://once.db");
        assert!(set_tracking_uri("sled://once.db").is_ok());
        assert!(set_tracking_uri("sled://other.db").is_err());
        assert_eq!(tracking_uri().unwrap().path(), Path::new("once.db"));
    }

    #[test]
    fn defaults_describe_wine_project() {
        let cfg = load_uncached("test").unwrap();
        assert_eq!(cfg.service_name, "test");
        assert_eq!(cfg.model_stage, "Production");
        assert_eq!(cfg.model_reference().unwrap().to_string(), "models:/WineQualityBestModel/Production");
        assert_eq!(cfg.experiment_tags()[0], ("project".to_string(), PROJECT_TAG.to_string()));
    }
}
