//! Error taxonomy shared by the training, serving and offline entry points.

use thiserror::Error;

pub type Result<T, E = LifecycleError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum LifecycleError {
    /// Tracking store unreachable or misconfigured. Fatal at startup.
    #[error("configuration failure: {0}")]
    Configuration(String),
    #[error("no version of model '{name}' is in stage '{stage}'")]
    ModelNotFound { name: String, stage: String },
    #[error("failed to load model artifact: {0}")]
    LoadFailure(String),
    #[error("{0}")]
    InvalidPayload(String),
    #[error("{0}")]
    PredictionFailure(String),
    #[error("tracking store error: {0}")]
    Store(String),
    #[error("training failed: {0}")]
    Training(String),
}

impl LifecycleError {
    /// Resolution failures leave the model cache empty; callers surface them differently
    /// from per-request input problems.
    pub fn is_resolution_failure(&self) -> bool {
        matches!(self, Self::ModelNotFound { .. } | Self::LoadFailure(_))
    }
}

impl From<sled::Error> for LifecycleError {
    fn from(e: sled::Error) -> Self { Self::Store(e.to_string()) }
}

impl From<config::ConfigError> for LifecycleError {
    fn from(e: config::ConfigError) -> Self { Self::Configuration(e.to_string()) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_not_found_names_reference() {
        let e = LifecycleError::ModelNotFound { name: "WineQualityBestModel".into(), stage: "Production".into() };
        assert_eq!(e.to_string(), "no version of model 'WineQualityBestModel' is in stage 'Production'");
        assert!(e.is_resolution_failure());
        assert!(!LifecycleError::InvalidPayload("x".into()).is_resolution_failure());
    }
}
