//! Versioned model registry with movable stage labels, stored alongside the tracking data.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{LifecycleError, Result};
use crate::tracking::{decode, encode, now_ms, TrackingStore};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Stage { None, Staging, Production, Archived }

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self { Stage::None => "None", Stage::Staging => "Staging", Stage::Production => "Production", Stage::Archived => "Archived" }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for Stage {
    type Err = LifecycleError;
    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Stage::None),
            "staging" => Ok(Stage::Staging),
            "production" => Ok(Stage::Production),
            "archived" => Ok(Stage::Archived),
            other => Err(LifecycleError::Configuration(format!("unknown model stage '{other}'"))),
        }
    }
}

/// `models:/<name>/<stage>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelReference { pub name: String, pub stage: Stage }

impl ModelReference {
    pub fn new(name: impl Into<String>, stage: Stage) -> Self { Self { name: name.into(), stage } }
}

impl fmt::Display for ModelReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "models:/{}/{}", self.name, self.stage) }
}

impl FromStr for ModelReference {
    type Err = LifecycleError;
    fn from_str(s: &str) -> Result<Self> {
        let bad = || LifecycleError::Configuration(format!("malformed model uri '{s}', expected models:/<name>/<stage>"));
        let rest = s.strip_prefix("models:/").ok_or_else(bad)?;
        let (name, stage) = rest.rsplit_once('/').ok_or_else(bad)?;
        if name.is_empty() { return Err(bad()); }
        Ok(Self::new(name, stage.parse()?))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelVersion {
    pub name: String,
    pub version: u32,
    pub run_id: String,
    pub artifact_path: String,
    pub stage: Stage,
    pub created_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisteredModel {
    pub name: String,
    pub created_ms: i64,
    pub versions: Vec<ModelVersion>,
}

#[derive(Clone)]
pub struct ModelRegistry { store: TrackingStore }

impl ModelRegistry {
    pub fn new(store: TrackingStore) -> Self { Self { store } }

    pub fn store(&self) -> &TrackingStore { &self.store }

    pub fn get(&self, name: &str) -> Result<Option<RegisteredModel>> {
        self.store.models_tree().get(name.as_bytes())?.map(|v| decode(&v)).transpose()
    }

    /// Adds a new version (stage `None`) pointing at a logged run artifact.
    pub fn register_model(&self, name: &str, run_id: &str, artifact_path: &str) -> Result<ModelVersion> {
        if self.store.load_artifact(run_id, artifact_path)?.is_none() {
            return Err(LifecycleError::Store(format!("run '{run_id}' has no artifact '{artifact_path}'")));
        }
        let _guard = self.store.write_lock().lock();
        let mut model = self.get(name)?.unwrap_or_else(|| RegisteredModel { name: name.to_string(), created_ms: now_ms(), versions: Vec::new() });
        let version = model.versions.iter().map(|v| v.version).max().unwrap_or(0) + 1;
        let mv = ModelVersion {
            name: name.to_string(),
            version,
            run_id: run_id.to_string(),
            artifact_path: artifact_path.to_string(),
            stage: Stage::None,
            created_ms: now_ms(),
        };
        model.versions.push(mv.clone());
        self.put(&model)?;
        info!(target: "mlops_core::registry", model = name, version, run_id, "model version registered");
        Ok(mv)
    }

    /// Moves `version` to `stage`; with `archive_existing`, other holders of that stage become `Archived`.
    pub fn transition_stage(&self, name: &str, version: u32, stage: Stage, archive_existing: bool) -> Result<ModelVersion> {
        let _guard = self.store.write_lock().lock();
        let mut model = self.get(name)?
            .ok_or_else(|| LifecycleError::Store(format!("no registered model '{name}'")))?;
        if !model.versions.iter().any(|v| v.version == version) {
            return Err(LifecycleError::Store(format!("model '{name}' has no version {version}")));
        }
        let mut moved = None;
        for v in model.versions.iter_mut() {
            if v.version == version {
                v.stage = stage;
                moved = Some(v.clone());
            } else if archive_existing && stage != Stage::None && v.stage == stage {
                v.stage = Stage::Archived;
            }
        }
        self.put(&model)?;
        info!(target: "mlops_core::registry", model = name, version, %stage, "stage transitioned");
        moved.ok_or_else(|| LifecycleError::Store(format!("model '{name}' has no version {version}")))
    }

    /// Highest version currently holding `stage`.
    pub fn latest_version(&self, name: &str, stage: Stage) -> Result<Option<ModelVersion>> {
        Ok(self.get(name)?.and_then(|m| m.versions.into_iter().filter(|v| v.stage == stage).max_by_key(|v| v.version)))
    }

    fn put(&self, model: &RegisteredModel) -> Result<()> {
        self.store.models_tree().insert(model.name.as_bytes(), encode(model)?)?;
        self.store.flush()
    }
}
