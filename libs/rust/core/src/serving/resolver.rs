use std::sync::Arc;

use tracing::{info, instrument};

use crate::config::TrackingUri;
use crate::error::{LifecycleError, Result};
use crate::model::{LinearModel, ModelHandle};
use crate::registry::{ModelReference, ModelRegistry};
use crate::tracking::TrackingStore;

/// Turns a `models:/<name>/<stage>` reference into a loaded predictor. Never caches.
pub trait ModelSource: Send + Sync {
    fn resolve(&self, reference: &ModelReference) -> Result<ModelHandle>;
}

pub struct RegistryResolver { backing: Backing }

enum Backing {
    Open(ModelRegistry),
    // opened per resolution so the store directory stays free between loads
    Uri(TrackingUri),
}

impl RegistryResolver {
    pub fn new(registry: ModelRegistry) -> Self { Self { backing: Backing::Open(registry) } }

    pub fn at(uri: TrackingUri) -> Self { Self { backing: Backing::Uri(uri) } }
}

impl ModelSource for RegistryResolver {
    #[instrument(skip(self), fields(model_uri = %reference))]
    fn resolve(&self, reference: &ModelReference) -> Result<ModelHandle> {
        match &self.backing {
            Backing::Open(registry) => load_stage(registry, reference),
            Backing::Uri(uri) => load_stage(&ModelRegistry::new(TrackingStore::open(uri)?), reference),
        }
    }
}

fn load_stage(registry: &ModelRegistry, reference: &ModelReference) -> Result<ModelHandle> {
    let version = registry.latest_version(&reference.name, reference.stage)?
        .ok_or_else(|| LifecycleError::ModelNotFound { name: reference.name.clone(), stage: reference.stage.to_string() })?;
    let bytes = registry.store().load_artifact(&version.run_id, &version.artifact_path)?
        .ok_or_else(|| LifecycleError::LoadFailure(format!(
            "version {} of '{}' points at missing artifact {}/{}", version.version, reference.name, version.run_id, version.artifact_path
        )))?;
    let model = LinearModel::from_json(&bytes)?;
    info!(version = version.version, run_id = %version.run_id, features = model.feature_names.len(), "model resolved");
    Ok(Arc::new(model))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrackingUri;
    use crate::model::{Frame, Row};
    use crate::registry::Stage;
    use crate::tracking::TrackingStore;

    fn linear(intercept: f64) -> LinearModel {
        LinearModel { feature_names: vec!["x".into()], coefficients: vec![1.0], intercept, alpha: None, l1_ratio: None }
    }

    fn publish(reg: &ModelRegistry, exp: &str, artifact: &[u8]) -> u32 {
        let run = reg.store().start_run(exp, "r").unwrap();
        reg.store().log_artifact(&run.id, "model.json", artifact).unwrap();
        reg.register_model("m", &run.id, "model.json").unwrap().version
    }

    #[test]
    fn follows_stage_reassignment() {
        let dir = tempfile::tempdir().unwrap();
        let store = TrackingStore::open(&TrackingUri::for_path(&dir.path().join("s"))).unwrap();
        let exp = store.create_experiment("e", &[]).unwrap();
        let reg = ModelRegistry::new(store);
        let resolver = RegistryResolver::new(reg.clone());
        let reference = ModelReference::new("m", Stage::Production);

        assert!(matches!(resolver.resolve(&reference), Err(LifecycleError::ModelNotFound { .. })));

        let v1 = publish(&reg, &exp, &linear(1.0).to_json().unwrap());
        reg.transition_stage("m", v1, Stage::Production, true).unwrap();
        let mut row = Row::new();
        row.insert("x".into(), serde_json::json!(1.0));
        let frame = Frame::from_rows(&[row]).unwrap();
        assert_eq!(resolver.resolve(&reference).unwrap().predict(&frame).unwrap(), vec![2.0]);

        let v2 = publish(&reg, &exp, &linear(10.0).to_json().unwrap());
        reg.transition_stage("m", v2, Stage::Production, true).unwrap();
        assert_eq!(resolver.resolve(&reference).unwrap().predict(&frame).unwrap(), vec![11.0]);
    }

    #[test]
    fn uri_backed_resolver_opens_store_on_demand() {
        let dir = tempfile::tempdir().unwrap();
        let uri = TrackingUri::for_path(&dir.path().join("s"));
        let resolver = RegistryResolver::at(uri.clone());
        let reference = ModelReference::new("m", Stage::Production);
        assert!(matches!(resolver.resolve(&reference), Err(LifecycleError::ModelNotFound { .. })));

        let store = TrackingStore::open(&uri).unwrap();
        let exp = store.create_experiment("e", &[]).unwrap();
        let reg = ModelRegistry::new(store);
        let v = publish(&reg, &exp, &linear(0.0).to_json().unwrap());
        reg.transition_stage("m", v, Stage::Production, true).unwrap();
        assert!(resolver.resolve(&reference).is_ok());
    }

    #[test]
    fn corrupt_artifact_is_load_failure() {
        let dir = tempfile::tempdir().unwrap();
        let store = TrackingStore::open(&TrackingUri::for_path(&dir.path().join("s"))).unwrap();
        let exp = store.create_experiment("e", &[]).unwrap();
        let reg = ModelRegistry::new(store);
        let v = publish(&reg, &exp, b"\x00garbage");
        reg.transition_stage("m", v, Stage::Production, false).unwrap();
        let err = RegistryResolver::new(reg).resolve(&ModelReference::new("m", Stage::Production)).err().unwrap();
        assert!(matches!(err, LifecycleError::LoadFailure(_)));
    }
}
