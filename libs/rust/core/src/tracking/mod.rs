//! File-backed tracking store: experiments, runs, params, metrics and artifacts on sled.

use std::collections::{BTreeMap, HashMap};
use std::ops::Deref;
use std::path::PathBuf;
use std::sync::{Arc, Weak};

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sled::{Db, Tree};
use tracing::{debug, info};

use crate::config::TrackingUri;
use crate::error::{LifecycleError, Result};

mod experiment;
pub use experiment::{active_experiment, ensure_experiment, log_run};

/// Free-text note tag understood by tracking UIs.
pub const NOTE_TAG: &str = "mlflow.note.content";

// sled locks its directory, so openers of one path share a handle; the lock is released once
// the last handle drops.
static OPEN_STORES: Lazy<Mutex<HashMap<PathBuf, Weak<StoreInner>>>> = Lazy::new(|| Mutex::new(HashMap::new()));

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Experiment {
    pub id: String,
    pub name: String,
    pub tags: BTreeMap<String, String>,
    pub created_ms: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RunStatus { Running, Finished, Failed }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    pub experiment_id: String,
    pub name: String,
    pub status: RunStatus,
    pub params: BTreeMap<String, String>,
    pub metrics: BTreeMap<String, f64>,
    pub artifacts: Vec<String>,
    pub start_ms: i64,
    pub end_ms: Option<i64>,
}

pub(crate) enum Creation { Created(String), Existing(Experiment) }

#[derive(Clone)]
pub struct TrackingStore { inner: Arc<StoreInner> }

pub struct StoreInner {
    uri: TrackingUri,
    db: Db,
    experiments: Tree,
    experiment_ids: Tree,
    runs: Tree,
    artifacts: Tree,
    models: Tree,
    write_lock: Mutex<()>,
}

impl Deref for TrackingStore {
    type Target = StoreInner;
    fn deref(&self) -> &StoreInner { &self.inner }
}

impl TrackingStore {
    /// Opens (or reuses within this process) the store at `uri`. Failure is a configuration error.
    pub fn open(uri: &TrackingUri) -> Result<Self> {
        let mut open = OPEN_STORES.lock();
        if let Some(inner) = open.get(uri.path()).and_then(Weak::upgrade) { return Ok(Self { inner }); }
        let db = sled::open(uri.path())
            .map_err(|e| LifecycleError::Configuration(format!("cannot open tracking store '{uri}': {e}")))?;
        let tree = |name: &str| db.open_tree(name).map_err(|e| LifecycleError::Configuration(e.to_string()));
        let inner = Arc::new(StoreInner {
            uri: uri.clone(),
            experiments: tree("experiments")?,
            experiment_ids: tree("experiment_ids")?,
            runs: tree("runs")?,
            artifacts: tree("artifacts")?,
            models: tree("registered_models")?,
            db,
            write_lock: Mutex::new(()),
        });
        info!(target: "mlops_core::tracking", %uri, "tracking store opened");
        open.insert(uri.path().to_path_buf(), Arc::downgrade(&inner));
        Ok(Self { inner })
    }

    pub fn uri(&self) -> &TrackingUri { &self.uri }

    pub fn get_experiment_by_name(&self, name: &str) -> Result<Option<Experiment>> {
        self.experiments.get(name.as_bytes())?.map(|v| decode(&v)).transpose()
    }

    pub fn get_experiment(&self, id: &str) -> Result<Option<Experiment>> {
        match self.experiment_ids.get(id.as_bytes())? {
            // an index entry may briefly point at a name another writer won
            Some(name) => Ok(self.get_experiment_by_name(&String::from_utf8_lossy(&name))?.filter(|e| e.id == id)),
            None => Ok(None),
        }
    }

    pub fn list_experiments(&self) -> Result<Vec<Experiment>> {
        self.experiments.iter().values().map(|v| decode(&v?)).collect()
    }

    /// Creates a new experiment; fails if the name is already taken.
    pub fn create_experiment(&self, name: &str, tags: &[(String, String)]) -> Result<String> {
        match self.try_create_experiment(name, tags)? {
            Creation::Created(id) => Ok(id),
            Creation::Existing(_) => Err(LifecycleError::Store(format!("experiment '{name}' already exists"))),
        }
    }

    pub(crate) fn try_create_experiment(&self, name: &str, tags: &[(String, String)]) -> Result<Creation> {
        if name.trim().is_empty() {
            return Err(LifecycleError::Configuration("experiment name must not be empty".into()));
        }
        let id = (self.db.generate_id()? + 1).to_string();
        let exp = Experiment { id: id.clone(), name: name.to_string(), tags: tags.iter().cloned().collect(), created_ms: now_ms() };
        // The id index goes in first so the winner's id resolves as soon as its name is visible.
        self.experiment_ids.insert(id.as_bytes(), name.as_bytes())?;
        let swapped = self.experiments.compare_and_swap(name.as_bytes(), None as Option<&[u8]>, Some(encode(&exp)?))?;
        if swapped.is_err() {
            self.experiment_ids.remove(id.as_bytes())?;
            let existing = self.get_experiment_by_name(name)?
                .ok_or_else(|| LifecycleError::Store(format!("experiment '{name}' vanished during create")))?;
            debug!(target: "mlops_core::tracking", experiment = name, experiment_id = %existing.id, "lost create race");
            return Ok(Creation::Existing(existing));
        }
        self.db.flush()?;
        info!(target: "mlops_core::tracking", experiment = name, experiment_id = %id, "experiment created");
        Ok(Creation::Created(id))
    }

    pub fn set_experiment_tag(&self, experiment_id: &str, key: &str, value: &str) -> Result<()> {
        let _guard = self.write_lock.lock();
        let mut exp = self.get_experiment(experiment_id)?
            .ok_or_else(|| LifecycleError::Store(format!("no experiment with id '{experiment_id}'")))?;
        exp.tags.insert(key.to_string(), value.to_string());
        self.experiments.insert(exp.name.as_bytes(), encode(&exp)?)?;
        self.db.flush()?;
        debug!(target: "mlops_core::tracking", experiment_id, key, "experiment tag set");
        Ok(())
    }

    pub fn start_run(&self, experiment_id: &str, name: &str) -> Result<Run> {
        if self.get_experiment(experiment_id)?.is_none() {
            return Err(LifecycleError::Store(format!("no experiment with id '{experiment_id}'")));
        }
        let run = Run {
            id: uuid::Uuid::new_v4().simple().to_string(),
            experiment_id: experiment_id.to_string(),
            name: name.to_string(),
            status: RunStatus::Running,
            params: BTreeMap::new(),
            metrics: BTreeMap::new(),
            artifacts: Vec::new(),
            start_ms: now_ms(),
            end_ms: None,
        };
        self.runs.insert(run.id.as_bytes(), encode(&run)?)?;
        debug!(target: "mlops_core::tracking", run_id = %run.id, experiment_id, "run started");
        Ok(run)
    }

    pub fn get_run(&self, run_id: &str) -> Result<Option<Run>> {
        self.runs.get(run_id.as_bytes())?.map(|v| decode(&v)).transpose()
    }

    pub fn runs_for_experiment(&self, experiment_id: &str) -> Result<Vec<Run>> {
        let mut out = Vec::new();
        for v in self.runs.iter().values() {
            let run: Run = decode(&v?)?;
            if run.experiment_id == experiment_id { out.push(run); }
        }
        out.sort_by_key(|r| r.start_ms);
        Ok(out)
    }

    pub fn log_param(&self, run_id: &str, key: &str, value: impl ToString) -> Result<()> {
        let value = value.to_string();
        self.update_run(run_id, |run| { run.params.insert(key.to_string(), value); })
    }

    pub fn log_metric(&self, run_id: &str, key: &str, value: f64) -> Result<()> {
        self.update_run(run_id, |run| { run.metrics.insert(key.to_string(), value); })
    }

    pub fn log_artifact(&self, run_id: &str, path: &str, bytes: &[u8]) -> Result<()> {
        self.artifacts.insert(artifact_key(run_id, path).as_bytes(), bytes)?;
        self.update_run(run_id, |run| {
            if !run.artifacts.iter().any(|a| a == path) { run.artifacts.push(path.to_string()); }
        })
    }

    pub fn load_artifact(&self, run_id: &str, path: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.artifacts.get(artifact_key(run_id, path).as_bytes())?.map(|v| v.to_vec()))
    }

    pub fn end_run(&self, run_id: &str, status: RunStatus) -> Result<()> {
        self.update_run(run_id, |run| { run.status = status; run.end_ms = Some(now_ms()); })?;
        self.db.flush()?;
        Ok(())
    }

    fn update_run(&self, run_id: &str, f: impl FnOnce(&mut Run)) -> Result<()> {
        let _guard = self.write_lock.lock();
        let mut run = self.get_run(run_id)?
            .ok_or_else(|| LifecycleError::Store(format!("no run with id '{run_id}'")))?;
        f(&mut run);
        self.runs.insert(run_id.as_bytes(), encode(&run)?)?;
        Ok(())
    }

    pub(crate) fn models_tree(&self) -> &Tree { &self.models }
    pub(crate) fn write_lock(&self) -> &Mutex<()> { &self.write_lock }
    pub(crate) fn flush(&self) -> Result<()> { self.db.flush()?; Ok(()) }
}

fn artifact_key(run_id: &str, path: &str) -> String { format!("{run_id}/{path}") }

pub(crate) fn now_ms() -> i64 { chrono::Utc::now().timestamp_millis() }

pub(crate) fn encode<T: Serialize>(v: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(v).map_err(|e| LifecycleError::Store(e.to_string()))
}

pub(crate) fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|e| LifecycleError::Store(e.to_string()))
}
