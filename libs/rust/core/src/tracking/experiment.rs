use once_cell::sync::Lazy;
use parking_lot::RwLock;
use tracing::info;

use super::{Creation, Experiment, Run, TrackingStore};
use crate::error::{LifecycleError, Result};

// Target of run logging for this process; set by provisioning before any run is logged.
static ACTIVE_EXPERIMENT: Lazy<RwLock<Option<Experiment>>> = Lazy::new(|| RwLock::new(None));

/// Makes sure `name` exists with `tags` applied and returns its id.
///
/// A missing experiment is created with the tags. An existing one keeps its id and has every
/// tag overwritten, so repeated calls only refresh tags. Either way the experiment becomes the
/// active target for [`log_run`].
pub fn ensure_experiment(store: &TrackingStore, name: &str, tags: &[(String, String)]) -> Result<String> {
    let existing = match store.get_experiment_by_name(name)? {
        Some(exp) => exp,
        None => match store.try_create_experiment(name, tags)? {
            Creation::Created(id) => {
                activate(store, &id)?;
                return Ok(id);
            }
            // lost a create race; fall through to the refresh path
            Creation::Existing(exp) => exp,
        },
    };
    for (key, value) in tags {
        store.set_experiment_tag(&existing.id, key, value)?;
    }
    info!(target: "mlops_core::tracking", experiment = name, experiment_id = %existing.id, "experiment tags refreshed");
    activate(store, &existing.id)?;
    Ok(existing.id)
}

fn activate(store: &TrackingStore, id: &str) -> Result<()> {
    let exp = store.get_experiment(id)?
        .ok_or_else(|| LifecycleError::Store(format!("no experiment with id '{id}'")))?;
    *ACTIVE_EXPERIMENT.write() = Some(exp);
    Ok(())
}

pub fn active_experiment() -> Option<Experiment> { ACTIVE_EXPERIMENT.read().clone() }

/// Starts a run in the active experiment.
pub fn log_run(store: &TrackingStore, run_name: &str) -> Result<Run> {
    let exp = active_experiment()
        .ok_or_else(|| LifecycleError::Configuration("no active experiment; provision one first".into()))?;
    store.start_run(&exp.id, run_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrackingUri;
    use crate::tracking::NOTE_TAG;

    fn tags(note: &str) -> Vec<(String, String)> {
        vec![("project".into(), "Wine Quality Prediction MLOps".into()), (NOTE_TAG.into(), note.into())]
    }

    #[test]
    fn provisioning_twice_keeps_one_experiment() {
        let dir = tempfile::tempdir().unwrap();
        let store = TrackingStore::open(&TrackingUri::for_path(&dir.path().join("s"))).unwrap();
        let first = ensure_experiment(&store, "Wine_Quality_MLOps", &tags("note")).unwrap();
        let second = ensure_experiment(&store, "Wine_Quality_MLOps", &tags("note")).unwrap();
        assert_eq!(first, second);
        assert_eq!(store.list_experiments().unwrap().len(), 1);
    }

    #[test]
    fn reprovisioning_refreshes_note() {
        let dir = tempfile::tempdir().unwrap();
        let store = TrackingStore::open(&TrackingUri::for_path(&dir.path().join("s"))).unwrap();
        let id = ensure_experiment(&store, "exp", &tags("old note")).unwrap();
        let again = ensure_experiment(&store, "exp", &tags("new note")).unwrap();
        assert_eq!(id, again);
        let exp = store.get_experiment(&id).unwrap().unwrap();
        assert_eq!(exp.tags[NOTE_TAG], "new note");
        assert_eq!(exp.tags["project"], "Wine Quality Prediction MLOps");
    }

    #[test]
    fn concurrent_provisioning_shares_one_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = TrackingStore::open(&TrackingUri::for_path(&dir.path().join("s"))).unwrap();
        for round in 0..50 {
            let name = format!("exp-{round}");
            let ids: Vec<String> = std::thread::scope(|s| {
                let handles: Vec<_> = (0..8).map(|_| s.spawn(|| ensure_experiment(&store, &name, &tags("note")))).collect();
                handles.into_iter().map(|h| h.join().unwrap().unwrap()).collect()
            });
            assert!(ids.iter().all(|id| id == &ids[0]), "round {round}: {ids:?}");
            let exp = store.get_experiment(&ids[0]).unwrap().unwrap();
            assert_eq!(exp.name, name);
            assert_eq!(exp.tags[NOTE_TAG], "note");
        }
        assert_eq!(store.list_experiments().unwrap().len(), 50);
    }

    #[test]
    fn empty_name_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = TrackingStore::open(&TrackingUri::for_path(&dir.path().join("s"))).unwrap();
        assert!(ensure_experiment(&store, "  ", &[]).is_err());
    }
}
