use anyhow::{Context, Result};
use mlops_core::{ensure_experiment, load_config, load_data, set_tracking_uri, train_and_log_models, SweepSettings, TrackingStore};
use tracing::info;

fn main() -> Result<()> {
    let cfg = load_config("trainer")?;
    mlops_core::init_tracing("trainer", &cfg.log_level)?;

    // store problems are fatal here; nothing is retried
    let uri = set_tracking_uri(&cfg.tracking_uri).context("tracking store misconfigured")?;
    let store = TrackingStore::open(uri).context("tracking store unreachable")?;
    let experiment_id = ensure_experiment(&store, &cfg.experiment_name, &cfg.experiment_tags())?;
    info!(target: "trainer", experiment = %cfg.experiment_name, %experiment_id, "experiment ready");

    let data = load_data(&cfg.data_path, cfg.seed)
        .with_context(|| format!("loading {}", cfg.data_path.display()))?;
    let outcome = train_and_log_models(&store, &data, &SweepSettings::for_model(cfg.model_name.clone()))?;
    info!(
        target: "trainer",
        runs = outcome.runs.len(),
        best_run = %outcome.best_run_id,
        version = outcome.promoted.version,
        stage = %outcome.promoted.stage,
        "training complete"
    );
    Ok(())
}
