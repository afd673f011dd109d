//! Model lifecycle bridge: experiment provisioning, registry resolution, the process-wide model
//! cache and the tabular predictor shared by the training, serving and offline entry points.

use anyhow::Result;
use once_cell::sync::OnceCell;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static TRACING_INIT: OnceCell<()> = OnceCell::new();

/// Installs the global subscriber once. `RUST_LOG` wins over `default_level`;
/// `MLOPS_JSON_LOG=1|true` switches to JSON lines.
pub fn init_tracing(service: &str, default_level: &str) -> Result<()> {
    TRACING_INIT.get_or_try_init(|| {
        let json = std::env::var("MLOPS_JSON_LOG").ok().map(|v| v == "1" || v.eq_ignore_ascii_case("true")).unwrap_or(false);
        let json_layer = json.then(|| {
            tracing_subscriber::fmt::layer()
                .json()
                .flatten_event(true)
                .with_current_span(true)
                .with_span_list(false)
        });
        let text_layer = (!json).then(|| {
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_line_number(true)
        });
        let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
        tracing_subscriber::registry().with(env_filter).with(json_layer).with(text_layer).try_init()?;
        Ok::<_, anyhow::Error>(())
    })?;
    info!(target: "mlops_core", service, "tracing initialized");
    Ok(())
}

pub mod config;
pub mod error;
pub mod model;
pub mod registry;
pub mod serving;
pub mod tracking;
pub mod training;

pub use config::{load_config, set_tracking_uri, tracking_uri, LifecycleConfig, TrackingUri};
pub use error::LifecycleError;
pub use model::{Frame, LinearModel, ModelHandle, Predictor, Row};
pub use registry::{ModelReference, ModelRegistry, ModelVersion, Stage};
pub use serving::{ModelCache, ModelSource, RegistryResolver};
pub use tracking::{ensure_experiment, Experiment, TrackingStore};
pub use training::{load_data, train_and_log_models, DataSplit, SweepSettings};
