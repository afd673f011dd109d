//! HTTP inference boundary over the Production-stage model.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use mlops_core::{
    load_config, set_tracking_uri, Frame, LifecycleError, ModelCache, RegistryResolver, Row,
};
use serde_json::{json, Value};
use tracing::{error, info, instrument, warn};

mod metrics;
pub use metrics::ServerMetrics;

pub const LIVENESS: &str = "Model Server Running";

#[derive(Clone)]
pub struct AppState {
    cache: Arc<ModelCache>,
    metrics: Arc<ServerMetrics>,
}

impl AppState {
    pub fn new(cache: Arc<ModelCache>) -> Result<Self> {
        Ok(Self { cache, metrics: Arc::new(ServerMetrics::new()?) })
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/predict", post(predict))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Serving entry point: fixes the tracking URI, then serves until ctrl-c. The model loads on first request.
pub async fn run() -> Result<()> {
    let cfg = load_config("model-server")?;
    mlops_core::init_tracing("model-server", &cfg.log_level)?;
    let uri = set_tracking_uri(&cfg.tracking_uri).context("tracking store misconfigured")?;
    let cache = Arc::new(ModelCache::new(Arc::new(RegistryResolver::at(uri.clone())), cfg.model_reference()?));
    let model_uri = cache.reference().to_string();
    let app = router(AppState::new(cache)?);

    let addr = cfg.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await.with_context(|| format!("cannot bind {addr}"))?;
    info!(target: "model-server", %addr, %model_uri, tracking_uri = %uri, "model server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async { let _ = tokio::signal::ctrl_c().await; })
        .await?;
    info!(target: "model-server", "shutdown");
    Ok(())
}

async fn health() -> &'static str { LIVENESS }

/// Accepts one JSON object or an array of objects; anything else is an invalid payload.
pub fn parse_payload(body: &[u8]) -> Result<Vec<Row>, LifecycleError> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|_| LifecycleError::InvalidPayload("Invalid JSON payload".into()))?;
    let shape = || LifecycleError::InvalidPayload("Payload must be a JSON object or list of objects".into());
    match value {
        Value::Null => Err(LifecycleError::InvalidPayload("Invalid JSON payload".into())),
        Value::Object(row) => Ok(vec![row]),
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item { Value::Object(row) => Ok(row), _ => Err(shape()) })
            .collect(),
        _ => Err(shape()),
    }
}

fn predict_rows(cache: &ModelCache, rows: &[Row]) -> Result<Vec<f64>, LifecycleError> {
    let model = cache.get_or_load()?;
    let frame = Frame::from_rows(rows)?;
    model.predict(&frame)
}

#[instrument(skip_all, fields(bytes = body.len()))]
async fn predict(State(state): State<AppState>, body: Bytes) -> Response {
    let started = Instant::now();
    let outcome = match parse_payload(&body) {
        Ok(rows) => {
            let cache = state.cache.clone();
            tokio::task::spawn_blocking(move || predict_rows(&cache, &rows))
                .await
                .unwrap_or_else(|e| Err(LifecycleError::PredictionFailure(format!("prediction task failed: {e}"))))
        }
        Err(e) => Err(e),
    };
    state.metrics.latency.observe(started.elapsed().as_secs_f64());
    match outcome {
        Ok(predictions) => {
            state.metrics.requests.with_label_values(&["ok"]).inc();
            state.metrics.rows.inc_by(predictions.len() as u64);
            Json(json!({ "predictions": predictions })).into_response()
        }
        Err(e) => ApiError::record(e, &state.metrics).into_response(),
    }
}

/// Every predict failure is a 400 carrying the underlying message.
pub struct ApiError(LifecycleError);

impl ApiError {
    fn record(e: LifecycleError, metrics: &ServerMetrics) -> Self {
        let outcome = match &e {
            e if e.is_resolution_failure() => "model_unavailable",
            LifecycleError::InvalidPayload(_) => "invalid_payload",
            LifecycleError::PredictionFailure(_) => "prediction_failure",
            _ => "model_unavailable",
        };
        if outcome == "model_unavailable" {
            error!(target: "model-server", error = %e, "model resolution failed");
        } else {
            warn!(target: "model-server", error = %e, outcome, "predict request rejected");
        }
        metrics.requests.with_label_values(&[outcome]).inc();
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (StatusCode::BAD_REQUEST, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

async fn metrics_handler(State(state): State<AppState>) -> Response {
    match state.metrics.render() {
        Ok(buf) => Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "text/plain; version=0.0.4")
            .body(Body::from(buf))
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response()),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, format!("encode error: {e}")).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_object_becomes_one_row() {
        let rows = parse_payload(br#"{"alcohol": 9.4}"#).unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn array_keeps_row_order() {
        let rows = parse_payload(br#"[{"a": 1}, {"a": 2}, {"a": 3}]"#).unwrap();
        let a: Vec<i64> = rows.iter().map(|r| r["a"].as_i64().unwrap()).collect();
        assert_eq!(a, vec![1, 2, 3]);
    }

    #[test]
    fn scalars_and_null_are_invalid() {
        for body in ["42", "\"text\"", "null", "{not json", "[1, 2]", "true"] {
            assert!(matches!(parse_payload(body.as_bytes()), Err(LifecycleError::InvalidPayload(_))), "{body}");
        }
    }
}
