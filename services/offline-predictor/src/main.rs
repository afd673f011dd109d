//! Smoke test for the registry: resolve the staged model once and predict a fixed sample row.

use anyhow::{Context, Result};
use mlops_core::{load_config, set_tracking_uri, Frame, ModelSource, RegistryResolver, Row};
use serde_json::json;
use tracing::info;

const SAMPLE: [(&str, f64); 11] = [
    ("fixed acidity", 7.4),
    ("volatile acidity", 0.70),
    ("citric acid", 0.00),
    ("residual sugar", 1.9),
    ("chlorides", 0.076),
    ("free sulfur dioxide", 11.0),
    ("total sulfur dioxide", 34.0),
    ("density", 0.9978),
    ("pH", 3.51),
    ("sulphates", 0.56),
    ("alcohol", 9.4),
];

fn sample_input() -> Row {
    SAMPLE.iter().map(|(name, value)| (name.to_string(), json!(value))).collect()
}

fn main() -> Result<()> {
    let cfg = load_config("offline-predictor")?;
    mlops_core::init_tracing("offline-predictor", "warn")?;
    let uri = set_tracking_uri(&cfg.tracking_uri).context("tracking store misconfigured")?;
    let reference = cfg.model_reference()?;

    let model = RegistryResolver::at(uri.clone())
        .resolve(&reference)
        .with_context(|| format!("resolving {reference}"))?;
    let frame = Frame::from_rows(&[sample_input()])?;
    let prediction = model.predict(&frame)?;
    info!(target: "offline-predictor", model_uri = %reference, tracking_uri = %uri, rows = frame.len(), "prediction complete");

    println!("Sample input:");
    println!("{}", frame.to_table_string());
    println!("Prediction: {prediction:?}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_row_has_every_wine_feature() {
        let row = sample_input();
        assert_eq!(row.len(), 11);
        assert_eq!(row["alcohol"], json!(9.4));
        assert_eq!(Frame::from_rows(&[row]).unwrap().len(), 1);
    }
}
