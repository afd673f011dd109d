//! Dataset loading and the ElasticNet sweep that feeds the registry.

use std::path::Path;

use linfa::prelude::*;
use linfa_elasticnet::ElasticNet;
use ndarray::{Array1, Array2};
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use tracing::{info, warn};

use crate::error::{LifecycleError, Result};
use crate::model::LinearModel;
use crate::registry::{ModelRegistry, ModelVersion, Stage};
use crate::tracking::{log_run, RunStatus, TrackingStore};

pub const TARGET_COLUMN: &str = "quality";
pub const TEST_FRACTION: f64 = 0.25;

#[derive(Debug, Clone)]
pub struct Table {
    pub feature_names: Vec<String>,
    pub features: Array2<f64>,
    pub targets: Array1<f64>,
}

#[derive(Debug, Clone)]
pub struct DataSplit { pub train: Table, pub test: Table }

/// Reads the wine-quality CSV and splits it 75/25 with a seeded shuffle.
pub fn load_data(path: &Path, seed: u64) -> Result<DataSplit> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| LifecycleError::Training(format!("cannot read {}: {e}", path.display())))?;
    let table = parse_csv(&text)?;
    info!(target: "mlops_core::training", path = %path.display(), rows = table.targets.len(), "dataset loaded");
    split(&table, seed, TEST_FRACTION)
}

/// Header row required; `;` or `,` delimited; the `quality` column is the target.
pub fn parse_csv(text: &str) -> Result<Table> {
    let mut lines = text.lines().filter(|l| !l.trim().is_empty());
    let header = lines.next().ok_or_else(|| LifecycleError::Training("dataset is empty".into()))?;
    let delim = if header.contains(';') { ';' } else { ',' };
    let names: Vec<String> = header.split(delim).map(|h| h.trim().trim_matches('"').to_string()).collect();
    let target = names.iter().position(|n| n == TARGET_COLUMN)
        .ok_or_else(|| LifecycleError::Training(format!("dataset has no '{TARGET_COLUMN}' column")))?;

    let mut flat = Vec::new();
    let mut targets = Vec::new();
    for (lineno, line) in lines.enumerate() {
        let cells: Vec<&str> = line.split(delim).collect();
        if cells.len() != names.len() {
            return Err(LifecycleError::Training(format!("line {}: expected {} fields, found {}", lineno + 2, names.len(), cells.len())));
        }
        for (i, cell) in cells.iter().enumerate() {
            let v: f64 = cell.trim().trim_matches('"').parse()
                .map_err(|_| LifecycleError::Training(format!("line {}: '{}' is not a number", lineno + 2, cell.trim())))?;
            if i == target { targets.push(v) } else { flat.push(v) }
        }
    }
    let feature_names: Vec<String> = names.into_iter().enumerate().filter(|(i, _)| *i != target).map(|(_, n)| n).collect();
    let features = Array2::from_shape_vec((targets.len(), feature_names.len()), flat)
        .map_err(|e| LifecycleError::Training(e.to_string()))?;
    Ok(Table { feature_names, features, targets: Array1::from(targets) })
}

pub fn split(table: &Table, seed: u64, test_fraction: f64) -> Result<DataSplit> {
    let n = table.targets.len();
    let n_test = ((n as f64) * test_fraction).ceil() as usize;
    if n_test == 0 || n_test >= n {
        return Err(LifecycleError::Training(format!("cannot split {n} rows with test fraction {test_fraction}")));
    }
    let mut idx: Vec<usize> = (0..n).collect();
    idx.shuffle(&mut StdRng::seed_from_u64(seed));
    let (test_idx, train_idx) = idx.split_at(n_test);
    let take = |rows: &[usize]| Table {
        feature_names: table.feature_names.clone(),
        features: table.features.select(ndarray::Axis(0), rows),
        targets: table.targets.select(ndarray::Axis(0), rows),
    };
    Ok(DataSplit { train: take(train_idx), test: take(test_idx) })
}

#[derive(Debug, Clone)]
pub struct SweepSettings {
    pub model_name: String,
    pub alphas: Vec<f64>,
    pub l1_ratios: Vec<f64>,
    pub artifact_path: String,
}

impl SweepSettings {
    pub fn for_model(model_name: impl Into<String>) -> Self {
        Self { model_name: model_name.into(), alphas: vec![0.1, 0.5, 1.0], l1_ratios: vec![0.1, 0.5, 0.9], artifact_path: "model.json".into() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scores { pub rmse: f64, pub mae: f64, pub r2: f64 }

#[derive(Debug, Clone)]
pub struct SweepOutcome {
    pub runs: Vec<(String, f64, f64, Scores)>,
    pub best_run_id: String,
    pub promoted: ModelVersion,
}

/// Fits one ElasticNet per grid point in its own run (active experiment), registers the lowest-RMSE
/// run and promotes it to Production, archiving the previous holder.
pub fn train_and_log_models(store: &TrackingStore, data: &DataSplit, settings: &SweepSettings) -> Result<SweepOutcome> {
    let mut runs = Vec::new();
    for &alpha in &settings.alphas {
        for &l1_ratio in &settings.l1_ratios {
            let run = log_run(store, &format!("elasticnet-a{alpha}-l{l1_ratio}"))?;
            match fit_and_log(store, &run.id, data, alpha, l1_ratio, &settings.artifact_path) {
                Ok(scores) => {
                    store.end_run(&run.id, RunStatus::Finished)?;
                    info!(target: "mlops_core::training", run_id = %run.id, alpha, l1_ratio, rmse = scores.rmse, r2 = scores.r2, "run finished");
                    runs.push((run.id, alpha, l1_ratio, scores));
                }
                Err(e) => {
                    warn!(target: "mlops_core::training", run_id = %run.id, alpha, l1_ratio, error = %e, "run failed");
                    store.end_run(&run.id, RunStatus::Failed)?;
                    return Err(e);
                }
            }
        }
    }
    let best = runs.iter()
        .min_by(|a, b| a.3.rmse.total_cmp(&b.3.rmse))
        .ok_or_else(|| LifecycleError::Training("hyperparameter grid is empty".into()))?;
    let best_run_id = best.0.clone();

    let registry = ModelRegistry::new(store.clone());
    let version = registry.register_model(&settings.model_name, &best_run_id, &settings.artifact_path)?;
    let promoted = registry.transition_stage(&settings.model_name, version.version, Stage::Production, true)?;
    info!(target: "mlops_core::training", model = %settings.model_name, version = promoted.version, run_id = %best_run_id, rmse = best.3.rmse, "best model promoted");
    Ok(SweepOutcome { runs, best_run_id, promoted })
}

fn fit_and_log(store: &TrackingStore, run_id: &str, data: &DataSplit, alpha: f64, l1_ratio: f64, artifact_path: &str) -> Result<Scores> {
    store.log_param(run_id, "alpha", alpha)?;
    store.log_param(run_id, "l1_ratio", l1_ratio)?;
    let train = linfa::Dataset::new(data.train.features.clone(), data.train.targets.clone());
    let fitted = ElasticNet::params()
        .penalty(alpha)
        .l1_ratio(l1_ratio)
        .fit(&train)
        .map_err(|e| LifecycleError::Training(e.to_string()))?;
    let model = LinearModel {
        feature_names: data.train.feature_names.clone(),
        coefficients: fitted.hyperplane().to_vec(),
        intercept: fitted.intercept(),
        alpha: Some(alpha),
        l1_ratio: Some(l1_ratio),
    };
    let predicted: Array1<f64> = fitted.predict(&data.test.features);
    let scores = score(&predicted, &data.test.targets);
    store.log_metric(run_id, "rmse", scores.rmse)?;
    store.log_metric(run_id, "mae", scores.mae)?;
    store.log_metric(run_id, "r2", scores.r2)?;
    store.log_artifact(run_id, artifact_path, &model.to_json()?)?;
    Ok(scores)
}

pub fn score(predicted: &Array1<f64>, actual: &Array1<f64>) -> Scores {
    let n = actual.len().max(1) as f64;
    let resid = predicted - actual;
    let rmse = (resid.mapv(|r| r * r).sum() / n).sqrt();
    let mae = resid.mapv(f64::abs).sum() / n;
    let mean = actual.mean().unwrap_or(0.0);
    let ss_tot = actual.mapv(|y| (y - mean).powi(2)).sum();
    let ss_res = resid.mapv(|r| r * r).sum();
    let r2 = if ss_tot == 0.0 { 0.0 } else { 1.0 - ss_res / ss_tot };
    Scores { rmse, mae, r2 }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CSV: &str = "\"fixed acidity\";\"alcohol\";\"quality\"\n7.4;9.4;5\n7.8;9.8;5\n11.2;9.8;6\n7.4;10.5;6\n";

    #[test]
    fn parses_semicolon_csv_with_quoted_header() {
        let t = parse_csv(CSV).unwrap();
        assert_eq!(t.feature_names, vec!["fixed acidity", "alcohol"]);
        assert_eq!(t.features.dim(), (4, 2));
        assert_eq!(t.targets.to_vec(), vec![5.0, 5.0, 6.0, 6.0]);
    }

    #[test]
    fn rejects_missing_target_and_bad_cells() {
        assert!(parse_csv("a,b\n1,2\n").is_err());
        assert!(parse_csv("a,quality\n1,x\n").is_err());
        assert!(parse_csv("a,quality\n1\n").is_err());
    }

    #[test]
    fn split_is_seeded_and_sized() {
        let t = parse_csv(CSV).unwrap();
        let a = split(&t, 42, TEST_FRACTION).unwrap();
        let b = split(&t, 42, TEST_FRACTION).unwrap();
        assert_eq!((a.train.targets.len(), a.test.targets.len()), (3, 1));
        assert_eq!(a.test.features, b.test.features);
    }

    #[test]
    fn perfect_predictions_score_zero_error() {
        let y = Array1::from(vec![5.0, 6.0, 7.0]);
        let s = score(&y, &y);
        assert_eq!((s.rmse, s.mae, s.r2), (0.0, 0.0, 1.0));
    }
}
