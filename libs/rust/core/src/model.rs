//! Tabular input frames and the loaded predictor behind a model handle.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{LifecycleError, Result};

pub type Row = Map<String, Value>;

/// Loaded in-memory predictor shared by every request in the process.
pub type ModelHandle = Arc<dyn Predictor>;

pub trait Predictor: Send + Sync {
    /// One prediction per frame row, in row order.
    fn predict(&self, frame: &Frame) -> Result<Vec<f64>>;
}

/// Column-named numeric table. Columns keep first-seen order across rows; absent keys are empty cells.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frame {
    columns: Vec<String>,
    rows: Vec<Vec<Option<f64>>>,
}

impl Frame {
    pub fn from_rows(rows: &[Row]) -> Result<Self> {
        let mut columns: Vec<String> = Vec::new();
        for row in rows {
            for key in row.keys() {
                if !columns.iter().any(|c| c == key) { columns.push(key.clone()); }
            }
        }
        let mut cells = Vec::with_capacity(rows.len());
        for (i, row) in rows.iter().enumerate() {
            let mut out = Vec::with_capacity(columns.len());
            for col in &columns {
                let cell = match row.get(col) {
                    None | Some(Value::Null) => None,
                    Some(Value::Number(n)) => n.as_f64(),
                    Some(other) => {
                        return Err(LifecycleError::PredictionFailure(format!(
                            "row {i}, column '{col}': expected a number, got {}", type_name(other)
                        )))
                    }
                };
                out.push(cell);
            }
            cells.push(out);
        }
        Ok(Self { columns, rows: cells })
    }

    pub fn columns(&self) -> &[String] { &self.columns }
    pub fn len(&self) -> usize { self.rows.len() }
    pub fn is_empty(&self) -> bool { self.rows.is_empty() }

    pub fn column_index(&self, name: &str) -> Option<usize> { self.columns.iter().position(|c| c == name) }

    pub fn cell(&self, row: usize, col: usize) -> Option<f64> { self.rows.get(row).and_then(|r| r.get(col).copied().flatten()) }

    /// Header line followed by one line per row, for console output.
    pub fn to_table_string(&self) -> String {
        let mut out = self.columns.join("  ");
        for row in &self.rows {
            out.push('\n');
            let line: Vec<String> = self.columns.iter().zip(row).map(|(c, v)| {
                let v = v.map(|x| x.to_string()).unwrap_or_else(|| "NaN".into());
                format!("{v:>width$}", width = c.len())
            }).collect();
            out.push_str(&line.join("  "));
        }
        out
    }
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Serialized regression artifact: `quality = intercept + Σ coefficient·feature`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LinearModel {
    pub feature_names: Vec<String>,
    pub coefficients: Vec<f64>,
    pub intercept: f64,
    #[serde(default)]
    pub alpha: Option<f64>,
    #[serde(default)]
    pub l1_ratio: Option<f64>,
}

impl LinearModel {
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let model: Self = serde_json::from_slice(bytes).map_err(|e| LifecycleError::LoadFailure(e.to_string()))?;
        if model.feature_names.len() != model.coefficients.len() {
            return Err(LifecycleError::LoadFailure(format!(
                "artifact has {} features but {} coefficients", model.feature_names.len(), model.coefficients.len()
            )));
        }
        Ok(model)
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(self).map_err(|e| LifecycleError::Training(e.to_string()))
    }
}

impl Predictor for LinearModel {
    fn predict(&self, frame: &Frame) -> Result<Vec<f64>> {
        let missing: Vec<&str> = self.feature_names.iter().filter(|f| frame.column_index(f).is_none()).map(String::as_str).collect();
        if !missing.is_empty() {
            return Err(LifecycleError::PredictionFailure(format!("Model is missing inputs {missing:?}.")));
        }
        let known: HashSet<&str> = self.feature_names.iter().map(String::as_str).collect();
        let extra: Vec<&str> = frame.columns().iter().map(String::as_str).filter(|c| !known.contains(c)).collect();
        if !extra.is_empty() {
            return Err(LifecycleError::PredictionFailure(format!("Model received unexpected inputs {extra:?}.")));
        }
        let idx: Vec<usize> = self.feature_names.iter().filter_map(|f| frame.column_index(f)).collect();
        (0..frame.len()).map(|row| {
            let mut acc = self.intercept;
            for ((name, coef), col) in self.feature_names.iter().zip(&self.coefficients).zip(&idx) {
                let x = frame.cell(row, *col).ok_or_else(|| {
                    LifecycleError::PredictionFailure(format!("row {row} has no value for input '{name}'"))
                })?;
                acc += coef * x;
            }
            Ok(acc)
        }).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(v: Value) -> Row { v.as_object().cloned().unwrap() }

    fn model() -> LinearModel {
        LinearModel { feature_names: vec!["a".into(), "b".into()], coefficients: vec![2.0, -1.0], intercept: 0.5, alpha: None, l1_ratio: None }
    }

    #[test]
    fn predicts_in_row_order() {
        let frame = Frame::from_rows(&[row(json!({"a": 1.0, "b": 1.0})), row(json!({"b": 0.0, "a": 3.0}))]).unwrap();
        assert_eq!(model().predict(&frame).unwrap(), vec![1.5, 6.5]);
    }

    #[test]
    fn missing_and_extra_columns_fail() {
        let frame = Frame::from_rows(&[row(json!({"a": 1.0}))]).unwrap();
        let err = model().predict(&frame).unwrap_err().to_string();
        assert!(err.contains("missing inputs") && err.contains("\"b\""), "{err}");

        let frame = Frame::from_rows(&[row(json!({"a": 1.0, "b": 2.0, "c": 3.0}))]).unwrap();
        assert!(model().predict(&frame).unwrap_err().to_string().contains("unexpected inputs"));
    }

    #[test]
    fn ragged_rows_leave_empty_cells() {
        let frame = Frame::from_rows(&[row(json!({"a": 1.0, "b": 1.0})), row(json!({"a": 2.0}))]).unwrap();
        assert_eq!(frame.cell(1, 1), None);
        let err = model().predict(&frame).unwrap_err().to_string();
        assert_eq!(err, "row 1 has no value for input 'b'");
    }

    #[test]
    fn non_numeric_cell_is_construction_failure() {
        let err = Frame::from_rows(&[row(json!({"a": "high"}))]).unwrap_err();
        assert!(matches!(err, LifecycleError::PredictionFailure(m) if m.contains("got string")));
    }

    #[test]
    fn corrupt_artifact_is_load_failure() {
        assert!(matches!(LinearModel::from_json(b"not json"), Err(LifecycleError::LoadFailure(_))));
        let lopsided = br#"{"feature_names":["a"],"coefficients":[],"intercept":0.0}"#;
        assert!(matches!(LinearModel::from_json(lopsided), Err(LifecycleError::LoadFailure(_))));
        let bytes = model().to_json().unwrap();
        assert_eq!(LinearModel::from_json(&bytes).unwrap(), model());
    }
}
