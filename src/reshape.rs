//! Turns service responses into wide, per-target tables.

use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

use crate::error::{ClientError, ClientResult};
use crate::table::{cell_text, Frame, IndexKey};

/// Model output columns in the long-format forecast all start with this.
pub const MODEL_OUTPUT_PREFIX: &str = "Inait";
pub const PREDICTED_SUFFIX: &str = "_predicted";

const TIMESTAMP_COLUMN: &str = "ds";
const TARGET_ID_COLUMN: &str = "unique_id";
const BOOKKEEPING_COLUMNS: [&str; 2] = ["cutoff", "outer_cv"];
const BACKTEST_TARGET_SUFFIX: &str = "__target";

#[derive(Debug, Clone)]
pub struct Prediction {
    pub prediction: Frame,
    pub session_id: Option<String>,
}

/// Reads `response.data` (the long-format forecast) and `response.session_id`.
/// Either may be absent; a missing table yields `Ok(None)` for the frame.
pub fn response_parts(response: &Value) -> ClientResult<(Option<Frame>, Option<String>)> {
    let inner = response
        .get("response")
        .ok_or_else(|| ClientError::malformed("body has no 'response' object"))?;
    let session_id = inner
        .get("session_id")
        .and_then(Value::as_str)
        .map(str::to_string);
    if session_id.is_none() {
        tracing::debug!("response carries no session_id");
    }
    let table = match inner.get("data") {
        None | Some(Value::Null) => {
            tracing::debug!("response carries no data table");
            None
        }
        Some(data) => Some(Frame::from_split_value(data)?),
    };
    Ok((table, session_id))
}

/// Pivots a long-format forecast (`ds`, `unique_id`, model columns) into a wide
/// table indexed by timestamp with `<target>_predicted` columns.
///
/// Columns are grouped by model output column in response order, then by
/// target id in sorted order. Missing `(timestamp, target)` pairs become null.
pub fn pivot_predictions<S: AsRef<str>>(long: &Frame, targets: &[S]) -> ClientResult<Frame> {
    let frame = long.drop_columns(&BOOKKEEPING_COLUMNS);
    let ts_pos = frame
        .column_position(TIMESTAMP_COLUMN)
        .ok_or_else(|| ClientError::malformed("forecast table has no 'ds' column"))?;
    let id_pos = frame
        .column_position(TARGET_ID_COLUMN)
        .ok_or_else(|| ClientError::malformed("forecast table has no 'unique_id' column"))?;
    let value_positions: Vec<usize> = frame
        .columns
        .iter()
        .enumerate()
        .filter(|(_, column)| column.starts_with(MODEL_OUTPUT_PREFIX))
        .map(|(pos, _)| pos)
        .collect();
    if value_positions.is_empty() {
        return Err(ClientError::malformed(format!(
            "forecast table has no '{MODEL_OUTPUT_PREFIX}*' columns: {:?}",
            frame.columns
        )));
    }

    let mut timestamps: BTreeMap<IndexKey, Value> = BTreeMap::new();
    let mut target_ids: BTreeSet<String> = BTreeSet::new();
    let mut cells: BTreeMap<(IndexKey, String), usize> = BTreeMap::new();
    for (row_pos, row) in frame.data.iter().enumerate() {
        let key = IndexKey::from_value(&row[ts_pos]);
        let target = cell_text(&row[id_pos]);
        timestamps.entry(key.clone()).or_insert_with(|| row[ts_pos].clone());
        target_ids.insert(target.clone());
        if cells.insert((key, target.clone()), row_pos).is_some() {
            return Err(ClientError::malformed(format!(
                "duplicate forecast row for target '{target}' at {}",
                cell_text(&row[ts_pos])
            )));
        }
    }

    for target in targets {
        if !target_ids.contains(target.as_ref()) {
            tracing::warn!(
                requested = target.as_ref(),
                "requested target missing from forecast"
            );
        }
    }

    let marker = format!("_{MODEL_OUTPUT_PREFIX}");
    let mut columns = Vec::with_capacity(value_positions.len() * target_ids.len());
    for &pos in &value_positions {
        for target in &target_ids {
            let name = format!("{target}_{}", frame.columns[pos]);
            columns.push(name.replace(&marker, PREDICTED_SUFFIX));
        }
    }

    let mut index = Vec::with_capacity(timestamps.len());
    let mut data = Vec::with_capacity(timestamps.len());
    for (key, raw) in timestamps {
        let mut row = Vec::with_capacity(columns.len());
        for &pos in &value_positions {
            for target in &target_ids {
                let cell = cells
                    .get(&(key.clone(), target.clone()))
                    .map(|&row_pos| frame.data[row_pos][pos].clone())
                    .unwrap_or(Value::Null);
                row.push(cell);
            }
        }
        index.push(raw);
        data.push(row);
    }
    Frame::new(index, columns, data)
}

/// Full forecast post-processing: pivot, then optionally clip at zero.
pub fn reshape_prediction<S: AsRef<str>>(
    response: &Value,
    targets: &[S],
    positive_only: bool,
) -> ClientResult<Prediction> {
    let (table, session_id) = response_parts(response)?;
    let long = table
        .ok_or_else(|| ClientError::malformed("forecast response carries no data table"))?;
    let mut prediction = pivot_predictions(&long, targets)?;
    if positive_only {
        prediction = prediction.clip_lower(0.0);
    }
    Ok(Prediction {
        prediction,
        session_id,
    })
}

#[derive(Debug, Clone)]
pub struct BacktestOutcome {
    /// One frame per forecast window, each `forecasting_horizon` rows long.
    pub folds: Vec<Frame>,
    /// `scores.test_error[0]` as reported; null when absent.
    pub score: Value,
}

/// Extracts predictions and score from a backtest result body.
pub fn backtest_from_result(
    result: &Value,
    forecasting_horizon: usize,
) -> ClientResult<BacktestOutcome> {
    let data = result
        .get("response")
        .and_then(|inner| inner.get("data"))
        .ok_or_else(|| ClientError::malformed("backtest result has no response.data"))?;
    let predictions = data
        .get("predictions")
        .and_then(|list| list.get(0))
        .ok_or_else(|| ClientError::malformed("backtest result has no predictions"))?;
    let table = Frame::from_split_value(predictions)?
        .drop_columns(&["outer_cv"])
        .rename_columns(backtest_column_name);

    let score = data
        .get("scores")
        .and_then(|scores| scores.get("test_error"))
        .and_then(|errors| errors.get(0))
        .cloned()
        .unwrap_or_else(|| {
            tracing::warn!("backtest result carries no test_error score");
            Value::Null
        });

    Ok(BacktestOutcome {
        folds: split_folds(&table, forecasting_horizon),
        score,
    })
}

fn backtest_column_name(column: &str) -> String {
    let base = column.strip_suffix(BACKTEST_TARGET_SUFFIX).unwrap_or(column);
    format!("{base}{PREDICTED_SUFFIX}")
}

/// Consecutive windows of `horizon` rows; a trailing partial window is dropped.
pub fn split_folds(table: &Frame, horizon: usize) -> Vec<Frame> {
    if horizon == 0 {
        return Vec::new();
    }
    (0..table.len() / horizon)
        .map(|fold| table.slice_rows(fold * horizon, (fold + 1) * horizon))
        .collect()
}
