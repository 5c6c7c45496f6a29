//! Split-oriented tables.
//!
//! The service speaks the "split" orientation on the wire: parallel arrays of
//! index labels, column names and row values. [`Frame`] keeps exactly that
//! shape so request payloads serialize without conversion and responses
//! deserialize straight into it.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

use crate::error::{ClientError, ClientResult};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    #[serde(default)]
    pub index: Vec<Value>,
    pub columns: Vec<String>,
    #[serde(default)]
    pub data: Vec<Vec<Value>>,
}

impl Frame {
    pub fn new(
        index: Vec<Value>,
        columns: Vec<String>,
        data: Vec<Vec<Value>>,
    ) -> ClientResult<Self> {
        let frame = Self {
            index,
            columns,
            data,
        };
        frame.check_shape()?;
        Ok(frame)
    }

    /// Builds a frame from a split-oriented JSON object (`{index, columns, data}`).
    /// A missing index becomes a positional one, matching how the service
    /// omits it for range-indexed tables.
    pub fn from_split_value(value: &Value) -> ClientResult<Self> {
        let mut frame: Frame = serde_json::from_value(value.clone())
            .map_err(|err| ClientError::malformed(format!("not a split-oriented table: {err}")))?;
        if frame.index.is_empty() && !frame.data.is_empty() {
            frame.index = positional_index(frame.data.len());
        }
        frame.check_shape()?;
        Ok(frame)
    }

    pub fn to_split_value(&self) -> Value {
        serde_json::json!({
            "index": self.index,
            "columns": self.columns,
            "data": self.data,
        })
    }

    fn check_shape(&self) -> ClientResult<()> {
        if self.index.len() != self.data.len() {
            return Err(ClientError::malformed(format!(
                "table has {} index labels but {} rows",
                self.index.len(),
                self.data.len()
            )));
        }
        for (pos, row) in self.data.iter().enumerate() {
            if row.len() != self.columns.len() {
                return Err(ClientError::malformed(format!(
                    "row {pos} has {} values for {} columns",
                    row.len(),
                    self.columns.len()
                )));
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn column_position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_position(name).is_some()
    }

    pub fn column_values(&self, name: &str) -> Option<Vec<&Value>> {
        let pos = self.column_position(name)?;
        Some(self.data.iter().map(|row| &row[pos]).collect())
    }

    pub fn column_f64(&self, name: &str) -> Option<Vec<Option<f64>>> {
        let pos = self.column_position(name)?;
        let values = self.data.iter().map(|row| value_as_f64(&row[pos]));
        Some(values.collect())
    }

    pub fn index_keys(&self) -> Vec<IndexKey> {
        self.index.iter().map(IndexKey::from_value).collect()
    }

    /// Row position per index key; later duplicates win.
    pub fn index_positions(&self) -> BTreeMap<IndexKey, usize> {
        self.index_keys()
            .into_iter()
            .enumerate()
            .map(|(pos, key)| (key, pos))
            .collect()
    }

    pub fn drop_columns(&self, names: &[&str]) -> Frame {
        let keep: Vec<usize> = self
            .columns
            .iter()
            .enumerate()
            .filter(|(_, column)| !names.contains(&column.as_str()))
            .map(|(pos, _)| pos)
            .collect();
        self.take_columns(&keep)
    }

    pub fn select_columns<S: AsRef<str>>(&self, names: &[S]) -> ClientResult<Frame> {
        let mut keep = Vec::with_capacity(names.len());
        for name in names {
            let name = name.as_ref();
            let pos = self
                .column_position(name)
                .ok_or_else(|| ClientError::validation(format!("column '{name}' not found")))?;
            keep.push(pos);
        }
        Ok(self.take_columns(&keep))
    }

    fn take_columns(&self, positions: &[usize]) -> Frame {
        Frame {
            index: self.index.clone(),
            columns: positions
                .iter()
                .map(|&pos| self.columns[pos].clone())
                .collect(),
            data: self
                .data
                .iter()
                .map(|row| positions.iter().map(|&pos| row[pos].clone()).collect())
                .collect(),
        }
    }

    pub fn rename_columns(mut self, rename: impl Fn(&str) -> String) -> Frame {
        self.columns = self.columns.iter().map(|column| rename(column)).collect();
        self
    }

    pub fn slice_rows(&self, start: usize, end: usize) -> Frame {
        let end = end.min(self.len());
        let start = start.min(end);
        Frame {
            index: self.index[start..end].to_vec(),
            columns: self.columns.clone(),
            data: self.data[start..end].to_vec(),
        }
    }

    pub fn head(&self, rows: usize) -> Frame {
        self.slice_rows(0, rows)
    }

    pub fn tail(&self, rows: usize) -> Frame {
        self.slice_rows(self.len().saturating_sub(rows), self.len())
    }

    /// Clamps every numeric cell to be at least `floor`.
    pub fn clip_lower(mut self, floor: f64) -> Frame {
        for row in &mut self.data {
            for cell in row.iter_mut() {
                if let Some(value) = cell.as_f64() {
                    if value < floor {
                        *cell = number_value(floor);
                    }
                }
            }
        }
        self
    }

    pub fn write_csv<W: Write>(&self, writer: W) -> ClientResult<()> {
        let mut csv_writer = csv::Writer::from_writer(writer);
        let mut header = vec![String::new()];
        header.extend(self.columns.iter().cloned());
        csv_writer.write_record(&header)?;
        for (label, row) in self.index.iter().zip(&self.data) {
            let mut record = vec![cell_text(label)];
            record.extend(row.iter().map(cell_text));
            csv_writer.write_record(&record)?;
        }
        csv_writer.flush()?;
        Ok(())
    }

    pub fn write_csv_path(&self, path: &Path) -> ClientResult<()> {
        let file = std::fs::File::create(path)?;
        self.write_csv(file)
    }
}

pub fn positional_index(rows: usize) -> Vec<Value> {
    (0..rows).map(|pos| Value::from(pos as u64)).collect()
}

pub fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// JSON number for finite values, null otherwise (NaN has no JSON form).
pub fn number_value(value: f64) -> Value {
    Number::from_f64(value)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

pub fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn parse_cell(raw: &str) -> Value {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Value::Null;
    }
    if let Ok(int) = trimmed.parse::<i64>() {
        return Value::from(int);
    }
    if let Ok(float) = trimmed.parse::<f64>() {
        if float.is_finite() {
            return number_value(float);
        }
        return Value::Null;
    }
    Value::String(trimmed.to_string())
}

/// Loads a table from `.csv` or split-oriented `.json`.
///
/// With `index_column` the named column becomes the index; otherwise rows are
/// labelled `0..n`.
pub fn load_frame(path: &Path, index_column: Option<&str>) -> ClientResult<Frame> {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_default();
    let frame = match extension.as_str() {
        "csv" => read_csv(path)?,
        "json" => {
            let contents = std::fs::read_to_string(path)?;
            let value: Value = serde_json::from_str(&contents)?;
            Frame::from_split_value(&value)?
        }
        _ => return Err(ClientError::UnsupportedFormat(path.display().to_string())),
    };
    tracing::debug!(
        path = %path.display(),
        rows = frame.len(),
        columns = frame.width(),
        "loaded table"
    );
    match index_column {
        Some(column) => set_index(frame, column),
        None => Ok(frame),
    }
}

fn read_csv(path: &Path) -> ClientResult<Frame> {
    let mut reader = csv::Reader::from_path(path)?;
    let columns: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    let mut data = Vec::new();
    for record in reader.records() {
        let record = record?;
        data.push(record.iter().map(parse_cell).collect::<Vec<_>>());
    }
    let index = positional_index(data.len());
    Frame::new(index, columns, data)
}

pub fn set_index(frame: Frame, column: &str) -> ClientResult<Frame> {
    let pos = frame
        .column_position(column)
        .ok_or_else(|| ClientError::validation(format!("index column '{column}' not found")))?;
    let index = frame.data.iter().map(|row| row[pos].clone()).collect();
    let rest = frame.drop_columns(&[column]);
    Ok(Frame {
        index,
        columns: rest.columns,
        data: rest.data,
    })
}

/// Orderable form of an index label.
///
/// Numbers sort numerically, recognisable timestamps chronologically, anything
/// else as text. Across kinds: numbers < timestamps < text.
#[derive(Debug, Clone)]
pub enum IndexKey {
    Number(f64),
    Time(NaiveDateTime),
    Text(String),
}

impl IndexKey {
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Number(number) => IndexKey::Number(number.as_f64().unwrap_or(f64::NAN)),
            Value::String(text) => match parse_timestamp(text) {
                Some(ts) => IndexKey::Time(ts),
                None => IndexKey::Text(text.clone()),
            },
            other => IndexKey::Text(cell_text(other)),
        }
    }

    /// Position on a continuous axis, when the label has one.
    pub fn axis_value(&self) -> Option<f64> {
        match self {
            IndexKey::Number(value) => Some(*value),
            IndexKey::Time(ts) => Some(ts.and_utc().timestamp() as f64),
            IndexKey::Text(_) => None,
        }
    }

    pub fn label(&self) -> String {
        match self {
            IndexKey::Number(value) if value.fract() == 0.0 => format!("{}", *value as i64),
            IndexKey::Number(value) => value.to_string(),
            IndexKey::Time(ts) if ts.num_seconds_from_midnight() == 0 => {
                ts.date().format("%Y-%m-%d").to_string()
            }
            IndexKey::Time(ts) => ts.format("%Y-%m-%d %H:%M").to_string(),
            IndexKey::Text(text) => text.clone(),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            IndexKey::Number(_) => 0,
            IndexKey::Time(_) => 1,
            IndexKey::Text(_) => 2,
        }
    }
}

impl Ord for IndexKey {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (IndexKey::Number(a), IndexKey::Number(b)) => a.total_cmp(b),
            (IndexKey::Time(a), IndexKey::Time(b)) => a.cmp(b),
            (IndexKey::Text(a), IndexKey::Text(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for IndexKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for IndexKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for IndexKey {}

pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let trimmed = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(ts.naive_utc());
    }
    const FORMATS: [&str; 4] = [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M",
    ];
    for format in FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(ts);
        }
    }
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write as _;

    #[test]
    fn serializes_in_split_orientation() {
        let frame = Frame::new(
            vec![json!("2024-01-01"), json!("2024-01-02")],
            vec!["sales".into(), "price".into()],
            vec![vec![json!(10), json!(1.5)], vec![json!(12), Value::Null]],
        )
        .unwrap();
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(
            value,
            json!({
                "index": ["2024-01-01", "2024-01-02"],
                "columns": ["sales", "price"],
                "data": [[10, 1.5], [12, null]],
            })
        );
        let keys: Vec<&str> = value
            .as_object()
            .unwrap()
            .keys()
            .map(String::as_str)
            .collect();
        assert_eq!(keys, ["index", "columns", "data"]);
    }

    #[test]
    fn rejects_ragged_rows() {
        let err = Frame::from_split_value(&json!({
            "index": [0, 1],
            "columns": ["a", "b"],
            "data": [[1, 2], [3]],
        }))
        .unwrap_err();
        assert!(matches!(err, ClientError::MalformedResponse(_)));
    }

    #[test]
    fn missing_index_becomes_positional() {
        let frame = Frame::from_split_value(&json!({
            "columns": ["a"],
            "data": [[1], [2], [3]],
        }))
        .unwrap();
        assert_eq!(frame.index, vec![json!(0), json!(1), json!(2)]);
    }

    #[test]
    fn loads_csv_with_typed_cells_and_index_column() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("airline.csv");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "date,passengers,note").unwrap();
        writeln!(file, "1949-01-01,112,a").unwrap();
        writeln!(file, "1949-02-01,118.5,").unwrap();
        drop(file);

        let frame = load_frame(&path, Some("date")).unwrap();
        assert_eq!(frame.columns, vec!["passengers", "note"]);
        assert_eq!(
            frame.index,
            vec![json!("1949-01-01"), json!("1949-02-01")]
        );
        assert_eq!(frame.data[0], vec![json!(112), json!("a")]);
        assert_eq!(frame.data[1], vec![json!(118.5), Value::Null]);

        let positional = load_frame(&path, None).unwrap();
        assert_eq!(positional.index, vec![json!(0), json!(1)]);
        assert_eq!(positional.width(), 3);
    }

    #[test]
    fn unknown_extension_is_unsupported() {
        let path = Path::new("data/airline.parquet");
        let err = load_frame(path, None).unwrap_err();
        assert!(matches!(err, ClientError::UnsupportedFormat(_)));
    }

    #[test]
    fn index_keys_order_timestamps_chronologically() {
        let mut keys = vec![
            IndexKey::from_value(&json!("2024-01-10")),
            IndexKey::from_value(&json!("2024-01-09T12:00:00")),
            IndexKey::from_value(&json!("2023-12-31 23:00:00")),
        ];
        keys.sort();
        let labels: Vec<String> = keys.iter().map(IndexKey::label).collect();
        assert_eq!(
            labels,
            ["2023-12-31 23:00", "2024-01-09 12:00", "2024-01-10"]
        );
        assert_eq!(
            IndexKey::from_value(&json!("2024-01-10")),
            IndexKey::from_value(&json!("2024-01-10T00:00:00Z"))
        );
    }

    #[test]
    fn csv_output_puts_index_first() {
        let frame = Frame::new(
            vec![json!("2024-01-01")],
            vec!["A_predicted".into()],
            vec![vec![json!(1.25)]],
        )
        .unwrap();
        let mut out = Vec::new();
        frame.write_csv(&mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            ",A_predicted\n2024-01-01,1.25\n"
        );
    }

    #[test]
    fn clip_lower_only_touches_numbers() {
        let frame = Frame::new(
            vec![json!(0)],
            vec!["a".into(), "b".into(), "c".into()],
            vec![vec![json!(-2.0), json!("x"), json!(3)]],
        )
        .unwrap()
        .clip_lower(0.0);
        assert_eq!(frame.data[0], vec![json!(0.0), json!("x"), json!(3)]);
    }
}
