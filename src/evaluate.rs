use std::fmt;
use std::str::FromStr;

use crate::error::{ClientError, ClientResult};
use crate::reshape::PREDICTED_SUFFIX;
use crate::table::Frame;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Metric {
    Mae,
    Mse,
}

impl Metric {
    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Mae => "mae",
            Metric::Mse => "mse",
        }
    }

    fn error(&self, actual: f64, predicted: f64) -> f64 {
        let diff = actual - predicted;
        match self {
            Metric::Mae => diff.abs(),
            Metric::Mse => diff * diff,
        }
    }
}

impl FromStr for Metric {
    type Err = ClientError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "mae" => Ok(Metric::Mae),
            "mse" => Ok(Metric::Mse),
            other => Err(ClientError::validation(format!(
                "unsupported metric '{other}'; use 'mae' or 'mse'"
            ))),
        }
    }
}

/// Pairs of row positions (prediction, truth) that share an index label.
fn common_rows(prediction: &Frame, truth: &Frame) -> Vec<(usize, usize)> {
    let truth_rows = truth.index_positions();
    prediction
        .index_keys()
        .into_iter()
        .enumerate()
        .filter_map(|(pos, key)| truth_rows.get(&key).map(|&truth_pos| (pos, truth_pos)))
        .collect()
}

/// Mean error of each prediction frame against the ground truth, averaged
/// over frames. Only `<column>_predicted` point columns are scored, against
/// `<column>` in `truth`, on the rows both frames share.
pub fn score_test(predictions: &[Frame], truth: &Frame, metric: Metric) -> ClientResult<f64> {
    if predictions.is_empty() {
        return Err(ClientError::validation("no predictions to score"));
    }

    let mut frame_scores = Vec::with_capacity(predictions.len());
    for prediction in predictions {
        let rows = common_rows(prediction, truth);
        let mut total = 0.0;
        let mut cells = 0usize;
        for column in &prediction.columns {
            let Some(target) = column.strip_suffix(PREDICTED_SUFFIX) else {
                continue;
            };
            let predicted = prediction.column_f64(column).unwrap_or_default();
            let actual = truth.column_f64(target).ok_or_else(|| {
                ClientError::validation(format!("ground truth has no column '{target}'"))
            })?;
            for &(pred_pos, truth_pos) in &rows {
                if let (Some(p), Some(a)) = (predicted[pred_pos], actual[truth_pos]) {
                    total += metric.error(a, p);
                    cells += 1;
                }
            }
        }
        if cells == 0 {
            return Err(ClientError::validation(
                "prediction shares no scorable values with the ground truth",
            ));
        }
        frame_scores.push(total / cells as f64);
    }
    Ok(frame_scores.iter().sum::<f64>() / frame_scores.len() as f64)
}

#[derive(Debug, Clone, PartialEq)]
pub struct CoverageReport {
    pub within: usize,
    pub total: usize,
    pub level: u32,
}

impl CoverageReport {
    pub fn percentage(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            100.0 * self.within as f64 / self.total as f64
        }
    }
}

impl fmt::Display for CoverageReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Coverage result: {} out of {} ({:.1}%) actual values were inside the {}% \
             prediction interval.",
            self.within,
            self.total,
            self.percentage(),
            self.level
        )
    }
}

/// Counts actual values falling inside `[<col>_predicted-lo-L, <col>_predicted-hi-L]`.
///
/// Every shared row of every covered column counts towards the total; rows
/// with a missing actual or bound count as outside.
pub fn check_coverage(historical: &Frame, predictions: &Frame, level: u32) -> CoverageReport {
    let rows: Vec<(usize, usize)> = common_rows(predictions, historical);
    let mut report = CoverageReport {
        within: 0,
        total: 0,
        level,
    };

    for column in &historical.columns {
        let lo_name = format!("{column}{PREDICTED_SUFFIX}-lo-{level}");
        let hi_name = format!("{column}{PREDICTED_SUFFIX}-hi-{level}");
        let lo = predictions.column_f64(&lo_name);
        let hi = predictions.column_f64(&hi_name);
        let (Some(lo), Some(hi)) = (lo, hi) else {
            continue;
        };
        let actual = historical.column_f64(column).unwrap_or_default();
        for &(pred_pos, hist_pos) in &rows {
            report.total += 1;
            let bounds = (actual[hist_pos], lo[pred_pos], hi[pred_pos]);
            if let (Some(a), Some(low), Some(high)) = bounds {
                if low <= a && a <= high {
                    report.within += 1;
                }
            }
        }
    }
    tracing::debug!(
        within = report.within,
        total = report.total,
        level,
        "coverage checked"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn truth() -> Frame {
        Frame::new(
            vec![
                json!("2024-01-01"),
                json!("2024-01-02"),
                json!("2024-01-03"),
            ],
            vec!["y".into()],
            vec![vec![json!(1.0)], vec![json!(2.0)], vec![json!(4.0)]],
        )
        .unwrap()
    }

    fn one_row(date: &str, column: &str, value: f64) -> Frame {
        Frame::new(
            vec![json!(date)],
            vec![column.to_string()],
            vec![vec![json!(value)]],
        )
        .unwrap()
    }

    fn interval(lo: f64, hi: f64) -> Frame {
        Frame::new(
            vec![json!("2024-01-01T00:00:00")],
            vec![
                "y_predicted".into(),
                "y_predicted-lo-80".into(),
                "y_predicted-hi-80".into(),
            ],
            vec![vec![json!(5.0), json!(lo), json!(hi)]],
        )
        .unwrap()
    }

    #[test]
    fn scores_only_shared_rows() {
        let prediction = Frame::new(
            vec![
                json!("2024-01-02"),
                json!("2024-01-03"),
                json!("2024-01-04"),
            ],
            vec!["y_predicted".into()],
            vec![vec![json!(3.0)], vec![json!(2.0)], vec![json!(100.0)]],
        )
        .unwrap();

        let mae = score_test(&[prediction.clone()], &truth(), Metric::Mae)
            .unwrap();
        assert!((mae - 1.5).abs() < 1e-12);
        let mse = score_test(&[prediction], &truth(), Metric::Mse).unwrap();
        assert!((mse - 2.5).abs() < 1e-12);
    }

    #[test]
    fn averages_over_frames() {
        let first = one_row("2024-01-01", "y_predicted", 2.0);
        let second = one_row("2024-01-02", "y_predicted", 5.0);
        let score = score_test(&[first, second], &truth(), Metric::Mae).unwrap();
        assert!((score - 2.0).abs() < 1e-12);
    }

    #[test]
    fn unknown_metric_is_rejected() {
        assert!(matches!("rmse".parse::<Metric>(), Err(ClientError::Validation(_))));
        assert_eq!("MAE".parse::<Metric>().unwrap(), Metric::Mae);
    }

    #[test]
    fn scoring_requires_predictions_and_truth_columns() {
        assert!(score_test(&[], &truth(), Metric::Mae).is_err());
        let stray = one_row("2024-01-01", "z_predicted", 1.0);
        assert!(matches!(
            score_test(&[stray], &truth(), Metric::Mae),
            Err(ClientError::Validation(_))
        ));
    }

    #[test]
    fn value_inside_interval_is_covered() {
        let single = one_row("2024-01-01", "y", 5.0);
        let report = check_coverage(&single, &interval(3.0, 7.0), 80);
        assert_eq!(
            report.to_string(),
            "Coverage result: 1 out of 1 (100.0%) actual values were inside the 80% \
             prediction interval."
        );
    }

    #[test]
    fn value_outside_interval_is_not_covered() {
        let single = one_row("2024-01-01", "y", 5.0);
        let report = check_coverage(&single, &interval(6.0, 7.0), 80);
        assert_eq!((report.within, report.total), (0, 1));
        assert!(report.to_string().contains("0 out of 1 (0.0%)"));
    }

    #[test]
    fn no_shared_rows_reports_zero_percent() {
        let report = check_coverage(&truth().slice_rows(1, 3), &interval(0.0, 10.0), 80);
        assert_eq!(report.total, 0);
        assert_eq!(report.percentage(), 0.0);
    }
}
