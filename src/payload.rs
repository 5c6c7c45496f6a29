//! Request payloads for the forecasting service.
//!
//! Builders here never perform I/O or validation; they only coerce already
//! checked parameters into the nested shape each operation expects.

use serde::{Deserialize, Serialize};

use crate::table::Frame;

pub const DEFAULT_MODEL: &str = "inait-basic";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Forecast,
    Backtest,
    Explain,
    Image,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Forecast => "forecast",
            Operation::Backtest => "backtest",
            Operation::Explain => "explain",
            Operation::Image => "image",
        }
    }

    /// Submission endpoint, relative to the base URL.
    pub fn endpoint(&self) -> &'static str {
        match self {
            Operation::Forecast => "/prediction",
            Operation::Backtest => "/backtest",
            Operation::Explain => "/explanation",
            Operation::Image => "/image",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobRequest {
    pub data: Option<Frame>,
    pub config: JobConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub background: Option<bool>,
}

impl JobRequest {
    pub fn operation(&self) -> Operation {
        self.config.operation
    }

    pub fn to_value(&self) -> serde_json::Value {
        // Every field is plain data; serialization cannot fail.
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobConfig {
    pub operation: Operation,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub operation_arguments: OperationArguments,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum OperationArguments {
    Forecast(ForecastArguments),
    Backtest(BacktestArguments),
    Explain(ExplainArguments),
    Image(ImageArguments),
}

#[derive(Debug, Clone, Serialize)]
pub struct ForecastArguments {
    pub forecasting_horizon: usize,
    pub observation_length: usize,
    pub targets: String,
    pub dataset: Option<String>,
    pub features: Option<String>,
    pub prediction_interval_levels: Option<String>,
    pub forecaster: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BacktestArguments {
    pub forecasting_horizon: usize,
    pub dataset: Option<String>,
    pub observation_length: usize,
    pub targets: String,
    pub features: Option<String>,
    pub forecaster: String,
    pub outer_cv: OuterCv,
    pub tune: bool,
    pub max_candidates: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OuterCv {
    pub n_splits: usize,
    pub test_size: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExplainArguments {
    pub cutoff_days: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImageArguments {
    pub plot_type: PlotType,
    pub cutoff_date: Option<String>,
    pub prediction_for: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum PlotType {
    Prediction,
    Explanation,
}

#[derive(Debug, Clone)]
pub struct ForecastParams {
    pub target_columns: Vec<String>,
    pub forecasting_horizon: usize,
    pub observation_length: usize,
    pub feature_columns: Vec<String>,
    pub model: String,
    pub prediction_interval_levels: Vec<u32>,
    pub background: bool,
    pub positive_predictions_only: bool,
}

impl ForecastParams {
    pub fn new(
        target_columns: Vec<String>,
        forecasting_horizon: usize,
        observation_length: usize,
    ) -> Self {
        Self {
            target_columns,
            forecasting_horizon,
            observation_length,
            feature_columns: Vec::new(),
            model: DEFAULT_MODEL.to_string(),
            prediction_interval_levels: Vec::new(),
            background: false,
            positive_predictions_only: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BacktestParams {
    pub target_columns: Vec<String>,
    pub forecasting_horizon: usize,
    pub observation_length: usize,
    /// Held-out samples across all folds; split by [`heuristic_outer_cv`].
    pub full_test_size: usize,
    pub feature_columns: Vec<String>,
    pub model: String,
    pub background: bool,
    pub session_id: Option<String>,
    /// Dataset path on the service side, used when no table is uploaded.
    pub dataset: Option<String>,
    pub tune: bool,
    pub max_candidates: i64,
}

impl BacktestParams {
    pub fn new(
        target_columns: Vec<String>,
        forecasting_horizon: usize,
        observation_length: usize,
        full_test_size: usize,
    ) -> Self {
        Self {
            target_columns,
            forecasting_horizon,
            observation_length,
            full_test_size,
            feature_columns: Vec::new(),
            model: DEFAULT_MODEL.to_string(),
            background: true,
            session_id: None,
            dataset: None,
            tune: true,
            max_candidates: -1,
        }
    }
}

/// Comma-joins names; an empty list is sent as null.
pub fn join_list<S: AsRef<str>>(items: &[S]) -> Option<String> {
    if items.is_empty() {
        return None;
    }
    Some(
        items
            .iter()
            .map(|item| item.as_ref().trim())
            .collect::<Vec<_>>()
            .join(","),
    )
}

fn join_levels(levels: &[u32]) -> Option<String> {
    let rendered: Vec<String> = levels.iter().map(u32::to_string).collect();
    join_list(&rendered)
}

/// Splits a held-out budget into the `(n_splits, test_size)` pair the service
/// requires: three folds once there are at least 100 samples, else one.
pub fn heuristic_outer_cv(full_test_size: usize) -> OuterCv {
    if full_test_size >= 100 {
        let n_splits = 3;
        OuterCv {
            n_splits,
            test_size: full_test_size / n_splits,
        }
    } else {
        OuterCv {
            n_splits: 1,
            test_size: full_test_size,
        }
    }
}

pub fn forecast_request(data: &Frame, params: &ForecastParams) -> JobRequest {
    JobRequest {
        data: Some(data.clone()),
        config: JobConfig {
            operation: Operation::Forecast,
            session_id: None,
            operation_arguments: OperationArguments::Forecast(ForecastArguments {
                forecasting_horizon: params.forecasting_horizon,
                observation_length: params.observation_length,
                targets: join_list(&params.target_columns).unwrap_or_default(),
                dataset: None,
                features: join_list(&params.feature_columns),
                prediction_interval_levels: join_levels(&params.prediction_interval_levels),
                forecaster: params.model.clone(),
            }),
        },
        background: Some(params.background),
    }
}

pub fn backtest_request(data: Option<&Frame>, params: &BacktestParams) -> JobRequest {
    JobRequest {
        data: data.cloned(),
        config: JobConfig {
            operation: Operation::Backtest,
            session_id: params.session_id.clone(),
            operation_arguments: OperationArguments::Backtest(BacktestArguments {
                forecasting_horizon: params.forecasting_horizon,
                dataset: params.dataset.clone(),
                observation_length: params.observation_length,
                targets: join_list(&params.target_columns).unwrap_or_default(),
                features: join_list(&params.feature_columns),
                forecaster: params.model.clone(),
                outer_cv: heuristic_outer_cv(params.full_test_size),
                tune: params.tune,
                max_candidates: params.max_candidates,
            }),
        },
        background: Some(params.background),
    }
}

pub fn explain_request<S: AsRef<str>>(session_id: &str, cutoff_days: &[S]) -> JobRequest {
    JobRequest {
        data: None,
        config: JobConfig {
            operation: Operation::Explain,
            session_id: Some(session_id.to_string()),
            operation_arguments: OperationArguments::Explain(ExplainArguments {
                cutoff_days: join_list(cutoff_days),
            }),
        },
        background: None,
    }
}

pub fn image_request(
    session_id: &str,
    plot_type: PlotType,
    cutoff_date: Option<&str>,
    prediction_for: Option<&str>,
) -> JobRequest {
    JobRequest {
        data: None,
        config: JobConfig {
            operation: Operation::Image,
            session_id: Some(session_id.to_string()),
            operation_arguments: OperationArguments::Image(ImageArguments {
                plot_type,
                cutoff_date: cutoff_date.map(str::to_string),
                prediction_for: prediction_for.map(str::to_string),
            }),
        },
        background: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_frame() -> Frame {
        Frame::new(
            vec![
                json!("2024-01-01"),
                json!("2024-01-02"),
                json!("2024-01-03"),
            ],
            vec!["sales".into(), "temp".into()],
            vec![
                vec![json!(10), json!(1.5)],
                vec![json!(11), json!(2.5)],
                vec![json!(12), json!(3.5)],
            ],
        )
        .unwrap()
    }

    fn cv(n_splits: usize, test_size: usize) -> OuterCv {
        OuterCv {
            n_splits,
            test_size,
        }
    }

    #[test]
    fn heuristic_outer_cv_boundaries() {
        assert_eq!(heuristic_outer_cv(99), cv(1, 99));
        assert_eq!(heuristic_outer_cv(100), cv(3, 33));
        assert_eq!(heuristic_outer_cv(300), cv(3, 100));
        assert_eq!(heuristic_outer_cv(0), cv(1, 0));
    }

    #[test]
    fn forecast_payload_shape() {
        let frame = sample_frame();
        let mut params = ForecastParams::new(vec!["sales".into()], 7, 3);
        params.feature_columns = vec!["temp".into()];
        params.prediction_interval_levels = vec![10, 90];

        let value = forecast_request(&frame, &params).to_value();
        assert_eq!(value["data"], serde_json::to_value(&frame).unwrap());
        assert_eq!(
            value["config"],
            json!({
                "operation": "forecast",
                "operation_arguments": {
                    "forecasting_horizon": 7,
                    "observation_length": 3,
                    "targets": "sales",
                    "dataset": null,
                    "features": "temp",
                    "prediction_interval_levels": "10,90",
                    "forecaster": "inait-basic",
                },
            })
        );
        assert_eq!(value["background"], json!(false));
    }

    #[test]
    fn forecast_payload_preserves_horizon_and_observation_length() {
        let frame = sample_frame();
        let targets: Vec<String> = vec!["sales".into(), "temp".into()];
        for (horizon, observation) in [(1, 1), (5, 2), (30, 3)] {
            let params = ForecastParams::new(targets.clone(), horizon, observation);
            let value = forecast_request(&frame, &params).to_value();
            let args = &value["config"]["operation_arguments"];
            assert_eq!(args["forecasting_horizon"], json!(horizon));
            assert_eq!(args["observation_length"], json!(observation));
            assert_eq!(args["targets"], json!("sales,temp"));
            assert_eq!(args["features"], serde_json::Value::Null);
        }
    }

    #[test]
    fn backtest_payload_carries_outer_cv_and_tuning() {
        let mut params = BacktestParams::new(vec!["AAPL".into(), "MSFT".into()], 10, 20, 150);
        params.session_id = Some("prev-session".into());
        params.dataset = Some("datasets/sp100.csv".into());
        let value = backtest_request(None, &params).to_value();

        assert_eq!(value["data"], serde_json::Value::Null);
        assert_eq!(value["background"], json!(true));
        assert_eq!(value["config"]["operation"], json!("backtest"));
        assert_eq!(value["config"]["session_id"], json!("prev-session"));
        let args = &value["config"]["operation_arguments"];
        assert_eq!(args["outer_cv"], json!({"n_splits": 3, "test_size": 50}));
        assert_eq!(args["targets"], json!("AAPL,MSFT"));
        assert_eq!(args["dataset"], json!("datasets/sp100.csv"));
        assert_eq!(args["tune"], json!(true));
        assert_eq!(args["max_candidates"], json!(-1));
    }

    #[test]
    fn explain_and_image_payloads_carry_no_data() {
        let explain = explain_request("s-1", &["2024-01-02", "2024-01-03"])
            .to_value();
        assert_eq!(
            explain,
            json!({
                "data": null,
                "config": {
                    "operation": "explain",
                    "session_id": "s-1",
                    "operation_arguments": {"cutoff_days": "2024-01-02,2024-01-03"},
                },
            })
        );

        let image = image_request("s-1", PlotType::Explanation, Some("2024-01-02"), None)
            .to_value();
        assert_eq!(
            image["config"]["operation_arguments"],
            json!({
                "plot_type": "explanation",
                "cutoff_date": "2024-01-02",
                "prediction_for": null,
            })
        );
        assert_eq!(Operation::Image.endpoint(), "/image");
    }
}
