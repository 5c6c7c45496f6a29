use base64::Engine as _;
use serde_json::Value;

use crate::config::{ClientConfig, Credentials};
use crate::error::{ClientError, ClientResult};
use crate::explain::{explanation_from_response, Explanation};
use crate::payload::{
    backtest_request, explain_request, forecast_request, image_request, BacktestParams,
    ForecastParams, JobRequest, PlotType,
};
use crate::poller::{result_path, status_path, FailureAction, JobOutcome, JobPoller, PollPolicy};
use crate::reshape::{backtest_from_result, reshape_prediction, BacktestOutcome, Prediction};
use crate::table::{cell_text, Frame};
use crate::transport::{HttpTransport, Transport};

pub const DEFAULT_TRAIN_FRACTION: f64 = 0.8;

/// How `predict_test` splits the table; at most one field may be set.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TestSplit {
    /// Fraction of rows used before the first rolling prediction.
    pub train_size: Option<f64>,
    /// Rows held out at the end of the table.
    pub test_size: Option<usize>,
}

impl TestSplit {
    /// Row count of the first training window.
    pub fn start_index(&self, rows: usize, horizon: usize) -> ClientResult<usize> {
        match (self.train_size, self.test_size) {
            (Some(_), Some(_)) => Err(ClientError::validation(
                "train_size and test_size are mutually exclusive; set only one",
            )),
            (None, Some(test_size)) => rows
                .checked_sub(test_size)
                .and_then(|rest| rest.checked_sub(horizon))
                .ok_or_else(|| {
                    ClientError::validation(format!(
                        "test_size {test_size} plus horizon {horizon} exceeds {rows} rows"
                    ))
                }),
            (train, None) => {
                let fraction = train.unwrap_or(DEFAULT_TRAIN_FRACTION);
                if !(0.0..=1.0).contains(&fraction) {
                    return Err(ClientError::validation(format!(
                        "train_size must be a fraction between 0 and 1, got {fraction}"
                    )));
                }
                Ok((rows as f64 * fraction).floor() as usize)
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PredictTestOutcome {
    pub predictions: Vec<Frame>,
    pub session_ids: Vec<Option<String>>,
}

pub struct ForecastClient<T: Transport = HttpTransport> {
    transport: T,
    poll: PollPolicy,
    on_failed: FailureAction,
}

impl ForecastClient<HttpTransport> {
    pub fn new(credentials: &Credentials, config: &ClientConfig) -> ClientResult<Self> {
        let transport = HttpTransport::new(credentials, config.http_timeout)?;
        tracing::debug!(base_url = transport.base_url(), "forecast client ready");
        Ok(Self::with_transport(transport, config.poll.clone()))
    }
}

impl<T: Transport> ForecastClient<T> {
    pub fn with_transport(transport: T, poll: PollPolicy) -> Self {
        Self {
            transport,
            poll,
            on_failed: FailureAction::default(),
        }
    }

    /// Policy applied when a polled job reports `failed`.
    pub fn on_job_failure(mut self, action: FailureAction) -> Self {
        self.on_failed = action;
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn submit(&self, request: &JobRequest) -> ClientResult<Value> {
        let operation = request.operation();
        tracing::info!(operation = operation.as_str(), "submitting job");
        self.transport.post_json(operation.endpoint(), &request.to_value())
    }

    /// Blocks until `session_id` completes and returns its result body.
    pub fn wait_for_result(&self, session_id: &str) -> ClientResult<JobOutcome> {
        JobPoller::new(&self.transport, &self.poll)
            .on_failed(self.on_failed)
            .run(session_id)
    }

    pub fn predict(&self, data: &Frame, params: &ForecastParams) -> ClientResult<Prediction> {
        validate_forecast(data, params)?;
        let submitted = self.submit(&forecast_request(data, params))?;

        if !params.background {
            return reshape_prediction(
                &submitted,
                &params.target_columns,
                params.positive_predictions_only,
            );
        }

        let session_id = session_id_of(&submitted)?;
        let outcome = self.wait_for_result(&session_id)?;
        let mut prediction = reshape_prediction(
            &outcome.result,
            &params.target_columns,
            params.positive_predictions_only,
        )?;
        prediction.session_id.get_or_insert(session_id);
        Ok(prediction)
    }

    /// Rolling one-step-ahead evaluation: predicts from every prefix of `data`
    /// that still leaves `forecasting_horizon` rows to compare against.
    pub fn predict_test(
        &self,
        data: &Frame,
        params: &ForecastParams,
        split: TestSplit,
    ) -> ClientResult<PredictTestOutcome> {
        let rows = data.len();
        let horizon = params.forecasting_horizon;
        let start = split.start_index(rows, horizon)?;
        let last = rows.saturating_sub(horizon);
        if start + 1 > last {
            return Err(ClientError::validation(format!(
                "no test windows: training ends at row {start}, last usable end is {last}"
            )));
        }

        let total = last - start;
        let mut outcome = PredictTestOutcome::default();
        for (step, end) in (start + 1..=last).enumerate() {
            tracing::info!(step = step + 1, total, rows = end, "rolling prediction");
            let prediction = self.predict(&data.head(end), params)?;
            outcome.predictions.push(prediction.prediction);
            outcome.session_ids.push(prediction.session_id);
        }
        Ok(outcome)
    }

    /// Submits a backtest and always waits for it; the service runs backtests
    /// as background jobs.
    pub fn backtest(
        &self,
        data: Option<&Frame>,
        params: &BacktestParams,
    ) -> ClientResult<BacktestOutcome> {
        if params.forecasting_horizon == 0 {
            return Err(ClientError::validation("forecasting_horizon must be positive"));
        }
        if data.is_none() && params.dataset.is_none() && params.session_id.is_none() {
            return Err(ClientError::validation(
                "backtest needs uploaded data, a server-side dataset path or a session id",
            ));
        }
        let submitted = self.submit(&backtest_request(data, params))?;
        let session_id = session_id_of(&submitted)?;
        let outcome = self.wait_for_result(&session_id)?;
        backtest_from_result(&outcome.result, params.forecasting_horizon)
    }

    pub fn explain<S: AsRef<str>>(
        &self,
        session_id: &str,
        cutoff_days: &[S],
    ) -> ClientResult<Value> {
        self.submit(&explain_request(session_id, cutoff_days))
    }

    /// Explains one forecast step and ranks its drivers.
    pub fn explain_drivers(
        &self,
        session_id: &str,
        cutoff_date: &str,
        forecasted_step: usize,
        max_drivers: usize,
    ) -> ClientResult<Explanation> {
        let response = self.explain(session_id, &[cutoff_date])?;
        explanation_from_response(&response, cutoff_date, forecasted_step, max_drivers)
    }

    /// Fetches a service-rendered PNG.
    pub fn image(
        &self,
        session_id: &str,
        plot_type: PlotType,
        cutoff_date: Option<&str>,
        prediction_for: Option<&str>,
    ) -> ClientResult<Vec<u8>> {
        let response = self.submit(&image_request(
            session_id,
            plot_type,
            cutoff_date,
            prediction_for,
        ))?;
        decode_image(&response)
    }

    pub fn status(&self, session_id: &str) -> ClientResult<Value> {
        self.transport.get_json(&status_path(session_id))
    }

    pub fn result(&self, session_id: &str) -> ClientResult<Value> {
        self.transport.get_json(&result_path(session_id))
    }
}

fn validate_forecast(data: &Frame, params: &ForecastParams) -> ClientResult<()> {
    if params.target_columns.is_empty() {
        return Err(ClientError::validation("at least one target column is required"));
    }
    if params.forecasting_horizon == 0 {
        return Err(ClientError::validation("forecasting_horizon must be positive"));
    }
    if params.observation_length == 0 {
        return Err(ClientError::validation("observation_length must be positive"));
    }
    if params.observation_length > data.len() {
        return Err(ClientError::validation(format!(
            "observation_length {} exceeds the {} rows of data",
            params.observation_length,
            data.len()
        )));
    }
    Ok(())
}

fn session_id_of(submitted: &Value) -> ClientResult<String> {
    submitted
        .get("response")
        .and_then(|inner| inner.get("session_id"))
        .filter(|id| !id.is_null())
        .map(cell_text)
        .ok_or_else(|| ClientError::malformed("submission response carries no session_id"))
}

/// Default cutoff for explanations: the last label of the historical index.
pub fn default_cutoff(historical: &Frame) -> ClientResult<String> {
    historical
        .index
        .last()
        .map(cell_text)
        .ok_or_else(|| ClientError::validation("historical data is empty; pass a cutoff date"))
}

/// PNG bytes from `response.data`, either a bare base64 string or an object
/// with an `image` field. A `data:` URI prefix is tolerated.
pub fn decode_image(response: &Value) -> ClientResult<Vec<u8>> {
    let data = response
        .get("response")
        .and_then(|inner| inner.get("data"))
        .ok_or_else(|| ClientError::malformed("image response has no response.data"))?;
    let encoded = data
        .as_str()
        .or_else(|| data.get("image").and_then(Value::as_str))
        .ok_or_else(|| ClientError::malformed("image response carries no base64 payload"))?;
    let encoded = match encoded.split_once(";base64,") {
        Some((_, rest)) => rest,
        None => encoded,
    };
    let bytes = base64::engine::general_purpose::STANDARD.decode(encoded.trim())?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{long_prediction_response, serve, ScriptedTransport};
    use axum::extract::{Path, State};
    use axum::http::HeaderMap;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    fn quick() -> PollPolicy {
        PollPolicy::fixed(Duration::from_millis(1))
    }

    fn table(rows: usize) -> Frame {
        Frame::new(
            (0..rows).map(|i| json!(format!("2024-02-{:02}", i + 1))).collect(),
            vec!["A".into(), "B".into()],
            (0..rows).map(|i| vec![json!(i), json!(i * 2)]).collect(),
        )
        .unwrap()
    }

    fn params() -> ForecastParams {
        ForecastParams::new(vec!["A".into(), "B".into()], 2, 3)
    }

    #[test]
    fn predict_validates_before_any_request() {
        let client = ForecastClient::with_transport(ScriptedTransport::new(), quick());
        let data = table(5);

        for (horizon, observation) in [(0, 3), (2, 0), (2, 6)] {
            let params = ForecastParams::new(vec!["A".into()], horizon, observation);
            assert!(matches!(
                client.predict(&data, &params),
                Err(ClientError::Validation(_))
            ));
        }
        assert!(client.transport().posts().is_empty());
    }

    #[test]
    fn synchronous_predict_reshapes_submission_response() {
        let transport = ScriptedTransport::new()
            .with_post_reply(long_prediction_response());
        let client = ForecastClient::with_transport(transport, quick());

        let prediction = client.predict(&table(5), &params()).unwrap();
        assert_eq!(
            prediction.prediction.columns,
            vec!["A_predicted", "B_predicted"]
        );
        assert_eq!(prediction.session_id.as_deref(), Some("sess-42"));

        let posts = client.transport().posts();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].0, "/prediction");
        assert_eq!(posts[0].1["config"]["operation"], "forecast");
        assert!(client.transport().gets().is_empty());
    }

    #[test]
    fn background_predict_polls_then_fetches_result() {
        let transport = ScriptedTransport::new()
            .with_post_reply(json!({"response": {"session_id": "bg-1"}}))
            .with_statuses(&["submitted", "running", "completed"])
            .with_result(long_prediction_response());
        let client = ForecastClient::with_transport(transport, quick());
        let mut params = params();
        params.background = true;

        let prediction = client.predict(&table(5), &params).unwrap();
        assert_eq!(prediction.prediction.len(), 2);
        let gets = client.transport().gets();
        assert_eq!(gets.len(), 4);
        assert_eq!(gets[3], "/result/bg-1");
    }

    #[test]
    fn background_predict_requires_session_id() {
        let transport = ScriptedTransport::new()
            .with_post_reply(json!({"response": {}}));
        let client = ForecastClient::with_transport(transport, quick());
        let mut params = params();
        params.background = true;
        assert!(matches!(
            client.predict(&table(5), &params),
            Err(ClientError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_split_start_index() {
        assert_eq!(TestSplit::default().start_index(10, 2).unwrap(), 8);
        let by_fraction = TestSplit {
            train_size: Some(0.5),
            test_size: None,
        };
        assert_eq!(by_fraction.start_index(10, 2).unwrap(), 5);
        let by_count = TestSplit {
            train_size: None,
            test_size: Some(3),
        };
        assert_eq!(by_count.start_index(10, 2).unwrap(), 5);

        let both = TestSplit {
            train_size: Some(0.5),
            test_size: Some(3),
        };
        assert!(matches!(both.start_index(10, 2), Err(ClientError::Validation(_))));
        let too_big = TestSplit {
            train_size: None,
            test_size: Some(9),
        };
        assert!(too_big.start_index(10, 2).is_err());
    }

    #[test]
    fn predict_test_rolls_over_growing_prefixes() {
        let mut transport = ScriptedTransport::new();
        for _ in 0..3 {
            transport = transport.with_post_reply(long_prediction_response());
        }
        let client = ForecastClient::with_transport(transport, quick());
        let split = TestSplit {
            train_size: Some(0.5),
            test_size: None,
        };

        let outcome = client.predict_test(&table(10), &params(), split).unwrap();
        assert_eq!(outcome.predictions.len(), 3);
        let sent_rows: Vec<usize> = client
            .transport()
            .posts()
            .iter()
            .map(|(_, body)| body["data"]["data"].as_array().map(Vec::len).unwrap_or(0))
            .collect();
        assert_eq!(sent_rows, vec![6, 7, 8]);
    }

    #[test]
    fn predict_test_rejects_conflicting_split() {
        let client = ForecastClient::with_transport(ScriptedTransport::new(), quick());
        let split = TestSplit {
            train_size: Some(0.8),
            test_size: Some(2),
        };
        assert!(matches!(
            client.predict_test(&table(10), &params(), split),
            Err(ClientError::Validation(_))
        ));
        assert!(client.transport().posts().is_empty());
    }

    #[test]
    fn backtest_waits_and_slices_folds() {
        let rows: Vec<serde_json::Value> = (0..6).map(|i| json!([i as f64, 0])).collect();
        let transport = ScriptedTransport::new()
            .with_post_reply(json!({"response": {"session_id": "bt-1"}}))
            .with_statuses(&["running", "completed"])
            .with_result(json!({"response": {"data": {
                "predictions": [{"columns": ["y__target", "outer_cv"], "data": rows}],
                "scores": {"test_error": [1.25]},
            }}}));
        let client = ForecastClient::with_transport(transport, quick());
        let data = table(20);
        let params = BacktestParams::new(vec!["A".into()], 3, 5, 6);

        let outcome = client.backtest(Some(&data), &params).unwrap();
        assert_eq!(outcome.folds.len(), 2);
        assert_eq!(outcome.folds[1].columns, vec!["y_predicted"]);
        assert_eq!(outcome.score, json!(1.25));
        let posts = client.transport().posts();
        assert_eq!(posts[0].0, "/backtest");
        assert_eq!(
            posts[0].1["config"]["operation_arguments"]["outer_cv"]["n_splits"],
            1
        );
    }

    #[test]
    fn failed_backtest_surfaces_job_failure() {
        let transport = ScriptedTransport::new()
            .with_post_reply(json!({"response": {"session_id": "bt-2"}}))
            .with_statuses(&["running", "failed"]);
        let client = ForecastClient::with_transport(transport, quick());
        let params = BacktestParams::new(vec!["A".into()], 3, 5, 6);

        let err = client.backtest(Some(&table(20)), &params).unwrap_err();
        assert!(matches!(err, ClientError::JobFailed { .. }));
    }

    #[test]
    fn explain_drivers_ranks_the_requested_step() {
        let transport = ScriptedTransport::new().with_post_reply(json!({
            "response": {"data": {"2024-02-05": {
                "1": {"f1": -0.5, "f2": 0.3, "f3": -0.1, "A": 0.9},
            }}},
        }));
        let client = ForecastClient::with_transport(transport, quick());
        let cutoff = default_cutoff(&table(5)).unwrap();
        assert_eq!(cutoff, "2024-02-05");

        let explanation = client.explain_drivers("s-1", &cutoff, 0, 2).unwrap();
        let names: Vec<&str> = explanation
            .drivers
            .iter()
            .map(|d| d.feature.as_str())
            .collect();
        assert_eq!(names, vec!["f1", "f2", "Sum of the 1 remaining features"]);

        let posts = client.transport().posts();
        assert_eq!(posts[0].0, "/explanation");
        assert_eq!(posts[0].1["data"], serde_json::Value::Null);
        assert_eq!(
            posts[0].1["config"]["operation_arguments"]["cutoff_days"],
            "2024-02-05"
        );
    }

    #[test]
    fn image_payload_decodes_from_string_or_object() {
        let png = [0x89u8, b'P', b'N', b'G'];
        let encoded = base64::engine::general_purpose::STANDARD.encode(png);
        let bare = json!({"response": {"data": encoded}});
        assert_eq!(decode_image(&bare).unwrap(), png);

        let uri = format!("data:image/png;base64,{encoded}");
        let wrapped = json!({"response": {"data": {"image": uri}}});
        assert_eq!(decode_image(&wrapped).unwrap(), png);
        assert!(matches!(
            decode_image(&json!({"response": {"data": "***"}})),
            Err(ClientError::Base64(_))
        ));
    }

    #[derive(Default)]
    struct MockService {
        polls: Mutex<u32>,
        auth: Mutex<Vec<String>>,
    }

    async fn mock_status(
        State(service): State<Arc<MockService>>,
        headers: HeaderMap,
    ) -> Json<Value> {
        let key = headers
            .get("ocp-apim-subscription-key")
            .and_then(|value| value.to_str().ok());
        if let Some(key) = key {
            service.auth.lock().unwrap().push(key.to_string());
        }
        let mut polls = service.polls.lock().unwrap();
        *polls += 1;
        let status = if *polls < 3 { "running" } else { "completed" };
        Json(json!({"status": status}))
    }

    #[test]
    fn background_predict_over_http() {
        let service = Arc::new(MockService::default());
        let router = Router::new()
            .route(
                "/prediction",
                post(|| async { Json(json!({"response": {"session_id": "http-1"}})) }),
            )
            .route("/status/{session_id}", get(mock_status))
            .route(
                "/result/{session_id}",
                get(|Path(session_id): Path<String>| async move {
                    assert_eq!(session_id, "http-1");
                    Json(long_prediction_response())
                }),
            )
            .with_state(service.clone());
        let base_url = serve(router);

        let credentials = Credentials {
            base_url,
            auth_key: Some("k-123".into()),
        };
        let config = ClientConfig {
            http_timeout: Duration::from_secs(5),
            poll: quick(),
        };
        let client = ForecastClient::new(&credentials, &config).unwrap();
        let mut params = params();
        params.background = true;

        let prediction = client.predict(&table(5), &params).unwrap();
        assert_eq!(
            prediction.prediction.columns,
            vec!["A_predicted", "B_predicted"]
        );
        assert_eq!(*service.polls.lock().unwrap(), 3);
        let keys = service.auth.lock().unwrap().clone();
        assert!(keys.iter().all(|key| key == "k-123"));
    }
}
