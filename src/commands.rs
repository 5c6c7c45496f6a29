use anyhow::{Context, Result};
use serde_json::Value;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use forecastctl::client::{default_cutoff, ForecastClient, TestSplit};
use forecastctl::config::{resolve_credentials, ClientConfig, CredentialSources};
use forecastctl::evaluate::{check_coverage, score_test};
use forecastctl::payload::{BacktestParams, ForecastParams};
use forecastctl::poller::FailureAction;
use forecastctl::render::{
    drivers_chart, forecast_chart, write_chart, ForecastChartOptions, PredictionSeries,
    DEFAULT_DRIVERS_TITLE,
};
use forecastctl::table::{load_frame, set_index, Frame};
use forecastctl::ClientError;

use crate::cli::{
    BacktestArgs, Cli, CoverageArgs, ExplainArgs, ForecastArgs, ImageArgs, PlotArgs, PredictArgs,
    PredictTestArgs, ResultArgs, SessionArgs,
};

/// Connection settings shared by every remote subcommand.
pub struct Globals {
    base_url: Option<String>,
    auth_key: Option<String>,
    no_auth: bool,
    poll_interval_secs: Option<u64>,
    poll_deadline_secs: Option<u64>,
    poll_through_failures: bool,
}

impl Globals {
    pub fn from_cli(cli: &Cli) -> Self {
        Self {
            base_url: cli.base_url.clone(),
            auth_key: cli.auth_key.clone(),
            no_auth: cli.no_auth,
            poll_interval_secs: cli.poll_interval_secs,
            poll_deadline_secs: cli.poll_deadline_secs,
            poll_through_failures: cli.poll_through_failures,
        }
    }

    fn client(&self) -> Result<ForecastClient> {
        let mut sources =
            CredentialSources::from_process(self.base_url.clone(), self.auth_key.clone());
        sources.allow_anonymous = self.no_auth;
        let mut credentials = resolve_credentials(sources)
            .context("failed to resolve credentials")?;
        if self.no_auth {
            credentials.auth_key = None;
        }

        let mut config = ClientConfig::from_env();
        if let Some(secs) = self.poll_interval_secs {
            config.poll.interval = Duration::from_secs(secs);
        }
        if let Some(secs) = self.poll_deadline_secs {
            config.poll.deadline = (secs > 0).then(|| Duration::from_secs(secs));
        }
        tracing::debug!(?credentials, ?config, "client configuration");

        let action = if self.poll_through_failures {
            FailureAction::KeepPolling
        } else {
            FailureAction::Abort
        };
        Ok(ForecastClient::new(&credentials, &config)?.on_job_failure(action))
    }
}

fn forecast_params(args: &ForecastArgs) -> ForecastParams {
    let mut params = ForecastParams::new(
        args.target_columns.clone(),
        args.forecasting_horizon,
        args.observation_length,
    );
    params.feature_columns = args.feature_columns.clone();
    params.model = args.models.clone();
    params.prediction_interval_levels = args.prediction_interval_levels.clone();
    params.background = args.background;
    params.positive_predictions_only = args.positive_only;
    params
}

fn load_table(path: &Path, index_column: Option<&str>) -> Result<Frame> {
    load_frame(path, index_column)
        .with_context(|| format!("failed to load {}", path.display()))
}

/// Prediction tables carry their index in the first CSV column.
fn load_prediction(path: &Path) -> Result<Frame> {
    let frame = load_table(path, None)?;
    let is_csv = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));
    match frame.columns.first().cloned() {
        Some(first) if is_csv => Ok(set_index(frame, &first)?),
        _ => Ok(frame),
    }
}

fn print_table(frame: &Frame) -> Result<()> {
    let stdout = std::io::stdout();
    frame
        .write_csv(stdout.lock())
        .context("failed to write table")?;
    Ok(())
}

fn print_json(value: &Value) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, value)?;
    writeln!(stdout)?;
    Ok(())
}

fn write_frames(dir: &Path, prefix: &str, frames: &[Frame]) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create {}", dir.display()))?;
    for (i, frame) in frames.iter().enumerate() {
        let path = dir.join(format!("{prefix}_{i}.csv"));
        frame
            .write_csv_path(&path)
            .with_context(|| format!("failed to write {}", path.display()))?;
    }
    tracing::info!(dir = %dir.display(), files = frames.len(), "tables written");
    Ok(())
}

pub fn predict(globals: &Globals, args: PredictArgs) -> Result<()> {
    let data = load_table(&args.data.data_path, args.data.index_column.as_deref())?;
    let params = forecast_params(&args.forecast);
    let client = globals.client()?;
    let prediction = client.predict(&data, &params).context("prediction failed")?;

    if let Some(session_id) = &prediction.session_id {
        tracing::info!(session_id = %session_id, "prediction ready");
    }
    match &args.output {
        Some(path) => prediction
            .prediction
            .write_csv_path(path)
            .with_context(|| format!("failed to write {}", path.display()))?,
        None => print_table(&prediction.prediction)?,
    }
    if let Some(path) = &args.chart {
        let historical = data.select_columns(&params.target_columns)?;
        let svg = forecast_chart(
            &historical,
            &PredictionSeries::Single(prediction.prediction),
            &ForecastChartOptions::default(),
        )?;
        write_chart(path, &svg)?;
    }
    Ok(())
}

pub fn predict_test(globals: &Globals, args: PredictTestArgs) -> Result<()> {
    let data = load_table(&args.data.data_path, args.data.index_column.as_deref())?;
    let params = forecast_params(&args.forecast);
    let split = TestSplit {
        train_size: args.train_size,
        test_size: args.test_size,
    };
    let client = globals.client()?;
    let outcome = client
        .predict_test(&data, &params, split)
        .context("rolling prediction failed")?;

    let score = score_test(&outcome.predictions, &data, args.metric)?;
    println!("Test score ({}): {score}", args.metric.as_str());
    if let Some(dir) = &args.output_dir {
        write_frames(dir, "prediction", &outcome.predictions)?;
    }
    Ok(())
}

pub fn backtest(globals: &Globals, args: BacktestArgs) -> Result<()> {
    let data = match &args.data_path {
        Some(path) => Some(load_table(path, args.index_column.as_deref())?),
        None => None,
    };
    let mut params = BacktestParams::new(
        args.target_columns,
        args.forecasting_horizon,
        args.observation_length,
        args.full_test_size,
    );
    params.feature_columns = args.feature_columns;
    params.model = args.models;
    params.session_id = args.session_id;
    params.dataset = args.dataset;
    params.tune = !args.no_tune;
    params.max_candidates = args.max_candidates;

    let client = globals.client()?;
    let outcome = client
        .backtest(data.as_ref(), &params)
        .context("backtest failed")?;

    println!("Backtest folds: {}", outcome.folds.len());
    println!("Test error: {}", outcome.score);
    match &args.output_dir {
        Some(dir) => write_frames(dir, "fold", &outcome.folds)?,
        None => {
            for fold in &outcome.folds {
                print_table(fold)?;
            }
        }
    }
    Ok(())
}

pub fn explain(globals: &Globals, args: ExplainArgs) -> Result<()> {
    let client = globals.client()?;
    if !args.drivers && args.chart.is_none() {
        let response = client
            .explain(&args.session_id, &args.cutoff_days)
            .context("explanation failed")?;
        return print_json(&response);
    }

    let cutoff = match (&args.cutoff_date, &args.historical) {
        (Some(date), _) => date.clone(),
        (None, Some(path)) => default_cutoff(&load_table(path, args.index_column.as_deref())?)?,
        (None, None) => {
            let message = "ranking drivers needs --cutoff-date or --historical";
            return Err(ClientError::validation(message).into());
        }
    };
    let explanation = client
        .explain_drivers(
            &args.session_id,
            &cutoff,
            args.forecasted_step,
            args.max_drivers,
        )
        .context("explanation failed")?;

    println!("Cutoff {} step {}", explanation.cutoff_date, explanation.step);
    for driver in &explanation.drivers {
        println!("{:>12.6}  {}", driver.impact, driver.feature);
    }
    if let Some(path) = &args.chart {
        let svg = drivers_chart(&explanation.drivers, DEFAULT_DRIVERS_TITLE);
        write_chart(path, &svg)?;
    }
    Ok(())
}

pub fn image(globals: &Globals, args: ImageArgs) -> Result<()> {
    let client = globals.client()?;
    let png = client
        .image(
            &args.session_id,
            args.plot_type,
            args.cutoff_date.as_deref(),
            args.prediction_for.as_deref(),
        )
        .context("image request failed")?;
    std::fs::write(&args.output, &png)
        .with_context(|| format!("failed to write {}", args.output.display()))?;
    tracing::info!(path = %args.output.display(), bytes = png.len(), "image written");
    Ok(())
}

pub fn status(globals: &Globals, args: SessionArgs) -> Result<()> {
    let response = globals.client()?.status(&args.session_id)?;
    print_json(&response)
}

pub fn job_result(globals: &Globals, args: ResultArgs) -> Result<()> {
    let client = globals.client()?;
    let response = if args.wait {
        client.wait_for_result(&args.session_id)?.result
    } else {
        client.result(&args.session_id)?
    };
    print_json(&response)
}

fn prediction_series(entries: &[String]) -> Result<PredictionSeries> {
    let mut named = Vec::with_capacity(entries.len());
    for entry in entries {
        let (name, path) = match entry.split_once('=') {
            Some((name, path)) => (name.to_string(), PathBuf::from(path)),
            None => {
                let path = PathBuf::from(entry);
                let stem = path
                    .file_stem()
                    .map(|stem| stem.to_string_lossy().into_owned())
                    .unwrap_or_else(|| entry.clone());
                (stem, path)
            }
        };
        named.push((name, load_prediction(&path)?));
    }
    if named.len() == 1 && !entries[0].contains('=') {
        if let Some((_, frame)) = named.pop() {
            return Ok(PredictionSeries::Single(frame));
        }
    }
    Ok(PredictionSeries::Named(named))
}

pub fn plot(args: PlotArgs) -> Result<()> {
    let mut historical = load_table(&args.historical, args.index_column.as_deref())?;
    if !args.columns.is_empty() {
        historical = historical.select_columns(&args.columns)?;
    }
    let predictions = prediction_series(&args.predictions)?;
    let options = ForecastChartOptions {
        observation_length: args.observation_length,
        ..ForecastChartOptions::default()
    };
    let svg = forecast_chart(&historical, &predictions, &options)?;
    write_chart(&args.output, &svg)?;
    Ok(())
}

pub fn coverage(args: CoverageArgs) -> Result<()> {
    let historical = load_table(&args.historical, args.index_column.as_deref())?;
    let predictions = load_prediction(&args.predictions)?;
    println!("{}", check_coverage(&historical, &predictions, args.level));
    Ok(())
}
