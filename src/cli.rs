use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use forecastctl::evaluate::Metric;
use forecastctl::explain::DEFAULT_MAX_DRIVERS;
use forecastctl::payload::{PlotType, DEFAULT_MODEL};

#[derive(Parser)]
#[command(name = "forecastctl", version, about = "Forecasting service client")]
pub struct Cli {
    /// Service base URL; falls back to API_BASE_URL or credentials.txt.
    #[arg(long, global = true)]
    pub base_url: Option<String>,
    /// Auth key; falls back to API_AUTH_KEY, FINCHAT_AUTH_KEY or credentials.txt.
    #[arg(long, global = true)]
    pub auth_key: Option<String>,
    /// Call the service without an auth key.
    #[arg(long, global = true, default_value_t = false)]
    pub no_auth: bool,
    /// Overrides FORECAST_POLL_INTERVAL_SECS.
    #[arg(long, global = true)]
    pub poll_interval_secs: Option<u64>,
    /// Overrides FORECAST_POLL_DEADLINE_SECS; 0 polls without a deadline.
    #[arg(long, global = true)]
    pub poll_deadline_secs: Option<u64>,
    /// Keep polling when the service reports a job as failed.
    #[arg(long, global = true, default_value_t = false)]
    pub poll_through_failures: bool,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    Predict(PredictArgs),
    PredictTest(PredictTestArgs),
    Backtest(BacktestArgs),
    Explain(ExplainArgs),
    Image(ImageArgs),
    Status(SessionArgs),
    #[command(name = "result")]
    JobResult(ResultArgs),
    Plot(PlotArgs),
    Coverage(CoverageArgs),
}

#[derive(Args)]
pub struct DataArgs {
    #[arg(long)]
    pub data_path: PathBuf,
    /// Column to use as the index (timestamps); rows are numbered otherwise.
    #[arg(long)]
    pub index_column: Option<String>,
}

#[derive(Args)]
pub struct ForecastArgs {
    #[arg(long, value_delimiter = ',', required = true)]
    pub target_columns: Vec<String>,
    #[arg(long, value_delimiter = ',')]
    pub feature_columns: Vec<String>,
    #[arg(long)]
    pub forecasting_horizon: usize,
    #[arg(long)]
    pub observation_length: usize,
    #[arg(long, default_value = DEFAULT_MODEL)]
    pub models: String,
    #[arg(long, value_delimiter = ',')]
    pub prediction_interval_levels: Vec<u32>,
    #[arg(long, default_value_t = false)]
    pub background: bool,
    /// Clip negative predictions to zero.
    #[arg(long, default_value_t = false)]
    pub positive_only: bool,
}

#[derive(Args)]
pub struct PredictArgs {
    #[command(flatten)]
    pub data: DataArgs,
    #[command(flatten)]
    pub forecast: ForecastArgs,
    /// Write the wide prediction table as CSV instead of printing it.
    #[arg(long)]
    pub output: Option<PathBuf>,
    /// Write an SVG chart of the target history and the forecast.
    #[arg(long)]
    pub chart: Option<PathBuf>,
}

#[derive(Args)]
pub struct PredictTestArgs {
    #[command(flatten)]
    pub data: DataArgs,
    #[command(flatten)]
    pub forecast: ForecastArgs,
    #[arg(long, conflicts_with = "test_size")]
    pub train_size: Option<f64>,
    #[arg(long)]
    pub test_size: Option<usize>,
    #[arg(long, value_enum, default_value_t = Metric::Mae)]
    pub metric: Metric,
    /// Directory for one CSV per rolling prediction.
    #[arg(long)]
    pub output_dir: Option<PathBuf>,
}

#[derive(Args)]
pub struct BacktestArgs {
    /// Table to upload; omit to run on `--dataset` or a previous session.
    #[arg(long)]
    pub data_path: Option<PathBuf>,
    #[arg(long)]
    pub index_column: Option<String>,
    /// Dataset path on the service side.
    #[arg(long)]
    pub dataset: Option<String>,
    #[arg(long, value_delimiter = ',', required = true)]
    pub target_columns: Vec<String>,
    #[arg(long, value_delimiter = ',')]
    pub feature_columns: Vec<String>,
    #[arg(long)]
    pub forecasting_horizon: usize,
    #[arg(long)]
    pub observation_length: usize,
    /// Held-out samples across all folds.
    #[arg(long)]
    pub full_test_size: usize,
    #[arg(long, default_value = DEFAULT_MODEL)]
    pub models: String,
    #[arg(long)]
    pub session_id: Option<String>,
    #[arg(long, default_value_t = false)]
    pub no_tune: bool,
    #[arg(long, default_value_t = -1, allow_hyphen_values = true)]
    pub max_candidates: i64,
    /// Directory for one CSV per fold.
    #[arg(long)]
    pub output_dir: Option<PathBuf>,
}

#[derive(Args)]
pub struct ExplainArgs {
    #[arg(long)]
    pub session_id: String,
    #[arg(long, value_delimiter = ',')]
    pub cutoff_days: Vec<String>,
    /// Rank drivers for one cutoff instead of printing the raw response.
    #[arg(long, default_value_t = false)]
    pub drivers: bool,
    /// Cutoff to rank; defaults to the last index label of `--historical`.
    #[arg(long)]
    pub cutoff_date: Option<String>,
    #[arg(long)]
    pub historical: Option<PathBuf>,
    #[arg(long)]
    pub index_column: Option<String>,
    #[arg(long, default_value_t = 0)]
    pub forecasted_step: usize,
    #[arg(long, default_value_t = DEFAULT_MAX_DRIVERS)]
    pub max_drivers: usize,
    /// Write an SVG driver chart (implies --drivers).
    #[arg(long)]
    pub chart: Option<PathBuf>,
}

#[derive(Args)]
pub struct ImageArgs {
    #[arg(long)]
    pub session_id: String,
    #[arg(long, value_enum, default_value_t = PlotType::Prediction)]
    pub plot_type: PlotType,
    #[arg(long)]
    pub cutoff_date: Option<String>,
    #[arg(long)]
    pub prediction_for: Option<String>,
    #[arg(long, default_value = "forecast.png")]
    pub output: PathBuf,
}

#[derive(Args)]
pub struct SessionArgs {
    #[arg(long)]
    pub session_id: String,
}

#[derive(Args)]
pub struct ResultArgs {
    #[arg(long)]
    pub session_id: String,
    /// Poll the status endpoint until the job completes first.
    #[arg(long, default_value_t = false)]
    pub wait: bool,
}

#[derive(Args)]
pub struct PlotArgs {
    #[arg(long)]
    pub historical: PathBuf,
    #[arg(long)]
    pub index_column: Option<String>,
    /// Historical columns to plot; defaults to every column.
    #[arg(long, value_delimiter = ',')]
    pub columns: Vec<String>,
    /// Prediction CSV, or NAME=PATH to draw several named series.
    #[arg(long = "predictions", required = true)]
    pub predictions: Vec<String>,
    #[arg(long)]
    pub observation_length: Option<usize>,
    #[arg(long, default_value = "forecast.svg")]
    pub output: PathBuf,
}

#[derive(Args)]
pub struct CoverageArgs {
    #[arg(long)]
    pub historical: PathBuf,
    #[arg(long)]
    pub predictions: PathBuf,
    #[arg(long)]
    pub index_column: Option<String>,
    #[arg(long)]
    pub level: u32,
}
