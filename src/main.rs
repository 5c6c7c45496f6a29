mod cli;
mod commands;

use clap::Parser;
use std::process::ExitCode;

use forecastctl::ClientError;

use crate::cli::{Cli, Commands};

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn exit_code(err: &anyhow::Error) -> u8 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<ClientError>())
        .map(ClientError::exit_code)
        .unwrap_or(1)
}

fn main() -> ExitCode {
    let dotenv = forecastctl::config::load_dotenv();
    init_tracing();
    if let Some(path) = dotenv {
        tracing::debug!(path = %path.display(), "loaded .env");
    }

    let cli = Cli::parse();
    let globals = commands::Globals::from_cli(&cli);
    let result = match cli.command {
        Commands::Predict(args) => commands::predict(&globals, args),
        Commands::PredictTest(args) => commands::predict_test(&globals, args),
        Commands::Backtest(args) => commands::backtest(&globals, args),
        Commands::Explain(args) => commands::explain(&globals, args),
        Commands::Image(args) => commands::image(&globals, args),
        Commands::Status(args) => commands::status(&globals, args),
        Commands::JobResult(args) => commands::job_result(&globals, args),
        Commands::Plot(args) => commands::plot(args),
        Commands::Coverage(args) => commands::coverage(args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("forecastctl: {err:#}");
            ExitCode::from(exit_code(&err))
        }
    }
}
