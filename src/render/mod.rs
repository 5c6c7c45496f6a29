//! SVG charts for forecasts and driver rankings.

mod drivers;
mod forecast;
pub mod palette;
pub mod svg;

use std::path::Path;

use crate::error::ClientResult;

pub use drivers::{chart_height, drivers_chart, DEFAULT_DRIVERS_TITLE};
pub use forecast::{
    forecast_chart, grid_shape, history_window, ForecastChartOptions, PredictionSeries,
};

pub fn write_chart(path: &Path, svg: &str) -> ClientResult<()> {
    std::fs::write(path, svg)?;
    tracing::info!(path = %path.display(), bytes = svg.len(), "chart written");
    Ok(())
}
