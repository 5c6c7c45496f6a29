use super::palette::diverging_color;
use super::svg::{tick_label, Anchor, SvgDocument, TextStyle};
use crate::explain::Driver;

pub const DEFAULT_DRIVERS_TITLE: &str = "Main drivers of predictions";

const CHART_WIDTH: f64 = 900.0;
const MIN_HEIGHT: f64 = 400.0;
const ROW_HEIGHT: f64 = 25.0;
const MARGIN_TOP: f64 = 50.0;
const MARGIN_BOTTOM: f64 = 56.0;
const MARGIN_RIGHT: f64 = 70.0;

pub fn chart_height(rows: usize) -> f64 {
    (rows as f64 * ROW_HEIGHT).max(MIN_HEIGHT)
}

/// Horizontal bar chart of driver impacts, largest at the top.
pub fn drivers_chart(drivers: &[Driver], title: &str) -> String {
    let height = chart_height(drivers.len());
    let mut doc = SvgDocument::new(CHART_WIDTH, height);
    let title_style = TextStyle::new(18.0, Anchor::Middle).bold();
    doc.text(CHART_WIDTH / 2.0, 28.0, title, title_style);

    let longest_label = drivers
        .iter()
        .map(|driver| driver.feature.chars().count())
        .max()
        .unwrap_or(0);
    let left = (40.0 + longest_label as f64 * 6.5).clamp(120.0, 340.0);
    let plot_width = CHART_WIDTH - left - MARGIN_RIGHT;
    let plot_height = height - MARGIN_TOP - MARGIN_BOTTOM;

    let low = drivers.iter().map(|d| d.impact).fold(0.0_f64, f64::min);
    let mut high = drivers.iter().map(|d| d.impact).fold(0.0_f64, f64::max);
    if high - low <= 0.0 {
        high = low + 1.0;
    }
    let max_abs = low.abs().max(high.abs());
    let x_of = |value: f64| left + (value - low) / (high - low) * plot_width;

    let zero = x_of(0.0);
    doc.line(
        (zero, MARGIN_TOP),
        (zero, MARGIN_TOP + plot_height),
        "#444444",
        1.0,
    );
    doc.line(
        (left, MARGIN_TOP + plot_height),
        (left + plot_width, MARGIN_TOP + plot_height),
        "#444444",
        1.0,
    );

    if !drivers.is_empty() {
        let band = plot_height / drivers.len() as f64;
        for (row, driver) in drivers.iter().enumerate() {
            let center = MARGIN_TOP + band * (row as f64 + 0.5);
            let bar_height = band * 0.7;
            let start = x_of(0.0_f64.min(driver.impact));
            let end = x_of(0.0_f64.max(driver.impact));
            let fill = diverging_color(driver.impact, max_abs).hex();
            let top = center - bar_height / 2.0;
            doc.rect(start, top, end - start, bar_height, &fill, None);

            let label_style = TextStyle::new(11.0, Anchor::End);
            doc.text(left - 8.0, center + 4.0, &driver.feature, label_style);
            let value_style = TextStyle::new(10.0, Anchor::Start);
            let value = tick_label(driver.impact);
            doc.text(end + 6.0, center + 4.0, &value, value_style);
        }
    }

    doc.text(
        left + plot_width / 2.0,
        height - 16.0,
        "Impact of each feature on the prediction",
        TextStyle::new(12.0, Anchor::Middle),
    );
    doc.vertical_text(16.0, MARGIN_TOP + plot_height / 2.0, "Features", 12.0);
    doc.finish()
}
