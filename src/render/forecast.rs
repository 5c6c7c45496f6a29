use std::collections::BTreeSet;

use super::palette::{series_color, Rgb, HISTORICAL_COLOR};
use super::svg::{tick_label, Anchor, SvgDocument, TextStyle};
use crate::error::{ClientError, ClientResult};
use crate::reshape::PREDICTED_SUFFIX;
use crate::table::{Frame, IndexKey};

const BAND_OPACITY: f64 = 0.18;
const HEADER_HEIGHT: f64 = 70.0;
const PLOT_MARGIN_LEFT: f64 = 64.0;
const PLOT_MARGIN_RIGHT: f64 = 24.0;
const PLOT_MARGIN_TOP: f64 = 34.0;
const PLOT_MARGIN_BOTTOM: f64 = 42.0;
const X_TICKS: usize = 5;
const Y_TICKS: usize = 5;
const SINGLE_SERIES_NAME: &str = "Predicted";

/// One prediction table, or several named ones drawn side by side.
#[derive(Debug, Clone)]
pub enum PredictionSeries {
    Single(Frame),
    Named(Vec<(String, Frame)>),
}

impl PredictionSeries {
    pub fn entries(&self) -> Vec<(&str, &Frame)> {
        match self {
            PredictionSeries::Single(frame) => vec![(SINGLE_SERIES_NAME, frame)],
            PredictionSeries::Named(series) => series
                .iter()
                .map(|(name, frame)| (name.as_str(), frame))
                .collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ForecastChartOptions {
    /// Trailing historical rows to draw; defaults to four times the forecast length.
    pub observation_length: Option<usize>,
    pub title: String,
    pub panel_width: f64,
    pub panel_height: f64,
}

impl Default for ForecastChartOptions {
    fn default() -> Self {
        Self {
            observation_length: None,
            title: "Predictions".to_string(),
            panel_width: 520.0,
            panel_height: 300.0,
        }
    }
}

/// `(rows, cols)` of the subplot grid: one column for a single target, two otherwise.
pub fn grid_shape(targets: usize) -> (usize, usize) {
    let cols = if targets <= 1 { 1 } else { 2 };
    (targets.div_ceil(cols), cols)
}

pub fn history_window(
    historical_rows: usize,
    prediction_rows: usize,
    observation_length: Option<usize>,
) -> usize {
    observation_length
        .unwrap_or(prediction_rows.saturating_mul(4))
        .min(historical_rows)
}

fn predicted_columns(frame: &Frame) -> Vec<&str> {
    frame
        .columns
        .iter()
        .filter(|column| column.ends_with(PREDICTED_SUFFIX))
        .map(String::as_str)
        .collect()
}

/// Level of the interval columns (`...-lo-80` gives `80`), taken from the last one.
fn interval_level(frame: &Frame) -> Option<&str> {
    frame
        .columns
        .iter()
        .rev()
        .find(|column| column.contains("-lo-") || column.contains("-hi-"))
        .and_then(|column| column.rsplit('-').next())
}

fn validate(historical: &Frame, entries: &[(&str, &Frame)]) -> ClientResult<()> {
    if historical.width() == 0 {
        return Err(ClientError::validation("historical data has no columns to plot"));
    }
    if entries.is_empty() {
        return Err(ClientError::validation("no predictions to plot"));
    }
    for (name, frame) in entries {
        let predicted = predicted_columns(frame).len();
        if predicted != historical.width() {
            return Err(ClientError::validation(format!(
                "historical data has {} columns but prediction '{name}' has \
                 {predicted} predicted columns; pass only the target columns \
                 of the historical data",
                historical.width()
            )));
        }
    }
    Ok(())
}

struct Band {
    lower: Vec<(IndexKey, Option<f64>)>,
    upper: Vec<(IndexKey, Option<f64>)>,
}

struct Trace {
    color: Rgb,
    points: Vec<(IndexKey, Option<f64>)>,
    band: Option<Band>,
}

fn keyed_column(frame: &Frame, column: &str) -> Vec<(IndexKey, Option<f64>)> {
    let values = frame.column_f64(column).unwrap_or_default();
    let mut points: Vec<(IndexKey, Option<f64>)> = frame
        .index_keys()
        .into_iter()
        .zip(values)
        .collect();
    points.sort_by(|a, b| a.0.cmp(&b.0));
    points
}

enum XAxis {
    Continuous {
        min: f64,
        max: f64,
        keys: Vec<IndexKey>,
    },
    Ordinal(Vec<IndexKey>),
}

impl XAxis {
    fn from_keys(keys: BTreeSet<IndexKey>) -> Self {
        let keys: Vec<IndexKey> = keys.into_iter().collect();
        let values: Option<Vec<f64>> = keys.iter().map(IndexKey::axis_value).collect();
        match values {
            Some(values) if !values.is_empty() => {
                let min = values.iter().copied().fold(f64::INFINITY, f64::min);
                let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                XAxis::Continuous { min, max, keys }
            }
            _ => XAxis::Ordinal(keys),
        }
    }

    fn keys(&self) -> &[IndexKey] {
        match self {
            XAxis::Continuous { keys, .. } | XAxis::Ordinal(keys) => keys,
        }
    }

    /// Horizontal position in `0..=1`.
    fn fraction(&self, key: &IndexKey) -> Option<f64> {
        match self {
            XAxis::Continuous { min, max, .. } => {
                let value = key.axis_value()?;
                if max > min {
                    Some((value - min) / (max - min))
                } else {
                    Some(0.5)
                }
            }
            XAxis::Ordinal(keys) => {
                let pos = keys.binary_search(key).ok()?;
                if keys.len() > 1 {
                    Some(pos as f64 / (keys.len() - 1) as f64)
                } else {
                    Some(0.5)
                }
            }
        }
    }

    fn ticks(&self) -> Vec<&IndexKey> {
        let keys = self.keys();
        if keys.len() <= X_TICKS {
            return keys.iter().collect();
        }
        let step = (keys.len() - 1) as f64 / (X_TICKS - 1) as f64;
        let mut picked: Vec<usize> = (0..X_TICKS)
            .map(|tick| (tick as f64 * step).round() as usize)
            .collect();
        picked.dedup();
        picked.into_iter().map(|pos| &keys[pos]).collect()
    }
}

struct PlotArea {
    left: f64,
    top: f64,
    width: f64,
    height: f64,
    y_min: f64,
    y_max: f64,
}

impl PlotArea {
    fn project(&self, axis: &XAxis, key: &IndexKey, value: f64) -> Option<(f64, f64)> {
        let fx = axis.fraction(key)?;
        let fy = (value - self.y_min) / (self.y_max - self.y_min);
        let x = self.left + fx * self.width;
        let y = self.top + (1.0 - fy) * self.height;
        Some((x, y))
    }

    fn segments(&self, axis: &XAxis, points: &[(IndexKey, Option<f64>)]) -> Vec<Vec<(f64, f64)>> {
        let mut segments = Vec::new();
        let mut current = Vec::new();
        for (key, value) in points {
            match value.and_then(|v| self.project(axis, key, v)) {
                Some(point) => current.push(point),
                None => {
                    if !current.is_empty() {
                        segments.push(std::mem::take(&mut current));
                    }
                }
            }
        }
        if !current.is_empty() {
            segments.push(current);
        }
        segments
    }
}

fn value_range<'a>(series: impl Iterator<Item = &'a (IndexKey, Option<f64>)>) -> (f64, f64) {
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    let finite = series
        .filter_map(|(_, value)| *value)
        .filter(|value| value.is_finite());
    for value in finite {
        min = min.min(value);
        max = max.max(value);
    }
    if !min.is_finite() {
        return (0.0, 1.0);
    }
    if (max - min).abs() < f64::EPSILON {
        return (min - 1.0, max + 1.0);
    }
    let pad = (max - min) * 0.05;
    (min - pad, max + pad)
}

fn draw_trace(
    doc: &mut SvgDocument,
    area: &PlotArea,
    axis: &XAxis,
    points: &[(IndexKey, Option<f64>)],
    color: Rgb,
) {
    for segment in area.segments(axis, points) {
        if segment.len() == 1 {
            doc.circle(segment[0], 3.0, color);
        } else {
            doc.polyline(&segment, color, 2.0);
        }
    }
}

fn draw_band(doc: &mut SvgDocument, area: &PlotArea, axis: &XAxis, band: &Band, color: Rgb) {
    let mut upper = Vec::new();
    let mut lower = Vec::new();
    for ((key, hi), (_, lo)) in band.upper.iter().zip(&band.lower) {
        if let (Some(hi), Some(lo)) = (hi, lo) {
            let top = area.project(axis, key, *hi);
            let bottom = area.project(axis, key, *lo);
            if let (Some(top), Some(bottom)) = (top, bottom) {
                upper.push(top);
                lower.push(bottom);
            }
        }
    }
    lower.reverse();
    upper.extend(lower);
    doc.polygon(&upper, color, BAND_OPACITY);
}

fn draw_panel(
    doc: &mut SvgDocument,
    origin: (f64, f64),
    size: (f64, f64),
    title: &str,
    history: &[(IndexKey, Option<f64>)],
    traces: &[Trace],
) {
    let mut keys: BTreeSet<IndexKey> = history.iter().map(|(key, _)| key.clone()).collect();
    for trace in traces {
        keys.extend(trace.points.iter().map(|(key, _)| key.clone()));
    }
    let axis = XAxis::from_keys(keys);

    let mut all_points: Vec<&(IndexKey, Option<f64>)> = history.iter().collect();
    for trace in traces {
        all_points.extend(trace.points.iter());
        if let Some(band) = &trace.band {
            all_points.extend(band.lower.iter().chain(band.upper.iter()));
        }
    }
    let (y_min, y_max) = value_range(all_points.into_iter());

    let area = PlotArea {
        left: origin.0 + PLOT_MARGIN_LEFT,
        top: origin.1 + PLOT_MARGIN_TOP,
        width: size.0 - PLOT_MARGIN_LEFT - PLOT_MARGIN_RIGHT,
        height: size.1 - PLOT_MARGIN_TOP - PLOT_MARGIN_BOTTOM,
        y_min,
        y_max,
    };

    doc.text(
        area.left + area.width / 2.0,
        origin.1 + PLOT_MARGIN_TOP - 12.0,
        title,
        TextStyle::new(14.0, Anchor::Middle).bold(),
    );
    doc.rect(
        area.left,
        area.top,
        area.width,
        area.height,
        "#FFFFFF",
        Some("#444444"),
    );

    for tick in 0..Y_TICKS {
        let value = y_min + (y_max - y_min) * tick as f64 / (Y_TICKS - 1) as f64;
        let y = area.top + area.height * (1.0 - tick as f64 / (Y_TICKS - 1) as f64);
        if tick > 0 && tick < Y_TICKS - 1 {
            doc.line((area.left, y), (area.left + area.width, y), "#E5E5E5", 1.0);
        }
        let label = tick_label(value);
        let style = TextStyle::new(10.0, Anchor::End);
        doc.text(area.left - 6.0, y + 4.0, &label, style);
    }
    for key in axis.ticks() {
        if let Some(fx) = axis.fraction(key) {
            let x = area.left + fx * area.width;
            let bottom = area.top + area.height;
            doc.line((x, bottom), (x, bottom + 4.0), "#444444", 1.0);
            let style = TextStyle::new(10.0, Anchor::Middle);
            doc.text(x, bottom + 18.0, &key.label(), style);
        }
    }

    for trace in traces {
        if let Some(band) = &trace.band {
            draw_band(doc, &area, &axis, band, trace.color);
        }
    }
    draw_trace(doc, &area, &axis, history, HISTORICAL_COLOR);
    for trace in traces {
        draw_trace(doc, &area, &axis, &trace.points, trace.color);
    }
}

fn draw_legend(doc: &mut SvgDocument, entries: &[(String, Rgb, bool)]) {
    let mut x = 20.0;
    let y = 46.0;
    for (label, color, is_band) in entries {
        if *is_band {
            let swatch = [
                (x, y - 6.0),
                (x + 22.0, y - 6.0),
                (x + 22.0, y + 2.0),
                (x, y + 2.0),
            ];
            doc.polygon(&swatch, *color, BAND_OPACITY);
        } else {
            doc.polyline(&[(x, y - 2.0), (x + 22.0, y - 2.0)], *color, 2.0);
        }
        let style = TextStyle::new(11.0, Anchor::Start);
        doc.text(x + 28.0, y + 2.0, label, style);
        x += 48.0 + label.chars().count() as f64 * 6.5;
    }
}

/// Draws every target's recent history next to its forecast(s), one subplot
/// per historical column, returning an SVG document.
pub fn forecast_chart(
    historical: &Frame,
    predictions: &PredictionSeries,
    options: &ForecastChartOptions,
) -> ClientResult<String> {
    let entries = predictions.entries();
    validate(historical, &entries)?;

    let prediction_rows = entries
        .iter()
        .map(|(_, frame)| frame.len())
        .max()
        .unwrap_or(0);
    let window = history_window(
        historical.len(),
        prediction_rows,
        options.observation_length,
    );
    let history = historical.tail(window);

    let targets = historical.columns.clone();
    let (rows, cols) = grid_shape(targets.len());
    let mut doc = SvgDocument::new(
        options.panel_width * cols as f64,
        HEADER_HEIGHT + options.panel_height * rows as f64,
    );
    let title_style = TextStyle::new(18.0, Anchor::Middle).bold();
    doc.text(doc.width() / 2.0, 24.0, &options.title, title_style);

    let mut legend = vec![("Historical".to_string(), HISTORICAL_COLOR, false)];
    for (series_index, (name, frame)) in entries.iter().enumerate() {
        let color = series_color(series_index);
        legend.push((name.to_string(), color, false));
        if let Some(level) = interval_level(frame) {
            legend.push((format!("{name} {level}% interval"), color, true));
        }
    }
    draw_legend(&mut doc, &legend);

    for (target_index, target) in targets.iter().enumerate() {
        let traces: Vec<Trace> = entries
            .iter()
            .enumerate()
            .map(|(series_index, (_, frame))| {
                let by_name = format!("{target}{PREDICTED_SUFFIX}");
                let column = if frame.has_column(&by_name) {
                    by_name
                } else {
                    predicted_columns(frame)[target_index].to_string()
                };
                let band = interval_level(frame).and_then(|level| {
                    let lo = format!("{column}-lo-{level}");
                    let hi = format!("{column}-hi-{level}");
                    (frame.has_column(&lo) && frame.has_column(&hi)).then(|| Band {
                        lower: keyed_column(frame, &lo),
                        upper: keyed_column(frame, &hi),
                    })
                });
                Trace {
                    color: series_color(series_index),
                    points: keyed_column(frame, &column),
                    band,
                }
            })
            .collect();

        let origin = (
            (target_index % cols) as f64 * options.panel_width,
            HEADER_HEIGHT + (target_index / cols) as f64 * options.panel_height,
        );
        draw_panel(
            &mut doc,
            origin,
            (options.panel_width, options.panel_height),
            target,
            &keyed_column(&history, target),
            &traces,
        );
    }

    tracing::debug!(
        targets = targets.len(),
        series = entries.len(),
        window,
        "forecast chart rendered"
    );
    Ok(doc.finish())
}
