//! SVG charts of train, test and forecast curves

use crate::error::{ForecastError, Result};
use plotters::prelude::*;
use std::fs;
use std::ops::Range;
use std::path::Path;

const CHART_SIZE: (u32, u32) = (1024, 640);
const ORANGE: RGBColor = RGBColor(255, 165, 0);

/// Everything drawn on one forecast chart
#[derive(Debug, Clone, PartialEq)]
pub struct ForecastChart {
    pub title: String,
    pub x_label: String,
    pub y_label: String,
    pub train: Vec<f64>,
    /// Observations following `train`
    pub test: Vec<f64>,
    /// Forecast aligned with `test`
    pub forecast: Vec<f64>,
}

impl ForecastChart {
    fn series(&self) -> [(&'static str, RGBColor, Vec<(f64, f64)>); 3] {
        let offset = self.train.len();
        let indexed = |values: &[f64], start: usize| -> Vec<(f64, f64)> {
            values
                .iter()
                .enumerate()
                .map(|(i, v)| ((start + i) as f64, *v))
                .collect()
        };
        [
            ("Train", BLUE, indexed(&self.train, 0)),
            ("Test", ORANGE, indexed(&self.test, offset)),
            ("Prediction", GREEN, indexed(&self.forecast, offset)),
        ]
    }

    fn y_range(&self) -> Range<f64> {
        let (lo, hi) = self
            .train
            .iter()
            .chain(&self.test)
            .chain(&self.forecast)
            .filter(|v| v.is_finite())
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
        if !lo.is_finite() {
            return 0.0..1.0;
        }
        let pad = if hi > lo { (hi - lo) * 0.05 } else { lo.abs().max(1.0) * 0.1 };
        (lo - pad)..(hi + pad)
    }

    fn x_range(&self) -> Range<f64> {
        let points = self.train.len() + self.test.len().max(self.forecast.len());
        0.0..(points.max(2) - 1) as f64
    }
}

fn draw_error<E: std::fmt::Display>(err: E) -> ForecastError {
    ForecastError::Visualization(err.to_string())
}

/// Render `chart` to an SVG file, replacing any previous file at `path`
pub fn render_forecast_chart(path: &Path, chart: &ForecastChart) -> Result<()> {
    if path.exists() {
        fs::remove_file(path)?;
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let root = SVGBackend::new(path, CHART_SIZE).into_drawing_area();
    root.fill(&WHITE).map_err(draw_error)?;

    let mut ctx = ChartBuilder::on(&root)
        .caption(&chart.title, ("sans-serif", 24))
        .margin(16)
        .x_label_area_size(48)
        .y_label_area_size(64)
        .build_cartesian_2d(chart.x_range(), chart.y_range())
        .map_err(draw_error)?;

    ctx.configure_mesh()
        .x_desc(chart.x_label.as_str())
        .y_desc(chart.y_label.as_str())
        .draw()
        .map_err(draw_error)?;

    for (label, color, points) in chart.series() {
        if points.is_empty() {
            continue;
        }
        ctx.draw_series(LineSeries::new(points, color.stroke_width(2)))
            .map_err(draw_error)?
            .label(label)
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color.stroke_width(2)));
    }

    ctx.configure_series_labels()
        .background_style(&WHITE.mix(0.8))
        .border_style(&BLACK)
        .draw()
        .map_err(draw_error)?;

    root.present().map_err(draw_error)?;
    Ok(())
}
