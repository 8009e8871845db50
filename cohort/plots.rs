//! Static SVG charts of the cleaned student table.

use crate::config::{AnalysisConfig, OutputConfig};
use crate::frame::{float_column, float_values, has_column};
use ndarray::Array2;
use plotters::prelude::*;
use polars::prelude::{DataFrame, PolarsError};
use std::collections::BTreeMap;
use std::fmt::Display;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

const CHART_SIZE: (u32, u32) = (900, 650);
const HEATMAP_SIZE: (u32, u32) = (1100, 1000);
const HISTOGRAM_BINS: usize = 10;

#[derive(Error, Debug)]
pub enum PlotError {
    #[error("Column '{0}' is required for plotting but is missing")]
    MissingColumn(String),
    #[error("Column '{0}' has no finite values to plot")]
    EmptySeries(String),
    #[error("Failed to render chart: {0}")]
    Render(String),
    #[error("I/O error while writing charts: {0}")]
    Io(#[from] std::io::Error),
    #[error("Polars error while preparing chart data: {0}")]
    Polars(#[from] PolarsError),
}

fn render_error(e: impl Display) -> PlotError {
    PlotError::Render(e.to_string())
}

/// Where [`render_all`] wrote each chart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlotPaths {
    pub grade_distribution: PathBuf,
    pub correlation_heatmap: PathBuf,
    pub studytime_boxplot: PathBuf,
}

/// Renders the three charts into the results directory, creating it if
/// needed and overwriting earlier files.
pub fn render_all(
    df: &DataFrame,
    analysis: &AnalysisConfig,
    output: &OutputConfig,
) -> Result<PlotPaths, PlotError> {
    fs::create_dir_all(&output.results_dir)?;
    let paths = PlotPaths {
        grade_distribution: output.grade_distribution_path(),
        correlation_heatmap: output.correlation_heatmap_path(),
        studytime_boxplot: output.studytime_boxplot_path(),
    };

    plot_grade_distribution(df, &analysis.grade_column, &paths.grade_distribution)?;
    plot_correlation_heatmap(df, &paths.correlation_heatmap)?;
    plot_grade_by_group(
        df,
        &analysis.studytime_column,
        &analysis.grade_column,
        &paths.studytime_boxplot,
    )?;

    log::info!("Charts written to {}", output.results_dir.display());
    Ok(paths)
}

fn finite_values(df: &DataFrame, column: &str) -> Result<Vec<f64>, PlotError> {
    if !has_column(df, column) {
        return Err(PlotError::MissingColumn(column.to_string()));
    }
    let values: Vec<f64> = float_column(df, column)?
        .into_iter()
        .flatten()
        .filter(|v| v.is_finite())
        .collect();
    if values.is_empty() {
        return Err(PlotError::EmptySeries(column.to_string()));
    }
    Ok(values)
}

/// Counts of `values` in `bins` equal-width bins spanning `[lo, hi]`; the last
/// bin is closed on the right. Zero bins give an empty result.
pub fn histogram_counts(values: &[f64], bins: usize, lo: f64, hi: f64) -> Vec<usize> {
    if bins == 0 {
        return Vec::new();
    }
    let mut counts = vec![0; bins];
    let width = (hi - lo) / bins as f64;
    for &v in values {
        let bin = if width > 0.0 {
            (((v - lo) / width).floor() as usize).min(bins - 1)
        } else {
            0
        };
        counts[bin] += 1;
    }
    counts
}

pub fn plot_grade_distribution(df: &DataFrame, grade_column: &str, path: &Path) -> Result<(), PlotError> {
    let grades = finite_values(df, grade_column)?;
    let lo = grades.iter().copied().fold(f64::INFINITY, f64::min);
    let mut hi = grades.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if hi <= lo {
        hi = lo + 1.0;
    }
    let counts = histogram_counts(&grades, HISTOGRAM_BINS, lo, hi);
    let width = (hi - lo) / HISTOGRAM_BINS as f64;
    let top = counts.iter().copied().max().unwrap_or(0) as f64 * 1.1 + 1.0;

    let root = SVGBackend::new(path, CHART_SIZE).into_drawing_area();
    root.fill(&WHITE).map_err(render_error)?;
    let mut chart = ChartBuilder::on(&root)
        .caption(format!("Distribution of final grade ({grade_column})"), ("sans-serif", 26))
        .margin(15)
        .x_label_area_size(45)
        .y_label_area_size(55)
        .build_cartesian_2d(lo..hi, 0f64..top)
        .map_err(render_error)?;
    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_desc(grade_column)
        .y_desc("Students")
        .draw()
        .map_err(render_error)?;
    chart
        .draw_series(counts.iter().enumerate().map(|(i, &count)| {
            let x0 = lo + i as f64 * width;
            Rectangle::new([(x0, 0.0), (x0 + width, count as f64)], BLUE.mix(0.6).filled())
        }))
        .map_err(render_error)?;
    root.present().map_err(render_error)?;
    log::debug!("Wrote {}", path.display());
    Ok(())
}

/// Pearson correlations between the numeric columns of a table.
#[derive(Debug, Clone, PartialEq)]
pub struct CorrelationMatrix {
    pub names: Vec<String>,
    /// `NaN` where a column pair has fewer than two complete rows or no variance.
    pub values: Array2<f64>,
}

/// Correlates every numeric (non-text, non-boolean) column pair over the rows
/// where both values are present.
pub fn numeric_correlation(df: &DataFrame) -> Result<CorrelationMatrix, PlotError> {
    let mut names = Vec::new();
    let mut series = Vec::new();
    for column in df.get_columns() {
        if column.dtype().is_primitive_numeric() {
            names.push(column.name().to_string());
            series.push(float_values(column)?);
        }
    }

    let n = names.len();
    let mut values = Array2::<f64>::from_elem((n, n), f64::NAN);
    for i in 0..n {
        for j in i..n {
            let r = pearson(&series[i], &series[j]);
            values[[i, j]] = r;
            values[[j, i]] = r;
        }
    }
    Ok(CorrelationMatrix { names, values })
}

fn pearson(a: &[Option<f64>], b: &[Option<f64>]) -> f64 {
    let pairs: Vec<(f64, f64)> = a
        .iter()
        .zip(b)
        .filter_map(|(x, y)| Some(((*x)?, (*y)?)))
        .filter(|(x, y)| x.is_finite() && y.is_finite())
        .collect();
    if pairs.len() < 2 {
        return f64::NAN;
    }
    let n = pairs.len() as f64;
    let mean_x = pairs.iter().map(|p| p.0).sum::<f64>() / n;
    let mean_y = pairs.iter().map(|p| p.1).sum::<f64>() / n;
    let (mut sxy, mut sxx, mut syy) = (0.0, 0.0, 0.0);
    for (x, y) in &pairs {
        sxy += (x - mean_x) * (y - mean_y);
        sxx += (x - mean_x).powi(2);
        syy += (y - mean_y).powi(2);
    }
    if sxx == 0.0 || syy == 0.0 {
        return f64::NAN;
    }
    (sxy / (sxx * syy).sqrt()).clamp(-1.0, 1.0)
}

/// Blue at -1, white at 0, red at +1; grey for undefined cells.
fn diverging_color(r: f64) -> RGBColor {
    if !r.is_finite() {
        return RGBColor(200, 200, 200);
    }
    let (cold, hot) = ((59.0, 76.0, 192.0), (180.0, 4.0, 38.0));
    let (end, t) = if r < 0.0 { (cold, -r) } else { (hot, r) };
    let t = t.min(1.0);
    let mix = |channel: f64| (255.0 + (channel - 255.0) * t).round() as u8;
    RGBColor(mix(end.0), mix(end.1), mix(end.2))
}

pub fn plot_correlation_heatmap(df: &DataFrame, path: &Path) -> Result<(), PlotError> {
    let matrix = numeric_correlation(df)?;
    let n = matrix.names.len();
    if n == 0 {
        return Err(PlotError::EmptySeries("numeric columns".to_string()));
    }
    let side = n as i32;

    let root = SVGBackend::new(path, HEATMAP_SIZE).into_drawing_area();
    root.fill(&WHITE).map_err(render_error)?;
    let mut chart = ChartBuilder::on(&root)
        .caption("Correlation of numeric fields", ("sans-serif", 26))
        .margin(15)
        .x_label_area_size(90)
        .y_label_area_size(90)
        .build_cartesian_2d((0..side).into_segmented(), (0..side).into_segmented())
        .map_err(render_error)?;

    let x_label = |v: &SegmentValue<i32>| match v {
        SegmentValue::CenterOf(k) => matrix.names.get(*k as usize).cloned().unwrap_or_default(),
        _ => String::new(),
    };
    // Row 0 is drawn at the top.
    let y_label = |v: &SegmentValue<i32>| match v {
        SegmentValue::CenterOf(k) => matrix
            .names
            .get((side - 1 - *k) as usize)
            .cloned()
            .unwrap_or_default(),
        _ => String::new(),
    };
    chart
        .configure_mesh()
        .disable_mesh()
        .x_labels(n)
        .y_labels(n)
        .x_label_formatter(&x_label)
        .y_label_formatter(&y_label)
        .x_label_style(("sans-serif", 11))
        .y_label_style(("sans-serif", 11))
        .draw()
        .map_err(render_error)?;

    chart
        .draw_series((0..n).flat_map(|i| (0..n).map(move |j| (i, j))).map(|(i, j)| {
            let row = side - 1 - i as i32;
            let col = j as i32;
            Rectangle::new(
                [
                    (SegmentValue::Exact(col), SegmentValue::Exact(row)),
                    (SegmentValue::Exact(col + 1), SegmentValue::Exact(row + 1)),
                ],
                diverging_color(matrix.values[[i, j]]).filled(),
            )
        }))
        .map_err(render_error)?;
    root.present().map_err(render_error)?;
    log::debug!("Wrote {} ({n}x{n} correlations)", path.display());
    Ok(())
}

/// Box plot of `value_column` for each integer level of `group_column`.
pub fn plot_grade_by_group(
    df: &DataFrame,
    group_column: &str,
    value_column: &str,
    path: &Path,
) -> Result<(), PlotError> {
    for column in [group_column, value_column] {
        if !has_column(df, column) {
            return Err(PlotError::MissingColumn(column.to_string()));
        }
    }
    let levels = float_column(df, group_column)?;
    let values = float_column(df, value_column)?;
    let mut groups: BTreeMap<i32, Vec<f64>> = BTreeMap::new();
    for (level, value) in levels.into_iter().zip(values) {
        if let (Some(level), Some(value)) = (level, value) {
            if level.is_finite() && value.is_finite() {
                groups.entry(level.round() as i32).or_default().push(value);
            }
        }
    }
    let (Some(&lo), Some(&hi)) = (groups.keys().next(), groups.keys().next_back()) else {
        return Err(PlotError::EmptySeries(value_column.to_string()));
    };
    let top = groups
        .values()
        .flatten()
        .copied()
        .fold(f64::NEG_INFINITY, f64::max) as f32
        + 1.0;
    let bottom = groups
        .values()
        .flatten()
        .copied()
        .fold(f64::INFINITY, f64::min)
        .min(0.0) as f32;

    let root = SVGBackend::new(path, CHART_SIZE).into_drawing_area();
    root.fill(&WHITE).map_err(render_error)?;
    let mut chart = ChartBuilder::on(&root)
        .caption(format!("{value_column} by {group_column}"), ("sans-serif", 26))
        .margin(15)
        .x_label_area_size(45)
        .y_label_area_size(55)
        .build_cartesian_2d((lo..hi + 1).into_segmented(), bottom..top)
        .map_err(render_error)?;
    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_desc(group_column)
        .y_desc(value_column)
        .draw()
        .map_err(render_error)?;
    chart
        .draw_series(groups.iter().map(|(&level, values)| {
            Boxplot::new_vertical(SegmentValue::CenterOf(level), &Quartiles::new(values.as_slice()))
                .width(40)
                .style(BLUE)
        }))
        .map_err(render_error)?;
    root.present().map_err(render_error)?;
    log::debug!("Wrote {} ({} groups)", path.display(), groups.len());
    Ok(())
}
