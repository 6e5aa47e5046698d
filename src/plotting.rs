use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, ensure};
use ndarray::Array2;
use plotters::coord::Shift;
use plotters::prelude::*;
use plotters::style::text_anchor::{HPos, Pos, VPos};
use serde::Deserialize;

use crate::grid::{BinGrid, GridScale};

const CANVAS_SIZE: (u32, u32) = (680, 540);
const HEATMAP_CANVAS: (u32, u32) = (780, 540);
const COLOR_BAR_WIDTH: u32 = 120;
const COLOR_BAR_STEPS: usize = 100;

/// Image files a figure is rendered into; `None` skips that format.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FigureTargets {
    pub png: Option<PathBuf>,
    pub svg: Option<PathBuf>,
}

impl FigureTargets {
    pub fn is_empty(&self) -> bool {
        self.png.is_none() && self.svg.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AxisScale {
    #[default]
    Linear,
    Log,
}

impl From<GridScale> for AxisScale {
    fn from(scale: GridScale) -> Self {
        match scale {
            GridScale::Linear => AxisScale::Linear,
            GridScale::Log => AxisScale::Log,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorPalette {
    #[default]
    Rainbow,
    Gray,
}

impl ColorPalette {
    /// Colour for a normalised value in `[0, 1]`.
    fn color(self, fraction: f64) -> RGBAColor {
        let fraction = fraction.clamp(0.0, 1.0);
        match self {
            ColorPalette::Rainbow => HSLColor((1.0 - fraction) * 0.7, 1.0, 0.5).to_rgba(),
            ColorPalette::Gray => {
                let level = ((1.0 - fraction) * 255.0).round() as u8;
                RGBColor(level, level, level).to_rgba()
            }
        }
    }
}

/// How tick values along the x axis are printed.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum TickFormat {
    #[default]
    Number,
    /// Axis in minutes since the run started, labelled as `HH:MM` local time.
    TimeOfDay { start_minutes: f64 },
}

#[derive(Debug, Clone)]
pub struct Series {
    pub label: String,
    pub points: Vec<(f64, f64)>,
}

impl Series {
    pub fn new(label: impl Into<String>, x: &[f64], y: &[f64]) -> Self {
        Self {
            label: label.into(),
            points: x.iter().copied().zip(y.iter().copied()).collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LineChart {
    pub title: String,
    pub x_label: String,
    pub y_label: String,
    pub x_scale: AxisScale,
    pub y_scale: AxisScale,
    pub x_ticks: TickFormat,
    pub series: Vec<Series>,
}

/// Cell values over two bin grids, shape `(x_grid.n_bin, y_grid.n_bin)`.
#[derive(Debug, Clone)]
pub struct Heatmap {
    pub title: String,
    pub x_label: String,
    pub y_label: String,
    pub color_label: String,
    pub x_grid: BinGrid,
    pub y_grid: BinGrid,
    pub x_ticks: TickFormat,
    pub values: Array2<f64>,
    pub color_scale: AxisScale,
    pub palette: ColorPalette,
    /// Top of the colour range as a fraction of the largest value; larger cells saturate.
    pub color_max_fraction: f64,
}

#[derive(Debug, Clone, Copy)]
struct AxisMap {
    scale: AxisScale,
    ticks: TickFormat,
}

impl AxisMap {
    fn new(scale: AxisScale, ticks: TickFormat) -> Self {
        Self { scale, ticks }
    }

    fn coord(&self, value: f64) -> Option<f64> {
        match self.scale {
            AxisScale::Linear => value.is_finite().then_some(value),
            AxisScale::Log => (value.is_finite() && value > 0.0).then(|| value.log10()),
        }
    }

    fn label(&self, coord: f64) -> String {
        match (self.scale, self.ticks) {
            (AxisScale::Log, _) => format_log_tick(10f64.powf(coord)),
            (AxisScale::Linear, TickFormat::TimeOfDay { start_minutes }) => {
                format_time_of_day(start_minutes + coord)
            }
            (AxisScale::Linear, TickFormat::Number) => format_decimal_tick(coord),
        }
    }

    /// Axis bounds in coordinate space: padded for linear axes, whole decades for log axes.
    fn bounds(&self, coords: impl Iterator<Item = f64>) -> (f64, f64) {
        let (min, max) = min_max(coords);
        match self.scale {
            AxisScale::Linear => {
                let pad = (max - min) * 0.05;
                (min - pad, max + pad)
            }
            AxisScale::Log => {
                let lower = min.floor();
                let upper = max.ceil();
                if upper > lower {
                    (lower, upper)
                } else {
                    (lower, lower + 1.0)
                }
            }
        }
    }
}

pub fn render_line_chart(chart: &LineChart, targets: &FigureTargets) -> Result<()> {
    if targets.is_empty() {
        return Ok(());
    }
    ensure!(
        chart.series.iter().any(|series| !series.points.is_empty()),
        "No data available for plot '{}'",
        chart.title
    );

    if let Some(path) = &targets.png {
        ensure_parent(path)?;
        let backend = BitMapBackend::new(path, CANVAS_SIZE);
        draw_line_chart(backend.into_drawing_area(), chart)?;
    }

    if let Some(path) = &targets.svg {
        ensure_parent(path)?;
        let backend = SVGBackend::new(path, CANVAS_SIZE);
        draw_line_chart(backend.into_drawing_area(), chart)?;
    }

    Ok(())
}

pub fn render_heatmap(heatmap: &Heatmap, targets: &FigureTargets) -> Result<()> {
    if targets.is_empty() {
        return Ok(());
    }
    ensure!(
        heatmap.values.dim() == (heatmap.x_grid.n_bin, heatmap.y_grid.n_bin),
        "Heatmap '{}' has shape {:?} but its grids have {} x {} bins",
        heatmap.title,
        heatmap.values.dim(),
        heatmap.x_grid.n_bin,
        heatmap.y_grid.n_bin
    );
    ensure!(
        heatmap.values.iter().any(|value| value.is_finite()),
        "No data available for heatmap '{}'",
        heatmap.title
    );

    if let Some(path) = &targets.png {
        ensure_parent(path)?;
        let backend = BitMapBackend::new(path, HEATMAP_CANVAS);
        draw_heatmap(backend.into_drawing_area(), heatmap)?;
    }

    if let Some(path) = &targets.svg {
        ensure_parent(path)?;
        let backend = SVGBackend::new(path, HEATMAP_CANVAS);
        draw_heatmap(backend.into_drawing_area(), heatmap)?;
    }

    Ok(())
}

fn draw_title<DB: DrawingBackend>(area: &DrawingArea<DB, Shift>, title: &str) -> Result<()>
where
    DB::ErrorType: 'static,
{
    let title_style = ("sans-serif", 28)
        .into_text_style(area)
        .pos(Pos::new(HPos::Center, VPos::Center));
    let dims = area.dim_in_pixel();
    area.draw_text(title, &title_style, (dims.0 as i32 / 2, dims.1 as i32 / 2))?;
    Ok(())
}

fn draw_line_chart<DB: DrawingBackend>(
    drawing_area: DrawingArea<DB, Shift>,
    chart: &LineChart,
) -> Result<()>
where
    DB::ErrorType: 'static,
{
    let x_axis = AxisMap::new(chart.x_scale, chart.x_ticks);
    let y_axis = AxisMap::new(chart.y_scale, TickFormat::Number);

    let series: Vec<(&str, Vec<(f64, f64)>)> = chart
        .series
        .iter()
        .map(|series| {
            let points = series
                .points
                .iter()
                .filter_map(|&(x, y)| Some((x_axis.coord(x)?, y_axis.coord(y)?)))
                .collect();
            (series.label.as_str(), points)
        })
        .collect();

    let (x_lower, x_upper) =
        x_axis.bounds(series.iter().flat_map(|(_, points)| points.iter().map(|p| p.0)));
    let (y_lower, y_upper) =
        y_axis.bounds(series.iter().flat_map(|(_, points)| points.iter().map(|p| p.1)));

    let root = drawing_area;
    root.fill(&WHITE)?;

    let (title_area, chart_area) = root.split_vertically(36);
    draw_title(&title_area, &chart.title)?;

    let mut context = ChartBuilder::on(&chart_area)
        .margin_left(52)
        .margin_right(18)
        .margin_bottom(40)
        .margin_top(6)
        .set_label_area_size(LabelAreaPosition::Left, 58)
        .set_label_area_size(LabelAreaPosition::Bottom, 45)
        .build_cartesian_2d(x_lower..x_upper, y_lower..y_upper)?;

    context
        .configure_mesh()
        .disable_mesh()
        .x_desc(chart.x_label.as_str())
        .y_desc(chart.y_label.as_str())
        .x_label_formatter(&|value| x_axis.label(*value))
        .y_label_formatter(&|value| y_axis.label(*value))
        .label_style(("sans-serif", 18))
        .axis_desc_style(("sans-serif", 20))
        .draw()?;

    for (index, (label, points)) in series.iter().enumerate() {
        let color = Palette99::pick(index).to_rgba();
        context
            .draw_series(LineSeries::new(points.iter().copied(), color.stroke_width(2)))?
            .label(*label)
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color.stroke_width(2)));
    }

    if series.len() > 1 {
        context
            .configure_series_labels()
            .background_style(&WHITE.mix(0.8))
            .border_style(&BLACK)
            .label_font(("sans-serif", 16))
            .draw()?;
    }

    context.draw_series(std::iter::once(PathElement::new(
        vec![
            (x_lower, y_lower),
            (x_upper, y_lower),
            (x_upper, y_upper),
            (x_lower, y_upper),
            (x_lower, y_lower),
        ],
        &BLACK,
    )))?;

    chart_area
        .present()
        .map_err(|e| anyhow!("Failed to render line chart: {:?}", e))?;
    Ok(())
}

/// Colour range of a heatmap in colour-coordinate space (log10 for log scaling).
fn color_range(heatmap: &Heatmap) -> (f64, f64) {
    let finite = heatmap.values.iter().copied().filter(|value| value.is_finite());
    match heatmap.color_scale {
        AxisScale::Linear => {
            let max = finite.fold(0.0_f64, f64::max) * heatmap.color_max_fraction;
            (0.0, if max > 0.0 { max } else { 1.0 })
        }
        AxisScale::Log => {
            let positive: Vec<f64> = finite.filter(|value| *value > 0.0).collect();
            let min = positive.iter().copied().fold(f64::INFINITY, f64::min);
            let max = positive.iter().copied().fold(0.0_f64, f64::max);
            let upper = (max * heatmap.color_max_fraction).max(min);
            if positive.is_empty() {
                (0.0, 1.0)
            } else if upper > min {
                (min.log10(), upper.log10())
            } else {
                (min.log10() - 0.5, min.log10() + 0.5)
            }
        }
    }
}

fn draw_heatmap<DB: DrawingBackend>(
    drawing_area: DrawingArea<DB, Shift>,
    heatmap: &Heatmap,
) -> Result<()>
where
    DB::ErrorType: 'static,
{
    let x_axis = AxisMap::new(heatmap.x_grid.scale.into(), heatmap.x_ticks);
    let y_axis = AxisMap::new(heatmap.y_grid.scale.into(), TickFormat::Number);
    let color_axis = AxisMap::new(heatmap.color_scale, TickFormat::Number);

    let x_edges: Vec<f64> = heatmap
        .x_grid
        .edges()
        .into_iter()
        .filter_map(|edge| x_axis.coord(edge))
        .collect();
    let y_edges: Vec<f64> = heatmap
        .y_grid
        .edges()
        .into_iter()
        .filter_map(|edge| y_axis.coord(edge))
        .collect();
    let (Some(&x_lower), Some(&x_upper)) = (x_edges.first(), x_edges.last()) else {
        return Err(anyhow!("Heatmap '{}' has no x edges", heatmap.title));
    };
    let (Some(&y_lower), Some(&y_upper)) = (y_edges.first(), y_edges.last()) else {
        return Err(anyhow!("Heatmap '{}' has no y edges", heatmap.title));
    };

    let (color_lower, color_upper) = color_range(heatmap);
    let normalise = |value: f64| -> Option<f64> {
        let coord = color_axis.coord(value)?;
        Some((coord - color_lower) / (color_upper - color_lower))
    };

    let root = drawing_area;
    root.fill(&WHITE)?;

    let (title_area, body_area) = root.split_vertically(36);
    draw_title(&title_area, &heatmap.title)?;

    let body_width = body_area.dim_in_pixel().0;
    let (map_area, bar_area) =
        body_area.split_horizontally(body_width.saturating_sub(COLOR_BAR_WIDTH));

    let mut context = ChartBuilder::on(&map_area)
        .margin_left(52)
        .margin_right(12)
        .margin_bottom(40)
        .margin_top(6)
        .set_label_area_size(LabelAreaPosition::Left, 58)
        .set_label_area_size(LabelAreaPosition::Bottom, 45)
        .build_cartesian_2d(x_lower..x_upper, y_lower..y_upper)?;

    context
        .configure_mesh()
        .disable_mesh()
        .x_desc(heatmap.x_label.as_str())
        .y_desc(heatmap.y_label.as_str())
        .x_label_formatter(&|value| x_axis.label(*value))
        .y_label_formatter(&|value| y_axis.label(*value))
        .label_style(("sans-serif", 18))
        .axis_desc_style(("sans-serif", 20))
        .draw()?;

    let cells = heatmap.values.indexed_iter().filter_map(|((i, j), &value)| {
        let fraction = normalise(value)?;
        Some(Rectangle::new(
            [(x_edges[i], y_edges[j]), (x_edges[i + 1], y_edges[j + 1])],
            heatmap.palette.color(fraction).filled(),
        ))
    });
    context.draw_series(cells)?;

    context.draw_series(std::iter::once(PathElement::new(
        vec![
            (x_lower, y_lower),
            (x_upper, y_lower),
            (x_upper, y_upper),
            (x_lower, y_upper),
            (x_lower, y_lower),
        ],
        &BLACK,
    )))?;

    let mut bar = ChartBuilder::on(&bar_area)
        .margin_left(8)
        .margin_right(4)
        .margin_top(6)
        .margin_bottom(85)
        .set_label_area_size(LabelAreaPosition::Right, 70)
        .build_cartesian_2d(0.0..1.0, color_lower..color_upper)?;

    bar.configure_mesh()
        .disable_mesh()
        .disable_x_axis()
        .y_desc(heatmap.color_label.as_str())
        .y_label_formatter(&|value| color_axis.label(*value))
        .label_style(("sans-serif", 14))
        .axis_desc_style(("sans-serif", 16))
        .draw()?;

    let step = (color_upper - color_lower) / COLOR_BAR_STEPS as f64;
    bar.draw_series((0..COLOR_BAR_STEPS).map(|k| {
        let bottom = color_lower + step * k as f64;
        let fraction = (k as f64 + 0.5) / COLOR_BAR_STEPS as f64;
        Rectangle::new(
            [(0.0, bottom), (1.0, bottom + step)],
            heatmap.palette.color(fraction).filled(),
        )
    }))?;

    root.present()
        .map_err(|e| anyhow!("Failed to render heatmap: {:?}", e))?;
    Ok(())
}

fn min_max<I>(values: I) -> (f64, f64)
where
    I: Iterator<Item = f64>,
{
    let mut iter = values.peekable();
    if iter.peek().is_none() {
        return (0.0, 1.0);
    }

    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for val in iter {
        min = min.min(val);
        max = max.max(val);
    }

    if (max - min).abs() < f64::EPSILON {
        let epsilon = if min.abs() < 1.0 {
            1.0
        } else {
            min.abs() * 0.05
        };
        (min - epsilon, max + epsilon)
    } else {
        (min, max)
    }
}

fn format_log_tick(value: f64) -> String {
    if !value.is_finite() || value <= 0.0 {
        return "0".into();
    }

    let log10 = value.log10();
    let exponent = log10.round();
    if (log10 - exponent).abs() < 5e-4 {
        format!("1e{}", exponent as i32)
    } else {
        format!("{:.1e}", value)
    }
}

fn format_decimal_tick(value: f64) -> String {
    if value != 0.0 && (value.abs() >= 1e4 || value.abs() < 1e-3) {
        format!("{:.1e}", value)
    } else {
        format!("{:.6}", value)
            .trim_end_matches('0')
            .trim_end_matches('.')
            .to_string()
    }
}

fn format_time_of_day(minutes: f64) -> String {
    let minutes = minutes.round().rem_euclid(24.0 * 60.0) as i64;
    format!("{:02}:{:02}", minutes / 60, minutes % 60)
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create plot directory {}", parent.display()))?;
        }
    }
    Ok(())
}
