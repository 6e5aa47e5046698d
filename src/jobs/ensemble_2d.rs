use anyhow::Result;
use ndarray::Array2;
use serde_json::json;
use tracing::{info, warn};

use crate::config::{Ensemble2dSettings, PlotSettings};
use crate::ensemble::{member_stats, stack_2d};
use crate::histogram::histogram_2d;
use crate::output::ArtifactWriter;
use crate::plotting::{AxisScale, TickFormat, render_heatmap};
use crate::snapshot::read_snapshot;

use super::{HeatmapLabels, JobReport, heatmap};

fn has_finite_cell(values: &Array2<f64>) -> bool {
    values.iter().any(|value| value.is_finite())
}

/// Two-quantity density per ensemble member, reduced to mean, spread and variation.
pub fn run(settings: &Ensemble2dSettings) -> Result<JobReport> {
    let x_grid = &settings.x.grid;
    let y_grid = &settings.y.grid;
    let paths = settings.input.paths();

    let mut members = Vec::with_capacity(paths.len());
    for (index, path) in paths.iter().enumerate() {
        let snapshot = read_snapshot(path)?;
        let particles = settings.filter.apply(&snapshot.particles)?;
        let x_values = settings.x.quantity.evaluate(&particles, &snapshot.env)?;
        let y_values = settings.y.quantity.evaluate(&particles, &snapshot.env)?;
        let weights = settings.weight.evaluate(&particles)?;

        let histogram = histogram_2d(
            &x_values,
            &y_values,
            &weights,
            x_grid,
            y_grid,
            settings.out_of_range,
        )?;
        info!(
            member = index + 1,
            file = %path.display(),
            particles = particles.n_particles(),
            dropped_weight = histogram.dropped_weight,
            "binned ensemble member"
        );
        members.push(histogram.to_density());
    }

    let stats = member_stats(&stack_2d(&members)?)?;

    let mut writer = ArtifactWriter::new(&settings.output)?;
    writer.vector_txt("x_edges.txt", &x_grid.edges())?;
    writer.vector_txt("y_edges.txt", &y_grid.edges())?;
    writer.matrix_txt("mean.txt", stats.mean.view())?;
    writer.matrix_txt("std.txt", stats.std.view())?;
    writer.matrix_txt("cv.txt", stats.cv.view())?;

    let x_label = settings.x.quantity.label();
    let y_label = settings.y.quantity.label();
    let mean_title = format!("Mean {} density", settings.weight.label());
    let color_label = format!("{} density", settings.weight.label());
    let mean_map = heatmap(
        HeatmapLabels {
            title: &mean_title,
            x: &x_label,
            y: &y_label,
            color: &color_label,
        },
        *x_grid,
        *y_grid,
        TickFormat::Number,
        stats.mean.clone(),
        &settings.plot,
    );
    let targets = writer.figure("mean");
    render_heatmap(&mean_map, &targets)?;

    let cv_plot = PlotSettings {
        color_scale: AxisScale::Linear,
        color_max_fraction: 1.0,
        ..settings.plot
    };
    let cv_map = heatmap(
        HeatmapLabels {
            title: "Coefficient of variation",
            x: &x_label,
            y: &y_label,
            color: "std / mean",
        },
        *x_grid,
        *y_grid,
        TickFormat::Number,
        stats.cv.clone(),
        &cv_plot,
    );
    if has_finite_cell(&stats.cv) {
        let targets = writer.figure("cv");
        render_heatmap(&cv_map, &targets)?;
    } else {
        warn!("every cell mean is zero; skipping the coefficient of variation figure");
    }

    let summary = vec![
        format!("members: {}", stats.members),
        format!(
            "masked cells: {} of {}",
            stats.masked_bins(),
            stats.cv.len()
        ),
    ];
    let outputs = writer.finish(
        "ensemble-2d",
        paths,
        json!({
            "x_quantity": x_label,
            "y_quantity": y_label,
            "x_grid": x_grid,
            "y_grid": y_grid,
            "weight": settings.weight.label(),
            "members": stats.members,
        }),
    )?;

    Ok(JobReport {
        job: "ensemble-2d",
        summary,
        outputs,
    })
}
