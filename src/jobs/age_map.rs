use anyhow::{Result, anyhow};
use serde_json::json;
use tracing::{info, warn};

use crate::config::AgeMapSettings;
use crate::histogram::{OutOfRange, histogram_2d, multival_2d};
use crate::output::ArtifactWriter;
use crate::plotting::{TickFormat, render_heatmap};
use crate::snapshot::read_snapshot;

use super::{HeatmapLabels, JobReport, heatmap, selected_files};

/// Mean of a per-particle value (particle age by default) in each cell of a 2D grid.
pub fn run(settings: &AgeMapSettings) -> Result<JobReport> {
    let path = selected_files(&settings.input)?
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("age-map input selects no snapshot"))?;
    let snapshot = read_snapshot(&path)?;
    let particles = settings.filter.apply(&snapshot.particles)?;
    let x_values = settings.x.quantity.evaluate(&particles, &snapshot.env)?;
    let y_values = settings.y.quantity.evaluate(&particles, &snapshot.env)?;
    let z_values = settings.value.evaluate(&particles, &snapshot.env)?;

    let x_grid = &settings.x.grid;
    let y_grid = &settings.y.grid;
    let means = multival_2d(&x_values, &y_values, &z_values, x_grid, y_grid)?;
    let ones = vec![1.0; particles.n_particles()];
    let counts = histogram_2d(&x_values, &y_values, &ones, x_grid, y_grid, OutOfRange::Drop)?;

    let filled = means.iter().filter(|value| !value.is_nan()).count();
    info!(
        file = %path.display(),
        particles = particles.n_particles(),
        filled_cells = filled,
        outside = counts.dropped_weight,
        "mapped snapshot"
    );

    let mut writer = ArtifactWriter::new(&settings.output)?;
    writer.vector_txt("x_edges.txt", &x_grid.edges())?;
    writer.vector_txt("y_edges.txt", &y_grid.edges())?;
    writer.matrix_txt("value.txt", means.view())?;
    writer.matrix_txt("count.txt", counts.counts.view())?;

    let x_label = settings.x.quantity.label();
    let y_label = settings.y.quantity.label();
    let value_label = settings.value.label();
    let title = format!("Mean {value_label}");
    let map = heatmap(
        HeatmapLabels {
            title: &title,
            x: &x_label,
            y: &y_label,
            color: &value_label,
        },
        *x_grid,
        *y_grid,
        TickFormat::Number,
        means,
        &settings.plot,
    );
    if filled > 0 {
        let targets = writer.figure("value");
        render_heatmap(&map, &targets)?;
    } else {
        warn!("no particle falls inside the grid; skipping the figure");
    }

    let summary = vec![
        format!("particles: {}", particles.n_particles()),
        format!("filled cells: {filled} of {}", x_grid.n_bin * y_grid.n_bin),
        format!("particles outside the grid: {}", counts.dropped_weight),
    ];
    let outputs = writer.finish(
        "age-map",
        vec![path],
        json!({
            "time": snapshot.time(),
            "x_quantity": x_label,
            "y_quantity": y_label,
            "value": value_label,
            "x_grid": x_grid,
            "y_grid": y_grid,
        }),
    )?;

    Ok(JobReport {
        job: "age-map",
        summary,
        outputs,
    })
}
