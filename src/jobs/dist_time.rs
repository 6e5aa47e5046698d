use anyhow::Result;
use ndarray::Array2;
use serde_json::json;
use tracing::info;

use crate::config::DistTimeSettings;
use crate::histogram::histogram_1d;
use crate::output::ArtifactWriter;
use crate::plotting::{TickFormat, render_heatmap};
use crate::snapshot::read_snapshot;

use super::{HeatmapLabels, JobReport, heatmap, series_files, time_grid};

/// Distribution of one quantity in every snapshot of a series, as a time x bin matrix.
pub fn run(settings: &DistTimeSettings) -> Result<JobReport> {
    let files = series_files(&settings.input)?;
    let grid = &settings.grid;

    let mut dist = Array2::<f64>::zeros((files.len(), grid.n_bin));
    let mut minutes = Vec::with_capacity(files.len());
    let mut start_of_day = 0.0;
    for (row, file) in files.iter().enumerate() {
        let snapshot = read_snapshot(&file.path)?;
        if row == 0 {
            start_of_day = snapshot.env.start_time_of_day;
        }
        let particles = settings.filter.apply(&snapshot.particles)?;
        let values = settings.quantity.evaluate(&particles, &snapshot.env)?;
        let weights = settings.weight.evaluate(&particles)?;
        let histogram = histogram_1d(&values, &weights, grid, settings.out_of_range)?;

        dist.row_mut(row).assign(&histogram.to_density());
        minutes.push(snapshot.env.elapsed_minutes());
        info!(
            file = %file.path.display(),
            minutes = snapshot.env.elapsed_minutes(),
            particles = particles.n_particles(),
            dropped_weight = histogram.dropped_weight,
            "binned snapshot"
        );
    }

    let mut writer = ArtifactWriter::new(&settings.output)?;
    writer.vector_txt("times.txt", &minutes)?;
    writer.vector_txt("edges.txt", &grid.edges())?;
    writer.matrix_txt("dist.txt", dist.view())?;

    let y_label = settings.quantity.label();
    let targets = writer.figure("dist");
    if !targets.is_empty() {
        let color_label = format!("{} density", settings.weight.label());
        let map = heatmap(
            HeatmapLabels {
                title: &format!("{} distribution over time", settings.quantity.label()),
                x: "local standard time (LST) (hours:minutes)",
                y: &y_label,
                color: &color_label,
            },
            time_grid(&minutes)?,
            *grid,
            TickFormat::TimeOfDay {
                start_minutes: start_of_day / 60.0,
            },
            dist,
            &settings.plot,
        );
        render_heatmap(&map, &targets)?;
    }

    let summary = vec![
        format!("snapshots: {}", files.len()),
        format!("bins: {}", grid.n_bin),
    ];
    let outputs = writer.finish(
        "dist-time",
        files.iter().map(|file| file.path.clone()).collect(),
        json!({
            "quantity": y_label,
            "weight": settings.weight.label(),
            "grid": grid,
        }),
    )?;

    Ok(JobReport {
        job: "dist-time",
        summary,
        outputs,
    })
}
