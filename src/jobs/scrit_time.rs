use anyhow::{Result, ensure};
use ndarray::Array2;
use serde_json::json;
use tracing::{info, warn};

use crate::config::ScritTimeSettings;
use crate::grid::{BinGrid, GridScale};
use crate::histogram::{OutOfRange, histogram_1d};
use crate::output::ArtifactWriter;
use crate::plotting::{TickFormat, render_heatmap};
use crate::snapshot::read_snapshot;

use super::{HeatmapLabels, JobReport, heatmap, series_files};

/// Width of a supersaturation bin used to normalise the density: a fraction of one
/// (percent / 100) on linear grids, decades on log grids.
fn supersat_bin_width(grid: &BinGrid) -> f64 {
    match grid.scale {
        GridScale::Linear => grid.grid_size(0) / 100.0,
        GridScale::Log => grid.grid_size(0),
    }
}

fn density_label(grid: &BinGrid) -> &'static str {
    match grid.scale {
        GridScale::Linear => "number conc. per unit supersat. (cm^-3)",
        GridScale::Log => "number conc. per decade of supersat. (cm^-3)",
    }
}

/// Critical supersaturation distribution of the filtered particles over time.
///
/// Each snapshot lands in the time column containing its elapsed time (clipped into
/// the axis); columns hit by several snapshots hold their average, columns hit by
/// none stay zero.
pub fn run(settings: &ScritTimeSettings) -> Result<JobReport> {
    let files = series_files(&settings.input)?;
    let max_minutes = match settings.time_max_minutes {
        Some(max) => max,
        None => files.last().map(|file| file.time / 60.0).unwrap_or(0.0),
    };
    ensure!(
        max_minutes > 0.0,
        "time axis needs a positive end; set time.max_minutes"
    );
    let time_grid = BinGrid::linear(0.0, max_minutes, settings.time_bins)?;
    let y_grid = &settings.supersat_grid;

    let mut densities = Array2::<f64>::zeros((time_grid.n_bin, y_grid.n_bin));
    let mut snapshots_per_column = vec![0usize; time_grid.n_bin];
    let mut start_of_day = 0.0;

    for (index, file) in files.iter().enumerate() {
        let snapshot = read_snapshot(&file.path)?;
        if index == 0 {
            start_of_day = snapshot.env.start_time_of_day;
        }
        let particles = settings.filter.apply(&snapshot.particles)?;
        let supersats = particles.critical_supersats_percent(&snapshot.env)?;
        let width = supersat_bin_width(y_grid);
        let weights: Vec<f64> = particles
            .comp_vols
            .iter()
            .map(|comp_vol| settings.scale / (comp_vol * width))
            .collect();
        let histogram = histogram_1d(&supersats, &weights, y_grid, OutOfRange::Drop)?;

        let column = time_grid.find_clipped(snapshot.env.elapsed_minutes());
        snapshots_per_column[column] += 1;
        let mut row = densities.row_mut(column);
        row += &histogram.counts;

        info!(
            file = %file.path.display(),
            minutes = snapshot.env.elapsed_minutes(),
            column,
            particles = particles.n_particles(),
            "binned snapshot"
        );
    }

    for (column, &count) in snapshots_per_column.iter().enumerate() {
        if count > 1 {
            let mut row = densities.row_mut(column);
            row /= count as f64;
        }
    }
    let empty_columns = snapshots_per_column.iter().filter(|&&count| count == 0).count();
    if empty_columns > 0 {
        warn!(
            empty_columns,
            total = time_grid.n_bin,
            "time columns without snapshots are left at zero"
        );
    }

    let counts: Vec<f64> = snapshots_per_column.iter().map(|&c| c as f64).collect();
    let mut writer = ArtifactWriter::new(&settings.output)?;
    writer.vector_txt("time_edges.txt", &time_grid.edges())?;
    writer.vector_txt("supersat_edges.txt", &y_grid.edges())?;
    writer.vector_txt("snapshots_per_column.txt", &counts)?;
    writer.matrix_txt("num_den.txt", densities.view())?;

    let map = heatmap(
        HeatmapLabels {
            title: "Critical supersaturation over time",
            x: "local standard time (LST) (hours:minutes)",
            y: "critical supersaturation (%)",
            color: density_label(y_grid),
        },
        time_grid,
        *y_grid,
        TickFormat::TimeOfDay {
            start_minutes: start_of_day / 60.0,
        },
        densities,
        &settings.plot,
    );
    let targets = writer.figure("num_den");
    render_heatmap(&map, &targets)?;

    let summary = vec![
        format!("snapshots: {}", files.len()),
        format!("time axis: 0 to {max_minutes} min in {} columns", time_grid.n_bin),
        format!("empty time columns: {empty_columns}"),
    ];
    let outputs = writer.finish(
        "scrit-time",
        files.iter().map(|file| file.path.clone()).collect(),
        json!({
            "time_grid": time_grid,
            "supersat_grid": y_grid,
            "scale": settings.scale,
            "require_species": settings.filter.require_species,
        }),
    )?;

    Ok(JobReport {
        job: "scrit-time",
        summary,
        outputs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn linear_widths_convert_percent_to_fraction() {
        let grid = BinGrid::linear(0.0, 2.0, 4).unwrap();
        assert_relative_eq!(supersat_bin_width(&grid), 0.005);
    }

    #[test]
    fn log_widths_stay_in_decades() {
        let grid = BinGrid::log(0.01, 10.0, 3).unwrap();
        assert_relative_eq!(supersat_bin_width(&grid), 1.0);
        assert!(density_label(&grid).contains("decade"));
    }
}
