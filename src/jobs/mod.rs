//! Batch jobs. Each one reads its inputs, bins them, writes artifacts through an
//! [`ArtifactWriter`](crate::output::ArtifactWriter) and reports what it produced.

pub mod age_map;
pub mod aging;
pub mod bulk;
pub mod ccn;
pub mod dist_time;
pub mod ensemble_1d;
pub mod ensemble_2d;
pub mod scrit_time;
pub mod track;

use std::path::PathBuf;

use anyhow::{Result, anyhow, ensure};
use ndarray::Array2;
use tracing::{info, warn};

use crate::config::{PlotSettings, SeriesInput, SnapshotSelection};
use crate::filelist::{TimedFile, file_at_time, time_filename_list};
use crate::grid::BinGrid;
use crate::plotting::{Heatmap, TickFormat};

/// What a finished job hands back to the command line.
#[derive(Debug, Clone)]
pub struct JobReport {
    pub job: &'static str,
    pub summary: Vec<String>,
    pub outputs: Vec<PathBuf>,
}

pub(crate) fn series_files(input: &SeriesInput) -> Result<Vec<TimedFile>> {
    let files = time_filename_list(&input.directory, &input.pattern)?;
    info!(
        count = files.len(),
        directory = %input.directory.display(),
        "found snapshot series"
    );
    Ok(files)
}

/// Files named by a selection, in the order the times were listed.
pub(crate) fn selected_files(selection: &SnapshotSelection) -> Result<Vec<PathBuf>> {
    match selection {
        SnapshotSelection::File(path) => Ok(vec![path.clone()]),
        SnapshotSelection::AtTimes {
            series,
            times_hours,
        } => {
            let files = series_files(series)?;
            times_hours
                .iter()
                .map(|&hours| {
                    let file = file_at_time(&files, hours * 3600.0)
                        .ok_or_else(|| anyhow!("no snapshot to match {hours} h"))?;
                    info!(
                        requested_hours = hours,
                        found_hours = file.time / 3600.0,
                        file = %file.path.display(),
                        "selected snapshot"
                    );
                    Ok(file.path.clone())
                })
                .collect()
        }
    }
}

/// Linear grid with one bin centred on each of the (evenly spaced) times.
///
/// Times that do not increase (repeated snapshots) fall back to unit-width bins
/// starting at the first time.
pub(crate) fn time_grid(times: &[f64]) -> Result<BinGrid> {
    ensure!(!times.is_empty(), "no snapshot times to place on an axis");
    let first = times[0];
    let last = times[times.len() - 1];
    let n = times.len();
    let step = if n > 1 { (last - first) / (n - 1) as f64 } else { 0.0 };
    if step > 0.0 {
        BinGrid::linear(first - step / 2.0, last + step / 2.0, n)
    } else {
        if n > 1 {
            warn!(first, last, "snapshot times do not increase; using unit time bins");
        }
        BinGrid::linear(first - 0.5, first - 0.5 + n as f64, n)
    }
}

pub(crate) struct HeatmapLabels<'a> {
    pub title: &'a str,
    pub x: &'a str,
    pub y: &'a str,
    pub color: &'a str,
}

pub(crate) fn heatmap(
    labels: HeatmapLabels<'_>,
    x_grid: BinGrid,
    y_grid: BinGrid,
    x_ticks: TickFormat,
    values: Array2<f64>,
    plot: &PlotSettings,
) -> Heatmap {
    Heatmap {
        title: labels.title.to_string(),
        x_label: labels.x.to_string(),
        y_label: labels.y.to_string(),
        color_label: labels.color.to_string(),
        x_grid,
        y_grid,
        x_ticks,
        values,
        color_scale: plot.color_scale,
        palette: plot.palette,
        color_max_fraction: plot.color_max_fraction,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn selection_picks_nearest_snapshot_per_time() {
        use crate::particles::tests::{sample_env, sample_particles};
        use crate::snapshot::write_snapshot;

        let dir = tempfile::tempdir().unwrap();
        for (index, seconds) in [(1, 0.0), (2, 3600.0), (3, 86400.0)] {
            let mut env = sample_env();
            env.elapsed_time = seconds;
            let path = dir.path().join(format!("plume_{index:08}.nc"));
            write_snapshot(&path, &sample_particles(), &env).unwrap();
        }
        let selection = SnapshotSelection::AtTimes {
            series: SeriesInput {
                directory: dir.path().to_path_buf(),
                pattern: r"plume_(\d{8})\.nc".into(),
            },
            times_hours: vec![24.0, 1.2],
        };

        let files = selected_files(&selection).unwrap();
        assert_eq!(
            files,
            vec![
                dir.path().join("plume_00000003.nc"),
                dir.path().join("plume_00000002.nc"),
            ]
        );
    }

    #[test]
    fn time_grid_centres_bins_on_times() {
        let grid = time_grid(&[0.0, 10.0, 20.0]).unwrap();
        assert_eq!(grid.n_bin, 3);
        assert_relative_eq!(grid.center(1), 10.0);
        assert_eq!(grid.find(19.0), 2);
    }

    #[test]
    fn time_grid_handles_single_snapshot() {
        let grid = time_grid(&[60.0]).unwrap();
        assert_eq!(grid.find(60.0), 0);
    }

    #[test]
    fn repeated_times_get_unit_bins() {
        let grid = time_grid(&[10.0, 10.0]).unwrap();
        assert_eq!(grid.n_bin, 2);
        assert_relative_eq!(grid.center(0), 10.0);
        assert_relative_eq!(grid.center(1), 11.0);
    }
}
