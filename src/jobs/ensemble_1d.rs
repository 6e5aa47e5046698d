use anyhow::Result;
use ndarray::Ix1;
use serde_json::json;
use tracing::info;

use crate::config::Ensemble1dSettings;
use crate::ensemble::{EnsembleStats, member_stats, stack_1d};
use crate::histogram::histogram_1d;
use crate::output::ArtifactWriter;
use crate::plotting::{AxisScale, LineChart, Series, TickFormat, render_line_chart};
use crate::quantity::Weight;
use crate::snapshot::read_snapshot;

use super::JobReport;

/// Number and mass distributions of one quantity across ensemble members.
pub fn run(settings: &Ensemble1dSettings) -> Result<JobReport> {
    let grid = &settings.grid;
    let paths = settings.input.paths();
    let mass_weight = Weight::Mass {
        species: settings.mass_species.clone(),
    };

    let mut num_members = Vec::with_capacity(paths.len());
    let mut mass_members = Vec::with_capacity(paths.len());
    for (index, path) in paths.iter().enumerate() {
        let snapshot = read_snapshot(path)?;
        let particles = settings.filter.apply(&snapshot.particles)?;
        let values = settings.quantity.evaluate(&particles, &snapshot.env)?;

        let num = histogram_1d(
            &values,
            &Weight::Number.evaluate(&particles)?,
            grid,
            settings.out_of_range,
        )?;
        let mass = histogram_1d(
            &values,
            &mass_weight.evaluate(&particles)?,
            grid,
            settings.out_of_range,
        )?;
        info!(
            member = index + 1,
            file = %path.display(),
            particles = particles.n_particles(),
            dropped_number = num.dropped_weight,
            "binned ensemble member"
        );

        num_members.push(num.to_density());
        mass_members.push(mass.to_density());
    }

    let num_stack = stack_1d(&num_members)?;
    let mass_stack = stack_1d(&mass_members)?;
    let num_stats = member_stats(&num_stack)?;
    let mass_stats = member_stats(&mass_stack)?;

    let centers = grid.centers();
    let mut writer = ArtifactWriter::new(&settings.output)?;
    writer.vector_txt("edges.txt", &grid.edges())?;
    writer.vector_txt("centers.txt", &centers)?;
    writer.matrix_txt("num.txt", num_stack.view())?;
    writer.matrix_txt("mass.txt", mass_stack.view())?;

    let mut columns = vec![centers.clone()];
    for stats in [&num_stats, &mass_stats] {
        columns.extend([stats.mean.to_vec(), stats.std.to_vec(), stats.cv.to_vec()]);
    }
    let column_refs: Vec<&[f64]> = columns.iter().map(Vec::as_slice).collect();
    writer.columns_csv(
        "stats.csv",
        &[
            "center", "num_mean", "num_std", "num_cv", "mass_mean", "mass_std", "mass_cv",
        ],
        &column_refs,
    )?;

    let x_label = settings.quantity.label();
    for (stem, stats, y_label) in [
        ("num_dist", &num_stats, "number density (m^-3)"),
        ("mass_dist", &mass_stats, "mass density (kg m^-3)"),
    ] {
        let chart = spread_chart(&centers, stats, &x_label, y_label, grid.scale.into());
        let targets = writer.figure(stem);
        render_line_chart(&chart, &targets)?;
    }

    let summary = vec![
        format!("members: {}", num_stats.members),
        format!(
            "masked bins: number {}, mass {}",
            num_stats.masked_bins(),
            mass_stats.masked_bins()
        ),
    ];
    let outputs = writer.finish(
        "ensemble-1d",
        paths,
        json!({
            "quantity": x_label,
            "grid": grid,
            "members": num_stats.members,
            "out_of_range": format!("{:?}", settings.out_of_range),
            "mass_species": settings.mass_species,
        }),
    )?;

    Ok(JobReport {
        job: "ensemble-1d",
        summary,
        outputs,
    })
}

fn spread_chart(
    centers: &[f64],
    stats: &EnsembleStats<Ix1>,
    x_label: &str,
    y_label: &str,
    x_scale: AxisScale,
) -> LineChart {
    let mean = stats.mean.to_vec();
    let upper: Vec<f64> = (&stats.mean + &stats.std).to_vec();
    let lower: Vec<f64> = (&stats.mean - &stats.std).to_vec();
    LineChart {
        title: format!("Ensemble mean of {} members", stats.members),
        x_label: x_label.to_string(),
        y_label: y_label.to_string(),
        x_scale,
        y_scale: AxisScale::Log,
        x_ticks: TickFormat::Number,
        series: vec![
            Series::new("mean", centers, &mean),
            Series::new("mean + std", centers, &upper),
            Series::new("mean - std", centers, &lower),
        ],
    }
}
