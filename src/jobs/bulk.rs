use anyhow::Result;
use ndarray::Array2;
use serde_json::json;
use tracing::info;

use crate::config::BulkSettings;
use crate::output::ArtifactWriter;
use crate::particles::{ParticleArray, SpeciesFilter};
use crate::plotting::{AxisScale, LineChart, Series, TickFormat, render_line_chart};
use crate::snapshot::read_snapshot;

use super::{JobReport, series_files};

/// Concentration carried by all particles for the selected species: sum of mass / comp_vol.
fn mass_concentration(particles: &ParticleArray, filter: &SpeciesFilter) -> Result<f64> {
    Ok(particles
        .masses(filter)?
        .iter()
        .zip(&particles.comp_vols)
        .map(|(mass, comp_vol)| mass / comp_vol)
        .sum())
}

/// Bulk number and mass concentrations over a time series.
pub fn run(settings: &BulkSettings) -> Result<JobReport> {
    let files = series_files(&settings.input)?;

    let n_columns = 4 + settings.species.len();
    let mut table = Array2::<f64>::zeros((files.len(), n_columns));
    for (row, file) in files.iter().enumerate() {
        let snapshot = read_snapshot(&file.path)?;
        let particles = &snapshot.particles;

        let number: f64 = particles.num_concs().iter().sum();
        let dry = mass_concentration(particles, &particles.aero_data.dry_filter())?;
        let total = mass_concentration(particles, &SpeciesFilter::All)?;

        table[[row, 0]] = snapshot.env.elapsed_hours();
        table[[row, 1]] = number * settings.number_scale;
        table[[row, 2]] = dry * settings.mass_scale;
        table[[row, 3]] = total * settings.mass_scale;
        for (offset, species) in settings.species.iter().enumerate() {
            let mass = mass_concentration(particles, &SpeciesFilter::include(&[species]))?;
            table[[row, 4 + offset]] = mass * settings.mass_scale;
        }

        info!(
            file = %file.path.display(),
            hours = table[[row, 0]],
            particles = particles.n_particles(),
            "summed snapshot"
        );
    }

    let mut headers = vec![
        "time_hours".to_string(),
        "number".to_string(),
        "dry_mass".to_string(),
        "total_mass".to_string(),
    ];
    headers.extend(settings.species.iter().map(|species| format!("{species}_mass")));
    let header_refs: Vec<&str> = headers.iter().map(String::as_str).collect();
    let columns: Vec<Vec<f64>> = table.columns().into_iter().map(|c| c.to_vec()).collect();
    let column_refs: Vec<&[f64]> = columns.iter().map(Vec::as_slice).collect();

    let mut writer = ArtifactWriter::new(&settings.output)?;
    writer.matrix_txt("bulk.txt", table.view())?;
    writer.columns_csv("bulk.csv", &header_refs, &column_refs)?;

    let hours = &columns[0];
    let number_chart = LineChart {
        title: "Total number concentration".into(),
        x_label: "elapsed time (hours)".into(),
        y_label: "number concentration".into(),
        x_scale: AxisScale::Linear,
        y_scale: AxisScale::Linear,
        x_ticks: TickFormat::Number,
        series: vec![Series::new("number", hours, &columns[1])],
    };
    let targets = writer.figure("number");
    render_line_chart(&number_chart, &targets)?;

    let mass_chart = LineChart {
        title: "Mass concentration".into(),
        x_label: "elapsed time (hours)".into(),
        y_label: "mass concentration".into(),
        x_scale: AxisScale::Linear,
        y_scale: AxisScale::Linear,
        x_ticks: TickFormat::Number,
        series: headers
            .iter()
            .zip(&columns)
            .skip(2)
            .map(|(label, column)| Series::new(label.as_str(), hours, column))
            .collect(),
    };
    let targets = writer.figure("mass");
    render_line_chart(&mass_chart, &targets)?;

    let last = files.len().saturating_sub(1);
    let summary = vec![
        format!("snapshots: {}", files.len()),
        format!(
            "final number {:.4e}, dry mass {:.4e}, total mass {:.4e}",
            table[[last, 1]],
            table[[last, 2]],
            table[[last, 3]]
        ),
    ];
    let outputs = writer.finish(
        "bulk",
        files.iter().map(|file| file.path.clone()).collect(),
        json!({
            "columns": headers,
            "number_scale": settings.number_scale,
            "mass_scale": settings.mass_scale,
        }),
    )?;

    Ok(JobReport {
        job: "bulk",
        summary,
        outputs,
    })
}
