use std::path::Path;

use anyhow::Result;
use ndarray::Array2;
use serde_json::json;
use tracing::{info, warn};

use crate::config::CcnSettings;
use crate::grid::logspace;
use crate::output::ArtifactWriter;
use crate::particles::SpeciesFilter;
use crate::plotting::{AxisScale, LineChart, Series, TickFormat, render_line_chart};
use crate::snapshot::read_snapshot;

use super::{JobReport, selected_files};

/// Fraction of `weights` carried by particles whose critical supersaturation is
/// below each level. NaN when nothing is carried at all.
pub fn activated_fraction(supersats: &[f64], weights: &[f64], levels: &[f64]) -> Vec<f64> {
    let total: f64 = weights.iter().sum();
    levels
        .iter()
        .map(|&level| {
            if total > 0.0 {
                let active: f64 = supersats
                    .iter()
                    .zip(weights)
                    .filter(|(supersat, _)| **supersat < level)
                    .map(|(_, weight)| weight)
                    .sum();
                active / total
            } else {
                f64::NAN
            }
        })
        .collect()
}

/// Hours label used in column names and legends, e.g. `1`, `0.5`, `24`.
fn hours_label(seconds: f64) -> String {
    let hours = (seconds / 3600.0 * 1000.0).round() / 1000.0;
    format!("{hours}")
}

struct Spectrum {
    hours: String,
    particles: usize,
    mass_fraction: Vec<f64>,
    number_fraction: Vec<f64>,
}

fn spectrum(path: &Path, species: &[String], levels: &[f64]) -> Result<Spectrum> {
    let snapshot = read_snapshot(path)?;
    let particles = &snapshot.particles;
    let supersats = particles.critical_supersats_percent(&snapshot.env)?;
    let num_concs = particles.num_concs();
    let species_mass: Vec<f64> = particles
        .masses(&SpeciesFilter::include(species))?
        .iter()
        .zip(&num_concs)
        .map(|(mass, num_conc)| mass * num_conc)
        .collect();

    if species_mass.iter().sum::<f64>() <= 0.0 {
        warn!(
            file = %path.display(),
            species = %species.join(","),
            "no mass of the selected species; mass fractions are NaN"
        );
    }
    if num_concs.is_empty() {
        warn!(file = %path.display(), "snapshot has no particles; number fractions are NaN");
    }

    info!(
        file = %path.display(),
        time = snapshot.time(),
        particles = particles.n_particles(),
        "computed CCN spectrum"
    );
    Ok(Spectrum {
        hours: hours_label(snapshot.time()),
        particles: particles.n_particles(),
        mass_fraction: activated_fraction(&supersats, &species_mass, levels),
        number_fraction: activated_fraction(&supersats, &num_concs, levels),
    })
}

/// CCN spectra of the selected snapshots: activated species-mass and number fractions.
///
/// Text outputs hold one column per snapshot, in the order the snapshots were selected.
pub fn run(settings: &CcnSettings) -> Result<JobReport> {
    let paths = selected_files(&settings.input)?;
    let levels = logspace(
        settings.supersat_min,
        settings.supersat_max,
        settings.supersat_count,
    );
    let spectra = paths
        .iter()
        .map(|path| spectrum(path, &settings.species, &levels))
        .collect::<Result<Vec<_>>>()?;

    let shape = (levels.len(), spectra.len());
    let mass = Array2::from_shape_fn(shape, |(i, j)| spectra[j].mass_fraction[i]);
    let number = Array2::from_shape_fn(shape, |(i, j)| spectra[j].number_fraction[i]);

    let mut writer = ArtifactWriter::new(&settings.output)?;
    writer.vector_txt("levels.txt", &levels)?;
    writer.matrix_txt("mass_fraction.txt", mass.view())?;
    writer.matrix_txt("number_fraction.txt", number.view())?;

    let mut headers = vec!["supersat_percent".to_string()];
    let mut columns = vec![levels.as_slice()];
    for spectrum in &spectra {
        headers.push(format!("mass_fraction_{}h", spectrum.hours));
        headers.push(format!("number_fraction_{}h", spectrum.hours));
        columns.push(spectrum.mass_fraction.as_slice());
        columns.push(spectrum.number_fraction.as_slice());
    }
    let header_refs: Vec<&str> = headers.iter().map(String::as_str).collect();
    writer.columns_csv("ccn_spectrum.csv", &header_refs, &columns)?;

    let species = settings.species.join("+");
    let mut series = Vec::with_capacity(2 * spectra.len());
    for spectrum in &spectra {
        series.push(Series::new(
            format!("{species} mass, {} h", spectrum.hours),
            &levels,
            &spectrum.mass_fraction,
        ));
        series.push(Series::new(
            format!("number, {} h", spectrum.hours),
            &levels,
            &spectrum.number_fraction,
        ));
    }
    let chart = LineChart {
        title: format!("Activated fraction of {species} mass and number"),
        x_label: "critical supersaturation (%)".into(),
        y_label: "activated fraction".into(),
        x_scale: AxisScale::Log,
        y_scale: AxisScale::Linear,
        x_ticks: TickFormat::Number,
        series,
    };
    let targets = writer.figure("ccn_spectrum");
    render_line_chart(&chart, &targets)?;

    let summary = spectra
        .iter()
        .map(|spectrum| {
            format!(
                "{} h: {} particles, {species} mass activated at {:e}%: {:.4}",
                spectrum.hours,
                spectrum.particles,
                settings.supersat_max,
                spectrum.mass_fraction.last().copied().unwrap_or(f64::NAN)
            )
        })
        .collect();
    let hours: Vec<&str> = spectra.iter().map(|spectrum| spectrum.hours.as_str()).collect();
    let outputs = writer.finish(
        "ccn-spectrum",
        paths,
        json!({
            "hours": hours,
            "species": settings.species,
            "supersat_min": settings.supersat_min,
            "supersat_max": settings.supersat_max,
            "supersat_count": settings.supersat_count,
        }),
    )?;

    Ok(JobReport {
        job: "ccn-spectrum",
        summary,
        outputs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn fractions_rise_to_one() {
        let fractions = activated_fraction(&[0.1, 0.5, 2.0], &[1.0, 1.0, 2.0], &[0.05, 0.2, 1.0, 5.0]);
        assert_eq!(fractions[0], 0.0);
        assert_relative_eq!(fractions[1], 0.25);
        assert_relative_eq!(fractions[2], 0.5);
        assert_relative_eq!(fractions[3], 1.0);
    }

    #[test]
    fn hours_labels_drop_trailing_zeros() {
        assert_eq!(hours_label(3600.0), "1");
        assert_eq!(hours_label(1800.0), "0.5");
        assert_eq!(hours_label(86400.0), "24");
    }

    #[test]
    fn zero_total_is_nan() {
        let fractions = activated_fraction(&[0.1], &[0.0], &[1.0]);
        assert!(fractions[0].is_nan());
    }
}
