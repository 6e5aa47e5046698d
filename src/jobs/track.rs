use anyhow::{Result, anyhow};
use serde_json::json;
use tracing::info;

use crate::config::TrackSettings;
use crate::output::ArtifactWriter;
use crate::particles::ParticleArray;
use crate::plotting::{AxisScale, LineChart, Series, TickFormat, render_line_chart};
use crate::snapshot::read_snapshot;

use super::{JobReport, series_files};

/// Wet diameters of the requested ids, in the order given.
fn diameters_of(particles: &ParticleArray, ids: &[i64], time: f64) -> Result<Vec<f64>> {
    let index_by_id = particles.index_by_id();
    let diameters = particles.diameters();
    ids.iter()
        .map(|id| {
            index_by_id
                .get(id)
                .map(|&index| diameters[index])
                .ok_or_else(|| anyhow!("particle {id} is not present at {time} s"))
        })
        .collect()
}

/// Wet diameter of individual particles through a time series.
pub fn run(settings: &TrackSettings) -> Result<JobReport> {
    let files = series_files(&settings.input)?;

    let mut hours = Vec::with_capacity(files.len());
    let mut tracks: Vec<Vec<f64>> = vec![Vec::with_capacity(files.len()); settings.ids.len()];
    for file in &files {
        let snapshot = read_snapshot(&file.path)?;
        let diameters = diameters_of(&snapshot.particles, &settings.ids, file.time)?;
        hours.push(snapshot.env.elapsed_hours());
        for (track, diameter) in tracks.iter_mut().zip(diameters) {
            track.push(diameter);
        }
        info!(file = %file.path.display(), time = file.time, "read tracked particles");
    }

    let mut headers = vec!["time_hours".to_string()];
    headers.extend(settings.ids.iter().map(|id| format!("id_{id}")));
    let header_refs: Vec<&str> = headers.iter().map(String::as_str).collect();
    let mut column_refs: Vec<&[f64]> = vec![hours.as_slice()];
    column_refs.extend(tracks.iter().map(Vec::as_slice));

    let mut writer = ArtifactWriter::new(&settings.output)?;
    writer.vector_txt("times.txt", &hours)?;
    writer.columns_csv("track.csv", &header_refs, &column_refs)?;

    let chart = LineChart {
        title: "Wet diameter of tracked particles".into(),
        x_label: "elapsed time (hours)".into(),
        y_label: "wet diameter (m)".into(),
        x_scale: AxisScale::Linear,
        y_scale: AxisScale::Log,
        x_ticks: TickFormat::Number,
        series: settings
            .ids
            .iter()
            .zip(&tracks)
            .map(|(id, track)| Series::new(format!("particle {id}"), &hours, track))
            .collect(),
    };
    let targets = writer.figure("track");
    render_line_chart(&chart, &targets)?;

    let summary = vec![
        format!("snapshots: {}", files.len()),
        format!("particles tracked: {}", settings.ids.len()),
    ];
    let outputs = writer.finish(
        "track",
        files.iter().map(|file| file.path.clone()).collect(),
        json!({ "ids": settings.ids }),
    )?;

    Ok(JobReport {
        job: "track",
        summary,
        outputs,
    })
}
