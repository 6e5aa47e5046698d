use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, ensure};
use ndarray::ArrayView2;
use serde::Serialize;

use crate::config::OutputSettings;
use crate::plotting::FigureTargets;

pub fn resolve_path(base: &Path, relative: &Path) -> PathBuf {
    if relative.is_absolute() {
        relative.to_path_buf()
    } else {
        base.join(relative)
    }
}

pub fn ensure_directory(path: &Path) -> Result<()> {
    if !path.exists() {
        fs::create_dir_all(path)
            .with_context(|| format!("Failed to create output directory {}", path.display()))?;
    }
    Ok(())
}

fn ensure_parent(path: &Path) -> Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => ensure_directory(parent),
        _ => Ok(()),
    }
}

/// Formats like numpy's `savetxt` default `%.18e`, with `nan` for masked values.
pub fn format_savetxt(value: f64) -> String {
    if value.is_nan() {
        return "nan".into();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf".into() } else { "-inf".into() };
    }

    let formatted = format!("{value:.18e}");
    match formatted.split_once('e') {
        Some((mantissa, exponent)) => {
            let exponent: i32 = exponent.parse().unwrap_or(0);
            let sign = if exponent < 0 { '-' } else { '+' };
            format!("{mantissa}e{sign}{:02}", exponent.abs())
        }
        None => formatted,
    }
}

pub fn write_vector_txt(path: &Path, values: &[f64]) -> Result<()> {
    ensure_parent(path)?;
    let file = File::create(path)
        .with_context(|| format!("Unable to create text file {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    for &value in values {
        writeln!(writer, "{}", format_savetxt(value))
            .with_context(|| format!("Failed to write {}", path.display()))?;
    }
    writer
        .flush()
        .with_context(|| format!("Failed to flush {}", path.display()))
}

/// One matrix row per line, values separated by single spaces.
pub fn write_matrix_txt(path: &Path, matrix: ArrayView2<f64>) -> Result<()> {
    ensure_parent(path)?;
    let file = File::create(path)
        .with_context(|| format!("Unable to create text file {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    for row in matrix.rows() {
        let line: Vec<String> = row.iter().map(|&value| format_savetxt(value)).collect();
        writeln!(writer, "{}", line.join(" "))
            .with_context(|| format!("Failed to write {}", path.display()))?;
    }
    writer
        .flush()
        .with_context(|| format!("Failed to flush {}", path.display()))
}

/// Equal-length columns written under a header row.
pub fn write_columns_csv(path: &Path, headers: &[&str], columns: &[&[f64]]) -> Result<()> {
    ensure!(
        headers.len() == columns.len(),
        "CSV {}: {} headers for {} columns",
        path.display(),
        headers.len(),
        columns.len()
    );
    let rows = columns.first().map(|column| column.len()).unwrap_or(0);
    ensure!(
        columns.iter().all(|column| column.len() == rows),
        "CSV {}: columns differ in length",
        path.display()
    );

    ensure_parent(path)?;
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Unable to create CSV file {}", path.display()))?;
    writer.write_record(headers)?;
    for row in 0..rows {
        let record: Vec<String> = columns
            .iter()
            .map(|column| format!("{:.12e}", column[row]))
            .collect();
        writer
            .write_record(&record)
            .with_context(|| format!("Failed to write row {row} of {}", path.display()))?;
    }
    writer
        .flush()
        .with_context(|| format!("Failed to flush CSV writer for {}", path.display()))
}

/// JSON record of one job run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub job: String,
    pub inputs: Vec<PathBuf>,
    pub details: serde_json::Value,
    pub outputs: Vec<PathBuf>,
}

pub fn write_summary_json(path: &Path, summary: &RunSummary) -> Result<()> {
    ensure_parent(path)?;
    let file = File::create(path)
        .with_context(|| format!("Unable to create JSON file {}", path.display()))?;
    serde_json::to_writer_pretty(file, summary)
        .with_context(|| format!("Failed to write JSON payload to {}", path.display()))
}

/// Writes the artifacts of one job under its output directory and keeps the list of
/// files produced.
#[derive(Debug)]
pub struct ArtifactWriter {
    settings: OutputSettings,
    written: Vec<PathBuf>,
}

impl ArtifactWriter {
    pub fn new(settings: &OutputSettings) -> Result<Self> {
        ensure_directory(&settings.directory)?;
        Ok(Self {
            settings: settings.clone(),
            written: Vec::new(),
        })
    }

    pub fn path(&self, name: &str) -> PathBuf {
        let file_name = format!("{}{}", self.settings.prefix, name);
        resolve_path(&self.settings.directory, Path::new(&file_name))
    }

    pub fn vector_txt(&mut self, name: &str, values: &[f64]) -> Result<()> {
        if !self.settings.toggles.text {
            return Ok(());
        }
        let path = self.path(name);
        write_vector_txt(&path, values)?;
        self.written.push(path);
        Ok(())
    }

    pub fn matrix_txt(&mut self, name: &str, matrix: ArrayView2<f64>) -> Result<()> {
        if !self.settings.toggles.text {
            return Ok(());
        }
        let path = self.path(name);
        write_matrix_txt(&path, matrix)?;
        self.written.push(path);
        Ok(())
    }

    pub fn columns_csv(&mut self, name: &str, headers: &[&str], columns: &[&[f64]]) -> Result<()> {
        if !self.settings.toggles.csv {
            return Ok(());
        }
        let path = self.path(name);
        write_columns_csv(&path, headers, columns)?;
        self.written.push(path);
        Ok(())
    }

    /// PNG/SVG destinations for a figure called `stem`, per the enabled formats.
    pub fn figure(&mut self, stem: &str) -> FigureTargets {
        let toggles = self.settings.toggles;
        let targets = FigureTargets {
            png: toggles.png.then(|| self.path(&format!("{stem}.png"))),
            svg: toggles.svg.then(|| self.path(&format!("{stem}.svg"))),
        };
        self.written.extend(targets.png.iter().cloned());
        self.written.extend(targets.svg.iter().cloned());
        targets
    }

    /// Writes the run summary (when enabled) and returns every file produced.
    pub fn finish(
        mut self,
        job: &str,
        inputs: Vec<PathBuf>,
        details: serde_json::Value,
    ) -> Result<Vec<PathBuf>> {
        if self.settings.toggles.json {
            let path = self.path("summary.json");
            self.written.push(path.clone());
            let summary = RunSummary {
                job: job.to_string(),
                inputs,
                details,
                outputs: self.written.clone(),
            };
            write_summary_json(&path, &summary)?;
        }
        Ok(self.written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{OutputSettings, OutputToggles};
    use ndarray::array;

    #[test]
    fn savetxt_format_matches_numpy() {
        assert_eq!(format_savetxt(1.0), "1.000000000000000000e+00");
        assert_eq!(format_savetxt(-0.25), "-2.500000000000000000e-01");
        assert_eq!(format_savetxt(-2.5e-8), "-2.499999999999999887e-08");
        assert_eq!(format_savetxt(3e120), "3.000000000000000227e+120");
        assert_eq!(format_savetxt(f64::NAN), "nan");
    }

    #[test]
    fn matrix_rows_are_space_separated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/matrix.txt");
        write_matrix_txt(&path, array![[0.0, 1.0], [f64::NAN, 2.0]].view()).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(
            lines[0],
            "0.000000000000000000e+00 1.000000000000000000e+00"
        );
        assert!(lines[1].starts_with("nan "));
    }

    #[test]
    fn csv_rejects_ragged_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ragged.csv");
        let result = write_columns_csv(&path, &["a", "b"], &[&[1.0, 2.0][..], &[1.0][..]]);
        assert!(result.is_err());
    }

    #[test]
    fn artifact_writer_respects_toggles() {
        let dir = tempfile::tempdir().unwrap();
        let settings = OutputSettings {
            directory: dir.path().join("out"),
            prefix: "run_".into(),
            toggles: OutputToggles {
                png: false,
                svg: true,
                text: false,
                csv: true,
                json: true,
            },
        };
        let mut writer = ArtifactWriter::new(&settings).unwrap();
        writer.vector_txt("edges.txt", &[1.0, 2.0]).unwrap();
        writer
            .columns_csv("stats.csv", &["x"], &[&[1.0, 2.0][..]])
            .unwrap();
        let targets = writer.figure("dist");
        assert!(targets.png.is_none());
        assert_eq!(targets.svg, Some(dir.path().join("out/run_dist.svg")));

        let written = writer
            .finish("test", Vec::new(), serde_json::json!({}))
            .unwrap();
        assert!(!dir.path().join("out/run_edges.txt").exists());
        assert!(dir.path().join("out/run_stats.csv").exists());
        assert!(written.contains(&dir.path().join("out/run_summary.json")));
        let summary = fs::read_to_string(dir.path().join("out/run_summary.json")).unwrap();
        assert!(summary.contains("\"job\": \"test\""));
    }
}
