use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, ensure};
use netcdf3::{DataVector, FileReader};
use regex::Regex;
use tracing::debug;

/// A snapshot file together with the simulation time stored inside it.
#[derive(Debug, Clone, PartialEq)]
pub struct TimedFile {
    pub time: f64,
    pub path: PathBuf,
    /// First capture group of the file pattern, or the whole file name.
    pub key: String,
}

/// Files in `directory` whose whole name matches `pattern`, ordered by their
/// `elapsed_time` variable.
pub fn time_filename_list(directory: &Path, pattern: &str) -> Result<Vec<TimedFile>> {
    let regex = Regex::new(&format!("^(?:{pattern})$"))
        .with_context(|| format!("Invalid file pattern {pattern:?}"))?;

    let entries = fs::read_dir(directory)
        .with_context(|| format!("Failed to list directory {}", directory.display()))?;

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry
            .with_context(|| format!("Failed to read entry in {}", directory.display()))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let Some(captures) = regex.captures(&name) else {
            continue;
        };
        let key = captures
            .get(1)
            .map(|group| group.as_str().to_string())
            .unwrap_or_else(|| name.clone());
        let path = entry.path();
        let time = read_elapsed_time(&path)?;
        debug!(file = %path.display(), time, "matched snapshot");
        files.push(TimedFile { time, path, key });
    }

    ensure!(
        !files.is_empty(),
        "No files in {} match {pattern:?}",
        directory.display()
    );
    files.sort_by(|a, b| a.time.total_cmp(&b.time).then_with(|| a.path.cmp(&b.path)));
    Ok(files)
}

fn read_elapsed_time(path: &Path) -> Result<f64> {
    let mut reader = FileReader::open(path)
        .map_err(|err| anyhow!("Cannot open {}: {err:?}", path.display()))?;
    let name = if reader.data_set().has_var("elapsed_time") {
        "elapsed_time"
    } else {
        "time"
    };
    let data = reader
        .read_var(name)
        .map_err(|err| anyhow!("Cannot read {name} from {}: {err:?}", path.display()))?;
    reader.close();

    let value = match data {
        DataVector::F64(values) => values.first().copied(),
        DataVector::F32(values) => values.first().map(|&v| f64::from(v)),
        DataVector::I32(values) => values.first().map(|&v| f64::from(v)),
        DataVector::I16(values) => values.first().map(|&v| f64::from(v)),
        DataVector::I8(values) => values.first().map(|&v| f64::from(v)),
        DataVector::U8(values) => values.first().map(|&v| f64::from(v)),
    };
    value.ok_or_else(|| anyhow!("Variable {name} in {} is empty", path.display()))
}

/// Entry whose time is closest to `time`; ties resolve to the earlier file.
pub fn file_at_time(files: &[TimedFile], time: f64) -> Option<&TimedFile> {
    files.iter().min_by(|a, b| {
        (a.time - time)
            .abs()
            .total_cmp(&(b.time - time).abs())
    })
}

/// Numbered repetitions of one run, found by substituting `{member}` in a name template.
#[derive(Debug, Clone, PartialEq)]
pub struct EnsembleInput {
    pub directory: PathBuf,
    pub template: String,
    pub members: usize,
    pub member_width: usize,
}

impl EnsembleInput {
    pub fn member_path(&self, member: usize) -> PathBuf {
        let number = format!("{:0width$}", member, width = self.member_width);
        self.directory.join(self.template.replace("{member}", &number))
    }

    /// Paths for members `1..=members`.
    pub fn paths(&self) -> Vec<PathBuf> {
        (1..=self.members).map(|member| self.member_path(member)).collect()
    }
}
