use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail, ensure};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::filelist::EnsembleInput;
use crate::grid::{BinGrid, GridScale};
use crate::histogram::OutOfRange;
use crate::plotting::{AxisScale, ColorPalette};
use crate::quantity::{ParticleFilter, Quantity, Weight};

#[derive(Debug, Deserialize)]
struct GridSection {
    #[serde(default = "default_grid_scale")]
    scale: GridScale,
    min: f64,
    max: f64,
    n_bin: usize,
}

fn default_grid_scale() -> GridScale {
    GridScale::Log
}

impl GridSection {
    fn to_grid(&self, label: &str) -> Result<BinGrid> {
        BinGrid::new(self.scale, self.min, self.max, self.n_bin)
            .with_context(|| format!("Invalid {label} grid"))
    }
}

#[derive(Debug, Deserialize)]
struct OutputSection {
    directory: PathBuf,
    #[serde(default)]
    prefix: String,
    #[serde(default)]
    toggles: OutputTogglesSection,
}

#[derive(Debug, Deserialize, Clone, Copy)]
struct OutputTogglesSection {
    #[serde(default = "default_true")]
    png: bool,
    #[serde(default = "default_true")]
    svg: bool,
    #[serde(default = "default_true")]
    text: bool,
    #[serde(default = "default_true")]
    csv: bool,
    #[serde(default = "default_true")]
    json: bool,
}

impl Default for OutputTogglesSection {
    fn default() -> Self {
        Self {
            png: true,
            svg: true,
            text: true,
            csv: true,
            json: true,
        }
    }
}

fn default_true() -> bool {
    true
}

impl OutputSection {
    fn to_settings(&self) -> OutputSettings {
        OutputSettings {
            directory: self.directory.clone(),
            prefix: self.prefix.clone(),
            toggles: OutputToggles {
                png: self.toggles.png,
                svg: self.toggles.svg,
                text: self.toggles.text,
                csv: self.toggles.csv,
                json: self.toggles.json,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct EnsembleInputSection {
    directory: PathBuf,
    template: String,
    members: usize,
    #[serde(default = "default_member_width")]
    member_width: usize,
}

fn default_member_width() -> usize {
    4
}

impl EnsembleInputSection {
    fn to_input(&self) -> Result<EnsembleInput> {
        ensure!(self.members > 0, "input.members must be at least 1");
        ensure!(
            self.template.contains("{member}"),
            "input.template {:?} has no {{member}} placeholder",
            self.template
        );
        Ok(EnsembleInput {
            directory: self.directory.clone(),
            template: self.template.clone(),
            members: self.members,
            member_width: self.member_width,
        })
    }
}

#[derive(Debug, Deserialize)]
struct SeriesInputSection {
    directory: PathBuf,
    pattern: String,
}

impl SeriesInputSection {
    fn to_input(&self) -> SeriesInput {
        SeriesInput {
            directory: self.directory.clone(),
            pattern: self.pattern.clone(),
        }
    }
}

/// Either `path` to one file, or `directory` + `pattern` + `times_hours` to pick
/// the snapshot nearest each listed time.
#[derive(Debug, Deserialize)]
struct SnapshotInputSection {
    path: Option<PathBuf>,
    directory: Option<PathBuf>,
    pattern: Option<String>,
    #[serde(default)]
    times_hours: Vec<f64>,
}

impl SnapshotInputSection {
    fn to_selection(&self) -> Result<SnapshotSelection> {
        match (&self.path, &self.directory, &self.pattern) {
            (Some(path), None, None) => {
                ensure!(
                    !path.as_os_str().is_empty(),
                    "input.path must name a snapshot file"
                );
                ensure!(
                    self.times_hours.is_empty(),
                    "input.times_hours needs input.directory and input.pattern, not input.path"
                );
                Ok(SnapshotSelection::File(path.clone()))
            }
            (None, Some(directory), Some(pattern)) => {
                ensure!(
                    !self.times_hours.is_empty(),
                    "input.times_hours must list at least one time"
                );
                ensure!(
                    self.times_hours.iter().all(|hours| hours.is_finite()),
                    "input.times_hours must be finite"
                );
                Ok(SnapshotSelection::AtTimes {
                    series: SeriesInput {
                        directory: directory.clone(),
                        pattern: pattern.clone(),
                    },
                    times_hours: self.times_hours.clone(),
                })
            }
            _ => bail!("input needs either path, or directory, pattern and times_hours"),
        }
    }
}

#[derive(Debug, Deserialize)]
struct AxisSection {
    quantity: Quantity,
    grid: GridSection,
}

#[derive(Debug, Deserialize, Default)]
struct BinningSection {
    #[serde(default)]
    out_of_range: OutOfRange,
    #[serde(default)]
    weight: Weight,
}

#[derive(Debug, Deserialize)]
struct PlotSection {
    #[serde(default)]
    palette: ColorPalette,
    #[serde(default = "default_color_scale")]
    color_scale: AxisScale,
    #[serde(default = "default_color_max_fraction")]
    color_max_fraction: f64,
}

impl Default for PlotSection {
    fn default() -> Self {
        Self {
            palette: ColorPalette::default(),
            color_scale: default_color_scale(),
            color_max_fraction: default_color_max_fraction(),
        }
    }
}

fn default_color_scale() -> AxisScale {
    AxisScale::Linear
}

fn default_color_max_fraction() -> f64 {
    1.0
}

impl PlotSection {
    fn to_settings(&self) -> Result<PlotSettings> {
        ensure!(
            self.color_max_fraction > 0.0 && self.color_max_fraction.is_finite(),
            "plot.color_max_fraction must be positive"
        );
        Ok(PlotSettings {
            palette: self.palette,
            color_scale: self.color_scale,
            color_max_fraction: self.color_max_fraction,
        })
    }
}

#[derive(Debug, Deserialize)]
struct Ensemble1dRoot {
    input: EnsembleInputSection,
    quantity: Quantity,
    grid: GridSection,
    #[serde(default)]
    out_of_range: OutOfRange,
    #[serde(default)]
    mass_species: Vec<String>,
    #[serde(default)]
    filter: ParticleFilter,
    output: OutputSection,
}

#[derive(Debug, Deserialize)]
struct Ensemble2dRoot {
    input: EnsembleInputSection,
    x: AxisSection,
    y: AxisSection,
    #[serde(default)]
    binning: BinningSection,
    #[serde(default)]
    filter: ParticleFilter,
    #[serde(default)]
    plot: PlotSection,
    output: OutputSection,
}

#[derive(Debug, Deserialize)]
struct ScritTimeRoot {
    input: SeriesInputSection,
    #[serde(default = "default_bc_filter")]
    filter: ParticleFilter,
    time: TimeAxisSection,
    supersat: GridSection,
    #[serde(default = "default_number_scale")]
    scale: f64,
    #[serde(default)]
    plot: PlotSection,
    output: OutputSection,
}

#[derive(Debug, Deserialize)]
struct TimeAxisSection {
    n_bin: usize,
    #[serde(default)]
    max_minutes: Option<f64>,
}

fn default_bc_filter() -> ParticleFilter {
    ParticleFilter {
        require_species: default_bc_species(),
    }
}

fn default_bc_species() -> Vec<String> {
    vec!["BC".into()]
}

/// m^-3 to cm^-3.
fn default_number_scale() -> f64 {
    1e-6
}

#[derive(Debug, Deserialize)]
struct AgeMapRoot {
    input: SnapshotInputSection,
    x: AxisSection,
    y: AxisSection,
    #[serde(default = "default_age_quantity")]
    value: Quantity,
    #[serde(default)]
    filter: ParticleFilter,
    #[serde(default)]
    plot: PlotSection,
    output: OutputSection,
}

fn default_age_quantity() -> Quantity {
    Quantity::Age { scale: 1.0 }
}

#[derive(Debug, Deserialize)]
struct CcnRoot {
    input: SnapshotInputSection,
    #[serde(default = "default_bc_species")]
    species: Vec<String>,
    #[serde(default)]
    supersat: SupersatLevelsSection,
    output: OutputSection,
}

#[derive(Debug, Deserialize)]
struct SupersatLevelsSection {
    #[serde(default = "default_supersat_min")]
    min: f64,
    #[serde(default = "default_supersat_max")]
    max: f64,
    #[serde(default = "default_supersat_count")]
    count: usize,
}

impl Default for SupersatLevelsSection {
    fn default() -> Self {
        Self {
            min: default_supersat_min(),
            max: default_supersat_max(),
            count: default_supersat_count(),
        }
    }
}

fn default_supersat_min() -> f64 {
    1e-2
}

fn default_supersat_max() -> f64 {
    1e1
}

fn default_supersat_count() -> usize {
    100
}

#[derive(Debug, Deserialize)]
struct BulkRoot {
    input: SeriesInputSection,
    #[serde(default)]
    species: Vec<String>,
    #[serde(default = "default_number_scale")]
    number_scale: f64,
    #[serde(default = "default_mass_scale")]
    mass_scale: f64,
    output: OutputSection,
}

/// kg m^-3 to µg m^-3.
fn default_mass_scale() -> f64 {
    1e9
}

#[derive(Debug, Deserialize)]
struct AgingRoot {
    input: SeriesInputSection,
    levels: GridSection,
    output: OutputSection,
}

#[derive(Debug, Deserialize)]
struct TrackRoot {
    input: SeriesInputSection,
    ids: Vec<i64>,
    output: OutputSection,
}

#[derive(Debug, Deserialize)]
struct DistTimeRoot {
    input: SeriesInputSection,
    quantity: Quantity,
    grid: GridSection,
    #[serde(default)]
    binning: BinningSection,
    #[serde(default)]
    filter: ParticleFilter,
    #[serde(default)]
    plot: PlotSection,
    output: OutputSection,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutputSettings {
    pub directory: PathBuf,
    /// Prepended to every file name written by the job.
    pub prefix: String,
    pub toggles: OutputToggles,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputToggles {
    pub png: bool,
    pub svg: bool,
    pub text: bool,
    pub csv: bool,
    pub json: bool,
}

impl OutputSettings {
    fn summary_line(&self) -> String {
        format!(
            "output dir: {} (prefix={:?}, text={}, csv={}, json={}, png={}, svg={})",
            self.directory.display(),
            self.prefix,
            self.toggles.text,
            self.toggles.csv,
            self.toggles.json,
            self.toggles.png,
            self.toggles.svg
        )
    }
}

/// Time-ordered snapshot files of one run.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesInput {
    pub directory: PathBuf,
    /// Regular expression matched against whole file names.
    pub pattern: String,
}

/// Snapshots for single-time jobs: one named file, or the files of a series
/// closest to each requested time.
#[derive(Debug, Clone, PartialEq)]
pub enum SnapshotSelection {
    File(PathBuf),
    AtTimes {
        series: SeriesInput,
        times_hours: Vec<f64>,
    },
}

impl SnapshotSelection {
    pub fn len(&self) -> usize {
        match self {
            SnapshotSelection::File(_) => 1,
            SnapshotSelection::AtTimes { times_hours, .. } => times_hours.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn summary_line(&self) -> String {
        match self {
            SnapshotSelection::File(path) => format!("snapshot: {}", path.display()),
            SnapshotSelection::AtTimes {
                series,
                times_hours,
            } => format!(
                "snapshots nearest {:?} h among files matching {:?} in {}",
                times_hours,
                series.pattern,
                series.directory.display()
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlotSettings {
    pub palette: ColorPalette,
    pub color_scale: AxisScale,
    pub color_max_fraction: f64,
}

#[derive(Debug, Clone)]
pub struct Ensemble1dSettings {
    pub input: EnsembleInput,
    pub quantity: Quantity,
    pub grid: BinGrid,
    pub out_of_range: OutOfRange,
    /// Species summed for the mass distribution; empty means all.
    pub mass_species: Vec<String>,
    pub filter: ParticleFilter,
    pub output: OutputSettings,
}

#[derive(Debug, Clone)]
pub struct AxisSettings {
    pub quantity: Quantity,
    pub grid: BinGrid,
}

#[derive(Debug, Clone)]
pub struct Ensemble2dSettings {
    pub input: EnsembleInput,
    pub x: AxisSettings,
    pub y: AxisSettings,
    pub out_of_range: OutOfRange,
    pub weight: Weight,
    pub filter: ParticleFilter,
    pub plot: PlotSettings,
    pub output: OutputSettings,
}

#[derive(Debug, Clone)]
pub struct ScritTimeSettings {
    pub input: SeriesInput,
    pub filter: ParticleFilter,
    pub time_bins: usize,
    /// Upper end of the time axis; the last snapshot time when absent.
    pub time_max_minutes: Option<f64>,
    pub supersat_grid: BinGrid,
    pub scale: f64,
    pub plot: PlotSettings,
    pub output: OutputSettings,
}

#[derive(Debug, Clone)]
pub struct AgeMapSettings {
    pub input: SnapshotSelection,
    pub x: AxisSettings,
    pub y: AxisSettings,
    pub value: Quantity,
    pub filter: ParticleFilter,
    pub plot: PlotSettings,
    pub output: OutputSettings,
}

#[derive(Debug, Clone)]
pub struct CcnSettings {
    pub input: SnapshotSelection,
    pub species: Vec<String>,
    pub supersat_min: f64,
    pub supersat_max: f64,
    pub supersat_count: usize,
    pub output: OutputSettings,
}

#[derive(Debug, Clone)]
pub struct BulkSettings {
    pub input: SeriesInput,
    pub species: Vec<String>,
    pub number_scale: f64,
    pub mass_scale: f64,
    pub output: OutputSettings,
}

#[derive(Debug, Clone)]
pub struct AgingSettings {
    pub input: SeriesInput,
    /// Critical supersaturation levels, percent.
    pub levels: BinGrid,
    pub output: OutputSettings,
}

#[derive(Debug, Clone)]
pub struct TrackSettings {
    pub input: SeriesInput,
    pub ids: Vec<i64>,
    pub output: OutputSettings,
}

#[derive(Debug, Clone)]
pub struct DistTimeSettings {
    pub input: SeriesInput,
    pub quantity: Quantity,
    pub grid: BinGrid,
    pub out_of_range: OutOfRange,
    pub weight: Weight,
    pub filter: ParticleFilter,
    pub plot: PlotSettings,
    pub output: OutputSettings,
}

/// Paths inside a config file are used as written, relative to the working directory.
fn read_root<T: DeserializeOwned>(path: &Path, kind: &str) -> Result<T> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    toml::from_str(&raw)
        .with_context(|| format!("Failed to parse {kind} configuration {}", path.display()))
}

fn axis_settings(section: &AxisSection, label: &str) -> Result<AxisSettings> {
    Ok(AxisSettings {
        quantity: section.quantity.clone(),
        grid: section.grid.to_grid(label)?,
    })
}

pub fn load_ensemble_1d_from_file(path: impl AsRef<Path>) -> Result<Ensemble1dSettings> {
    let parsed: Ensemble1dRoot = read_root(path.as_ref(), "ensemble-1d")?;
    Ok(Ensemble1dSettings {
        input: parsed.input.to_input()?,
        quantity: parsed.quantity,
        grid: parsed.grid.to_grid("distribution")?,
        out_of_range: parsed.out_of_range,
        mass_species: parsed.mass_species,
        filter: parsed.filter,
        output: parsed.output.to_settings(),
    })
}

pub fn load_ensemble_2d_from_file(path: impl AsRef<Path>) -> Result<Ensemble2dSettings> {
    let parsed: Ensemble2dRoot = read_root(path.as_ref(), "ensemble-2d")?;
    Ok(Ensemble2dSettings {
        input: parsed.input.to_input()?,
        x: axis_settings(&parsed.x, "x")?,
        y: axis_settings(&parsed.y, "y")?,
        out_of_range: parsed.binning.out_of_range,
        weight: parsed.binning.weight,
        filter: parsed.filter,
        plot: parsed.plot.to_settings()?,
        output: parsed.output.to_settings(),
    })
}

pub fn load_scrit_time_from_file(path: impl AsRef<Path>) -> Result<ScritTimeSettings> {
    let parsed: ScritTimeRoot = read_root(path.as_ref(), "scrit-time")?;
    ensure!(parsed.time.n_bin > 0, "time.n_bin must be at least 1");
    if let Some(max) = parsed.time.max_minutes {
        ensure!(max > 0.0, "time.max_minutes must be positive");
    }
    Ok(ScritTimeSettings {
        input: parsed.input.to_input(),
        filter: parsed.filter,
        time_bins: parsed.time.n_bin,
        time_max_minutes: parsed.time.max_minutes,
        supersat_grid: parsed.supersat.to_grid("critical supersaturation")?,
        scale: parsed.scale,
        plot: parsed.plot.to_settings()?,
        output: parsed.output.to_settings(),
    })
}

pub fn load_age_map_from_file(path: impl AsRef<Path>) -> Result<AgeMapSettings> {
    let parsed: AgeMapRoot = read_root(path.as_ref(), "age-map")?;
    let input = parsed.input.to_selection()?;
    ensure!(
        input.len() == 1,
        "age-map maps one snapshot; list a single time in input.times_hours"
    );
    Ok(AgeMapSettings {
        input,
        x: axis_settings(&parsed.x, "x")?,
        y: axis_settings(&parsed.y, "y")?,
        value: parsed.value,
        filter: parsed.filter,
        plot: parsed.plot.to_settings()?,
        output: parsed.output.to_settings(),
    })
}

pub fn load_ccn_from_file(path: impl AsRef<Path>) -> Result<CcnSettings> {
    let parsed: CcnRoot = read_root(path.as_ref(), "ccn-spectrum")?;
    let levels = &parsed.supersat;
    ensure!(
        levels.min > 0.0 && levels.max > levels.min,
        "supersat levels need 0 < min < max (got {} and {})",
        levels.min,
        levels.max
    );
    ensure!(levels.count >= 2, "supersat.count must be at least 2");
    ensure!(!parsed.species.is_empty(), "species must name at least one species");
    Ok(CcnSettings {
        input: parsed.input.to_selection()?,
        species: parsed.species,
        supersat_min: levels.min,
        supersat_max: levels.max,
        supersat_count: levels.count,
        output: parsed.output.to_settings(),
    })
}

pub fn load_bulk_from_file(path: impl AsRef<Path>) -> Result<BulkSettings> {
    let parsed: BulkRoot = read_root(path.as_ref(), "bulk")?;
    Ok(BulkSettings {
        input: parsed.input.to_input(),
        species: parsed.species,
        number_scale: parsed.number_scale,
        mass_scale: parsed.mass_scale,
        output: parsed.output.to_settings(),
    })
}

pub fn load_aging_from_file(path: impl AsRef<Path>) -> Result<AgingSettings> {
    let parsed: AgingRoot = read_root(path.as_ref(), "aging")?;
    Ok(AgingSettings {
        input: parsed.input.to_input(),
        levels: parsed.levels.to_grid("critical supersaturation level")?,
        output: parsed.output.to_settings(),
    })
}

pub fn load_track_from_file(path: impl AsRef<Path>) -> Result<TrackSettings> {
    let parsed: TrackRoot = read_root(path.as_ref(), "track")?;
    if parsed.ids.is_empty() {
        return Err(anyhow!("ids must list at least one particle id"));
    }
    Ok(TrackSettings {
        input: parsed.input.to_input(),
        ids: parsed.ids,
        output: parsed.output.to_settings(),
    })
}

pub fn load_dist_time_from_file(path: impl AsRef<Path>) -> Result<DistTimeSettings> {
    let parsed: DistTimeRoot = read_root(path.as_ref(), "dist-time")?;
    Ok(DistTimeSettings {
        input: parsed.input.to_input(),
        quantity: parsed.quantity,
        grid: parsed.grid.to_grid("distribution")?,
        out_of_range: parsed.binning.out_of_range,
        weight: parsed.binning.weight,
        filter: parsed.filter,
        plot: parsed.plot.to_settings()?,
        output: parsed.output.to_settings(),
    })
}

fn grid_line(label: &str, grid: &BinGrid) -> String {
    format!(
        "{label}: {:?} grid [{:e}, {:e}] with {} bins",
        grid.scale, grid.min, grid.max, grid.n_bin
    )
}

fn filter_line(filter: &ParticleFilter) -> String {
    if filter.is_empty() {
        "particle filter: none".into()
    } else {
        format!(
            "particle filter: requires {}",
            filter.require_species.join(", ")
        )
    }
}

fn ensemble_line(input: &EnsembleInput) -> String {
    format!(
        "input: {} members of {}/{}",
        input.members,
        input.directory.display(),
        input.template
    )
}

fn series_line(input: &SeriesInput) -> String {
    format!(
        "input: files matching {:?} in {}",
        input.pattern,
        input.directory.display()
    )
}

impl Ensemble1dSettings {
    pub fn summary_lines(&self) -> Vec<String> {
        vec![
            ensemble_line(&self.input),
            format!("quantity: {}", self.quantity.label()),
            grid_line("grid", &self.grid),
            format!("out of range: {:?}", self.out_of_range),
            filter_line(&self.filter),
            self.output.summary_line(),
        ]
    }
}

impl Ensemble2dSettings {
    pub fn summary_lines(&self) -> Vec<String> {
        vec![
            ensemble_line(&self.input),
            format!("x: {}", self.x.quantity.label()),
            grid_line("x grid", &self.x.grid),
            format!("y: {}", self.y.quantity.label()),
            grid_line("y grid", &self.y.grid),
            format!(
                "weight: {}, out of range: {:?}",
                self.weight.label(),
                self.out_of_range
            ),
            filter_line(&self.filter),
            self.output.summary_line(),
        ]
    }
}

impl ScritTimeSettings {
    pub fn summary_lines(&self) -> Vec<String> {
        vec![
            series_line(&self.input),
            format!(
                "time axis: {} bins up to {}",
                self.time_bins,
                self.time_max_minutes
                    .map(|max| format!("{max} min"))
                    .unwrap_or_else(|| "the last snapshot".into())
            ),
            grid_line("critical supersaturation", &self.supersat_grid),
            format!("scale: {:e}", self.scale),
            filter_line(&self.filter),
            self.output.summary_line(),
        ]
    }
}

impl AgeMapSettings {
    pub fn summary_lines(&self) -> Vec<String> {
        vec![
            self.input.summary_line(),
            grid_line(&self.x.quantity.label(), &self.x.grid),
            grid_line(&self.y.quantity.label(), &self.y.grid),
            format!("cell value: mean {}", self.value.label()),
            filter_line(&self.filter),
            self.output.summary_line(),
        ]
    }
}

impl CcnSettings {
    pub fn summary_lines(&self) -> Vec<String> {
        vec![
            self.input.summary_line(),
            format!("species: {}", self.species.join(", ")),
            format!(
                "supersaturation levels: {} from {:e}% to {:e}%",
                self.supersat_count, self.supersat_min, self.supersat_max
            ),
            self.output.summary_line(),
        ]
    }
}

impl BulkSettings {
    pub fn summary_lines(&self) -> Vec<String> {
        vec![
            series_line(&self.input),
            format!("species: {}", self.species.join(", ")),
            format!(
                "scales: number {:e}, mass {:e}",
                self.number_scale, self.mass_scale
            ),
            self.output.summary_line(),
        ]
    }
}

impl AgingSettings {
    pub fn summary_lines(&self) -> Vec<String> {
        vec![
            series_line(&self.input),
            grid_line("levels", &self.levels),
            self.output.summary_line(),
        ]
    }
}

impl TrackSettings {
    pub fn summary_lines(&self) -> Vec<String> {
        vec![
            series_line(&self.input),
            format!("particle ids: {:?}", self.ids),
            self.output.summary_line(),
        ]
    }
}

impl DistTimeSettings {
    pub fn summary_lines(&self) -> Vec<String> {
        vec![
            series_line(&self.input),
            format!("quantity: {}", self.quantity.label()),
            grid_line("grid", &self.grid),
            format!(
                "weight: {}, out of range: {:?}",
                self.weight.label(),
                self.out_of_range
            ),
            filter_line(&self.filter),
            self.output.summary_line(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(contents: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("job.toml");
        fs::write(&path, contents).unwrap();
        (dir, path)
    }

    #[test]
    fn ensemble_2d_defaults() {
        let (_dir, path) = write_config(
            r#"
            [input]
            directory = "out"
            template = "urban_plume_wc_{member}_00000025.nc"
            members = 10

            [x.quantity]
            kind = "dry_diameter"
            [x.grid]
            min = 1e-9
            max = 1e-5
            n_bin = 70

            [y.quantity]
            kind = "mass_fraction"
            include = ["BC"]
            exclude = ["H2O"]
            [y.grid]
            scale = "linear"
            min = 0.0
            max = 1.0
            n_bin = 50

            [output]
            directory = "figs"
            "#,
        );
        let settings = load_ensemble_2d_from_file(&path).unwrap();
        assert_eq!(settings.input.member_width, 4);
        assert_eq!(settings.x.grid.scale, GridScale::Log);
        assert_eq!(settings.y.grid.n_bin, 50);
        assert_eq!(settings.weight, Weight::Number);
        assert_eq!(settings.out_of_range, OutOfRange::Drop);
        assert!(settings.output.toggles.png && settings.output.toggles.json);
        assert_eq!(settings.plot.color_max_fraction, 1.0);
    }

    #[test]
    fn scrit_time_filters_bc_by_default() {
        let (_dir, path) = write_config(
            r#"
            [input]
            directory = "out"
            pattern = 'urban_plume_wc_0001_(\d{8})\.nc'

            [time]
            n_bin = 500

            [supersat]
            scale = "linear"
            min = 0.0
            max = 1.0
            n_bin = 100

            [plot]
            color_max_fraction = 0.25

            [output]
            directory = "figs"
            prefix = "aero_2d_supersat_"
            "#,
        );
        let settings = load_scrit_time_from_file(&path).unwrap();
        assert_eq!(settings.filter.require_species, vec!["BC".to_string()]);
        assert_eq!(settings.scale, 1e-6);
        assert_eq!(settings.time_max_minutes, None);
        assert_eq!(settings.plot.color_max_fraction, 0.25);
    }

    #[test]
    fn invalid_grid_is_reported() {
        let (_dir, path) = write_config(
            r#"
            [input]
            directory = "out"
            pattern = 'run_(\d+)\.nc'

            [levels]
            min = 0.0
            max = 1.0
            n_bin = 10

            [output]
            directory = "figs"
            "#,
        );
        let err = load_aging_from_file(&path).unwrap_err();
        assert!(format!("{err:#}").contains("level grid"));
    }

    #[test]
    fn ccn_picks_snapshots_by_time() {
        let (_dir, path) = write_config(
            r#"
            [input]
            directory = "out"
            pattern = 'urban_plume_wc_0001_(\d{8})\.nc'
            times_hours = [1.0, 24.0]

            [output]
            directory = "figs"
            "#,
        );
        let settings = load_ccn_from_file(&path).unwrap();
        assert_eq!(settings.input.len(), 2);
        assert_eq!(settings.species, vec!["BC".to_string()]);
        match settings.input {
            SnapshotSelection::AtTimes { series, times_hours } => {
                assert_eq!(series.directory, PathBuf::from("out"));
                assert_eq!(times_hours, vec![1.0, 24.0]);
            }
            other => panic!("unexpected selection {other:?}"),
        }
    }

    #[test]
    fn snapshot_input_needs_one_form() {
        let (_dir, path) = write_config(
            r#"
            [input]
            path = "out/final.nc"
            directory = "out"
            pattern = 'run_(\d+)\.nc'
            times_hours = [1.0]

            [output]
            directory = "figs"
            "#,
        );
        assert!(load_ccn_from_file(&path).is_err());

        let (_dir, path) = write_config(
            r#"
            [input]
            directory = "out"
            pattern = 'run_(\d+)\.nc'
            times_hours = [1.0, 2.0]

            [x]
            quantity = { kind = "dry_diameter" }
            grid = { min = 1e-9, max = 1e-5, n_bin = 10 }

            [y]
            quantity = { kind = "critical_supersat" }
            grid = { min = 1e-3, max = 1e2, n_bin = 10 }

            [output]
            directory = "figs"
            "#,
        );
        let err = load_age_map_from_file(&path).unwrap_err();
        assert!(format!("{err:#}").contains("single time"));
    }

    #[test]
    fn missing_placeholder_is_rejected() {
        let (_dir, path) = write_config(
            r#"
            quantity = { kind = "wet_diameter" }

            [input]
            directory = "out"
            template = "fixed_name.nc"
            members = 2

            [grid]
            min = 1e-9
            max = 1e-5
            n_bin = 10

            [output]
            directory = "figs"
            "#,
        );
        assert!(load_ensemble_1d_from_file(&path).is_err());
    }
}
