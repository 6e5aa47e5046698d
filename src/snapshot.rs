use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail, ensure};
use ndarray::Array2;
use netcdf3::{DataSet, DataVector, FileReader, FileWriter, InvalidDataSet, Version, WriteError};
use tracing::debug;

use crate::env_state::EnvState;
use crate::particles::{AeroData, ParticleArray, RemovalAction, RemovedRecord};

const SPECIES_DIM: &str = "aero_species";
const PARTICLE_DIM: &str = "aero_particle";
const REMOVED_DIM: &str = "aero_removed";
const MASS_VAR: &str = "aero_particle_mass";

/// One simulation output file: the particle table plus its environment.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub path: PathBuf,
    pub particles: ParticleArray,
    pub env: EnvState,
}

impl Snapshot {
    pub fn time(&self) -> f64 {
        self.env.elapsed_time
    }
}

/// Layout facts gathered from the header before any variable is read.
struct Header {
    n_spec: usize,
    n_part: usize,
    species_names: Vec<String>,
    mass_particle_major: bool,
    has_comp_vol: bool,
    has_num_conc: bool,
    has_n_orig_part: bool,
    has_greatest_create_time: bool,
    has_removed: bool,
    has_start_time_of_day: bool,
    time_var: &'static str,
}

impl Header {
    fn from_data_set(data_set: &DataSet) -> Result<Self> {
        let n_spec = data_set
            .dim_size(SPECIES_DIM)
            .ok_or_else(|| anyhow!("missing dimension {SPECIES_DIM}"))?;
        let n_part = data_set.dim_size(PARTICLE_DIM).unwrap_or(0);

        let names_attr = data_set
            .get_var_attr_as_string(SPECIES_DIM, "names")
            .ok_or_else(|| anyhow!("missing attribute {SPECIES_DIM}:names"))?;
        let species_names: Vec<String> = names_attr
            .trim_end_matches('\0')
            .split(',')
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .collect();
        ensure!(
            species_names.len() == n_spec,
            "{SPECIES_DIM}:names lists {} species but the dimension has {n_spec}",
            species_names.len()
        );

        let mass_particle_major = match data_set.get_var(MASS_VAR) {
            Some(var) => var
                .dim_names()
                .first()
                .map(|dim| dim == PARTICLE_DIM)
                .unwrap_or(false),
            None if n_part == 0 => false,
            None => bail!("missing variable {MASS_VAR}"),
        };

        let time_var = if data_set.has_var("elapsed_time") {
            "elapsed_time"
        } else if data_set.has_var("time") {
            "time"
        } else {
            bail!("missing variable elapsed_time (or time)");
        };

        Ok(Self {
            n_spec,
            n_part,
            species_names,
            mass_particle_major,
            has_comp_vol: data_set.has_var("aero_comp_vol"),
            has_num_conc: data_set.has_var("aero_num_conc"),
            has_n_orig_part: data_set.has_var("aero_n_orig_part"),
            has_greatest_create_time: data_set.has_var("aero_greatest_create_time"),
            has_removed: data_set.dim_size(REMOVED_DIM).unwrap_or(0) > 0
                && data_set.has_var("aero_removed_id"),
            has_start_time_of_day: data_set.has_var("start_time_of_day"),
            time_var,
        })
    }
}

pub fn read_snapshot(path: &Path) -> Result<Snapshot> {
    read_snapshot_inner(path)
        .with_context(|| format!("failed to read snapshot {}", path.display()))
}

fn read_snapshot_inner(path: &Path) -> Result<Snapshot> {
    let mut reader =
        FileReader::open(path).map_err(|err| anyhow!("cannot open netCDF file: {err:?}"))?;
    let header = Header::from_data_set(reader.data_set())?;

    let env = EnvState {
        temperature: read_scalar(&mut reader, "temperature")?,
        relative_humidity: read_scalar(&mut reader, "relative_humidity")?,
        pressure: read_scalar(&mut reader, "pressure")?,
        start_time_of_day: if header.has_start_time_of_day {
            read_scalar(&mut reader, "start_time_of_day")?
        } else {
            0.0
        },
        elapsed_time: read_scalar(&mut reader, header.time_var)?,
    };

    let densities = read_f64(&mut reader, "aero_density", header.n_spec)?;
    let kappas = read_f64(&mut reader, "aero_kappa", header.n_spec)?;
    let aero_data = AeroData::new(header.species_names.clone(), densities, kappas)?;

    let n_part = header.n_part;
    let particles = if n_part == 0 {
        ParticleArray::new(
            aero_data,
            Array2::zeros((header.n_spec, 0)),
            Vec::new(),
            Vec::new(),
            Vec::new(),
            Vec::new(),
            Vec::new(),
            Vec::new(),
        )?
    } else {
        let flat = read_f64(&mut reader, MASS_VAR, header.n_spec * n_part)?;
        let masses = if header.mass_particle_major {
            Array2::from_shape_vec((n_part, header.n_spec), flat)?
                .reversed_axes()
                .as_standard_layout()
                .to_owned()
        } else {
            Array2::from_shape_vec((header.n_spec, n_part), flat)?
        };

        let comp_vols = if header.has_comp_vol {
            read_f64(&mut reader, "aero_comp_vol", n_part)?
        } else if header.has_num_conc {
            read_f64(&mut reader, "aero_num_conc", n_part)?
                .into_iter()
                .map(|num_conc| 1.0 / num_conc)
                .collect()
        } else {
            bail!("missing variable aero_comp_vol (or aero_num_conc)");
        };

        let ids = read_i64(&mut reader, "aero_id", n_part)?;
        let least_create_times = read_f64(&mut reader, "aero_least_create_time", n_part)?;
        let greatest_create_times = if header.has_greatest_create_time {
            read_f64(&mut reader, "aero_greatest_create_time", n_part)?
        } else {
            least_create_times.clone()
        };
        let n_orig_part = if header.has_n_orig_part {
            read_n_orig_part(&mut reader, n_part)?
        } else {
            vec![1; n_part]
        };
        let removed = if header.has_removed {
            read_removed(&mut reader)?
        } else {
            Vec::new()
        };

        ParticleArray::new(
            aero_data,
            masses,
            comp_vols,
            ids,
            least_create_times,
            greatest_create_times,
            n_orig_part,
            removed,
        )?
    };

    reader.close();
    debug!(
        file = %path.display(),
        particles = particles.n_particles(),
        time = env.elapsed_time,
        "read snapshot"
    );

    Ok(Snapshot {
        path: path.to_path_buf(),
        particles,
        env,
    })
}

fn read_raw(reader: &mut FileReader, name: &str) -> Result<DataVector> {
    reader
        .read_var(name)
        .map_err(|err| anyhow!("cannot read variable {name}: {err:?}"))
}

fn widen(data: DataVector) -> Vec<f64> {
    match data {
        DataVector::I8(values) => values.into_iter().map(f64::from).collect(),
        DataVector::U8(values) => values.into_iter().map(f64::from).collect(),
        DataVector::I16(values) => values.into_iter().map(f64::from).collect(),
        DataVector::I32(values) => values.into_iter().map(f64::from).collect(),
        DataVector::F32(values) => values.into_iter().map(f64::from).collect(),
        DataVector::F64(values) => values,
    }
}

fn read_f64(reader: &mut FileReader, name: &str, expected: usize) -> Result<Vec<f64>> {
    let values = widen(read_raw(reader, name)?);
    ensure!(
        values.len() == expected,
        "variable {name} has {} values, expected {expected}",
        values.len()
    );
    Ok(values)
}

fn read_i64(reader: &mut FileReader, name: &str, expected: usize) -> Result<Vec<i64>> {
    Ok(read_f64(reader, name, expected)?
        .into_iter()
        .map(|value| value.round() as i64)
        .collect())
}

fn read_scalar(reader: &mut FileReader, name: &str) -> Result<f64> {
    widen(read_raw(reader, name)?)
        .first()
        .copied()
        .ok_or_else(|| anyhow!("variable {name} is empty"))
}

/// Number of original particles merged into each particle, summed over sources.
fn read_n_orig_part(reader: &mut FileReader, n_part: usize) -> Result<Vec<i64>> {
    let values = widen(read_raw(reader, "aero_n_orig_part")?);
    ensure!(
        !values.is_empty() && values.len() % n_part == 0,
        "variable aero_n_orig_part has {} values for {n_part} particles",
        values.len()
    );
    let per_particle = values.len() / n_part;
    Ok(values
        .chunks(per_particle)
        .map(|chunk| chunk.iter().sum::<f64>().round() as i64)
        .collect())
}

fn read_removed(reader: &mut FileReader) -> Result<Vec<RemovedRecord>> {
    let ids = widen(read_raw(reader, "aero_removed_id")?);
    let actions = widen(read_raw(reader, "aero_removed_action")?);
    let other_ids = widen(read_raw(reader, "aero_removed_other_id")?);
    ensure!(
        ids.len() == actions.len() && ids.len() == other_ids.len(),
        "removal columns differ in length"
    );

    ids.iter()
        .zip(&actions)
        .zip(&other_ids)
        .map(|((&id, &action), &other_id)| {
            Ok(RemovedRecord {
                id: id.round() as i64,
                action: RemovalAction::from_code(action.round() as i64)?,
                other_id: other_id.round() as i64,
            })
        })
        .collect()
}

fn removal_code(action: RemovalAction) -> i32 {
    match action {
        RemovalAction::None => 0,
        RemovalAction::Dilution => 1,
        RemovalAction::Coag => 2,
        RemovalAction::Halved => 3,
        RemovalAction::Weight => 4,
    }
}

/// Write a snapshot in the layout [`read_snapshot`] understands.
///
/// Classic netCDF cannot store zero-length fixed dimensions, so the particle
/// table must not be empty.
pub fn write_snapshot(path: &Path, particles: &ParticleArray, env: &EnvState) -> Result<()> {
    let n_spec = particles.aero_data.n_spec();
    let n_part = particles.n_particles();
    ensure!(n_part > 0, "cannot write a snapshot without particles");

    let no_dims: &[&str] = &[];
    let mut data_set = DataSet::new();
    let mut define = || -> std::result::Result<(), InvalidDataSet> {
        data_set.add_fixed_dim(SPECIES_DIM, n_spec)?;
        data_set.add_fixed_dim(PARTICLE_DIM, n_part)?;
        data_set.add_var_i32(SPECIES_DIM, &[SPECIES_DIM])?;
        data_set.add_var_attr_string(SPECIES_DIM, "names", particles.aero_data.names.join(","))?;
        data_set.add_var_f64("aero_density", &[SPECIES_DIM])?;
        data_set.add_var_f64("aero_kappa", &[SPECIES_DIM])?;
        data_set.add_var_f64(MASS_VAR, &[SPECIES_DIM, PARTICLE_DIM])?;
        data_set.add_var_f64("aero_comp_vol", &[PARTICLE_DIM])?;
        data_set.add_var_i32("aero_id", &[PARTICLE_DIM])?;
        data_set.add_var_f64("aero_least_create_time", &[PARTICLE_DIM])?;
        data_set.add_var_f64("aero_greatest_create_time", &[PARTICLE_DIM])?;
        data_set.add_var_i32("aero_n_orig_part", &[PARTICLE_DIM])?;
        for name in [
            "temperature",
            "relative_humidity",
            "pressure",
            "start_time_of_day",
            "elapsed_time",
        ] {
            data_set.add_var_f64(name, no_dims)?;
        }
        if !particles.removed.is_empty() {
            data_set.add_fixed_dim(REMOVED_DIM, particles.removed.len())?;
            data_set.add_var_i32("aero_removed_id", &[REMOVED_DIM])?;
            data_set.add_var_i32("aero_removed_action", &[REMOVED_DIM])?;
            data_set.add_var_i32("aero_removed_other_id", &[REMOVED_DIM])?;
        }
        Ok(())
    };
    define().map_err(|err| anyhow!("invalid snapshot layout: {err:?}"))?;

    let to_i32 = |values: &[i64]| -> Result<Vec<i32>> {
        values
            .iter()
            .map(|&value| i32::try_from(value).context("integer column exceeds netCDF int range"))
            .collect()
    };
    let species_ids: Vec<i32> = (1..=n_spec as i32).collect();
    let masses: Vec<f64> = particles.masses.iter().copied().collect();
    let ids = to_i32(&particles.ids)?;
    let n_orig_part = to_i32(&particles.n_orig_part)?;
    let removed_ids: Vec<i64> = particles.removed.iter().map(|r| r.id).collect();
    let removed_ids = to_i32(&removed_ids)?;
    let other_ids: Vec<i64> = particles.removed.iter().map(|r| r.other_id).collect();
    let other_ids = to_i32(&other_ids)?;

    let mut writer = FileWriter::open(path)
        .map_err(|err| anyhow!("cannot create {}: {err:?}", path.display()))?;
    let mut write = || -> std::result::Result<(), WriteError> {
        writer.set_def(&data_set, Version::Classic, 0)?;
        writer.write_var_i32(SPECIES_DIM, &species_ids)?;
        writer.write_var_f64("aero_density", &particles.aero_data.densities)?;
        writer.write_var_f64("aero_kappa", &particles.aero_data.kappas)?;
        writer.write_var_f64(MASS_VAR, &masses)?;
        writer.write_var_f64("aero_comp_vol", &particles.comp_vols)?;
        writer.write_var_i32("aero_id", &ids)?;
        writer.write_var_f64("aero_least_create_time", &particles.least_create_times)?;
        writer.write_var_f64("aero_greatest_create_time", &particles.greatest_create_times)?;
        writer.write_var_i32("aero_n_orig_part", &n_orig_part)?;
        writer.write_var_f64("temperature", &[env.temperature])?;
        writer.write_var_f64("relative_humidity", &[env.relative_humidity])?;
        writer.write_var_f64("pressure", &[env.pressure])?;
        writer.write_var_f64("start_time_of_day", &[env.start_time_of_day])?;
        writer.write_var_f64("elapsed_time", &[env.elapsed_time])?;
        if !particles.removed.is_empty() {
            let actions: Vec<i32> = particles
                .removed
                .iter()
                .map(|r| removal_code(r.action))
                .collect();
            writer.write_var_i32("aero_removed_id", &removed_ids)?;
            writer.write_var_i32("aero_removed_action", &actions)?;
            writer.write_var_i32("aero_removed_other_id", &other_ids)?;
        }
        Ok(())
    };
    write().map_err(|err| anyhow!("failed to write {}: {err:?}", path.display()))?;
    writer
        .close()
        .map_err(|err| anyhow!("failed to close {}: {err:?}", path.display()))?;
    Ok(())
}
