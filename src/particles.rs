use std::collections::HashMap;

use anyhow::{Result, anyhow, ensure};
use ndarray::Array2;

use crate::env_state::EnvState;
use crate::physics::{critical_rel_humid, diameter_from_volume};

pub const WATER: &str = "H2O";

/// Per-species constants shared by every particle in a snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct AeroData {
    pub names: Vec<String>,
    /// kg m^-3
    pub densities: Vec<f64>,
    pub kappas: Vec<f64>,
}

impl AeroData {
    pub fn new(names: Vec<String>, densities: Vec<f64>, kappas: Vec<f64>) -> Result<Self> {
        ensure!(
            names.len() == densities.len() && names.len() == kappas.len(),
            "species table mismatch: {} names, {} densities, {} kappas",
            names.len(),
            densities.len(),
            kappas.len()
        );
        ensure!(
            densities.iter().all(|density| *density > 0.0),
            "species densities must be positive"
        );
        Ok(Self {
            names,
            densities,
            kappas,
        })
    }

    pub fn n_spec(&self) -> usize {
        self.names.len()
    }

    pub fn species_index(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|candidate| candidate == name)
    }

    /// Every species except water, or all of them when there is no water.
    pub fn dry_filter(&self) -> SpeciesFilter {
        match self.species_index(WATER) {
            Some(_) => SpeciesFilter::dry(),
            None => SpeciesFilter::All,
        }
    }

    fn require_index(&self, name: &str) -> Result<usize> {
        self.species_index(name).ok_or_else(|| {
            anyhow!(
                "unknown aerosol species {name:?} (available: {})",
                self.names.join(", ")
            )
        })
    }
}

/// Selection of species to sum over.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SpeciesFilter {
    #[default]
    All,
    Include(Vec<String>),
    Exclude(Vec<String>),
}

impl SpeciesFilter {
    pub fn include<S: AsRef<str>>(names: &[S]) -> Self {
        Self::Include(names.iter().map(|name| name.as_ref().to_string()).collect())
    }

    pub fn exclude<S: AsRef<str>>(names: &[S]) -> Self {
        Self::Exclude(names.iter().map(|name| name.as_ref().to_string()).collect())
    }

    pub fn dry() -> Self {
        Self::exclude(&[WATER])
    }

    /// Indices of the selected species; names that do not exist are an error.
    pub fn species_indices(&self, aero_data: &AeroData) -> Result<Vec<usize>> {
        match self {
            SpeciesFilter::All => Ok((0..aero_data.n_spec()).collect()),
            SpeciesFilter::Include(names) => names
                .iter()
                .map(|name| aero_data.require_index(name))
                .collect(),
            SpeciesFilter::Exclude(names) => {
                let excluded = names
                    .iter()
                    .map(|name| aero_data.require_index(name))
                    .collect::<Result<Vec<_>>>()?;
                Ok((0..aero_data.n_spec())
                    .filter(|index| !excluded.contains(index))
                    .collect())
            }
        }
    }
}

/// Why a particle left the simulation between two snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalAction {
    None,
    Dilution,
    Coag,
    Halved,
    Weight,
}

impl RemovalAction {
    pub fn from_code(code: i64) -> Result<Self> {
        match code {
            0 => Ok(RemovalAction::None),
            1 => Ok(RemovalAction::Dilution),
            2 => Ok(RemovalAction::Coag),
            3 => Ok(RemovalAction::Halved),
            4 => Ok(RemovalAction::Weight),
            other => Err(anyhow!("unknown particle removal action code {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemovedRecord {
    pub id: i64,
    pub action: RemovalAction,
    /// Particle that absorbed this one when `action` is `Coag`.
    pub other_id: i64,
}

/// Columnar table of the computational particles in one snapshot.
#[derive(Debug, Clone)]
pub struct ParticleArray {
    pub aero_data: AeroData,
    /// Shape `(n_spec, n_part)`, kg.
    pub masses: Array2<f64>,
    /// Composition volume (inverse statistical weight), m^3.
    pub comp_vols: Vec<f64>,
    pub ids: Vec<i64>,
    pub least_create_times: Vec<f64>,
    pub greatest_create_times: Vec<f64>,
    pub n_orig_part: Vec<i64>,
    pub removed: Vec<RemovedRecord>,
}

impl ParticleArray {
    pub fn new(
        aero_data: AeroData,
        masses: Array2<f64>,
        comp_vols: Vec<f64>,
        ids: Vec<i64>,
        least_create_times: Vec<f64>,
        greatest_create_times: Vec<f64>,
        n_orig_part: Vec<i64>,
        removed: Vec<RemovedRecord>,
    ) -> Result<Self> {
        let (n_spec, n_part) = masses.dim();
        ensure!(
            n_spec == aero_data.n_spec(),
            "mass table has {n_spec} species rows but {} species are defined",
            aero_data.n_spec()
        );
        for (label, len) in [
            ("comp_vols", comp_vols.len()),
            ("ids", ids.len()),
            ("least_create_times", least_create_times.len()),
            ("greatest_create_times", greatest_create_times.len()),
            ("n_orig_part", n_orig_part.len()),
        ] {
            ensure!(
                len == n_part,
                "particle column {label} has {len} entries, expected {n_part}"
            );
        }

        Ok(Self {
            aero_data,
            masses,
            comp_vols,
            ids,
            least_create_times,
            greatest_create_times,
            n_orig_part,
            removed,
        })
    }

    pub fn n_particles(&self) -> usize {
        self.masses.ncols()
    }

    /// Per-particle mass summed over the selected species.
    pub fn masses(&self, filter: &SpeciesFilter) -> Result<Vec<f64>> {
        let species = filter.species_indices(&self.aero_data)?;
        Ok((0..self.n_particles())
            .map(|i| species.iter().map(|&s| self.masses[[s, i]]).sum::<f64>())
            .collect())
    }

    pub fn volumes(&self, filter: &SpeciesFilter) -> Result<Vec<f64>> {
        let species = filter.species_indices(&self.aero_data)?;
        Ok((0..self.n_particles())
            .map(|i| {
                species
                    .iter()
                    .map(|&s| self.masses[[s, i]] / self.aero_data.densities[s])
                    .sum::<f64>()
            })
            .collect())
    }

    pub fn diameters(&self) -> Vec<f64> {
        (0..self.n_particles())
            .map(|i| {
                let volume: f64 = (0..self.aero_data.n_spec())
                    .map(|s| self.masses[[s, i]] / self.aero_data.densities[s])
                    .sum();
                diameter_from_volume(volume)
            })
            .collect()
    }

    /// Diameter of the particle with water removed.
    pub fn dry_diameters(&self) -> Result<Vec<f64>> {
        Ok(self
            .volumes(&self.aero_data.dry_filter())?
            .into_iter()
            .map(diameter_from_volume)
            .collect())
    }

    /// Number concentration each computational particle represents, m^-3.
    pub fn num_concs(&self) -> Vec<f64> {
        self.comp_vols.iter().map(|comp_vol| 1.0 / comp_vol).collect()
    }

    /// Volume-weighted hygroscopicity of the non-water species.
    pub fn solute_kappas(&self) -> Vec<f64> {
        let water = self.aero_data.species_index(WATER);
        (0..self.n_particles())
            .map(|i| {
                let mut volume = 0.0;
                let mut weighted = 0.0;
                for s in 0..self.aero_data.n_spec() {
                    if Some(s) == water {
                        continue;
                    }
                    let species_volume = self.masses[[s, i]] / self.aero_data.densities[s];
                    volume += species_volume;
                    weighted += species_volume * self.aero_data.kappas[s];
                }
                if volume > 0.0 { weighted / volume } else { 0.0 }
            })
            .collect()
    }

    pub fn critical_rel_humids(&self, env: &EnvState) -> Result<Vec<f64>> {
        let kelvin = env.kelvin_parameter();
        let dry_diameters = self.dry_diameters()?;
        Ok(dry_diameters
            .iter()
            .zip(self.solute_kappas())
            .map(|(&dry_diameter, kappa)| critical_rel_humid(dry_diameter, kappa, kelvin))
            .collect())
    }

    /// Critical supersaturation `(S_c - 1) * 100`, in percent.
    pub fn critical_supersats_percent(&self, env: &EnvState) -> Result<Vec<f64>> {
        Ok(self
            .critical_rel_humids(env)?
            .into_iter()
            .map(|rh| (rh - 1.0) * 100.0)
            .collect())
    }

    /// Mass of `numerator` species over mass of `denominator` species, 0 where the latter is 0.
    pub fn mass_fractions(
        &self,
        numerator: &SpeciesFilter,
        denominator: &SpeciesFilter,
    ) -> Result<Vec<f64>> {
        let top = self.masses(numerator)?;
        let bottom = self.masses(denominator)?;
        Ok(top
            .iter()
            .zip(&bottom)
            .map(|(&t, &b)| if b > 0.0 { t / b } else { 0.0 })
            .collect())
    }

    pub fn index_by_id(&self) -> HashMap<i64, usize> {
        self.ids
            .iter()
            .enumerate()
            .map(|(index, &id)| (id, index))
            .collect()
    }

    /// Keep only the particles for which `keep` returns true.
    pub fn select(&self, keep: &[bool]) -> Result<ParticleArray> {
        ensure!(
            keep.len() == self.n_particles(),
            "selection mask has {} entries for {} particles",
            keep.len(),
            self.n_particles()
        );
        let chosen: Vec<usize> = (0..keep.len()).filter(|&i| keep[i]).collect();
        let masses = self.masses.select(ndarray::Axis(1), &chosen);
        let pick_f64 = |column: &[f64]| chosen.iter().map(|&i| column[i]).collect::<Vec<_>>();
        let pick_i64 = |column: &[i64]| chosen.iter().map(|&i| column[i]).collect::<Vec<_>>();

        ParticleArray::new(
            self.aero_data.clone(),
            masses,
            pick_f64(&self.comp_vols),
            pick_i64(&self.ids),
            pick_f64(&self.least_create_times),
            pick_f64(&self.greatest_create_times),
            pick_i64(&self.n_orig_part),
            self.removed.clone(),
        )
    }
}
