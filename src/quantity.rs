use anyhow::Result;
use serde::Deserialize;

use crate::env_state::EnvState;
use crate::particles::{ParticleArray, SpeciesFilter};

/// Per-particle value that can be binned.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Quantity {
    /// Diameter including water, m.
    WetDiameter {
        #[serde(default = "default_scale")]
        scale: f64,
    },
    /// Diameter without water, m.
    DryDiameter {
        #[serde(default = "default_scale")]
        scale: f64,
    },
    /// Mass of `include` over the mass of everything except `exclude`.
    MassFraction {
        include: Vec<String>,
        #[serde(default)]
        exclude: Vec<String>,
        #[serde(default = "default_scale")]
        scale: f64,
    },
    /// Critical supersaturation, percent.
    CriticalSupersat {
        #[serde(default = "default_scale")]
        scale: f64,
    },
    /// Hours between emission and the snapshot time.
    Age {
        #[serde(default = "default_scale")]
        scale: f64,
    },
    Kappa {
        #[serde(default = "default_scale")]
        scale: f64,
    },
}

fn default_scale() -> f64 {
    1.0
}

impl Quantity {
    pub fn label(&self) -> String {
        match self {
            Quantity::WetDiameter { .. } => "wet diameter (m)".into(),
            Quantity::DryDiameter { .. } => "dry diameter (m)".into(),
            Quantity::MassFraction { include, .. } => {
                format!("{} mass fraction", include.join("+"))
            }
            Quantity::CriticalSupersat { .. } => "critical supersaturation (%)".into(),
            Quantity::Age { .. } => "age (h)".into(),
            Quantity::Kappa { .. } => "hygroscopicity κ".into(),
        }
    }

    fn scale(&self) -> f64 {
        match self {
            Quantity::WetDiameter { scale }
            | Quantity::DryDiameter { scale }
            | Quantity::MassFraction { scale, .. }
            | Quantity::CriticalSupersat { scale }
            | Quantity::Age { scale }
            | Quantity::Kappa { scale } => *scale,
        }
    }

    pub fn evaluate(&self, particles: &ParticleArray, env: &EnvState) -> Result<Vec<f64>> {
        let values = match self {
            Quantity::WetDiameter { .. } => particles.diameters(),
            Quantity::DryDiameter { .. } => particles.dry_diameters()?,
            Quantity::MassFraction {
                include, exclude, ..
            } => particles.mass_fractions(
                &SpeciesFilter::include(include),
                &SpeciesFilter::exclude(exclude),
            )?,
            Quantity::CriticalSupersat { .. } => particles.critical_supersats_percent(env)?,
            Quantity::Age { .. } => {
                let now = env.elapsed_hours();
                particles
                    .least_create_times
                    .iter()
                    .map(|created| (created / 3600.0 - now).abs())
                    .collect()
            }
            Quantity::Kappa { .. } => particles.solute_kappas(),
        };

        let scale = self.scale();
        Ok(values.into_iter().map(|value| value * scale).collect())
    }
}

/// Statistical weight given to each particle when binning.
#[derive(Debug, Clone, PartialEq, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Weight {
    /// Number concentration, m^-3.
    #[default]
    Number,
    /// Mass concentration of `species` (all species when empty), kg m^-3.
    Mass {
        #[serde(default)]
        species: Vec<String>,
    },
    Unit,
}

impl Weight {
    pub fn label(&self) -> &'static str {
        match self {
            Weight::Number => "number",
            Weight::Mass { .. } => "mass",
            Weight::Unit => "count",
        }
    }

    pub fn evaluate(&self, particles: &ParticleArray) -> Result<Vec<f64>> {
        match self {
            Weight::Number => Ok(particles.num_concs()),
            Weight::Mass { species } => {
                let filter = if species.is_empty() {
                    SpeciesFilter::All
                } else {
                    SpeciesFilter::include(species)
                };
                Ok(particles
                    .masses(&filter)?
                    .into_iter()
                    .zip(&particles.comp_vols)
                    .map(|(mass, comp_vol)| mass / comp_vol)
                    .collect())
            }
            Weight::Unit => Ok(vec![1.0; particles.n_particles()]),
        }
    }
}

/// Restricts a snapshot to particles carrying some mass of every listed species.
#[derive(Debug, Clone, PartialEq, Deserialize, Default)]
pub struct ParticleFilter {
    #[serde(default)]
    pub require_species: Vec<String>,
}

impl ParticleFilter {
    pub fn is_empty(&self) -> bool {
        self.require_species.is_empty()
    }

    pub fn apply(&self, particles: &ParticleArray) -> Result<ParticleArray> {
        if self.is_empty() {
            return Ok(particles.clone());
        }
        let mut keep = vec![true; particles.n_particles()];
        for species in &self.require_species {
            let masses = particles.masses(&SpeciesFilter::include(&[species]))?;
            for (flag, mass) in keep.iter_mut().zip(masses) {
                *flag &= mass > 0.0;
            }
        }
        particles.select(&keep)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::particles::tests::{sample_env, sample_particles};
    use approx::assert_relative_eq;

    #[test]
    fn quantity_parses_from_toml() {
        #[derive(Deserialize)]
        struct Holder {
            quantity: Quantity,
        }
        let parsed: Holder = toml::from_str(
            r#"
            [quantity]
            kind = "mass_fraction"
            include = ["BC"]
            exclude = ["H2O"]
            "#,
        )
        .unwrap();
        assert_eq!(
            parsed.quantity,
            Quantity::MassFraction {
                include: vec!["BC".into()],
                exclude: vec!["H2O".into()],
                scale: 1.0,
            }
        );
    }

    #[test]
    fn age_is_hours_since_emission() {
        let particles = sample_particles();
        let env = sample_env();
        let ages = Quantity::Age { scale: 1.0 }.evaluate(&particles, &env).unwrap();
        assert_eq!(ages, vec![2.0, 1.5, 1.0]);
    }

    #[test]
    fn scale_multiplies_values() {
        let particles = sample_particles();
        let env = sample_env();
        let metres = Quantity::DryDiameter { scale: 1.0 }
            .evaluate(&particles, &env)
            .unwrap();
        let microns = Quantity::DryDiameter { scale: 1e6 }
            .evaluate(&particles, &env)
            .unwrap();
        assert_relative_eq!(microns[0], metres[0] * 1e6, max_relative = 1e-12);
    }

    #[test]
    fn mass_weight_divides_by_comp_vol() {
        let particles = sample_particles();
        let weights = Weight::Mass {
            species: vec!["BC".into()],
        }
        .evaluate(&particles)
        .unwrap();
        assert_relative_eq!(weights[0], 1e-12);
        assert_relative_eq!(weights[1], 1.5e-12);
        assert_eq!(weights[2], 0.0);
    }

    #[test]
    fn filter_keeps_bc_containing_particles() {
        let particles = sample_particles();
        let filter = ParticleFilter {
            require_species: vec!["BC".into()],
        };
        let kept = filter.apply(&particles).unwrap();
        assert_eq!(kept.ids, vec![10, 11]);
    }
}
