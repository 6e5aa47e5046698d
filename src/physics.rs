use std::f64::consts::PI;

pub const WATER_SURFACE_TENSION: f64 = 0.073; // J m^-2
pub const WATER_MOLEC_WEIGHT: f64 = 18e-3; // kg mol^-1
pub const UNIV_GAS_CONST: f64 = 8.314472; // J mol^-1 K^-1
pub const WATER_DENSITY: f64 = 1e3; // kg m^-3

const KAPPA_NEGLIGIBLE: f64 = 1e-30;
const NEWTON_MAX_ITER: usize = 100;
const NEWTON_REL_TOL: f64 = 1e-14;

/// Kelvin parameter `A = 4 σ M_w / (R T ρ_w)` in metres.
pub fn kelvin_parameter(temperature: f64) -> f64 {
    4.0 * WATER_SURFACE_TENSION * WATER_MOLEC_WEIGHT
        / (UNIV_GAS_CONST * temperature * WATER_DENSITY)
}

pub fn diameter_from_volume(volume: f64) -> f64 {
    (6.0 * volume / PI).cbrt()
}

/// Equilibrium saturation ratio over a droplet of wet diameter `diameter`
/// grown on a dry core `dry_diameter` with hygroscopicity `kappa`.
pub fn kohler_saturation(diameter: f64, dry_diameter: f64, kappa: f64, kelvin: f64) -> f64 {
    let wet3 = diameter.powi(3);
    let dry3 = dry_diameter.powi(3);
    (wet3 - dry3) / (wet3 - dry3 * (1.0 - kappa)) * (kelvin / diameter).exp()
}

/// Wet diameter at the maximum of the κ-Köhler curve.
///
/// Largest root of `D^6 + c4 D^4 + c3 D^3 + c0`. The polynomial is convex above
/// that root and the starting point is twice a bound on it, so Newton steps
/// approach it monotonically from above.
pub fn critical_diameter(dry_diameter: f64, kappa: f64, kelvin: f64) -> f64 {
    let dry3 = dry_diameter.powi(3);
    let c4 = -3.0 * dry3 * kappa / kelvin;
    let c3 = -dry3 * (2.0 - kappa);
    let c0 = dry3 * dry3 * (1.0 - kappa);

    let mut d = 2.0 * (-c4).sqrt().max((-c3).cbrt()).max(dry_diameter);
    for _ in 0..NEWTON_MAX_ITER {
        let f = d.powi(6) + c4 * d.powi(4) + c3 * d.powi(3) + c0;
        let df = 6.0 * d.powi(5) + 4.0 * c4 * d.powi(3) + 3.0 * c3 * d.powi(2);
        if df == 0.0 {
            break;
        }
        let step = f / df;
        d -= step;
        if (step / d).abs() < NEWTON_REL_TOL {
            break;
        }
    }
    d
}

/// Critical relative humidity (saturation ratio) needed to activate a particle.
pub fn critical_rel_humid(dry_diameter: f64, kappa: f64, kelvin: f64) -> f64 {
    if kappa < KAPPA_NEGLIGIBLE {
        return (kelvin / dry_diameter).exp();
    }
    let diameter = critical_diameter(dry_diameter, kappa, kelvin);
    kohler_saturation(diameter, dry_diameter, kappa, kelvin)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn kelvin_parameter_near_two_nanometres() {
        let a = kelvin_parameter(298.0);
        assert!(a > 2.0e-9 && a < 2.2e-9, "A = {a}");
    }

    #[test]
    fn critical_point_is_a_maximum() {
        let kelvin = kelvin_parameter(290.0);
        let dry = 100e-9;
        let kappa = 0.6;
        let d_crit = critical_diameter(dry, kappa, kelvin);
        let s_crit = kohler_saturation(d_crit, dry, kappa, kelvin);
        assert!(d_crit > dry);
        assert!(s_crit >= kohler_saturation(d_crit * 0.98, dry, kappa, kelvin));
        assert!(s_crit >= kohler_saturation(d_crit * 1.02, dry, kappa, kelvin));
    }

    #[test]
    fn matches_large_kappa_approximation() {
        let kelvin = kelvin_parameter(298.0);
        let dry = 200e-9;
        let kappa = 1.0;
        let exact = critical_rel_humid(dry, kappa, kelvin);
        let approx = (4.0 * kelvin.powi(3) / (27.0 * kappa * dry.powi(3))).sqrt().exp();
        assert_relative_eq!(exact, approx, max_relative = 1e-3);
    }

    #[test]
    fn insoluble_particle_uses_kelvin_term() {
        let kelvin = kelvin_parameter(298.0);
        assert_relative_eq!(
            critical_rel_humid(50e-9, 0.0, kelvin),
            (kelvin / 50e-9).exp()
        );
    }

    #[test]
    fn smaller_particles_need_more_supersaturation() {
        let kelvin = kelvin_parameter(298.0);
        let small = critical_rel_humid(30e-9, 0.3, kelvin);
        let large = critical_rel_humid(300e-9, 0.3, kelvin);
        assert!(small > large && large > 1.0);
    }
}
