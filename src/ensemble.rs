use anyhow::{Result, anyhow, ensure};
use ndarray::{Array, Array1, Array2, Array3, Axis, Dimension, RemoveAxis, stack};

/// Per-bin statistics across repeated runs of the same scenario.
#[derive(Debug, Clone)]
pub struct EnsembleStats<D: Dimension> {
    pub members: usize,
    pub mean: Array<f64, D>,
    /// Population standard deviation (no Bessel correction).
    pub std: Array<f64, D>,
    /// `std / mean`, NaN wherever the mean is zero.
    pub cv: Array<f64, D>,
}

impl<D: Dimension> EnsembleStats<D> {
    pub fn masked_bins(&self) -> usize {
        self.cv.iter().filter(|value| value.is_nan()).count()
    }
}

/// Statistics over the leading axis of `stacked`, which indexes ensemble members.
pub fn member_stats<D>(stacked: &Array<f64, D>) -> Result<EnsembleStats<D::Smaller>>
where
    D: Dimension + RemoveAxis,
{
    let members = stacked.len_of(Axis(0));
    ensure!(members > 0, "ensemble statistics need at least one member");

    let mean = stacked
        .mean_axis(Axis(0))
        .ok_or_else(|| anyhow!("ensemble mean over an empty axis"))?;
    let std = stacked.std_axis(Axis(0), 0.0);
    let mut cv = std.clone();
    cv.zip_mut_with(&mean, |value, &bin_mean| {
        *value = if bin_mean != 0.0 {
            *value / bin_mean
        } else {
            f64::NAN
        };
    });

    Ok(EnsembleStats {
        members,
        mean,
        std,
        cv,
    })
}

pub fn stack_1d(members: &[Array1<f64>]) -> Result<Array2<f64>> {
    ensure!(!members.is_empty(), "no ensemble members to stack");
    let views: Vec<_> = members.iter().map(|member| member.view()).collect();
    stack(Axis(0), &views).map_err(|err| anyhow!("ensemble members differ in shape: {err}"))
}

pub fn stack_2d(members: &[Array2<f64>]) -> Result<Array3<f64>> {
    ensure!(!members.is_empty(), "no ensemble members to stack");
    let views: Vec<_> = members.iter().map(|member| member.view()).collect();
    stack(Axis(0), &views).map_err(|err| anyhow!("ensemble members differ in shape: {err}"))
}
