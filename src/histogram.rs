use anyhow::{Result, ensure};
use ndarray::{Array1, Array2};
use serde::Deserialize;

use crate::grid::BinGrid;

/// What happens to a sample whose coordinate falls outside the grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutOfRange {
    #[default]
    Drop,
    Clip,
}

impl OutOfRange {
    fn assign(self, grid: &BinGrid, value: f64) -> Option<usize> {
        match self {
            OutOfRange::Clip => Some(grid.find_clipped(value)),
            OutOfRange::Drop => {
                let index = grid.find(value);
                grid.valid_bin(index).then_some(index as usize)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct Histogram1d {
    pub grid: BinGrid,
    pub counts: Array1<f64>,
    pub dropped_weight: f64,
}

impl Histogram1d {
    pub fn total(&self) -> f64 {
        self.counts.sum()
    }

    /// Divide every bin by its width, giving a number (or mass) per unit of grid coordinate.
    pub fn to_density(&self) -> Array1<f64> {
        Array1::from_shape_fn(self.grid.n_bin, |i| {
            self.counts[i] / self.grid.grid_size(i)
        })
    }
}

#[derive(Debug, Clone)]
pub struct Histogram2d {
    pub x_grid: BinGrid,
    pub y_grid: BinGrid,
    /// Shape `(x_grid.n_bin, y_grid.n_bin)`.
    pub counts: Array2<f64>,
    pub dropped_weight: f64,
}

impl Histogram2d {
    pub fn total(&self) -> f64 {
        self.counts.sum()
    }

    pub fn to_density(&self) -> Array2<f64> {
        Array2::from_shape_fn(self.counts.dim(), |(i, j)| {
            self.counts[[i, j]] / (self.x_grid.grid_size(i) * self.y_grid.grid_size(j))
        })
    }
}

pub fn histogram_1d(
    values: &[f64],
    weights: &[f64],
    grid: &BinGrid,
    policy: OutOfRange,
) -> Result<Histogram1d> {
    ensure!(
        values.len() == weights.len(),
        "histogram_1d: {} values but {} weights",
        values.len(),
        weights.len()
    );

    let mut counts = Array1::<f64>::zeros(grid.n_bin);
    let mut dropped_weight = 0.0;
    for (&value, &weight) in values.iter().zip(weights) {
        match policy.assign(grid, value) {
            Some(index) => counts[index] += weight,
            None => dropped_weight += weight,
        }
    }

    Ok(Histogram1d {
        grid: *grid,
        counts,
        dropped_weight,
    })
}

pub fn histogram_2d(
    x_values: &[f64],
    y_values: &[f64],
    weights: &[f64],
    x_grid: &BinGrid,
    y_grid: &BinGrid,
    policy: OutOfRange,
) -> Result<Histogram2d> {
    ensure!(
        x_values.len() == y_values.len() && x_values.len() == weights.len(),
        "histogram_2d: mismatched inputs ({} x, {} y, {} weights)",
        x_values.len(),
        y_values.len(),
        weights.len()
    );

    let mut counts = Array2::<f64>::zeros((x_grid.n_bin, y_grid.n_bin));
    let mut dropped_weight = 0.0;
    for ((&x, &y), &weight) in x_values.iter().zip(y_values).zip(weights) {
        match (policy.assign(x_grid, x), policy.assign(y_grid, y)) {
            (Some(ix), Some(iy)) => counts[[ix, iy]] += weight,
            _ => dropped_weight += weight,
        }
    }

    Ok(Histogram2d {
        x_grid: *x_grid,
        y_grid: *y_grid,
        counts,
        dropped_weight,
    })
}

/// Mean of `z_values` over the samples landing in each cell; empty cells are NaN.
pub fn multival_2d(
    x_values: &[f64],
    y_values: &[f64],
    z_values: &[f64],
    x_grid: &BinGrid,
    y_grid: &BinGrid,
) -> Result<Array2<f64>> {
    let ones = vec![1.0; x_values.len()];
    let samples = histogram_2d(x_values, y_values, &ones, x_grid, y_grid, OutOfRange::Drop)?;
    let sums = histogram_2d(x_values, y_values, z_values, x_grid, y_grid, OutOfRange::Drop)?;

    Ok(Array2::from_shape_fn(samples.counts.dim(), |cell| {
        if samples.counts[cell] > 0.0 {
            sums.counts[cell] / samples.counts[cell]
        } else {
            f64::NAN
        }
    }))
}
