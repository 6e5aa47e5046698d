use anyhow::{Result, ensure};
use serde::{Deserialize, Serialize};

/// Spacing of the bins along a [`BinGrid`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GridScale {
    Linear,
    Log,
}

/// Bin axis over `[min, max]` split into `n_bin` equal steps of the grid coordinate.
///
/// For log grids the coordinate is `log10(value)`, so every bin spans the same
/// fraction of a decade.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BinGrid {
    pub scale: GridScale,
    pub min: f64,
    pub max: f64,
    pub n_bin: usize,
}

impl BinGrid {
    pub fn linear(min: f64, max: f64, n_bin: usize) -> Result<Self> {
        Self::new(GridScale::Linear, min, max, n_bin)
    }

    pub fn log(min: f64, max: f64, n_bin: usize) -> Result<Self> {
        Self::new(GridScale::Log, min, max, n_bin)
    }

    pub fn new(scale: GridScale, min: f64, max: f64, n_bin: usize) -> Result<Self> {
        ensure!(n_bin > 0, "grid needs at least one bin");
        ensure!(
            min.is_finite() && max.is_finite(),
            "grid bounds must be finite (got {min}, {max})"
        );
        ensure!(max > min, "grid max {max} must exceed min {min}");
        if scale == GridScale::Log {
            ensure!(min > 0.0, "log grid min must be positive (got {min})");
        }
        Ok(Self {
            scale,
            min,
            max,
            n_bin,
        })
    }

    fn coord(&self, value: f64) -> f64 {
        match self.scale {
            GridScale::Linear => value,
            GridScale::Log => value.log10(),
        }
    }

    fn uncoord(&self, coord: f64) -> f64 {
        match self.scale {
            GridScale::Linear => coord,
            GridScale::Log => 10f64.powf(coord),
        }
    }

    fn coord_step(&self) -> f64 {
        (self.coord(self.max) - self.coord(self.min)) / self.n_bin as f64
    }

    pub fn edges(&self) -> Vec<f64> {
        let lo = self.coord(self.min);
        let step = self.coord_step();
        (0..=self.n_bin)
            .map(|i| {
                if i == 0 {
                    self.min
                } else if i == self.n_bin {
                    self.max
                } else {
                    self.uncoord(lo + step * i as f64)
                }
            })
            .collect()
    }

    pub fn center(&self, index: usize) -> f64 {
        let lo = self.coord(self.min);
        self.uncoord(lo + self.coord_step() * (index as f64 + 0.5))
    }

    pub fn centers(&self) -> Vec<f64> {
        (0..self.n_bin).map(|i| self.center(i)).collect()
    }

    /// Width of bin `index` in grid coordinates (decades for log grids).
    pub fn grid_size(&self, _index: usize) -> f64 {
        self.coord_step()
    }

    /// Raw bin index, negative below `min` and `>= n_bin` at or above `max`.
    ///
    /// Values without a grid coordinate (NaN, non-positive on a log grid)
    /// are reported as underflow.
    pub fn find(&self, value: f64) -> isize {
        let coord = self.coord(value);
        if coord.is_nan() || coord == f64::NEG_INFINITY {
            return -1;
        }
        if coord == f64::INFINITY {
            return self.n_bin as isize;
        }
        let raw = ((coord - self.coord(self.min)) / self.coord_step()).floor();
        if raw < -1.0 {
            -1
        } else if raw > self.n_bin as f64 {
            self.n_bin as isize
        } else {
            raw as isize
        }
    }

    pub fn find_clipped(&self, value: f64) -> usize {
        self.find(value).clamp(0, self.n_bin as isize - 1) as usize
    }

    /// Index with one extra bin on each side: 0 is underflow, `n_bin + 1` overflow.
    pub fn find_clipped_outer(&self, value: f64) -> usize {
        (self.find(value) + 1).clamp(0, self.n_bin as isize + 1) as usize
    }

    pub fn valid_bin(&self, index: isize) -> bool {
        index >= 0 && (index as usize) < self.n_bin
    }
}

pub fn linspace(start: f64, end: f64, count: usize) -> Vec<f64> {
    if count <= 1 {
        return vec![start];
    }

    let step = (end - start) / (count as f64 - 1.0);
    (0..count).map(|i| start + step * i as f64).collect()
}

/// `count` points spaced evenly in `log10` between `start` and `end`.
pub fn logspace(start: f64, end: f64, count: usize) -> Vec<f64> {
    linspace(start.log10(), end.log10(), count)
        .into_iter()
        .map(|exponent| 10f64.powf(exponent))
        .collect()
}
