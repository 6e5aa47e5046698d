use serde::Serialize;

use crate::physics::kelvin_parameter;

/// Environment record stored alongside every particle snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EnvState {
    pub temperature: f64,
    pub relative_humidity: f64,
    pub pressure: f64,
    /// Seconds since midnight at the start of the run.
    pub start_time_of_day: f64,
    /// Seconds since the start of the run.
    pub elapsed_time: f64,
}

impl EnvState {
    pub fn kelvin_parameter(&self) -> f64 {
        kelvin_parameter(self.temperature)
    }

    pub fn elapsed_hours(&self) -> f64 {
        self.elapsed_time / 3600.0
    }

    pub fn elapsed_minutes(&self) -> f64 {
        self.elapsed_time / 60.0
    }
}
