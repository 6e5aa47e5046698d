use std::collections::{BTreeMap, HashMap};

use anyhow::{Result, bail, ensure};
use ndarray::Array2;
use serde_json::json;
use tracing::{debug, info};

use crate::config::AgingSettings;
use crate::env_state::EnvState;
use crate::grid::BinGrid;
use crate::output::ArtifactWriter;
use crate::particles::{ParticleArray, RemovalAction};
use crate::plotting::{AxisScale, LineChart, Series, TickFormat, render_line_chart};
use crate::snapshot::read_snapshot;

use super::{JobReport, series_files};

/// Follows particle ids through a snapshot series, recording when each one first
/// appeared and when it (or the particle it coagulated into) first reached each
/// critical-supersaturation level.
///
/// Level `b` covers every particle whose bin under `find_clipped_outer` is at most
/// `b`, so there are `n_bin + 2` levels and they nest.
#[derive(Debug)]
pub struct AgingTracker {
    levels: BinGrid,
    n_spec: Option<usize>,
    snapshots: usize,
    time_emitted: BTreeMap<i64, f64>,
    mass_emitted: BTreeMap<i64, Vec<f64>>,
    time_entered: Vec<BTreeMap<i64, f64>>,
    coagulated_to: HashMap<i64, i64>,
}

/// Per-id arrays; `-1` marks ids that never reached the state in question.
#[derive(Debug, Clone)]
pub struct AgingArrays {
    pub time_emitted: Vec<f64>,
    /// Shape `(num_id, n_spec)`.
    pub mass_emitted: Array2<f64>,
    /// One vector per level.
    pub time_entered: Vec<Vec<f64>>,
    pub time_aging: Vec<Vec<f64>>,
}

impl AgingTracker {
    pub fn new(levels: BinGrid) -> Self {
        Self {
            levels,
            n_spec: None,
            snapshots: 0,
            time_emitted: BTreeMap::new(),
            mass_emitted: BTreeMap::new(),
            time_entered: vec![BTreeMap::new(); levels.n_bin + 2],
            coagulated_to: HashMap::new(),
        }
    }

    pub fn n_levels(&self) -> usize {
        self.time_entered.len()
    }

    /// Feed the next snapshot in time order.
    pub fn observe(&mut self, time: f64, particles: &ParticleArray, env: &EnvState) -> Result<()> {
        let n_spec = particles.aero_data.n_spec();
        match self.n_spec {
            Some(expected) => ensure!(
                expected == n_spec,
                "snapshot at {time} s has {n_spec} species, earlier snapshots had {expected}"
            ),
            None => self.n_spec = Some(n_spec),
        }

        let supersats = particles.critical_supersats_percent(env)?;
        let level_of: Vec<usize> = supersats
            .iter()
            .map(|&supersat| self.levels.find_clipped_outer(supersat))
            .collect();
        let index_by_id = particles.index_by_id();

        // Removal records describe what happened since the previous snapshot.
        if self.snapshots > 0 {
            for record in &particles.removed {
                if record.action != RemovalAction::Coag {
                    continue;
                }
                if let Some(previous) = self.coagulated_to.get(&record.id) {
                    bail!(
                        "particle {} coagulated twice, into {} and {} (latter at {time} s)",
                        record.id,
                        previous,
                        record.other_id
                    );
                }
                self.coagulated_to.insert(record.id, record.other_id);
            }
        }

        for (index, &id) in particles.ids.iter().enumerate() {
            if !self.time_emitted.contains_key(&id) {
                self.time_emitted.insert(id, time);
                self.mass_emitted
                    .insert(id, particles.masses.column(index).to_vec());
            }
            self.mark_entered(id, level_of[index], time);
        }

        let coagulated: Vec<i64> = self.coagulated_to.keys().copied().collect();
        for id in coagulated {
            let final_id = self.final_id(id)?;
            if let Some(&index) = index_by_id.get(&final_id) {
                self.mark_entered(id, level_of[index], time);
            }
        }

        self.snapshots += 1;
        debug!(
            time,
            tracked = self.time_emitted.len(),
            coagulated = self.coagulated_to.len(),
            "observed snapshot"
        );
        Ok(())
    }

    fn mark_entered(&mut self, id: i64, level: usize, time: f64) {
        for entered in &mut self.time_entered[level..] {
            entered.entry(id).or_insert(time);
        }
    }

    /// End of the coagulation chain starting at `id`.
    fn final_id(&self, id: i64) -> Result<i64> {
        let mut current = id;
        for _ in 0..=self.coagulated_to.len() {
            match self.coagulated_to.get(&current) {
                Some(&next) => current = next,
                None => return Ok(current),
            }
        }
        bail!("coagulation chain starting at particle {id} loops")
    }

    pub fn finish(&self) -> Result<AgingArrays> {
        let Some((&max_id, _)) = self.time_emitted.last_key_value() else {
            bail!("no particles were observed");
        };
        if let Some((&min_id, _)) = self.time_emitted.first_key_value() {
            ensure!(min_id >= 0, "particle id {min_id} is negative");
        }
        let num_id = usize::try_from(max_id)? + 1;
        let n_spec = self.n_spec.unwrap_or(0);

        let mut time_emitted = vec![-1.0; num_id];
        let mut mass_emitted = Array2::from_elem((num_id, n_spec), -1.0);
        for (&id, &time) in &self.time_emitted {
            time_emitted[id as usize] = time;
        }
        for (&id, masses) in &self.mass_emitted {
            for (s, &mass) in masses.iter().enumerate() {
                mass_emitted[[id as usize, s]] = mass;
            }
        }

        let mut time_entered = Vec::with_capacity(self.n_levels());
        let mut time_aging = Vec::with_capacity(self.n_levels());
        for (level, entered_map) in self.time_entered.iter().enumerate() {
            let mut entered = vec![-1.0; num_id];
            let mut aging = vec![-1.0; num_id];
            for (&id, &time) in entered_map {
                ensure!(
                    id >= 0 && (id as usize) < num_id,
                    "particle {id} entered level {level} at {time} s but was never emitted"
                );
                let emitted = time_emitted[id as usize];
                ensure!(
                    emitted >= 0.0,
                    "particle {id} entered level {level} at {time} s but was never emitted"
                );
                entered[id as usize] = time;
                aging[id as usize] = time - emitted;
            }
            time_entered.push(entered);
            time_aging.push(aging);
        }

        Ok(AgingArrays {
            time_emitted,
            mass_emitted,
            time_entered,
            time_aging,
        })
    }
}

fn mean_aging_hours(aging: &[f64]) -> (usize, f64) {
    let reached: Vec<f64> = aging.iter().copied().filter(|&t| t >= 0.0).collect();
    if reached.is_empty() {
        (0, f64::NAN)
    } else {
        let mean = reached.iter().sum::<f64>() / reached.len() as f64;
        (reached.len(), mean / 3600.0)
    }
}

/// Per-particle aging times to each critical-supersaturation level.
pub fn run(settings: &AgingSettings) -> Result<JobReport> {
    let files = series_files(&settings.input)?;
    let mut tracker = AgingTracker::new(settings.levels);
    for file in &files {
        let snapshot = read_snapshot(&file.path)?;
        tracker.observe(file.time, &snapshot.particles, &snapshot.env)?;
        info!(
            file = %file.path.display(),
            time = file.time,
            particles = snapshot.particles.n_particles(),
            "tracked snapshot"
        );
    }
    let arrays = tracker.finish()?;

    let mut writer = ArtifactWriter::new(&settings.output)?;
    writer.vector_txt("level_edges.txt", &settings.levels.edges())?;
    writer.vector_txt("time_emitted.txt", &arrays.time_emitted)?;
    writer.matrix_txt("mass_emitted.txt", arrays.mass_emitted.view())?;
    for (level, (entered, aging)) in arrays
        .time_entered
        .iter()
        .zip(&arrays.time_aging)
        .enumerate()
    {
        writer.vector_txt(&format!("level_{level:08}_time_entered.txt"), entered)?;
        writer.vector_txt(&format!("level_{level:08}_time_aging.txt"), aging)?;
    }

    // Level b holds particles below edge b; the last level is unbounded.
    let edges = settings.levels.edges();
    let n_levels = arrays.time_aging.len();
    let mut level_index = Vec::with_capacity(n_levels);
    let mut thresholds = Vec::with_capacity(n_levels);
    let mut entered_counts = Vec::with_capacity(n_levels);
    let mut mean_hours = Vec::with_capacity(n_levels);
    for (level, aging) in arrays.time_aging.iter().enumerate() {
        let (count, mean) = mean_aging_hours(aging);
        level_index.push(level as f64);
        thresholds.push(edges.get(level).copied().unwrap_or(f64::INFINITY));
        entered_counts.push(count as f64);
        mean_hours.push(mean);
    }
    writer.columns_csv(
        "levels.csv",
        &["level", "supersat_below", "n_entered", "mean_aging_hours"],
        &[
            level_index.as_slice(),
            thresholds.as_slice(),
            entered_counts.as_slice(),
            mean_hours.as_slice(),
        ],
    )?;

    let chart = LineChart {
        title: "Mean aging time".into(),
        x_label: "critical supersaturation threshold (%)".into(),
        y_label: "mean aging time (hours)".into(),
        x_scale: settings.levels.scale.into(),
        y_scale: AxisScale::Linear,
        x_ticks: TickFormat::Number,
        series: vec![Series::new(
            "particles reaching the level",
            &thresholds[..edges.len()],
            &mean_hours[..edges.len()],
        )],
    };
    let targets = writer.figure("aging_time");
    render_line_chart(&chart, &targets)?;

    let emitted = arrays.time_emitted.iter().filter(|&&t| t >= 0.0).count();
    let summary = vec![
        format!("snapshots: {}", files.len()),
        format!("particles emitted: {emitted}"),
        format!("levels: {n_levels}"),
    ];
    let outputs = writer.finish(
        "aging",
        files.iter().map(|file| file.path.clone()).collect(),
        json!({
            "levels": settings.levels,
            "num_id": arrays.time_emitted.len(),
            "emitted": emitted,
        }),
    )?;

    Ok(JobReport {
        job: "aging",
        summary,
        outputs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::particles::RemovedRecord;
    use crate::particles::tests::{sample_env, sample_particles};

    fn levels() -> BinGrid {
        BinGrid::log(1e-3, 1e2, 5).unwrap()
    }

    #[test]
    fn first_appearance_sets_emission() {
        let particles = sample_particles();
        let env = sample_env();
        let mut tracker = AgingTracker::new(levels());
        tracker.observe(0.0, &particles, &env).unwrap();
        tracker.observe(60.0, &particles, &env).unwrap();
        let arrays = tracker.finish().unwrap();

        assert_eq!(arrays.time_emitted.len(), 13);
        assert_eq!(arrays.time_emitted[10], 0.0);
        assert_eq!(arrays.time_emitted[0], -1.0);
        assert_eq!(arrays.mass_emitted[[11, 1]], 3e-18);
        assert_eq!(arrays.mass_emitted[[3, 0]], -1.0);
        // Everything lies below the unbounded last level from the first snapshot.
        let last = arrays.time_entered.len() - 1;
        assert_eq!(arrays.time_entered[last][12], 0.0);
        assert_eq!(arrays.time_aging[last][12], 0.0);
    }

    #[test]
    fn double_coagulation_is_an_error() {
        let env = sample_env();
        let mut tracker = AgingTracker::new(levels());
        tracker.observe(0.0, &sample_particles(), &env).unwrap();

        let mut next = sample_particles();
        next.removed = vec![
            RemovedRecord {
                id: 5,
                action: RemovalAction::Coag,
                other_id: 10,
            },
            RemovedRecord {
                id: 5,
                action: RemovalAction::Coag,
                other_id: 11,
            },
        ];
        let err = tracker.observe(60.0, &next, &env).unwrap_err();
        assert!(err.to_string().contains("coagulated twice"));
    }

    #[test]
    fn coagulated_particle_follows_its_partner() {
        let env = sample_env();
        let mut first = sample_particles();
        first.ids = vec![1, 2, 3];
        let mut tracker = AgingTracker::new(levels());
        tracker.observe(0.0, &first, &env).unwrap();

        let mut second = sample_particles();
        second.ids = vec![4, 2, 3];
        second.removed = vec![RemovedRecord {
            id: 1,
            action: RemovalAction::Coag,
            other_id: 2,
        }];
        tracker.observe(60.0, &second, &env).unwrap();
        let arrays = tracker.finish().unwrap();

        let last = arrays.time_entered.len() - 1;
        assert_eq!(arrays.time_emitted[4], 60.0);
        assert_eq!(arrays.time_entered[last][1], 0.0);
        assert_eq!(arrays.time_entered[last][4], 60.0);
    }

    #[test]
    fn mean_aging_ignores_unreached() {
        let (count, mean) = mean_aging_hours(&[-1.0, 3600.0, 7200.0]);
        assert_eq!(count, 2);
        assert_eq!(mean, 1.5);
        assert!(mean_aging_hours(&[-1.0]).1.is_nan());
    }
}
