use std::fs;
use std::path::{Path, PathBuf};

use aero_figures::config;
use aero_figures::env_state::EnvState;
use aero_figures::jobs;
use aero_figures::particles::{AeroData, ParticleArray, RemovalAction, RemovedRecord};
use aero_figures::snapshot::write_snapshot;
use approx::assert_relative_eq;
use ndarray::Array2;
use tempfile::TempDir;

const OUTPUT_TOGGLES: &str = "[output.toggles]\npng = false\nsvg = false\n";

fn env_at(elapsed_time: f64) -> EnvState {
    EnvState {
        temperature: 288.0,
        relative_humidity: 0.95,
        pressure: 1e5,
        start_time_of_day: 6.0 * 3600.0,
        elapsed_time,
    }
}

/// Particles over SO4, BC, H2O; each id gets a slightly different composition.
fn particles(ids: &[i64], removed: Vec<RemovedRecord>) -> ParticleArray {
    let aero_data = AeroData::new(
        vec!["SO4".into(), "BC".into(), "H2O".into()],
        vec![1800.0, 1800.0, 1000.0],
        vec![0.65, 0.0, 0.0],
    )
    .unwrap();
    let n = ids.len();
    let mut masses = Array2::zeros((3, n));
    for (i, &id) in ids.iter().enumerate() {
        masses[[0, i]] = 1e-18 * id as f64;
        masses[[1, i]] = if id % 2 == 0 { 5e-19 } else { 0.0 };
        masses[[2, i]] = 2e-18;
    }
    ParticleArray::new(
        aero_data,
        masses,
        ids.iter().map(|&id| 1e-6 * id as f64).collect(),
        ids.to_vec(),
        vec![0.0; n],
        vec![0.0; n],
        vec![1; n],
        removed,
    )
    .unwrap()
}

fn write_config(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, body).unwrap();
    path
}

fn toml_path(path: &Path) -> String {
    format!("{:?}", path.display().to_string())
}

fn read_column(path: &Path) -> Vec<f64> {
    fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|line| line.trim().parse().unwrap())
        .collect()
}

/// Three snapshots ten minutes apart; particle 1 coagulates into 2 before the second.
fn write_series(dir: &Path) {
    let series = [
        (0.0, particles(&[1, 2, 3], Vec::new())),
        (
            600.0,
            particles(
                &[2, 3, 4],
                vec![RemovedRecord {
                    id: 1,
                    action: RemovalAction::Coag,
                    other_id: 2,
                }],
            ),
        ),
        (1200.0, particles(&[2, 3, 4], Vec::new())),
    ];
    for (index, (time, particles)) in series.iter().enumerate() {
        let path = dir.join(format!("series_{:08}.nc", index + 1));
        write_snapshot(&path, particles, &env_at(*time)).unwrap();
    }
}

fn series_input(dir: &Path) -> String {
    format!(
        "[input]\ndirectory = {}\npattern = 'series_(.*)\\.nc'\n",
        toml_path(dir)
    )
}

#[test]
fn identical_members_have_zero_spread_and_conserve_number() {
    let dir = TempDir::new().unwrap();
    let members = dir.path().join("members");
    fs::create_dir_all(&members).unwrap();
    for member in 1..=3 {
        let path = members.join(format!("run_{member:04}.nc"));
        write_snapshot(&path, &particles(&[1, 2, 3, 4], Vec::new()), &env_at(3600.0)).unwrap();
    }

    let out = dir.path().join("out");
    let config_path = write_config(
        dir.path(),
        "ensemble_1d.toml",
        &format!(
            "out_of_range = \"clip\"\n\n\
             [input]\ndirectory = {}\ntemplate = \"run_{{member}}.nc\"\nmembers = 3\n\n\
             [quantity]\nkind = \"dry_diameter\"\n\n\
             [grid]\nscale = \"log\"\nmin = 1e-9\nmax = 1e-5\nn_bin = 40\n\n\
             [output]\ndirectory = {}\n{OUTPUT_TOGGLES}",
            toml_path(&members),
            toml_path(&out)
        ),
    );
    let settings = config::load_ensemble_1d_from_file(&config_path).unwrap();
    let report = jobs::ensemble_1d::run(&settings).unwrap();
    assert!(report.outputs.contains(&out.join("stats.csv")));
    assert!(report.outputs.contains(&out.join("summary.json")));

    let mut reader = csv::Reader::from_path(out.join("stats.csv")).unwrap();
    let headers = reader.headers().unwrap().clone();
    assert_eq!(&headers[2], "num_std");
    for record in reader.records() {
        let record = record.unwrap();
        let mean: f64 = record[1].parse().unwrap();
        let std: f64 = record[2].parse().unwrap();
        assert!(std <= 1e-12 * mean.abs(), "std {std} for mean {mean}");
    }

    // Density times log10 bin width sums back to the total number concentration.
    let width = (1e-5f64.log10() - 1e-9f64.log10()) / 40.0;
    let first_member = fs::read_to_string(out.join("num.txt")).unwrap();
    let row: Vec<f64> = first_member
        .lines()
        .next()
        .unwrap()
        .split_whitespace()
        .map(|value| value.parse().unwrap())
        .collect();
    let total: f64 = row.iter().map(|density| density * width).sum();
    let expected: f64 = [1.0, 2.0, 3.0, 4.0].iter().map(|id| 1.0 / (1e-6 * id)).sum();
    assert_relative_eq!(total, expected, max_relative = 1e-9);
}

#[test]
fn series_jobs_write_expected_tables() {
    let dir = TempDir::new().unwrap();
    let snapshots = dir.path().join("snapshots");
    fs::create_dir_all(&snapshots).unwrap();
    write_series(&snapshots);
    let out = dir.path().join("out");

    let bulk = write_config(
        dir.path(),
        "bulk.toml",
        &format!(
            "species = [\"BC\"]\n\n{}\n[output]\ndirectory = {}\nprefix = \"bulk_\"\n{OUTPUT_TOGGLES}",
            series_input(&snapshots),
            toml_path(&out)
        ),
    );
    jobs::bulk::run(&config::load_bulk_from_file(&bulk).unwrap()).unwrap();
    let mut reader = csv::Reader::from_path(out.join("bulk_bulk.csv")).unwrap();
    let rows: Vec<csv::StringRecord> = reader.records().map(Result::unwrap).collect();
    assert_eq!(rows.len(), 3);
    let hours: f64 = rows[1][0].parse().unwrap();
    assert_relative_eq!(hours, 600.0 / 3600.0, max_relative = 1e-9);
    // Only particle 2 carries BC at t = 0: 5e-19 kg / 2e-6 m^3, in ug m^-3.
    let bc: f64 = rows[0][4].parse().unwrap();
    assert_relative_eq!(bc, 5e-19 / 2e-6 * 1e9, max_relative = 1e-9);

    let dist = write_config(
        dir.path(),
        "dist_time.toml",
        &format!(
            "{}\n[quantity]\nkind = \"wet_diameter\"\n\n\
             [grid]\nscale = \"log\"\nmin = 1e-9\nmax = 1e-5\nn_bin = 30\n\n\
             [output]\ndirectory = {}\nprefix = \"dist_\"\n{OUTPUT_TOGGLES}",
            series_input(&snapshots),
            toml_path(&out)
        ),
    );
    jobs::dist_time::run(&config::load_dist_time_from_file(&dist).unwrap()).unwrap();
    assert_eq!(read_column(&out.join("dist_times.txt")), vec![0.0, 10.0, 20.0]);
    let matrix = fs::read_to_string(out.join("dist_dist.txt")).unwrap();
    assert_eq!(matrix.lines().count(), 3);
    assert_eq!(matrix.lines().next().unwrap().split_whitespace().count(), 30);

    let scrit = write_config(
        dir.path(),
        "scrit_time.toml",
        &format!(
            "{}\n[time]\nn_bin = 4\nmax_minutes = 40.0\n\n\
             [supersat]\nscale = \"log\"\nmin = 1e-4\nmax = 1e3\nn_bin = 20\n\n\
             [output]\ndirectory = {}\nprefix = \"scrit_\"\n{OUTPUT_TOGGLES}",
            series_input(&snapshots),
            toml_path(&out)
        ),
    );
    jobs::scrit_time::run(&config::load_scrit_time_from_file(&scrit).unwrap()).unwrap();
    assert_eq!(
        read_column(&out.join("scrit_snapshots_per_column.txt")),
        vec![1.0, 1.0, 1.0, 0.0]
    );
}

#[test]
fn aging_follows_coagulation_and_track_requires_ids() {
    let dir = TempDir::new().unwrap();
    let snapshots = dir.path().join("snapshots");
    fs::create_dir_all(&snapshots).unwrap();
    write_series(&snapshots);
    let out = dir.path().join("out");

    let aging = write_config(
        dir.path(),
        "aging.toml",
        &format!(
            "{}\n[levels]\nscale = \"log\"\nmin = 1e-3\nmax = 1e2\nn_bin = 5\n\n\
             [output]\ndirectory = {}\nprefix = \"aging_\"\n{OUTPUT_TOGGLES}",
            series_input(&snapshots),
            toml_path(&out)
        ),
    );
    let report = jobs::aging::run(&config::load_aging_from_file(&aging).unwrap()).unwrap();
    assert!(report.outputs.contains(&out.join("aging_level_00000006_time_aging.txt")));

    let emitted = read_column(&out.join("aging_time_emitted.txt"));
    assert_eq!(emitted, vec![-1.0, 0.0, 0.0, 0.0, 600.0]);
    // Every particle sits below the unbounded top level as soon as it exists.
    let entered = read_column(&out.join("aging_level_00000006_time_entered.txt"));
    assert_eq!(entered, vec![-1.0, 0.0, 0.0, 0.0, 600.0]);
    let mass_emitted = fs::read_to_string(out.join("aging_mass_emitted.txt")).unwrap();
    assert_eq!(mass_emitted.lines().count(), 5);
    assert!(mass_emitted.lines().next().unwrap().starts_with("-1.0"));

    let track_ok = write_config(
        dir.path(),
        "track.toml",
        &format!(
            "ids = [3, 2]\n\n{}\n[output]\ndirectory = {}\nprefix = \"track_\"\n{OUTPUT_TOGGLES}",
            series_input(&snapshots),
            toml_path(&out)
        ),
    );
    jobs::track::run(&config::load_track_from_file(&track_ok).unwrap()).unwrap();
    let mut reader = csv::Reader::from_path(out.join("track_track.csv")).unwrap();
    assert_eq!(
        reader.headers().unwrap().iter().collect::<Vec<_>>(),
        vec!["time_hours", "id_3", "id_2"]
    );

    let track_missing = write_config(
        dir.path(),
        "track_missing.toml",
        &format!(
            "ids = [1]\n\n{}\n[output]\ndirectory = {}\n{OUTPUT_TOGGLES}",
            series_input(&snapshots),
            toml_path(&out)
        ),
    );
    let err = jobs::track::run(&config::load_track_from_file(&track_missing).unwrap())
        .unwrap_err();
    assert!(format!("{err:#}").contains("particle 1"));
}

#[test]
fn single_snapshot_jobs() {
    let dir = TempDir::new().unwrap();
    let snapshot = dir.path().join("final.nc");
    write_snapshot(&snapshot, &particles(&[1, 2, 3, 4], Vec::new()), &env_at(7200.0)).unwrap();
    let out = dir.path().join("out");

    let ccn = write_config(
        dir.path(),
        "ccn.toml",
        &format!(
            "species = [\"BC\"]\n\n[input]\npath = {}\n\n\
             [supersat]\nmin = 1e-4\nmax = 1e4\ncount = 9\n\n\
             [output]\ndirectory = {}\nprefix = \"ccn_\"\n{OUTPUT_TOGGLES}",
            toml_path(&snapshot),
            toml_path(&out)
        ),
    );
    jobs::ccn::run(&config::load_ccn_from_file(&ccn).unwrap()).unwrap();
    let number = read_column(&out.join("ccn_number_fraction.txt"));
    assert_eq!(number.len(), 9);
    assert!(number.windows(2).all(|pair| pair[0] <= pair[1]));
    assert_relative_eq!(number[8], 1.0);

    let age = write_config(
        dir.path(),
        "age_map.toml",
        &format!(
            "[input]\npath = {}\n\n\
             [x]\nquantity = {{ kind = \"dry_diameter\" }}\n\
             grid = {{ scale = \"log\", min = 1e-9, max = 1e-5, n_bin = 8 }}\n\n\
             [y]\nquantity = {{ kind = \"critical_supersat\" }}\n\
             grid = {{ scale = \"log\", min = 1e-4, max = 1e3, n_bin = 7 }}\n\n\
             [output]\ndirectory = {}\nprefix = \"age_\"\n{OUTPUT_TOGGLES}",
            toml_path(&snapshot),
            toml_path(&out)
        ),
    );
    jobs::age_map::run(&config::load_age_map_from_file(&age).unwrap()).unwrap();
    let counts = fs::read_to_string(out.join("age_count.txt")).unwrap();
    let total: f64 = counts
        .split_whitespace()
        .map(|value| value.parse::<f64>().unwrap())
        .sum();
    assert_eq!(total, 4.0);
}

#[test]
fn ccn_spectra_at_listed_times() {
    let dir = TempDir::new().unwrap();
    let snapshots = dir.path().join("snapshots");
    fs::create_dir_all(&snapshots).unwrap();
    write_series(&snapshots);
    let out = dir.path().join("out");

    // 0.3 h is nearest the 1200 s snapshot.
    let ccn = write_config(
        dir.path(),
        "ccn.toml",
        &format!(
            "species = [\"BC\"]\n\n{}times_hours = [0.0, 0.3]\n\n\
             [supersat]\nmin = 1e-4\nmax = 1e4\ncount = 5\n\n\
             [output]\ndirectory = {}\n{OUTPUT_TOGGLES}",
            series_input(&snapshots),
            toml_path(&out)
        ),
    );
    let report = jobs::ccn::run(&config::load_ccn_from_file(&ccn).unwrap()).unwrap();
    assert_eq!(report.summary.len(), 2);

    let mut reader = csv::Reader::from_path(out.join("ccn_spectrum.csv")).unwrap();
    assert_eq!(
        reader.headers().unwrap().iter().collect::<Vec<_>>(),
        vec![
            "supersat_percent",
            "mass_fraction_0h",
            "number_fraction_0h",
            "mass_fraction_0.333h",
            "number_fraction_0.333h",
        ]
    );
    let number = fs::read_to_string(out.join("number_fraction.txt")).unwrap();
    let last: Vec<f64> = number
        .lines()
        .last()
        .unwrap()
        .split_whitespace()
        .map(|value| value.parse().unwrap())
        .collect();
    assert_eq!(last.len(), 2);
    assert_relative_eq!(last[0], 1.0);
    assert_relative_eq!(last[1], 1.0);
}

#[test]
fn dist_time_accepts_repeated_times() {
    let dir = TempDir::new().unwrap();
    let snapshots = dir.path().join("snapshots");
    fs::create_dir_all(&snapshots).unwrap();
    for run in 1..=2 {
        let path = snapshots.join(format!("series_run{run}.nc"));
        write_snapshot(&path, &particles(&[1, 2, 3], Vec::new()), &env_at(600.0)).unwrap();
    }
    let out = dir.path().join("out");

    let dist = write_config(
        dir.path(),
        "dist_time.toml",
        &format!(
            "{}\n[quantity]\nkind = \"dry_diameter\"\n\n\
             [grid]\nscale = \"log\"\nmin = 1e-9\nmax = 1e-5\nn_bin = 10\n\n\
             [output]\ndirectory = {}\n{OUTPUT_TOGGLES}",
            series_input(&snapshots),
            toml_path(&out)
        ),
    );
    jobs::dist_time::run(&config::load_dist_time_from_file(&dist).unwrap()).unwrap();
    assert_eq!(read_column(&out.join("times.txt")), vec![10.0, 10.0]);
    let matrix = fs::read_to_string(out.join("dist.txt")).unwrap();
    assert_eq!(matrix.lines().count(), 2);
}

#[test]
fn ensemble_2d_with_every_particle_filtered_out() {
    let dir = TempDir::new().unwrap();
    let members = dir.path().join("members");
    fs::create_dir_all(&members).unwrap();
    for member in 1..=2 {
        let path = members.join(format!("run_{member:04}.nc"));
        // Odd ids carry no BC.
        write_snapshot(&path, &particles(&[1, 3], Vec::new()), &env_at(3600.0)).unwrap();
    }
    let out = dir.path().join("out");

    let config_path = write_config(
        dir.path(),
        "ensemble_2d.toml",
        &format!(
            "[input]\ndirectory = {}\ntemplate = \"run_{{member}}.nc\"\nmembers = 2\n\n\
             [x]\nquantity = {{ kind = \"dry_diameter\" }}\n\
             grid = {{ scale = \"log\", min = 1e-9, max = 1e-5, n_bin = 6 }}\n\n\
             [y]\nquantity = {{ kind = \"mass_fraction\", include = [\"BC\"] }}\n\
             grid = {{ scale = \"linear\", min = 0.0, max = 1.0, n_bin = 4 }}\n\n\
             [filter]\nrequire_species = [\"BC\"]\n\n\
             [output]\ndirectory = {}\n{OUTPUT_TOGGLES}",
            toml_path(&members),
            toml_path(&out)
        ),
    );
    let settings = config::load_ensemble_2d_from_file(&config_path).unwrap();
    let report = jobs::ensemble_2d::run(&settings).unwrap();
    assert!(report.summary.iter().any(|line| line == "masked cells: 24 of 24"));
    let cv = fs::read_to_string(out.join("cv.txt")).unwrap();
    assert!(cv.split_whitespace().all(|value| value == "nan"));
}

#[test]
fn shipped_configs_parse() {
    let root = Path::new(env!("CARGO_MANIFEST_DIR")).join("config");
    config::load_ensemble_1d_from_file(root.join("ensemble_1d.toml")).unwrap();
    config::load_ensemble_2d_from_file(root.join("ensemble_2d.toml")).unwrap();
    config::load_scrit_time_from_file(root.join("scrit_time.toml")).unwrap();
    config::load_age_map_from_file(root.join("age_map.toml")).unwrap();
    config::load_ccn_from_file(root.join("ccn_spectrum.toml")).unwrap();
    config::load_bulk_from_file(root.join("bulk.toml")).unwrap();
    config::load_aging_from_file(root.join("aging.toml")).unwrap();
    config::load_track_from_file(root.join("track.toml")).unwrap();
    config::load_dist_time_from_file(root.join("dist_time.toml")).unwrap();
}
