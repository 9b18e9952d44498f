//! Simulation utilities and CSV data handling for landmark localization.
//!
//! This module provides:
//! - CSV import/export of landmark maps
//! - Synthetic scenario generation: a ground-truth trajectory driven by a sinusoidal yaw-rate command, the noisy
//!   controls reported to the filter, and noisy agent-frame observations of every landmark in sensor range
//! - A closed-loop runner that drives a [`ParticleFilter`] through a scenario and records per-step errors
//! - `StepResult` CSV output and summary statistics

use std::f64::consts::TAU;
use std::fmt::{self, Display};
use std::path::Path;

use log::{debug, info};
use nalgebra::Point2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use crate::config::SimulationConfig;
use crate::error::{FilterError, Result};
use crate::measurements::{Landmark, LandmarkId, LandmarkMap, LandmarkObservation};
use crate::particle::ParticleFilter;
use crate::{ControlInput, DEFAULT_YAW_RATE_THRESHOLD, Pose, forward, wrap_to_pi};

/// Reads a landmark map from a CSV file with `id,x,y` columns.
///
/// # Example
///
/// ```no_run
/// use mcl::sim::read_landmarks_csv;
///
/// let map = read_landmarks_csv("./data/landmarks.csv").expect("Failed to read landmarks");
/// println!("Loaded {} landmarks", map.len());
/// ```
pub fn read_landmarks_csv<P: AsRef<Path>>(path: P) -> Result<LandmarkMap> {
    let mut rdr = csv::Reader::from_path(path)?;
    let mut landmarks = Vec::new();
    for result in rdr.deserialize() {
        let landmark: Landmark = result?;
        landmarks.push(landmark);
    }
    LandmarkMap::new(landmarks)
}

/// Writes a landmark map to a CSV file with `id,x,y` columns.
pub fn write_landmarks_csv<P: AsRef<Path>>(map: &LandmarkMap, path: P) -> Result<()> {
    let mut wtr = csv::Writer::from_path(path)?;
    for landmark in map.iter() {
        wtr.serialize(landmark)?;
    }
    wtr.flush()?;
    Ok(())
}

/// Scatter `count` landmarks uniformly over a square of half-width `extent` centered on `center`.
///
/// Ids run from 1 to `count`.
pub fn generate_landmarks<R: Rng + ?Sized>(
    count: usize,
    center: &Pose,
    extent: f64,
    rng: &mut R,
) -> Result<LandmarkMap> {
    let landmarks = (1..=count)
        .map(|id| {
            Landmark::new(
                id as LandmarkId,
                center.x + rng.random_range(-extent..=extent),
                center.y + rng.random_range(-extent..=extent),
            )
        })
        .collect();
    LandmarkMap::new(landmarks)
}

/// One time step of a synthetic scenario.
#[derive(Clone, Debug)]
pub struct ScenarioStep {
    /// Simulation time in seconds
    pub time: f64,
    /// Ground-truth pose at `time`
    pub truth: Pose,
    /// Noisy control reported for the interval ending at `time` (zero for the first step)
    pub control: ControlInput,
    /// Noisy agent-frame observations taken at `truth`, without ids
    pub observations: Vec<LandmarkObservation>,
}

/// A complete synthetic localization run.
#[derive(Clone, Debug)]
pub struct Scenario {
    pub map: LandmarkMap,
    /// Noisy initial pose estimate (a GPS-like fix) used to initialize the filter
    pub initial_estimate: Pose,
    pub steps: Vec<ScenarioStep>,
}

impl Scenario {
    /// Generate a scenario from `config`, scattering a random map unless `map` is given.
    pub fn generate(config: &SimulationConfig, map: Option<LandmarkMap>) -> Result<Scenario> {
        config.validate()?;
        let mut rng = StdRng::seed_from_u64(config.seed);
        let map = match map {
            Some(map) => map,
            None => generate_landmarks(
                config.num_landmarks,
                &config.initial_pose,
                config.map_extent,
                &mut rng,
            )?,
        };
        let normal = |std: f64, name: &'static str| {
            Normal::new(0.0, std).map_err(|_| FilterError::InvalidNoise { name, value: std })
        };
        let gps_noise = [
            normal(config.sigma_pos[0], "sigma_pos_x")?,
            normal(config.sigma_pos[1], "sigma_pos_y")?,
            normal(config.sigma_pos[2], "sigma_pos_theta")?,
        ];
        let velocity_noise = normal(config.control_noise[0], "control_noise_velocity")?;
        let yaw_rate_noise = normal(config.control_noise[1], "control_noise_yaw_rate")?;
        let sensor_noise = [
            normal(config.sigma_landmark[0], "sigma_landmark_x")?,
            normal(config.sigma_landmark[1], "sigma_landmark_y")?,
        ];

        let initial_estimate = Pose::new(
            config.initial_pose.x + gps_noise[0].sample(&mut rng),
            config.initial_pose.y + gps_noise[1].sample(&mut rng),
            config.initial_pose.theta + gps_noise[2].sample(&mut rng),
        );

        let mut truth = config.initial_pose;
        let mut steps = Vec::with_capacity(config.steps);
        for k in 0..config.steps {
            let time = k as f64 * config.delta_t;
            let control = if k == 0 {
                ControlInput::default()
            } else {
                let commanded = ControlInput::new(
                    config.velocity,
                    config.yaw_rate_amplitude * (TAU * time / config.yaw_rate_period).sin(),
                );
                forward(&mut truth, &commanded, config.delta_t, DEFAULT_YAW_RATE_THRESHOLD);
                ControlInput::new(
                    commanded.velocity + velocity_noise.sample(&mut rng),
                    commanded.yaw_rate + yaw_rate_noise.sample(&mut rng),
                )
            };
            let inverse = truth.isometry().inverse();
            let observations = map
                .within_range(&truth, config.sensor_range)
                .iter()
                .map(|landmark| {
                    let local = inverse * Point2::new(landmark.x, landmark.y);
                    LandmarkObservation::new(
                        local.x + sensor_noise[0].sample(&mut rng),
                        local.y + sensor_noise[1].sample(&mut rng),
                    )
                })
                .collect();
            steps.push(ScenarioStep {
                time,
                truth,
                control,
                observations,
            });
        }
        debug!(
            "Generated scenario with {} steps and {} landmarks",
            steps.len(),
            map.len()
        );
        Ok(Scenario {
            map,
            initial_estimate,
            steps,
        })
    }
}

/// Filter output and error metrics for one step, as written to the results CSV.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub step: usize,
    pub time: f64,
    pub true_x: f64,
    pub true_y: f64,
    pub true_theta: f64,
    pub est_x: f64,
    pub est_y: f64,
    pub est_theta: f64,
    /// Euclidean distance between estimate and truth in meters
    pub position_error: f64,
    /// Wrapped heading difference in radians
    pub heading_error: f64,
    pub effective_sample_size: f64,
    pub num_observations: usize,
    /// Landmark ids associated by the highest-weight particle, space separated
    pub best_associations: String,
}

impl StepResult {
    pub fn to_csv<P: AsRef<Path>>(records: &[Self], path: P) -> Result<()> {
        let mut wtr = csv::Writer::from_path(path)?;
        for record in records {
            wtr.serialize(record)?;
        }
        wtr.flush()?;
        Ok(())
    }
    pub fn from_csv<P: AsRef<Path>>(path: P) -> Result<Vec<Self>> {
        let mut rdr = csv::Reader::from_path(path)?;
        let mut records = Vec::new();
        for result in rdr.deserialize() {
            let record: StepResult = result?;
            records.push(record);
        }
        Ok(records)
    }
}

/// Aggregate error statistics of a run.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RunSummary {
    pub steps: usize,
    pub mean_position_error: f64,
    pub rms_position_error: f64,
    pub max_position_error: f64,
    pub mean_abs_heading_error: f64,
}
impl Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} steps: mean position error {:.3} m, RMS {:.3} m, max {:.3} m, mean |heading error| {:.4} rad",
            self.steps,
            self.mean_position_error,
            self.rms_position_error,
            self.max_position_error,
            self.mean_abs_heading_error
        )
    }
}
impl RunSummary {
    pub fn from_results(results: &[StepResult]) -> RunSummary {
        if results.is_empty() {
            return RunSummary::default();
        }
        let n = results.len() as f64;
        RunSummary {
            steps: results.len(),
            mean_position_error: results.iter().map(|r| r.position_error).sum::<f64>() / n,
            rms_position_error: (results.iter().map(|r| r.position_error.powi(2)).sum::<f64>() / n)
                .sqrt(),
            max_position_error: results
                .iter()
                .map(|r| r.position_error)
                .fold(0.0, f64::max),
            mean_abs_heading_error: results.iter().map(|r| r.heading_error.abs()).sum::<f64>() / n,
        }
    }
}

/// Drive `filter` through `scenario`.
///
/// The first step initializes the filter from the scenario's initial estimate; every later step predicts with
/// the reported control. Each step then updates the weights, records the estimate and resamples. The map is
/// gated with `sensor_range + gating_margin` so that particles offset from the true pose still see the
/// landmarks the sensor reported near the edge of its range.
pub fn run_closed_loop(
    filter: &mut ParticleFilter,
    scenario: &Scenario,
    config: &SimulationConfig,
) -> Result<Vec<StepResult>> {
    let gating_range = config.sensor_range + config.gating_margin;
    let mut results = Vec::with_capacity(scenario.steps.len());
    for (k, step) in scenario.steps.iter().enumerate() {
        if k == 0 {
            filter.initialize(scenario.initial_estimate, config.sigma_pos)?;
        } else {
            filter.predict(
                config.delta_t,
                config.sigma_pos,
                step.control.velocity,
                step.control.yaw_rate,
            )?;
        }
        filter.update_weights(
            gating_range,
            config.sigma_landmark,
            &step.observations,
            &scenario.map,
        )?;
        let estimate = filter.estimate()?;
        let best_associations = filter
            .best_particle()
            .map(|p| p.associations_string())
            .unwrap_or_default();
        results.push(StepResult {
            step: k,
            time: step.time,
            true_x: step.truth.x,
            true_y: step.truth.y,
            true_theta: step.truth.theta,
            est_x: estimate.x,
            est_y: estimate.y,
            est_theta: estimate.theta,
            position_error: estimate.distance_to(&step.truth),
            heading_error: wrap_to_pi(estimate.theta - step.truth.theta),
            effective_sample_size: filter.effective_sample_size(),
            num_observations: step.observations.len(),
            best_associations,
        });
        filter.resample()?;
    }
    info!("Closed-loop run finished: {}", RunSummary::from_results(&results));
    Ok(results)
}
