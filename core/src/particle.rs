//! Monte Carlo localization particle filter.
//!
//! The filter keeps a fixed-size population of pose hypotheses and runs the classic cycle:
//!
//! 1. [`ParticleFilter::initialize`] scatters `N` particles around an initial estimate (once).
//! 2. [`ParticleFilter::predict`] advances each particle with the velocity / yaw-rate model plus process noise.
//! 3. [`ParticleFilter::update_weights`] gates the landmark map around each particle, moves the observations
//!    into the world frame using that particle's pose, associates them with landmarks and recomputes the
//!    particle weight as a product of bivariate Gaussian likelihoods.
//! 4. [`ParticleFilter::resample`] replaces the population by drawing with replacement proportional to weight.
//!
//! Each phase computes its complete output before writing anything, so a failed call leaves the previous
//! population intact. Prediction draws one seed per particle from the filter's master generator and samples
//! the particle's noise from its own stream, which makes results independent of whether the per-particle
//! work runs sequentially or on the rayon pool.

use std::fmt::{self, Debug, Display};

use log::{debug, trace, warn};
use nalgebra::Matrix3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::association::associate;
use crate::config::FilterConfig;
use crate::error::{FilterError, Result};
use crate::measurements::{
    LandmarkId, LandmarkMap, LandmarkObservation, observation_likelihood, to_world_frame,
    validate_std_dev,
};
use crate::resampling::normalize;
use crate::{ControlInput, Pose, forward, wrap_to_pi};

/// A single pose hypothesis.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Particle {
    pub x: f64,
    pub y: f64,
    pub theta: f64,
    /// Unnormalized importance weight from the most recent update
    pub weight: f64,
    /// Landmark id associated with each observation in the most recent update
    pub associations: Vec<LandmarkId>,
    /// World-frame x of each observation in the most recent update
    pub sense_x: Vec<f64>,
    /// World-frame y of each observation in the most recent update
    pub sense_y: Vec<f64>,
}
impl Display for Particle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Particle")
            .field("x", &self.x)
            .field("y", &self.y)
            .field("theta", &self.theta)
            .field("weight", &self.weight)
            .field("associations", &self.associations_string())
            .finish()
    }
}
impl Particle {
    pub fn new(pose: Pose, weight: f64) -> Particle {
        Particle {
            x: pose.x,
            y: pose.y,
            theta: pose.theta,
            weight,
            ..Default::default()
        }
    }
    pub fn pose(&self) -> Pose {
        Pose::new(self.x, self.y, self.theta)
    }
    fn set_pose(&mut self, pose: Pose) {
        self.x = pose.x;
        self.y = pose.y;
        self.theta = pose.theta;
    }
    /// Associated landmark ids, space separated.
    pub fn associations_string(&self) -> String {
        join(&self.associations)
    }
    /// World-frame observation x coordinates, space separated.
    pub fn sense_x_string(&self) -> String {
        join(&self.sense_x)
    }
    /// World-frame observation y coordinates, space separated.
    pub fn sense_y_string(&self) -> String {
        join(&self.sense_y)
    }
}

fn join<T: Display>(values: &[T]) -> String {
    values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

/// How a single pose estimate is extracted from the population.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum AveragingStrategy {
    #[default]
    WeightedAverage,
    UnweightedAverage,
    HighestWeight,
}

/// Result of weighting one particle, held until every particle has succeeded.
struct Evaluation {
    weight: f64,
    associations: Vec<LandmarkId>,
    sense_x: Vec<f64>,
    sense_y: Vec<f64>,
}

/// Independent zero-mean Gaussian noise on each pose axis.
struct PoseNoise {
    x: Normal<f64>,
    y: Normal<f64>,
    theta: Normal<f64>,
}
impl PoseNoise {
    fn new(mean: Pose, std: [f64; 3]) -> Result<PoseNoise> {
        validate_std_dev("std_x", std[0], false)?;
        validate_std_dev("std_y", std[1], false)?;
        validate_std_dev("std_theta", std[2], false)?;
        let normal = |mean: f64, std: f64, name: &'static str| {
            Normal::new(mean, std).map_err(|_| FilterError::InvalidNoise { name, value: std })
        };
        Ok(PoseNoise {
            x: normal(mean.x, std[0], "std_x")?,
            y: normal(mean.y, std[1], "std_y")?,
            theta: normal(mean.theta, std[2], "std_theta")?,
        })
    }
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Pose {
        Pose::new(
            self.x.sample(rng),
            self.y.sample(rng),
            self.theta.sample(rng),
        )
    }
}

pub struct ParticleFilter {
    config: FilterConfig,
    particles: Vec<Particle>,
    rng: StdRng,
    is_initialized: bool,
}
impl Debug for ParticleFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let min_weight = self
            .particles
            .iter()
            .map(|p| p.weight)
            .fold(f64::INFINITY, f64::min);
        let max_weight = self.particles.iter().map(|p| p.weight).fold(0.0, f64::max);
        let mut s = f.debug_struct("ParticleFilter");
        s.field("num_particles", &self.particles.len())
            .field("is_initialized", &self.is_initialized)
            .field("effective_particles", &self.effective_sample_size())
            .field(
                "weight_range",
                &format_args!("[{:.4e}, {:.4e}]", min_weight, max_weight),
            );
        if let Ok(mean) = self.estimate() {
            s.field(
                "mean_pose",
                &format_args!("({:.3} m, {:.3} m, {:.4} rad)", mean.x, mean.y, mean.theta),
            );
        }
        s.finish()
    }
}
impl Default for ParticleFilter {
    fn default() -> Self {
        ParticleFilter {
            config: FilterConfig::default(),
            particles: Vec::new(),
            rng: StdRng::from_os_rng(),
            is_initialized: false,
        }
    }
}
impl ParticleFilter {
    /// Create an uninitialized filter. The population is created by [`ParticleFilter::initialize`].
    pub fn new(config: FilterConfig) -> Result<Self> {
        config.validate()?;
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Ok(ParticleFilter {
            config,
            particles: Vec::new(),
            rng,
            is_initialized: false,
        })
    }
    pub fn config(&self) -> &FilterConfig {
        &self.config
    }
    pub fn is_initialized(&self) -> bool {
        self.is_initialized
    }
    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }
    pub fn len(&self) -> usize {
        self.particles.len()
    }
    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }
    /// Current importance weights in particle order.
    pub fn weights(&self) -> Vec<f64> {
        self.particles.iter().map(|p| p.weight).collect()
    }
    fn ensure_initialized(&self) -> Result<()> {
        if self.is_initialized {
            Ok(())
        } else {
            Err(FilterError::Uninitialized)
        }
    }

    /// Sample the initial population around `estimate`.
    ///
    /// Every particle draws `x`, `y` and `theta` independently from normal distributions centered on the
    /// estimate with standard deviations `std` and starts with weight `1`. Once the population exists any
    /// further call is a no-op.
    pub fn initialize(&mut self, estimate: Pose, std: [f64; 3]) -> Result<()> {
        if self.is_initialized {
            debug!("Particle filter already initialized; ignoring initialize({estimate})");
            return Ok(());
        }
        let distribution = PoseNoise::new(estimate, std)?;
        let n = self.config.num_particles;
        self.particles = (0..n)
            .map(|_| Particle::new(distribution.sample(&mut self.rng), 1.0))
            .collect();
        self.is_initialized = true;
        debug!("Initialized {n} particles around {estimate} with std {std:?}");
        Ok(())
    }

    /// Advance every particle by `delta_t` seconds of the commanded motion plus Gaussian process noise.
    ///
    /// # Arguments
    /// * `delta_t` - Time step in seconds.
    /// * `std_pos` - Process noise standard deviations `[x (m), y (m), theta (rad)]`.
    /// * `velocity` - Commanded linear velocity in m/s.
    /// * `yaw_rate` - Commanded yaw rate in rad/s.
    ///
    /// Non-finite `delta_t`, `velocity` or `yaw_rate` fail with [`FilterError::NonFiniteInput`].
    pub fn predict(
        &mut self,
        delta_t: f64,
        std_pos: [f64; 3],
        velocity: f64,
        yaw_rate: f64,
    ) -> Result<()> {
        self.ensure_initialized()?;
        for (name, value) in [
            ("delta_t", delta_t),
            ("velocity", velocity),
            ("yaw_rate", yaw_rate),
        ] {
            if !value.is_finite() {
                return Err(FilterError::NonFiniteInput { name, value });
            }
        }
        let noise = PoseNoise::new(Pose::default(), std_pos)?;
        let control = ControlInput::new(velocity, yaw_rate);
        let threshold = self.config.yaw_rate_threshold;
        let seeds: Vec<u64> = (0..self.particles.len())
            .map(|_| self.rng.random())
            .collect();

        let propagate = |(particle, seed): (&Particle, &u64)| {
            let mut rng = StdRng::seed_from_u64(*seed);
            let mut pose = particle.pose();
            forward(&mut pose, &control, delta_t, threshold);
            let perturbation = noise.sample(&mut rng);
            Pose::new(
                pose.x + perturbation.x,
                pose.y + perturbation.y,
                pose.theta + perturbation.theta,
            )
        };
        let poses: Vec<Pose> = if self.config.parallel {
            self.particles
                .par_iter()
                .zip(seeds.par_iter())
                .map(&propagate)
                .collect()
        } else {
            self.particles
                .iter()
                .zip(seeds.iter())
                .map(&propagate)
                .collect()
        };
        for (particle, pose) in self.particles.iter_mut().zip(poses) {
            particle.set_pose(pose);
        }
        trace!("Predicted {} particles with {control} over {delta_t} s", self.particles.len());
        Ok(())
    }

    /// Recompute every particle's weight from the current observations.
    ///
    /// For each particle the map is gated to landmarks strictly within `sensor_range`, the agent-frame
    /// `observations` are transformed into the world frame using the particle's pose, each transformed
    /// observation is associated with its nearest gated landmark, and the weight becomes the product of the
    /// bivariate Gaussian likelihoods with standard deviations `std_landmark`. Prior weights are discarded.
    ///
    /// An empty observation list carries no evidence: every weight becomes `1` and the diagnostics are
    /// cleared. Observations with non-finite coordinates fail with [`FilterError::NonFiniteObservation`].
    /// Fails with [`FilterError::NoLandmarksInRange`] if any particle sees no landmark, in which case
    /// no particle is modified.
    pub fn update_weights(
        &mut self,
        sensor_range: f64,
        std_landmark: [f64; 2],
        observations: &[LandmarkObservation],
        map: &LandmarkMap,
    ) -> Result<()> {
        self.ensure_initialized()?;
        if !(sensor_range.is_finite() && sensor_range > 0.0) {
            return Err(FilterError::Configuration(format!(
                "sensor_range must be positive and finite, got {sensor_range}"
            )));
        }
        validate_std_dev("std_landmark_x", std_landmark[0], true)?;
        validate_std_dev("std_landmark_y", std_landmark[1], true)?;
        if let Some((index, obs)) = observations
            .iter()
            .enumerate()
            .find(|(_, o)| !(o.x.is_finite() && o.y.is_finite()))
        {
            return Err(FilterError::NonFiniteObservation {
                index,
                x: obs.x,
                y: obs.y,
            });
        }

        let evaluate = |(index, particle): (usize, &Particle)| {
            evaluate_particle(index, particle, sensor_range, std_landmark, observations, map)
        };
        let evaluations: Result<Vec<Evaluation>> = if self.config.parallel {
            self.particles.par_iter().enumerate().map(&evaluate).collect()
        } else {
            self.particles.iter().enumerate().map(&evaluate).collect()
        };
        let evaluations = evaluations.inspect_err(|e| warn!("Weight update rejected: {e}"))?;

        for (particle, evaluation) in self.particles.iter_mut().zip(evaluations) {
            particle.weight = evaluation.weight;
            particle.associations = evaluation.associations;
            particle.sense_x = evaluation.sense_x;
            particle.sense_y = evaluation.sense_y;
        }
        debug!(
            "Updated weights of {} particles from {} observations (ESS {:.1})",
            self.particles.len(),
            observations.len(),
            self.effective_sample_size()
        );
        Ok(())
    }

    /// Replace the population by drawing `N` particles with replacement, proportional to weight.
    ///
    /// The draw uses the configured [`crate::resampling::ResamplingStrategy`]. Resampled particles keep
    /// their pose and diagnostics and restart with weight `1`, so the next cycle begins without evidence.
    /// Fails with [`FilterError::DegenerateWeights`] when every weight is zero, leaving the population as is.
    pub fn resample(&mut self) -> Result<()> {
        self.ensure_initialized()?;
        let weights = self.weights();
        let indices = self
            .config
            .resampling_strategy
            .resample(&weights, &mut self.rng)
            .inspect_err(|e| warn!("Resampling rejected: {e}"))?;
        self.particles = indices
            .into_iter()
            .map(|i| {
                let mut particle = self.particles[i].clone();
                particle.weight = 1.0;
                particle
            })
            .collect();
        debug!(
            "Resampled {} particles ({:?})",
            self.particles.len(),
            self.config.resampling_strategy
        );
        Ok(())
    }

    /// Overwrite all weights, e.g. from an external likelihood.
    pub fn set_weights(&mut self, weights: &[f64]) -> Result<()> {
        self.ensure_initialized()?;
        if weights.len() != self.particles.len() {
            return Err(FilterError::DimensionMismatch {
                expected: self.particles.len(),
                actual: weights.len(),
            });
        }
        if let Some((index, &weight)) = weights
            .iter()
            .enumerate()
            .find(|(_, w)| !w.is_finite() || **w < 0.0)
        {
            return Err(FilterError::InvalidWeight { index, weight });
        }
        for (particle, &w) in self.particles.iter_mut().zip(weights) {
            particle.weight = w;
        }
        Ok(())
    }

    /// Weights scaled to sum to one.
    pub fn normalized_weights(&self) -> Result<Vec<f64>> {
        self.ensure_initialized()?;
        normalize(&self.weights())
    }

    /// `1 / Σ w̃²` over normalized weights; zero when the weights are degenerate.
    pub fn effective_sample_size(&self) -> f64 {
        match normalize(&self.weights()) {
            Ok(w) => 1.0 / w.iter().map(|w| w * w).sum::<f64>(),
            Err(_) => 0.0,
        }
    }

    /// Particle with the largest weight (first one on ties).
    pub fn best_particle(&self) -> Option<&Particle> {
        self.particles
            .iter()
            .reduce(|best, p| if p.weight > best.weight { p } else { best })
    }

    /// Pose estimate according to the configured [`AveragingStrategy`].
    pub fn estimate(&self) -> Result<Pose> {
        self.ensure_initialized()?;
        match self.config.averaging_strategy {
            AveragingStrategy::WeightedAverage => {
                weighted_mean(&self.particles, &normalize(&self.weights())?)
            }
            AveragingStrategy::UnweightedAverage => {
                let uniform = vec![1.0 / self.particles.len() as f64; self.particles.len()];
                weighted_mean(&self.particles, &uniform)
            }
            AveragingStrategy::HighestWeight => self
                .best_particle()
                .map(Particle::pose)
                .ok_or(FilterError::Uninitialized),
        }
    }

    /// Weighted covariance of `(x, y, theta)` around the weighted mean, heading residuals wrapped to (-π, π].
    pub fn certainty(&self) -> Result<Matrix3<f64>> {
        self.ensure_initialized()?;
        let weights = normalize(&self.weights())?;
        let mean = weighted_mean(&self.particles, &weights)?;
        let mut cov = Matrix3::<f64>::zeros();
        for (particle, w) in self.particles.iter().zip(&weights) {
            let diff = nalgebra::Vector3::new(
                particle.x - mean.x,
                particle.y - mean.y,
                wrap_to_pi(particle.theta - mean.theta),
            );
            cov += *w * diff * diff.transpose();
        }
        Ok(cov)
    }
}

fn evaluate_particle(
    index: usize,
    particle: &Particle,
    sensor_range: f64,
    std_landmark: [f64; 2],
    observations: &[LandmarkObservation],
    map: &LandmarkMap,
) -> Result<Evaluation> {
    let n = observations.len();
    let mut evaluation = Evaluation {
        weight: 1.0,
        associations: Vec::with_capacity(n),
        sense_x: Vec::with_capacity(n),
        sense_y: Vec::with_capacity(n),
    };
    if observations.is_empty() {
        return Ok(evaluation);
    }
    let pose = particle.pose();
    let candidates = map.within_range(&pose, sensor_range);
    if candidates.is_empty() {
        return Err(FilterError::NoLandmarksInRange {
            particle: index,
            sensor_range,
        });
    }
    let mut transformed = to_world_frame(&pose, observations);
    associate(&candidates, &mut transformed)?;
    for observation in &transformed {
        let id = observation.id.ok_or(FilterError::EmptyCandidateSet)?;
        let landmark = map.get(id)?;
        evaluation.weight *= observation_likelihood(observation, landmark, std_landmark);
        evaluation.associations.push(id);
        evaluation.sense_x.push(observation.x);
        evaluation.sense_y.push(observation.y);
    }
    Ok(evaluation)
}

/// Mean position and circular mean heading under normalized `weights`.
fn weighted_mean(particles: &[Particle], weights: &[f64]) -> Result<Pose> {
    if particles.is_empty() {
        return Err(FilterError::Uninitialized);
    }
    let (mut x, mut y, mut sin, mut cos) = (0.0, 0.0, 0.0, 0.0);
    for (p, w) in particles.iter().zip(weights) {
        x += w * p.x;
        y += w * p.y;
        sin += w * p.theta.sin();
        cos += w * p.theta.cos();
    }
    Ok(Pose::new(x, y, sin.atan2(cos)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurements::Landmark;
    use crate::resampling::ResamplingStrategy;
    use assert_approx_eq::assert_approx_eq;
    use std::f64::consts::{FRAC_PI_2, PI};

    fn filter(n: usize, seed: u64) -> ParticleFilter {
        ParticleFilter::new(FilterConfig::seeded(n, seed)).unwrap()
    }

    fn single_particle_at(pose: Pose) -> ParticleFilter {
        let mut pf = filter(1, 0);
        pf.initialize(pose, [0.0, 0.0, 0.0]).unwrap();
        pf
    }

    #[test]
    fn test_initialize_population() {
        let mut pf = filter(100, 1);
        assert!(!pf.is_initialized());
        pf.initialize(Pose::new(4.0, -2.0, 0.3), [0.5, 0.5, 0.05]).unwrap();
        assert_eq!(pf.len(), 100);
        assert!(pf.particles().iter().all(|p| p.weight == 1.0));
        let mean_x = pf.particles().iter().map(|p| p.x).sum::<f64>() / 100.0;
        assert!((mean_x - 4.0).abs() < 0.2, "mean_x = {mean_x}");
    }
    #[test]
    fn test_initialize_is_idempotent() {
        let mut pf = filter(10, 2);
        pf.initialize(Pose::new(0.0, 0.0, 0.0), [1.0, 1.0, 0.1]).unwrap();
        let first = pf.particles().to_vec();
        pf.initialize(Pose::new(100.0, 100.0, 1.0), [0.0, 0.0, 0.0]).unwrap();
        assert_eq!(pf.particles(), first.as_slice());
    }
    #[test]
    fn test_initialize_rejects_negative_std() {
        let mut pf = filter(10, 2);
        let result = pf.initialize(Pose::default(), [1.0, -1.0, 0.1]);
        assert!(matches!(result, Err(FilterError::InvalidNoise { name: "std_y", .. })));
        assert!(!pf.is_initialized());
    }
    #[test]
    fn test_operations_require_initialization() {
        let mut pf = filter(10, 3);
        let map = LandmarkMap::new(vec![Landmark::new(1, 1.0, 1.0)]).unwrap();
        assert!(matches!(pf.predict(0.1, [0.0; 3], 1.0, 0.0), Err(FilterError::Uninitialized)));
        assert!(matches!(
            pf.update_weights(10.0, [0.3, 0.3], &[], &map),
            Err(FilterError::Uninitialized)
        ));
        assert!(matches!(pf.resample(), Err(FilterError::Uninitialized)));
        assert!(matches!(pf.estimate(), Err(FilterError::Uninitialized)));
    }
    #[test]
    fn test_zero_noise_straight_prediction() {
        let mut pf = single_particle_at(Pose::default());
        pf.predict(1.0, [0.0, 0.0, 0.0], 1.0, 0.0).unwrap();
        assert_eq!(pf.particles()[0].pose(), Pose::new(1.0, 0.0, 0.0));
    }
    #[test]
    fn test_zero_noise_arc_prediction() {
        let mut pf = single_particle_at(Pose::default());
        pf.predict(1.0, [0.0, 0.0, 0.0], 1.0, FRAC_PI_2).unwrap();
        let p = &pf.particles()[0];
        assert_approx_eq!(p.x, 2.0 / PI, 1e-12);
        assert_approx_eq!(p.y, 2.0 / PI, 1e-12);
        assert_approx_eq!(p.theta, FRAC_PI_2, 1e-12);
    }
    #[test]
    fn test_tiny_yaw_rate_is_well_conditioned() {
        let mut pf = single_particle_at(Pose::default());
        pf.predict(1.0, [0.0, 0.0, 0.0], 10.0, 1e-12).unwrap();
        let p = &pf.particles()[0];
        assert_approx_eq!(p.x, 10.0, 1e-9);
        assert_approx_eq!(p.y, 0.0, 1e-9);
    }
    #[test]
    fn test_prediction_noise_spreads_particles() {
        let mut pf = filter(200, 4);
        pf.initialize(Pose::default(), [0.0, 0.0, 0.0]).unwrap();
        pf.predict(1.0, [0.5, 0.5, 0.0], 1.0, 0.0).unwrap();
        let xs: Vec<f64> = pf.particles().iter().map(|p| p.x).collect();
        let mean = xs.iter().sum::<f64>() / xs.len() as f64;
        let var = xs.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / xs.len() as f64;
        assert!((mean - 1.0).abs() < 0.15, "mean = {mean}");
        assert!((var.sqrt() - 0.5).abs() < 0.1, "std = {}", var.sqrt());
        assert!(pf.particles().iter().all(|p| p.theta == 0.0));
    }
    #[test]
    fn test_predict_rejects_bad_noise_without_moving() {
        let mut pf = single_particle_at(Pose::default());
        let result = pf.predict(1.0, [0.1, f64::NAN, 0.1], 1.0, 0.0);
        assert!(matches!(result, Err(FilterError::InvalidNoise { .. })));
        assert_eq!(pf.particles()[0].pose(), Pose::default());
    }
    #[test]
    fn test_single_landmark_exact_weight() {
        let mut pf = single_particle_at(Pose::default());
        let map = LandmarkMap::new(vec![Landmark::new(1, 2.0, 0.0)]).unwrap();
        let observations = vec![LandmarkObservation::new(2.0, 0.0)];
        pf.update_weights(50.0, [0.3, 0.3], &observations, &map).unwrap();
        let p = &pf.particles()[0];
        assert_eq!(p.weight, 1.0 / (2.0 * PI * 0.3 * 0.3));
        assert_eq!(p.associations, vec![1]);
        assert_eq!(p.sense_x, vec![2.0]);
        assert_eq!(p.sense_y, vec![0.0]);
    }
    #[test]
    fn test_weight_is_product_over_observations() {
        let mut pf = single_particle_at(Pose::new(1.0, 1.0, FRAC_PI_2));
        let map = LandmarkMap::new(vec![
            Landmark::new(5, 1.0, 4.0),
            Landmark::new(9, -2.0, 1.0),
        ])
        .unwrap();
        // landmark 5 is 3 m ahead, landmark 9 is 3 m to the left
        let observations = vec![
            LandmarkObservation::new(3.1, 0.0),
            LandmarkObservation::new(0.0, 3.0),
        ];
        pf.update_weights(10.0, [0.3, 0.2], &observations, &map).unwrap();
        let p = &pf.particles()[0];
        assert_eq!(p.associations, vec![5, 9]);
        // first residual is 0.1 m along world y
        let expected = crate::measurements::bivariate_gaussian(0.0, 0.1, 0.3, 0.2)
            * crate::measurements::bivariate_gaussian(0.0, 0.0, 0.3, 0.2);
        assert_approx_eq!(p.weight, expected, 1e-9);
        assert_approx_eq!(p.sense_x[0], 1.0, 1e-12);
        assert_approx_eq!(p.sense_y[0], 4.1, 1e-12);
        assert_eq!(p.associations_string(), "5 9");
    }
    #[test]
    fn test_update_overwrites_previous_weights() {
        let mut pf = single_particle_at(Pose::default());
        let map = LandmarkMap::new(vec![Landmark::new(1, 2.0, 0.0)]).unwrap();
        let observations = vec![LandmarkObservation::new(2.0, 0.0)];
        pf.update_weights(50.0, [0.3, 0.3], &observations, &map).unwrap();
        let first = pf.particles()[0].weight;
        pf.update_weights(50.0, [0.3, 0.3], &observations, &map).unwrap();
        assert_eq!(pf.particles()[0].weight, first);
        assert_eq!(pf.particles()[0].associations.len(), 1);
    }
    #[test]
    fn test_no_landmarks_in_range_leaves_population_intact() {
        let mut pf = filter(2, 5);
        pf.initialize(Pose::default(), [0.0, 0.0, 0.0]).unwrap();
        pf.set_weights(&[0.25, 0.75]).unwrap();
        let before = pf.particles().to_vec();
        let map = LandmarkMap::new(vec![Landmark::new(1, 100.0, 0.0)]).unwrap();
        let observations = vec![LandmarkObservation::new(2.0, 0.0)];
        let result = pf.update_weights(10.0, [0.3, 0.3], &observations, &map);
        assert!(matches!(
            result,
            Err(FilterError::NoLandmarksInRange { particle: 0, .. })
        ));
        assert_eq!(pf.particles(), before.as_slice());
    }
    #[test]
    fn test_non_finite_observation_is_rejected() {
        let mut pf = filter(3, 5);
        pf.initialize(Pose::default(), [0.0, 0.0, 0.0]).unwrap();
        let before = pf.particles().to_vec();
        let map = LandmarkMap::new(vec![
            Landmark::new(1, 2.0, 0.0),
            Landmark::new(2, 0.0, 2.0),
        ])
        .unwrap();
        let observations = vec![
            LandmarkObservation::new(2.0, 0.0),
            LandmarkObservation::new(f64::NAN, 0.0),
        ];
        let result = pf.update_weights(10.0, [0.3, 0.3], &observations, &map);
        assert!(matches!(
            result,
            Err(FilterError::NonFiniteObservation { index: 1, .. })
        ));
        let result = pf.update_weights(
            10.0,
            [0.3, 0.3],
            &[LandmarkObservation::new(0.0, f64::INFINITY)],
            &map,
        );
        assert!(matches!(
            result,
            Err(FilterError::NonFiniteObservation { index: 0, .. })
        ));
        assert_eq!(pf.particles(), before.as_slice());
        pf.resample().unwrap();
        assert!(pf.weights().iter().all(|&w| w == 1.0));
    }
    #[test]
    fn test_predict_rejects_non_finite_controls() {
        let mut pf = single_particle_at(Pose::new(1.0, 2.0, 0.5));
        let result = pf.predict(1.0, [0.0, 0.0, 0.0], f64::NAN, 0.0);
        assert!(matches!(
            result,
            Err(FilterError::NonFiniteInput { name: "velocity", .. })
        ));
        let result = pf.predict(1.0, [0.0, 0.0, 0.0], 1.0, f64::INFINITY);
        assert!(matches!(
            result,
            Err(FilterError::NonFiniteInput { name: "yaw_rate", .. })
        ));
        let result = pf.predict(f64::NAN, [0.0, 0.0, 0.0], 1.0, 0.0);
        assert!(matches!(
            result,
            Err(FilterError::NonFiniteInput { name: "delta_t", .. })
        ));
        assert_eq!(pf.particles()[0].pose(), Pose::new(1.0, 2.0, 0.5));
    }
    #[test]
    fn test_empty_observations_reset_weights() {
        let mut pf = filter(3, 6);
        pf.initialize(Pose::default(), [0.0, 0.0, 0.0]).unwrap();
        pf.set_weights(&[0.1, 0.2, 0.3]).unwrap();
        let map = LandmarkMap::default();
        pf.update_weights(10.0, [0.3, 0.3], &[], &map).unwrap();
        assert!(pf.particles().iter().all(|p| p.weight == 1.0 && p.associations.is_empty()));
    }
    #[test]
    fn test_update_rejects_zero_measurement_noise() {
        let mut pf = single_particle_at(Pose::default());
        let map = LandmarkMap::new(vec![Landmark::new(1, 2.0, 0.0)]).unwrap();
        let result = pf.update_weights(
            10.0,
            [0.0, 0.3],
            &[LandmarkObservation::new(2.0, 0.0)],
            &map,
        );
        assert!(matches!(result, Err(FilterError::InvalidNoise { .. })));
    }
    #[test]
    fn test_resampling_concentrates_on_single_weight() {
        let mut pf = filter(50, 7);
        pf.initialize(Pose::default(), [5.0, 5.0, 1.0]).unwrap();
        let mut weights = vec![0.0; 50];
        weights[13] = 1.0;
        let survivor = pf.particles()[13].pose();
        pf.set_weights(&weights).unwrap();
        pf.resample().unwrap();
        assert_eq!(pf.len(), 50);
        assert!(pf.particles().iter().all(|p| p.pose() == survivor));
        assert!(pf.particles().iter().all(|p| p.weight == 1.0));
    }
    #[test]
    fn test_resample_all_zero_is_error_and_non_destructive() {
        let mut pf = filter(4, 8);
        pf.initialize(Pose::default(), [1.0, 1.0, 0.1]).unwrap();
        pf.set_weights(&[0.0; 4]).unwrap();
        let before = pf.particles().to_vec();
        assert!(matches!(pf.resample(), Err(FilterError::DegenerateWeights)));
        assert_eq!(pf.particles(), before.as_slice());
    }
    #[test]
    fn test_set_weights_validation() {
        let mut pf = filter(3, 9);
        pf.initialize(Pose::default(), [0.0; 3]).unwrap();
        assert!(matches!(
            pf.set_weights(&[1.0, 1.0]),
            Err(FilterError::DimensionMismatch { expected: 3, actual: 2 })
        ));
        assert!(matches!(
            pf.set_weights(&[1.0, -1.0, 1.0]),
            Err(FilterError::InvalidWeight { index: 1, .. })
        ));
    }
    #[test]
    fn test_estimates() {
        let mut pf = filter(2, 10);
        pf.initialize(Pose::default(), [0.0; 3]).unwrap();
        pf.set_weights(&[1.0, 3.0]).unwrap();
        // all particles share a pose, so every strategy agrees
        assert_eq!(pf.estimate().unwrap(), Pose::default());
        assert_approx_eq!(pf.effective_sample_size(), 1.6, 1e-12);
        assert_eq!(pf.normalized_weights().unwrap(), vec![0.25, 0.75]);
        assert_eq!(pf.best_particle().unwrap().weight, 3.0);
        assert_eq!(pf.certainty().unwrap(), Matrix3::zeros());
    }
    #[test]
    fn test_weighted_mean_wraps_heading() {
        let particles = vec![
            Particle::new(Pose::new(0.0, 0.0, PI - 0.1), 1.0),
            Particle::new(Pose::new(2.0, 4.0, -PI + 0.1), 1.0),
        ];
        let mean = weighted_mean(&particles, &[0.5, 0.5]).unwrap();
        assert_approx_eq!(mean.x, 1.0, 1e-12);
        assert_approx_eq!(mean.y, 2.0, 1e-12);
        assert_approx_eq!(mean.theta.abs(), PI, 1e-9);
    }
    #[test]
    fn test_parallel_matches_sequential() {
        let map = LandmarkMap::new(vec![
            Landmark::new(1, 5.0, 0.0),
            Landmark::new(2, 0.0, 5.0),
            Landmark::new(3, -4.0, -4.0),
        ])
        .unwrap();
        let observations = vec![
            LandmarkObservation::new(5.0, 0.1),
            LandmarkObservation::new(0.2, 4.8),
        ];
        let run = |parallel: bool| {
            let mut config = FilterConfig::seeded(64, 77);
            config.parallel = parallel;
            config.resampling_strategy = ResamplingStrategy::Systematic;
            let mut pf = ParticleFilter::new(config).unwrap();
            pf.initialize(Pose::default(), [0.3, 0.3, 0.05]).unwrap();
            for _ in 0..3 {
                pf.predict(0.1, [0.1, 0.1, 0.01], 1.0, 0.2).unwrap();
                pf.update_weights(20.0, [0.3, 0.3], &observations, &map).unwrap();
                pf.resample().unwrap();
            }
            pf.particles().to_vec()
        };
        assert_eq!(run(false), run(true));
    }
}
