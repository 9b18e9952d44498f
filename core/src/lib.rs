//! Monte Carlo localization toolbox
//!
//! This crate estimates the planar pose (position and heading) of a moving agent by fusing noisy motion
//! commands with noisy observations of known landmarks. The estimator is a sequential Monte Carlo (particle)
//! filter implementing the classic predict → associate → weight → resample cycle. The filter itself consumes
//! primitive numeric inputs (poses, noise standard deviations, observation lists and a landmark map) and does
//! not perform any I/O. The auxiliary modules ([config], [sim]) provide configuration files, synthetic scenarios
//! and CSV import/export for driving the filter from an application such as the bundled `mcl-sim` binary.
//!
//! This crate is primarily built off of the following dependencies:
//! - [`nalgebra`](https://crates.io/crates/nalgebra): Provides the rigid-body transforms and covariance matrices.
//! - [`rand`](https://crates.io/crates/rand) and [`rand_distr`](https://crates.io/crates/rand_distr): Provides the
//!   seeded random number generation, Gaussian noise and weighted sampling used by the particle filter.
//! - [`rayon`](https://crates.io/crates/rayon): Optional fan-out of the per-particle phases.
//!
//! ## Crate overview
//!
//! - [error]: The [`error::FilterError`] taxonomy shared by every fallible operation.
//! - [measurements]: Landmarks, observations, the landmark map, range gating and the observation likelihood.
//! - [association]: Nearest-neighbour data association between observations and landmarks.
//! - [particle]: The [`particle::ParticleFilter`] itself and its pose estimates.
//! - [resampling]: Resampling strategies over a set of unnormalized importance weights.
//! - [config]: Serializable filter, simulation and logging configuration.
//! - [sim]: Synthetic scenario generation, closed-loop simulation and CSV records.
//!
//! ## Coordinate and state definitions
//!
//! Poses live in a fixed, right-handed planar world frame:
//!
//! $$
//! x = [p_x, p_y, \theta]
//! $$
//!
//! where $p_x$ and $p_y$ are the position in meters and $\theta$ is the heading in radians measured
//! counter-clockwise from the world x axis. Observations are expressed in the agent's own frame (x forward,
//! y to the left) and are moved into the world frame by rotating by $\theta$ and translating by $(p_x, p_y)$.
//!
//! ## Motion model
//!
//! The motion model is the velocity / yaw-rate (unicycle) model. For a yaw rate $\omega$ below a small threshold
//! the agent moves in a straight line:
//!
//! $$
//! p_x(+) = p_x(-) + v \Delta t \cos\theta, \quad p_y(+) = p_y(-) + v \Delta t \sin\theta, \quad \theta(+) = \theta(-)
//! $$
//!
//! otherwise it moves along an exact circular arc:
//!
//! $$
//! \theta(+) = \theta(-) + \omega \Delta t, \quad
//! p_x(+) = p_x(-) + \frac{v}{\omega}\left(\sin\theta(+) - \sin\theta(-)\right), \quad
//! p_y(+) = p_y(-) + \frac{v}{\omega}\left(\cos\theta(-) - \cos\theta(+)\right)
//! $$
//!
//! The threshold exists because dividing by a tiny but nonzero yaw rate produces ill-conditioned corrections.
pub mod association;
pub mod config;
pub mod error;
pub mod measurements;
pub mod particle;
pub mod resampling;
pub mod sim;

use nalgebra::{Isometry2, Vector2, Vector3};
use serde::{Deserialize, Serialize};

use std::fmt::{self, Display};

pub use error::{FilterError, Result};

/// Default yaw-rate magnitude (rad/s) below which motion is integrated as a straight line.
pub const DEFAULT_YAW_RATE_THRESHOLD: f64 = 1e-5;

/// Planar pose of the agent (or of one particle hypothesis) in the world frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    /// Position along the world x axis in meters
    pub x: f64,
    /// Position along the world y axis in meters
    pub y: f64,
    /// Heading in radians, counter-clockwise from the world x axis
    pub theta: f64,
}
impl Display for Pose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Pose {{ x: {:.4} m, y: {:.4} m, theta: {:.4} rad }}",
            self.x, self.y, self.theta
        )
    }
}
impl Pose {
    pub fn new(x: f64, y: f64, theta: f64) -> Pose {
        Pose { x, y, theta }
    }
    /// Rigid transform taking points from this pose's local frame into the world frame.
    pub fn isometry(&self) -> Isometry2<f64> {
        Isometry2::new(Vector2::new(self.x, self.y), self.theta)
    }
    /// Euclidean distance between the positions of two poses (heading ignored).
    pub fn distance_to(&self, other: &Pose) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}
impl From<Vector3<f64>> for Pose {
    fn from(v: Vector3<f64>) -> Self {
        Pose::new(v[0], v[1], v[2])
    }
}
impl From<Pose> for Vector3<f64> {
    fn from(pose: Pose) -> Self {
        Vector3::new(pose.x, pose.y, pose.theta)
    }
}
impl From<[f64; 3]> for Pose {
    fn from(a: [f64; 3]) -> Self {
        Pose::new(a[0], a[1], a[2])
    }
}

/// Motion command applied over one prediction interval.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ControlInput {
    /// Commanded linear velocity in m/s
    pub velocity: f64,
    /// Commanded yaw rate in rad/s
    pub yaw_rate: f64,
}
impl Display for ControlInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ControlInput {{ v: {:.3} m/s, yaw_rate: {:.4} rad/s }}",
            self.velocity, self.yaw_rate
        )
    }
}
impl ControlInput {
    pub fn new(velocity: f64, yaw_rate: f64) -> ControlInput {
        ControlInput { velocity, yaw_rate }
    }
}

/// Noise-free velocity / yaw-rate kinematics.
///
/// Advances `pose` in place over `dt` seconds. Yaw rates whose magnitude is below `yaw_rate_threshold`
/// are integrated as straight-line motion; everything else follows the exact circular arc.
///
/// # Arguments
/// * `pose` - The pose to advance.
/// * `control` - Commanded velocity and yaw rate.
/// * `dt` - Time step in seconds.
/// * `yaw_rate_threshold` - Straight-line cutoff in rad/s.
///
/// # Example
/// ```rust
/// use mcl::{ControlInput, Pose, forward, DEFAULT_YAW_RATE_THRESHOLD};
/// let mut pose = Pose::default();
/// forward(&mut pose, &ControlInput::new(1.0, 0.0), 1.0, DEFAULT_YAW_RATE_THRESHOLD);
/// assert_eq!(pose, Pose::new(1.0, 0.0, 0.0));
/// ```
pub fn forward(pose: &mut Pose, control: &ControlInput, dt: f64, yaw_rate_threshold: f64) {
    let theta_0 = pose.theta;
    if control.yaw_rate.abs() < yaw_rate_threshold || control.yaw_rate == 0.0 {
        let distance = control.velocity * dt;
        pose.x += distance * theta_0.cos();
        pose.y += distance * theta_0.sin();
    } else {
        let theta_1 = theta_0 + control.yaw_rate * dt;
        let radius = control.velocity / control.yaw_rate;
        pose.x += radius * (theta_1.sin() - theta_0.sin());
        pose.y += radius * (theta_0.cos() - theta_1.cos());
        pose.theta = theta_1;
    }
}

/// Wrap an angle in radians to the range (-π, π]
///
/// # Example
/// ```rust
/// use mcl::wrap_to_pi;
/// use std::f64::consts::PI;
/// assert!((wrap_to_pi(3.0 * PI / 2.0) + PI / 2.0).abs() < 1e-12);
/// ```
pub fn wrap_to_pi(angle: f64) -> f64 {
    use std::f64::consts::{PI, TAU};
    let wrapped = (angle + PI).rem_euclid(TAU) - PI;
    if wrapped == -PI { PI } else { wrapped }
}
