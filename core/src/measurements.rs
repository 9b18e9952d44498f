//! Landmark measurement model for the localization filter.
//!
//! This module defines the known landmark map, the observations produced by a range/bearing style sensor
//! (already expressed as Cartesian offsets in the agent frame), range gating of the map around a pose
//! hypothesis, the agent-to-world frame transform and the bivariate Gaussian observation likelihood.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::f64::consts::PI;
use std::fmt::{self, Display};

use nalgebra::Point2;
use serde::{Deserialize, Serialize};

use crate::Pose;
use crate::error::{FilterError, Result};

/// Caller-defined landmark identifier.
pub type LandmarkId = u32;

/// A fixed, known landmark in the world frame.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub id: LandmarkId,
    /// World x coordinate in meters
    pub x: f64,
    /// World y coordinate in meters
    pub y: f64,
}
impl Display for Landmark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Landmark(id: {}, x: {:.3}, y: {:.3})", self.id, self.x, self.y)
    }
}
impl Landmark {
    pub fn new(id: LandmarkId, x: f64, y: f64) -> Landmark {
        Landmark { id, x, y }
    }
    pub fn position(&self) -> Point2<f64> {
        Point2::new(self.x, self.y)
    }
}

/// A single sensed landmark.
///
/// Coming from the sensor, `x` and `y` are offsets in the agent's own frame and `id` is unset. After
/// [`to_world_frame`] and data association the coordinates are world-frame and `id` holds the associated
/// landmark.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LandmarkObservation {
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub id: Option<LandmarkId>,
}
impl Display for LandmarkObservation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.id {
            Some(id) => write!(f, "Observation(x: {:.3}, y: {:.3}, id: {})", self.x, self.y, id),
            None => write!(f, "Observation(x: {:.3}, y: {:.3}, id: -)", self.x, self.y),
        }
    }
}
impl LandmarkObservation {
    /// Create an unassociated observation.
    pub fn new(x: f64, y: f64) -> LandmarkObservation {
        LandmarkObservation { x, y, id: None }
    }
    pub fn position(&self) -> Point2<f64> {
        Point2::new(self.x, self.y)
    }
}

/// Immutable landmark map with a validated id lookup.
///
/// Identifiers only need to be unique; they are not assumed to be contiguous or to match storage order.
#[derive(Clone, Debug, Default)]
pub struct LandmarkMap {
    landmarks: Vec<Landmark>,
    index: HashMap<LandmarkId, usize>,
}
impl LandmarkMap {
    /// Build a map, rejecting duplicate identifiers.
    pub fn new(landmarks: Vec<Landmark>) -> Result<LandmarkMap> {
        let mut index = HashMap::with_capacity(landmarks.len());
        for (i, landmark) in landmarks.iter().enumerate() {
            match index.entry(landmark.id) {
                Entry::Occupied(_) => return Err(FilterError::DuplicateLandmark(landmark.id)),
                Entry::Vacant(slot) => {
                    slot.insert(i);
                }
            }
        }
        Ok(LandmarkMap { landmarks, index })
    }
    pub fn len(&self) -> usize {
        self.landmarks.len()
    }
    pub fn is_empty(&self) -> bool {
        self.landmarks.is_empty()
    }
    pub fn landmarks(&self) -> &[Landmark] {
        &self.landmarks
    }
    pub fn iter(&self) -> impl Iterator<Item = &Landmark> {
        self.landmarks.iter()
    }
    /// Look up a landmark by id.
    pub fn get(&self, id: LandmarkId) -> Result<&Landmark> {
        self.index
            .get(&id)
            .map(|&i| &self.landmarks[i])
            .ok_or(FilterError::UnknownLandmark(id))
    }
    /// Landmarks strictly closer than `sensor_range` to the position of `pose`, in map order.
    pub fn within_range(&self, pose: &Pose, sensor_range: f64) -> Vec<Landmark> {
        self.landmarks
            .iter()
            .filter(|lm| (lm.x - pose.x).hypot(lm.y - pose.y) < sensor_range)
            .copied()
            .collect()
    }
}
impl TryFrom<Vec<Landmark>> for LandmarkMap {
    type Error = FilterError;
    fn try_from(landmarks: Vec<Landmark>) -> Result<Self> {
        LandmarkMap::new(landmarks)
    }
}

/// Transform agent-frame observations into the world frame using `pose` as the agent pose.
///
/// Each observation is rotated by `pose.theta` and translated by `(pose.x, pose.y)`. Any existing id is
/// cleared since association has not happened for this hypothesis yet.
pub fn to_world_frame(
    pose: &Pose,
    observations: &[LandmarkObservation],
) -> Vec<LandmarkObservation> {
    let transform = pose.isometry();
    observations
        .iter()
        .map(|obs| {
            let world = transform * obs.position();
            LandmarkObservation::new(world.x, world.y)
        })
        .collect()
}

/// Bivariate Gaussian density with independent axes, evaluated at the residual `(dx, dy)`.
///
/// $$
/// w = \frac{1}{2\pi\sigma_x\sigma_y} \exp\left(-\left[\frac{d_x^2}{2\sigma_x^2} + \frac{d_y^2}{2\sigma_y^2}\right]\right)
/// $$
pub fn bivariate_gaussian(dx: f64, dy: f64, std_x: f64, std_y: f64) -> f64 {
    let exponent = dx * dx / (2.0 * std_x * std_x) + dy * dy / (2.0 * std_y * std_y);
    (-exponent).exp() / (2.0 * PI * std_x * std_y)
}

/// Likelihood of a world-frame observation given the landmark it was associated with.
pub fn observation_likelihood(
    observation: &LandmarkObservation,
    landmark: &Landmark,
    std_landmark: [f64; 2],
) -> f64 {
    bivariate_gaussian(
        observation.x - landmark.x,
        observation.y - landmark.y,
        std_landmark[0],
        std_landmark[1],
    )
}

/// Check a standard deviation: finite and non-negative, or strictly positive when it is used as a divisor.
pub(crate) fn validate_std_dev(
    name: &'static str,
    value: f64,
    strictly_positive: bool,
) -> Result<()> {
    let lower_bound_ok = if strictly_positive { value > 0.0 } else { value >= 0.0 };
    if value.is_finite() && lower_bound_ok {
        Ok(())
    } else {
        Err(FilterError::InvalidNoise { name, value })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use std::f64::consts::FRAC_PI_2;

    fn sample_map() -> LandmarkMap {
        LandmarkMap::new(vec![
            Landmark::new(10, 5.0, 0.0),
            Landmark::new(3, 0.0, 20.0),
            Landmark::new(42, -1.0, -1.0),
        ])
        .unwrap()
    }

    #[test]
    fn test_map_lookup_by_non_contiguous_id() {
        let map = sample_map();
        assert_eq!(map.len(), 3);
        assert_eq!(map.get(42).unwrap().x, -1.0);
        assert_eq!(map.get(3).unwrap().y, 20.0);
        assert!(matches!(map.get(1), Err(FilterError::UnknownLandmark(1))));
    }
    #[test]
    fn test_map_rejects_duplicate_ids() {
        let result = LandmarkMap::new(vec![Landmark::new(1, 0.0, 0.0), Landmark::new(1, 1.0, 1.0)]);
        assert!(matches!(result, Err(FilterError::DuplicateLandmark(1))));
    }
    #[test]
    fn test_within_range_is_strict_and_ordered() {
        let map = sample_map();
        let visible = map.within_range(&Pose::default(), 5.0);
        // landmark 10 sits exactly at the range boundary and is excluded
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].id, 42);
        let visible = map.within_range(&Pose::default(), 5.1);
        let ids: Vec<LandmarkId> = visible.iter().map(|lm| lm.id).collect();
        assert_eq!(ids, vec![10, 42]);
    }
    #[test]
    fn test_to_world_frame_rotates_then_translates() {
        let pose = Pose::new(4.0, 5.0, -FRAC_PI_2);
        let observations = vec![
            LandmarkObservation::new(2.0, 2.0),
            LandmarkObservation::new(3.0, -4.0),
        ];
        let world = to_world_frame(&pose, &observations);
        assert_approx_eq!(world[0].x, 6.0, 1e-12);
        assert_approx_eq!(world[0].y, 3.0, 1e-12);
        assert_approx_eq!(world[1].x, 0.0, 1e-12);
        assert_approx_eq!(world[1].y, 2.0, 1e-12);
        assert!(world.iter().all(|obs| obs.id.is_none()));
    }
    #[test]
    fn test_bivariate_gaussian_peak_and_decay() {
        let peak = bivariate_gaussian(0.0, 0.0, 0.3, 0.3);
        assert_eq!(peak, 1.0 / (2.0 * PI * 0.3 * 0.3));
        let off = bivariate_gaussian(0.3, 0.0, 0.3, 0.3);
        assert_approx_eq!(off, peak * (-0.5f64).exp(), 1e-12);
    }
    #[test]
    fn test_validate_std_dev() {
        assert!(validate_std_dev("sigma", 0.0, false).is_ok());
        assert!(validate_std_dev("sigma", 0.0, true).is_err());
        assert!(validate_std_dev("sigma", -1.0, false).is_err());
        assert!(validate_std_dev("sigma", f64::NAN, false).is_err());
    }
}
