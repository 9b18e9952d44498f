//! Nearest-neighbour data association.
//!
//! Each world-frame observation is assigned the id of the closest candidate landmark by Euclidean distance.
//! Observations are handled independently of each other, so two observations may share a landmark and the
//! result for one observation never depends on the order or content of the others. Ties go to the candidate
//! encountered first: a later candidate only replaces the current best when it is strictly closer.

use crate::error::{FilterError, Result};
use crate::measurements::{Landmark, LandmarkObservation};

/// Return the candidate nearest to `observation`.
pub fn nearest_landmark<'a>(
    candidates: &'a [Landmark],
    observation: &LandmarkObservation,
) -> Result<&'a Landmark> {
    let mut best: Option<(&Landmark, f64)> = None;
    for candidate in candidates {
        let distance = (candidate.x - observation.x).hypot(candidate.y - observation.y);
        if best.is_none_or(|(_, best_distance)| distance < best_distance) {
            best = Some((candidate, distance));
        }
    }
    best.map(|(landmark, _)| landmark)
        .ok_or(FilterError::EmptyCandidateSet)
}

/// Assign every observation the id of its nearest candidate landmark.
///
/// Both sets must already be in the world frame. Fails with [`FilterError::EmptyCandidateSet`] when there
/// are no candidates, in which case the observations are left untouched.
pub fn associate(candidates: &[Landmark], observations: &mut [LandmarkObservation]) -> Result<()> {
    if candidates.is_empty() {
        return Err(FilterError::EmptyCandidateSet);
    }
    for observation in observations.iter_mut() {
        observation.id = Some(nearest_landmark(candidates, observation)?.id);
    }
    Ok(())
}
