//! Error types for the localization filter and its surrounding utilities.
//!
//! Every failure is local to a single call: the filter never retries and never
//! leaves its particle population half-written. The caller decides whether to
//! skip the step, adjust its inputs, or abort.

use thiserror::Error;

use crate::measurements::LandmarkId;

/// Localization filter error type
#[derive(Error, Debug)]
pub enum FilterError {
    /// A filter operation was requested before `initialize` ran.
    #[error("particle filter has not been initialized")]
    Uninitialized,

    /// Data association was invoked without any landmark candidates.
    #[error("no landmark candidates available for data association")]
    EmptyCandidateSet,

    /// A particle sees no landmark within sensor range. This is a modeling or
    /// configuration problem, not evidence against the pose hypothesis.
    #[error("particle {particle} has no landmarks within sensor range {sensor_range} m")]
    NoLandmarksInRange { particle: usize, sensor_range: f64 },

    /// Every weight is zero so no sampling distribution exists.
    #[error("all particle weights are zero; cannot resample")]
    DegenerateWeights,

    #[error("invalid particle weight {weight} at index {index}")]
    InvalidWeight { index: usize, weight: f64 },

    /// An association referenced an id that the landmark map does not hold.
    #[error("landmark id {0} is not present in the map")]
    UnknownLandmark(LandmarkId),

    #[error("duplicate landmark id {0} in map")]
    DuplicateLandmark(LandmarkId),

    /// A standard deviation (or similar noise parameter) is negative, zero where
    /// a divisor is required, or not finite.
    #[error("invalid noise parameter {name}: {value}")]
    InvalidNoise { name: &'static str, value: f64 },

    /// A control or timing input is NaN or infinite.
    #[error("non-finite input {name}: {value}")]
    NonFiniteInput { name: &'static str, value: f64 },

    #[error("observation {index} has non-finite coordinates ({x}, {y})")]
    NonFiniteObservation { index: usize, x: f64, y: f64 },

    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<csv::Error> for FilterError {
    fn from(e: csv::Error) -> Self {
        FilterError::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for FilterError {
    fn from(e: serde_json::Error) -> Self {
        FilterError::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for FilterError {
    fn from(e: serde_yaml::Error) -> Self {
        FilterError::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for FilterError {
    fn from(e: toml::de::Error) -> Self {
        FilterError::Serialization(e.to_string())
    }
}

impl From<toml::ser::Error> for FilterError {
    fn from(e: toml::ser::Error) -> Self {
        FilterError::Serialization(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, FilterError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_landmarks_message_names_particle_and_range() {
        let err = FilterError::NoLandmarksInRange {
            particle: 7,
            sensor_range: 2.5,
        };
        let msg = err.to_string();
        assert!(msg.contains("particle 7"));
        assert!(msg.contains("2.5"));
    }

    #[test]
    fn test_io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: FilterError = io.into();
        assert!(matches!(err, FilterError::Io(_)));
    }
}
