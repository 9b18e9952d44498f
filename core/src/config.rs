//! Configuration for the localization filter and the simulation harness.
//!
//! All configuration structs are plain `serde` types with defaults for every field, so a configuration
//! file only needs to name the values it changes. [`MclConfig`] bundles the filter, simulation and logging
//! sections and can be read from or written to JSON, YAML or TOML, chosen by file extension.

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{FilterError, Result};
use crate::particle::AveragingStrategy;
use crate::resampling::ResamplingStrategy;
use crate::{DEFAULT_YAW_RATE_THRESHOLD, Pose};

/// Number of particles used when none is configured.
pub const DEFAULT_NUM_PARTICLES: usize = 100;

/// Particle filter settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Fixed population size `N`. Larger populations reduce estimator variance at linear cost per step.
    pub num_particles: usize,
    /// Seed for the filter's random number generator. `None` draws the seed from OS entropy.
    pub seed: Option<u64>,
    /// Yaw-rate magnitude (rad/s) below which prediction uses straight-line motion.
    pub yaw_rate_threshold: f64,
    pub resampling_strategy: ResamplingStrategy,
    pub averaging_strategy: AveragingStrategy,
    /// Fan the per-particle prediction and weighting work out over the rayon thread pool.
    pub parallel: bool,
}
impl Default for FilterConfig {
    fn default() -> Self {
        FilterConfig {
            num_particles: DEFAULT_NUM_PARTICLES,
            seed: None,
            yaw_rate_threshold: DEFAULT_YAW_RATE_THRESHOLD,
            resampling_strategy: ResamplingStrategy::default(),
            averaging_strategy: AveragingStrategy::default(),
            parallel: false,
        }
    }
}
impl FilterConfig {
    /// Convenience constructor for a seeded filter of `num_particles` particles.
    pub fn seeded(num_particles: usize, seed: u64) -> Self {
        FilterConfig {
            num_particles,
            seed: Some(seed),
            ..Default::default()
        }
    }
    pub fn validate(&self) -> Result<()> {
        if self.num_particles == 0 {
            return Err(FilterError::Configuration(
                "num_particles must be at least 1".to_string(),
            ));
        }
        if !self.yaw_rate_threshold.is_finite() || self.yaw_rate_threshold < 0.0 {
            return Err(FilterError::Configuration(format!(
                "yaw_rate_threshold must be finite and non-negative, got {}",
                self.yaw_rate_threshold
            )));
        }
        Ok(())
    }
}

/// Parameters of the synthetic localization scenario used by [`crate::sim`].
///
/// The defaults mirror a typical vehicle kidnapped-localization exercise: a 0.1 s step, a 50 m sensor,
/// 0.3 m GPS-grade initial position uncertainty and 0.3 m landmark measurement noise.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Number of filter cycles to run
    pub steps: usize,
    /// Time step in seconds
    pub delta_t: f64,
    /// Sensor range in meters
    pub sensor_range: f64,
    /// Extra radius added to the sensor range when gating the map for each particle
    pub gating_margin: f64,
    /// Initial pose of the ground-truth trajectory
    pub initial_pose: Pose,
    /// Standard deviations of the initial estimate and of the process noise `[x (m), y (m), theta (rad)]`
    pub sigma_pos: [f64; 3],
    /// Landmark measurement noise `[x (m), y (m)]`
    pub sigma_landmark: [f64; 2],
    /// Commanded linear velocity in m/s
    pub velocity: f64,
    /// Peak commanded yaw rate in rad/s; the command follows a slow sinusoid
    pub yaw_rate_amplitude: f64,
    /// Period of the yaw-rate sinusoid in seconds
    pub yaw_rate_period: f64,
    /// Standard deviations of the control noise `[velocity (m/s), yaw rate (rad/s)]`
    pub control_noise: [f64; 2],
    /// Number of landmarks in a generated map
    pub num_landmarks: usize,
    /// Generated landmarks are scattered uniformly over `[-extent, extent]` around the initial pose
    pub map_extent: f64,
    /// Seed for scenario generation (independent of the filter seed)
    pub seed: u64,
}
impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            steps: 200,
            delta_t: 0.1,
            sensor_range: 50.0,
            gating_margin: 2.0,
            initial_pose: Pose::default(),
            sigma_pos: [0.3, 0.3, 0.01],
            sigma_landmark: [0.3, 0.3],
            velocity: 5.0,
            yaw_rate_amplitude: 0.1,
            yaw_rate_period: 20.0,
            control_noise: [0.05, 0.005],
            num_landmarks: 60,
            map_extent: 100.0,
            seed: 42,
        }
    }
}
impl SimulationConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.delta_t.is_finite() && self.delta_t > 0.0) {
            return Err(FilterError::Configuration(format!(
                "delta_t must be positive, got {}",
                self.delta_t
            )));
        }
        if !(self.sensor_range.is_finite() && self.sensor_range > 0.0) {
            return Err(FilterError::Configuration(format!(
                "sensor_range must be positive, got {}",
                self.sensor_range
            )));
        }
        if !(self.gating_margin.is_finite() && self.gating_margin >= 0.0) {
            return Err(FilterError::Configuration(format!(
                "gating_margin must be non-negative, got {}",
                self.gating_margin
            )));
        }
        if !(self.map_extent.is_finite() && self.map_extent > 0.0) {
            return Err(FilterError::Configuration(format!(
                "map_extent must be positive, got {}",
                self.map_extent
            )));
        }
        if !(self.yaw_rate_period.is_finite() && self.yaw_rate_period > 0.0) {
            return Err(FilterError::Configuration(format!(
                "yaw_rate_period must be positive, got {}",
                self.yaw_rate_period
            )));
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}
impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Off => "off",
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}
impl From<LogLevel> for log::LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Off => log::LevelFilter::Off,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: LogLevel,
    /// Log file path; logs go to stderr when unset
    pub file: Option<String>,
}

/// Complete configuration of an `mcl-sim` run.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MclConfig {
    pub filter: FilterConfig,
    pub simulation: SimulationConfig,
    pub logging: LoggingConfig,
}

impl MclConfig {
    pub fn validate(&self) -> Result<()> {
        self.filter.validate()?;
        self.simulation.validate()
    }
    /// Write the configuration to a JSON file (pretty-printed).
    pub fn to_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path)?;
        serde_json::to_writer_pretty(file, self)?;
        Ok(())
    }
    /// Read the configuration from a JSON file.
    pub fn from_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        Ok(serde_json::from_reader(file)?)
    }
    pub fn to_yaml<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut file = File::create(path)?;
        let s = serde_yaml::to_string(self)?;
        file.write_all(s.as_bytes())?;
        Ok(())
    }
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        Ok(serde_yaml::from_reader(file)?)
    }
    pub fn to_toml<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut file = File::create(path)?;
        let s = toml::to_string(self)?;
        file.write_all(s.as_bytes())?;
        Ok(())
    }
    pub fn from_toml<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut s = String::new();
        File::open(path)?.read_to_string(&mut s)?;
        Ok(toml::from_str(&s)?)
    }
    /// Generic write: choose format by file extension (.json/.yaml/.yml/.toml)
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let p = path.as_ref();
        match extension(p).as_deref() {
            Some("json") => self.to_json(p),
            Some("yaml") | Some("yml") => self.to_yaml(p),
            Some("toml") => self.to_toml(p),
            _ => Err(unsupported(p)),
        }
    }
    /// Generic read: choose format by file extension (.json/.yaml/.yml/.toml)
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let p = path.as_ref();
        let config = match extension(p).as_deref() {
            Some("json") => Self::from_json(p),
            Some("yaml") | Some("yml") => Self::from_yaml(p),
            Some("toml") => Self::from_toml(p),
            _ => Err(unsupported(p)),
        }?;
        config.validate()?;
        Ok(config)
    }
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_lowercase())
}

fn unsupported(path: &Path) -> FilterError {
    FilterError::Configuration(format!(
        "unsupported configuration file extension: {}",
        path.display()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("mcl_config_{}_{}", std::process::id(), name))
    }

    fn custom_config() -> MclConfig {
        let mut config = MclConfig::default();
        config.filter.num_particles = 250;
        config.filter.seed = Some(7);
        config.filter.resampling_strategy = ResamplingStrategy::Systematic;
        config.filter.averaging_strategy = AveragingStrategy::HighestWeight;
        config.simulation.sensor_range = 30.0;
        config.simulation.initial_pose = Pose::new(1.0, 2.0, 0.5);
        config.logging.level = LogLevel::Debug;
        config.logging.file = Some("run.log".to_string());
        config
    }

    #[test]
    fn test_defaults() {
        let config = MclConfig::default();
        assert_eq!(config.filter.num_particles, 100);
        assert_eq!(config.filter.seed, None);
        assert_eq!(config.filter.resampling_strategy, ResamplingStrategy::Multinomial);
        assert_eq!(config.logging.level, LogLevel::Info);
        assert!(config.logging.file.is_none());
        assert!(config.validate().is_ok());
    }
    #[test]
    fn test_round_trip_all_formats() {
        let config = custom_config();
        for ext in ["json", "yaml", "yml", "toml"] {
            let path = temp_path(&format!("round_trip.{ext}"));
            config.to_file(&path).unwrap();
            let loaded = MclConfig::from_file(&path).unwrap();
            assert_eq!(loaded, config, "format {ext}");
            std::fs::remove_file(&path).ok();
        }
    }
    #[test]
    fn test_partial_file_uses_defaults() {
        let path = temp_path("partial.toml");
        std::fs::write(&path, "[filter]\nnum_particles = 12\nseed = 3\n").unwrap();
        let loaded = MclConfig::from_file(&path).unwrap();
        assert_eq!(loaded.filter.num_particles, 12);
        assert_eq!(loaded.filter.seed, Some(3));
        assert_eq!(loaded.simulation, SimulationConfig::default());
        std::fs::remove_file(&path).ok();
    }
    #[test]
    fn test_unsupported_extension() {
        let config = MclConfig::default();
        let result = config.to_file(temp_path("config.ini"));
        assert!(matches!(result, Err(FilterError::Configuration(_))));
    }
    #[test]
    fn test_invalid_values_rejected() {
        let mut config = FilterConfig::default();
        config.num_particles = 0;
        assert!(config.validate().is_err());
        let mut config = FilterConfig::default();
        config.yaw_rate_threshold = -1.0;
        assert!(config.validate().is_err());
        let mut sim = SimulationConfig::default();
        sim.sensor_range = 0.0;
        assert!(sim.validate().is_err());
    }
    #[test]
    fn test_log_level_conversion() {
        assert_eq!(log::LevelFilter::from(LogLevel::Warn), log::LevelFilter::Warn);
        assert_eq!(LogLevel::Trace.as_str(), "trace");
    }
}
