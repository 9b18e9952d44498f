use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use log::{info, warn};
use std::path::PathBuf;

use mcl::config::{LogLevel, MclConfig};
use mcl::particle::{AveragingStrategy, ParticleFilter};
use mcl::resampling::ResamplingStrategy;
use mcl::sim::{RunSummary, Scenario, StepResult, read_landmarks_csv, run_closed_loop};

const LONG_ABOUT: &str = "MCL-SIM: A Monte Carlo localization simulator for planar vehicles.

The program generates a synthetic scenario (a landmark map, a ground-truth trajectory driven by a sinusoidal yaw-rate command, noisy odometry and noisy range-limited landmark observations) and runs a particle filter against it in closed loop. Each step predicts with the reported control, weights the particles against the observations, records the pose estimate and resamples.

Settings come from a configuration file (TOML/JSON/YAML, chosen by extension) when --config is given, otherwise from the built-in defaults; command line flags override either. The landmark map can be loaded from a CSV file with id,x,y columns instead of being generated.

Per-step results (true pose, estimated pose, position and heading error, effective sample size and the best particle's associations) are written as CSV when --output is given, and a summary of the run is logged at the end.";

/// Command line arguments
#[derive(Parser)]
#[command(author, version, about = "A Monte Carlo localization simulator.", long_about = LONG_ABOUT)]
struct Cli {
    /// Configuration file (TOML/JSON/YAML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,

    /// Log level; overrides the configuration file
    #[arg(long, value_enum, global = true)]
    log_level: Option<LogLevel>,

    /// Log file path (if not specified, logs to stderr)
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand, Clone)]
enum Command {
    #[command(
        name = "run",
        about = "Run a closed-loop localization simulation",
        long_about = "Generate a scenario and run the particle filter against it, optionally writing per-step results to CSV."
    )]
    Run(RunArgs),
    #[command(
        name = "config",
        about = "Write the effective configuration to a file",
        long_about = "Write the configuration (defaults, or --config, with any overrides applied) to a file. The format is chosen by extension, which makes this a quick way to produce a template."
    )]
    WriteConfig(WriteConfigArgs),
}

#[derive(Args, Clone, Debug)]
struct RunArgs {
    /// Landmark map CSV (id,x,y); a random map is generated when omitted
    #[arg(long)]
    landmarks: Option<PathBuf>,
    /// Output CSV file path for per-step results
    #[arg(short, long)]
    output: Option<PathBuf>,
    #[command(flatten)]
    overrides: Overrides,
}

#[derive(Args, Clone, Debug)]
struct WriteConfigArgs {
    /// Destination file (.toml, .json, .yaml or .yml)
    path: PathBuf,
    #[command(flatten)]
    overrides: Overrides,
}

#[derive(Args, Clone, Debug)]
struct Overrides {
    /// Number of simulation steps
    #[arg(long)]
    steps: Option<usize>,
    /// Scenario seed
    #[arg(long)]
    seed: Option<u64>,
    /// Filter RNG seed; the filter draws from OS entropy when neither this nor the configuration sets one
    #[arg(long)]
    filter_seed: Option<u64>,
    /// Number of particles
    #[arg(short = 'n', long)]
    num_particles: Option<usize>,
    #[arg(long, value_enum)]
    resampling: Option<ResamplingStrategy>,
    #[arg(long, value_enum)]
    averaging: Option<AveragingStrategy>,
    /// Run prediction and weighting on the rayon thread pool
    #[arg(long)]
    parallel: bool,
}

impl Overrides {
    fn apply(&self, config: &mut MclConfig) {
        if let Some(steps) = self.steps {
            config.simulation.steps = steps;
        }
        if let Some(seed) = self.seed {
            config.simulation.seed = seed;
        }
        if self.filter_seed.is_some() {
            config.filter.seed = self.filter_seed;
        }
        if let Some(n) = self.num_particles {
            config.filter.num_particles = n;
        }
        if let Some(strategy) = self.resampling {
            config.filter.resampling_strategy = strategy;
        }
        if let Some(strategy) = self.averaging {
            config.filter.averaging_strategy = strategy;
        }
        if self.parallel {
            config.filter.parallel = true;
        }
    }
}

/// Initialize the logger with a timestamped format, writing to `log_file` when given.
fn init_logger(level: log::LevelFilter, log_file: Option<&PathBuf>) -> Result<()> {
    use std::io::Write;

    let mut builder = env_logger::Builder::new();
    builder.filter_level(level);
    builder.format(|buf, record| {
        writeln!(
            buf,
            "{} [{}] - {}",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
            record.level(),
            record.args()
        )
    });

    if let Some(log_path) = log_file {
        if let Some(parent) = log_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let target = Box::new(
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(log_path)
                .with_context(|| format!("failed to open log file {}", log_path.display()))?,
        );
        builder.target(env_logger::Target::Pipe(target));
    }

    builder.try_init()?;
    Ok(())
}

fn run(config: &MclConfig, args: &RunArgs) -> Result<()> {
    let map = match &args.landmarks {
        Some(path) => {
            let map = read_landmarks_csv(path)
                .with_context(|| format!("failed to read landmarks from {}", path.display()))?;
            info!("Loaded {} landmarks from {}", map.len(), path.display());
            Some(map)
        }
        None => None,
    };
    let scenario = Scenario::generate(&config.simulation, map)?;
    if scenario.map.is_empty() {
        bail!("the landmark map is empty; nothing to localize against");
    }
    let mut filter = ParticleFilter::new(config.filter.clone())?;
    info!(
        "Running {} steps with {} particles ({:?} resampling, {:?} averaging)",
        scenario.steps.len(),
        config.filter.num_particles,
        config.filter.resampling_strategy,
        config.filter.averaging_strategy
    );
    let results = run_closed_loop(&mut filter, &scenario, &config.simulation)?;
    let summary = RunSummary::from_results(&results);
    println!("{summary}");
    match &args.output {
        Some(output) => {
            StepResult::to_csv(&results, output)
                .with_context(|| format!("failed to write results to {}", output.display()))?;
            info!("Results written to {}", output.display());
        }
        None => warn!("No --output given; per-step results were not saved"),
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => MclConfig::from_file(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?,
        None => MclConfig::default(),
    };

    // CLI logging flags take precedence over the configuration file
    let level = cli.log_level.unwrap_or(config.logging.level);
    let config_log_file = config.logging.file.as_ref().map(PathBuf::from);
    let log_file = cli.log_file.as_ref().or(config_log_file.as_ref());
    init_logger(level.into(), log_file)?;

    match &cli.command {
        Command::Run(args) => {
            args.overrides.apply(&mut config);
            config.validate()?;
            run(&config, args)
        }
        Command::WriteConfig(args) => {
            args.overrides.apply(&mut config);
            config.validate()?;
            config.to_file(&args.path)?;
            info!("Configuration written to {}", args.path.display());
            Ok(())
        }
    }
}
