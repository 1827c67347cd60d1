//! stereoflow command-line tool
//!
//! Usage:
//!   stereoflow cloud --config stereo.json --left left.png --right right.png --output cloud.pcd
//!   stereoflow flow --prev a.png --current b.png --dt-ms 500
//!   stereoflow watch --frames ./frames --seconds 5

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use stereoflow_frontend::compute_flow;
use stereoflow_sensor::{
    FlowSensor, FlowSensorConfig, ImageFileSource, ImageSequenceSource, StereoCamera, StereoCameraConfig,
};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "stereoflow", version, about = "Stereo point clouds and optical-flow velocity")]
struct Cli {
    /// Log verbosity
    #[arg(long, value_enum, default_value_t = LogLevel::Info, global = true)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Reconstruct a point cloud from a rectified stereo pair
    Cloud {
        /// Stereo camera JSON configuration
        #[arg(long, value_name = "FILE")]
        config: PathBuf,
        /// Left image, overrides the configured source
        #[arg(long, value_name = "FILE")]
        left: Option<PathBuf>,
        /// Right image, overrides the configured source
        #[arg(long, value_name = "FILE")]
        right: Option<PathBuf>,
        /// PCD output, stdout if omitted
        #[arg(long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
    /// Estimate velocity between two images
    Flow {
        #[arg(long, value_name = "FILE")]
        prev: PathBuf,
        #[arg(long, value_name = "FILE")]
        current: PathBuf,
        /// Time between the two captures
        #[arg(long, default_value_t = 1000)]
        dt_ms: u64,
        /// Focal length in pixels
        #[arg(long, default_value_t = 30.0)]
        focal_length: f64,
    },
    /// Run the flow sensor over a directory of frames
    Watch {
        /// Directory of images, visited in sorted order
        #[arg(long, value_name = "DIR")]
        frames: PathBuf,
        /// Flow sensor JSON configuration
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,
        /// How long to run
        #[arg(long, default_value_t = 5)]
        seconds: u64,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::from(cli.log_level))
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Command::Cloud {
            config,
            left,
            right,
            output,
        } => run_cloud(config, left, right, output),
        Command::Flow {
            prev,
            current,
            dt_ms,
            focal_length,
        } => run_flow(prev, current, dt_ms, focal_length),
        Command::Watch {
            frames,
            config,
            seconds,
        } => run_watch(frames, config, seconds),
    }
}

fn run_cloud(
    config_path: PathBuf,
    left: Option<PathBuf>,
    right: Option<PathBuf>,
    output: Option<PathBuf>,
) -> Result<()> {
    let mut config = StereoCameraConfig::from_file(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    if let Some(left) = left {
        config.left = left.display().to_string();
    }
    if let Some(right) = right {
        config.right = right.display().to_string();
    }

    let left = ImageFileSource::new(&config.left);
    let right = ImageFileSource::new(&config.right);
    let camera = StereoCamera::new(config, left, right)?;

    let start = Instant::now();
    let cloud = camera.next_point_cloud()?;
    info!(points = cloud.len(), elapsed = ?start.elapsed(), "reconstructed point cloud");

    match output {
        Some(path) => {
            let file = File::create(&path).with_context(|| format!("creating {}", path.display()))?;
            let mut out = BufWriter::new(file);
            cloud.write_pcd(&mut out)?;
            out.flush()?;
            info!(path = %path.display(), "wrote PCD");
        }
        None => {
            let stdout = io::stdout();
            let mut out = stdout.lock();
            cloud.write_pcd(&mut out)?;
            out.flush()?;
        }
    }
    Ok(())
}

fn run_flow(prev: PathBuf, current: PathBuf, dt_ms: u64, focal_length: f64) -> Result<()> {
    let prev_image = image::open(&prev).with_context(|| format!("reading {}", prev.display()))?;
    let current_image =
        image::open(&current).with_context(|| format!("reading {}", current.display()))?;

    let dt = Duration::from_millis(dt_ms).as_secs_f64();
    let estimate = compute_flow(&prev_image, &current_image, dt, focal_length)?;

    println!(
        "linear velocity:  ({:.6}, {:.6}, {:.6})",
        estimate.linear.x, estimate.linear.y, estimate.linear.z
    );
    println!(
        "angular velocity: ({:.6}, {:.6}, {:.6})",
        estimate.angular.x, estimate.angular.y, estimate.angular.z
    );
    println!("tracked features: {}", estimate.tracked);
    Ok(())
}

fn run_watch(frames: PathBuf, config_path: Option<PathBuf>, seconds: u64) -> Result<()> {
    let source = ImageSequenceSource::from_dir(&frames)?;
    anyhow::ensure!(!source.is_empty(), "no images in {}", frames.display());
    info!(frames = source.len(), "loaded image sequence");

    let config = match config_path {
        Some(path) => FlowSensorConfig::from_file(&path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => FlowSensorConfig::new(frames.display().to_string()),
    };
    let interval = config.interval();

    let mut sensor = FlowSensor::spawn(config, source)?;
    let deadline = Instant::now() + Duration::from_secs(seconds);
    while Instant::now() < deadline {
        thread::sleep(interval);
        let readings = sensor.readings();
        match readings.status {
            Ok(()) => println!(
                "linear ({:.6}, {:.6})  angular {:.6}  tracked {}",
                readings.linear_velocity.x,
                readings.linear_velocity.y,
                readings.angular_velocity.z,
                readings.tracked
            ),
            Err(err) => warn!(error = %err, "no usable reading"),
        }
    }
    sensor.close();
    Ok(())
}
