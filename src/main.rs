// src/main.rs

use anyhow::{bail, Context, Result};
use lane_follower::actuation::{self, BoxedHardware, BoxedMotors, DryRunHardware, DryRunMotors};
use lane_follower::camera::CameraSource;
use lane_follower::checks::{self, CheckReport};
use lane_follower::detection::LaneSignalExtractor;
use lane_follower::pipeline::{CancelToken, ControlLoop, Outcome, RunReport, Supervisor};
use lane_follower::steering::SteeringPolicy;
use lane_follower::traffic_light;
use lane_follower::types::Config;
use std::path::PathBuf;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG: &str = "config.yaml";
const USAGE: &str = "usage: lane-follower [drive|preview|check|lights <image>] [config.yaml]";

#[derive(Debug, PartialEq)]
enum Mode {
    Drive,
    Preview,
    Check,
    Lights(PathBuf),
}

#[derive(Debug, PartialEq)]
struct Args {
    mode: Mode,
    config_path: Option<PathBuf>,
}

fn parse_args(args: impl IntoIterator<Item = String>) -> Result<Args> {
    let mut args = args.into_iter().peekable();

    let mode = match args.peek().map(String::as_str) {
        Some("drive") => {
            args.next();
            Mode::Drive
        }
        Some("preview") => {
            args.next();
            Mode::Preview
        }
        Some("check") => {
            args.next();
            Mode::Check
        }
        Some("lights") => {
            args.next();
            match args.next() {
                Some(image) => Mode::Lights(PathBuf::from(image)),
                None => bail!("`lights` needs an image path\n{}", USAGE),
            }
        }
        Some("-h") | Some("--help") => bail!("{}", USAGE),
        _ => Mode::Drive,
    };

    let config_path = args.next().map(PathBuf::from);
    if let Some(extra) = args.next() {
        bail!("unexpected argument `{}`\n{}", extra, USAGE);
    }

    Ok(Args { mode, config_path })
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    match path {
        Some(path) => Config::load(path),
        None if PathBuf::from(DEFAULT_CONFIG).exists() => Config::load(DEFAULT_CONFIG),
        None => Ok(Config::default()),
    }
}

fn init_logging(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = parse_args(std::env::args().skip(1))?;
    let config = load_config(args.config_path.as_ref())?;
    init_logging(&config);

    info!("🚗 Lane follower starting ({:?})", args.mode);
    if args.config_path.is_none() && !PathBuf::from(DEFAULT_CONFIG).exists() {
        warn!("No {} found, using built-in defaults", DEFAULT_CONFIG);
    }
    info!("✓ Configuration loaded");

    match args.mode {
        Mode::Drive => drive(config, false).await,
        Mode::Preview => drive(config, true).await,
        Mode::Check => self_check(config).await,
        Mode::Lights(image) => {
            let (lights, output) = traffic_light::annotate_file(&image)?;
            for light in &lights {
                info!("  {} at ({}, {}) r={}", light.color, light.x, light.y, light.radius);
            }
            info!("Annotated image: {}", output.display());
            Ok(())
        }
    }
}

async fn drive(config: Config, observe_only: bool) -> Result<()> {
    let cancel = CancelToken::new();

    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Ctrl-C received, stopping after the current frame");
            on_signal.cancel();
        }
    });

    let outcome =
        tokio::task::spawn_blocking(move || supervised_drive(&config, observe_only, cancel))
            .await
            .context("Control loop thread failed")??;

    match outcome {
        Outcome::Completed(report) => {
            info!("Run report: {}", serde_json::to_string(&report)?);
            Ok(())
        }
        other => other.into_result().map(|_| ()),
    }
}

fn supervised_drive(
    config: &Config,
    observe_only: bool,
    cancel: CancelToken,
) -> Result<Outcome<RunReport>> {
    let hardware: BoxedHardware = if observe_only {
        Box::new(DryRunHardware::default())
    } else {
        actuation::hardware(config)?
    };

    Supervisor::new(hardware).run(|| {
        let motors: BoxedMotors = if observe_only {
            Box::new(DryRunMotors::default())
        } else {
            actuation::open_devices(config)?.0
        };

        let source = CameraSource::open(&config.camera)?;
        let extractor = LaneSignalExtractor::from_config(config)?;
        info!("✓ {:?} extractor ready", extractor.kind());

        let mut control = ControlLoop::new(
            source,
            extractor,
            SteeringPolicy::new(config.policy.clone()),
            motors,
            config.run.clone(),
            config.camera.fps,
            cancel,
        );
        control.run()
    })
}

async fn self_check(config: Config) -> Result<()> {
    let outcome = tokio::task::spawn_blocking(move || -> Result<Outcome<CheckReport>> {
        let hardware = actuation::hardware(&config)?;
        Supervisor::new(hardware).run(|| {
            let (mut motors, mut servos, mut sensor) = actuation::open_devices(&config)?;
            checks::run_checks(&config, &mut motors, &mut servos, &mut sensor)
        })
    })
    .await
    .context("Self-check thread failed")??;

    match outcome {
        Outcome::Completed(report) => {
            info!("Check report: {}", serde_json::to_string(&report)?);
            if report.sensor_failures() > 0 {
                warn!("{} range samples had no echo", report.sensor_failures());
            }
            Ok(())
        }
        other => {
            error!("Self-check did not complete");
            other.into_result().map(|_| ())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Args> {
        parse_args(args.iter().map(|s| s.to_string()))
    }

    #[test]
    fn test_default_mode_is_drive() {
        let args = parse(&[]).unwrap();
        assert_eq!(args.mode, Mode::Drive);
        assert_eq!(args.config_path, None);
    }

    #[test]
    fn test_bare_config_path_drives() {
        let args = parse(&["track.yaml"]).unwrap();
        assert_eq!(args.mode, Mode::Drive);
        assert_eq!(args.config_path, Some(PathBuf::from("track.yaml")));
    }

    #[test]
    fn test_subcommands() {
        assert_eq!(parse(&["preview"]).unwrap().mode, Mode::Preview);
        assert_eq!(parse(&["check", "car.yaml"]).unwrap().mode, Mode::Check);
        assert_eq!(
            parse(&["lights", "red.jpg"]).unwrap().mode,
            Mode::Lights(PathBuf::from("red.jpg"))
        );
    }

    #[test]
    fn test_bad_arguments() {
        assert!(parse(&["lights"]).is_err());
        assert!(parse(&["drive", "a.yaml", "b.yaml"]).is_err());
        assert!(parse(&["--help"]).is_err());
    }
}
