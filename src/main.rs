// ============================================================================
// main.rs — TriEvo
// Entry point. Parses the command line, initializes logging, and starts
// either the windowed viewer or a headless batch.
// ============================================================================

mod app;
mod candidate;
mod config;
mod error;
mod evolve;
mod gpu;
mod headless;
mod image_io;
mod input;
mod kernels;
mod population;
#[cfg(test)]
mod raster;
mod renderer;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use winit::event_loop::EventLoop;

use app::App;
use config::{AppConfig, EvolverConfig, Origin};
use error::{EngineError, Result};
use headless::HeadlessConfig;
use image_io::ReferenceImage;

#[derive(Parser, Debug)]
#[command(name = "trievo", version, about = "Approximate an image with GPU-evolved triangles")]
struct Args {
    /// Reference image to approximate
    reference: PathBuf,

    /// JSON file with evolution parameters; flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Candidates per population
    #[arg(short = 'n', long)]
    population: Option<usize>,

    /// Evaluation rounds per refinement tick
    #[arg(short, long)]
    rounds: Option<u32>,

    /// Survivors kept between rounds and composited at the end of a tick
    #[arg(short = 'k', long)]
    survivors: Option<usize>,

    /// RNG seed for reproducible runs
    #[arg(long)]
    seed: Option<u64>,

    /// Treat pixel y = 0 as the bottom image row
    #[arg(long)]
    bottom_left: bool,

    /// Run this many ticks without a window, then write --output
    #[arg(long, value_name = "TICKS")]
    headless: Option<u32>,

    /// PNG written at the end of a headless run
    #[arg(short, long, default_value = "canvas.png")]
    output: PathBuf,

    /// Start the viewer with continuous refinement on
    #[arg(long)]
    run: bool,
}

fn evolver_config(args: &Args) -> Result<EvolverConfig> {
    let mut cfg = match &args.config {
        Some(path) => EvolverConfig::load_json(path)?,
        None => EvolverConfig::default(),
    };
    if let Some(n) = args.population {
        cfg.population_size = n;
    }
    if let Some(r) = args.rounds {
        cfg.rounds = r;
    }
    if let Some(k) = args.survivors {
        cfg.survivors = k;
    }
    if args.seed.is_some() {
        cfg.seed = args.seed;
    }
    if args.bottom_left {
        cfg.origin = Origin::BottomLeft;
    }
    cfg.validate()?;
    Ok(cfg)
}

fn run(args: Args) -> Result<()> {
    let cfg = evolver_config(&args)?;
    let reference = ReferenceImage::open(&args.reference)?;

    if let Some(ticks) = args.headless {
        let headless = HeadlessConfig {
            ticks,
            output: args.output,
        };
        return headless::run_headless(&headless, cfg, &reference);
    }

    let app_config = AppConfig {
        auto_advance: args.run,
        ..AppConfig::default()
    };
    let event_loop = EventLoop::new().map_err(|e| EngineError::Surface(e.to_string()))?;
    event_loop.set_control_flow(winit::event_loop::ControlFlow::Poll);

    let mut app = App::new(app_config, cfg, reference);
    event_loop
        .run_app(&mut app)
        .map_err(|e| EngineError::Surface(e.to_string()))?;
    match app.take_error() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn main() -> ExitCode {
    env_logger::init();

    match run(Args::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_defaults() {
        let args = Args::try_parse_from([
            "trievo", "ref.png", "-n", "64", "--rounds", "3", "-k", "2", "--seed", "9",
            "--bottom-left",
        ])
        .unwrap();
        let cfg = evolver_config(&args).unwrap();
        assert_eq!(cfg.population_size, 64);
        assert_eq!(cfg.rounds, 3);
        assert_eq!(cfg.survivors, 2);
        assert_eq!(cfg.seed, Some(9));
        assert_eq!(cfg.origin, Origin::BottomLeft);
    }

    #[test]
    fn zero_population_flag_is_rejected() {
        let args = Args::try_parse_from(["trievo", "ref.png", "-n", "0"]).unwrap();
        assert!(matches!(
            evolver_config(&args),
            Err(EngineError::EmptyPopulation)
        ));
    }

    #[test]
    fn headless_flag_parses_tick_count() {
        let args = Args::try_parse_from(["trievo", "ref.png", "--headless", "12", "-o", "out.png"])
            .unwrap();
        assert_eq!(args.headless, Some(12));
        assert_eq!(args.output, PathBuf::from("out.png"));
    }
}
