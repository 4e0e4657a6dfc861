use std::{fs, path::PathBuf, thread};

use anyhow::{Context, Result};
use clap::Parser;
use large_init::{
    load_large_init_config_from_env, regions_default, stitch, AreaShape, LargeInitConfig,
    MockBackend, RegionOutcome, StitchOptions, StitchProgress,
};
use scenario_schema::Point;

#[derive(Parser, Debug)]
#[command(author, version, about = "Run a large-area initialization against the offline mock backend", long_about = None)]
struct Args {
    /// Location name passed through to the backend
    #[arg(long, default_value = "mock:grid")]
    location: String,

    /// Full width of the area to populate (defaults to the map bounds)
    #[arg(long, requires = "height")]
    width: Option<f64>,

    /// Full height of the area to populate (defaults to the map bounds)
    #[arg(long, requires = "width")]
    height: Option<f64>,

    #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
    center_x: f64,

    #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
    center_y: f64,

    /// Edge length of the mock map square
    #[arg(long, default_value_t = 200.0)]
    map_fov: f64,

    /// Grid stride override (metres)
    #[arg(long)]
    stride: Option<f64>,

    /// Total agents to allocate (defaults to the per-region budget)
    #[arg(long)]
    agents: Option<usize>,

    #[arg(long)]
    seed: Option<u64>,

    /// Abort when any region exhausts its attempts
    #[arg(long)]
    strict: bool,

    /// Fraction of every rendered birdview that the mock reports as road
    #[arg(long, default_value_t = 0.6)]
    drivable_ratio: f64,

    /// Mock capacity: requests with more agents than this are infeasible
    #[arg(long)]
    max_agents_per_call: Option<usize>,

    /// Config JSON (defaults to LARGE_INIT_CONFIG_PATH or the builtin)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write the merged result here instead of stdout
    #[arg(long)]
    output: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => LargeInitConfig::from_file(path)
            .with_context(|| format!("Failed to load config at {}", path.display()))?,
        None => load_large_init_config_from_env().0.as_ref().clone(),
    };
    if let Some(stride) = args.stride {
        config.grid_stride = stride;
    }

    let center = Point::new(args.center_x, args.center_y);
    let mut backend = MockBackend::new(args.drivable_ratio).with_map_square(center, args.map_fov);
    if let Some(limit) = args.max_agents_per_call {
        backend = backend.with_max_agents_per_call(limit);
    }
    let area = args
        .width
        .zip(args.height)
        .map(|(width, height)| AreaShape::new(width, height));

    let mut regions = regions_default(
        &backend,
        &args.location,
        args.agents,
        area,
        center,
        args.seed,
        &config,
    )
    .with_context(|| format!("Failed to plan regions for '{}'", args.location))?;

    let (sender, receiver) = crossbeam_channel::unbounded::<StitchProgress>();
    let options = StitchOptions::from_config(&config)
        .strict(args.strict)
        .with_seed(args.seed)
        .with_progress(sender);

    let result = thread::scope(|scope| {
        scope.spawn(move || {
            for progress in receiver.iter() {
                eprintln!(
                    "[{}/{}] region at {}: {}",
                    progress.index + 1,
                    progress.total,
                    progress.center,
                    describe(progress.outcome)
                );
            }
        });
        let result = stitch(&backend, &args.location, &mut regions, None, &options);
        drop(options);
        result
    })
    .with_context(|| format!("Initialization failed for '{}'", args.location))?;

    let json = serde_json::to_string_pretty(&result)?;
    match &args.output {
        Some(path) => fs::write(path, json)
            .with_context(|| format!("Failed to write result to {}", path.display()))?,
        None => println!("{json}"),
    }
    eprintln!(
        "{} agents across {} regions ({} initialize calls)",
        result.agent_count(),
        regions.len(),
        backend.initialize_calls()
    );
    Ok(())
}

fn describe(outcome: RegionOutcome) -> String {
    match outcome {
        RegionOutcome::Skipped => "skipped".to_string(),
        RegionOutcome::Succeeded { attempts } => format!("succeeded after {attempts} attempt(s)"),
        RegionOutcome::Degraded { attempts, kept } => {
            format!("degraded after {attempts} attempt(s), kept {kept}")
        }
        RegionOutcome::Emptied { attempts } => format!("emptied after {attempts} attempt(s)"),
    }
}
