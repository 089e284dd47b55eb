use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use dash_sim::config::{DEFAULT_LOG_DIR, DEFAULT_VIDEO_DIR, SimulationConfig};
use dash_sim::utils::secs_to_us;
use network_sim::{DataRate, Scenario, ScenarioConfig, parse_delay_us, render_schedule};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

// Use mimalloc as the global allocator for the binary (non-Windows only)
#[cfg(not(windows))]
#[global_allocator]
static ALLOC: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser, Debug)]
#[command(
    name = "dash-sim",
    author,
    version,
    disable_version_flag = true,
    about = "Simulate adaptive-bitrate DASH clients over a shared bottleneck"
)]
struct Cli {
    /// Print the version and exit
    #[arg(short = 'v', long = "version", action = clap::ArgAction::SetTrue)]
    print_version: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one or more simulations from the files in their run directory
    Run(RunArgs),
    /// Generate a random-walk bottleneck event schedule
    Scenario(ScenarioArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Simulation name; runs live under LOG_DIR/NAME/CLIENTS/
    #[arg(long, default_value = "dumbbell")]
    name: String,
    /// Simulation ids to run, comma-separated; each runs in parallel
    #[arg(long = "simulation-id", value_delimiter = ',', default_value = "1")]
    simulation_ids: Vec<u32>,
    /// Number of clients; must match the client batch file
    #[arg(long = "clients", default_value_t = 1)]
    number_of_clients: u32,
    #[arg(long = "log-dir", default_value = DEFAULT_LOG_DIR)]
    log_dir: PathBuf,
    /// Directory the batch file's video names are resolved in
    #[arg(long = "video-dir", default_value = DEFAULT_VIDEO_DIR)]
    video_dir: PathBuf,
    /// Initial bottleneck rate (e.g. 5Mbps, 800kbps)
    #[arg(long = "bottleneck-rate", default_value = "5Mbps")]
    bottleneck_rate: DataRate,
    /// Bottleneck propagation delay (e.g. 2ms)
    #[arg(long = "bottleneck-delay", default_value = "2ms", value_parser = parse_delay_us)]
    bottleneck_delay_us: u64,
    /// Access link propagation delay on each side of the bottleneck
    #[arg(long = "channel-delay", default_value = "2ms", value_parser = parse_delay_us)]
    channel_delay_us: u64,
    /// Bytes the link delivers to a receiver at a time
    #[arg(long = "chunk-bytes", default_value_t = network_sim::DEFAULT_CHUNK_BYTES)]
    chunk_bytes: u64,
    /// Poll sim{id}_real_time_events.txt every simulated second
    #[arg(long = "live-inputs")]
    live_inputs: bool,
    /// Stop after this many simulated seconds
    #[arg(long = "stop-time")]
    stop_time_s: Option<f64>,
    /// Also write a JSON-lines metrics file per client
    #[arg(long = "json")]
    json_metrics: bool,
}

#[derive(Args, Debug)]
struct ScenarioArgs {
    #[arg(long, default_value_t = 1)]
    seed: u64,
    /// Scenario length in seconds
    #[arg(long, default_value_t = 300)]
    duration: u64,
    /// Seconds between rate changes
    #[arg(long, default_value_t = 10)]
    step: u64,
    #[arg(long = "min-kbit", default_value_t = 1_000)]
    min_rate_kbit: u64,
    #[arg(long = "max-kbit", default_value_t = 10_000)]
    max_rate_kbit: u64,
    /// Largest change per step
    #[arg(long = "step-kbit", default_value_t = 1_500)]
    rate_step_kbit: u64,
    /// Write the schedule here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let args = Cli::parse();
    if args.print_version {
        let version = env!("CARGO_PKG_VERSION");
        let git_hash = env!("GIT_HASH");
        let git_branch = env!("GIT_BRANCH");
        let git_dirty = env!("GIT_DIRTY");

        println!(
            "{} ({}@{}{}) [{}]",
            version,
            git_branch,
            git_hash,
            git_dirty,
            env!("CARGO_PKG_NAME")
        );
        return Ok(());
    }

    match args.command {
        Some(Command::Run(run)) => run_all(run).await,
        Some(Command::Scenario(scenario)) => write_scenario(scenario),
        None => bail!("no command given; try 'dash-sim --help'"),
    }
}

async fn run_all(args: RunArgs) -> Result<()> {
    if args.stop_time_s.is_some_and(|s| !s.is_finite() || s <= 0.0) {
        bail!("--stop-time must be a positive number of seconds");
    }
    let base = SimulationConfig {
        simulation_name: args.name,
        number_of_clients: args.number_of_clients,
        log_dir: args.log_dir,
        video_dir: args.video_dir,
        bottleneck_rate: args.bottleneck_rate,
        bottleneck_delay_us: args.bottleneck_delay_us,
        channel_delay_us: args.channel_delay_us,
        chunk_bytes: args.chunk_bytes,
        live_inputs: args.live_inputs,
        stop_time_us: args.stop_time_s.map(secs_to_us),
        json_metrics: args.json_metrics,
        ..Default::default()
    };

    let mut handles = Vec::with_capacity(args.simulation_ids.len());
    for id in args.simulation_ids {
        let config = SimulationConfig {
            simulation_id: id,
            ..base.clone()
        };
        handles.push((
            id,
            tokio::task::spawn_blocking(move || dash_sim::run_simulation(&config)),
        ));
    }

    let mut failed = 0;
    for (id, handle) in handles {
        match handle.await.context("simulation task panicked")? {
            Ok(summary) => info!(
                "simulation {id} done at {:.3}s ({:?}): {} underruns, {} aborted clients",
                summary.ended_at_s,
                summary.stop_reason,
                summary.total_underruns(),
                summary.aborted_clients()
            ),
            Err(e) => {
                error!("simulation {id} failed: {e:#}");
                failed += 1;
            }
        }
    }
    if failed > 0 {
        bail!("{failed} simulation(s) failed");
    }
    Ok(())
}

fn write_scenario(args: ScenarioArgs) -> Result<()> {
    if args.min_rate_kbit > args.max_rate_kbit {
        bail!("--min-kbit must not exceed --max-kbit");
    }
    let frames = Scenario::new(ScenarioConfig {
        seed: args.seed,
        duration: Duration::from_secs(args.duration),
        step: Duration::from_secs(args.step),
        min_rate_kbit: args.min_rate_kbit,
        max_rate_kbit: args.max_rate_kbit,
        rate_step_kbit: args.rate_step_kbit,
    })
    .frames();
    let text = render_schedule(&frames);
    match args.output {
        Some(path) => std::fs::write(&path, text)
            .with_context(|| format!("write schedule to {}", path.display()))?,
        None => print!("{text}"),
    }
    Ok(())
}
