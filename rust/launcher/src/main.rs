// rust/launcher/src/main.rs

//! Distributed Training Launch CLI
//!
//! Runs the start-up steps of a training process from the command line, so a
//! job script can warm the download cache or check a node's topology and
//! devices before the real training entry point starts.
//!
//! # Usage
//!
//! ```bash
//! # Download a file into the shared cache (safe to run on every rank)
//! dtr-launch fetch https://example.com/words.txt words.txt
//!
//! # Show the topology this process would join
//! RANK=1 LOCAL_RANK=1 WORLD_SIZE=2 dtr-launch topology
//!
//! # Initialize compute, join the group and tear it down again
//! dtr-launch --config launch.toml init --device cuda
//! ```

use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use launch_core::compute::{autodetect_device, DeviceKind, HostDevices};
use launch_core::config::DeviceSelection;
use launch_core::{Bootstrap, Console, EnvironmentView, LaunchConfig, MetricsSink, NoopMetrics};

const TAG: &str = "launch";

/// Distributed Training Launch
#[derive(Parser, Debug)]
#[command(name = "dtr-launch")]
#[command(about = "Start-up scaffolding for distributed training processes")]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Download URL into the cache as FILENAME, once across all ranks
    Fetch { url: String, filename: String },

    /// Print the resolved distributed topology
    Topology,

    /// Initialize compute on a device and tear it down again
    Init {
        /// Device to use (auto, cuda, mps, cpu). Defaults to compute.device
        #[arg(short, long)]
        device: Option<String>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => LaunchConfig::from_file(path)?,
        None => LaunchConfig::default(),
    }
    .with_env_overrides();
    let console = Console::stdio(&config.console);

    // Initialize logging
    let filter = tracing_subscriber::filter::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::filter::EnvFilter::new(&args.log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(console.stderr_style().has_color()),
        )
        .init();

    let bootstrap = Bootstrap::from_parts(config, EnvironmentView::from_process(), console)?;

    match args.command {
        Command::Fetch { url, filename } => {
            let path = bootstrap.download(&url, &filename)?;
            println!("{}", path.display());
        }
        Command::Topology => {
            print!("{}", toml::to_string(&bootstrap.topology())?);
        }
        Command::Init { device } => run_init(&bootstrap, device.as_deref())?,
    }

    Ok(())
}

fn run_init(bootstrap: &Bootstrap, device: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
    let console = bootstrap.console();
    console.banner();

    let selection = match device {
        Some(s) => s.parse::<DeviceSelection>()?,
        None => bootstrap.config().compute.device,
    };

    let devices = Arc::new(HostDevices::new(bootstrap.env().clone()));
    let kind = match selection {
        DeviceSelection::Auto => autodetect_device(devices.as_ref(), console),
        explicit => explicit.as_str().parse::<DeviceKind>()?,
    };

    let group = Arc::new(bootstrap.file_store_group());
    let compute = bootstrap.compute(devices, group);

    let mut handle = compute.initialize_kind(kind)?;
    console.success(
        TAG,
        &format!(
            "Rank {}/{} initialized on {}",
            handle.topology().rank,
            handle.topology().world_size,
            handle.device()
        ),
    );

    let mut metrics = NoopMetrics::new();
    metrics.log(None, &[("world_size", handle.topology().world_size as f64)]);
    metrics.finish();

    compute.cleanup(&mut handle)?;
    tracing::info!(comm = ?handle.comm(), "compute released");
    Ok(())
}
