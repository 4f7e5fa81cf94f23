//! BGT60 register configurator
//!
//! Compiles a single-shape FMCW configuration for one Avian sensor and emits
//! the C header the XENSIV BGT60TRxx firmware driver consumes.
//!
//! Usage:
//!   bgt60-configurator-cli --device BGT60TR13C --config radar.json --output radar_settings.h

use anyhow::Context;
use clap::Parser;
use mmradar_rs::header;
use mmradar_rs::profile::avian::AvianVariant;
use mmradar_rs::FmcwSingleShapeFile;
use std::path::{Path, PathBuf};
use std::process;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Register list exporter for BGT60 radar sensors
#[derive(Parser)]
#[command(name = "bgt60-configurator-cli", version, about = "Compile a radar configuration into a C header")]
struct Cli {
    /// Sensor the configuration is compiled for
    #[arg(long, short, default_value = "BGT60TR13C")]
    device: String,

    /// JSON file with a `device_config.fmcw_single_shape` section
    #[arg(long, short)]
    config: PathBuf,

    /// Header to write; stdout when absent
    #[arg(long, short)]
    output: Option<PathBuf>,

    /// Also write the log to this file
    #[arg(long)]
    log_file: Option<PathBuf>,
}

fn init_logging(log_file: Option<&Path>) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn,mmradar_rs=info"));
    let console = tracing_subscriber::fmt::layer().with_writer(std::io::stderr).with_filter(filter());

    match log_file {
        Some(path) => {
            let file = std::fs::File::create(path).with_context(|| format!("cannot create log file {}", path.display()))?;
            let (writer, guard) = tracing_appender::non_blocking(file);
            tracing_subscriber::registry()
                .with(console)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(writer)
                        .with_filter(filter()),
                )
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::registry().with(console).init();
            Ok(None)
        }
    }
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    let variant: AvianVariant = cli
        .device
        .parse()
        .with_context(|| format!("unknown device {:?}", cli.device))?;

    let file = FmcwSingleShapeFile::load(&cli.config)
        .with_context(|| format!("cannot load configuration {}", cli.config.display()))?;
    let config = file.to_simple_config()?;
    tracing::info!(
        "Compiling {} chirps of {} samples for {}",
        config.num_chirps,
        config.chirp.num_samples,
        variant
    );
    let text = header::export(variant, &config)?;

    match &cli.output {
        Some(path) => {
            let content = format!("{}\n\n{}", header::banner(chrono::Local::now()), text);
            std::fs::write(path, content).with_context(|| format!("cannot write {}", path.display()))?;
            tracing::info!("Header written to {}", path.display());
        }
        None => print!("{}", text),
    }
    Ok(())
}

fn main() {
    let cli = Cli::parse();

    let guard = match init_logging(cli.log_file.as_deref()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            process::exit(1);
        }
    };

    if let Err(e) = run(&cli) {
        tracing::error!("{:#}", e);
        eprintln!("Error: {:#}", e);
        drop(guard);
        process::exit(1);
    }
    drop(guard);
}
