//! Fusion service binary.

use std::path::PathBuf;

use clap::Parser;

use rover_services::lineproto::{self, LineService};
use rover_services::ports;
use rover_services::services::{FusionConfig, FusionService};

#[derive(Parser, Debug)]
#[command(name = "rover-fusion", about = "Sensor fusion service of the rover stack")]
struct Cli {
    /// Line-protocol and ingest port to listen on.
    #[arg(long, default_value_t = ports::FUSION)]
    port: u16,

    /// Directory for per-run solution CSV logs.
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Heading-offset estimator window size.
    #[arg(long, default_value_t = 20)]
    window: usize,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let service = FusionService::new(FusionConfig {
        log_dir: cli.log_dir,
        window: cli.window,
    });
    // Fusion has no device to wait for: it runs from the start.
    service.start_cmd();

    lineproto::serve(cli.port, service)?;
    Ok(())
}
