//! Drive service binary.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use rover_core::acknack::AckConfig;
use rover_services::lineproto;
use rover_services::ports;
use rover_services::services::{DriveConfig, DriveService};

#[derive(Parser, Debug)]
#[command(name = "rover-drive", about = "Motor controller service of the rover stack")]
struct Cli {
    /// Serial device of the motor controller.
    #[arg(long, default_value = "/dev/hoverboard")]
    device: String,

    #[arg(long, default_value_t = 921_600)]
    baud: u32,

    /// Line-protocol port to listen on.
    #[arg(long, default_value_t = ports::DRIVE)]
    port: u16,

    /// Fusion ingest address.
    #[arg(long, default_value_t = format!("127.0.0.1:{}", ports::FUSION))]
    fusion: String,

    /// Directory for per-run odometry CSV logs.
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Minimum spacing between command frames [ms].
    #[arg(long, default_value_t = 10)]
    min_interval_ms: u64,

    /// Per-attempt acknowledgement timeout [ms].
    #[arg(long, default_value_t = 20)]
    ack_timeout_ms: u64,

    /// Retries on quality NACK or timeout.
    #[arg(long, default_value_t = 2)]
    retries: u32,

    /// Open the serial link immediately instead of waiting for START.
    #[arg(long)]
    autostart: bool,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let fusion_addr: SocketAddr = cli.fusion.parse()?;
    let service = DriveService::new(DriveConfig {
        device: cli.device,
        baud: cli.baud,
        fusion_addr,
        log_dir: cli.log_dir,
        ack: AckConfig {
            min_interval: Duration::from_millis(cli.min_interval_ms),
            ack_timeout: Duration::from_millis(cli.ack_timeout_ms),
            retries: cli.retries,
        },
    });

    if cli.autostart {
        use rover_services::lineproto::LineService;
        service.start_cmd();
    }

    lineproto::serve(cli.port, service)?;
    Ok(())
}
