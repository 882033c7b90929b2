//! GNSS service binary.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

use rover_services::lineproto;
use rover_services::ports;
use rover_services::services::{GnssConfig, GnssService};

#[derive(Parser, Debug)]
#[command(name = "rover-gnss", about = "GNSS receiver service of the rover stack")]
struct Cli {
    /// Serial device of the UBX receiver.
    #[arg(long, default_value = "/dev/gnss1")]
    device: String,

    #[arg(long, default_value_t = 921_600)]
    baud: u32,

    /// Line-protocol port to listen on.
    #[arg(long, default_value_t = ports::GNSS)]
    port: u16,

    /// Fusion ingest address.
    #[arg(long, default_value_t = format!("127.0.0.1:{}", ports::FUSION))]
    fusion: String,

    /// Append raw RX bytes to this file for offline replay.
    #[arg(long)]
    capture: Option<PathBuf>,

    /// Directory for per-run NAV-PVAT CSV logs.
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Do not forward navigation records to fusion.
    #[arg(long)]
    no_forward: bool,

    /// Open the serial link immediately instead of waiting for START.
    #[arg(long)]
    autostart: bool,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let fusion_addr: SocketAddr = cli.fusion.parse()?;
    let service = GnssService::new(GnssConfig {
        device: cli.device,
        baud: cli.baud,
        fusion_addr,
        capture_path: cli.capture,
        log_dir: cli.log_dir,
        forward_to_fusion: !cli.no_forward,
    });

    if cli.autostart {
        use rover_services::lineproto::LineService;
        service.start_cmd();
    }

    lineproto::serve(cli.port, service)?;
    Ok(())
}
