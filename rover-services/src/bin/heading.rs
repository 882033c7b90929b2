//! Heading service binary.

use std::net::SocketAddr;

use clap::Parser;

use rover_services::lineproto;
use rover_services::ports;
use rover_services::services::{HeadingConfig, HeadingService};

#[derive(Parser, Debug)]
#[command(name = "rover-heading", about = "Dual-antenna heading service of the rover stack")]
struct Cli {
    /// Serial device of the Unicore heading receiver.
    #[arg(long, default_value = "/dev/heading")]
    device: String,

    #[arg(long, default_value_t = 921_600)]
    baud: u32,

    /// Line-protocol port to listen on.
    #[arg(long, default_value_t = ports::HEADING)]
    port: u16,

    /// Fusion ingest address.
    #[arg(long, default_value_t = format!("127.0.0.1:{}", ports::FUSION))]
    fusion: String,

    /// Open the serial link immediately instead of waiting for START.
    #[arg(long)]
    autostart: bool,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let fusion_addr: SocketAddr = cli.fusion.parse()?;
    let service = HeadingService::new(HeadingConfig {
        device: cli.device,
        baud: cli.baud,
        fusion_addr,
    });

    if cli.autostart {
        use rover_services::lineproto::LineService;
        service.start_cmd();
    }

    lineproto::serve(cli.port, service)?;
    Ok(())
}
