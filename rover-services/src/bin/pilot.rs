//! Pilot service binary.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

use rover_core::fsm::FsmConfig;
use rover_core::mixer::MixerConfig;
use rover_core::navigator::NavigatorConfig;
use rover_core::pursuit::PursuitConfig;
use rover_services::lineproto;
use rover_services::ports;
use rover_services::services::{PilotConfig, PilotService};

#[derive(Parser, Debug)]
#[command(name = "rover-pilot", about = "Waypoint navigator service of the rover stack")]
struct Cli {
    /// Line-protocol port to listen on.
    #[arg(long, default_value_t = ports::PILOT)]
    port: u16,

    /// Fusion service address (solution stream).
    #[arg(long, default_value_t = format!("127.0.0.1:{}", ports::FUSION))]
    fusion: String,

    /// Drive service address (PWM commands).
    #[arg(long, default_value_t = format!("127.0.0.1:{}", ports::DRIVE))]
    drive: String,

    /// Pure-pursuit lookahead [m].
    #[arg(long, default_value_t = 1.0)]
    lookahead: f64,

    /// Forward speed limit [m/s].
    #[arg(long, default_value_t = 0.5)]
    max_speed: f64,

    /// Lateral acceleration limit [m/s^2].
    #[arg(long, default_value_t = 0.5)]
    a_y_max: f64,

    /// Wheel track [m].
    #[arg(long, default_value_t = 0.58)]
    track_width: f64,

    /// Goal persistence file.
    #[arg(long, default_value = "point.ini")]
    point_file: PathBuf,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let fusion_addr: SocketAddr = cli.fusion.parse()?;
    let drive_addr: SocketAddr = cli.drive.parse()?;

    let navigator = NavigatorConfig {
        lookahead_m: cli.lookahead,
        fsm: FsmConfig::default(),
        pursuit: PursuitConfig {
            a_y_max: cli.a_y_max,
            lookahead_m: cli.lookahead,
            track_width_m: cli.track_width,
            max_speed_mps: cli.max_speed,
            ..PursuitConfig::default()
        },
        mixer: MixerConfig {
            v_max_mps: cli.max_speed,
            ..MixerConfig::default()
        },
        ..NavigatorConfig::default()
    };

    let service = PilotService::new(PilotConfig {
        fusion_addr,
        drive_addr,
        navigator,
        point_path: cli.point_file,
    });

    lineproto::serve(cli.port, service)?;
    Ok(())
}
