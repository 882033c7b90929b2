//! GNSS service: owns the UBX receiver, publishes navigation records and
//! injects wheel ticks and RTK corrections.

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use log::{info, warn};
use serde::Serialize;

use rover_core::dispatch::{DispatchKey, Dispatcher, DispatcherHandle};
use rover_core::link::{SerialConfig, SerialLink};
use rover_proto::ubx::{self, EsfRaw, NavPvat};
use rover_proto::UbxParser;

use crate::handlers::{latest_slot, EsfRawHandler, Latest, NavPvatHandler};
use crate::lineproto::{ClientConn, LineService, Verdict};
use crate::net::{FusionTx, Publisher};
use crate::runlog::RunLog;

#[derive(Debug, Clone)]
pub struct GnssConfig {
    pub device: String,
    pub baud: u32,
    pub fusion_addr: SocketAddr,
    /// Raw RX capture for offline replay.
    pub capture_path: Option<PathBuf>,
    /// Directory for the per-run NAV-PVAT CSV; `None` disables logging.
    pub log_dir: Option<PathBuf>,
    /// Forward each NAV-PVAT-derived record to the fusion service.
    pub forward_to_fusion: bool,
}

struct LinkBundle {
    link: SerialLink,
    dispatcher: DispatcherHandle,
}

pub struct GnssService {
    cfg: GnssConfig,
    bundle: Mutex<Option<LinkBundle>>,
    latest_pvat: Latest<NavPvat>,
    latest_esf: Latest<EsfRaw>,
    publisher: Arc<Publisher>,
    fusion: Arc<FusionTx>,
}

impl GnssService {
    pub fn new(cfg: GnssConfig) -> Arc<Self> {
        let fusion = Arc::new(FusionTx::new(cfg.fusion_addr));
        Arc::new(Self {
            cfg,
            bundle: Mutex::new(None),
            latest_pvat: latest_slot(),
            latest_esf: latest_slot(),
            publisher: Arc::new(Publisher::new()),
            fusion,
        })
    }

    pub fn publisher(&self) -> Arc<Publisher> {
        Arc::clone(&self.publisher)
    }

    fn open(&self) -> LinkBundle {
        let mut serial = SerialConfig::new(self.cfg.device.clone(), self.cfg.baud);
        serial.capture_path = self.cfg.capture_path.clone();
        let (link, rx) = SerialLink::start(serial, UbxParser::default());

        let pvat_log = self.cfg.log_dir.as_ref().and_then(|dir| {
            RunLog::create(dir, "nav-pvat", &NavPvatHandler::LOG_HEADER)
                .map_err(|err| warn!("gnss: nav-pvat log disabled: {err}"))
                .ok()
        });

        let mut dispatcher = Dispatcher::new();
        let fusion = self.cfg.forward_to_fusion.then(|| Arc::clone(&self.fusion));
        dispatcher.register(
            DispatchKey::Ubx(ubx::CLS_NAV, ubx::ID_NAV_PVAT),
            Box::new(NavPvatHandler::new(
                Arc::clone(&self.latest_pvat),
                Arc::clone(&self.publisher),
                fusion,
                pvat_log,
            )),
        );
        dispatcher.register(
            DispatchKey::Ubx(ubx::CLS_ESF, ubx::ID_ESF_RAW),
            Box::new(EsfRawHandler::new(Arc::clone(&self.latest_esf))),
        );

        LinkBundle {
            dispatcher: dispatcher.start(rx),
            link,
        }
    }

    fn send_ubx(&self, frame: Vec<u8>) -> Result<(), String> {
        let bundle = self.bundle.lock().unwrap();
        match bundle.as_ref() {
            Some(bundle) => {
                if bundle.link.send_frame(frame) {
                    Ok(())
                } else {
                    Err("TX_OVERFLOW".to_string())
                }
            },
            None => Err("NOT_RUNNING, use START first".to_string()),
        }
    }

    /// `ODO <hex time_tag> <hex left_ticks> <dir> <hex right_ticks> <dir>`
    fn build_odo(args: &str) -> Result<Vec<u8>, String> {
        let fields: Vec<&str> = args.split_whitespace().collect();
        if fields.len() != 5 {
            return Err("ODO expects <time_tag> <left> <left_dir> <right> <right_dir>".into());
        }
        let time_tag = u32::from_str_radix(fields[0], 16).map_err(|e| format!("time_tag: {e}"))?;
        let left = u32::from_str_radix(fields[1], 16).map_err(|e| format!("left_ticks: {e}"))?;
        let left_dir: u8 = fields[2]
            .parse()
            .map_err(|_| "left_dir must be 0/1".to_string())?;
        let right = u32::from_str_radix(fields[3], 16).map_err(|e| format!("right_ticks: {e}"))?;
        let right_dir: u8 = fields[4]
            .parse()
            .map_err(|_| "right_dir must be 0/1".to_string())?;
        Ok(ubx::esf_meas_wheel_ticks(
            time_tag,
            left,
            left_dir != 0,
            right,
            right_dir != 0,
        ))
    }

    /// `PERFECT <hex...>` or `PERFECT b64:<base64>`: raw correction bytes
    /// passed through to the receiver.
    fn build_perfect(args: &str) -> Result<Vec<u8>, String> {
        let args = args.trim();
        if args.is_empty() {
            return Err("PERFECT expects a payload".into());
        }
        if let Some(b64) = args.strip_prefix("b64:") {
            BASE64.decode(b64).map_err(|e| format!("base64: {e}"))
        } else {
            hex::decode(args).map_err(|e| format!("hex: {e}"))
        }
    }
}

#[derive(Serialize)]
struct GnssState {
    service: &'static str,
    status: &'static str,
    device: String,
    rx_frames: u64,
    rx_bytes: u64,
    rx_overflows: u64,
    open_failures: u64,
    checksum_errors: u64,
    junk: u64,
    dispatched: u64,
    unhandled: u64,
    handler_errors: u64,
    has_pvat: bool,
    has_esf_raw: bool,
}

impl LineService for GnssService {
    fn name(&self) -> &'static str {
        "GNSS"
    }

    fn start_cmd(&self) -> String {
        let mut bundle = self.bundle.lock().unwrap();
        if bundle.is_some() {
            return "ALREADY_RUNNING".into();
        }
        *bundle = Some(self.open());
        info!("gnss: started on {}", self.cfg.device);
        "OK".into()
    }

    fn stop_cmd(&self) -> String {
        let mut bundle = self.bundle.lock().unwrap();
        match bundle.take() {
            Some(mut running) => {
                running.dispatcher.stop();
                running.link.stop();
                info!("gnss: stopped");
                "OK".into()
            },
            None => "NOT_RUNNING".into(),
        }
    }

    fn state_json(&self) -> String {
        let bundle = self.bundle.lock().unwrap();
        let (status, link_stats, dispatch_stats) = match bundle.as_ref() {
            Some(bundle) => ("RUNNING", bundle.link.stats(), bundle.dispatcher.stats()),
            None => ("STOPPED", Default::default(), Default::default()),
        };
        let state = GnssState {
            service: "GNSS",
            status,
            device: self.cfg.device.clone(),
            rx_frames: link_stats.rx_frames,
            rx_bytes: link_stats.rx_bytes,
            rx_overflows: link_stats.rx_overflows,
            open_failures: link_stats.open_failures,
            checksum_errors: link_stats.parser.checksum_errors,
            junk: link_stats.parser.junk,
            dispatched: dispatch_stats.processed,
            unhandled: dispatch_stats.unhandled,
            handler_errors: dispatch_stats.handler_errors,
            has_pvat: self.latest_pvat.lock().unwrap().is_some(),
            has_esf_raw: self.latest_esf.lock().unwrap().is_some(),
        };
        serde_json::to_string(&state).unwrap_or_else(|_| "{}".into())
    }

    fn command(&self, verb: &str, args: &str, conn: &mut ClientConn) -> io::Result<Verdict> {
        match verb {
            "GET_BINARY_STREAM" => {
                conn.write_line("STREAM_READY")?;
                let result = self.publisher.stream_to(conn.stream());
                if let Err(err) = result {
                    info!("gnss: stream client left: {err}");
                }
                Ok(Verdict::Close)
            },
            "ODO" => match Self::build_odo(args).and_then(|frame| self.send_ubx(frame)) {
                Ok(()) => Ok(Verdict::Reply("OK".into())),
                Err(reason) => Ok(Verdict::Reply(format!("ERR {reason}"))),
            },
            "PERFECT" => match Self::build_perfect(args).and_then(|raw| self.send_ubx(raw)) {
                Ok(()) => Ok(Verdict::Reply("OK".into())),
                Err(reason) => Ok(Verdict::Reply(format!("ERR {reason}"))),
            },
            _ => Ok(Verdict::Reply("ERR UNKNOWN_COMMAND".into())),
        }
    }

    fn on_exit(&self) {
        let _ = self.stop_cmd();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn odo_command_builds_wheel_tick_frame() {
        let frame = GnssService::build_odo("19BA73A4 11E1 0 13DF 1").unwrap();
        let (class, id, payload) = ubx::split(&frame).unwrap();
        assert_eq!((class, id), (ubx::CLS_ESF, ubx::ID_ESF_MEAS));
        assert_eq!(payload.len(), 16);
        assert!(GnssService::build_odo("xx 11E1 0 13DF 1").is_err());
        assert!(GnssService::build_odo("19BA73A4 11E1 0").is_err());
    }

    #[test]
    fn perfect_command_accepts_hex_and_base64() {
        assert_eq!(GnssService::build_perfect("b562"), Ok(vec![0xB5, 0x62]));
        assert_eq!(
            GnssService::build_perfect("b64:YWFh"),
            Ok(b"aaa".to_vec())
        );
        assert!(GnssService::build_perfect("zz").is_err());
        assert!(GnssService::build_perfect("").is_err());
    }
}
