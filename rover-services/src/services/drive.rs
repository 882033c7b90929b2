//! Drive service: owns the motor controller, turns text commands into
//! acknowledged binary command frames and forwards odometry to fusion.

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use log::{info, warn};
use serde::Serialize;

use rover_core::acknack::{AckConfig, AckNack, AckOutcome};
use rover_core::dispatch::{DispatchKey, Dispatcher, DispatcherHandle};
use rover_core::link::{SerialConfig, SerialLink};
use rover_proto::motor::{self, Odm};
use rover_proto::{MotorParser, ParamError};

use crate::handlers::{latest_slot, Latest, OdmHandler};
use crate::lineproto::{ClientConn, LineService, Verdict};
use crate::net::FusionTx;
use crate::runlog::RunLog;

#[derive(Debug, Clone)]
pub struct DriveConfig {
    pub device: String,
    pub baud: u32,
    pub fusion_addr: SocketAddr,
    /// Directory for the per-run odometry CSV; `None` disables logging.
    pub log_dir: Option<PathBuf>,
    pub ack: AckConfig,
}

struct LinkBundle {
    link: SerialLink,
    dispatcher: DispatcherHandle,
}

pub struct DriveService {
    cfg: DriveConfig,
    bundle: Mutex<Option<LinkBundle>>,
    acknack: AckNack,
    latest_odm: Latest<Odm>,
    fusion: Arc<FusionTx>,
    epoch: Instant,
}

impl DriveService {
    pub fn new(cfg: DriveConfig) -> Arc<Self> {
        let fusion = Arc::new(FusionTx::new(cfg.fusion_addr));
        let acknack = AckNack::new(cfg.ack);
        Arc::new(Self {
            cfg,
            bundle: Mutex::new(None),
            acknack,
            latest_odm: latest_slot(),
            fusion,
            epoch: Instant::now(),
        })
    }

    fn open(&self) -> LinkBundle {
        let serial = SerialConfig::new(self.cfg.device.clone(), self.cfg.baud);
        let (link, rx) = SerialLink::start(serial, MotorParser::new());

        let odm_log = self.cfg.log_dir.as_ref().and_then(|dir| {
            RunLog::create(dir, "odm", &OdmHandler::LOG_HEADER)
                .map_err(|err| warn!("drive: odometry log disabled: {err}"))
                .ok()
        });

        let mut dispatcher = Dispatcher::new();
        dispatcher.register(DispatchKey::ascii("IAM"), self.acknack.reply_handler());
        dispatcher.register(DispatchKey::ascii("INM"), self.acknack.reply_handler());
        dispatcher.register(
            DispatchKey::ascii("ODM"),
            Box::new(OdmHandler::new(
                Arc::clone(&self.latest_odm),
                Arc::clone(&self.fusion),
                odm_log,
            )),
        );

        LinkBundle {
            dispatcher: dispatcher.start(rx),
            link,
        }
    }

    /// Sends a command through the stop-and-wait matcher and renders the
    /// outcome as a protocol response.
    fn send_cmd(&self, cmd: u8, p1: u8, p2: u8, p3: u8, p4: u8) -> String {
        let bundle = self.bundle.lock().unwrap();
        let Some(bundle) = bundle.as_ref() else {
            return "ERR NOT_RUNNING, use START first".into();
        };
        match self.acknack.send_and_wait(&bundle.link, cmd, p1, p2, p3, p4) {
            Ok(outcome) => render_outcome(&outcome),
            Err(err) => format!("ERR PARAM {err}"),
        }
    }

    fn pwm(&self, left: i32, right: i32) -> Result<String, ParamError> {
        let (p1, p2) = motor::encode_pwm(left)?;
        let (p3, p4) = motor::encode_pwm(right)?;
        Ok(self.send_cmd(motor::CMD_PWM, p1, p2, p3, p4))
    }

    fn drive(&self, max_pwm: i32, left_speed: i32, right_speed: i32) -> Result<String, ParamError> {
        let (p1, p2) = motor::encode_pwm(max_pwm)?;
        let p3 = motor::encode_speed(left_speed)?;
        let p4 = motor::encode_speed(right_speed)?;
        Ok(self.send_cmd(motor::CMD_DRIVE, p1, p2, p3, p4))
    }

    /// Round-trip probe: the send time goes out base-251 encoded in the
    /// parameters and comes back in the echo.
    fn rtt_probe(&self) -> String {
        let now_us = (self.epoch.elapsed().as_micros() & 0xFFFF_FFFF) as u32;
        let [p1, p2, p3, p4] = motor::base251_encode(now_us);
        let response = self.send_cmd(motor::CMD_ECHO_TEST, p1, p2, p3, p4);
        if response == "OK" {
            let elapsed_us = ((self.epoch.elapsed().as_micros() & 0xFFFF_FFFF) as u32)
                .wrapping_sub(now_us);
            format!("OK rtt_us={elapsed_us}")
        } else {
            response
        }
    }
}

fn render_outcome(outcome: &AckOutcome) -> String {
    if outcome.ok {
        "OK".into()
    } else if outcome.is_timeout {
        format!("ERR TIMEOUT retries={}", outcome.retries_done)
    } else if outcome.cmd_err != 0 {
        format!("ERR CMD_ERR {}", outcome.cmd_err)
    } else if outcome.input_err != 0 {
        format!(
            "ERR INPUT_ERR {} retries={}",
            outcome.input_err, outcome.retries_done
        )
    } else {
        "ERR TX_FAILED".into()
    }
}

fn parse_int(field: &str) -> Result<i32, String> {
    field
        .parse()
        .map_err(|_| format!("not an integer: {field}"))
}

#[derive(Serialize)]
struct DriveState {
    service: &'static str,
    status: &'static str,
    device: String,
    rx_frames: u64,
    tx_frames: u64,
    rx_overflows: u64,
    tx_overflows: u64,
    checksum_errors: u64,
    bad_char: u64,
    junk: u64,
    dispatched: u64,
    handler_errors: u64,
    has_odm: bool,
}

impl LineService for DriveService {
    fn name(&self) -> &'static str {
        "DRIVE"
    }

    fn start_cmd(&self) -> String {
        {
            let mut bundle = self.bundle.lock().unwrap();
            if bundle.is_some() {
                return "ALREADY_RUNNING".into();
            }
            *bundle = Some(self.open());
        }
        // Firmware expects an explicit motor start after power-up.
        let response = self.send_cmd(motor::CMD_MOTORS_START, 125, 125, 125, 125);
        if response != "OK" {
            warn!("drive: motor start not confirmed: {response}");
        }
        info!("drive: started on {}", self.cfg.device);
        "OK".into()
    }

    fn stop_cmd(&self) -> String {
        {
            let bundle = self.bundle.lock().unwrap();
            if bundle.is_none() {
                return "NOT_RUNNING".into();
            }
        }
        let response = self.send_cmd(motor::CMD_MOTORS_STOP, 125, 125, 125, 125);
        if response != "OK" {
            warn!("drive: motor stop not confirmed: {response}");
        }
        let mut bundle = self.bundle.lock().unwrap();
        if let Some(mut running) = bundle.take() {
            running.dispatcher.stop();
            running.link.stop();
        }
        info!("drive: stopped");
        "OK".into()
    }

    fn state_json(&self) -> String {
        let bundle = self.bundle.lock().unwrap();
        let (status, link_stats, dispatch_stats) = match bundle.as_ref() {
            Some(bundle) => ("RUNNING", bundle.link.stats(), bundle.dispatcher.stats()),
            None => ("STOPPED", Default::default(), Default::default()),
        };
        let state = DriveState {
            service: "DRIVE",
            status,
            device: self.cfg.device.clone(),
            rx_frames: link_stats.rx_frames,
            tx_frames: link_stats.tx_frames,
            rx_overflows: link_stats.rx_overflows,
            tx_overflows: link_stats.tx_overflows,
            checksum_errors: link_stats.parser.checksum_errors,
            bad_char: link_stats.parser.bad_char,
            junk: link_stats.parser.junk,
            dispatched: dispatch_stats.processed,
            handler_errors: dispatch_stats.handler_errors,
            has_odm: self.latest_odm.lock().unwrap().is_some(),
        };
        serde_json::to_string(&state).unwrap_or_else(|_| "{}".into())
    }

    fn command(&self, verb: &str, args: &str, _conn: &mut ClientConn) -> io::Result<Verdict> {
        let reply = match verb {
            "PWM" => {
                let fields: Vec<&str> = args.split_whitespace().collect();
                match fields.as_slice() {
                    [left, right] => match (parse_int(left), parse_int(right)) {
                        (Ok(left), Ok(right)) => self
                            .pwm(left, right)
                            .unwrap_or_else(|err| format!("ERR PARAM {err}")),
                        (Err(reason), _) | (_, Err(reason)) => format!("ERR {reason}"),
                    },
                    _ => "ERR PWM expects <left> <right>".into(),
                }
            },
            "DRIVE" => {
                let fields: Vec<&str> = args.split_whitespace().collect();
                match fields.as_slice() {
                    [max_pwm, left, right] => {
                        match (parse_int(max_pwm), parse_int(left), parse_int(right)) {
                            (Ok(max_pwm), Ok(left), Ok(right)) => self
                                .drive(max_pwm, left, right)
                                .unwrap_or_else(|err| format!("ERR PARAM {err}")),
                            _ => "ERR DRIVE expects three integers".into(),
                        }
                    },
                    _ => "ERR DRIVE expects <max_pwm> <left> <right>".into(),
                }
            },
            "BREAK" => self.send_cmd(motor::CMD_BRAKE, 125, 125, 125, 125),
            "HALT" => self.send_cmd(motor::CMD_HALT, 125, 125, 125, 125),
            "POWER_OFF" => self.send_cmd(motor::CMD_POWER_OFF, 125, 125, 125, 125),
            "RTT" => self.rtt_probe(),
            _ => "ERR UNKNOWN_COMMAND".into(),
        };
        Ok(Verdict::Reply(reply))
    }

    fn on_exit(&self) {
        let _ = self.stop_cmd();
    }
}
