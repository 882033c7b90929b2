//! Fusion service: ingests labeled sensor payloads over loopback TCP,
//! feeds the fusion core and publishes the navigation solution.
//!
//! Ingest protocol (one label line, then its payload):
//!
//! | label     | payload                                          |
//! |-----------|--------------------------------------------------|
//! | `GNSS`    | 71-byte NavFusion v2 record (binary)             |
//! | `DRIVE`   | `ts,omega,angle,left,right` line                 |
//! | `HEADING` | UNIHEADINGA short form line                      |
//! | `LIDAR`   | 1 byte (accepted, reserved for the safety layer) |
//! | `CAMERA`  | 1 byte (accepted, reserved)                      |

use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use log::{debug, info, warn};
use serde::Serialize;

use rover_core::fusion::{FusionCore, IMU_ANGLE_DIV, IMU_OMEGA_DIV};
use rover_proto::motor::Odm;
use rover_proto::records::NavFusion;
use rover_proto::unicore::UniHeading;

use crate::lineproto::{ClientConn, LineService, Verdict};
use crate::net::Publisher;
use crate::runlog::RunLog;

/// Baseline lengths outside this window mean the heading receiver solved a
/// wrong pair of antennas; such samples are rejected.
const BASELINE_MIN_M: f64 = 0.3;
const BASELINE_MAX_M: f64 = 0.7;

pub const LIDAR_PAYLOAD_LEN: usize = 1;
pub const CAMERA_PAYLOAD_LEN: usize = 1;

#[derive(Debug, Clone)]
pub struct FusionConfig {
    /// Directory for the per-run solution CSV; `None` disables logging.
    pub log_dir: Option<PathBuf>,
    pub window: usize,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            log_dir: None,
            window: rover_core::fusion::DEFAULT_WINDOW,
        }
    }
}

#[derive(Default)]
struct Counters {
    gnss: u64,
    drive: u64,
    heading: u64,
    heading_rejected: u64,
    lidar: u64,
    camera: u64,
    published: u64,
    decode_errors: u64,
}

pub struct FusionService {
    cfg: FusionConfig,
    core: Mutex<Option<FusionCore>>,
    publisher: Arc<Publisher>,
    counters: Mutex<Counters>,
    log: Mutex<Option<RunLog>>,
    epoch: Instant,
}

const LOG_HEADER: [&str; 8] = [
    "ts_mono", "lat", "lon", "h_acc", "heading", "speed", "corr_deg", "corr_quality",
];

impl FusionService {
    pub fn new(cfg: FusionConfig) -> Arc<Self> {
        Arc::new(Self {
            cfg,
            core: Mutex::new(None),
            publisher: Arc::new(Publisher::new()),
            counters: Mutex::new(Counters::default()),
            log: Mutex::new(None),
            epoch: Instant::now(),
        })
    }

    pub fn publisher(&self) -> Arc<Publisher> {
        Arc::clone(&self.publisher)
    }

    fn now(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    fn on_gnss(&self, payload: &[u8]) {
        let record = match NavFusion::from_bytes(payload) {
            Ok(record) => record,
            Err(err) => {
                self.counters.lock().unwrap().decode_errors += 1;
                debug!("fusion: bad GNSS record: {err}");
                return;
            },
        };
        self.counters.lock().unwrap().gnss += 1;
        if let Some(core) = self.core.lock().unwrap().as_mut() {
            core.update_position(record.lat, record.lon, f64::from(record.h_acc));
        }
    }

    fn on_drive(&self, line: &str) {
        let odm = match Odm::from_line(line) {
            Ok(odm) => odm,
            Err(err) => {
                self.counters.lock().unwrap().decode_errors += 1;
                debug!("fusion: bad DRIVE line: {err}");
                return;
            },
        };
        self.counters.lock().unwrap().drive += 1;
        let t = self.now();
        if let Some(core) = self.core.lock().unwrap().as_mut() {
            core.update_wheel_speeds(f64::from(odm.left_mm_s), f64::from(odm.right_mm_s));
            // IMU raw units to degrees; the IMU counts counter-clockwise,
            // navigation headings clockwise.
            let heading_cw = -(f64::from(odm.accum_angle_raw) / IMU_ANGLE_DIV);
            let omega_cw = -(f64::from(odm.gyro_z_raw) / IMU_OMEGA_DIV);
            core.update_local_heading(t, heading_cw, omega_cw);
        }
    }

    fn on_heading(&self, line: &str) {
        let heading = match UniHeading::parse_short(line) {
            Ok(heading) => heading,
            Err(err) => {
                self.counters.lock().unwrap().decode_errors += 1;
                debug!("fusion: bad HEADING line: {err}");
                return;
            },
        };
        if !(BASELINE_MIN_M..=BASELINE_MAX_M).contains(&heading.baseline_len_m) {
            self.counters.lock().unwrap().heading_rejected += 1;
            return;
        }
        self.counters.lock().unwrap().heading += 1;
        let t = self.now();

        let mut core = self.core.lock().unwrap();
        let Some(core) = core.as_mut() else { return };
        core.update_global_heading(t, heading.heading_deg);

        if core.ready() {
            let solution = core.solution(t);
            let (corr, quality) = core.correction();
            publish_solution(self, solution, corr, quality);
        }
    }
}

fn publish_solution(service: &FusionService, solution: NavFusion, corr: f64, quality: f64) {
    service.publisher.publish(solution);
    let mut counters = service.counters.lock().unwrap();
    counters.published += 1;
    let published = counters.published;
    drop(counters);

    if published % 50 == 0 {
        info!(
            "fusion: solution #{published}: heading {:.1} deg (corr {:.1} deg, q {:.2})",
            solution.heading, corr, quality
        );
    }
    if let Some(log) = service.log.lock().unwrap().as_mut() {
        let _ = log.write_row(&[
            format!("{:.3}", solution.ts_mono),
            format!("{:.7}", solution.lat),
            format!("{:.7}", solution.lon),
            format!("{:.3}", solution.h_acc),
            format!("{:.2}", solution.heading),
            format!("{:.3}", solution.speed),
            format!("{corr:.2}"),
            format!("{quality:.3}"),
        ]);
    }
}

#[derive(Serialize)]
struct FusionState {
    service: &'static str,
    status: &'static str,
    ready: bool,
    gnss: u64,
    drive: u64,
    heading: u64,
    heading_rejected: u64,
    lidar: u64,
    camera: u64,
    published: u64,
    decode_errors: u64,
    correction_deg: f64,
    correction_quality: f64,
}

impl LineService for FusionService {
    fn name(&self) -> &'static str {
        "FUSION"
    }

    fn start_cmd(&self) -> String {
        let mut core = self.core.lock().unwrap();
        if core.is_some() {
            return "ALREADY_RUNNING".into();
        }
        *core = Some(FusionCore::new(self.cfg.window));
        if let Some(dir) = &self.cfg.log_dir {
            match RunLog::create(dir, "fusion", &LOG_HEADER) {
                Ok(log) => *self.log.lock().unwrap() = Some(log),
                Err(err) => warn!("fusion: run log disabled: {err}"),
            }
        }
        info!("fusion: started");
        "OK".into()
    }

    fn stop_cmd(&self) -> String {
        let mut core = self.core.lock().unwrap();
        if core.take().is_none() {
            return "NOT_RUNNING".into();
        }
        *self.log.lock().unwrap() = None;
        info!("fusion: stopped");
        "OK".into()
    }

    fn state_json(&self) -> String {
        let core = self.core.lock().unwrap();
        let (status, ready, correction) = match core.as_ref() {
            Some(core) => ("RUNNING", core.ready(), core.correction()),
            None => ("STOPPED", false, (0.0, 0.0)),
        };
        drop(core);
        let counters = self.counters.lock().unwrap();
        let state = FusionState {
            service: "FUSION",
            status,
            ready,
            gnss: counters.gnss,
            drive: counters.drive,
            heading: counters.heading,
            heading_rejected: counters.heading_rejected,
            lidar: counters.lidar,
            camera: counters.camera,
            published: counters.published,
            decode_errors: counters.decode_errors,
            correction_deg: correction.0,
            correction_quality: correction.1,
        };
        serde_json::to_string(&state).unwrap_or_else(|_| "{}".into())
    }

    fn command(&self, verb: &str, _args: &str, conn: &mut ClientConn) -> io::Result<Verdict> {
        match verb {
            // Ingest labels consume their payload even while stopped so the
            // sender's stream framing never slips.
            "GNSS" => {
                let payload = conn.read_exact(NavFusion::SIZE)?;
                self.on_gnss(&payload);
                Ok(Verdict::Handled)
            },
            "DRIVE" => {
                let Some(line) = conn.read_line()? else {
                    return Ok(Verdict::Close);
                };
                self.on_drive(&line);
                Ok(Verdict::Handled)
            },
            "HEADING" => {
                let Some(line) = conn.read_line()? else {
                    return Ok(Verdict::Close);
                };
                self.on_heading(&line);
                Ok(Verdict::Handled)
            },
            "LIDAR" => {
                let _ = conn.read_exact(LIDAR_PAYLOAD_LEN)?;
                self.counters.lock().unwrap().lidar += 1;
                Ok(Verdict::Handled)
            },
            "CAMERA" => {
                let _ = conn.read_exact(CAMERA_PAYLOAD_LEN)?;
                self.counters.lock().unwrap().camera += 1;
                Ok(Verdict::Handled)
            },
            "DATA" => {
                let reply = match self.publisher.latest() {
                    Some(solution) => format!(
                        "{{\"ts_mono\":{:.3},\"lat\":{:.7},\"lon\":{:.7},\"hAcc\":{:.3},\
                         \"heading\":{:.2},\"headingAcc\":{:.2},\"speed\":{:.3}}}",
                        solution.ts_mono,
                        solution.lat,
                        solution.lon,
                        solution.h_acc,
                        solution.heading,
                        solution.heading_acc,
                        solution.speed
                    ),
                    None => "ERR NO_SOLUTION".into(),
                };
                Ok(Verdict::Reply(reply))
            },
            "GET_BINARY_STREAM" => {
                conn.write_line("STREAM_READY")?;
                let result = self.publisher.stream_to(conn.stream());
                if let Err(err) = result {
                    info!("fusion: stream client left: {err}");
                }
                Ok(Verdict::Close)
            },
            _ => Ok(Verdict::Reply("ERR UNKNOWN_COMMAND".into())),
        }
    }
}
