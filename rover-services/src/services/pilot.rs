//! Pilot service: accepts navigation tasks and runs the waypoint navigator
//! against the fused solution stream and the drive service.

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use log::{info, warn};
use serde::Serialize;

use rover_core::navigator::{Goal, NavOutcome, Navigator, NavigatorConfig, SolutionSource};

use crate::lineproto::{split_args, ClientConn, LineService, Verdict};
use crate::net::{DriveClient, SolutionClient};
use crate::pointfile;

#[derive(Debug, Clone)]
pub struct PilotConfig {
    pub fusion_addr: SocketAddr,
    pub drive_addr: SocketAddr,
    pub navigator: NavigatorConfig,
    /// Goal persistence file, single line `lat lon radius`.
    pub point_path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PilotStatus {
    Idle,
    Running,
    GoalReached,
    GoalNotReached,
    Error,
}

impl PilotStatus {
    fn as_str(self) -> &'static str {
        match self {
            PilotStatus::Idle => "IDLE",
            PilotStatus::Running => "RUNNING",
            PilotStatus::GoalReached => "GOAL_REACHED",
            PilotStatus::GoalNotReached => "GOAL_NOT_REACHED",
            PilotStatus::Error => "ERROR",
        }
    }
}

struct NavTask {
    stop: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

pub struct PilotService {
    cfg: PilotConfig,
    solution: Arc<SolutionClient>,
    status: Arc<Mutex<PilotStatus>>,
    task: Mutex<Option<NavTask>>,
}

impl PilotService {
    pub fn new(cfg: PilotConfig) -> Arc<Self> {
        let solution = SolutionClient::spawn(cfg.fusion_addr);
        Arc::new(Self {
            cfg,
            solution,
            status: Arc::new(Mutex::new(PilotStatus::Idle)),
            task: Mutex::new(None),
        })
    }

    fn navigate(&self, goal: Goal) -> String {
        let mut task = self.task.lock().unwrap();
        if task.as_ref().is_some_and(|t| !t.thread.is_finished()) {
            return "ERR ALREADY_NAVIGATING".into();
        }
        *task = None;

        if let Err(err) =
            pointfile::write_point(&self.cfg.point_path, goal.goal.0, goal.goal.1, goal.radius_m)
        {
            warn!("pilot: point file not updated: {err}");
        }

        let navigator = match Navigator::new(
            self.cfg.navigator,
            goal,
            Arc::clone(&self.solution),
            DriveClient::new(self.cfg.drive_addr),
        ) {
            Ok(navigator) => navigator,
            Err(err) => {
                *self.status.lock().unwrap() = PilotStatus::Error;
                return format!("ERR {err}");
            },
        };

        let stop = Arc::new(AtomicBool::new(false));
        let nav_stop = Arc::clone(&stop);
        let status = Arc::clone(&self.status);
        let thread = match std::thread::Builder::new()
            .name("navigator".into())
            .spawn(move || {
                let outcome = navigator.run(nav_stop);
                *status.lock().unwrap() = match outcome {
                    NavOutcome::GoalReached => PilotStatus::GoalReached,
                    NavOutcome::GoalNotReached => PilotStatus::GoalNotReached,
                    NavOutcome::Stopped => PilotStatus::Idle,
                };
            }) {
            Ok(thread) => thread,
            Err(err) => {
                *self.status.lock().unwrap() = PilotStatus::Error;
                return format!("ERR SPAWN {err}");
            },
        };

        *task = Some(NavTask { stop, thread });
        *self.status.lock().unwrap() = PilotStatus::Running;
        info!(
            "pilot: navigating to ({:.7}, {:.7}), radius {} m",
            goal.goal.0, goal.goal.1, goal.radius_m
        );
        "OK".into()
    }

    fn stop_navigation(&self) -> bool {
        let mut task = self.task.lock().unwrap();
        match task.take() {
            Some(task) => {
                task.stop.store(true, Ordering::SeqCst);
                let _ = task.thread.join();
                true
            },
            None => false,
        }
    }

    /// `NAVIGATE <start_lat> <start_lon> <goal_lat> <goal_lon> <radius>`, or
    /// `NAVIGATE POINT` to reuse the persisted goal with the current
    /// position as start.
    fn parse_goal(&self, args: &str) -> Result<Goal, String> {
        if args.trim() == "POINT" {
            let (lat, lon, radius_m) = pointfile::read_point(&self.cfg.point_path)
                .map_err(|err| format!("POINT: {err}"))?;
            let snapshot = self
                .solution
                .latest()
                .ok_or_else(|| "NO_SOLUTION for start position".to_string())?;
            return Ok(Goal {
                start: (snapshot.record.lat, snapshot.record.lon),
                goal: (lat, lon),
                radius_m,
            });
        }

        let fields =
            split_args(args, 5).ok_or_else(|| "NAVIGATE expects 5 arguments".to_string())?;
        let mut values = [0f64; 5];
        for (value, field) in values.iter_mut().zip(&fields) {
            *value = field
                .parse()
                .map_err(|_| format!("not a number: {field}"))?;
        }
        let radius_m = values[4];
        if radius_m <= 0.0 {
            return Err("radius must be positive".into());
        }
        Ok(Goal {
            start: (values[0], values[1]),
            goal: (values[2], values[3]),
            radius_m,
        })
    }
}

#[derive(Serialize)]
struct PilotState {
    service: &'static str,
    status: &'static str,
    has_solution: bool,
}

impl LineService for PilotService {
    fn name(&self) -> &'static str {
        "PILOT"
    }

    fn start_cmd(&self) -> String {
        // The solution client runs from construction; navigation itself
        // starts with NAVIGATE.
        "OK".into()
    }

    fn stop_cmd(&self) -> String {
        if self.stop_navigation() {
            *self.status.lock().unwrap() = PilotStatus::Idle;
            "OK".into()
        } else {
            "NOT_RUNNING".into()
        }
    }

    fn state_json(&self) -> String {
        let state = PilotState {
            service: "PILOT",
            status: self.status.lock().unwrap().as_str(),
            has_solution: SolutionClient::latest(&self.solution).is_some(),
        };
        serde_json::to_string(&state).unwrap_or_else(|_| "{}".into())
    }

    fn command(&self, verb: &str, args: &str, _conn: &mut ClientConn) -> io::Result<Verdict> {
        let reply = match verb {
            "NAVIGATE" => match self.parse_goal(args) {
                Ok(goal) => self.navigate(goal),
                Err(reason) => format!("ERR {reason}"),
            },
            "STATUS" => self.status.lock().unwrap().as_str().to_string(),
            _ => "ERR UNKNOWN_COMMAND".into(),
        };
        Ok(Verdict::Reply(reply))
    }

    fn on_exit(&self) {
        self.stop_navigation();
    }
}
