//! The navigator loop: fused solution in, PWM out.
//!
//! Runs on its own thread at a fixed period. Each cycle takes a snapshot of
//! the latest navigation solution, recomputes the near point, advances the
//! FSM and turns the resulting permission set into a wheel command through
//! the pure-pursuit planner and the PWM mixer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use rover_proto::records::NavFusion;

use crate::angles::diff_deg;
use crate::fsm::{FsmConfig, NavState, NavigatorFsm, Quality};
use crate::mixer::{Mixer, MixerConfig};
use crate::near::{NearCase, NearLine, NearState};
use crate::pursuit::{PurePursuit, PursuitConfig};

/// A navigation solution together with the moment it was received.
#[derive(Debug, Clone, Copy)]
pub struct Snapshot {
    pub record: NavFusion,
    pub rx: Instant,
}

/// Where the navigator reads the latest fused solution from.
pub trait SolutionSource: Send {
    fn latest(&self) -> Option<Snapshot>;
}

impl<T: SolutionSource + Sync + ?Sized> SolutionSource for Arc<T> {
    fn latest(&self) -> Option<Snapshot> {
        T::latest(self)
    }
}

/// Where the navigator sends wheel commands to.
pub trait DriveCommander: Send {
    /// Returns false when the command could not be delivered.
    fn pwm(&mut self, left: i32, right: i32) -> bool;
}

/// A navigation task: drive from `start` toward `goal`, done within
/// `radius_m`.
#[derive(Debug, Clone, Copy)]
pub struct Goal {
    pub start: (f64, f64),
    pub goal: (f64, f64),
    pub radius_m: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct NavigatorConfig {
    pub period: Duration,
    /// Solutions older than this count as no solution at all.
    pub solution_max_age: Duration,
    pub lookahead_m: f64,
    pub fsm: FsmConfig,
    pub pursuit: PursuitConfig,
    pub mixer: MixerConfig,
}

impl Default for NavigatorConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_millis(100),
            solution_max_age: Duration::from_millis(1000),
            lookahead_m: 1.0,
            fsm: FsmConfig::default(),
            pursuit: PursuitConfig::default(),
            mixer: MixerConfig::default(),
        }
    }
}

/// Terminal outcome of a navigation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavOutcome {
    GoalReached,
    GoalNotReached,
    Stopped,
}

pub struct Navigator<S: SolutionSource, D: DriveCommander> {
    cfg: NavigatorConfig,
    goal: Goal,
    source: S,
    drive: D,
    fsm: NavigatorFsm,
    near: NearLine,
    pursuit: PurePursuit,
    mixer: Mixer,
}

impl<S: SolutionSource, D: DriveCommander> Navigator<S, D> {
    pub fn new(
        cfg: NavigatorConfig,
        goal: Goal,
        source: S,
        drive: D,
    ) -> Result<Self, crate::pursuit::PlanError> {
        let pursuit = PurePursuit::new(cfg.pursuit)?;
        Ok(Self {
            near: NearLine::new(goal.start, goal.goal, cfg.lookahead_m),
            fsm: NavigatorFsm::new(cfg.fsm),
            mixer: Mixer::new(cfg.mixer),
            pursuit,
            cfg,
            goal,
            source,
            drive,
        })
    }

    pub fn state(&self) -> NavState {
        self.fsm.state()
    }

    /// Runs until a terminal FSM state or until `stop` is raised. Always
    /// leaves the wheels stopped.
    pub fn run(mut self, stop: Arc<AtomicBool>) -> NavOutcome {
        info!(
            "navigator: start ({:.7}, {:.7}) -> ({:.7}, {:.7}), radius {} m",
            self.goal.start.0, self.goal.start.1, self.goal.goal.0, self.goal.goal.1, self.goal.radius_m
        );
        let mut last_tick = Instant::now();
        loop {
            std::thread::sleep(self.cfg.period);
            if stop.load(Ordering::SeqCst) {
                self.drive.pwm(0, 0);
                info!("navigator: stopped on request");
                return NavOutcome::Stopped;
            }
            let now = Instant::now();
            let dt = now.duration_since(last_tick).as_secs_f64();
            last_tick = now;

            if let Some(outcome) = self.tick(dt) {
                self.drive.pwm(0, 0);
                info!("navigator: finished with {outcome:?}");
                return outcome;
            }
        }
    }

    /// One control cycle; returns the outcome once the FSM is terminal.
    fn tick(&mut self, dt: f64) -> Option<NavOutcome> {
        let snapshot = self
            .source
            .latest()
            .filter(|s| s.rx.elapsed() <= self.cfg.solution_max_age);

        let (quality, near_state, err_ccw_deg) = match snapshot {
            Some(snap) => {
                let rec = snap.record;
                let near = self.near.update(rec.lat, rec.lon);
                // Heading error toward the near point. GNSS azimuths grow
                // clockwise while the planner and mixer treat positive as
                // counter-clockwise, hence the sign flip.
                let err_ccw = near
                    .heading_to_near_deg
                    .map(|target| -diff_deg(f64::from(rec.heading), target))
                    .unwrap_or(0.0);
                let quality = Quality {
                    has_fix: true,
                    h_acc_m: f64::from(rec.h_acc),
                    heading_acc_deg: f64::from(rec.heading_acc),
                };
                (quality, near, err_ccw)
            },
            None => {
                let quality = Quality {
                    has_fix: false,
                    h_acc_m: f64::INFINITY,
                    heading_acc_deg: 180.0,
                };
                // Without a position we cannot evaluate the geometry; keep
                // the FSM alive with a neutral near case.
                let near = NearState {
                    distance_to_goal_m: f64::INFINITY,
                    abs_distance_to_goal_m: f64::INFINITY,
                    heading_to_near_deg: None,
                    case: NearCase::TwoIntersections,
                    near_enu: None,
                    d_perp_m: None,
                };
                (quality, near, 0.0)
            },
        };

        let action = self.fsm.step(
            dt,
            &quality,
            near_state.distance_to_goal_m,
            self.goal.radius_m,
            near_state.case,
            err_ccw_deg,
        );
        debug!(
            "navigator: {:?} err={:.1} dist={:.2} ({})",
            action.state, err_ccw_deg, near_state.distance_to_goal_m, action.note
        );

        match action.state {
            NavState::GoalReached => return Some(NavOutcome::GoalReached),
            NavState::GoalNotReached => return Some(NavOutcome::GoalNotReached),
            _ => {},
        }

        let (left, right) = if action.allow_forward {
            let alpha = err_ccw_deg.clamp(
                -self.pursuit.alpha_max_deg(),
                self.pursuit.alpha_max_deg(),
            );
            match self.pursuit.plan(alpha) {
                Ok(plan) => self.mixer.mix(plan.v_mps, plan.omega_dps),
                Err(err) => {
                    // Unplannable geometry: hold position and spin onto the
                    // target instead of pushing through the limit.
                    debug!("navigator: plan rejected ({err}), spinning");
                    self.mixer.mix(0.0, self.cfg.fsm.spin_gain * err_ccw_deg)
                },
            }
        } else if action.allow_spin {
            self.mixer.mix(0.0, action.omega_dps)
        } else {
            (0, 0)
        };

        if !self.drive.pwm(left, right) {
            warn!("navigator: drive command not delivered");
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Scripted solution source: every call pops the next solution.
    struct Script {
        steps: Mutex<Vec<NavFusion>>,
    }

    impl SolutionSource for Arc<Script> {
        fn latest(&self) -> Option<Snapshot> {
            let mut steps = self.steps.lock().unwrap();
            let record = if steps.len() > 1 {
                steps.remove(0)
            } else {
                *steps.first()?
            };
            Some(Snapshot {
                record,
                rx: Instant::now(),
            })
        }
    }

    #[derive(Clone)]
    struct RecordingDrive {
        log: Arc<Mutex<Vec<(i32, i32)>>>,
    }

    impl DriveCommander for RecordingDrive {
        fn pwm(&mut self, left: i32, right: i32) -> bool {
            self.log.lock().unwrap().push((left, right));
            true
        }
    }

    fn solution(lat: f64, lon: f64, heading: f32, h_acc: f32, heading_acc: f32) -> NavFusion {
        NavFusion {
            ts_mono: 0.0,
            lat,
            lon,
            h_acc,
            heading,
            heading_acc,
            speed: 0.0,
            s_acc: 0.02,
            gyro_z: 0.0,
            gyro_z_acc: 1.0,
            gnss_fix_ok: true,
            dr_used: false,
            veh_heading: heading,
            mot_heading: heading,
            last_gyro_z: 0.0,
            g_speed: 0.0,
        }
    }

    fn run_ticks(nav: &mut Navigator<Arc<Script>, RecordingDrive>, n: usize) -> Option<NavOutcome> {
        for _ in 0..n {
            if let Some(outcome) = nav.tick(0.1) {
                return Some(outcome);
            }
        }
        None
    }

    #[test]
    fn reaches_goal_when_position_converges() {
        // Goal 0.0002 deg east; rover already inside the radius at the end.
        let goal = Goal {
            start: (50.0, 14.0),
            goal: (50.0, 14.000_2),
            radius_m: 2.0,
        };
        let mut steps = Vec::new();
        // Good fix, heading east, approaching the goal.
        for lon in [14.0, 14.000_05, 14.000_1, 14.000_15, 14.000_19] {
            for _ in 0..12 {
                steps.push(solution(50.0, lon, 90.0, 0.5, 5.0));
            }
        }
        let script = Arc::new(Script {
            steps: Mutex::new(steps),
        });
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut nav = Navigator::new(
            NavigatorConfig::default(),
            goal,
            script,
            RecordingDrive { log: log.clone() },
        )
        .unwrap();

        let outcome = run_ticks(&mut nav, 60);
        assert_eq!(outcome, Some(NavOutcome::GoalReached));
        // Once navigating, the rover must have been commanded forward.
        let log = log.lock().unwrap();
        assert!(log.iter().any(|(l, r)| *l > 0 && *r > 0));
    }

    #[test]
    fn missing_solution_keeps_rover_waiting() {
        let goal = Goal {
            start: (50.0, 14.0),
            goal: (50.0, 14.000_2),
            radius_m: 1.0,
        };
        let script = Arc::new(Script {
            steps: Mutex::new(Vec::new()),
        });
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut nav = Navigator::new(
            NavigatorConfig::default(),
            goal,
            script,
            RecordingDrive { log: log.clone() },
        )
        .unwrap();

        assert_eq!(run_ticks(&mut nav, 10), None);
        assert_eq!(nav.state(), NavState::WaitGnss);
        // No forward motion without a fix: only dither spins.
        assert!(log.lock().unwrap().iter().all(|(l, r)| *l <= 0 && *r >= 0));
    }

    #[test]
    fn sideways_line_fails_navigation() {
        // Line 1.2 m north of the rover with a 1 m lookahead: no near point.
        let shift = 1.2 / 111_132.954;
        let goal = Goal {
            start: (50.0 + shift, 13.999_8),
            goal: (50.0 + shift, 14.000_2),
            radius_m: 0.5,
        };
        let steps = vec![solution(50.0, 14.0, 90.0, 0.5, 5.0)];
        let script = Arc::new(Script {
            steps: Mutex::new(steps),
        });
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut nav = Navigator::new(
            NavigatorConfig::default(),
            goal,
            script,
            RecordingDrive { log },
        )
        .unwrap();

        assert_eq!(run_ticks(&mut nav, 5), Some(NavOutcome::GoalNotReached));
    }
}
