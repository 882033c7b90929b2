//! Waypoint navigator finite state machine.
//!
//! The FSM only decides *what kind* of motion is allowed and how fast to
//! spin; translating that into wheel commands is the navigator's job. All
//! transitions are driven by solution quality (horizontal accuracy, heading
//! accuracy) and the heading error toward the near point, debounced by two
//! time accumulators.

use crate::near::NearCase;

/// Sub-phases of heading acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquirePhase {
    /// Spin a fixed direction until the heading estimate tightens.
    Rotate,
    /// Keep spinning the same direction until roughly facing the near
    /// point.
    Seek,
    /// Gentle pre-spin onto the target before releasing forward motion.
    Ready,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavState {
    WaitGnss,
    AcquireHeading(AcquirePhase),
    Navigate,
    SafeSpin,
    GoalReached,
    GoalNotReached,
}

impl NavState {
    pub fn is_terminal(self) -> bool {
        matches!(self, NavState::GoalReached | NavState::GoalNotReached)
    }
}

/// Quality gates and timing of the state machine.
#[derive(Debug, Clone, Copy)]
pub struct FsmConfig {
    /// Horizontal accuracy required to leave WAIT_GNSS [m].
    pub h_acc_ready_m: f64,
    /// Horizontal accuracy beyond which the fix counts as lost [m].
    pub h_acc_lost_m: f64,
    /// Heading accuracy that ends the ROTATE phase [deg].
    pub rotate_heading_acc_deg: f64,
    /// Heading-error window that ends the SEEK phase [deg].
    pub seek_window_deg: f64,
    /// Heading-error window that releases NAVIGATE [deg].
    pub ready_window_deg: f64,
    /// Sudden error that throws NAVIGATE back into acquisition [deg].
    pub navigate_breakout_deg: f64,
    /// Heading accuracy considered uncertain while driving [deg].
    pub heading_uncertain_deg: f64,
    /// Heading-error window required to recover from SAFE_SPIN [deg].
    pub recover_window_deg: f64,
    /// Time a good condition must hold before acting on it [s].
    pub t_stable_s: f64,
    /// Time a bad condition must hold before acting on it [s].
    pub t_hold_s: f64,
    /// Yaw rate limit [deg/s].
    pub omega_max_dps: f64,
    /// Spin setpoint per degree of heading error [deg/s per deg].
    pub spin_gain: f64,
}

impl Default for FsmConfig {
    fn default() -> Self {
        Self {
            h_acc_ready_m: 1.5,
            h_acc_lost_m: 3.0,
            rotate_heading_acc_deg: 40.0,
            seek_window_deg: 20.0,
            ready_window_deg: 7.0,
            navigate_breakout_deg: 60.0,
            heading_uncertain_deg: 20.0,
            recover_window_deg: 30.0,
            t_stable_s: 0.7,
            t_hold_s: 0.3,
            omega_max_dps: 90.0,
            spin_gain: 2.0,
        }
    }
}

/// Quality of the current navigation solution.
#[derive(Debug, Clone, Copy)]
pub struct Quality {
    pub has_fix: bool,
    pub h_acc_m: f64,
    pub heading_acc_deg: f64,
}

/// What the navigator is allowed to do this cycle.
#[derive(Debug, Clone, Copy)]
pub struct FsmAction {
    pub state: NavState,
    pub allow_forward: bool,
    pub allow_spin: bool,
    /// Spin setpoint, counter-clockwise positive [deg/s]. Zero in NAVIGATE,
    /// where the pure-pursuit planner owns the yaw rate.
    pub omega_dps: f64,
    pub note: &'static str,
}

pub struct NavigatorFsm {
    cfg: FsmConfig,
    state: NavState,
    t_good: f64,
    t_bad: f64,
    spin_dir: f64,
}

impl NavigatorFsm {
    pub fn new(cfg: FsmConfig) -> Self {
        Self {
            cfg,
            state: NavState::WaitGnss,
            t_good: 0.0,
            t_bad: 0.0,
            spin_dir: 1.0,
        }
    }

    pub fn state(&self) -> NavState {
        self.state
    }

    pub fn reset(&mut self) {
        self.state = NavState::WaitGnss;
        self.t_good = 0.0;
        self.t_bad = 0.0;
        self.spin_dir = 1.0;
    }

    /// Advances the state machine by `dt_s`.
    ///
    /// `err_deg` is the heading error toward the near point,
    /// counter-clockwise positive.
    pub fn step(
        &mut self,
        dt_s: f64,
        quality: &Quality,
        dist_to_goal_m: f64,
        goal_radius_m: f64,
        near_case: NearCase,
        err_deg: f64,
    ) -> FsmAction {
        let cfg = self.cfg;

        if self.state.is_terminal() {
            return self.halted("terminal");
        }
        if dist_to_goal_m <= goal_radius_m {
            self.state = NavState::GoalReached;
            return self.halted("goal reached");
        }
        if near_case == NearCase::NoIntersection {
            self.state = NavState::GoalNotReached;
            return self.halted("near selection failed");
        }

        let pos_acquired = quality.has_fix && quality.h_acc_m <= cfg.h_acc_ready_m;
        let pos_lost = !quality.has_fix || quality.h_acc_m > cfg.h_acc_lost_m;
        let abs_err = err_deg.abs();

        match self.state {
            NavState::WaitGnss => {
                if pos_acquired {
                    self.enter(NavState::AcquireHeading(AcquirePhase::Rotate));
                    self.spin_dir = if err_deg < 0.0 { -1.0 } else { 1.0 };
                    return self.spin(0.5 * cfg.omega_max_dps * self.spin_dir, "position ok, acquiring heading");
                }
                // Low-omega dither keeps the heading estimator fed while the
                // fix converges.
                self.spin(0.2 * cfg.omega_max_dps * self.spin_dir, "waiting for gnss")
            },
            NavState::AcquireHeading(phase) => {
                if pos_lost {
                    self.enter(NavState::WaitGnss);
                    return self.spin(0.2 * cfg.omega_max_dps * self.spin_dir, "gnss lost during acquire");
                }
                match phase {
                    AcquirePhase::Rotate => {
                        if quality.heading_acc_deg <= cfg.rotate_heading_acc_deg {
                            self.enter(NavState::AcquireHeading(AcquirePhase::Seek));
                        }
                        self.spin(0.5 * cfg.omega_max_dps * self.spin_dir, "rotate")
                    },
                    AcquirePhase::Seek => {
                        if abs_err <= cfg.seek_window_deg {
                            self.enter(NavState::AcquireHeading(AcquirePhase::Ready));
                        }
                        self.spin(0.5 * cfg.omega_max_dps * self.spin_dir, "seek near point")
                    },
                    AcquirePhase::Ready => {
                        if abs_err <= cfg.ready_window_deg {
                            self.enter(NavState::Navigate);
                            return self.drive("heading ready, navigating");
                        }
                        let omega = (cfg.spin_gain * err_deg)
                            .clamp(-0.3 * cfg.omega_max_dps, 0.3 * cfg.omega_max_dps);
                        self.spin(omega, "pre-spin onto near point")
                    },
                }
            },
            NavState::Navigate => {
                if pos_lost {
                    self.enter(NavState::SafeSpin);
                    return self.spin(self.recover_omega(err_deg), "gnss degraded, safe spin");
                }
                if abs_err > cfg.navigate_breakout_deg {
                    self.enter(NavState::AcquireHeading(AcquirePhase::Rotate));
                    self.spin_dir = if err_deg < 0.0 { -1.0 } else { 1.0 };
                    return self.spin(0.5 * cfg.omega_max_dps * self.spin_dir, "heading breakout, re-acquiring");
                }
                if quality.heading_acc_deg > cfg.heading_uncertain_deg {
                    self.t_bad += dt_s;
                    if self.t_bad >= cfg.t_hold_s {
                        self.enter(NavState::SafeSpin);
                        return self.spin(self.recover_omega(err_deg), "heading uncertain, safe spin");
                    }
                } else {
                    self.t_bad = 0.0;
                }
                self.drive("navigate")
            },
            NavState::SafeSpin => {
                if pos_lost {
                    self.t_bad += dt_s;
                    if self.t_bad >= cfg.t_hold_s {
                        self.enter(NavState::WaitGnss);
                        return self.spin(0.2 * cfg.omega_max_dps * self.spin_dir, "gnss lost");
                    }
                } else {
                    self.t_bad = 0.0;
                    let recovered = quality.heading_acc_deg <= cfg.heading_uncertain_deg
                        && abs_err <= cfg.recover_window_deg;
                    if recovered {
                        self.t_good += dt_s;
                        if self.t_good >= cfg.t_stable_s {
                            self.enter(NavState::Navigate);
                            return self.drive("recovered, navigating");
                        }
                    } else {
                        self.t_good = 0.0;
                    }
                }
                self.spin(self.recover_omega(err_deg), "safe spin")
            },
            NavState::GoalReached | NavState::GoalNotReached => self.halted("terminal"),
        }
    }

    fn enter(&mut self, state: NavState) {
        self.state = state;
        self.t_good = 0.0;
        self.t_bad = 0.0;
    }

    fn recover_omega(&self, err_deg: f64) -> f64 {
        let magnitude = (self.cfg.spin_gain * err_deg.abs()).min(0.6 * self.cfg.omega_max_dps);
        if err_deg < 0.0 {
            -magnitude
        } else {
            magnitude
        }
    }

    fn halted(&self, note: &'static str) -> FsmAction {
        FsmAction {
            state: self.state,
            allow_forward: false,
            allow_spin: false,
            omega_dps: 0.0,
            note,
        }
    }

    fn spin(&self, omega_dps: f64, note: &'static str) -> FsmAction {
        FsmAction {
            state: self.state,
            allow_forward: false,
            allow_spin: true,
            omega_dps,
            note,
        }
    }

    fn drive(&self, note: &'static str) -> FsmAction {
        FsmAction {
            state: self.state,
            allow_forward: true,
            allow_spin: true,
            omega_dps: 0.0,
            note,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn q(h_acc: f64, heading_acc: f64) -> Quality {
        Quality {
            has_fix: true,
            h_acc_m: h_acc,
            heading_acc_deg: heading_acc,
        }
    }

    const TWO: NearCase = NearCase::TwoIntersections;

    #[test]
    fn full_mission_progression() {
        let mut fsm = NavigatorFsm::new(FsmConfig::default());

        // Poor fix for a second: stays waiting.
        for _ in 0..10 {
            let a = fsm.step(0.1, &q(3.0, 90.0), 50.0, 1.0, TWO, 30.0);
            assert_eq!(a.state, NavState::WaitGnss);
            assert!(!a.allow_forward);
        }

        // Fix tightens: acquisition starts rotating.
        let a = fsm.step(0.1, &q(1.0, 90.0), 50.0, 1.0, TWO, 30.0);
        assert_eq!(a.state, NavState::AcquireHeading(AcquirePhase::Rotate));
        assert!(a.allow_spin && !a.allow_forward);
        assert!(a.omega_dps > 0.0);

        // Heading accuracy improves monotonically: rotate -> seek.
        let a = fsm.step(0.1, &q(1.0, 35.0), 50.0, 1.0, TWO, 50.0);
        assert_eq!(a.state, NavState::AcquireHeading(AcquirePhase::Seek));

        // Error closes into the seek window: seek -> ready.
        let a = fsm.step(0.1, &q(1.0, 25.0), 50.0, 1.0, TWO, 15.0);
        assert_eq!(a.state, NavState::AcquireHeading(AcquirePhase::Ready));

        // Error closes into the ready window: navigate.
        let a = fsm.step(0.1, &q(1.0, 15.0), 50.0, 1.0, TWO, 5.0);
        assert_eq!(a.state, NavState::Navigate);
        assert!(a.allow_forward);

        // Within goal radius: terminal.
        let a = fsm.step(0.1, &q(1.0, 15.0), 0.5, 1.0, TWO, 5.0);
        assert_eq!(a.state, NavState::GoalReached);
        assert!(!a.allow_forward && !a.allow_spin);

        // Terminal is sticky.
        let a = fsm.step(0.1, &q(1.0, 15.0), 50.0, 1.0, TWO, 5.0);
        assert_eq!(a.state, NavState::GoalReached);
    }

    fn navigate_fsm() -> NavigatorFsm {
        let mut fsm = NavigatorFsm::new(FsmConfig::default());
        fsm.step(0.1, &q(1.0, 90.0), 50.0, 1.0, TWO, 5.0);
        fsm.step(0.1, &q(1.0, 30.0), 50.0, 1.0, TWO, 5.0);
        fsm.step(0.1, &q(1.0, 30.0), 50.0, 1.0, TWO, 5.0);
        let a = fsm.step(0.1, &q(1.0, 15.0), 50.0, 1.0, TWO, 5.0);
        assert_eq!(a.state, NavState::Navigate);
        fsm
    }

    #[test]
    fn breakout_error_reacquires_heading() {
        let mut fsm = navigate_fsm();
        let a = fsm.step(0.1, &q(1.0, 10.0), 50.0, 1.0, TWO, -70.0);
        assert_eq!(a.state, NavState::AcquireHeading(AcquirePhase::Rotate));
        // Spin direction follows the error sign.
        assert!(a.omega_dps < 0.0);
    }

    #[test]
    fn sustained_heading_uncertainty_forces_safe_spin() {
        let mut fsm = navigate_fsm();
        // Uncertain but not yet held long enough.
        let a = fsm.step(0.2, &q(1.0, 25.0), 50.0, 1.0, TWO, 5.0);
        assert_eq!(a.state, NavState::Navigate);
        // Held past t_hold: safe spin with v inhibited.
        let a = fsm.step(0.2, &q(1.0, 25.0), 50.0, 1.0, TWO, 5.0);
        assert_eq!(a.state, NavState::SafeSpin);
        assert!(!a.allow_forward && a.allow_spin);

        // Recovery must be sustained for t_stable.
        let a = fsm.step(0.4, &q(1.0, 10.0), 50.0, 1.0, TWO, 10.0);
        assert_eq!(a.state, NavState::SafeSpin);
        let a = fsm.step(0.4, &q(1.0, 10.0), 50.0, 1.0, TWO, 10.0);
        assert_eq!(a.state, NavState::Navigate);
    }

    #[test]
    fn gnss_loss_falls_back_through_safe_spin_to_wait() {
        let mut fsm = navigate_fsm();
        let a = fsm.step(0.1, &q(10.0, 10.0), 50.0, 1.0, TWO, 5.0);
        assert_eq!(a.state, NavState::SafeSpin);
        let a = fsm.step(0.2, &q(10.0, 10.0), 50.0, 1.0, TWO, 5.0);
        assert_eq!(a.state, NavState::SafeSpin);
        let a = fsm.step(0.2, &q(10.0, 10.0), 50.0, 1.0, TWO, 5.0);
        assert_eq!(a.state, NavState::WaitGnss);
    }

    #[test]
    fn failed_near_selection_is_terminal() {
        let mut fsm = navigate_fsm();
        let a = fsm.step(0.1, &q(1.0, 10.0), 50.0, 1.0, NearCase::NoIntersection, 5.0);
        assert_eq!(a.state, NavState::GoalNotReached);
        let a = fsm.step(0.1, &q(1.0, 10.0), 50.0, 1.0, TWO, 5.0);
        assert_eq!(a.state, NavState::GoalNotReached);
    }
}
