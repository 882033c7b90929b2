//! Pure-pursuit velocity planning for a differential-drive base.
//!
//! From a heading error toward the near point, the planner derives the
//! pursuit curvature `kappa = 2 sin(alpha) / L`, caps the center speed by
//! the lateral-acceleration limit, and checks that the resulting wheel
//! speeds keep both wheels rolling forward.

use core::fmt;

/// Planner parameters. Units are SI: meters, seconds, degrees where noted.
#[derive(Debug, Clone, Copy)]
pub struct PursuitConfig {
    /// Lateral acceleration limit [m/s^2].
    pub a_y_max: f64,
    /// Lookahead distance [m].
    pub lookahead_m: f64,
    /// Wheel track [m].
    pub track_width_m: f64,
    /// Center-speed limit [m/s].
    pub max_speed_mps: f64,
    /// Optional lower bound for the inner wheel [m/s]; 0 disables it.
    pub min_wheel_speed_mps: f64,
    /// Optional minimum turn radius [m]; `None` means `track/2`, the
    /// tightest turn that keeps both wheels moving forward.
    pub min_turn_radius_m: Option<f64>,
}

impl Default for PursuitConfig {
    fn default() -> Self {
        Self {
            a_y_max: 0.5,
            lookahead_m: 1.0,
            track_width_m: 0.58,
            max_speed_mps: 0.5,
            min_wheel_speed_mps: 0.0,
            min_turn_radius_m: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlanError {
    BadParam {
        param: &'static str,
    },
    /// The requested heading error needs a tighter turn than the radius
    /// limits allow.
    AlphaOutOfRange {
        alpha_deg: f64,
        max_deg: f64,
    },
    /// Curvature beyond the forward-only bound `2 / track`.
    CurvatureTooTight {
        kappa: f64,
        limit: f64,
    },
    /// The plan would spin one wheel backwards.
    ReverseRequired,
    /// The inner wheel would fall under the configured minimum.
    InnerWheelTooSlow {
        inner_mps: f64,
        min_mps: f64,
    },
}

impl fmt::Display for PlanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanError::BadParam { param } => write!(f, "invalid planner parameter {param}"),
            PlanError::AlphaOutOfRange { alpha_deg, max_deg } => {
                write!(f, "|alpha|={:.2} deg exceeds allowed {:.2} deg", alpha_deg.abs(), max_deg)
            },
            PlanError::CurvatureTooTight { kappa, limit } => {
                write!(f, "curvature {:.3} 1/m exceeds forward-only limit {:.3}", kappa.abs(), limit)
            },
            PlanError::ReverseRequired => {
                f.write_str("requested turn would reverse a wheel")
            },
            PlanError::InnerWheelTooSlow { inner_mps, min_mps } => {
                write!(f, "inner wheel {:.2} m/s under minimum {:.2} m/s", inner_mps, min_mps)
            },
        }
    }
}

impl std::error::Error for PlanError {}

/// A planned motion: center velocity, yaw rate and per-wheel speeds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WheelPlan {
    pub v_mps: f64,
    /// Yaw rate, counter-clockwise positive [deg/s].
    pub omega_dps: f64,
    pub left_mps: f64,
    pub right_mps: f64,
    pub kappa: f64,
}

/// Validated pure-pursuit planner with a cached admissible-alpha bound.
pub struct PurePursuit {
    cfg: PursuitConfig,
    min_turn_radius_m: f64,
    alpha_max_deg: f64,
}

impl PurePursuit {
    pub fn new(cfg: PursuitConfig) -> Result<Self, PlanError> {
        if cfg.a_y_max <= 0.0 {
            return Err(PlanError::BadParam { param: "a_y_max" });
        }
        if cfg.lookahead_m <= 0.0 {
            return Err(PlanError::BadParam { param: "lookahead_m" });
        }
        if cfg.track_width_m <= 0.0 {
            return Err(PlanError::BadParam { param: "track_width_m" });
        }
        if cfg.max_speed_mps <= 0.0 {
            return Err(PlanError::BadParam { param: "max_speed_mps" });
        }
        if cfg.min_wheel_speed_mps < 0.0 {
            return Err(PlanError::BadParam { param: "min_wheel_speed_mps" });
        }
        let half_track = cfg.track_width_m / 2.0;
        let min_turn_radius_m = cfg.min_turn_radius_m.unwrap_or(half_track);
        if min_turn_radius_m < half_track {
            return Err(PlanError::BadParam { param: "min_turn_radius_m" });
        }

        // With kappa = 2 sin(alpha) / L the smallest reachable radius is
        // L/2, so R >= R_eff bounds |sin(alpha)| by L / (2 R_eff).
        let arg = (cfg.lookahead_m / (2.0 * min_turn_radius_m)).clamp(0.0, 1.0);
        let alpha_max_deg = arg.asin().to_degrees();

        Ok(Self {
            cfg,
            min_turn_radius_m,
            alpha_max_deg,
        })
    }

    /// Largest admissible |heading error|, in degrees.
    pub fn alpha_max_deg(&self) -> f64 {
        self.alpha_max_deg
    }

    pub fn min_turn_radius_m(&self) -> f64 {
        self.min_turn_radius_m
    }

    /// Plans wheel speeds for a heading error `alpha` (degrees,
    /// counter-clockwise positive, limited to [-90, 90]).
    pub fn plan(&self, alpha_deg: f64) -> Result<WheelPlan, PlanError> {
        if !(-90.0..=90.0).contains(&alpha_deg) {
            return Err(PlanError::AlphaOutOfRange {
                alpha_deg,
                max_deg: 90.0,
            });
        }
        if alpha_deg.abs() > self.alpha_max_deg + 1e-12 {
            return Err(PlanError::AlphaOutOfRange {
                alpha_deg,
                max_deg: self.alpha_max_deg,
            });
        }

        let kappa = 2.0 * alpha_deg.to_radians().sin() / self.cfg.lookahead_m;
        let kappa_fwd_max = 2.0 / self.cfg.track_width_m;
        if kappa.abs() > kappa_fwd_max + 1e-12 {
            return Err(PlanError::CurvatureTooTight {
                kappa,
                limit: kappa_fwd_max,
            });
        }

        let v = if kappa.abs() > 0.0 {
            self.cfg.max_speed_mps.min((self.cfg.a_y_max / kappa.abs()).sqrt())
        } else {
            self.cfg.max_speed_mps
        };

        let half_bk = 0.5 * self.cfg.track_width_m * kappa;
        let right = v * (1.0 + half_bk);
        let left = v * (1.0 - half_bk);
        if left < -1e-9 || right < -1e-9 {
            return Err(PlanError::ReverseRequired);
        }
        let (left, right) = (left.max(0.0), right.max(0.0));

        let min_wheel = self.cfg.min_wheel_speed_mps;
        if min_wheel > 0.0 {
            let inner = left.min(right);
            if inner + 1e-9 < min_wheel {
                return Err(PlanError::InnerWheelTooSlow {
                    inner_mps: inner,
                    min_mps: min_wheel,
                });
            }
        }

        Ok(WheelPlan {
            v_mps: v,
            omega_dps: (v * kappa).to_degrees(),
            left_mps: left,
            right_mps: right,
            kappa,
        })
    }
}
