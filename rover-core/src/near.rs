//! Near-point selection: intersecting the lookahead circle with the
//! straight line through the start and goal positions.
//!
//! All geometry runs in a local ENU frame centered on the rover, so the
//! rover itself sits at the origin and the lookahead circle is simply
//! `x^2 + y^2 = L^2`. Start and goal are cached in ECEF and rotated into
//! the frame on every update.

use crate::angles::norm_deg;
use crate::geo::{ecef_to_enu, heading_enu_to_gnss, lla_to_ecef};

/// How the lookahead circle meets the start-goal line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NearCase {
    /// The line crosses the circle; the intersection farther along toward
    /// the goal is the steering target.
    TwoIntersections,
    /// The line touches the circle; the foot of the perpendicular is the
    /// target.
    Tangent,
    /// The line misses the circle (or start and goal coincide).
    NoIntersection,
}

/// Geometry outputs for one rover position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NearState {
    /// Signed distance to the goal along the line; negative once the
    /// projection of the rover has passed the goal.
    pub distance_to_goal_m: f64,
    /// Euclidean distance from the rover to the goal.
    pub abs_distance_to_goal_m: f64,
    /// Azimuth toward the near point (0 = North, clockwise), when one
    /// exists.
    pub heading_to_near_deg: Option<f64>,
    pub case: NearCase,
    /// Near point in the rover-centered ENU frame.
    pub near_enu: Option<(f64, f64)>,
    /// Perpendicular distance from the rover to the line.
    pub d_perp_m: Option<f64>,
}

/// The start-goal line with a lookahead radius.
pub struct NearLine {
    lookahead_m: f64,
    eps_m: f64,
    start_ecef: (f64, f64, f64),
    goal_ecef: (f64, f64, f64),
}

impl NearLine {
    /// Tangency tolerance on the perpendicular distance, in meters.
    pub const DEFAULT_EPS_M: f64 = 2e-3;

    pub fn new(
        start: (f64, f64),
        goal: (f64, f64),
        lookahead_m: f64,
    ) -> Self {
        Self::with_eps(start, goal, lookahead_m, Self::DEFAULT_EPS_M)
    }

    pub fn with_eps(start: (f64, f64), goal: (f64, f64), lookahead_m: f64, eps_m: f64) -> Self {
        Self {
            lookahead_m,
            eps_m,
            start_ecef: lla_to_ecef(start.0, start.1, 0.0),
            goal_ecef: lla_to_ecef(goal.0, goal.1, 0.0),
        }
    }

    /// Recomputes the near-point geometry for the rover at `(lat, lon)`.
    pub fn update(&self, lat_deg: f64, lon_deg: f64) -> NearState {
        let (sx, sy, _) =
            ecef_to_enu(self.start_ecef.0, self.start_ecef.1, self.start_ecef.2, lat_deg, lon_deg, 0.0);
        let (ex, ey, _) =
            ecef_to_enu(self.goal_ecef.0, self.goal_ecef.1, self.goal_ecef.2, lat_deg, lon_deg, 0.0);

        let abs_dist_goal = ex.hypot(ey);

        let (mut vx, mut vy) = (ex - sx, ey - sy);
        let seg_len = vx.hypot(vy);
        if seg_len < 1e-12 {
            // Degenerate: start and goal coincide, the line is undefined.
            return NearState {
                distance_to_goal_m: abs_dist_goal,
                abs_distance_to_goal_m: abs_dist_goal,
                heading_to_near_deg: None,
                case: NearCase::NoIntersection,
                near_enu: None,
                d_perp_m: None,
            };
        }
        vx /= seg_len;
        vy /= seg_len;

        // Foot of the perpendicular from the rover (origin) onto the line.
        let t_q = -(sx * vx + sy * vy);
        let qx = sx + t_q * vx;
        let qy = sy + t_q * vy;
        let d_perp = qx.hypot(qy);

        let distance_to_goal_m = seg_len - t_q;

        let lookahead = self.lookahead_m;
        if d_perp > lookahead + self.eps_m {
            return NearState {
                distance_to_goal_m,
                abs_distance_to_goal_m: abs_dist_goal,
                heading_to_near_deg: None,
                case: NearCase::NoIntersection,
                near_enu: None,
                d_perp_m: Some(d_perp),
            };
        }

        let (nx, ny, case) = if (d_perp - lookahead).abs() <= self.eps_m {
            (qx, qy, NearCase::Tangent)
        } else {
            let delta = (lookahead * lookahead - d_perp * d_perp).max(0.0).sqrt();
            // Of the two intersections, pick the one farther along the
            // direction toward the goal.
            let (n1x, n1y) = (qx + delta * vx, qy + delta * vy);
            let (n2x, n2y) = (qx - delta * vx, qy - delta * vy);
            let t1 = (n1x - sx) * vx + (n1y - sy) * vy;
            let t2 = (n2x - sx) * vx + (n2y - sy) * vy;
            if t1 >= t2 {
                (n1x, n1y, NearCase::TwoIntersections)
            } else {
                (n2x, n2y, NearCase::TwoIntersections)
            }
        };

        let heading_enu = norm_deg(ny.atan2(nx).to_degrees());
        NearState {
            distance_to_goal_m,
            abs_distance_to_goal_m: abs_dist_goal,
            heading_to_near_deg: Some(heading_enu_to_gnss(heading_enu)),
            case,
            near_enu: Some((nx, ny)),
            d_perp_m: Some(d_perp),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::angles::diff_deg;

    /// Approximate degrees of latitude per meter near 50 N.
    const DEG_PER_M_LAT: f64 = 1.0 / 111_132.954;

    const R: (f64, f64) = (50.0, 14.0);

    #[test]
    fn east_line_through_rover_has_two_intersections() {
        let line = NearLine::new((R.0, R.1 - 0.0002), (R.0, R.1 + 0.0002), 1.0);
        let st = line.update(R.0, R.1);
        assert_eq!(st.case, NearCase::TwoIntersections);
        let heading = st.heading_to_near_deg.unwrap();
        assert!(diff_deg(heading, 90.0).abs() < 0.5, "heading = {heading}");
        // Rover halfway along the segment.
        assert!(st.distance_to_goal_m > 10.0);
        assert!((st.distance_to_goal_m - st.abs_distance_to_goal_m).abs() < 0.01);
    }

    #[test]
    fn line_one_meter_north_is_tangent() {
        let shift = DEG_PER_M_LAT;
        let line = NearLine::new(
            (R.0 + shift, R.1 - 0.0002),
            (R.0 + shift, R.1 + 0.0002),
            1.0,
        );
        let st = line.update(R.0, R.1);
        assert_eq!(st.case, NearCase::Tangent);
        // The near point is the foot of the perpendicular, due north.
        let heading = st.heading_to_near_deg.unwrap();
        assert!(diff_deg(heading, 0.0).abs() < 0.5, "heading = {heading}");
    }

    #[test]
    fn line_further_north_misses_the_circle() {
        let shift = 1.2 * DEG_PER_M_LAT;
        let line = NearLine::new(
            (R.0 + shift, R.1 - 0.0002),
            (R.0 + shift, R.1 + 0.0002),
            1.0,
        );
        let st = line.update(R.0, R.1);
        assert_eq!(st.case, NearCase::NoIntersection);
        assert!(st.heading_to_near_deg.is_none());
        assert!(st.d_perp_m.unwrap() > 1.0);
    }

    #[test]
    fn distance_goes_negative_past_the_goal() {
        let start = (50.0, 14.0);
        let goal = (50.0, 14.000_02);
        let line = NearLine::new(start, goal, 1.0);
        // Rover east of the goal: projection lies beyond the segment end.
        let st = line.update(50.0, 14.000_04);
        assert!(st.distance_to_goal_m < 0.0);
        assert!(st.abs_distance_to_goal_m > 0.0);
    }

    #[test]
    fn coincident_start_and_goal_is_degenerate() {
        let line = NearLine::new(R, R, 1.0);
        let st = line.update(50.000_01, 14.0);
        assert_eq!(st.case, NearCase::NoIntersection);
        assert!(st.heading_to_near_deg.is_none());
    }

    #[test]
    fn near_point_sits_on_the_lookahead_circle() {
        let line = NearLine::new((R.0, R.1 - 0.0002), (R.0, R.1 + 0.0002), 1.0);
        let st = line.update(R.0, R.1 + 0.000_05);
        let (nx, ny) = st.near_enu.unwrap();
        assert!((nx.hypot(ny) - 1.0).abs() < 1e-6);
    }
}
