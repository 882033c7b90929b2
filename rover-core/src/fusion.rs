//! Heading-fusion core.
//!
//! Aligns the fast local heading stream (IMU/odometry, drifting but smooth)
//! with the slow global heading stream (dual-antenna GNSS, absolute but
//! noisy and gappy). The estimator keeps a sliding circular mean of
//! (global - local) deltas taken at the same time instant; the local stream
//! is interpolated along the shortest arc to the timestamp of each global
//! sample so the two streams never need to arrive in sync.

use std::collections::VecDeque;

use rover_proto::records::NavFusion;

use crate::angles::{diff_deg, interp_deg, norm_deg, SlidingAngleMean};

/// Default estimator window.
pub const DEFAULT_WINDOW: usize = 20;

/// Exponential smoothing factor for the heading correction.
const SMOOTH_ALPHA: f64 = 0.1;

/// The smoothed correction only follows the estimator while the circular
/// mean is this coherent.
const QUALITY_GATE: f64 = 0.8;

/// Raw IMU accumulated-angle units per degree.
pub const IMU_ANGLE_DIV: f64 = 3_355_340.8;

/// Raw IMU rate units per degree/second (500 dps full scale).
pub const IMU_OMEGA_DIV: f64 = 13_106.8;

/// Fuses position, wheel odometry and the two heading streams into a
/// navigation solution.
pub struct FusionCore {
    corr: SlidingAngleMean,
    corr_angle_deg: f64,
    corr_quality: f64,
    smooth_corr_deg: Option<f64>,

    /// Up to two most recent global heading samples `(t, heading)`.
    global_headings: VecDeque<(f64, f64)>,
    /// Last local heading sample `(t, heading)`.
    last_local: Option<(f64, f64)>,

    lat_deg: f64,
    lon_deg: f64,
    h_acc_m: f64,
    have_position: bool,

    left_mm_s: f64,
    right_mm_s: f64,
    have_speed: bool,

    last_omega_dps: f64,
}

impl Default for FusionCore {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

impl FusionCore {
    pub fn new(window: usize) -> Self {
        Self {
            corr: SlidingAngleMean::new(window),
            corr_angle_deg: 0.0,
            corr_quality: 0.0,
            smooth_corr_deg: None,
            global_headings: VecDeque::with_capacity(2),
            last_local: None,
            lat_deg: 0.0,
            lon_deg: 0.0,
            h_acc_m: 0.0,
            have_position: false,
            left_mm_s: 0.0,
            right_mm_s: 0.0,
            have_speed: false,
            last_omega_dps: 0.0,
        }
    }

    /// The solution is usable once position, local heading, wheel speeds and
    /// a full estimator window are all present.
    pub fn ready(&self) -> bool {
        self.have_position && self.last_local.is_some() && self.have_speed && self.corr.ready()
    }

    /// Current `(correction_deg, quality)` of the estimator.
    pub fn correction(&self) -> (f64, f64) {
        (self.corr_angle_deg, self.corr_quality)
    }

    /// Smoothed correction, once the quality gate has passed at least once.
    pub fn smoothed_correction(&self) -> Option<f64> {
        self.smooth_corr_deg
    }

    pub fn update_position(&mut self, lat_deg: f64, lon_deg: f64, h_acc_m: f64) {
        self.lat_deg = lat_deg;
        self.lon_deg = lon_deg;
        self.h_acc_m = h_acc_m;
        self.have_position = true;
    }

    /// Stores a global heading sample with its timestamp. Only the two most
    /// recent samples are kept; alignment happens on the local stream.
    pub fn update_global_heading(&mut self, t: f64, heading_deg: f64) {
        if self.global_headings.len() == 2 {
            self.global_headings.pop_front();
        }
        self.global_headings.push_back((t, heading_deg));
    }

    pub fn update_wheel_speeds(&mut self, left_mm_s: f64, right_mm_s: f64) {
        self.left_mm_s = left_mm_s;
        self.right_mm_s = right_mm_s;
        self.have_speed = true;
    }

    /// Feeds a local heading sample and aligns any stored global samples
    /// that fall between the previous and the current local timestamp.
    pub fn update_local_heading(&mut self, t: f64, heading_deg: f64, omega_dps: f64) {
        self.last_omega_dps = omega_dps;

        if let Some((t_prev, h_prev)) = self.last_local {
            if t > t_prev && !self.global_headings.is_empty() {
                while self
                    .global_headings
                    .front()
                    .is_some_and(|(tg, _)| *tg < t_prev)
                {
                    self.global_headings.pop_front();
                }
                while let Some(&(t_g, h_g)) = self.global_headings.front() {
                    if t_g > t {
                        break;
                    }
                    self.global_headings.pop_front();
                    let alpha = (t_g - t_prev) / (t - t_prev);
                    let local_at_tg = interp_deg(h_prev, heading_deg, alpha);
                    let (corr, quality) = self.corr.update(local_at_tg, h_g);
                    self.corr_angle_deg = corr;
                    self.corr_quality = quality;

                    if quality > QUALITY_GATE {
                        self.smooth_corr_deg = Some(match self.smooth_corr_deg {
                            None => corr,
                            Some(prev) => {
                                norm_deg(prev + SMOOTH_ALPHA * diff_deg(prev, corr))
                            },
                        });
                    }
                }
            }
        }
        self.last_local = Some((t, heading_deg));
    }

    /// Composes the navigation solution from the latest inputs.
    ///
    /// Heading is the local heading plus the smoothed correction (or the raw
    /// circular mean until the smoothed one is established). Accuracy fields
    /// are fixed placeholders for downstream consumers; the GNSS-direct
    /// solution path fills them from the receiver instead.
    pub fn solution(&self, ts_mono: f64) -> NavFusion {
        let local_heading = self.last_local.map_or(0.0, |(_, h)| h);
        let corr = self.smooth_corr_deg.unwrap_or(self.corr_angle_deg);
        let heading = norm_deg(local_heading + corr);
        let speed_mps = 0.5 * (self.left_mm_s + self.right_mm_s) / 1000.0;

        NavFusion {
            ts_mono,
            lat: self.lat_deg,
            lon: self.lon_deg,
            h_acc: self.h_acc_m as f32,
            heading: heading as f32,
            heading_acc: 2.0,
            speed: speed_mps as f32,
            s_acc: 0.020,
            gyro_z: self.last_omega_dps as f32,
            gyro_z_acc: 1.0,
            gnss_fix_ok: false,
            dr_used: false,
            veh_heading: local_heading as f32,
            mot_heading: 0.0,
            last_gyro_z: self.last_omega_dps as f32,
            g_speed: speed_mps as f32,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Feeds `count` aligned local/global pairs with a constant offset.
    fn feed_pairs(core: &mut FusionCore, count: usize, local: f64, offset: f64, t0: f64) -> f64 {
        let mut t = t0;
        for _ in 0..count {
            core.update_global_heading(t + 0.05, norm_deg(local + offset));
            core.update_local_heading(t + 0.1, local, 0.0);
            t += 0.1;
        }
        t
    }

    #[test]
    fn constant_offset_converges_to_correction() {
        let mut core = FusionCore::new(20);
        core.update_position(50.0, 14.0, 0.05);
        core.update_wheel_speeds(100.0, 100.0);
        core.update_local_heading(0.0, 100.0, 0.0);

        feed_pairs(&mut core, 25, 100.0, 25.0, 0.0);

        assert!(core.ready());
        let (corr, quality) = core.correction();
        assert!((corr - 25.0).abs() < 1e-6, "corr = {corr}");
        assert!(quality > 0.999_999);
        let smoothed = core.smoothed_correction().unwrap();
        assert!((smoothed - 25.0).abs() < 1e-6);

        let sol = core.solution(1.0);
        assert!((f64::from(sol.heading) - 125.0).abs() < 1e-4);
        assert!((f64::from(sol.speed) - 0.1).abs() < 1e-9);
    }

    #[test]
    fn outliers_degrade_quality_but_not_smoothed_correction() {
        let mut core = FusionCore::new(20);
        core.update_position(50.0, 14.0, 0.05);
        core.update_wheel_speeds(0.0, 0.0);
        core.update_local_heading(0.0, 100.0, 0.0);
        let t = feed_pairs(&mut core, 25, 100.0, 25.0, 0.0);

        // Inject 180-degree outliers: quality drops under the gate, so the
        // smoothed correction must hold near 25.
        let mut t = t;
        for _ in 0..5 {
            core.update_global_heading(t + 0.05, norm_deg(100.0 + 25.0 + 180.0));
            core.update_local_heading(t + 0.1, 100.0, 0.0);
            t += 0.1;
        }
        let (_, quality) = core.correction();
        assert!(quality < QUALITY_GATE, "quality = {quality}");
        let smoothed = core.smoothed_correction().unwrap();
        assert!((smoothed - 25.0).abs() < 2.0, "smoothed = {smoothed}");
    }

    #[test]
    fn not_ready_until_all_inputs_present() {
        let mut core = FusionCore::new(2);
        assert!(!core.ready());
        core.update_position(50.0, 14.0, 0.1);
        core.update_wheel_speeds(10.0, 10.0);
        core.update_local_heading(0.0, 0.0, 0.0);
        assert!(!core.ready());
        feed_pairs(&mut core, 3, 0.0, 5.0, 0.0);
        assert!(core.ready());
    }

    #[test]
    fn stale_global_samples_are_dropped() {
        let mut core = FusionCore::new(2);
        core.update_local_heading(10.0, 0.0, 0.0);
        // Older than the previous local sample: must be discarded, not
        // aligned against a later interval.
        core.update_global_heading(9.0, 90.0);
        core.update_local_heading(10.1, 0.0, 0.0);
        assert_eq!(core.corr.len(), 0);
    }

    #[test]
    fn alignment_interpolates_local_heading() {
        let mut core = FusionCore::new(1);
        core.update_local_heading(0.0, 0.0, 0.0);
        // Local rotates 0 -> 10 deg over 1 s; global sample at t=0.5 reads
        // 30 deg. Interpolated local is 5, so the delta is 25.
        core.update_global_heading(0.5, 30.0);
        core.update_local_heading(1.0, 10.0, 0.0);
        let (corr, quality) = core.correction();
        assert!((corr - 25.0).abs() < 1e-9);
        assert!(quality > 0.999_999);
    }
}
