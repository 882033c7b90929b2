//! Angle algebra on the compass circle and the sliding circular mean.

use std::collections::VecDeque;

/// Normalizes an angle into `[0, 360)` degrees.
pub fn norm_deg(a: f64) -> f64 {
    let a = a % 360.0;
    if a < 0.0 {
        a + 360.0
    } else {
        a
    }
}

/// Shortest signed difference `to - from` in `(-180, 180]` degrees.
pub fn diff_deg(from: f64, to: f64) -> f64 {
    let d = (to - from + 180.0).rem_euclid(360.0) - 180.0;
    if d == -180.0 {
        180.0
    } else {
        d
    }
}

/// Interpolates between two angles along the shortest arc.
/// `alpha` is clamped into `[0, 1]`.
pub fn interp_deg(a0: f64, a1: f64, alpha: f64) -> f64 {
    let alpha = alpha.clamp(0.0, 1.0);
    norm_deg(a0 + alpha * diff_deg(a0, a1))
}

/// Sliding circular mean of angle differences over a fixed window.
///
/// Every update turns the difference `to - from` into a unit vector;
/// running component sums keep the update O(1). The mean direction is
/// `atan2` of the summed components, the quality is the length of the mean
/// unit vector: 1.0 when every sample agrees, 0.0 when samples cancel out.
pub struct SlidingAngleMean {
    size: usize,
    window: VecDeque<(f64, f64)>,
    sum_x: f64,
    sum_y: f64,
}

impl SlidingAngleMean {
    /// `size` must be at least 1.
    pub fn new(size: usize) -> Self {
        assert!(size > 0, "window size must be > 0");
        Self {
            size,
            window: VecDeque::with_capacity(size),
            sum_x: 0.0,
            sum_y: 0.0,
        }
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    /// True once the window is full.
    pub fn ready(&self) -> bool {
        self.window.len() >= self.size
    }

    pub fn reset(&mut self) {
        self.window.clear();
        self.sum_x = 0.0;
        self.sum_y = 0.0;
    }

    /// Feeds the pair and returns `(mean_delta_deg, quality)`.
    pub fn update(&mut self, from_deg: f64, to_deg: f64) -> (f64, f64) {
        let theta = (to_deg - from_deg).to_radians();
        let (y, x) = theta.sin_cos();

        if self.window.len() == self.size {
            if let Some((ox, oy)) = self.window.pop_front() {
                self.sum_x -= ox;
                self.sum_y -= oy;
            }
        }
        self.window.push_back((x, y));
        self.sum_x += x;
        self.sum_y += y;

        self.mean()
    }

    /// Current `(mean_delta_deg, quality)` without feeding a sample.
    pub fn mean(&self) -> (f64, f64) {
        let n = self.window.len().max(1) as f64;
        let avg_x = self.sum_x / n;
        let avg_y = self.sum_y / n;
        let angle = avg_y.atan2(avg_x).to_degrees();
        let quality = (avg_x * avg_x + avg_y * avg_y).sqrt();
        (angle, quality)
    }
}
