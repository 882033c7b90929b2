//! WGS-84 coordinate conversions: LLA <-> ECEF <-> local ENU.
//!
//! Double precision throughout; for baselines of tens to hundreds of meters
//! the round-trip error stays in the millimeter range.

const WGS84_A: f64 = 6_378_137.0;
const WGS84_F: f64 = 1.0 / 298.257_223_563;
const WGS84_B: f64 = WGS84_A * (1.0 - WGS84_F);
const WGS84_E2: f64 = (WGS84_A * WGS84_A - WGS84_B * WGS84_B) / (WGS84_A * WGS84_A);
const WGS84_EP2: f64 = (WGS84_A * WGS84_A - WGS84_B * WGS84_B) / (WGS84_B * WGS84_B);

/// Geodetic degrees to earth-centered earth-fixed meters.
pub fn lla_to_ecef(lat_deg: f64, lon_deg: f64, h_m: f64) -> (f64, f64, f64) {
    let lat = lat_deg.to_radians();
    let lon = lon_deg.to_radians();
    let (sin_lat, cos_lat) = lat.sin_cos();
    let (sin_lon, cos_lon) = lon.sin_cos();
    let n = WGS84_A / (1.0 - WGS84_E2 * sin_lat * sin_lat).sqrt();
    let x = (n + h_m) * cos_lat * cos_lon;
    let y = (n + h_m) * cos_lat * sin_lon;
    let z = (n * (1.0 - WGS84_E2) + h_m) * sin_lat;
    (x, y, z)
}

/// Closed-form (Bowring-style, non-iterative) ECEF to geodetic conversion.
pub fn ecef_to_lla(x: f64, y: f64, z: f64) -> (f64, f64, f64) {
    let r = x.hypot(y);
    if r < 1e-12 {
        // polar axis
        let lat = (core::f64::consts::FRAC_PI_2).copysign(z);
        return (lat.to_degrees(), 0.0, z.abs() - WGS84_B);
    }

    let f = 54.0 * WGS84_B * WGS84_B * z * z;
    let g = r * r + (1.0 - WGS84_E2) * z * z - WGS84_E2 * (WGS84_A * WGS84_A - WGS84_B * WGS84_B);
    let c = WGS84_E2 * WGS84_E2 * f * r * r / (g * g * g);
    let s = (1.0 + c + (c * c + 2.0 * c).sqrt()).cbrt();
    let p = f / (3.0 * (s + 1.0 / s + 1.0).powi(2) * g * g);
    let q = (1.0 + 2.0 * WGS84_E2 * WGS84_E2 * p).sqrt();
    let r0 = -(p * WGS84_E2 * r) / (1.0 + q)
        + (0.5 * WGS84_A * WGS84_A * (1.0 + 1.0 / q)
            - p * (1.0 - WGS84_E2) * z * z / (q * (1.0 + q))
            - 0.5 * p * r * r)
            .sqrt();
    let u = ((r - WGS84_E2 * r0).powi(2) + z * z).sqrt();
    let v = ((r - WGS84_E2 * r0).powi(2) + (1.0 - WGS84_E2) * z * z).sqrt();
    let z0 = WGS84_B * WGS84_B * z / (WGS84_A * v);
    let h = u * (1.0 - WGS84_B * WGS84_B / (WGS84_A * v));
    let lat = (z + WGS84_EP2 * z0).atan2(r);
    let lon = y.atan2(x);
    (lat.to_degrees(), lon.to_degrees(), h)
}

/// Rows of the ECEF->ENU rotation about the reference point.
fn enu_rotation(lat0_deg: f64, lon0_deg: f64) -> [[f64; 3]; 3] {
    let (s_lat, c_lat) = lat0_deg.to_radians().sin_cos();
    let (s_lon, c_lon) = lon0_deg.to_radians().sin_cos();
    [
        [-s_lon, c_lon, 0.0],
        [-s_lat * c_lon, -s_lat * s_lon, c_lat],
        [c_lat * c_lon, c_lat * s_lon, s_lat],
    ]
}

/// ECEF meters to local east/north/up about the reference LLA.
pub fn ecef_to_enu(
    x: f64,
    y: f64,
    z: f64,
    lat0_deg: f64,
    lon0_deg: f64,
    h0_m: f64,
) -> (f64, f64, f64) {
    let (x0, y0, z0) = lla_to_ecef(lat0_deg, lon0_deg, h0_m);
    let (dx, dy, dz) = (x - x0, y - y0, z - z0);
    let r = enu_rotation(lat0_deg, lon0_deg);
    (
        r[0][0] * dx + r[0][1] * dy + r[0][2] * dz,
        r[1][0] * dx + r[1][1] * dy + r[1][2] * dz,
        r[2][0] * dx + r[2][1] * dy + r[2][2] * dz,
    )
}

/// Local east/north/up back to ECEF; the rotation is orthonormal so its
/// inverse is the transpose.
pub fn enu_to_ecef(
    e: f64,
    n: f64,
    u: f64,
    lat0_deg: f64,
    lon0_deg: f64,
    h0_m: f64,
) -> (f64, f64, f64) {
    let (x0, y0, z0) = lla_to_ecef(lat0_deg, lon0_deg, h0_m);
    let r = enu_rotation(lat0_deg, lon0_deg);
    (
        x0 + r[0][0] * e + r[1][0] * n + r[2][0] * u,
        y0 + r[0][1] * e + r[1][1] * n + r[2][1] * u,
        z0 + r[0][2] * e + r[1][2] * n + r[2][2] * u,
    )
}

/// GNSS azimuth (0 = North, clockwise) from a mathematical ENU angle
/// (0 = East, counter-clockwise), and back. The mapping is an involution.
pub fn heading_enu_to_gnss(heading_enu_deg: f64) -> f64 {
    (90.0 - heading_enu_deg).rem_euclid(360.0)
}

pub fn heading_gnss_to_enu(heading_gnss_deg: f64) -> f64 {
    (90.0 - heading_gnss_deg).rem_euclid(360.0)
}
