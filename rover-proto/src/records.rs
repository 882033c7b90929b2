//! Binary records exchanged between services over loopback TCP.

use crate::error::DecodeError;

/// Fused 2D navigation state for the pilot, wire version 2.
///
/// Little-endian layout:
///
/// ```text
/// u8  version      must be 2
/// f64 ts_mono      monotonic timestamp [s]
/// f64 lat          WGS84 [deg]
/// f64 lon          WGS84 [deg]
/// f32 h_acc        horizontal accuracy [m]
/// f32 heading      [deg, 0=N cw]
/// f32 heading_acc  [deg]
/// f32 speed        [m/s]
/// f32 s_acc        [m/s]
/// f32 gyro_z       [deg/s]
/// f32 gyro_z_acc   [deg/s]
/// u8  gnss_fix_ok  0/1
/// u8  dr_used      0/1
/// f32 veh_heading  [deg] (debug)
/// f32 mot_heading  [deg] (debug)
/// f32 last_gyro_z  [deg/s] (debug)
/// f32 g_speed      [m/s] (debug)
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NavFusion {
    pub ts_mono: f64,
    pub lat: f64,
    pub lon: f64,
    pub h_acc: f32,
    pub heading: f32,
    pub heading_acc: f32,
    pub speed: f32,
    pub s_acc: f32,
    pub gyro_z: f32,
    pub gyro_z_acc: f32,
    pub gnss_fix_ok: bool,
    pub dr_used: bool,
    pub veh_heading: f32,
    pub mot_heading: f32,
    pub last_gyro_z: f32,
    pub g_speed: f32,
}

impl NavFusion {
    pub const VERSION: u8 = 2;
    pub const SIZE: usize = 71;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        let mut w = Writer::new(&mut out);
        w.u8(Self::VERSION);
        w.f64(self.ts_mono);
        w.f64(self.lat);
        w.f64(self.lon);
        w.f32(self.h_acc);
        w.f32(self.heading);
        w.f32(self.heading_acc);
        w.f32(self.speed);
        w.f32(self.s_acc);
        w.f32(self.gyro_z);
        w.f32(self.gyro_z_acc);
        w.u8(u8::from(self.gnss_fix_ok));
        w.u8(u8::from(self.dr_used));
        w.f32(self.veh_heading);
        w.f32(self.mot_heading);
        w.f32(self.last_gyro_z);
        w.f32(self.g_speed);
        out
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, DecodeError> {
        if data.len() != Self::SIZE {
            return Err(DecodeError::InvalidLength {
                what: "nav-fusion record",
                expect: Self::SIZE,
                got: data.len(),
            });
        }
        let mut r = Reader::new(data);
        let version = r.u8();
        if version != Self::VERSION {
            return Err(DecodeError::InvalidVersion {
                what: "nav-fusion record",
                expect: Self::VERSION,
                got: version,
            });
        }
        Ok(Self {
            ts_mono: r.f64(),
            lat: r.f64(),
            lon: r.f64(),
            h_acc: r.f32(),
            heading: r.f32(),
            heading_acc: r.f32(),
            speed: r.f32(),
            s_acc: r.f32(),
            gyro_z: r.f32(),
            gyro_z_acc: r.f32(),
            gnss_fix_ok: r.u8() != 0,
            dr_used: r.u8() != 0,
            veh_heading: r.f32(),
            mot_heading: r.f32(),
            last_gyro_z: r.f32(),
            g_speed: r.f32(),
        })
    }
}

/// A corridor constraint attached to a waypoint: an admissible azimuth and
/// the corridor width around it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Corridor {
    pub azimuth_deg: f32,
    pub width_m: f32,
}

/// One waypoint of a precomputed route.
#[derive(Debug, Clone, PartialEq)]
pub struct Waypoint {
    pub lat: f64,
    pub lon: f64,
    /// Typically 1/radius [1/m] of the path at this point.
    pub curvature: f32,
    /// Path width toward the next waypoint [m].
    pub path_width_m: f32,
    /// Relative azimuth toward the next waypoint [-180, 180] deg.
    pub rel_azimuth_deg: f32,
    pub corridors: Vec<Corridor>,
}

/// A route as a list of waypoints, wire version 1.
///
/// Header `u8 version, u16 count`, then per waypoint
/// `f64 lat, f64 lon, f32 curvature, f32 path_width, f32 rel_azimuth,
/// u8 corridor_count` followed by `f32 azimuth, f32 width` per corridor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Route {
    pub waypoints: Vec<Waypoint>,
}

impl Route {
    pub const VERSION: u8 = 1;

    pub fn to_bytes(&self) -> Result<Vec<u8>, DecodeError> {
        if self.waypoints.len() > usize::from(u16::MAX) {
            return Err(DecodeError::InvalidField {
                what: "route",
                field: "waypoint count",
            });
        }
        let mut out = Vec::with_capacity(3 + self.waypoints.len() * 29);
        out.push(Self::VERSION);
        out.extend_from_slice(&(self.waypoints.len() as u16).to_le_bytes());
        for wp in &self.waypoints {
            if wp.corridors.len() > usize::from(u8::MAX) {
                return Err(DecodeError::InvalidField {
                    what: "route",
                    field: "corridor count",
                });
            }
            out.extend_from_slice(&wp.lat.to_le_bytes());
            out.extend_from_slice(&wp.lon.to_le_bytes());
            out.extend_from_slice(&wp.curvature.to_le_bytes());
            out.extend_from_slice(&wp.path_width_m.to_le_bytes());
            out.extend_from_slice(&wp.rel_azimuth_deg.to_le_bytes());
            out.push(wp.corridors.len() as u8);
            for c in &wp.corridors {
                out.extend_from_slice(&c.azimuth_deg.to_le_bytes());
                out.extend_from_slice(&c.width_m.to_le_bytes());
            }
        }
        Ok(out)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, DecodeError> {
        if data.len() < 3 {
            return Err(DecodeError::Truncated { what: "route" });
        }
        if data[0] != Self::VERSION {
            return Err(DecodeError::InvalidVersion {
                what: "route",
                expect: Self::VERSION,
                got: data[0],
            });
        }
        let count = usize::from(u16::from_le_bytes([data[1], data[2]]));
        let mut r = Reader::new(&data[3..]);
        let mut waypoints = Vec::with_capacity(count);
        for _ in 0..count {
            if r.remaining() < 29 {
                return Err(DecodeError::Truncated { what: "route" });
            }
            let lat = r.f64();
            let lon = r.f64();
            let curvature = r.f32();
            let path_width_m = r.f32();
            let rel_azimuth_deg = r.f32();
            let corridor_count = usize::from(r.u8());
            if r.remaining() < corridor_count * 8 {
                return Err(DecodeError::Truncated { what: "route" });
            }
            let mut corridors = Vec::with_capacity(corridor_count);
            for _ in 0..corridor_count {
                corridors.push(Corridor {
                    azimuth_deg: r.f32(),
                    width_m: r.f32(),
                });
            }
            waypoints.push(Waypoint {
                lat,
                lon,
                curvature,
                path_width_m,
                rel_azimuth_deg,
                corridors,
            });
        }
        if r.remaining() != 0 {
            return Err(DecodeError::InvalidLength {
                what: "route",
                expect: data.len() - r.remaining(),
                got: data.len(),
            });
        }
        Ok(Self { waypoints })
    }
}

struct Writer<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> Writer<'a> {
    fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn put(&mut self, bytes: &[u8]) {
        self.buf[self.pos..self.pos + bytes.len()].copy_from_slice(bytes);
        self.pos += bytes.len();
    }

    fn u8(&mut self, v: u8) {
        self.put(&[v]);
    }

    fn f32(&mut self, v: f32) {
        self.put(&v.to_le_bytes());
    }

    fn f64(&mut self, v: f64) {
        self.put(&v.to_le_bytes());
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(&self.buf[self.pos..self.pos + N]);
        self.pos += N;
        out
    }

    fn u8(&mut self) -> u8 {
        self.take::<1>()[0]
    }

    fn f32(&mut self) -> f32 {
        f32::from_le_bytes(self.take())
    }

    fn f64(&mut self) -> f64 {
        f64::from_le_bytes(self.take())
    }
}
