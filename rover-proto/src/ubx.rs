//! UBX frame construction and the packet decoders the stack consumes.

use bitflags::bitflags;

use crate::checksum::fletcher8;
use crate::error::DecodeError;

pub const SYNC_CHAR_1: u8 = 0xB5;
pub const SYNC_CHAR_2: u8 = 0x62;

pub const CLS_NAV: u8 = 0x01;
pub const ID_NAV_PVAT: u8 = 0x17;
pub const CLS_ESF: u8 = 0x10;
pub const ID_ESF_MEAS: u8 = 0x02;
pub const ID_ESF_RAW: u8 = 0x03;

/// Builds a complete UBX frame around `payload`.
pub fn frame(class: u8, id: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + payload.len());
    out.extend_from_slice(&[SYNC_CHAR_1, SYNC_CHAR_2, class, id]);
    out.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    out.extend_from_slice(payload);
    let (ck_a, ck_b) = fletcher8(&out[2..]);
    out.push(ck_a);
    out.push(ck_b);
    out
}

/// Splits a validated frame into `(class, id, payload)`.
pub fn split(frame: &[u8]) -> Result<(u8, u8, &[u8]), DecodeError> {
    if frame.len() < 8 || frame[0] != SYNC_CHAR_1 || frame[1] != SYNC_CHAR_2 {
        return Err(DecodeError::InvalidField {
            what: "ubx frame",
            field: "sync",
        });
    }
    let len = usize::from(u16::from_le_bytes([frame[4], frame[5]]));
    if frame.len() != len + 8 {
        return Err(DecodeError::InvalidLength {
            what: "ubx frame",
            expect: len + 8,
            got: frame.len(),
        });
    }
    Ok((frame[2], frame[3], &frame[6..6 + len]))
}

bitflags! {
    /// NAV-PVAT `flags` bitfield. The carrier solution occupies bits 7..6
    /// and is decoded separately as [`CarrierSolution`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PvatFlags: u8 {
        const GNSS_FIX_OK = 1 << 0;
        const DIFF_SOLN = 1 << 1;
        const VEH_ROLL_VALID = 1 << 3;
        const VEH_PITCH_VALID = 1 << 4;
        const VEH_HEADING_VALID = 1 << 5;
    }
}

/// RTK carrier-phase solution status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CarrierSolution {
    NoSolution,
    Float,
    Fixed,
    Reserved,
}

impl CarrierSolution {
    fn from_flags(flags: u8) -> Self {
        match (flags >> 6) & 0b11 {
            0 => CarrierSolution::NoSolution,
            1 => CarrierSolution::Float,
            2 => CarrierSolution::Fixed,
            _ => CarrierSolution::Reserved,
        }
    }

    pub fn is_fixed(self) -> bool {
        matches!(self, CarrierSolution::Fixed)
    }
}

pub const NAV_PVAT_PAYLOAD_LEN: usize = 116;

/// Navigation position/velocity/attitude/time solution (NAV-PVAT), decoded
/// and scaled into SI units and degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NavPvat {
    pub itow_ms: u32,
    pub version: u8,
    pub valid: u8,
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub min: u8,
    pub sec: u8,
    pub t_acc_ns: u32,
    pub nano_ns: i32,
    pub fix_type: u8,
    pub flags: PvatFlags,
    pub carr_soln: CarrierSolution,
    pub flags2: u8,
    pub num_sv: u8,
    pub lon_deg: f64,
    pub lat_deg: f64,
    pub height_m: f64,
    pub h_msl_m: f64,
    pub h_acc_m: f64,
    pub v_acc_m: f64,
    pub vel_n_mps: f64,
    pub vel_e_mps: f64,
    pub vel_d_mps: f64,
    pub g_speed_mps: f64,
    pub s_acc_mps: f64,
    pub veh_roll_deg: f64,
    pub veh_pitch_deg: f64,
    pub veh_heading_deg: f64,
    pub mot_heading_deg: f64,
    pub acc_roll_deg: f64,
    pub acc_pitch_deg: f64,
    pub acc_heading_deg: f64,
    pub mag_dec_deg: f64,
    pub mag_acc_deg: f64,
    pub err_ellipse_orient_raw: u16,
    pub err_ellipse_major_mm: u32,
    pub err_ellipse_minor_mm: u32,
}

impl NavPvat {
    /// Decodes a 116-byte NAV-PVAT payload, scaling raw integer fields by
    /// their documented factors.
    pub fn parse(payload: &[u8]) -> Result<Self, DecodeError> {
        if payload.len() != NAV_PVAT_PAYLOAD_LEN {
            return Err(DecodeError::InvalidLength {
                what: "nav-pvat",
                expect: NAV_PVAT_PAYLOAD_LEN,
                got: payload.len(),
            });
        }
        let flags_raw = payload[25];
        Ok(Self {
            itow_ms: u32_at(payload, 0),
            version: payload[4],
            valid: payload[5],
            year: u16_at(payload, 6),
            month: payload[8],
            day: payload[9],
            hour: payload[10],
            min: payload[11],
            sec: payload[12],
            t_acc_ns: u32_at(payload, 16),
            nano_ns: i32_at(payload, 20),
            fix_type: payload[24],
            flags: PvatFlags::from_bits_truncate(flags_raw),
            carr_soln: CarrierSolution::from_flags(flags_raw),
            flags2: payload[26],
            num_sv: payload[27],
            lon_deg: f64::from(i32_at(payload, 28)) * 1e-7,
            lat_deg: f64::from(i32_at(payload, 32)) * 1e-7,
            height_m: f64::from(i32_at(payload, 36)) * 1e-3,
            h_msl_m: f64::from(i32_at(payload, 40)) * 1e-3,
            h_acc_m: f64::from(u32_at(payload, 44)) * 1e-3,
            v_acc_m: f64::from(u32_at(payload, 48)) * 1e-3,
            vel_n_mps: f64::from(i32_at(payload, 52)) * 1e-3,
            vel_e_mps: f64::from(i32_at(payload, 56)) * 1e-3,
            vel_d_mps: f64::from(i32_at(payload, 60)) * 1e-3,
            g_speed_mps: f64::from(i32_at(payload, 64)) * 1e-3,
            s_acc_mps: f64::from(u32_at(payload, 68)) * 1e-3,
            veh_roll_deg: f64::from(i32_at(payload, 72)) * 1e-5,
            veh_pitch_deg: f64::from(i32_at(payload, 76)) * 1e-5,
            veh_heading_deg: f64::from(i32_at(payload, 80)) * 1e-5,
            mot_heading_deg: f64::from(i32_at(payload, 84)) * 1e-5,
            acc_roll_deg: f64::from(u16_at(payload, 88)) * 1e-2,
            acc_pitch_deg: f64::from(u16_at(payload, 90)) * 1e-2,
            acc_heading_deg: f64::from(u16_at(payload, 92)) * 1e-2,
            mag_dec_deg: f64::from(i16_at(payload, 94)) * 1e-2,
            mag_acc_deg: f64::from(u16_at(payload, 96)) * 1e-2,
            err_ellipse_orient_raw: u16_at(payload, 98),
            err_ellipse_major_mm: u32_at(payload, 100),
            err_ellipse_minor_mm: u32_at(payload, 104),
        })
    }

    /// True when the receiver claims a usable position fix.
    pub fn fix_ok(&self) -> bool {
        self.flags.contains(PvatFlags::GNSS_FIX_OK)
    }

    /// True when dead reckoning contributes to the solution.
    pub fn dr_used(&self) -> bool {
        // 4 = GNSS + dead reckoning combined, 1 = dead reckoning only.
        self.fix_type == 4 || self.fix_type == 1
    }
}

/// Raw IMU sample set from ESF-RAW, scaled into physical units.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EsfRaw {
    pub gyro_x_dps: f64,
    pub gyro_y_dps: f64,
    pub gyro_z_dps: f64,
    pub acc_x_mps2: f64,
    pub acc_y_mps2: f64,
    pub acc_z_mps2: f64,
    pub gyro_temp_c: f64,
    /// Sensor time tag of the last measurement slot.
    pub s_ttag: u32,
}

impl EsfRaw {
    /// Decodes an ESF-RAW payload: `[4 B reserved][N x (4 B data + 4 B sTtag)]`.
    ///
    /// Measurement slots carry a sensor-type index in the top byte and a
    /// sign-extended 24-bit data field. Unknown sensor types are skipped.
    pub fn parse(payload: &[u8]) -> Result<Self, DecodeError> {
        if payload.len() < 12 {
            return Err(DecodeError::Truncated { what: "esf-raw" });
        }
        let n = (payload.len() - 4) / 8;
        let mut raw = EsfRaw::default();
        for i in 0..n {
            let off = 4 + i * 8;
            let word = u32_at(payload, off);
            let mut data = (word & 0x00FF_FFFF) as i32;
            if data & 0x0080_0000 != 0 {
                data -= 1 << 24;
            }
            let value = f64::from(data);
            raw.s_ttag = u32_at(payload, off + 4);
            match (word >> 24) as u8 {
                14 => raw.gyro_x_dps = value / 4096.0,
                13 => raw.gyro_y_dps = value / 4096.0,
                5 => raw.gyro_z_dps = value / 4096.0,
                16 => raw.acc_x_mps2 = value / 1024.0,
                17 => raw.acc_y_mps2 = value / 1024.0,
                18 => raw.acc_z_mps2 = value / 1024.0,
                12 => raw.gyro_temp_c = value / 100.0,
                _ => {},
            }
        }
        Ok(raw)
    }
}

fn esf_meas_word(data_field: u32, data_type: u32) -> u32 {
    (data_field & 0x00FF_FFFF) | ((data_type & 0x3F) << 24)
}

/// Builds an ESF-MEAS frame carrying left/right wheel-tick measurements
/// (sensor types 8 and 9; 23-bit tick count plus direction bit 23).
pub fn esf_meas_wheel_ticks(
    time_tag: u32,
    left_ticks: u32,
    left_backward: bool,
    right_ticks: u32,
    right_backward: bool,
) -> Vec<u8> {
    let num_meas: u16 = 2;
    let mut payload = Vec::with_capacity(16);
    payload.extend_from_slice(&time_tag.to_le_bytes());
    payload.extend_from_slice(&(num_meas << 11).to_le_bytes());
    payload.extend_from_slice(&0u16.to_le_bytes());
    let pack = |ticks: u32, backward: bool| (ticks & 0x007F_FFFF) | (u32::from(backward) << 23);
    payload.extend_from_slice(&esf_meas_word(pack(left_ticks, left_backward), 8).to_le_bytes());
    payload.extend_from_slice(&esf_meas_word(pack(right_ticks, right_backward), 9).to_le_bytes());
    frame(CLS_ESF, ID_ESF_MEAS, &payload)
}

/// Builds an ESF-MEAS frame with a single signed speed measurement in mm/s
/// (sensor type 11).
pub fn esf_meas_speed(time_tag: u32, speed_mm_s: i32) -> Result<Vec<u8>, DecodeError> {
    if !(-(1 << 23)..=(1 << 23) - 1).contains(&speed_mm_s) {
        return Err(DecodeError::InvalidField {
            what: "esf-meas",
            field: "speed",
        });
    }
    let num_meas: u16 = 1;
    let mut payload = Vec::with_capacity(12);
    payload.extend_from_slice(&time_tag.to_le_bytes());
    payload.extend_from_slice(&(num_meas << 11).to_le_bytes());
    payload.extend_from_slice(&0u16.to_le_bytes());
    payload.extend_from_slice(&esf_meas_word(speed_mm_s as u32, 11).to_le_bytes());
    Ok(frame(CLS_ESF, ID_ESF_MEAS, &payload))
}

fn u16_at(p: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([p[off], p[off + 1]])
}

fn i16_at(p: &[u8], off: usize) -> i16 {
    i16::from_le_bytes([p[off], p[off + 1]])
}

fn u32_at(p: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([p[off], p[off + 1], p[off + 2], p[off + 3]])
}

fn i32_at(p: &[u8], off: usize) -> i32 {
    i32::from_le_bytes([p[off], p[off + 1], p[off + 2], p[off + 3]])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_and_split_round_trip() {
        let f = frame(0x01, 0x17, &[1, 2, 3, 4]);
        assert_eq!(f.len(), 12);
        let (class, id, payload) = split(&f).unwrap();
        assert_eq!((class, id), (0x01, 0x17));
        assert_eq!(payload, &[1, 2, 3, 4]);
    }

    #[test]
    fn split_rejects_length_mismatch() {
        let mut f = frame(0x01, 0x17, &[1, 2, 3, 4]);
        f.pop();
        assert!(matches!(
            split(&f),
            Err(DecodeError::InvalidLength { .. })
        ));
    }

    fn pvat_payload() -> Vec<u8> {
        let mut p = vec![0u8; NAV_PVAT_PAYLOAD_LEN];
        p[0..4].copy_from_slice(&123_456u32.to_le_bytes()); // iTOW
        p[24] = 3; // fixType: 3D
        p[25] = 0b1010_0011; // fixOK, diffSoln, headingValid, carrSoln=fix
        p[27] = 18; // numSV
        p[28..32].copy_from_slice(&140_000_000i32.to_le_bytes()); // lon 14 deg
        p[32..36].copy_from_slice(&500_000_000i32.to_le_bytes()); // lat 50 deg
        p[44..48].copy_from_slice(&42u32.to_le_bytes()); // hAcc 42 mm
        p[64..68].copy_from_slice(&1_500i32.to_le_bytes()); // gSpeed 1.5 m/s
        p[80..84].copy_from_slice(&9_000_000i32.to_le_bytes()); // vehHeading 90 deg
        p[92..94].copy_from_slice(&250u16.to_le_bytes()); // accHeading 2.5 deg
        p
    }

    #[test]
    fn nav_pvat_decodes_and_scales() {
        let pvat = NavPvat::parse(&pvat_payload()).unwrap();
        assert_eq!(pvat.itow_ms, 123_456);
        assert_eq!(pvat.fix_type, 3);
        assert!(pvat.fix_ok());
        assert!(pvat.flags.contains(PvatFlags::DIFF_SOLN));
        assert!(pvat.flags.contains(PvatFlags::VEH_HEADING_VALID));
        assert!(pvat.carr_soln.is_fixed());
        assert_eq!(pvat.num_sv, 18);
        assert!((pvat.lon_deg - 14.0).abs() < 1e-9);
        assert!((pvat.lat_deg - 50.0).abs() < 1e-9);
        assert!((pvat.h_acc_m - 0.042).abs() < 1e-9);
        assert!((pvat.g_speed_mps - 1.5).abs() < 1e-9);
        assert!((pvat.veh_heading_deg - 90.0).abs() < 1e-9);
        assert!((pvat.acc_heading_deg - 2.5).abs() < 1e-9);
    }

    #[test]
    fn nav_pvat_rejects_wrong_length() {
        assert!(matches!(
            NavPvat::parse(&[0u8; 92]),
            Err(DecodeError::InvalidLength { .. })
        ));
    }

    #[test]
    fn esf_raw_sign_extends_and_scales() {
        let mut payload = vec![0u8; 4 + 2 * 8];
        // gyroZ (type 5): -4096 raw -> -1.0 deg/s, sign-extended from 24 bits
        let word = ((-4096i32 as u32) & 0x00FF_FFFF) | (5 << 24);
        payload[4..8].copy_from_slice(&word.to_le_bytes());
        payload[8..12].copy_from_slice(&777u32.to_le_bytes());
        // accX (type 16): 2048 raw -> 2.0 m/s^2
        let word = 2048u32 | (16 << 24);
        payload[12..16].copy_from_slice(&word.to_le_bytes());
        payload[16..20].copy_from_slice(&778u32.to_le_bytes());

        let raw = EsfRaw::parse(&payload).unwrap();
        assert!((raw.gyro_z_dps + 1.0).abs() < 1e-12);
        assert!((raw.acc_x_mps2 - 2.0).abs() < 1e-12);
        assert_eq!(raw.s_ttag, 778);
    }

    #[test]
    fn esf_meas_wheel_ticks_layout() {
        let f = esf_meas_wheel_ticks(0x19BA_73A4, 0x11E1, false, 0x13DF, true);
        let (class, id, payload) = split(&f).unwrap();
        assert_eq!((class, id), (CLS_ESF, ID_ESF_MEAS));
        assert_eq!(payload.len(), 16);
        assert_eq!(u32_at(payload, 0), 0x19BA_73A4);
        assert_eq!(u16_at(payload, 4), 2 << 11);
        let left = u32_at(payload, 8);
        assert_eq!(left >> 24, 8);
        assert_eq!(left & 0x007F_FFFF, 0x11E1);
        assert_eq!((left >> 23) & 1, 0);
        let right = u32_at(payload, 12);
        assert_eq!(right >> 24, 9);
        assert_eq!((right >> 23) & 1, 1);
    }

    #[test]
    fn esf_meas_speed_rejects_out_of_range() {
        assert!(esf_meas_speed(0, 1 << 23).is_err());
        let f = esf_meas_speed(1000, -250).unwrap();
        let (_, _, payload) = split(&f).unwrap();
        let word = u32_at(payload, 8);
        assert_eq!(word >> 24, 11);
        let mut data = (word & 0x00FF_FFFF) as i32;
        if data & 0x0080_0000 != 0 {
            data -= 1 << 24;
        }
        assert_eq!(data, -250);
    }
}
