//! Motor-controller command frames, sentence decoding and parameter
//! encodings.
//!
//! Commands travel as 13-byte binary frames in which the command and its
//! four parameters are repeated; the firmware treats the repetition as an
//! integrity check. Telemetry and acknowledgements come back as ASCII
//! sentences whose first comma-separated field is the message code
//! (`IAM`, `INM`, `ODM`, ...).

use crate::checksum::xor8;
use crate::error::{DecodeError, ParamError};

pub const STX: u8 = 0xFB;
pub const MTX: u8 = 0xFC;
pub const ETX: u8 = 0xFD;

/// Commands and parameters live in `0..=250`; 251..255 are framing bytes.
pub const PARAM_MAX: u8 = 250;

pub const COMMAND_FRAME_LEN: usize = 13;

/// Firmware command numbers.
pub const CMD_HALT: u8 = 0;
pub const CMD_MOTORS_STOP: u8 = 1;
pub const CMD_MOTORS_START: u8 = 2;
pub const CMD_POWER_OFF: u8 = 3;
pub const CMD_DRIVE: u8 = 4;
pub const CMD_BRAKE: u8 = 5;
pub const CMD_ECHO_TEST: u8 = 50;
pub const CMD_PWM: u8 = 101;

/// Key identifying a command by content; ACK/NACK replies echo it back.
pub type CmdKey = (u8, u8, u8, u8, u8);

/// Builds the 13-byte command frame
/// `STX cmd p1 p2 p3 p4 MTX cmd p1 p2 p3 p4 ETX`.
pub fn command_frame(
    cmd: u8,
    p1: u8,
    p2: u8,
    p3: u8,
    p4: u8,
) -> Result<[u8; COMMAND_FRAME_LEN], ParamError> {
    for v in [cmd, p1, p2, p3, p4] {
        if v > PARAM_MAX {
            return Err(ParamError {
                value: i64::from(v),
            });
        }
    }
    Ok([STX, cmd, p1, p2, p3, p4, MTX, cmd, p1, p2, p3, p4, ETX])
}

const BASE: u32 = 251;
const BASE2: u32 = BASE * BASE;
const BASE3: u32 = BASE2 * BASE;
const BASE4_MOD: u64 = (BASE as u64) * (BASE as u64) * (BASE as u64) * (BASE as u64);

/// Encodes a 32-bit value (modulo 251^4) as four base-251 digits, low digit
/// first, each in `0..=250`. Used to stamp a microsecond timestamp into
/// `p1..p4` so the firmware echo carries the send time back.
pub fn base251_encode(value: u32) -> [u8; 4] {
    let mut v = (u64::from(value) % BASE4_MOD) as u32;
    let mut digits = [0u8; 4];
    for d in digits.iter_mut() {
        *d = (v % BASE) as u8;
        v /= BASE;
    }
    digits
}

/// Inverse of [`base251_encode`].
pub fn base251_decode(digits: [u8; 4]) -> Result<u32, ParamError> {
    for d in digits {
        if d > PARAM_MAX {
            return Err(ParamError {
                value: i64::from(d),
            });
        }
    }
    let [d0, d1, d2, d3] = digits.map(u32::from);
    Ok(d0 + d1 * BASE + d2 * BASE2 + d3 * BASE3)
}

/// Maps a wheel speed `v` in `[-50, 200]` onto a single parameter `v + 50`.
pub fn encode_speed(v: i32) -> Result<u8, ParamError> {
    let p = v + 50;
    if (0..=i32::from(PARAM_MAX)).contains(&p) {
        Ok(p as u8)
    } else {
        Err(ParamError {
            value: i64::from(v),
        })
    }
}

/// Maps a PWM value `d` in `[-125, 375]` onto two parameters.
///
/// `d <= 0` -> `(0, d + 125)`; `0 < d <= 250` -> `(d, 125)`;
/// `d > 250` -> `(250, d - 125)`.
pub fn encode_pwm(d: i32) -> Result<(u8, u8), ParamError> {
    if !(-125..=375).contains(&d) {
        return Err(ParamError {
            value: i64::from(d),
        });
    }
    let (p1, p2) = if d <= 0 {
        (0, d + 125)
    } else if d <= 250 {
        (d, 125)
    } else {
        (250, d - 125)
    };
    Ok((p1 as u8, p2 as u8))
}

/// A validated sentence split into its code and comma-separated fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sentence {
    pub code: String,
    pub fields: Vec<String>,
}

/// Parses `$<code>,<fields...>*XX\r\n`, re-verifying the XOR-8 checksum.
pub fn parse_sentence(frame: &[u8]) -> Result<Sentence, DecodeError> {
    let frame = frame
        .strip_suffix(b"\r\n")
        .or_else(|| frame.strip_suffix(b"\n"))
        .unwrap_or(frame);
    let body = frame.strip_prefix(b"$").ok_or(DecodeError::InvalidField {
        what: "sentence",
        field: "start",
    })?;
    let star = body
        .iter()
        .rposition(|b| *b == b'*')
        .ok_or(DecodeError::InvalidField {
            what: "sentence",
            field: "checksum delimiter",
        })?;
    let (payload, cs_part) = (&body[..star], &body[star + 1..]);
    let cs_hex = core::str::from_utf8(cs_part)
        .ok()
        .filter(|s| s.len() == 2)
        .ok_or(DecodeError::InvalidField {
            what: "sentence",
            field: "checksum",
        })?;
    let expect = u8::from_str_radix(cs_hex, 16).map_err(|_| DecodeError::InvalidField {
        what: "sentence",
        field: "checksum",
    })?;
    if xor8(payload) != expect {
        return Err(DecodeError::InvalidField {
            what: "sentence",
            field: "checksum",
        });
    }
    let text = core::str::from_utf8(payload).map_err(|_| DecodeError::InvalidField {
        what: "sentence",
        field: "payload",
    })?;
    let mut parts = text.split(',');
    let code = parts.next().unwrap_or_default().to_string();
    Ok(Sentence {
        code,
        fields: parts.map(str::to_string).collect(),
    })
}

/// Extracts the routing code of an ASCII frame without a full parse: the
/// characters between the start delimiter and the first `,` or `*`.
pub fn routing_code(frame: &[u8]) -> Option<&str> {
    let body = match frame.first() {
        Some(&b'$') | Some(&b'#') => &frame[1..],
        _ => return None,
    };
    let end = body
        .iter()
        .position(|b| *b == b',' || *b == b'*')
        .unwrap_or(body.len());
    core::str::from_utf8(&body[..end]).ok()
}

/// Decoded `IAM` (ACK) or `INM` (NACK) reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckReply {
    pub is_ack: bool,
    pub cmd: u8,
    pub p1: u8,
    pub p2: u8,
    pub p3: u8,
    pub p4: u8,
    /// NACK only: input-quality error class reported by the firmware.
    pub input_err: u8,
    /// NACK only: command/parameter error class.
    pub cmd_err: u8,
}

impl AckReply {
    pub fn key(&self) -> CmdKey {
        (self.cmd, self.p1, self.p2, self.p3, self.p4)
    }

    /// Decodes `IAM,cmd,p1,p2,p3,p4` or `INM,cmd,p1,p2,p3,p4,ie,ce`.
    pub fn from_sentence(s: &Sentence) -> Result<Self, DecodeError> {
        let (is_ack, expect_fields) = match s.code.as_str() {
            "IAM" => (true, 5),
            "INM" => (false, 7),
            _ => {
                return Err(DecodeError::InvalidField {
                    what: "ack reply",
                    field: "code",
                })
            },
        };
        if s.fields.len() != expect_fields {
            return Err(DecodeError::InvalidLength {
                what: "ack reply",
                expect: expect_fields,
                got: s.fields.len(),
            });
        }
        let mut nums = [0u8; 7];
        for (slot, field) in nums.iter_mut().zip(&s.fields) {
            *slot = field.parse().map_err(|_| DecodeError::InvalidField {
                what: "ack reply",
                field: "param",
            })?;
        }
        Ok(Self {
            is_ack,
            cmd: nums[0],
            p1: nums[1],
            p2: nums[2],
            p3: nums[3],
            p4: nums[4],
            input_err: nums[5],
            cmd_err: nums[6],
        })
    }
}

/// Odometry telemetry from an `ODM` sentence:
/// `ODM,<ts_ms>,<gyroZ_raw>,<accum_angle_raw>,<left_mm_s>,<right_mm_s>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Odm {
    pub ts_mono_ms: u32,
    pub gyro_z_raw: i16,
    pub accum_angle_raw: i32,
    pub left_mm_s: i16,
    pub right_mm_s: i16,
}

pub const ODM_RECORD_VERSION: u8 = 1;
pub const ODM_RECORD_SIZE: usize = 15;

impl Odm {
    pub fn from_sentence(s: &Sentence) -> Result<Self, DecodeError> {
        if s.code != "ODM" {
            return Err(DecodeError::InvalidField {
                what: "odm",
                field: "code",
            });
        }
        if s.fields.len() != 5 {
            return Err(DecodeError::InvalidLength {
                what: "odm",
                expect: 5,
                got: s.fields.len(),
            });
        }
        Self::from_fields(&s.fields)
    }

    /// Parses the bare comma-separated form forwarded between services.
    pub fn from_line(line: &str) -> Result<Self, DecodeError> {
        let fields: Vec<String> = line.trim().split(',').map(str::to_string).collect();
        if fields.len() != 5 {
            return Err(DecodeError::InvalidLength {
                what: "odm",
                expect: 5,
                got: fields.len(),
            });
        }
        Self::from_fields(&fields)
    }

    fn from_fields(fields: &[String]) -> Result<Self, DecodeError> {
        fn num<T: core::str::FromStr>(s: &str) -> Result<T, DecodeError> {
            s.trim().parse().map_err(|_| DecodeError::InvalidField {
                what: "odm",
                field: "value",
            })
        }
        Ok(Self {
            ts_mono_ms: num(&fields[0])?,
            gyro_z_raw: num(&fields[1])?,
            accum_angle_raw: num(&fields[2])?,
            left_mm_s: num(&fields[3])?,
            right_mm_s: num(&fields[4])?,
        })
    }

    /// The bare comma-separated form, without delimiters or checksum.
    pub fn to_line(&self) -> String {
        format!(
            "{},{},{},{},{}",
            self.ts_mono_ms, self.gyro_z_raw, self.accum_angle_raw, self.left_mm_s, self.right_mm_s
        )
    }

    /// 15-byte little-endian record, version 1.
    pub fn to_bytes(&self) -> [u8; ODM_RECORD_SIZE] {
        let mut out = [0u8; ODM_RECORD_SIZE];
        out[0] = ODM_RECORD_VERSION;
        out[1..5].copy_from_slice(&self.ts_mono_ms.to_le_bytes());
        out[5..7].copy_from_slice(&self.gyro_z_raw.to_le_bytes());
        out[7..11].copy_from_slice(&self.accum_angle_raw.to_le_bytes());
        out[11..13].copy_from_slice(&self.left_mm_s.to_le_bytes());
        out[13..15].copy_from_slice(&self.right_mm_s.to_le_bytes());
        out
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, DecodeError> {
        if data.len() != ODM_RECORD_SIZE {
            return Err(DecodeError::InvalidLength {
                what: "odm record",
                expect: ODM_RECORD_SIZE,
                got: data.len(),
            });
        }
        if data[0] != ODM_RECORD_VERSION {
            return Err(DecodeError::InvalidVersion {
                what: "odm record",
                expect: ODM_RECORD_VERSION,
                got: data[0],
            });
        }
        Ok(Self {
            ts_mono_ms: u32::from_le_bytes([data[1], data[2], data[3], data[4]]),
            gyro_z_raw: i16::from_le_bytes([data[5], data[6]]),
            accum_angle_raw: i32::from_le_bytes([data[7], data[8], data[9], data[10]]),
            left_mm_s: i16::from_le_bytes([data[11], data[12]]),
            right_mm_s: i16::from_le_bytes([data[13], data[14]]),
        })
    }
}

/// Builds an outgoing sentence `$<payload>*XX\r\n` around an ASCII payload.
pub fn sentence_frame(payload: &str) -> Vec<u8> {
    let mut out = vec![b'$'];
    out.extend_from_slice(payload.as_bytes());
    out.extend_from_slice(format!("*{:02X}\r\n", xor8(payload.as_bytes())).as_bytes());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_frame_layout() {
        let f = command_frame(101, 120, 125, 0, 250).unwrap();
        assert_eq!(f[0], STX);
        assert_eq!(f[6], MTX);
        assert_eq!(f[12], ETX);
        assert_eq!(&f[1..6], &f[7..12]);
        assert_eq!(&f[1..6], &[101, 120, 125, 0, 250]);
    }

    #[test]
    fn command_frame_rejects_framing_values() {
        assert!(command_frame(251, 0, 0, 0, 0).is_err());
        assert!(command_frame(4, 0, 255, 0, 0).is_err());
    }

    #[test]
    fn base251_round_trip() {
        for v in [0u32, 1, 250, 251, 65_535, 1_000_000, 3_969_126_000] {
            let digits = base251_encode(v);
            assert!(digits.iter().all(|d| *d <= PARAM_MAX));
            assert_eq!(base251_decode(digits).unwrap(), v % 3_969_126_001);
        }
    }

    #[test]
    fn base251_decode_rejects_bad_digit() {
        assert!(base251_decode([0, 251, 0, 0]).is_err());
    }

    #[test]
    fn speed_and_pwm_encodings() {
        assert_eq!(encode_speed(-50).unwrap(), 0);
        assert_eq!(encode_speed(0).unwrap(), 50);
        assert_eq!(encode_speed(200).unwrap(), 250);
        assert!(encode_speed(-51).is_err());
        assert!(encode_speed(201).is_err());

        assert_eq!(encode_pwm(-125).unwrap(), (0, 0));
        assert_eq!(encode_pwm(0).unwrap(), (0, 125));
        assert_eq!(encode_pwm(40).unwrap(), (40, 125));
        assert_eq!(encode_pwm(250).unwrap(), (250, 125));
        assert_eq!(encode_pwm(375).unwrap(), (250, 250));
        assert!(encode_pwm(376).is_err());
        assert!(encode_pwm(-126).is_err());
    }

    #[test]
    fn sentence_parse_and_ack_decode() {
        let frame = sentence_frame("IAM,50,10,20,30,40");
        let s = parse_sentence(&frame).unwrap();
        assert_eq!(s.code, "IAM");
        let reply = AckReply::from_sentence(&s).unwrap();
        assert!(reply.is_ack);
        assert_eq!(reply.key(), (50, 10, 20, 30, 40));

        let frame = sentence_frame("INM,50,10,20,30,40,1,0");
        let reply = AckReply::from_sentence(&parse_sentence(&frame).unwrap()).unwrap();
        assert!(!reply.is_ack);
        assert_eq!(reply.input_err, 1);
        assert_eq!(reply.cmd_err, 0);
    }

    #[test]
    fn sentence_parse_rejects_bad_checksum() {
        assert!(parse_sentence(b"$IAM,1,2,3,4,5*00\r\n").is_err());
    }

    #[test]
    fn routing_code_extraction() {
        let frame = sentence_frame("ODM,123,4,5,6,7");
        assert_eq!(routing_code(&frame), Some("ODM"));
        assert_eq!(routing_code(b"#UNIHEADINGA,92*00\r\n"), Some("UNIHEADINGA"));
        assert_eq!(routing_code(b"$NOFIELDS*00\r\n"), Some("NOFIELDS"));
        assert_eq!(routing_code(b"garbage"), None);
    }

    #[test]
    fn odm_record_round_trip() {
        let odm = Odm {
            ts_mono_ms: 123_456_789,
            gyro_z_raw: -123,
            accum_angle_raw: 4_567_890,
            left_mm_s: 321,
            right_mm_s: -400,
        };
        assert_eq!(Odm::from_bytes(&odm.to_bytes()).unwrap(), odm);
        assert_eq!(Odm::from_line(&odm.to_line()).unwrap(), odm);

        let frame = sentence_frame("ODM,123456,-10,456789,120,-130");
        let parsed = Odm::from_sentence(&parse_sentence(&frame).unwrap()).unwrap();
        assert_eq!(parsed.ts_mono_ms, 123_456);
        assert_eq!(parsed.right_mm_s, -130);
    }

    #[test]
    fn odm_record_rejects_bad_version() {
        let odm = Odm {
            ts_mono_ms: 1,
            gyro_z_raw: 0,
            accum_angle_raw: 0,
            left_mm_s: 0,
            right_mm_s: 0,
        };
        let mut bytes = odm.to_bytes();
        bytes[0] = 9;
        assert!(matches!(
            Odm::from_bytes(&bytes),
            Err(DecodeError::InvalidVersion { .. })
        ));
    }
}
