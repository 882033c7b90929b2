//! UNIHEADINGA decoding for the dual-antenna heading receiver.
//!
//! The receiver reports far more than the stack consumes; only the leading
//! eight body fields (solution status through pitch standard deviation) are
//! kept and forwarded between services.

use crate::error::DecodeError;

pub const UNIHEADINGA_CODE: &str = "UNIHEADINGA";

/// Number of ASCII suffix bytes after the payload: `*`, eight CRC hex
/// digits, CR, LF.
const SUFFIX_LEN: usize = 11;

/// Truncates a validated UNIHEADINGA frame to its short form: the bytes
/// between the header's `;` and the eighth comma of the body.
pub fn short_form(frame: &[u8]) -> Result<&[u8], DecodeError> {
    if !frame.starts_with(b"#UNIHEADINGA,") {
        return Err(DecodeError::InvalidField {
            what: "uniheadinga",
            field: "code",
        });
    }
    if frame.len() < SUFFIX_LEN + 1 {
        return Err(DecodeError::Truncated {
            what: "uniheadinga",
        });
    }
    let semi = frame
        .iter()
        .position(|b| *b == b';')
        .ok_or(DecodeError::InvalidField {
            what: "uniheadinga",
            field: "header",
        })?;
    let body = &frame[semi + 1..frame.len() - SUFFIX_LEN];
    let mut commas = 0;
    for (i, b) in body.iter().enumerate() {
        if *b == b',' {
            commas += 1;
            if commas == 8 {
                return Ok(&body[..i]);
            }
        }
    }
    Err(DecodeError::InvalidField {
        what: "uniheadinga",
        field: "body",
    })
}

/// Short form of a dual-antenna heading solution.
#[derive(Debug, Clone, PartialEq)]
pub struct UniHeading {
    pub sol_status: String,
    pub pos_type: String,
    pub baseline_len_m: f64,
    pub heading_deg: f64,
    pub pitch_deg: f64,
    pub reserved: f64,
    pub heading_stddev_deg: f64,
    pub pitch_stddev_deg: f64,
}

impl UniHeading {
    /// Parses the eight-field short line
    /// `sol,pos,length,heading,pitch,reserved,hdgstddev,ptchstddev`.
    pub fn parse_short(line: &str) -> Result<Self, DecodeError> {
        let parts: Vec<&str> = line.trim().split(',').map(str::trim).collect();
        if parts.len() != 8 {
            return Err(DecodeError::InvalidLength {
                what: "uniheading",
                expect: 8,
                got: parts.len(),
            });
        }
        fn num(s: &str) -> Result<f64, DecodeError> {
            s.parse().map_err(|_| DecodeError::InvalidField {
                what: "uniheading",
                field: "value",
            })
        }
        Ok(Self {
            sol_status: parts[0].to_string(),
            pos_type: parts[1].to_string(),
            baseline_len_m: num(parts[2])?,
            heading_deg: num(parts[3])?,
            pitch_deg: num(parts[4])?,
            reserved: num(parts[5])?,
            heading_stddev_deg: num(parts[6])?,
            pitch_stddev_deg: num(parts[7])?,
        })
    }

    /// True when the receiver actually solved the baseline.
    pub fn has_solution(&self) -> bool {
        self.sol_status == "SOL_COMPUTED"
    }
}
