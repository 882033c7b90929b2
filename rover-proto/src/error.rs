use core::fmt;

/// Error raised while decoding a validated frame into a typed packet or
/// record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    InvalidLength {
        what: &'static str,
        expect: usize,
        got: usize,
    },
    InvalidVersion {
        what: &'static str,
        expect: u8,
        got: u8,
    },
    InvalidField {
        what: &'static str,
        field: &'static str,
    },
    Truncated {
        what: &'static str,
    },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::InvalidLength { what, expect, got } => {
                write!(f, "invalid {what} length, expect {expect}, got {got}")
            },
            DecodeError::InvalidVersion { what, expect, got } => {
                write!(f, "unsupported {what} version {got} (expected {expect})")
            },
            DecodeError::InvalidField { what, field } => {
                write!(f, "invalid field {field} of {what}")
            },
            DecodeError::Truncated { what } => write!(f, "truncated {what}"),
        }
    }
}

impl std::error::Error for DecodeError {}

/// A motor-controller command parameter outside the admissible `0..=250`
/// range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamError {
    pub value: i64,
}

impl fmt::Display for ParamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "param {} out of range 0..=250", self.value)
    }
}

impl std::error::Error for ParamError {}
