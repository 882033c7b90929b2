//! Wire protocols and typed records for the rover's on-board stack.
//!
//! Three serial devices speak three different framings:
//!
//! - the GNSS receiver speaks UBX (sync bytes, little-endian length,
//!   Fletcher-8 checksum),
//! - the motor controller sends NMEA-like ASCII sentences (`$…*XX\r\n`,
//!   XOR-8 checksum) and accepts 13-byte binary command frames,
//! - the dual-antenna heading receiver sends Unicore ASCII sentences
//!   (`#…*XXXXXXXX\r\n`, reflected CRC-32).
//!
//! This crate contains the incremental parsers that reassemble frames out of
//! noisy byte streams, the packet decoders and frame builders for each
//! protocol, and the binary records exchanged between services.

pub use crate::{
    error::{DecodeError, ParamError},
    parser::{MotorParser, ParserStats, UbxParser, UnicoreParser},
};

mod error;
mod parser;

pub mod checksum;
pub mod motor;
pub mod records;
pub mod ubx;
pub mod unicore;
