//! Loopback-TCP services of the rover stack.
//!
//! Every service speaks the same newline-terminated line protocol on
//! 127.0.0.1 (PING/START/STOP/STATE/EXIT plus service-specific verbs) and
//! exchanges binary records with its peers over the same sockets.

pub mod handlers;
pub mod lineproto;
pub mod net;
pub mod pointfile;
pub mod runlog;
pub mod services;

/// Default loopback ports of the constellation.
pub mod ports {
    pub const DRIVE: u16 = 9003;
    pub const FUSION: u16 = 9005;
    pub const GNSS: u16 = 9006;
    pub const PILOT: u16 = 9008;
    pub const HEADING: u16 = 9009;
}
