//! Runtime core of the rover's on-board stack.
//!
//! One half of this crate is plumbing: serial links with RX/TX threads and
//! bounded FIFOs ([`link`]), a per-device message router ([`dispatch`]) and
//! the stop-and-wait ACK/NACK matcher for motor-controller commands
//! ([`acknack`]).
//!
//! The other half is navigation: circular angle algebra ([`angles`]), WGS-84
//! coordinate conversions ([`geo`]), the heading-fusion core ([`fusion`]),
//! near-point selection on the start-goal line ([`near`]), the pure-pursuit
//! velocity planner ([`pursuit`]), the differential PWM mixer ([`mixer`])
//! and the waypoint navigator state machine ([`fsm`], [`navigator`]).

pub mod acknack;
pub mod angles;
pub mod dispatch;
pub mod fsm;
pub mod fusion;
pub mod geo;
pub mod link;
pub mod mixer;
pub mod navigator;
pub mod near;
pub mod pursuit;
