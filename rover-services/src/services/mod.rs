//! The service implementations behind the line protocol.

mod drive;
mod fusion;
mod gnss;
mod heading;
mod pilot;

pub use drive::{DriveConfig, DriveService};
pub use fusion::{FusionConfig, FusionService};
pub use gnss::{GnssConfig, GnssService};
pub use heading::{HeadingConfig, HeadingService};
pub use pilot::{PilotConfig, PilotService};
