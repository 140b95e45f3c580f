//! strataplan library - storage layout planning for unattended installs

pub mod config;
pub mod disk;
pub mod planned;
pub mod proposal;
pub mod report;
pub mod utils;

pub use config::Profile;
pub use proposal::{AutoinstDevicesCreator, CreatorResult, PlanResult};
pub use utils::error::StrataplanError;
