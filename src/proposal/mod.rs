//! Storage proposal for unattended installs

pub mod creator_result;
pub mod devices_creator;
pub mod distribution;
pub mod engine;
pub mod lvm_creator;
pub mod md_creator;
pub mod members;
pub mod partition_creator;

pub use creator_result::CreatorResult;
pub use devices_creator::{AutoinstDevicesCreator, PlanResult, PlacementUnit};
pub use engine::{DefaultEngine, StorageEngine};
