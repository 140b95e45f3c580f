//! Planned devices: what the profile asks the planner to create or reuse
//!
//! Every planned device carries the same [`PlannedCommon`] payload (create
//! or reuse, size bounds, weight and filesystem) and is one variant of the
//! closed [`PlannedDevice`] type, so each pipeline stage handles exactly the
//! kinds it cares about by matching.

mod collection;
mod devices;

pub use collection::DevicesCollection;
pub use devices::{PlannedLv, PlannedMd, PlannedPartition, PlannedStray, PlannedVg};

use crate::disk::devicegraph::{Devicegraph, Filesystem};
use crate::disk::size::DiskSize;
use crate::utils::error::Result;
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

/// Identity of a planned device, stable across clones
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct PlannedId(Uuid);

impl PlannedId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PlannedId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PlannedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Whether a planned device is created from scratch or an existing one is reused
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase", tag = "action")]
pub enum Disposition {
    Create,
    Reuse {
        /// Name of the existing device
        name: String,
        /// Resize the existing device to the planned max size
        resize: bool,
    },
}

/// Container a planned device is meant to be assembled into
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Membership {
    /// Member of the MD RAID with this name
    Raid(String),
    /// Physical volume of the volume group with this name
    Vg(String),
}

impl fmt::Display for Membership {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Raid(name) => write!(f, "raid {}", name),
            Self::Vg(name) => write!(f, "volume group {}", name),
        }
    }
}

/// Payload shared by every kind of planned device
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedCommon {
    pub planned_id: PlannedId,
    pub disposition: Disposition,
    pub min_size: DiskSize,
    pub max_size: DiskSize,
    /// Share of the extra space, only meaningful once sizes are flexible
    pub weight: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filesystem: Option<Filesystem>,
    /// Put a new filesystem on a reused device instead of keeping its own
    pub format: bool,
}

impl PlannedCommon {
    /// Common payload for a device to be created with the given size bounds
    pub fn create(min_size: DiskSize, max_size: DiskSize) -> Self {
        Self {
            planned_id: PlannedId::new(),
            disposition: Disposition::Create,
            min_size,
            max_size,
            weight: 0,
            filesystem: None,
            format: true,
        }
    }

    /// Common payload for an existing device kept as it is
    pub fn reuse(name: &str) -> Self {
        Self {
            planned_id: PlannedId::new(),
            disposition: Disposition::Reuse {
                name: name.to_string(),
                resize: false,
            },
            min_size: DiskSize::ZERO,
            max_size: DiskSize::UNLIMITED,
            weight: 0,
            filesystem: None,
            format: false,
        }
    }

    /// Common payload for an existing device resized to `size`
    pub fn reuse_resized(name: &str, size: DiskSize) -> Self {
        Self {
            disposition: Disposition::Reuse {
                name: name.to_string(),
                resize: true,
            },
            min_size: size,
            max_size: size,
            ..Self::reuse(name)
        }
    }

    pub fn with_filesystem(mut self, filesystem: Filesystem) -> Self {
        self.filesystem = Some(filesystem);
        self
    }

    pub fn with_weight(mut self, weight: u64) -> Self {
        self.weight = weight;
        self
    }

    pub fn is_reuse(&self) -> bool {
        matches!(self.disposition, Disposition::Reuse { .. })
    }

    pub fn reuse_name(&self) -> Option<&str> {
        match &self.disposition {
            Disposition::Reuse { name, .. } => Some(name),
            Disposition::Create => None,
        }
    }

    /// Size a reused device must end up with, if it has to be resized
    pub fn resize_target(&self) -> Option<DiskSize> {
        match &self.disposition {
            Disposition::Reuse { resize: true, .. } if !self.max_size.is_unlimited() => {
                Some(self.max_size)
            }
            _ => None,
        }
    }

    /// Apply the format/mount operation to the reused device
    fn apply_filesystem(&self, graph: &mut Devicegraph, name: &str) -> Result<()> {
        match &self.filesystem {
            Some(fs) => graph.apply_filesystem(name, fs, self.format),
            None => Ok(()),
        }
    }
}

/// Access to the common payload of any planned device type
pub trait Planned {
    fn common(&self) -> &PlannedCommon;
    fn common_mut(&mut self) -> &mut PlannedCommon;
}

/// A planned device of any kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum PlannedDevice {
    Partition(PlannedPartition),
    StrayBlkDevice(PlannedStray),
    Md(PlannedMd),
    LvmVg(PlannedVg),
    LvmLv(PlannedLv),
}

impl PlannedDevice {
    pub fn common(&self) -> &PlannedCommon {
        match self {
            Self::Partition(d) => d.common(),
            Self::StrayBlkDevice(d) => d.common(),
            Self::Md(d) => d.common(),
            Self::LvmVg(d) => d.common(),
            Self::LvmLv(d) => d.common(),
        }
    }

    pub fn planned_id(&self) -> PlannedId {
        self.common().planned_id
    }

    pub fn is_reuse(&self) -> bool {
        self.common().is_reuse()
    }

    pub fn reuse_name(&self) -> Option<&str> {
        self.common().reuse_name()
    }

    /// Container this device is tagged to become part of
    pub fn belongs_to(&self) -> Option<&Membership> {
        match self {
            Self::Partition(d) => d.belongs_to.as_ref(),
            Self::StrayBlkDevice(d) => d.belongs_to.as_ref(),
            Self::Md(d) => d.belongs_to.as_ref(),
            Self::LvmVg(_) | Self::LvmLv(_) => None,
        }
    }

    /// Apply the reuse of this device to the devicegraph
    pub fn reuse(&self, graph: &mut Devicegraph) -> Result<()> {
        match self {
            Self::Partition(d) => d.reuse(graph),
            Self::StrayBlkDevice(d) => d.reuse(graph),
            Self::Md(d) => d.reuse(graph),
            Self::LvmVg(d) => d.reuse(graph),
            Self::LvmLv(d) => d.reuse(graph),
        }
    }

    /// Whether reusing this device reduces the size of the existing one
    pub fn shrink(&self, graph: &Devicegraph) -> bool {
        let (Some(name), Some(target)) = (self.reuse_name(), self.common().resize_target()) else {
            return false;
        };
        graph.blk_size(name).is_some_and(|current| target < current)
    }

    /// Short label of the device kind
    pub fn kind_label(&self) -> &'static str {
        match self {
            Self::Partition(_) => "partition",
            Self::StrayBlkDevice(_) => "stray",
            Self::Md(_) => "raid",
            Self::LvmVg(_) => "vg",
            Self::LvmLv(_) => "lv",
        }
    }
}

impl From<PlannedPartition> for PlannedDevice {
    fn from(d: PlannedPartition) -> Self {
        Self::Partition(d)
    }
}

impl From<PlannedStray> for PlannedDevice {
    fn from(d: PlannedStray) -> Self {
        Self::StrayBlkDevice(d)
    }
}

impl From<PlannedMd> for PlannedDevice {
    fn from(d: PlannedMd) -> Self {
        Self::Md(d)
    }
}

impl From<PlannedVg> for PlannedDevice {
    fn from(d: PlannedVg) -> Self {
        Self::LvmVg(d)
    }
}

impl From<PlannedLv> for PlannedDevice {
    fn from(d: PlannedLv) -> Self {
        Self::LvmLv(d)
    }
}

/// New planned devices with flexible limits
///
/// Each copy gets a weight equal to the original min size and a min size of
/// one byte, so the space is shared in proportion to what was requested.
/// The input is left untouched.
pub fn flexible_devices<T: Planned + Clone>(devices: &[T]) -> Vec<T> {
    devices
        .iter()
        .map(|device| {
            let mut flexible = device.clone();
            let common = flexible.common_mut();
            common.weight = device.common().min_size.to_i();
            common.min_size = DiskSize::b(1);
            flexible
        })
        .collect()
}
