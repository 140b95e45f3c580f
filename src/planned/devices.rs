//! The concrete planned device types and how each one reuses an existing device

use super::{Membership, Planned, PlannedCommon};
use crate::disk::devicegraph::{
    lv_path, split_lv_path, Devicegraph, MdLevel, PartitionId, ALIGN_GRAIN, DEFAULT_EXTENT_SIZE,
};
use crate::disk::size::DiskSize;
use crate::utils::error::{Result, StrataplanError};
use serde::Serialize;
use tracing::debug;

fn missing(name: &str) -> StrataplanError {
    StrataplanError::DeviceNotFound(name.to_string())
}

/// A partition to create in a free space or an existing one to reuse
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedPartition {
    #[serde(flatten)]
    pub common: PlannedCommon,
    /// Restrict placement to this disk
    pub disk: Option<String>,
    /// Must be a primary partition on MS-DOS tables
    pub primary: bool,
    pub partition_id: PartitionId,
    pub belongs_to: Option<Membership>,
}

impl PlannedPartition {
    pub fn new(common: PlannedCommon) -> Self {
        Self {
            common,
            disk: None,
            primary: false,
            partition_id: PartitionId::Linux,
            belongs_to: None,
        }
    }

    pub fn on_disk(mut self, disk: &str) -> Self {
        self.disk = Some(disk.to_string());
        self
    }

    pub fn primary(mut self, primary: bool) -> Self {
        self.primary = primary;
        self
    }

    pub fn member_of(mut self, membership: Membership) -> Self {
        self.partition_id = match membership {
            Membership::Raid(_) => PartitionId::Raid,
            Membership::Vg(_) => PartitionId::Lvm,
        };
        self.belongs_to = Some(membership);
        self
    }

    /// Resize (when requested) and format/mount the existing partition
    pub fn reuse(&self, graph: &mut Devicegraph) -> Result<()> {
        let name = self.common.reuse_name().ok_or_else(|| missing("<unnamed partition>"))?;
        let current = graph.partition(name).ok_or_else(|| missing(name))?.size();

        if let Some(target) = self.common.resize_target() {
            let target = target.floor_align(ALIGN_GRAIN).max(ALIGN_GRAIN);
            if target > current {
                let room = graph
                    .partition_disk(name)
                    .and_then(|disk| disk.max_grow(name))
                    .unwrap_or_default();
                if target - current > room {
                    return Err(StrataplanError::NoDiskSpace(format!(
                        "Cannot grow {} from {} to {}: only {} free after it",
                        name, current, target, room
                    )));
                }
            }
            debug!("Resizing partition {} from {} to {}", name, current, target);
            if let Some(part) = graph.partition_mut(name) {
                part.region.size = target;
            }
        }

        self.common.apply_filesystem(graph, name)
    }
}

impl Planned for PlannedPartition {
    fn common(&self) -> &PlannedCommon {
        &self.common
    }

    fn common_mut(&mut self) -> &mut PlannedCommon {
        &mut self.common
    }
}

/// A whole non-partitioned block device (e.g. a Xen virtual partition)
///
/// Stray devices always exist already; they can only be reused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedStray {
    #[serde(flatten)]
    pub common: PlannedCommon,
    pub belongs_to: Option<Membership>,
}

impl PlannedStray {
    pub fn new(name: &str) -> Self {
        Self {
            common: PlannedCommon::reuse(name),
            belongs_to: None,
        }
    }

    pub fn member_of(mut self, membership: Membership) -> Self {
        self.belongs_to = Some(membership);
        self
    }

    pub fn reuse(&self, graph: &mut Devicegraph) -> Result<()> {
        let name = self.common.reuse_name().ok_or_else(|| missing("<unnamed stray device>"))?;
        if graph.stray(name).is_none() {
            return Err(missing(name));
        }
        self.common.apply_filesystem(graph, name)
    }
}

impl Planned for PlannedStray {
    fn common(&self) -> &PlannedCommon {
        &self.common
    }

    fn common_mut(&mut self) -> &mut PlannedCommon {
        &mut self.common
    }
}

/// An MD RAID array
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedMd {
    #[serde(flatten)]
    pub common: PlannedCommon,
    /// Device name (e.g., /dev/md0)
    pub name: String,
    pub level: MdLevel,
    /// Only volume group membership makes sense for an array
    pub belongs_to: Option<Membership>,
}

impl PlannedMd {
    pub fn new(name: &str, level: MdLevel) -> Self {
        Self {
            common: PlannedCommon::create(DiskSize::ZERO, DiskSize::UNLIMITED),
            name: name.to_string(),
            level,
            belongs_to: None,
        }
    }

    pub fn reuse(&self, graph: &mut Devicegraph) -> Result<()> {
        let name = self.common.reuse_name().unwrap_or(&self.name);
        if graph.md(name).is_none() {
            return Err(missing(name));
        }
        self.common.apply_filesystem(graph, name)
    }
}

impl Planned for PlannedMd {
    fn common(&self) -> &PlannedCommon {
        &self.common
    }

    fn common_mut(&mut self) -> &mut PlannedCommon {
        &mut self.common
    }
}

/// An LVM volume group and its logical volumes
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedVg {
    #[serde(flatten)]
    pub common: PlannedCommon,
    pub volume_group_name: String,
    pub extent_size: DiskSize,
    pub lvs: Vec<PlannedLv>,
}

impl PlannedVg {
    pub fn new(volume_group_name: &str) -> Self {
        Self {
            common: PlannedCommon::create(DiskSize::ZERO, DiskSize::UNLIMITED),
            volume_group_name: volume_group_name.to_string(),
            extent_size: DEFAULT_EXTENT_SIZE,
            lvs: Vec::new(),
        }
    }

    /// Name of the volume group in the devicegraph
    pub fn real_name(&self) -> &str {
        self.common.reuse_name().unwrap_or(&self.volume_group_name)
    }

    pub fn reuse(&self, graph: &mut Devicegraph) -> Result<()> {
        let name = self.real_name();
        if graph.vg(name).is_none() {
            return Err(missing(name));
        }
        Ok(())
    }
}

impl Planned for PlannedVg {
    fn common(&self) -> &PlannedCommon {
        &self.common
    }

    fn common_mut(&mut self) -> &mut PlannedCommon {
        &mut self.common
    }
}

/// A logical volume inside a planned volume group
///
/// A reused logical volume names the existing one by its `/dev/<vg>/<lv>` path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedLv {
    #[serde(flatten)]
    pub common: PlannedCommon,
    pub logical_volume_name: String,
}

impl PlannedLv {
    pub fn new(logical_volume_name: &str, common: PlannedCommon) -> Self {
        Self {
            common,
            logical_volume_name: logical_volume_name.to_string(),
        }
    }

    /// Device path once the volume lives in `vg_name`
    pub fn path_in(&self, vg_name: &str) -> String {
        lv_path(vg_name, &self.logical_volume_name)
    }

    /// Resize (when requested) and format/mount the existing logical volume
    pub fn reuse(&self, graph: &mut Devicegraph) -> Result<()> {
        let path = self
            .common
            .reuse_name()
            .ok_or_else(|| missing(&self.logical_volume_name))?;
        let (vg_name, lv_name) = split_lv_path(path).ok_or_else(|| missing(path))?;
        let vg = graph.vg_mut(vg_name).ok_or_else(|| missing(path))?;
        let current = vg.lv(lv_name).ok_or_else(|| missing(path))?.size;

        if let Some(target) = self.common.resize_target() {
            let target = target.floor_align(vg.extent_size).max(vg.extent_size);
            if target > current && target - current > vg.free() {
                return Err(StrataplanError::NoDiskSpace(format!(
                    "Cannot grow {} from {} to {}: volume group {} has only {} free",
                    path,
                    current,
                    target,
                    vg_name,
                    vg.free()
                )));
            }
            debug!("Resizing logical volume {} from {} to {}", path, current, target);
            if let Some(lv) = vg.lv_mut(lv_name) {
                lv.size = target;
            }
        }

        self.common.apply_filesystem(graph, path)
    }
}

impl Planned for PlannedLv {
    fn common(&self) -> &PlannedCommon {
        &self.common
    }

    fn common_mut(&mut self) -> &mut PlannedCommon {
        &mut self.common
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::devicegraph::{
        Disk, Filesystem, FsType, LvmLv, LvmPv, LvmVg, Partition, PartitionKind,
        PartitionTableType, Region, StrayBlkDevice,
    };

    fn graph() -> Devicegraph {
        let mut graph = Devicegraph::new();
        let mut disk = Disk::new("/dev/sda", DiskSize::gib(20), PartitionTableType::Gpt);
        for (number, start, size) in [(1, 1, 4096), (2, 4097, 4096)] {
            disk.add_partition(Partition {
                name: disk.partition_name(number),
                number,
                region: Region::new(DiskSize::mib(start), DiskSize::mib(size)),
                kind: PartitionKind::Primary,
                id: PartitionId::Linux,
                filesystem: None,
            });
        }
        graph.disks.push(disk);
        graph.strays.push(StrayBlkDevice {
            name: "/dev/xvda1".to_string(),
            size: DiskSize::gib(2),
            filesystem: None,
        });
        let mut vg = LvmVg::new("system", DiskSize::mib(4));
        vg.pvs.push(LvmPv {
            device: "/dev/sdb".to_string(),
            size: DiskSize::gib(10) + DiskSize::mib(1),
        });
        vg.lvs.push(LvmLv {
            name: "root".to_string(),
            size: DiskSize::gib(4),
            filesystem: None,
        });
        graph.vgs.push(vg);
        graph
    }

    #[test]
    fn partition_reuse_cannot_grow_into_neighbour() {
        let mut graph = graph();
        let planned =
            PlannedPartition::new(PlannedCommon::reuse_resized("/dev/sda1", DiskSize::gib(5)));
        let err = planned.reuse(&mut graph).unwrap_err();
        assert!(err.is_capacity());
        assert_eq!(graph.blk_size("/dev/sda1"), Some(DiskSize::gib(4)));
    }

    #[test]
    fn last_partition_grows_into_trailing_space() {
        let mut graph = graph();
        let planned =
            PlannedPartition::new(PlannedCommon::reuse_resized("/dev/sda2", DiskSize::gib(8)));
        planned.reuse(&mut graph).unwrap();
        assert_eq!(graph.blk_size("/dev/sda2"), Some(DiskSize::gib(8)));
    }

    #[test]
    fn partition_reuse_requires_existing_device() {
        let mut graph = graph();
        let planned = PlannedPartition::new(PlannedCommon::reuse("/dev/sda7"));
        let err = planned.reuse(&mut graph).unwrap_err();
        assert!(err.is_prerequisite());
    }

    #[test]
    fn stray_reuse_formats_device() {
        let mut graph = graph();
        let mut common = PlannedCommon::reuse("/dev/xvda1").with_filesystem(Filesystem {
            fs_type: FsType::Ext4,
            mount_point: Some("/data".to_string()),
            label: None,
        });
        common.format = true;
        let planned = PlannedStray {
            common,
            belongs_to: None,
        };
        planned.reuse(&mut graph).unwrap();
        let fs = graph.stray("/dev/xvda1").unwrap().filesystem.as_ref().unwrap();
        assert_eq!(fs.fs_type, FsType::Ext4);
        assert_eq!(fs.mount_point.as_deref(), Some("/data"));
    }

    #[test]
    fn lv_growth_is_limited_by_vg_free_space() {
        let mut graph = graph();
        let too_big = PlannedLv::new(
            "root",
            PlannedCommon::reuse_resized("/dev/system/root", DiskSize::gib(11)),
        );
        assert!(too_big.reuse(&mut graph).unwrap_err().is_capacity());

        let fits = PlannedLv::new(
            "root",
            PlannedCommon::reuse_resized("/dev/system/root", DiskSize::gib(10)),
        );
        fits.reuse(&mut graph).unwrap();
        assert_eq!(graph.blk_size("/dev/system/root"), Some(DiskSize::gib(10)));
    }

    #[test]
    fn vg_reuse_requires_existing_group() {
        let mut graph = graph();
        let mut vg = PlannedVg::new("data");
        vg.common = PlannedCommon::reuse("data");
        assert!(vg.reuse(&mut graph).unwrap_err().is_prerequisite());

        let mut vg = PlannedVg::new("system");
        vg.common = PlannedCommon::reuse("system");
        vg.reuse(&mut graph).unwrap();
    }
}
