//! In-memory storage topology
//!
//! A [`Devicegraph`] is a snapshot of every disk, partition, stray block
//! device, MD RAID and LVM volume group at one point of the planning
//! pipeline. Collaborators never mutate the snapshot they are handed: they
//! clone it, work on the copy and hand the copy back inside a
//! `CreatorResult`, so a failing step leaves its input untouched.

use crate::disk::size::DiskSize;
use crate::utils::error::{Result, StrataplanError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Partitions start and end on this boundary
pub const ALIGN_GRAIN: DiskSize = DiskSize::mib(1);

/// Backup GPT header plus partition entries at the end of the disk
const GPT_BACKUP: DiskSize = DiskSize::b(33 * 512);

/// Space reserved for LVM metadata on every physical volume
pub const LVM_METADATA: DiskSize = DiskSize::mib(1);

pub const DEFAULT_EXTENT_SIZE: DiskSize = DiskSize::mib(4);

/// First number used for logical partitions on MS-DOS tables
const FIRST_LOGICAL: u32 = 5;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartitionTableType {
    #[default]
    Gpt,
    Msdos,
}

impl PartitionTableType {
    /// Number of partitions that live directly in the table
    pub fn primary_slots(self) -> u32 {
        match self {
            Self::Gpt => 128,
            Self::Msdos => 4,
        }
    }
}

impl fmt::Display for PartitionTableType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gpt => write!(f, "gpt"),
            Self::Msdos => write!(f, "msdos"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartitionKind {
    Primary,
    Extended,
    Logical,
}

impl fmt::Display for PartitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primary => write!(f, "primary"),
            Self::Extended => write!(f, "extended"),
            Self::Logical => write!(f, "logical"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartitionId {
    #[default]
    Linux,
    Swap,
    Lvm,
    Raid,
    Esp,
    BiosBoot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FsType {
    Btrfs,
    Ext4,
    Xfs,
    F2fs,
    Vfat,
    Swap,
}

impl fmt::Display for FsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Btrfs => write!(f, "btrfs"),
            Self::Ext4 => write!(f, "ext4"),
            Self::Xfs => write!(f, "xfs"),
            Self::F2fs => write!(f, "f2fs"),
            Self::Vfat => write!(f, "vfat"),
            Self::Swap => write!(f, "swap"),
        }
    }
}

/// Filesystem placed on a block device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filesystem {
    pub fs_type: FsType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mount_point: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// A contiguous byte range of a disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub start: DiskSize,
    pub size: DiskSize,
}

impl Region {
    pub fn new(start: DiskSize, size: DiskSize) -> Self {
        Self { start, size }
    }

    pub fn end(&self) -> DiskSize {
        self.start + self.size
    }

    /// Build the region between two offsets, shrunk to the alignment grain
    fn aligned_between(start: DiskSize, end: DiskSize) -> Option<Region> {
        let start = start.ceil_align(ALIGN_GRAIN);
        let end = end.floor_align(ALIGN_GRAIN);
        (end > start && end - start >= ALIGN_GRAIN).then(|| Region::new(start, end - start))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    /// Device name (e.g., /dev/sda1)
    pub name: String,
    pub number: u32,
    pub region: Region,
    pub kind: PartitionKind,
    #[serde(default)]
    pub id: PartitionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filesystem: Option<Filesystem>,
}

impl Partition {
    pub fn size(&self) -> DiskSize {
        self.region.size
    }
}

/// A gap of a disk where new partitions can be placed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FreeSpace {
    pub disk: String,
    pub region: Region,
    /// The gap lies inside an extended partition, so only logical
    /// partitions fit there
    pub within_extended: bool,
    pub ptable: PartitionTableType,
    /// Primary slots still free on the disk
    pub free_primary_slots: u32,
    pub has_extended: bool,
}

impl FreeSpace {
    pub fn size(&self) -> DiskSize {
        self.region.size
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Disk {
    /// Device path (e.g., /dev/sda)
    pub name: String,
    pub size: DiskSize,
    #[serde(default)]
    pub ptable: PartitionTableType,
    #[serde(default)]
    pub partitions: Vec<Partition>,
}

impl Disk {
    pub fn new(name: &str, size: DiskSize, ptable: PartitionTableType) -> Self {
        Self {
            name: name.to_string(),
            size,
            ptable,
            partitions: Vec::new(),
        }
    }

    /// Area of the disk available to partitions
    pub fn usable_region(&self) -> Region {
        let tail = match self.ptable {
            PartitionTableType::Gpt => GPT_BACKUP,
            PartitionTableType::Msdos => DiskSize::ZERO,
        };
        let end = (self.size - tail).floor_align(ALIGN_GRAIN);
        Region::new(ALIGN_GRAIN, end - ALIGN_GRAIN)
    }

    /// Get the partition naming prefix
    /// e.g., /dev/sda -> /dev/sda, /dev/nvme0n1 -> /dev/nvme0n1p
    pub fn partition_prefix(&self) -> String {
        let device = &self.name;
        if device.contains("nvme") || device.contains("mmcblk") || device.contains("loop") {
            format!("{}p", device)
        } else {
            device.to_string()
        }
    }

    /// Get the partition device name for a partition number
    pub fn partition_name(&self, number: u32) -> String {
        format!("{}{}", self.partition_prefix(), number)
    }

    pub fn partition(&self, name: &str) -> Option<&Partition> {
        self.partitions.iter().find(|p| p.name == name)
    }

    pub fn extended(&self) -> Option<&Partition> {
        self.partitions
            .iter()
            .find(|p| p.kind == PartitionKind::Extended)
    }

    /// Number of table slots taken by primary and extended partitions
    pub fn primary_slots_used(&self) -> u32 {
        self.partitions
            .iter()
            .filter(|p| p.kind != PartitionKind::Logical)
            .count() as u32
    }

    /// Lowest free number for a primary or extended partition
    pub fn next_primary_number(&self) -> Option<u32> {
        (1..=self.ptable.primary_slots()).find(|n| {
            !self
                .partitions
                .iter()
                .any(|p| p.kind != PartitionKind::Logical && p.number == *n)
        })
    }

    pub fn next_logical_number(&self) -> u32 {
        self.partitions
            .iter()
            .filter(|p| p.kind == PartitionKind::Logical)
            .map(|p| p.number + 1)
            .max()
            .unwrap_or(FIRST_LOGICAL)
    }

    /// Insert a partition keeping the list ordered by start offset
    pub fn add_partition(&mut self, partition: Partition) {
        let idx = self
            .partitions
            .iter()
            .position(|p| p.region.start > partition.region.start)
            .unwrap_or(self.partitions.len());
        self.partitions.insert(idx, partition);
    }

    /// Region occupied by a partition, including the EBR gap in front of
    /// logical partitions
    fn occupied(part: &Partition) -> Region {
        match part.kind {
            PartitionKind::Logical => Region::new(
                part.region.start - ALIGN_GRAIN,
                part.region.size + ALIGN_GRAIN,
            ),
            _ => part.region,
        }
    }

    /// Gaps between the given occupied regions inside `bounds`
    fn gaps(bounds: Region, mut occupied: Vec<Region>) -> Vec<Region> {
        occupied.sort_by_key(|r| r.start);
        let mut gaps = Vec::new();
        let mut cursor = bounds.start;
        for region in occupied {
            if region.start > cursor {
                gaps.extend(Region::aligned_between(cursor, region.start));
            }
            cursor = cursor.max(region.end());
        }
        if bounds.end() > cursor {
            gaps.extend(Region::aligned_between(cursor, bounds.end()));
        }
        gaps
    }

    /// Free spaces of the disk, in offset order
    pub fn free_spaces(&self) -> Vec<FreeSpace> {
        let top_level: Vec<Region> = self
            .partitions
            .iter()
            .filter(|p| p.kind != PartitionKind::Logical)
            .map(|p| p.region)
            .collect();

        let space = |region: Region, within_extended: bool| FreeSpace {
            disk: self.name.clone(),
            region,
            within_extended,
            ptable: self.ptable,
            free_primary_slots: self
                .ptable
                .primary_slots()
                .saturating_sub(self.primary_slots_used()),
            has_extended: self.extended().is_some(),
        };

        let mut spaces: Vec<FreeSpace> = Self::gaps(self.usable_region(), top_level)
            .into_iter()
            .map(|region| space(region, false))
            .collect();

        if let Some(extended) = self.extended() {
            let logical: Vec<Region> = self
                .partitions
                .iter()
                .filter(|p| p.kind == PartitionKind::Logical)
                .map(Self::occupied)
                .collect();
            spaces.extend(
                Self::gaps(extended.region, logical)
                    .into_iter()
                    .map(|region| space(region, true)),
            );
        }

        spaces.sort_by_key(|s| s.region.start);
        spaces
    }

    /// How much a partition can grow before hitting its neighbour
    pub fn max_grow(&self, name: &str) -> Option<DiskSize> {
        let part = self.partition(name)?;
        let (limit, siblings): (DiskSize, Vec<&Partition>) = match part.kind {
            PartitionKind::Logical => (
                self.extended()?.region.end(),
                self.partitions
                    .iter()
                    .filter(|p| p.kind == PartitionKind::Logical)
                    .collect(),
            ),
            _ => (
                self.usable_region().end(),
                self.partitions
                    .iter()
                    .filter(|p| p.kind != PartitionKind::Logical)
                    .collect(),
            ),
        };

        let next_start = siblings
            .iter()
            .map(|p| Self::occupied(p).start)
            .filter(|start| *start >= part.region.end())
            .min()
            .unwrap_or(limit);
        Some(next_start - part.region.end())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrayBlkDevice {
    /// Device path (e.g., /dev/xvda1)
    pub name: String,
    pub size: DiskSize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filesystem: Option<Filesystem>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MdLevel {
    Raid0,
    Raid1,
    Raid5,
    Raid6,
    Raid10,
}

impl MdLevel {
    pub fn min_devices(self) -> usize {
        match self {
            Self::Raid0 | Self::Raid1 | Self::Raid10 => 2,
            Self::Raid5 => 3,
            Self::Raid6 => 4,
        }
    }

    /// Usable size of an array built from members of the given sizes
    pub fn array_size(self, member_sizes: &[DiskSize]) -> DiskSize {
        let count = member_sizes.len() as u64;
        let smallest = member_sizes.iter().copied().min().unwrap_or_default();
        match self {
            Self::Raid0 => member_sizes.iter().copied().sum(),
            Self::Raid1 => smallest,
            Self::Raid5 => smallest.saturating_mul(count.saturating_sub(1)),
            Self::Raid6 => smallest.saturating_mul(count.saturating_sub(2)),
            Self::Raid10 => DiskSize::b(smallest.saturating_mul(count).to_i() / 2),
        }
    }
}

impl fmt::Display for MdLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Raid0 => write!(f, "raid0"),
            Self::Raid1 => write!(f, "raid1"),
            Self::Raid5 => write!(f, "raid5"),
            Self::Raid6 => write!(f, "raid6"),
            Self::Raid10 => write!(f, "raid10"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Md {
    /// Device path (e.g., /dev/md0)
    pub name: String,
    pub level: MdLevel,
    /// Member device names
    pub devices: Vec<String>,
    pub size: DiskSize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filesystem: Option<Filesystem>,
}

/// A block device contributed to a volume group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LvmPv {
    pub device: String,
    pub size: DiskSize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LvmLv {
    /// Logical volume name (e.g., "root")
    pub name: String,
    pub size: DiskSize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filesystem: Option<Filesystem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LvmVg {
    /// Volume group name (e.g., "vg0")
    pub name: String,
    pub extent_size: DiskSize,
    #[serde(default)]
    pub pvs: Vec<LvmPv>,
    #[serde(default)]
    pub lvs: Vec<LvmLv>,
}

impl LvmVg {
    pub fn new(name: &str, extent_size: DiskSize) -> Self {
        Self {
            name: name.to_string(),
            extent_size,
            pvs: Vec::new(),
            lvs: Vec::new(),
        }
    }

    /// Usable size: whole extents left on every PV after its metadata
    pub fn size(&self) -> DiskSize {
        self.pvs
            .iter()
            .map(|pv| (pv.size - LVM_METADATA).floor_align(self.extent_size))
            .sum()
    }

    pub fn used(&self) -> DiskSize {
        self.lvs.iter().map(|lv| lv.size).sum()
    }

    pub fn free(&self) -> DiskSize {
        self.size() - self.used()
    }

    pub fn has_pv(&self, device: &str) -> bool {
        self.pvs.iter().any(|pv| pv.device == device)
    }

    pub fn lv(&self, name: &str) -> Option<&LvmLv> {
        self.lvs.iter().find(|lv| lv.name == name)
    }

    pub fn lv_mut(&mut self, name: &str) -> Option<&mut LvmLv> {
        self.lvs.iter_mut().find(|lv| lv.name == name)
    }
}

/// Get the device path for a logical volume
pub fn lv_path(vg_name: &str, lv_name: &str) -> String {
    format!("/dev/{}/{}", vg_name, lv_name)
}

/// Split a `/dev/<vg>/<lv>` path into its volume group and volume names
pub fn split_lv_path(path: &str) -> Option<(&str, &str)> {
    let rest = path.strip_prefix("/dev/")?;
    let (vg, lv) = rest.split_once('/')?;
    (!vg.is_empty() && !lv.is_empty() && !lv.contains('/')).then_some((vg, lv))
}

/// Snapshot of the whole storage topology
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Devicegraph {
    #[serde(default)]
    pub disks: Vec<Disk>,
    #[serde(default)]
    pub strays: Vec<StrayBlkDevice>,
    #[serde(default)]
    pub mds: Vec<Md>,
    #[serde(default)]
    pub vgs: Vec<LvmVg>,
}

impl Devicegraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn disk(&self, name: &str) -> Option<&Disk> {
        self.disks.iter().find(|d| d.name == name)
    }

    pub fn disk_mut(&mut self, name: &str) -> Option<&mut Disk> {
        self.disks.iter_mut().find(|d| d.name == name)
    }

    pub fn stray(&self, name: &str) -> Option<&StrayBlkDevice> {
        self.strays.iter().find(|s| s.name == name)
    }

    pub fn md(&self, name: &str) -> Option<&Md> {
        self.mds.iter().find(|m| m.name == name)
    }

    pub fn vg(&self, name: &str) -> Option<&LvmVg> {
        self.vgs.iter().find(|v| v.name == name)
    }

    pub fn vg_mut(&mut self, name: &str) -> Option<&mut LvmVg> {
        self.vgs.iter_mut().find(|v| v.name == name)
    }

    pub fn partition(&self, name: &str) -> Option<&Partition> {
        self.disks.iter().find_map(|d| d.partition(name))
    }

    /// Disk holding the named partition
    pub fn partition_disk(&self, name: &str) -> Option<&Disk> {
        self.disks.iter().find(|d| d.partition(name).is_some())
    }

    pub fn partition_mut(&mut self, name: &str) -> Option<&mut Partition> {
        self.disks
            .iter_mut()
            .flat_map(|d| d.partitions.iter_mut())
            .find(|p| p.name == name)
    }

    /// Free spaces of the listed disks, in the order the disks are given.
    /// Names that are not disks of this devicegraph are skipped.
    pub fn free_spaces(&self, disk_names: &[String]) -> Vec<FreeSpace> {
        disk_names
            .iter()
            .filter_map(|name| self.disk(name))
            .flat_map(|disk| disk.free_spaces())
            .collect()
    }

    /// Size of any block device: disk, partition, stray, MD or LV path
    pub fn blk_size(&self, name: &str) -> Option<DiskSize> {
        if let Some(disk) = self.disk(name) {
            return Some(disk.size);
        }
        if let Some(part) = self.partition(name) {
            return Some(part.size());
        }
        if let Some(stray) = self.stray(name) {
            return Some(stray.size);
        }
        if let Some(md) = self.md(name) {
            return Some(md.size);
        }
        let (vg, lv) = split_lv_path(name)?;
        self.vg(vg)?.lv(lv).map(|lv| lv.size)
    }

    /// Replace the filesystem of a block device (format) or only its mount
    /// point (keep the existing filesystem)
    pub fn apply_filesystem(&mut self, name: &str, fs: &Filesystem, format: bool) -> Result<()> {
        let slot = self
            .filesystem_slot(name)
            .ok_or_else(|| StrataplanError::DeviceNotFound(name.to_string()))?;

        if !format {
            if let Some(existing) = slot.as_mut() {
                existing.mount_point = fs.mount_point.clone();
                if fs.label.is_some() {
                    existing.label = fs.label.clone();
                }
                return Ok(());
            }
        }
        *slot = Some(fs.clone());
        Ok(())
    }

    fn filesystem_slot(&mut self, name: &str) -> Option<&mut Option<Filesystem>> {
        if let Some(idx) = self.strays.iter().position(|s| s.name == name) {
            return Some(&mut self.strays[idx].filesystem);
        }
        if let Some(idx) = self.mds.iter().position(|m| m.name == name) {
            return Some(&mut self.mds[idx].filesystem);
        }
        if let Some((vg, lv)) = split_lv_path(name) {
            if let Some(vg_idx) = self.vgs.iter().position(|v| v.name == vg) {
                if self.vgs[vg_idx].lv(lv).is_some() {
                    return self.vgs[vg_idx].lv_mut(lv).map(|lv| &mut lv.filesystem);
                }
            }
        }
        self.partition_mut(name).map(|p| &mut p.filesystem)
    }

    /// Names of every device in the snapshot
    pub fn device_names(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        for disk in &self.disks {
            names.insert(disk.name.clone());
            names.extend(disk.partitions.iter().map(|p| p.name.clone()));
        }
        names.extend(self.strays.iter().map(|s| s.name.clone()));
        names.extend(self.mds.iter().map(|m| m.name.clone()));
        for vg in &self.vgs {
            names.insert(vg.name.clone());
            names.extend(vg.lvs.iter().map(|lv| lv_path(&vg.name, &lv.name)));
        }
        names
    }

    /// Combine two snapshots derived from a common ancestor
    ///
    /// The result holds every device of both sides. When both contain a
    /// device with the same name, the version of `other` is kept.
    pub fn merge(self, other: Devicegraph) -> Devicegraph {
        let mut merged = other;

        for disk in self.disks {
            match merged.disks.iter().position(|d| d.name == disk.name) {
                Some(idx) => {
                    let target = &mut merged.disks[idx];
                    for part in disk.partitions {
                        if target.partition(&part.name).is_none() {
                            target.add_partition(part);
                        }
                    }
                }
                None => merged.disks.push(disk),
            }
        }

        for stray in self.strays {
            if merged.stray(&stray.name).is_none() {
                merged.strays.push(stray);
            }
        }

        for md in self.mds {
            if merged.md(&md.name).is_none() {
                merged.mds.push(md);
            }
        }

        for vg in self.vgs {
            match merged.vgs.iter().position(|v| v.name == vg.name) {
                Some(idx) => {
                    let target = &mut merged.vgs[idx];
                    for pv in vg.pvs {
                        if !target.has_pv(&pv.device) {
                            target.pvs.push(pv);
                        }
                    }
                    for lv in vg.lvs {
                        if target.lv(&lv.name).is_none() {
                            target.lvs.push(lv);
                        }
                    }
                }
                None => merged.vgs.push(vg),
            }
        }

        merged
    }
}
