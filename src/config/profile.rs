//! Installation profile: the storage topology found on the machine and the
//! devices the install has to create or reuse

use crate::disk::devicegraph::{
    lv_path, Devicegraph, Disk, Filesystem, FsType, LvmLv, LvmPv, LvmVg, Md, MdLevel, Partition,
    PartitionId, PartitionKind, PartitionTableType, Region, StrayBlkDevice, DEFAULT_EXTENT_SIZE,
};
use crate::disk::size::DiskSize;
use crate::planned::{
    DevicesCollection, Membership, PlannedCommon, PlannedDevice, PlannedLv, PlannedMd,
    PlannedPartition, PlannedStray, PlannedVg,
};
use crate::utils::error::{Result, StrataplanError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

/// Main profile structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Profile {
    /// Disks where new partitions may be placed, in order of preference
    #[serde(default)]
    pub disks: Vec<String>,
    #[serde(default)]
    pub topology: TopologyConfig,
    #[serde(default, rename = "partition", skip_serializing_if = "Vec::is_empty")]
    pub partitions: Vec<PartitionConfig>,
    #[serde(default, rename = "stray", skip_serializing_if = "Vec::is_empty")]
    pub strays: Vec<StrayConfig>,
    #[serde(default, rename = "raid", skip_serializing_if = "Vec::is_empty")]
    pub raids: Vec<RaidConfig>,
    #[serde(default, rename = "volume_group", skip_serializing_if = "Vec::is_empty")]
    pub volume_groups: Vec<VolumeGroupConfig>,
}

/// Devices present on the machine before the install
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TopologyConfig {
    #[serde(default, rename = "disk", skip_serializing_if = "Vec::is_empty")]
    pub disks: Vec<DiskTopology>,
    #[serde(default, rename = "stray", skip_serializing_if = "Vec::is_empty")]
    pub strays: Vec<StrayTopology>,
    #[serde(default, rename = "raid", skip_serializing_if = "Vec::is_empty")]
    pub raids: Vec<RaidTopology>,
    #[serde(default, rename = "vg", skip_serializing_if = "Vec::is_empty")]
    pub vgs: Vec<VgTopology>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskTopology {
    /// Device path (e.g., /dev/sda)
    pub name: String,
    pub size: DiskSize,
    #[serde(default)]
    pub ptable: PartitionTableType,
    #[serde(default, rename = "partition", skip_serializing_if = "Vec::is_empty")]
    pub partitions: Vec<PartitionTopology>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionTopology {
    pub number: u32,
    pub start: DiskSize,
    pub size: DiskSize,
    #[serde(default = "default_kind")]
    pub kind: PartitionKind,
    #[serde(default)]
    pub id: PartitionId,
    #[serde(flatten)]
    pub fs: FsSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrayTopology {
    pub name: String,
    pub size: DiskSize,
    #[serde(flatten)]
    pub fs: FsSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RaidTopology {
    pub name: String,
    pub level: MdLevel,
    pub devices: Vec<String>,
    #[serde(flatten)]
    pub fs: FsSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VgTopology {
    pub name: String,
    #[serde(default = "default_extent_size")]
    pub extent_size: DiskSize,
    /// Physical volumes, by device name
    pub pvs: Vec<String>,
    #[serde(default, rename = "lv", skip_serializing_if = "Vec::is_empty")]
    pub lvs: Vec<LvTopology>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LvTopology {
    pub name: String,
    pub size: DiskSize,
    #[serde(flatten)]
    pub fs: FsSpec,
}

/// Requested size: either a fixed `size` or `min`/`max` bounds
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SizeSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<DiskSize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<DiskSize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<DiskSize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<u64>,
}

impl SizeSpec {
    pub fn fixed(size: DiskSize) -> Self {
        Self {
            size: Some(size),
            ..Self::default()
        }
    }

    /// Min and max size. Without any bound the device takes whatever is left.
    pub fn bounds(&self, what: &str) -> Result<(DiskSize, DiskSize)> {
        let (min, max) = match (self.size, self.min, self.max) {
            (Some(_), Some(_), _) | (Some(_), _, Some(_)) => {
                return Err(StrataplanError::ValidationError(format!(
                    "{}: 'size' cannot be combined with 'min' or 'max'",
                    what
                )))
            }
            (Some(size), None, None) => (size, size),
            (None, min, max) => (
                min.unwrap_or(DiskSize::ZERO),
                max.unwrap_or(DiskSize::UNLIMITED),
            ),
        };
        if min > max {
            return Err(StrataplanError::ValidationError(format!(
                "{}: min size {} is bigger than max size {}",
                what, min, max
            )));
        }
        Ok((min, max))
    }
}

/// Filesystem to put on (or keep on) a device and where to mount it
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FsSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fs: Option<FsType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mount: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Format a reused device (new devices are always formatted)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<bool>,
}

impl FsSpec {
    pub fn with_fs(fs: FsType, mount: &str) -> Self {
        Self {
            fs: Some(fs),
            mount: Some(mount.to_string()),
            ..Self::default()
        }
    }

    /// Filesystem of the device, if any. A mount point alone keeps the
    /// existing filesystem of a reused device, so it needs a type only for
    /// new ones.
    fn filesystem(&self, fallback: Option<FsType>) -> Option<Filesystem> {
        let fs_type = self.fs.or(fallback)?;
        Some(Filesystem {
            fs_type,
            mount_point: self.mount.clone(),
            label: self.label.clone(),
        })
    }

    fn apply(&self, mut common: PlannedCommon) -> PlannedCommon {
        if common.is_reuse() {
            common.format = self.format.unwrap_or(false);
            // Without formatting only the mount point of the existing
            // filesystem is taken over
            common.filesystem = self.filesystem(self.mount.as_ref().map(|_| FsType::Ext4));
        } else {
            common.filesystem = self.filesystem(None);
        }
        common
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PartitionConfig {
    /// Restrict the partition to this disk
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk: Option<String>,
    /// Reuse the existing partition with this name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reuse: Option<String>,
    /// Resize the reused partition to `size`
    #[serde(default)]
    pub resize: bool,
    /// Needs a primary slot on MS-DOS partition tables
    #[serde(default)]
    pub primary: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<PartitionId>,
    /// MD RAID this partition is a member of
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raid: Option<String>,
    /// Volume group this partition is a physical volume of
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lvm_group: Option<String>,
    #[serde(flatten)]
    pub sizes: SizeSpec,
    #[serde(flatten)]
    pub fs: FsSpec,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StrayConfig {
    /// Existing stray device to reuse (e.g., /dev/xvda1)
    pub reuse: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lvm_group: Option<String>,
    #[serde(flatten)]
    pub fs: FsSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RaidConfig {
    /// Device name (e.g., /dev/md0)
    pub name: String,
    pub level: MdLevel,
    /// Reuse the existing array with this name
    #[serde(default)]
    pub reuse: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lvm_group: Option<String>,
    #[serde(flatten)]
    pub fs: FsSpec,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VolumeGroupConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extent_size: Option<DiskSize>,
    /// Reuse the existing volume group with this name
    #[serde(default)]
    pub reuse: bool,
    #[serde(default, rename = "lv", skip_serializing_if = "Vec::is_empty")]
    pub lvs: Vec<LvConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LvConfig {
    pub name: String,
    /// Reuse the existing logical volume with this name in the group
    #[serde(default)]
    pub reuse: bool,
    #[serde(default)]
    pub resize: bool,
    #[serde(flatten)]
    pub sizes: SizeSpec,
    #[serde(flatten)]
    pub fs: FsSpec,
}

fn default_kind() -> PartitionKind {
    PartitionKind::Primary
}

fn default_extent_size() -> DiskSize {
    DEFAULT_EXTENT_SIZE
}

fn membership(
    what: &str,
    raid: &Option<String>,
    lvm_group: &Option<String>,
) -> Result<Option<Membership>> {
    match (raid, lvm_group) {
        (Some(_), Some(_)) => Err(StrataplanError::ValidationError(format!(
            "{} cannot be both a RAID member and a physical volume",
            what
        ))),
        (Some(raid), None) => Ok(Some(Membership::Raid(raid.clone()))),
        (None, Some(vg)) => Ok(Some(Membership::Vg(vg.clone()))),
        (None, None) => Ok(None),
    }
}

/// Common payload of a device that may be reused (and resized) or created
fn planned_common(
    what: &str,
    reuse: Option<&str>,
    resize: bool,
    sizes: &SizeSpec,
    fs: &FsSpec,
) -> Result<PlannedCommon> {
    let common = match reuse {
        Some(name) if resize => {
            let size = sizes.size.ok_or_else(|| {
                StrataplanError::ValidationError(format!("{}: 'resize' needs a 'size'", what))
            })?;
            PlannedCommon::reuse_resized(name, size)
        }
        Some(name) => PlannedCommon::reuse(name),
        None => {
            let (min, max) = sizes.bounds(what)?;
            PlannedCommon::create(min, max).with_weight(sizes.weight.unwrap_or(0))
        }
    };
    Ok(fs.apply(common))
}

impl Profile {
    /// Load profile from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let profile: Profile = toml::from_str(&content)?;
        Ok(profile)
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Sample profile: a RAID1 of a new partition and a Xen virtual
    /// partition, holding a volume group with the root filesystem
    pub fn sample() -> Self {
        Profile {
            disks: vec!["/dev/sda".to_string()],
            topology: TopologyConfig {
                disks: vec![DiskTopology {
                    name: "/dev/sda".to_string(),
                    size: DiskSize::gib(21),
                    ptable: PartitionTableType::Gpt,
                    partitions: Vec::new(),
                }],
                strays: vec![StrayTopology {
                    name: "/dev/xvda1".to_string(),
                    size: DiskSize::gib(10),
                    fs: FsSpec::default(),
                }],
                raids: Vec::new(),
                vgs: Vec::new(),
            },
            partitions: vec![PartitionConfig {
                disk: Some("/dev/sda".to_string()),
                raid: Some("/dev/md0".to_string()),
                sizes: SizeSpec::fixed(DiskSize::gib(10)),
                ..PartitionConfig::default()
            }],
            strays: vec![StrayConfig {
                reuse: "/dev/xvda1".to_string(),
                raid: Some("/dev/md0".to_string()),
                ..StrayConfig::default()
            }],
            raids: vec![RaidConfig {
                name: "/dev/md0".to_string(),
                level: MdLevel::Raid1,
                reuse: false,
                lvm_group: Some("vg0".to_string()),
                fs: FsSpec::default(),
            }],
            volume_groups: vec![VolumeGroupConfig {
                name: "vg0".to_string(),
                lvs: vec![LvConfig {
                    name: "root".to_string(),
                    sizes: SizeSpec::fixed(DiskSize::gib(5)),
                    fs: FsSpec::with_fs(FsType::Btrfs, "/"),
                    ..LvConfig::default()
                }],
                ..VolumeGroupConfig::default()
            }],
        }
    }

    /// Validate the profile
    pub fn validate(&self) -> Result<()> {
        let known_disks: BTreeSet<&str> =
            self.topology.disks.iter().map(|d| d.name.as_str()).collect();
        for disk in &self.disks {
            if !known_disks.contains(disk.as_str()) {
                return Err(StrataplanError::ValidationError(format!(
                    "Disk {} is not part of the topology",
                    disk
                )));
            }
        }

        if self.disks.is_empty() && self.partitions.iter().any(|p| p.reuse.is_none()) {
            return Err(StrataplanError::ValidationError(
                "New partitions need at least one entry in 'disks'".to_string(),
            ));
        }

        let raid_names = unique_names("RAID", self.raids.iter().map(|r| r.name.as_str()))?;
        let vg_names = unique_names(
            "volume group",
            self.volume_groups.iter().map(|v| v.name.as_str()),
        )?;
        unique_names(
            "reused device",
            self.partitions
                .iter()
                .filter_map(|p| p.reuse.as_deref())
                .chain(self.strays.iter().map(|s| s.reuse.as_str())),
        )?;

        let check_refs = |what: &str,
                          raid: &Option<String>,
                          lvm_group: &Option<String>|
         -> Result<()> {
            match membership(what, raid, lvm_group)? {
                Some(Membership::Raid(name)) if !raid_names.contains(name.as_str()) => {
                    Err(StrataplanError::ValidationError(format!(
                        "{} refers to unknown RAID {}",
                        what, name
                    )))
                }
                Some(Membership::Vg(name)) if !vg_names.contains(name.as_str()) => {
                    Err(StrataplanError::ValidationError(format!(
                        "{} refers to unknown volume group {}",
                        what, name
                    )))
                }
                _ => Ok(()),
            }
        };

        for (idx, part) in self.partitions.iter().enumerate() {
            let what = format!("partition #{}", idx + 1);
            check_refs(&what, &part.raid, &part.lvm_group)?;
            if let Some(disk) = &part.disk {
                if !self.disks.contains(disk) {
                    return Err(StrataplanError::ValidationError(format!(
                        "{} is restricted to {}, which is not in 'disks'",
                        what, disk
                    )));
                }
            }
            planned_common(&what, part.reuse.as_deref(), part.resize, &part.sizes, &part.fs)?;
        }

        for stray in &self.strays {
            check_refs(&stray.reuse, &stray.raid, &stray.lvm_group)?;
        }

        for raid in &self.raids {
            check_refs(&raid.name, &None, &raid.lvm_group)?;
        }

        for vg in &self.volume_groups {
            unique_names(
                &format!("logical volume of {}", vg.name),
                vg.lvs.iter().map(|lv| lv.name.as_str()),
            )?;
            for lv in &vg.lvs {
                let what = lv_path(&vg.name, &lv.name);
                if lv.reuse && !vg.reuse {
                    return Err(StrataplanError::ValidationError(format!(
                        "{} is reused but its volume group is new",
                        what
                    )));
                }
                let reuse = lv.reuse.then(|| what.clone());
                planned_common(&what, reuse.as_deref(), lv.resize, &lv.sizes, &lv.fs)?;
            }
        }

        Ok(())
    }

    /// Devicegraph of the machine before the install
    pub fn to_devicegraph(&self) -> Result<Devicegraph> {
        let mut graph = Devicegraph::new();

        for disk_cfg in &self.topology.disks {
            let mut disk = Disk::new(&disk_cfg.name, disk_cfg.size, disk_cfg.ptable);
            for part in &disk_cfg.partitions {
                let region = Region::new(part.start, part.size);
                let taken = disk.partitions.iter().any(|p| p.number == part.number);
                if region.end() > disk.size || taken {
                    return Err(StrataplanError::ConfigError(format!(
                        "Partition {} does not fit on {}",
                        disk.partition_name(part.number),
                        disk.name
                    )));
                }
                disk.add_partition(Partition {
                    name: disk.partition_name(part.number),
                    number: part.number,
                    region,
                    kind: part.kind,
                    id: part.id,
                    filesystem: part.fs.filesystem(None),
                });
            }
            graph.disks.push(disk);
        }

        for stray in &self.topology.strays {
            graph.strays.push(StrayBlkDevice {
                name: stray.name.clone(),
                size: stray.size,
                filesystem: stray.fs.filesystem(None),
            });
        }

        for raid in &self.topology.raids {
            let sizes = raid
                .devices
                .iter()
                .map(|d| {
                    graph
                        .blk_size(d)
                        .ok_or_else(|| StrataplanError::DeviceNotFound(d.clone()))
                })
                .collect::<Result<Vec<_>>>()?;
            let size = raid.level.array_size(&sizes);
            graph.mds.push(Md {
                name: raid.name.clone(),
                level: raid.level,
                devices: raid.devices.clone(),
                size,
                filesystem: raid.fs.filesystem(None),
            });
        }

        for vg_cfg in &self.topology.vgs {
            let mut vg = LvmVg::new(&vg_cfg.name, vg_cfg.extent_size);
            for device in &vg_cfg.pvs {
                let size = graph
                    .blk_size(device)
                    .ok_or_else(|| StrataplanError::DeviceNotFound(device.clone()))?;
                vg.pvs.push(LvmPv {
                    device: device.clone(),
                    size,
                });
            }
            vg.lvs = vg_cfg
                .lvs
                .iter()
                .map(|lv| LvmLv {
                    name: lv.name.clone(),
                    size: lv.size,
                    filesystem: lv.fs.filesystem(None),
                })
                .collect();
            graph.vgs.push(vg);
        }

        let device_count = graph.disks.iter().map(|d| d.partitions.len() + 1).sum::<usize>()
            + graph.strays.len()
            + graph.mds.len()
            + graph.vgs.iter().map(|v| v.lvs.len() + 1).sum::<usize>();
        if graph.device_names().len() != device_count {
            return Err(StrataplanError::ConfigError(
                "Topology declares the same device name twice".to_string(),
            ));
        }

        Ok(graph)
    }

    /// Planned devices of the install, in profile order
    pub fn to_catalog(&self) -> Result<DevicesCollection> {
        let mut devices: Vec<PlannedDevice> = Vec::new();

        for (idx, cfg) in self.partitions.iter().enumerate() {
            let what = format!("partition #{}", idx + 1);
            let common =
                planned_common(&what, cfg.reuse.as_deref(), cfg.resize, &cfg.sizes, &cfg.fs)?;
            let mut part = PlannedPartition::new(common).primary(cfg.primary);
            if let Some(disk) = &cfg.disk {
                part = part.on_disk(disk);
            }
            if let Some(membership) = membership(&what, &cfg.raid, &cfg.lvm_group)? {
                part = part.member_of(membership);
            }
            if let Some(id) = cfg.id {
                part.partition_id = id;
            }
            devices.push(part.into());
        }

        for cfg in &self.strays {
            let mut stray = PlannedStray::new(&cfg.reuse);
            stray.common = cfg.fs.apply(stray.common);
            if let Some(membership) = membership(&cfg.reuse, &cfg.raid, &cfg.lvm_group)? {
                stray = stray.member_of(membership);
            }
            devices.push(stray.into());
        }

        for cfg in &self.raids {
            let mut md = PlannedMd::new(&cfg.name, cfg.level);
            if cfg.reuse {
                md.common = PlannedCommon::reuse(&cfg.name);
            }
            md.common = cfg.fs.apply(md.common);
            md.belongs_to = cfg.lvm_group.clone().map(Membership::Vg);
            devices.push(md.into());
        }

        for cfg in &self.volume_groups {
            let mut vg = PlannedVg::new(&cfg.name);
            if cfg.reuse {
                vg.common = PlannedCommon::reuse(&cfg.name);
            }
            if let Some(extent_size) = cfg.extent_size {
                vg.extent_size = extent_size;
            }
            for lv in &cfg.lvs {
                let path = lv_path(&cfg.name, &lv.name);
                let reuse = lv.reuse.then(|| path.clone());
                let common = planned_common(&path, reuse.as_deref(), lv.resize, &lv.sizes, &lv.fs)?;
                vg.lvs.push(PlannedLv::new(&lv.name, common));
            }
            devices.push(vg.into());
        }

        Ok(devices.into_iter().collect())
    }
}

fn unique_names<'a, I>(what: &str, names: I) -> Result<BTreeSet<&'a str>>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut seen = BTreeSet::new();
    for name in names {
        if !seen.insert(name) {
            return Err(StrataplanError::ValidationError(format!(
                "Duplicate {} {}",
                what, name
            )));
        }
    }
    Ok(seen)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const PROFILE: &str = r#"
disks = ["/dev/sda"]

[[topology.disk]]
name = "/dev/sda"
size = "21 GiB"
ptable = "gpt"

[[topology.stray]]
name = "/dev/xvda1"
size = "10 GiB"

[[partition]]
disk = "/dev/sda"
size = "10 GiB"
raid = "/dev/md0"

[[stray]]
reuse = "/dev/xvda1"
raid = "/dev/md0"

[[raid]]
name = "/dev/md0"
level = "raid1"
lvm_group = "vg0"

[[volume_group]]
name = "vg0"

[[volume_group.lv]]
name = "root"
size = "5 GiB"
mount = "/"
fs = "btrfs"
"#;

    #[test]
    fn loads_profile_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(PROFILE.as_bytes()).unwrap();

        let profile = Profile::from_file(file.path()).unwrap();
        profile.validate().unwrap();

        let graph = profile.to_devicegraph().unwrap();
        assert_eq!(graph.blk_size("/dev/sda"), Some(DiskSize::gib(21)));
        assert_eq!(graph.blk_size("/dev/xvda1"), Some(DiskSize::gib(10)));

        let catalog = profile.to_catalog().unwrap();
        assert_eq!(catalog.len(), 4);
        let part = catalog.partitions()[0];
        assert_eq!(part.common.min_size, DiskSize::gib(10));
        assert_eq!(part.common.max_size, DiskSize::gib(10));
        assert_eq!(part.partition_id, PartitionId::Raid);
        assert!(catalog.strays()[0].common.is_reuse());
        let vg = catalog.vgs()[0];
        let root = vg.lvs[0].common.filesystem.as_ref().unwrap();
        assert_eq!(root.fs_type, FsType::Btrfs);
        assert_eq!(root.mount_point.as_deref(), Some("/"));
    }

    #[test]
    fn sample_round_trips_through_toml() {
        let text = Profile::sample().to_toml().unwrap();
        let profile: Profile = toml::from_str(&text).unwrap();
        profile.validate().unwrap();
        assert_eq!(profile.to_catalog().unwrap().len(), 4);
        assert_eq!(profile.topology.disks[0].size, DiskSize::gib(21));
    }

    #[test]
    fn rejects_double_membership() {
        let mut profile = Profile::sample();
        profile.partitions[0].lvm_group = Some("vg0".to_string());
        let err = profile.validate().unwrap_err();
        assert!(err.to_string().contains("both"));
    }

    #[test]
    fn rejects_unknown_references() {
        let mut profile = Profile::sample();
        profile.strays[0].raid = Some("/dev/md7".to_string());
        assert!(profile.validate().unwrap_err().to_string().contains("/dev/md7"));

        let mut profile = Profile::sample();
        profile.raids[0].lvm_group = Some("data".to_string());
        assert!(profile.validate().unwrap_err().to_string().contains("data"));
    }

    #[test]
    fn rejects_bad_sizes_and_disks() {
        let mut profile = Profile::sample();
        profile.partitions[0].sizes = SizeSpec {
            min: Some(DiskSize::gib(4)),
            max: Some(DiskSize::gib(2)),
            ..SizeSpec::default()
        };
        assert!(profile.validate().is_err());

        let mut profile = Profile::sample();
        profile.disks = vec!["/dev/sdz".to_string()];
        assert!(profile.validate().is_err());

        let mut profile = Profile::sample();
        profile.disks.clear();
        assert!(profile.validate().is_err());
    }

    #[test]
    fn rejects_duplicates() {
        let mut profile = Profile::sample();
        let raid = profile.raids[0].clone();
        profile.raids.push(raid);
        assert!(profile.validate().unwrap_err().to_string().contains("Duplicate"));
    }

    #[test]
    fn rejects_inconsistent_topology() {
        let mut profile = Profile::sample();
        profile.topology.disks[0].partitions.push(PartitionTopology {
            number: 1,
            start: DiskSize::gib(20),
            size: DiskSize::gib(2),
            kind: PartitionKind::Primary,
            id: PartitionId::Linux,
            fs: FsSpec::default(),
        });
        let err = profile.to_devicegraph().unwrap_err();
        assert!(matches!(err, StrataplanError::ConfigError(_)));

        let mut profile = Profile::sample();
        let stray = profile.topology.strays[0].clone();
        profile.topology.strays.push(stray);
        let err = profile.to_devicegraph().unwrap_err();
        assert!(matches!(err, StrataplanError::ConfigError(_)));
    }

    #[test]
    fn existing_volume_group_is_loaded() {
        let text = r#"
[[topology.stray]]
name = "/dev/xvdb"
size = "20 GiB"

[[topology.vg]]
name = "system"
pvs = ["/dev/xvdb"]

[[topology.vg.lv]]
name = "root"
size = "8 GiB"
fs = "ext4"

[[volume_group]]
name = "system"
reuse = true

[[volume_group.lv]]
name = "root"
reuse = true
resize = true
size = "12 GiB"
"#;
        let profile: Profile = toml::from_str(text).unwrap();
        profile.validate().unwrap();

        let graph = profile.to_devicegraph().unwrap();
        assert_eq!(graph.blk_size("/dev/system/root"), Some(DiskSize::gib(8)));

        let catalog = profile.to_catalog().unwrap();
        let lv = &catalog.vgs()[0].lvs[0];
        assert_eq!(lv.common.reuse_name(), Some("/dev/system/root"));
        assert_eq!(lv.common.resize_target(), Some(DiskSize::gib(12)));
    }
}
