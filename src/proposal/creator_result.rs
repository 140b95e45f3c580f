//! Result of every creation step of the pipeline

use crate::disk::devicegraph::Devicegraph;
use crate::planned::{PlannedDevice, PlannedId};
use std::collections::BTreeMap;

/// A devicegraph together with the planned devices created in it so far
///
/// `devices_map` goes from the real device name to the planned device that
/// produced it.
#[derive(Debug, Clone, Default)]
pub struct CreatorResult {
    devicegraph: Devicegraph,
    devices_map: BTreeMap<String, PlannedDevice>,
}

impl CreatorResult {
    pub fn new(devicegraph: Devicegraph, devices_map: BTreeMap<String, PlannedDevice>) -> Self {
        Self {
            devicegraph,
            devices_map,
        }
    }

    pub fn devicegraph(&self) -> &Devicegraph {
        &self.devicegraph
    }

    pub fn devicegraph_mut(&mut self) -> &mut Devicegraph {
        &mut self.devicegraph
    }

    pub fn devices_map(&self) -> &BTreeMap<String, PlannedDevice> {
        &self.devices_map
    }

    /// Combine with the result of a later step
    ///
    /// The devicegraph keeps every device of both results and the maps are
    /// joined; on conflicts `other` wins.
    pub fn merge(self, other: CreatorResult) -> CreatorResult {
        let mut devices_map = self.devices_map;
        devices_map.extend(other.devices_map);
        CreatorResult {
            devicegraph: self.devicegraph.merge(other.devicegraph),
            devices_map,
        }
    }

    /// Names of the created (not reused) devices matching the predicate
    ///
    /// Partitions come first, by disk and then by partition number, followed
    /// by every other device in name order.
    pub fn created_names<P>(&self, predicate: P) -> Vec<String>
    where
        P: Fn(&PlannedDevice) -> bool,
    {
        let mut names: Vec<String> = self
            .devices_map
            .iter()
            .filter(|(_, device)| !device.is_reuse() && predicate(device))
            .map(|(name, _)| name.clone())
            .collect();
        names.sort_by_key(|name| self.creation_order(name));
        names
    }

    fn creation_order(&self, name: &str) -> (usize, u32) {
        self.devicegraph
            .disks
            .iter()
            .enumerate()
            .find_map(|(idx, disk)| disk.partition(name).map(|p| (idx, p.number)))
            .unwrap_or((usize::MAX, 0))
    }

    /// Real name produced for a planned device
    pub fn real_name(&self, planned_id: PlannedId) -> Option<&str> {
        self.devices_map
            .iter()
            .find(|(_, device)| device.planned_id() == planned_id)
            .map(|(name, _)| name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::devicegraph::{
        Disk, MdLevel, Partition, PartitionId, PartitionKind, PartitionTableType, Region,
        StrayBlkDevice,
    };
    use crate::disk::size::DiskSize;
    use crate::planned::{Membership, PlannedCommon, PlannedMd, PlannedPartition};
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    fn md0() -> Membership {
        Membership::Raid("/dev/md0".to_string())
    }

    fn result_with(names: &[String]) -> CreatorResult {
        let mut graph = Devicegraph::new();
        let mut map = BTreeMap::new();
        for name in names {
            graph.strays.push(StrayBlkDevice {
                name: name.clone(),
                size: DiskSize::gib(1),
                filesystem: None,
            });
            let planned =
                PlannedPartition::new(PlannedCommon::create(DiskSize::gib(1), DiskSize::gib(1)));
            map.insert(name.clone(), planned.into());
        }
        CreatorResult::new(graph, map)
    }

    #[test]
    fn created_names_filter_by_predicate() {
        let mut map = BTreeMap::new();
        let size = DiskSize::gib(1);
        let member = PlannedPartition::new(PlannedCommon::create(size, size)).member_of(md0());
        let other = PlannedPartition::new(PlannedCommon::create(size, size));
        let reused = PlannedPartition::new(PlannedCommon::reuse("/dev/sda3"))
            .member_of(Membership::Raid("/dev/md0".to_string()));
        map.insert("/dev/sda1".to_string(), member.into());
        map.insert("/dev/sda2".to_string(), other.into());
        map.insert("/dev/sda3".to_string(), reused.into());
        let result = CreatorResult::new(Devicegraph::new(), map);

        let names = result.created_names(|d| d.belongs_to() == Some(&md0()));
        assert_eq!(names, vec!["/dev/sda1".to_string()]);
    }

    #[test]
    fn created_names_follow_partition_numbers() {
        let mut graph = Devicegraph::new();
        let mut disk = Disk::new("/dev/sda", DiskSize::gib(40), PartitionTableType::Gpt);
        let mut map = BTreeMap::new();
        for number in [2, 10] {
            let name = disk.partition_name(number);
            disk.add_partition(Partition {
                name: name.clone(),
                number,
                region: Region::new(DiskSize::gib(number as u64), DiskSize::gib(1)),
                kind: PartitionKind::Primary,
                id: PartitionId::Raid,
                filesystem: None,
            });
            let planned =
                PlannedPartition::new(PlannedCommon::create(DiskSize::gib(1), DiskSize::gib(1)))
                    .member_of(Membership::Raid("/dev/md0".to_string()));
            map.insert(name, planned.into());
        }
        graph.disks.push(disk);
        map.insert(
            "/dev/md0".to_string(),
            PlannedMd::new("/dev/md0", MdLevel::Raid1).into(),
        );
        let result = CreatorResult::new(graph, map);

        assert_eq!(
            result.created_names(|d| d.belongs_to() == Some(&md0())),
            ["/dev/sda2", "/dev/sda10"]
        );
        assert_eq!(
            result.created_names(|_| true),
            ["/dev/sda2", "/dev/sda10", "/dev/md0"]
        );
    }

    #[test]
    fn real_name_follows_planned_id() {
        let md = PlannedMd::new("/dev/md0", MdLevel::Raid1);
        let id = md.common.planned_id;
        let mut map = BTreeMap::new();
        map.insert("/dev/md0".to_string(), md.into());
        let result = CreatorResult::new(Devicegraph::new(), map);

        assert_eq!(result.real_name(id), Some("/dev/md0"));
        assert_eq!(result.real_name(PlannedId::new()), None);
    }

    proptest! {
        #[test]
        fn merge_is_associative_over_device_sets(
            a in prop::collection::btree_set("/dev/a[0-9]", 0..4),
            b in prop::collection::btree_set("/dev/b[0-9]", 0..4),
            c in prop::collection::btree_set("/dev/c[0-9]", 0..4),
        ) {
            let to_vec = |s: &BTreeSet<String>| s.iter().cloned().collect::<Vec<_>>();
            let (a, b, c) = (to_vec(&a), to_vec(&b), to_vec(&c));

            let left = result_with(&a).merge(result_with(&b)).merge(result_with(&c));
            let right = result_with(&a).merge(result_with(&b).merge(result_with(&c)));

            prop_assert_eq!(left.devicegraph().device_names(), right.devicegraph().device_names());
            prop_assert_eq!(
                left.devices_map().keys().collect::<Vec<_>>(),
                right.devices_map().keys().collect::<Vec<_>>()
            );
            prop_assert_eq!(left.devicegraph().device_names().len(), a.len() + b.len() + c.len());
        }
    }
}
