//! Association between containers (RAID arrays, volume groups) and the real
//! names of the devices that make them up

use crate::planned::{Membership, PlannedDevice};
use crate::proposal::creator_result::CreatorResult;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default)]
pub struct MemberIndex {
    members: BTreeMap<Membership, Vec<String>>,
}

impl MemberIndex {
    /// Collect members from the devices created so far and from the given
    /// reused devices
    ///
    /// Created devices are listed first, in the order of
    /// [`CreatorResult::created_names`], followed by the reused ones in
    /// catalog order.
    pub fn build<'a, I>(result: &CreatorResult, reused: I) -> Self
    where
        I: IntoIterator<Item = &'a PlannedDevice>,
    {
        let mut members: BTreeMap<Membership, Vec<String>> = BTreeMap::new();

        for name in result.created_names(|d| d.belongs_to().is_some()) {
            let membership = result.devices_map().get(&name).and_then(PlannedDevice::belongs_to);
            if let Some(membership) = membership {
                members.entry(membership.clone()).or_default().push(name);
            }
        }

        for device in reused {
            if let (Some(membership), Some(name)) = (device.belongs_to(), device.reuse_name()) {
                let list = members.entry(membership.clone()).or_default();
                if !list.iter().any(|n| n == name) {
                    list.push(name.to_string());
                }
            }
        }

        Self { members }
    }

    /// Real names of the members of a container, empty when it has none
    pub fn members_of(&self, container: &Membership) -> &[String] {
        self.members.get(container).map(Vec::as_slice).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::devicegraph::{
        Devicegraph, Disk, Partition, PartitionId, PartitionKind, PartitionTableType, Region,
    };
    use crate::disk::size::DiskSize;
    use crate::planned::{PlannedCommon, PlannedPartition, PlannedStray};

    #[test]
    fn created_then_reused_members() {
        let md0 = Membership::Raid("/dev/md0".to_string());
        let mut map = BTreeMap::new();
        map.insert(
            "/dev/sda1".to_string(),
            PlannedPartition::new(PlannedCommon::create(DiskSize::gib(1), DiskSize::gib(1)))
                .member_of(md0.clone())
                .into(),
        );
        map.insert(
            "/dev/sda2".to_string(),
            PlannedPartition::new(PlannedCommon::create(DiskSize::gib(1), DiskSize::gib(1)))
                .member_of(Membership::Vg("vg0".to_string()))
                .into(),
        );
        let result = CreatorResult::new(Devicegraph::new(), map);
        let strays: Vec<PlannedDevice> = vec![
            PlannedStray::new("/dev/xvda1").member_of(md0.clone()).into(),
            PlannedStray::new("/dev/xvdb1").into(),
        ];

        let index = MemberIndex::build(&result, &strays);

        assert_eq!(index.members_of(&md0), ["/dev/sda1", "/dev/xvda1"]);
        assert_eq!(index.members_of(&Membership::Vg("vg0".to_string())), ["/dev/sda2"]);
        assert!(index.members_of(&Membership::Raid("/dev/md9".to_string())).is_empty());
    }

    #[test]
    fn created_members_keep_partition_order() {
        let vg0 = Membership::Vg("vg0".to_string());
        let mut graph = Devicegraph::new();
        let mut disk = Disk::new("/dev/sdb", DiskSize::gib(40), PartitionTableType::Gpt);
        let mut map = BTreeMap::new();
        for number in [1, 2, 10, 11] {
            let name = disk.partition_name(number);
            disk.add_partition(Partition {
                name: name.clone(),
                number,
                region: Region::new(DiskSize::gib(number as u64), DiskSize::gib(1)),
                kind: PartitionKind::Primary,
                id: PartitionId::Lvm,
                filesystem: None,
            });
            let planned =
                PlannedPartition::new(PlannedCommon::create(DiskSize::gib(1), DiskSize::gib(1)))
                    .member_of(vg0.clone());
            map.insert(name, planned.into());
        }
        graph.disks.push(disk);
        let result = CreatorResult::new(graph, map);

        let index = MemberIndex::build(&result, &Vec::<PlannedDevice>::new());

        assert_eq!(
            index.members_of(&vg0),
            ["/dev/sdb1", "/dev/sdb2", "/dev/sdb10", "/dev/sdb11"]
        );
    }
}
