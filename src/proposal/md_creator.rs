//! Assembles MD RAID arrays from member devices

use crate::disk::devicegraph::{Devicegraph, Md};
use crate::planned::{PlannedDevice, PlannedMd};
use crate::proposal::creator_result::CreatorResult;
use crate::utils::error::{Result, StrataplanError};
use std::collections::BTreeMap;
use tracing::info;

/// Create `md` on a clone of `original` using the given member devices
pub fn create_md(
    original: &Devicegraph,
    md: &PlannedMd,
    members: &[String],
) -> Result<CreatorResult> {
    if original.md(&md.name).is_some() {
        return Err(StrataplanError::InvalidRaid(format!(
            "{} already exists",
            md.name
        )));
    }

    let sizes = members
        .iter()
        .map(|name| {
            original
                .blk_size(name)
                .ok_or_else(|| StrataplanError::DeviceNotFound(name.clone()))
        })
        .collect::<Result<Vec<_>>>()?;

    if members.len() < md.level.min_devices() {
        return Err(StrataplanError::InvalidRaid(format!(
            "{} needs at least {} devices for {}, got {}",
            md.name,
            md.level.min_devices(),
            md.level,
            members.len()
        )));
    }

    let size = md.level.array_size(&sizes);
    info!(
        "Assembling {} ({}) from {} devices: {}",
        md.name,
        md.level,
        members.len(),
        size
    );

    let mut graph = original.clone();
    graph.mds.push(Md {
        name: md.name.clone(),
        level: md.level,
        devices: members.to_vec(),
        size,
        filesystem: md.common.filesystem.clone(),
    });

    let mut devices_map = BTreeMap::new();
    devices_map.insert(md.name.clone(), PlannedDevice::Md(md.clone()));
    Ok(CreatorResult::new(graph, devices_map))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::devicegraph::{MdLevel, StrayBlkDevice};
    use crate::disk::size::DiskSize;

    fn graph() -> Devicegraph {
        let mut graph = Devicegraph::new();
        for (name, gib) in [("/dev/xvda1", 10), ("/dev/xvdb1", 12), ("/dev/xvdc1", 10)] {
            graph.strays.push(StrayBlkDevice {
                name: name.to_string(),
                size: DiskSize::gib(gib),
                filesystem: None,
            });
        }
        graph
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn raid1_takes_the_smallest_member() {
        let md = PlannedMd::new("/dev/md0", MdLevel::Raid1);
        let result = create_md(&graph(), &md, &names(&["/dev/xvda1", "/dev/xvdb1"])).unwrap();

        let created = result.devicegraph().md("/dev/md0").unwrap();
        assert_eq!(created.size, DiskSize::gib(10));
        assert_eq!(created.devices.len(), 2);
        assert!(result.devices_map().contains_key("/dev/md0"));
    }

    #[test]
    fn raid5_needs_three_members() {
        let md = PlannedMd::new("/dev/md0", MdLevel::Raid5);
        let err = create_md(&graph(), &md, &names(&["/dev/xvda1", "/dev/xvdb1"])).unwrap_err();
        assert!(matches!(err, StrataplanError::InvalidRaid(_)));

        let members = names(&["/dev/xvda1", "/dev/xvdb1", "/dev/xvdc1"]);
        let result = create_md(&graph(), &md, &members).unwrap();
        assert_eq!(result.devicegraph().md("/dev/md0").unwrap().size, DiskSize::gib(20));
    }

    #[test]
    fn missing_member_is_a_prerequisite_error() {
        let md = PlannedMd::new("/dev/md0", MdLevel::Raid1);
        let err = create_md(&graph(), &md, &names(&["/dev/xvda1", "/dev/sdz1"])).unwrap_err();
        assert!(err.is_prerequisite());
    }
}
