//! Volume group assembly and logical volume creation

use crate::disk::devicegraph::{Devicegraph, LvmLv, LvmPv, LvmVg};
use crate::disk::size::DiskSize;
use crate::planned::{PlannedDevice, PlannedLv, PlannedVg};
use crate::proposal::creator_result::CreatorResult;
use crate::proposal::distribution::{distribute_space, SizeRequest};
use crate::utils::error::{Result, StrataplanError};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Create (or extend, when reused) the volume group on a clone of
/// `original` and create its new logical volumes
///
/// Reused logical volumes are left alone here; they are resized and
/// formatted once every group is in place.
pub fn create_volumes(
    original: &Devicegraph,
    vg: &PlannedVg,
    pvs: &[String],
) -> Result<CreatorResult> {
    let name = vg.real_name().to_string();
    let mut graph = original.clone();
    let mut devices_map = BTreeMap::new();

    let pvs = pvs
        .iter()
        .map(|device| {
            let size = graph
                .blk_size(device)
                .ok_or_else(|| StrataplanError::DeviceNotFound(device.clone()))?;
            Ok(LvmPv {
                device: device.clone(),
                size,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    if vg.common.is_reuse() {
        let existing = graph
            .vg_mut(&name)
            .ok_or_else(|| StrataplanError::DeviceNotFound(name.clone()))?;
        for pv in pvs {
            if !existing.has_pv(&pv.device) {
                debug!("Extending volume group {} with {}", name, pv.device);
                existing.pvs.push(pv);
            }
        }
    } else {
        if graph.vg(&name).is_some() {
            return Err(StrataplanError::ValidationError(format!(
                "Volume group {} already exists",
                name
            )));
        }
        if pvs.is_empty() {
            return Err(StrataplanError::NoDiskSpace(format!(
                "No physical volumes available for volume group {}",
                name
            )));
        }
        let mut created = LvmVg::new(&name, vg.extent_size);
        created.pvs = pvs;
        info!(
            "Creating volume group {} on {} physical volumes: {}",
            name,
            created.pvs.len(),
            created.size()
        );
        graph.vgs.push(created);
        devices_map.insert(name.clone(), PlannedDevice::LvmVg(vg.clone()));
    }

    let target = graph
        .vg_mut(&name)
        .ok_or_else(|| StrataplanError::DeviceNotFound(name.clone()))?;
    let new_lvs: Vec<&PlannedLv> = vg.lvs.iter().filter(|lv| !lv.common.is_reuse()).collect();
    if let Some(clash) = new_lvs
        .iter()
        .find(|lv| target.lv(&lv.logical_volume_name).is_some())
    {
        return Err(StrataplanError::ValidationError(format!(
            "Logical volume {} already exists",
            clash.path_in(&name)
        )));
    }

    let requests: Vec<SizeRequest> = new_lvs.iter().map(|lv| SizeRequest::of(&lv.common)).collect();
    let free = target.free();
    let sizes = distribute_space(&requests, free, target.extent_size).ok_or_else(|| {
        let needed: DiskSize = requests
            .iter()
            .map(|r| r.min.ceil_align(target.extent_size))
            .sum();
        StrataplanError::NoDiskSpace(format!(
            "Logical volumes of {} need {} but only {} is free",
            name, needed, free
        ))
    })?;

    for (lv, size) in new_lvs.into_iter().zip(sizes) {
        debug!("Logical volume {}: {}", lv.path_in(&name), size);
        target.lvs.push(LvmLv {
            name: lv.logical_volume_name.clone(),
            size,
            filesystem: lv.common.filesystem.clone(),
        });
        devices_map.insert(lv.path_in(&name), PlannedDevice::LvmLv(lv.clone()));
    }

    Ok(CreatorResult::new(graph, devices_map))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::devicegraph::StrayBlkDevice;
    use crate::planned::{flexible_devices, PlannedCommon};

    fn graph() -> Devicegraph {
        let mut graph = Devicegraph::new();
        for name in ["/dev/xvda1", "/dev/xvdb1"] {
            graph.strays.push(StrayBlkDevice {
                name: name.to_string(),
                size: DiskSize::gib(10) + DiskSize::mib(1),
                filesystem: None,
            });
        }
        graph
    }

    fn lv(name: &str, size: DiskSize) -> PlannedLv {
        PlannedLv::new(name, PlannedCommon::create(size, size))
    }

    #[test]
    fn creates_group_and_volumes() {
        let mut vg = PlannedVg::new("vg0");
        vg.lvs = vec![lv("root", DiskSize::gib(5)), lv("home", DiskSize::gib(12))];
        let pvs = vec!["/dev/xvda1".to_string(), "/dev/xvdb1".to_string()];

        let result = create_volumes(&graph(), &vg, &pvs).unwrap();

        let created = result.devicegraph().vg("vg0").unwrap();
        assert_eq!(created.size(), DiskSize::gib(20));
        assert_eq!(created.lv("home").unwrap().size, DiskSize::gib(12));
        let names: Vec<_> = result.devices_map().keys().cloned().collect();
        assert_eq!(names, vec!["/dev/vg0/home", "/dev/vg0/root", "vg0"]);
    }

    #[test]
    fn oversized_volumes_are_a_capacity_error() {
        let mut vg = PlannedVg::new("vg0");
        vg.lvs = vec![lv("root", DiskSize::gib(8)), lv("home", DiskSize::gib(4))];
        let pvs = vec!["/dev/xvda1".to_string()];

        let err = create_volumes(&graph(), &vg, &pvs).unwrap_err();
        assert!(err.is_capacity());

        vg.lvs = flexible_devices(&vg.lvs);
        let result = create_volumes(&graph(), &vg, &pvs).unwrap();
        let group = result.devicegraph().vg("vg0").unwrap();
        let root = group.lv("root").unwrap().size;
        let home = group.lv("home").unwrap().size;
        assert!(root > home);
        assert!(root + home <= group.size());
    }

    #[test]
    fn reused_group_gets_new_pv_and_volume() {
        let mut base = graph();
        let mut existing = LvmVg::new("system", DiskSize::mib(4));
        existing.pvs.push(LvmPv {
            device: "/dev/xvda1".to_string(),
            size: DiskSize::gib(10) + DiskSize::mib(1),
        });
        base.vgs.push(existing);

        let mut vg = PlannedVg::new("system");
        vg.common = PlannedCommon::reuse("system");
        vg.lvs = vec![lv("srv", DiskSize::gib(15))];

        let result = create_volumes(&base, &vg, &["/dev/xvdb1".to_string()]).unwrap();
        let group = result.devicegraph().vg("system").unwrap();
        assert_eq!(group.pvs.len(), 2);
        assert!(group.lv("srv").is_some());
        // A reused group is not registered as created
        assert!(!result.devices_map().contains_key("system"));
    }

    #[test]
    fn missing_reused_group_is_a_prerequisite_error() {
        let mut vg = PlannedVg::new("ghost");
        vg.common = PlannedCommon::reuse("ghost");
        let err = create_volumes(&graph(), &vg, &[]).unwrap_err();
        assert!(err.is_prerequisite());
    }
}
