//! Read-only catalog of planned devices

use super::{PlannedDevice, PlannedMd, PlannedPartition, PlannedStray, PlannedVg};

/// Planned devices supplied once per planning run
#[derive(Debug, Clone, Default)]
pub struct DevicesCollection {
    devices: Vec<PlannedDevice>,
}

impl DevicesCollection {
    pub fn new(devices: Vec<PlannedDevice>) -> Self {
        Self { devices }
    }

    pub fn iter(&self) -> impl Iterator<Item = &PlannedDevice> {
        self.devices.iter()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn partitions(&self) -> Vec<&PlannedPartition> {
        self.devices
            .iter()
            .filter_map(|d| match d {
                PlannedDevice::Partition(p) => Some(p),
                PlannedDevice::StrayBlkDevice(_)
                | PlannedDevice::Md(_)
                | PlannedDevice::LvmVg(_)
                | PlannedDevice::LvmLv(_) => None,
            })
            .collect()
    }

    pub fn strays(&self) -> Vec<&PlannedStray> {
        self.devices
            .iter()
            .filter_map(|d| match d {
                PlannedDevice::StrayBlkDevice(s) => Some(s),
                PlannedDevice::Partition(_)
                | PlannedDevice::Md(_)
                | PlannedDevice::LvmVg(_)
                | PlannedDevice::LvmLv(_) => None,
            })
            .collect()
    }

    pub fn mds(&self) -> Vec<&PlannedMd> {
        self.devices
            .iter()
            .filter_map(|d| match d {
                PlannedDevice::Md(m) => Some(m),
                PlannedDevice::Partition(_)
                | PlannedDevice::StrayBlkDevice(_)
                | PlannedDevice::LvmVg(_)
                | PlannedDevice::LvmLv(_) => None,
            })
            .collect()
    }

    /// Volume groups, each carrying its own logical volumes
    pub fn vgs(&self) -> Vec<&PlannedVg> {
        self.devices
            .iter()
            .filter_map(|d| match d {
                PlannedDevice::LvmVg(v) => Some(v),
                PlannedDevice::Partition(_)
                | PlannedDevice::StrayBlkDevice(_)
                | PlannedDevice::Md(_)
                | PlannedDevice::LvmLv(_) => None,
            })
            .collect()
    }
}

impl FromIterator<PlannedDevice> for DevicesCollection {
    fn from_iter<I: IntoIterator<Item = PlannedDevice>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}
