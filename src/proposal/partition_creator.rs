//! Writes a partitions distribution into a copy of the devicegraph

use crate::disk::devicegraph::{Devicegraph, Partition, PartitionId, PartitionKind};
use crate::planned::PlannedDevice;
use crate::proposal::creator_result::CreatorResult;
use crate::proposal::distribution::PartitionsDistribution;
use crate::utils::error::{Result, StrataplanError};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Create every partition of the distribution on a clone of `original`
///
/// Partitions are numbered the way the kernel does it: primary and extended
/// partitions take the lowest free slot, logical partitions count from 5.
pub fn create_partitions(
    original: &Devicegraph,
    distribution: &PartitionsDistribution,
) -> Result<CreatorResult> {
    let mut graph = original.clone();
    let mut devices_map = BTreeMap::new();

    for planned_disk in &distribution.disks {
        let disk = graph
            .disk_mut(&planned_disk.disk)
            .ok_or_else(|| StrataplanError::DeviceNotFound(planned_disk.disk.clone()))?;
        info!(
            "Creating {} partitions on {} ({})",
            planned_disk.partitions.len(),
            disk.name,
            disk.ptable
        );

        let mut pending_extended = planned_disk.extended;
        for placed in &planned_disk.partitions {
            if placed.kind == PartitionKind::Logical {
                if let Some(region) = pending_extended.take() {
                    let number = disk.next_primary_number().ok_or_else(|| {
                        StrataplanError::NoDiskSpace(format!(
                            "No primary slot left on {} for an extended partition",
                            disk.name
                        ))
                    })?;
                    let name = disk.partition_name(number);
                    debug!("Opening extended partition {} at {}", name, region.start);
                    disk.add_partition(Partition {
                        name,
                        number,
                        region,
                        kind: PartitionKind::Extended,
                        id: PartitionId::Linux,
                        filesystem: None,
                    });
                }
            }

            let number = match placed.kind {
                PartitionKind::Logical => disk.next_logical_number(),
                PartitionKind::Primary | PartitionKind::Extended => {
                    disk.next_primary_number().ok_or_else(|| {
                        StrataplanError::NoDiskSpace(format!(
                            "No primary slot left on {}",
                            disk.name
                        ))
                    })?
                }
            };
            let name = disk.partition_name(number);
            debug!(
                "Partition {}: {} {} at {}",
                name, placed.kind, placed.region.size, placed.region.start
            );
            disk.add_partition(Partition {
                name: name.clone(),
                number,
                region: placed.region,
                kind: placed.kind,
                id: placed.planned.partition_id,
                filesystem: placed.planned.common.filesystem.clone(),
            });
            devices_map.insert(name, PlannedDevice::Partition(placed.planned.clone()));
        }
    }

    Ok(CreatorResult::new(graph, devices_map))
}
