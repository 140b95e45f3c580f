//! Human and machine readable summaries of a plan

use crate::disk::devicegraph::{lv_path, Devicegraph, Filesystem};
use crate::disk::size::DiskSize;
use crate::proposal::{PlacementUnit, PlanResult};
use crate::utils::error::Result;
use serde::Serialize;

/// One line of the summary table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryRow {
    pub device: String,
    pub kind: String,
    pub size: DiskSize,
    pub fs: Option<String>,
    pub mount: Option<String>,
}

impl SummaryRow {
    fn new(device: &str, kind: impl Into<String>, size: DiskSize, fs: Option<&Filesystem>) -> Self {
        Self {
            device: device.to_string(),
            kind: kind.into(),
            size,
            fs: fs.map(|f| f.fs_type.to_string()),
            mount: fs.and_then(|f| f.mount_point.clone()),
        }
    }
}

/// Rows for every device of the devicegraph, grouped by layer
pub fn summary_rows(graph: &Devicegraph) -> Vec<SummaryRow> {
    let mut rows = Vec::new();

    for disk in &graph.disks {
        rows.push(SummaryRow::new(&disk.name, format!("disk ({})", disk.ptable), disk.size, None));
        for part in &disk.partitions {
            rows.push(SummaryRow::new(
                &part.name,
                part.kind.to_string(),
                part.size(),
                part.filesystem.as_ref(),
            ));
        }
    }

    for stray in &graph.strays {
        rows.push(SummaryRow::new(&stray.name, "stray", stray.size, stray.filesystem.as_ref()));
    }

    for md in &graph.mds {
        rows.push(SummaryRow::new(&md.name, md.level.to_string(), md.size, md.filesystem.as_ref()));
    }

    for vg in &graph.vgs {
        rows.push(SummaryRow::new(&vg.name, "vg", vg.size(), None));
        for lv in &vg.lvs {
            rows.push(SummaryRow::new(
                &lv_path(&vg.name, &lv.name),
                "lv",
                lv.size,
                lv.filesystem.as_ref(),
            ));
        }
    }

    rows
}

/// Print plan summary
pub fn print_plan_summary(plan: &PlanResult) {
    println!("\nPlanned topology:");
    println!("{:<22} {:<14} {:>12} {:<8} {:<20}", "DEVICE", "TYPE", "SIZE", "FS", "MOUNT");
    println!("{}", "-".repeat(80));

    for row in summary_rows(plan.devicegraph()) {
        println!(
            "{:<22} {:<14} {:>12} {:<8} {:<20}",
            row.device,
            row.kind,
            row.size.to_string(),
            row.fs.as_deref().unwrap_or("-"),
            row.mount.as_deref().unwrap_or("-")
        );
    }

    if plan.is_degraded() {
        println!();
        for unit in &plan.degraded {
            println!("! {} did not fit; sizes were shrunk proportionally", unit);
        }
    }
    println!();
}

/// A planned device as it ended up in the topology
#[derive(Debug, Clone, Serialize)]
pub struct PlacedDevice {
    pub kind: &'static str,
    pub name: Option<String>,
    pub reused: bool,
}

/// JSON document describing a finished plan
#[derive(Debug, Serialize)]
pub struct PlanReport<'a> {
    pub devicegraph: &'a Devicegraph,
    pub placed: Vec<PlacedDevice>,
    pub degraded: &'a [PlacementUnit],
}

impl<'a> PlanReport<'a> {
    pub fn new(plan: &'a PlanResult) -> Self {
        let placed = plan
            .planned_devices
            .iter()
            .map(|device| PlacedDevice {
                kind: device.kind_label(),
                name: device
                    .reuse_name()
                    .or_else(|| plan.creator_result.real_name(device.planned_id()))
                    .map(str::to_string),
                reused: device.is_reuse(),
            })
            .collect();

        Self {
            devicegraph: plan.devicegraph(),
            placed,
            degraded: &plan.degraded,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::devicegraph::{
        Disk, FsType, LvmLv, LvmPv, LvmVg, Partition, PartitionId, PartitionKind,
        PartitionTableType, Region,
    };
    use crate::planned::{PlannedCommon, PlannedDevice, PlannedPartition};
    use crate::proposal::CreatorResult;
    use std::collections::BTreeMap;

    fn plan() -> PlanResult {
        let mut graph = Devicegraph::new();
        let mut disk = Disk::new("/dev/sda", DiskSize::gib(8), PartitionTableType::Gpt);
        disk.add_partition(Partition {
            name: "/dev/sda1".to_string(),
            number: 1,
            region: Region::new(DiskSize::mib(1), DiskSize::gib(4)),
            kind: PartitionKind::Primary,
            id: PartitionId::Lvm,
            filesystem: None,
        });
        graph.disks.push(disk);
        let mut vg = LvmVg::new("vg0", DiskSize::mib(4));
        vg.pvs.push(LvmPv {
            device: "/dev/sda1".to_string(),
            size: DiskSize::gib(4),
        });
        vg.lvs.push(LvmLv {
            name: "root".to_string(),
            size: DiskSize::gib(3),
            filesystem: Some(Filesystem {
                fs_type: FsType::Xfs,
                mount_point: Some("/".to_string()),
                label: None,
            }),
        });
        graph.vgs.push(vg);

        let part: PlannedDevice =
            PlannedPartition::new(PlannedCommon::create(DiskSize::gib(4), DiskSize::gib(4))).into();
        let mut map = BTreeMap::new();
        map.insert("/dev/sda1".to_string(), part.clone());

        PlanResult {
            creator_result: CreatorResult::new(graph, map),
            planned_devices: vec![part],
            degraded: vec![PlacementUnit::Partitions],
        }
    }

    #[test]
    fn rows_follow_layers() {
        let plan = plan();
        let rows = summary_rows(plan.devicegraph());
        let devices: Vec<_> = rows.iter().map(|r| r.device.as_str()).collect();
        assert_eq!(devices, ["/dev/sda", "/dev/sda1", "vg0", "/dev/vg0/root"]);
        assert_eq!(rows[3].fs.as_deref(), Some("xfs"));
        assert_eq!(rows[3].mount.as_deref(), Some("/"));
    }

    #[test]
    fn json_report_names_placed_devices() {
        let plan = plan();
        let json = PlanReport::new(&plan).to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["placed"][0]["name"], "/dev/sda1");
        assert_eq!(value["placed"][0]["kind"], "partition");
        assert_eq!(value["degraded"][0]["unit"], "partitions");
        assert_eq!(value["devicegraph"]["vgs"][0]["name"], "vg0");
    }
}
