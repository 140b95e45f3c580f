//! Creation and reuse of every planned device of an unattended install
//!
//! The devicegraph handed to [`AutoinstDevicesCreator::new`] has already
//! been cleaned up: devices the profile asked to delete or resize are gone
//! or resized. The creator only has to place what the profile plans, in four
//! stages that always run in the same order:
//!
//! 1. partitions, created in the free spaces of the given disks or reused
//! 2. stray block devices (e.g. Xen virtual partitions), always reused
//! 3. MD RAID arrays, built from the devices of the two previous stages
//! 4. LVM volume groups, built from the devices of all previous stages
//!
//! When the requested sizes do not fit, a unit (the whole set of new
//! partitions, or the logical volumes of one volume group) is tried a second
//! time with flexible sizes: every minimum drops to one byte and the original
//! minimum becomes the weight, so the space is shrunk proportionally instead
//! of failing. A second failure aborts the run.

use crate::disk::devicegraph::{split_lv_path, Devicegraph};
use crate::planned::{
    flexible_devices, DevicesCollection, Membership, Planned, PlannedDevice, PlannedPartition,
    PlannedVg,
};
use crate::proposal::creator_result::CreatorResult;
use crate::proposal::engine::{DefaultEngine, StorageEngine};
use crate::proposal::members::MemberIndex;
use crate::utils::error::{Result, StrataplanError};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, error, info, warn};

/// A unit placed as a whole: either it fits or it is retried as a whole
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase", tag = "unit", content = "name")]
pub enum PlacementUnit {
    Partitions,
    Md(String),
    Vg(String),
}

impl fmt::Display for PlacementUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Partitions => write!(f, "new partitions"),
            Self::Md(name) => write!(f, "raid {}", name),
            Self::Vg(name) => write!(f, "volume group {}", name),
        }
    }
}

/// How a unit ended up placed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Requested sizes honored
    Exact,
    /// Placed after the flexible retry
    Flexible,
}

/// Outcome of a planning run
#[derive(Debug, Clone)]
pub struct PlanResult {
    pub creator_result: CreatorResult,
    /// Every placed planned device, created or reused
    pub planned_devices: Vec<PlannedDevice>,
    /// Units that only fit with flexible sizes
    pub degraded: Vec<PlacementUnit>,
}

impl PlanResult {
    pub fn devicegraph(&self) -> &Devicegraph {
        self.creator_result.devicegraph()
    }

    pub fn is_degraded(&self) -> bool {
        !self.degraded.is_empty()
    }
}

/// Places the planned devices of a profile into a devicegraph
pub struct AutoinstDevicesCreator<E: StorageEngine = DefaultEngine> {
    original_graph: Devicegraph,
    engine: E,
}

impl AutoinstDevicesCreator<DefaultEngine> {
    pub fn new(original_graph: Devicegraph) -> Self {
        Self::with_engine(original_graph, DefaultEngine)
    }
}

impl<E: StorageEngine> AutoinstDevicesCreator<E> {
    pub fn with_engine(original_graph: Devicegraph, engine: E) -> Self {
        Self {
            original_graph,
            engine,
        }
    }

    pub fn original_graph(&self) -> &Devicegraph {
        &self.original_graph
    }

    /// Devicegraph containing every planned device
    ///
    /// New partitions only go to the free spaces of `disk_names`. The
    /// original devicegraph is never modified; on error nothing of the run
    /// is kept.
    pub fn populated_devicegraph(
        &self,
        planned: &DevicesCollection,
        disk_names: &[String],
    ) -> Result<PlanResult> {
        info!(
            devices = planned.len(),
            disks = ?disk_names,
            "Planning storage layout"
        );
        check_volumes(planned)?;
        let mut degraded = Vec::new();

        let (parts_to_create, parts_to_reuse, mut result) =
            self.process_partitions(planned, disk_names, &mut degraded)?;

        let strays = self.process_strays(planned, result.devicegraph_mut())?;

        // Reused partitions and strays can become members of arrays and groups
        let devs_to_reuse: Vec<PlannedDevice> =
            parts_to_reuse.iter().cloned().chain(strays.iter().cloned()).collect();

        let (mds, result) = self.process_mds(planned, &devs_to_reuse, result)?;

        let (vgs, result) = self.process_vgs(planned, &devs_to_reuse, result, &mut degraded)?;

        let planned_devices: Vec<PlannedDevice> = parts_to_create
            .into_iter()
            .chain(parts_to_reuse)
            .chain(strays)
            .chain(mds)
            .chain(vgs)
            .collect();

        info!(
            placed = planned_devices.len(),
            degraded = degraded.len(),
            "Storage layout planned"
        );
        Ok(PlanResult {
            creator_result: result,
            planned_devices,
            degraded,
        })
    }

    fn process_partitions(
        &self,
        planned: &DevicesCollection,
        disk_names: &[String],
        degraded: &mut Vec<PlacementUnit>,
    ) -> Result<(Vec<PlannedDevice>, Vec<PlannedDevice>, CreatorResult)> {
        let (to_reuse, to_create): (Vec<&PlannedPartition>, Vec<&PlannedPartition>) = planned
            .partitions()
            .into_iter()
            .partition(|p| p.common.is_reuse());
        info!(
            stage = "partitions",
            create = to_create.len(),
            reuse = to_reuse.len(),
            "[Stage 1/4] Partitions"
        );

        // Primary slots are scarce on MS-DOS tables, so primaries go first
        let (primary, non_primary): (Vec<&PlannedPartition>, Vec<&PlannedPartition>) =
            to_create.into_iter().partition(|p| p.primary);
        let to_create: Vec<PlannedPartition> =
            primary.into_iter().chain(non_primary).cloned().collect();

        let mut result = if to_create.is_empty() {
            CreatorResult::new(self.original_graph.clone(), BTreeMap::new())
        } else {
            let (result, placement) =
                place_flexibly(&PlacementUnit::Partitions, &to_create, |parts| {
                    self.create_partitions(parts, disk_names)
                })?;
            if placement == Placement::Flexible {
                degraded.push(PlacementUnit::Partitions);
            }
            result
        };

        let to_reuse: Vec<PlannedDevice> = to_reuse.into_iter().cloned().map(Into::into).collect();
        reuse_devices(&to_reuse, result.devicegraph_mut())?;

        let to_create = to_create.into_iter().map(Into::into).collect();
        Ok((to_create, to_reuse, result))
    }

    fn create_partitions(
        &self,
        parts: &[PlannedPartition],
        disk_names: &[String],
    ) -> Result<CreatorResult> {
        let spaces = self.original_graph.free_spaces(disk_names);
        debug!("{} free spaces on {:?}", spaces.len(), disk_names);
        let distribution = self
            .engine
            .best_distribution(parts, &spaces)
            .ok_or_else(|| {
                StrataplanError::NoDiskSpace(
                    "Could not find a valid partitioning distribution".to_string(),
                )
            })?;
        self.engine
            .create_partitions(&self.original_graph, &distribution)
    }

    fn process_strays(
        &self,
        planned: &DevicesCollection,
        graph: &mut Devicegraph,
    ) -> Result<Vec<PlannedDevice>> {
        let strays: Vec<PlannedDevice> =
            planned.strays().into_iter().cloned().map(Into::into).collect();
        info!(stage = "strays", reuse = strays.len(), "[Stage 2/4] Stray block devices");
        for stray in &strays {
            stray.reuse(graph)?;
        }
        Ok(strays)
    }

    fn process_mds(
        &self,
        planned: &DevicesCollection,
        devs_to_reuse: &[PlannedDevice],
        mut result: CreatorResult,
    ) -> Result<(Vec<PlannedDevice>, CreatorResult)> {
        let (to_reuse, to_create): (Vec<_>, Vec<_>) =
            planned.mds().into_iter().partition(|md| md.common.is_reuse());
        info!(
            stage = "raid",
            create = to_create.len(),
            reuse = to_reuse.len(),
            "[Stage 3/4] RAID arrays"
        );

        // Whole disks and reused partitions are not offered as members
        let reusable_by_md = devs_to_reuse
            .iter()
            .filter(|d| matches!(d, PlannedDevice::StrayBlkDevice(_)));
        let index = MemberIndex::build(&result, reusable_by_md);

        for md in &to_create {
            let unit = PlacementUnit::Md(md.name.clone());
            let members = index.members_of(&Membership::Raid(md.name.clone()));
            debug!(unit = %unit, members = ?members, "Assembling RAID");
            let created = self
                .engine
                .create_md(result.devicegraph(), md, members)
                .inspect_err(|err| error!(unit = %unit, error = %err, "Could not place {}", unit))?;
            info!(unit = %unit, "Placed {}", unit);
            result = result.merge(created);
        }

        for md in &to_reuse {
            md.reuse(result.devicegraph_mut())?;
        }

        let mds = to_create
            .into_iter()
            .chain(to_reuse)
            .cloned()
            .map(Into::into)
            .collect();
        Ok((mds, result))
    }

    fn process_vgs(
        &self,
        planned: &DevicesCollection,
        devs_to_reuse: &[PlannedDevice],
        mut result: CreatorResult,
        degraded: &mut Vec<PlacementUnit>,
    ) -> Result<(Vec<PlannedDevice>, CreatorResult)> {
        let vgs = planned.vgs();
        info!(stage = "lvm", groups = vgs.len(), "[Stage 4/4] Volume groups");

        // Members come from the result as it was when the stage started
        let index = MemberIndex::build(&result, devs_to_reuse);

        for vg in &vgs {
            let unit = PlacementUnit::Vg(vg.volume_group_name.clone());
            let pvs = index.members_of(&Membership::Vg(vg.volume_group_name.clone()));
            debug!(unit = %unit, pvs = ?pvs, "Setting up volume group");

            let (created, placement) = place_flexibly(&unit, &vg.lvs, |lvs| {
                let attempt = PlannedVg {
                    lvs: lvs.to_vec(),
                    ..(*vg).clone()
                };
                self.engine
                    .create_volumes(result.devicegraph(), &attempt, pvs)
            })?;
            if placement == Placement::Flexible {
                degraded.push(unit);
            }
            result = result.merge(created);
        }

        for vg in vgs.iter().filter(|vg| vg.common.is_reuse()) {
            vg.reuse(result.devicegraph_mut())?;
            let lvs: Vec<PlannedDevice> = vg
                .lvs
                .iter()
                .filter(|lv| lv.common.is_reuse())
                .cloned()
                .map(Into::into)
                .collect();
            reuse_devices(&lvs, result.devicegraph_mut())?;
        }

        let vgs = vgs.into_iter().cloned().map(Into::into).collect();
        Ok((vgs, result))
    }
}

/// Logical volumes only exist inside a volume group; a reused one must sit
/// in the reused group it is listed under
fn check_volumes(planned: &DevicesCollection) -> Result<()> {
    for device in planned.iter() {
        match device {
            PlannedDevice::LvmLv(lv) => {
                return Err(StrataplanError::ValidationError(format!(
                    "Logical volume {} is not part of any volume group",
                    lv.logical_volume_name
                )));
            }
            PlannedDevice::LvmVg(vg) => {
                for lv in &vg.lvs {
                    let Some(path) = lv.common.reuse_name() else {
                        continue;
                    };
                    if !vg.common.is_reuse() {
                        return Err(StrataplanError::ValidationError(format!(
                            "Volume group {} is new and cannot reuse logical volume {}",
                            vg.real_name(),
                            path
                        )));
                    }
                    if split_lv_path(path).map(|(vg_name, _)| vg_name) != Some(vg.real_name()) {
                        return Err(StrataplanError::ValidationError(format!(
                            "Logical volume {} does not belong to volume group {}",
                            path,
                            vg.real_name()
                        )));
                    }
                }
            }
            _ => {}
        }
    }
    Ok(())
}

/// Try to place `devices` with their sizes; on a capacity error try once
/// more with [`flexible_devices`]
///
/// The flexible copies are built fresh, the devices of the failed attempt
/// are never touched.
fn place_flexibly<D, T, F>(
    unit: &PlacementUnit,
    devices: &[D],
    mut attempt: F,
) -> Result<(T, Placement)>
where
    D: Planned + Clone,
    F: FnMut(&[D]) -> Result<T>,
{
    let err = match attempt(devices) {
        Ok(value) => {
            info!(unit = %unit, "Placed {}", unit);
            return Ok((value, Placement::Exact));
        }
        Err(err) if err.is_capacity() => err,
        Err(err) => {
            error!(unit = %unit, error = %err, "Could not place {}", unit);
            return Err(err);
        }
    };

    warn!(
        unit = %unit,
        error = %err,
        "Not enough space for {}, retrying with flexible sizes",
        unit
    );
    let flexible = flexible_devices(devices);
    match attempt(&flexible) {
        Ok(value) => {
            warn!(unit = %unit, "Placed {} with reduced sizes", unit);
            Ok((value, Placement::Flexible))
        }
        Err(err) => {
            error!(unit = %unit, error = %err, "Could not place {}", unit);
            Err(err)
        }
    }
}

/// Reuse the devices in the devicegraph, shrinking ones first so growing
/// ones can take the space they free
pub fn reuse_devices(devices: &[PlannedDevice], graph: &mut Devicegraph) -> Result<()> {
    let current: &Devicegraph = graph;
    let (shrinking, rest): (Vec<&PlannedDevice>, Vec<&PlannedDevice>) =
        devices.iter().partition(|d| d.shrink(current));

    for device in shrinking.into_iter().chain(rest) {
        debug!(
            "Reusing {} {}",
            device.kind_label(),
            device.reuse_name().unwrap_or("?")
        );
        device.reuse(graph)?;
    }
    Ok(())
}
