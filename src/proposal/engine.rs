//! Storage engine used by the orchestrator
//!
//! Every operation works on its own clone of the given devicegraph and hands
//! the modified copy back, so a failed call never affects the caller's graph.

use crate::disk::devicegraph::{Devicegraph, FreeSpace};
use crate::planned::{PlannedMd, PlannedPartition, PlannedVg};
use crate::proposal::creator_result::CreatorResult;
use crate::proposal::distribution::{self, PartitionsDistribution};
use crate::proposal::{lvm_creator, md_creator, partition_creator};
use crate::utils::error::Result;

pub trait StorageEngine {
    /// Place the partitions into the free spaces, `None` if they do not fit
    fn best_distribution(
        &self,
        partitions: &[PlannedPartition],
        spaces: &[FreeSpace],
    ) -> Option<PartitionsDistribution>;

    fn create_partitions(
        &self,
        graph: &Devicegraph,
        distribution: &PartitionsDistribution,
    ) -> Result<CreatorResult>;

    fn create_md(
        &self,
        graph: &Devicegraph,
        md: &PlannedMd,
        members: &[String],
    ) -> Result<CreatorResult>;

    /// Create or extend the volume group and create its logical volumes
    fn create_volumes(
        &self,
        graph: &Devicegraph,
        vg: &PlannedVg,
        pvs: &[String],
    ) -> Result<CreatorResult>;
}

/// In-memory engine working on the devicegraph model
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultEngine;

impl StorageEngine for DefaultEngine {
    fn best_distribution(
        &self,
        partitions: &[PlannedPartition],
        spaces: &[FreeSpace],
    ) -> Option<PartitionsDistribution> {
        distribution::best_distribution(partitions, spaces)
    }

    fn create_partitions(
        &self,
        graph: &Devicegraph,
        distribution: &PartitionsDistribution,
    ) -> Result<CreatorResult> {
        partition_creator::create_partitions(graph, distribution)
    }

    fn create_md(
        &self,
        graph: &Devicegraph,
        md: &PlannedMd,
        members: &[String],
    ) -> Result<CreatorResult> {
        md_creator::create_md(graph, md, members)
    }

    fn create_volumes(
        &self,
        graph: &Devicegraph,
        vg: &PlannedVg,
        pvs: &[String],
    ) -> Result<CreatorResult> {
        lvm_creator::create_volumes(graph, vg, pvs)
    }
}
