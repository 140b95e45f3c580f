//! Placement of planned partitions into the free spaces of the disks
//!
//! [`best_distribution`] assigns every partition to a free space, decides
//! which ones become logical partitions on MS-DOS tables and computes their
//! final sizes. The same weighted size split ([`distribute_space`]) is used
//! for logical volumes inside a volume group.

use crate::disk::devicegraph::{FreeSpace, PartitionKind, PartitionTableType, Region, ALIGN_GRAIN};
use crate::disk::size::DiskSize;
use crate::planned::{PlannedCommon, PlannedPartition};
use serde::Serialize;
use tracing::debug;

/// Search nodes visited before settling for the best distribution found so
/// far. The search goes on until it finds a first one.
const MAX_SEARCH_STEPS: usize = 20_000;

/// Search nodes visited before giving up without any distribution
const SEARCH_STEP_LIMIT: usize = 1_000_000;

/// Size bounds and weight of one device sharing a space with others
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeRequest {
    pub min: DiskSize,
    pub max: DiskSize,
    pub weight: u64,
}

impl SizeRequest {
    pub fn of(common: &PlannedCommon) -> Self {
        Self {
            min: common.min_size,
            max: common.max_size,
            weight: common.weight,
        }
    }
}

/// Split `available` between the requests
///
/// Every request gets its minimum rounded up to `grain` (at least one
/// grain). What is left is handed out in proportion to the weights, evenly
/// when no request has weight, never past a request's max size. Returns
/// `None` when the minimums alone do not fit.
pub fn distribute_space(
    requests: &[SizeRequest],
    available: DiskSize,
    grain: DiskSize,
) -> Option<Vec<DiskSize>> {
    let grain = grain.max(DiskSize::b(1));
    let available = available.floor_align(grain);

    let mut sizes: Vec<DiskSize> = requests
        .iter()
        .map(|r| r.min.ceil_align(grain).max(grain))
        .collect();
    let maxes: Vec<DiskSize> = requests
        .iter()
        .zip(&sizes)
        .map(|(r, min)| r.max.floor_align(grain).max(*min))
        .collect();

    let used: DiskSize = sizes.iter().copied().sum();
    if used > available {
        return None;
    }
    let mut extra = available - used;

    while extra >= grain {
        let active: Vec<usize> = (0..sizes.len()).filter(|&i| sizes[i] < maxes[i]).collect();
        if active.is_empty() {
            break;
        }

        let total_weight: u128 = active.iter().map(|&i| requests[i].weight as u128).sum();
        let mut given = DiskSize::ZERO;
        for &i in &active {
            let share = if total_weight == 0 {
                extra.to_i() / active.len() as u64
            } else {
                (extra.to_i() as u128 * requests[i].weight as u128 / total_weight) as u64
            };
            let share = DiskSize::b(share)
                .floor_align(grain)
                .min(maxes[i] - sizes[i]);
            sizes[i] = sizes[i] + share;
            given = given + share;
        }

        if given.is_zero() {
            // Every share rounded down to nothing: one grain to the heaviest
            let Some(&i) = active.iter().rev().max_by_key(|&&i| requests[i].weight) else {
                break;
            };
            sizes[i] = sizes[i] + grain;
            given = grain;
        }
        extra = extra - given;
    }

    Some(sizes)
}

/// A planned partition with its final position on the disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlacedPartition {
    pub planned: PlannedPartition,
    pub region: Region,
    pub kind: PartitionKind,
}

/// Partitions to create on one disk, in offset order
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiskDistribution {
    pub disk: String,
    /// Extended partition to open before the first new logical partition
    pub extended: Option<Region>,
    pub partitions: Vec<PlacedPartition>,
}

/// Result of the distribution calculator
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PartitionsDistribution {
    pub disks: Vec<DiskDistribution>,
}

impl PartitionsDistribution {
    pub fn partitions(&self) -> impl Iterator<Item = &PlacedPartition> {
        self.disks.iter().flat_map(|d| d.partitions.iter())
    }

    pub fn is_empty(&self) -> bool {
        self.disks.iter().all(|d| d.partitions.is_empty())
    }
}

/// Find the best way to place `partitions` into `spaces`
///
/// Partitions are considered in the given order, which matters on MS-DOS
/// tables: primary slots are handed out first come first served. Among the
/// feasible assignments the one using the fewest free spaces wins; ties go
/// to the first one found, which follows the order of `spaces`.
pub fn best_distribution(
    partitions: &[PlannedPartition],
    spaces: &[FreeSpace],
) -> Option<PartitionsDistribution> {
    let candidates: Vec<Vec<usize>> = partitions
        .iter()
        .map(|part| {
            spaces
                .iter()
                .enumerate()
                .filter(|(_, space)| part.disk.as_ref().map_or(true, |d| *d == space.disk))
                .filter(|(_, space)| !(part.primary && space.within_extended))
                .map(|(idx, _)| idx)
                .collect()
        })
        .collect();

    if let Some(idx) = candidates.iter().position(|c| c.is_empty()) {
        debug!(
            "No free space available for partition {} of {}",
            idx + 1,
            partitions.len()
        );
        return None;
    }

    if let Some(distribution) = single_space_distribution(partitions, spaces, &candidates) {
        debug!("All {} partitions fit in a single space", partitions.len());
        return Some(distribution);
    }

    let mut disk_names: Vec<&str> = Vec::new();
    let mut slots_left = Vec::new();
    let space_disk: Vec<usize> = spaces
        .iter()
        .map(|space| match disk_names.iter().position(|d| *d == space.disk) {
            Some(idx) => idx,
            None => {
                disk_names.push(&space.disk);
                slots_left.push(space.free_primary_slots);
                disk_names.len() - 1
            }
        })
        .collect();

    let mut search = Search {
        partitions,
        spaces,
        candidates: &candidates,
        space_disk,
        slots_left,
        assignment: Vec::with_capacity(partitions.len()),
        load: vec![DiskSize::ZERO; spaces.len()],
        steps: 0,
        best: None,
    };
    search.visit();

    debug!(
        "Distribution search visited {} nodes for {} partitions in {} spaces",
        search.steps,
        partitions.len(),
        spaces.len()
    );
    search.best.map(|(_, distribution)| distribution)
}

struct Search<'a> {
    partitions: &'a [PlannedPartition],
    spaces: &'a [FreeSpace],
    candidates: &'a [Vec<usize>],
    /// Disk index of every space
    space_disk: Vec<usize>,
    /// Primary slots not yet taken on every disk
    slots_left: Vec<u32>,
    assignment: Vec<usize>,
    /// Sum of the aligned minimum sizes assigned to each space
    load: Vec<DiskSize>,
    steps: usize,
    best: Option<(usize, PartitionsDistribution)>,
}

impl Search<'_> {
    fn done(&self) -> bool {
        match self.best {
            Some((1, _)) => true,
            Some(_) => self.steps >= MAX_SEARCH_STEPS,
            None => self.steps >= SEARCH_STEP_LIMIT,
        }
    }

    fn visit(&mut self) {
        self.steps += 1;
        let depth = self.assignment.len();

        if depth == self.partitions.len() {
            if let Some(distribution) = lay_out(self.partitions, self.spaces, &self.assignment) {
                let used = spaces_used(&self.assignment);
                if self.best.as_ref().map_or(true, |(best, _)| used < *best) {
                    self.best = Some((used, distribution));
                }
            }
            return;
        }

        let partitions = self.partitions;
        let part = &partitions[depth];
        let min = aligned_min(part);
        let candidates = self.candidates;
        for &space in &candidates[depth] {
            if self.done() {
                return;
            }
            if self.load[space] + min > self.spaces[space].size() {
                continue;
            }
            let disk = self.space_disk[space];
            let slot = takes_primary_slot(part, &self.spaces[space]);
            if slot && self.slots_left[disk] == 0 {
                continue;
            }

            if slot {
                self.slots_left[disk] -= 1;
            }
            self.load[space] = self.load[space] + min;
            self.assignment.push(space);
            self.visit();
            self.assignment.pop();
            self.load[space] = self.load[space] - min;
            if slot {
                self.slots_left[disk] += 1;
            }
        }
    }
}

fn aligned_min(part: &PlannedPartition) -> DiskSize {
    part.common.min_size.ceil_align(ALIGN_GRAIN).max(ALIGN_GRAIN)
}

/// Whether placing the partition in the space surely uses a primary slot.
/// On MS-DOS tables only partitions asking for one do; the rest may end up
/// logical.
fn takes_primary_slot(part: &PlannedPartition, space: &FreeSpace) -> bool {
    !space.within_extended && (space.ptable != PartitionTableType::Msdos || part.primary)
}

/// Layout with every partition in the first space able to hold them all
fn single_space_distribution(
    partitions: &[PlannedPartition],
    spaces: &[FreeSpace],
    candidates: &[Vec<usize>],
) -> Option<PartitionsDistribution> {
    let load: DiskSize = partitions.iter().map(aligned_min).sum();
    (0..spaces.len())
        .filter(|space| load <= spaces[*space].size())
        .filter(|space| candidates.iter().all(|c| c.contains(space)))
        .find_map(|space| lay_out(partitions, spaces, &vec![space; partitions.len()]))
}

fn spaces_used(assignment: &[usize]) -> usize {
    let mut used = assignment.to_vec();
    used.sort_unstable();
    used.dedup();
    used.len()
}

/// Build the distribution for a complete assignment, if it is feasible
fn lay_out(
    partitions: &[PlannedPartition],
    spaces: &[FreeSpace],
    assignment: &[usize],
) -> Option<PartitionsDistribution> {
    let mut disks: Vec<&str> = Vec::new();
    for space in spaces {
        if !disks.contains(&space.disk.as_str()) {
            disks.push(&space.disk);
        }
    }

    let mut distribution = PartitionsDistribution::default();
    for disk in disks {
        let mut disk_spaces: Vec<(usize, &FreeSpace)> = spaces
            .iter()
            .enumerate()
            .filter(|(_, s)| s.disk == disk)
            .collect();
        disk_spaces.sort_by_key(|(_, s)| s.region.start);

        let groups: Vec<(&FreeSpace, Vec<&PlannedPartition>)> = disk_spaces
            .into_iter()
            .map(|(idx, space)| {
                let parts: Vec<&PlannedPartition> = partitions
                    .iter()
                    .zip(assignment)
                    .filter(|(_, assigned)| **assigned == idx)
                    .map(|(part, _)| part)
                    .collect();
                (space, parts)
            })
            .filter(|(_, parts)| !parts.is_empty())
            .collect();

        if groups.is_empty() {
            continue;
        }
        distribution.disks.push(lay_out_disk(disk, &groups)?);
    }
    Some(distribution)
}

/// Partition kinds and sizes for every space of one disk
fn lay_out_disk(
    disk: &str,
    groups: &[(&FreeSpace, Vec<&PlannedPartition>)],
) -> Option<DiskDistribution> {
    let first = groups.first()?.0;
    let mut free_slots = first.free_primary_slots;
    let mut has_extended = first.has_extended;

    let mut result = DiskDistribution {
        disk: disk.to_string(),
        extended: None,
        partitions: Vec::new(),
    };

    for (space, parts) in groups {
        let mut kinds = Vec::with_capacity(parts.len());
        if space.within_extended {
            kinds.resize(parts.len(), PartitionKind::Logical);
        } else {
            for remaining in (1..=parts.len()).rev() {
                if free_slots == 0 {
                    return None;
                }
                if space.ptable == PartitionTableType::Msdos && free_slots == 1 && remaining > 1 {
                    if has_extended {
                        return None;
                    }
                    has_extended = true;
                    free_slots -= 1;
                    kinds.resize(parts.len(), PartitionKind::Logical);
                    break;
                }
                free_slots -= 1;
                kinds.push(PartitionKind::Primary);
            }
        }

        if parts
            .iter()
            .zip(&kinds)
            .any(|(part, kind)| part.primary && *kind == PartitionKind::Logical)
        {
            return None;
        }

        let logical = kinds.iter().filter(|k| **k == PartitionKind::Logical).count() as u64;
        let ebr = ALIGN_GRAIN.saturating_mul(logical);
        if ebr >= space.size() {
            return None;
        }
        let requests: Vec<SizeRequest> = parts.iter().map(|p| SizeRequest::of(&p.common)).collect();
        let sizes = distribute_space(&requests, space.size() - ebr, ALIGN_GRAIN)?;

        let mut cursor = space.region.start;
        let mut extended_start = None;
        for ((part, kind), size) in parts.iter().zip(kinds).zip(sizes) {
            if kind == PartitionKind::Logical {
                if !space.within_extended && extended_start.is_none() {
                    extended_start = Some(cursor);
                }
                cursor = cursor + ALIGN_GRAIN;
            }
            result.partitions.push(PlacedPartition {
                planned: (*part).clone(),
                region: Region::new(cursor, size),
                kind,
            });
            cursor = cursor + size;
        }
        if let Some(start) = extended_start {
            result.extended = Some(Region::new(start, space.region.end() - start));
        }
    }

    Some(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::devicegraph::Disk;
    use crate::planned::flexible_devices;
    use proptest::prelude::*;

    fn fixed(size: DiskSize) -> PlannedPartition {
        PlannedPartition::new(PlannedCommon::create(size, size))
    }

    fn spaces_of(disks: &[Disk]) -> Vec<FreeSpace> {
        disks.iter().flat_map(|d| d.free_spaces()).collect()
    }

    #[test]
    fn fixed_partitions_fit_in_one_space() {
        let disk = Disk::new("/dev/sda", DiskSize::gib(21), PartitionTableType::Gpt);
        let parts = vec![fixed(DiskSize::gib(10)), fixed(DiskSize::gib(5))];

        let dist = best_distribution(&parts, &spaces_of(&[disk])).unwrap();
        let placed: Vec<_> = dist.partitions().collect();
        assert_eq!(placed.len(), 2);
        assert_eq!(placed[0].region, Region::new(DiskSize::mib(1), DiskSize::gib(10)));
        assert_eq!(placed[1].region.start, DiskSize::mib(1) + DiskSize::gib(10));
        assert!(placed.iter().all(|p| p.kind == PartitionKind::Primary));
        assert_eq!(dist.disks[0].extended, None);
    }

    #[test]
    fn too_big_partitions_have_no_distribution() {
        let disk = Disk::new("/dev/sda", DiskSize::gib(21), PartitionTableType::Gpt);
        let parts = vec![fixed(DiskSize::gib(10)), fixed(DiskSize::gib(15))];
        assert!(best_distribution(&parts, &spaces_of(&[disk])).is_none());
    }

    #[test]
    fn disk_restriction_is_honored() {
        let sda = Disk::new("/dev/sda", DiskSize::gib(50), PartitionTableType::Gpt);
        let sdb = Disk::new("/dev/sdb", DiskSize::gib(10), PartitionTableType::Gpt);
        let parts = vec![fixed(DiskSize::gib(2)).on_disk("/dev/sdb")];

        let dist = best_distribution(&parts, &spaces_of(&[sda, sdb])).unwrap();
        assert_eq!(dist.disks.len(), 1);
        assert_eq!(dist.disks[0].disk, "/dev/sdb");
    }

    #[test]
    fn partitions_spread_over_disks_when_needed() {
        let sda = Disk::new("/dev/sda", DiskSize::gib(10), PartitionTableType::Gpt);
        let sdb = Disk::new("/dev/sdb", DiskSize::gib(10), PartitionTableType::Gpt);
        let parts = vec![fixed(DiskSize::gib(8)), fixed(DiskSize::gib(8))];

        let dist = best_distribution(&parts, &spaces_of(&[sda, sdb])).unwrap();
        assert_eq!(dist.disks.len(), 2);
    }

    #[test]
    fn msdos_primary_first_opens_extended_for_the_rest() {
        let disk = Disk::new("/dev/sda", DiskSize::gib(50), PartitionTableType::Msdos);
        let mut parts = vec![
            fixed(DiskSize::gib(1)).primary(true),
            fixed(DiskSize::gib(1)).primary(true),
        ];
        parts.extend((0..3).map(|_| fixed(DiskSize::gib(2))));

        let dist = best_distribution(&parts, &spaces_of(&[disk])).unwrap();
        let kinds: Vec<_> = dist.partitions().map(|p| p.kind).collect();
        assert_eq!(
            kinds,
            vec![
                PartitionKind::Primary,
                PartitionKind::Primary,
                PartitionKind::Primary,
                PartitionKind::Logical,
                PartitionKind::Logical,
            ]
        );
        let extended = dist.disks[0].extended.unwrap();
        let logicals: Vec<_> = dist
            .partitions()
            .filter(|p| p.kind == PartitionKind::Logical)
            .collect();
        assert_eq!(logicals[0].region.start, extended.start + ALIGN_GRAIN);
        assert!(logicals[1].region.start >= logicals[0].region.end() + ALIGN_GRAIN);
    }

    #[test]
    fn msdos_primary_last_has_no_distribution() {
        let disk = Disk::new("/dev/sda", DiskSize::gib(50), PartitionTableType::Msdos);
        let mut parts: Vec<_> = (0..3).map(|_| fixed(DiskSize::gib(2))).collect();
        parts.push(fixed(DiskSize::gib(1)).primary(true));
        parts.push(fixed(DiskSize::gib(1)).primary(true));

        assert!(best_distribution(&parts, &spaces_of(&[disk])).is_none());
    }

    #[test]
    fn many_primaries_skip_msdos_disk_for_gpt_one() {
        let sda = Disk::new("/dev/sda", DiskSize::gib(10), PartitionTableType::Msdos);
        let sdb = Disk::new("/dev/sdb", DiskSize::gib(10), PartitionTableType::Gpt);
        let spaces = spaces_of(&[sda, sdb]);

        for count in [8, 18, 40] {
            let parts: Vec<_> = (0..count)
                .map(|_| fixed(DiskSize::mib(10)).primary(true))
                .collect();
            let dist = best_distribution(&parts, &spaces).unwrap();
            assert_eq!(dist.disks.len(), 1);
            assert_eq!(dist.disks[0].disk, "/dev/sdb");
            assert_eq!(dist.partitions().count(), count);
            assert!(dist.partitions().all(|p| p.kind == PartitionKind::Primary));
        }
    }

    #[test]
    fn primaries_split_by_free_slots() {
        let sda = Disk::new("/dev/sda", DiskSize::gib(10), PartitionTableType::Msdos);
        let sdb = Disk::new("/dev/sdb", DiskSize::gib(3), PartitionTableType::Gpt);
        let parts: Vec<_> = (0..6).map(|_| fixed(DiskSize::gib(1)).primary(true)).collect();

        let dist = best_distribution(&parts, &spaces_of(&[sda, sdb])).unwrap();
        assert_eq!(dist.disks[0].disk, "/dev/sda");
        assert_eq!(dist.disks[0].partitions.len(), 4);
        assert_eq!(dist.disks[1].partitions.len(), 2);
        assert!(dist.partitions().all(|p| p.kind == PartitionKind::Primary));
    }

    #[test]
    fn too_many_primaries_give_up_quickly() {
        let sda = Disk::new("/dev/sda", DiskSize::gib(10), PartitionTableType::Msdos);
        let sdb = Disk::new("/dev/sdb", DiskSize::gib(10), PartitionTableType::Msdos);
        let parts: Vec<_> = (0..30).map(|_| fixed(DiskSize::mib(10)).primary(true)).collect();

        assert!(best_distribution(&parts, &spaces_of(&[sda, sdb])).is_none());
    }

    #[test]
    fn flexible_partitions_share_space_by_weight() {
        let disk = Disk::new("/dev/sda", DiskSize::gib(21), PartitionTableType::Gpt);
        let parts = vec![
            PlannedPartition::new(PlannedCommon::create(DiskSize::gib(10), DiskSize::UNLIMITED)),
            PlannedPartition::new(PlannedCommon::create(DiskSize::gib(30), DiskSize::UNLIMITED)),
        ];
        assert!(best_distribution(&parts, &spaces_of(&[disk.clone()])).is_none());

        let dist = best_distribution(&flexible_devices(&parts), &spaces_of(&[disk])).unwrap();
        let sizes: Vec<_> = dist.partitions().map(|p| p.region.size.to_i()).collect();
        assert!(sizes[1] > 2 * sizes[0]);
        assert!(sizes[1] < 4 * sizes[0]);
    }

    #[test]
    fn distribute_space_respects_max_and_splits_evenly_without_weight() {
        let requests = [
            SizeRequest {
                min: DiskSize::gib(1),
                max: DiskSize::gib(2),
                weight: 0,
            },
            SizeRequest {
                min: DiskSize::gib(1),
                max: DiskSize::UNLIMITED,
                weight: 0,
            },
        ];
        let sizes = distribute_space(&requests, DiskSize::gib(10), ALIGN_GRAIN).unwrap();
        assert_eq!(sizes, vec![DiskSize::gib(2), DiskSize::gib(8)]);

        assert!(distribute_space(&requests, DiskSize::mib(1500), ALIGN_GRAIN).is_none());
    }

    proptest! {
        #[test]
        fn flexible_sizes_follow_weights(
            w1 in 1u64..1000,
            w2 in 1u64..1000,
            available_mib in 100u64..20_000,
        ) {
            let grain = ALIGN_GRAIN;
            let requests = [
                SizeRequest { min: DiskSize::b(1), max: DiskSize::UNLIMITED, weight: w1 },
                SizeRequest { min: DiskSize::b(1), max: DiskSize::UNLIMITED, weight: w2 },
            ];
            let available = DiskSize::mib(available_mib);
            let sizes = distribute_space(&requests, available, grain).unwrap();

            let total: DiskSize = sizes.iter().copied().sum();
            prop_assert!(total <= available);
            let extra = (available - grain.saturating_mul(2)).to_i() as f64;
            for (size, weight) in sizes.iter().zip([w1, w2]) {
                prop_assert!(*size >= grain);
                let target = grain.to_i() as f64 + extra * weight as f64 / (w1 + w2) as f64;
                prop_assert!((size.to_i() as f64 - target).abs() <= 3.0 * grain.to_i() as f64);
            }
        }
    }
}
