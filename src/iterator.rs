//! Hierarchical iteration over the device state, filtered by a coordinate
//! mask.
//!
//! An iterator snapshots the matching points at creation time (walking the
//! mirror, which lazily faults in whatever the filter touches), sorts them
//! along its axis, and then yields unique points. Physical kinds iterate
//! device → SM → warp → lane order; logical kinds iterate kernel →
//! block (z,y,x) → thread (z,y,x) order.

use bitflags::bitflags;

use crate::api::DebugApi;
use crate::common::CuDim3;
use crate::coords::{Coord, CoordDim3, Coords};
use crate::error::Error;
use crate::host::HostDebugger;
use crate::session::CudaCore;

bitflags! {
    /// Which points an iterator yields.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Select: u8 {
        /// Only valid points. Without this flag every point in range is
        /// yielded, valid or not.
        const VALID         = 1 << 0;
        /// Only lanes stopped at a host breakpoint.
        const AT_BREAKPOINT = 1 << 1;
        /// Only lanes with a pending exception.
        const AT_EXCEPTION  = 1 << 2;
        /// Stop after the first matching point.
        const SINGLE        = 1 << 3;
    }
}

impl Select {
    pub const ALL: Select = Select::empty();
}

/// What granularity an iterator yields, and along which axis it orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IteratorKind {
    Devices,
    Sms,
    Warps,
    Lanes,
    Kernels,
    Blocks,
    Threads,
}

impl IteratorKind {
    pub fn is_logical(self) -> bool {
        matches!(
            self,
            IteratorKind::Kernels | IteratorKind::Blocks | IteratorKind::Threads
        )
    }

    // Only the fields that uniquely identify a point of this kind are
    // stored; the rest stay wildcards so duplicates collapse in the sort.

    fn store_sm(self) -> bool {
        !matches!(self, IteratorKind::Devices | IteratorKind::Kernels)
    }

    fn store_warp(self) -> bool {
        matches!(
            self,
            IteratorKind::Warps | IteratorKind::Lanes | IteratorKind::Threads
        )
    }

    fn store_lane(self) -> bool {
        matches!(self, IteratorKind::Lanes | IteratorKind::Threads)
    }

    fn store_kernel(self) -> bool {
        !matches!(self, IteratorKind::Devices)
    }

    fn store_block(self) -> bool {
        matches!(
            self,
            IteratorKind::Warps | IteratorKind::Lanes | IteratorKind::Blocks | IteratorKind::Threads
        )
    }

    fn store_thread(self) -> bool {
        matches!(self, IteratorKind::Lanes | IteratorKind::Threads)
    }
}

/// Whether a filter field admits an observed value (`None` = the value
/// does not exist at this point, e.g. the kernel of an invalid warp).
fn admits_u64(filter: Coord<u64>, value: Option<u64>) -> bool {
    match filter {
        Coord::Wildcard => true,
        Coord::Exact(f) => value == Some(f),
        Coord::Current => false,
        Coord::Invalid => value.is_none(),
    }
}

fn admits_u32(filter: Coord<u32>, value: Option<u32>) -> bool {
    match filter {
        Coord::Wildcard => true,
        Coord::Exact(f) => value == Some(f),
        Coord::Current => false,
        Coord::Invalid => value.is_none(),
    }
}

fn admits_dim3(filter: &CoordDim3, value: Option<CuDim3>) -> bool {
    admits_u32(filter.x, value.map(|v| v.x))
        && admits_u32(filter.y, value.map(|v| v.y))
        && admits_u32(filter.z, value.map(|v| v.z))
}

/// A snapshot iterator over coordinate points. See
/// [`CudaCore::iterate`].
#[derive(Debug)]
pub struct CudaIterator {
    kind: IteratorKind,
    list: Vec<Coords>,
    unique: usize,
    next_index: usize,
}

impl CudaIterator {
    fn compare(&self, a: &Coords, b: &Coords) -> core::cmp::Ordering {
        self.kind.compare(a, b)
    }

    /// Number of unique points the iterator yields in total.
    pub fn size(&self) -> usize {
        self.unique
    }
}

impl Iterator for CudaIterator {
    type Item = Coords;

    fn next(&mut self) -> Option<Coords> {
        if self.next_index >= self.list.len() {
            return None;
        }

        let current = self.list[self.next_index];
        self.next_index += 1;

        // hop over duplicate elements
        while self.next_index < self.list.len()
            && self
                .compare(&self.list[self.next_index], &self.list[self.next_index - 1])
                .is_eq()
        {
            self.next_index += 1;
        }

        Some(current)
    }
}

impl<A: DebugApi, H: HostDebugger> CudaCore<A, H> {
    /// Snapshot every point matching `filter` and `select`, ordered along
    /// the iterator's axis.
    ///
    /// The filter must already be evaluated (no `current` fields).
    pub fn iterate(
        &mut self,
        kind: IteratorKind,
        filter: &Coords,
        select: Select,
    ) -> Result<CudaIterator, Error<A::Error>> {
        let valid_only = select.contains(Select::VALID);
        let at_breakpoint = select.contains(Select::AT_BREAKPOINT);
        let at_exception = select.contains(Select::AT_EXCEPTION);
        let single = select.contains(Select::SINGLE);

        let mut list: Vec<Coords> = Vec::new();

        'devices: for dev in 0..self.system_get_num_devices()? {
            if !matches!(filter.dev, Coord::Wildcard) && !filter.dev.matches(dev) {
                continue;
            }

            let (num_sms, num_warps, num_lanes) = self.device_shape(dev)?;

            for sm in 0..num_sms {
                if !matches!(filter.sm, Coord::Wildcard) && !filter.sm.matches(sm) {
                    continue;
                }

                let valid_warps_mask = self.sm_get_valid_warps_mask(dev, sm)?;
                if valid_only && valid_warps_mask == 0 {
                    continue;
                }

                for wp in 0..num_warps {
                    let valid_warp = (valid_warps_mask >> wp) & 1 == 1;
                    if valid_only && !valid_warp {
                        continue;
                    }
                    if !matches!(filter.wp, Coord::Wildcard) && !filter.wp.matches(wp) {
                        continue;
                    }

                    let (kernel_id, grid_id, block_idx) = if valid_warp {
                        (
                            self.warp_get_kernel(dev, sm, wp)?,
                            Some(self.warp_get_grid_id(dev, sm, wp)?),
                            Some(self.warp_get_block_idx(dev, sm, wp)?),
                        )
                    } else {
                        (None, None, None)
                    };

                    if !admits_u64(filter.kernel_id, kernel_id)
                        || !admits_u64(filter.grid_id, grid_id)
                        || !admits_dim3(&filter.block_idx, block_idx)
                    {
                        continue;
                    }

                    let valid_lanes_mask = self.warp_get_valid_lanes_mask(dev, sm, wp)?;

                    for ln in 0..num_lanes {
                        let valid_lane = valid_warp && (valid_lanes_mask >> ln) & 1 == 1;
                        if valid_only && !valid_lane {
                            continue;
                        }
                        if !matches!(filter.ln, Coord::Wildcard) && !filter.ln.matches(ln) {
                            continue;
                        }

                        let thread_idx = if valid_lane {
                            Some(self.lane_get_thread_idx(dev, sm, wp, ln)?)
                        } else {
                            None
                        };

                        if !admits_dim3(&filter.thread_idx, thread_idx) {
                            continue;
                        }

                        // if looking for breakpoints, skip non-broken lanes
                        if at_breakpoint {
                            if !valid_lane || !self.lane_is_active(dev, sm, wp, ln)? {
                                continue;
                            }
                            let pc = self.lane_get_virtual_pc(dev, sm, wp, ln)?;
                            if !self.host.breakpoint_here(pc) {
                                continue;
                            }
                        }

                        // if looking for exceptions, skip healthy lanes
                        if at_exception {
                            if !valid_lane || !self.lane_is_active(dev, sm, wp, ln)? {
                                continue;
                            }
                            if self.lane_get_exception(dev, sm, wp, ln)?.is_none() {
                                continue;
                            }
                        }

                        let mut c = Coords::wildcard();
                        c.valid = true;
                        c.dev = Coord::Exact(dev);
                        if kind.store_sm() {
                            c.sm = Coord::Exact(sm);
                        }
                        if kind.store_warp() {
                            c.wp = Coord::Exact(wp);
                        }
                        if kind.store_lane() {
                            c.ln = Coord::Exact(ln);
                        }
                        if kind.store_kernel() {
                            c.kernel_id = match kernel_id {
                                Some(id) => Coord::Exact(id),
                                None => Coord::Invalid,
                            };
                            c.grid_id = match grid_id {
                                Some(id) => Coord::Exact(id),
                                None => Coord::Invalid,
                            };
                        }
                        if kind.store_block() {
                            c.block_idx = match block_idx {
                                Some(b) => CoordDim3::exact(b),
                                None => CoordDim3::INVALID,
                            };
                        }
                        if kind.store_thread() {
                            c.thread_idx = match thread_idx {
                                Some(t) => CoordDim3::exact(t),
                                None => CoordDim3::INVALID,
                            };
                        }

                        list.push(c);
                        if single {
                            break 'devices;
                        }
                    }
                }
            }
        }

        list.sort_by(|a, b| kind.compare(a, b));

        // count unique elements; duplicates are hopped over during
        // iteration rather than removed
        let mut unique = 0;
        if !list.is_empty() {
            unique = 1;
            for i in 1..list.len() {
                if !kind.compare(&list[i], &list[i - 1]).is_eq() {
                    unique += 1;
                }
            }
        }

        Ok(CudaIterator {
            kind,
            list,
            unique,
            next_index: 0,
        })
    }
}

impl IteratorKind {
    fn compare(self, a: &Coords, b: &Coords) -> core::cmp::Ordering {
        if self.is_logical() {
            Coords::compare_logical(a, b)
        } else {
            Coords::compare_physical(a, b)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{core_with_topology, Topology};

    /// A two-SM topology with a mix of valid and invalid warps.
    fn topo() -> Topology {
        let mut topo = Topology::small();
        topo.num_sms = 2;
        topo.valid_warps.insert((0, 0), 0b101);
        topo.valid_warps.insert((0, 1), 0b010);
        for (sm, wp) in [(0u32, 0u32), (0, 2), (1, 1)] {
            topo.valid_lanes.insert((0, sm, wp), 0b11);
            topo.active_lanes.insert((0, sm, wp), 0b11);
            topo.grid_ids.insert((0, sm, wp), 7);
            topo.block_idxs
                .insert((0, sm, wp), crate::common::CuDim3::new(sm, wp, 0));
            for ln in 0..2 {
                topo.thread_idxs
                    .insert((0, sm, wp, ln), crate::common::CuDim3::new(ln, 0, 0));
            }
        }
        topo
    }

    #[test]
    fn valid_warp_iteration_matches_the_mirror() {
        let mut core = core_with_topology(topo());

        let visited: Vec<_> = core
            .iterate(IteratorKind::Warps, &Coords::wildcard(), Select::VALID)
            .unwrap()
            .map(|c| (c.sm.exact().unwrap(), c.wp.exact().unwrap()))
            .collect();

        // exactly the warps for which warp_is_valid holds, physical order
        assert_eq!(visited, vec![(0, 0), (0, 2), (1, 1)]);
        for (sm, wp) in visited {
            assert!(core.warp_is_valid(0, sm, wp).unwrap());
        }
    }

    #[test]
    fn select_all_includes_invalid_points() {
        let mut core = core_with_topology(topo());

        let itr = core
            .iterate(IteratorKind::Warps, &Coords::wildcard(), Select::ALL)
            .unwrap();
        // 2 sms x num_warps warps, valid or not
        assert_eq!(itr.size(), 2 * 8);
    }

    #[test]
    fn filter_restricts_iteration() {
        let mut core = core_with_topology(topo());

        let mut filter = Coords::wildcard();
        filter.sm = Coord::Exact(1);
        let visited: Vec<_> = core
            .iterate(IteratorKind::Warps, &filter, Select::VALID)
            .unwrap()
            .map(|c| (c.sm.exact().unwrap(), c.wp.exact().unwrap()))
            .collect();
        assert_eq!(visited, vec![(1, 1)]);
    }

    #[test]
    fn single_stops_at_the_first_match() {
        let mut core = core_with_topology(topo());

        let itr = core
            .iterate(
                IteratorKind::Lanes,
                &Coords::wildcard(),
                Select::VALID | Select::SINGLE,
            )
            .unwrap();
        assert_eq!(itr.size(), 1);
    }

    #[test]
    fn breakpoint_selection_needs_an_active_lane_at_a_planted_pc() {
        let mut topo = topo();
        for (sm, wp) in [(0u32, 0u32), (0, 2), (1, 1)] {
            for ln in 0..2 {
                topo.virtual_pcs.insert((0, sm, wp, ln), 0x100 * (wp as u64 + 1));
            }
        }
        let mut core = core_with_topology(topo);
        core.host_mut().breakpoint_pcs.insert(0x300); // warp 2's pc

        let visited: Vec<_> = core
            .iterate(
                IteratorKind::Lanes,
                &Coords::wildcard(),
                Select::VALID | Select::AT_BREAKPOINT,
            )
            .unwrap()
            .map(|c| (c.wp.exact().unwrap(), c.ln.exact().unwrap()))
            .collect();
        assert_eq!(visited, vec![(2, 0), (2, 1)]);
    }

    #[test]
    fn logical_iteration_collapses_duplicate_blocks() {
        let mut topo = Topology::small();
        // two warps of the same block
        topo.valid_warps.insert((0, 0), 0b11);
        for wp in 0..2 {
            topo.valid_lanes.insert((0, 0, wp), 0b1);
            topo.active_lanes.insert((0, 0, wp), 0b1);
            topo.grid_ids.insert((0, 0, wp), 7);
            topo.block_idxs
                .insert((0, 0, wp), crate::common::CuDim3::new(0, 0, 0));
            topo.thread_idxs
                .insert((0, 0, wp, 0), crate::common::CuDim3::new(wp, 0, 0));
        }
        let mut core = core_with_topology(topo);

        let blocks: Vec<_> = core
            .iterate(IteratorKind::Blocks, &Coords::wildcard(), Select::VALID)
            .unwrap()
            .collect();
        assert_eq!(blocks.len(), 1, "one block despite two warps");

        let threads = core
            .iterate(IteratorKind::Threads, &Coords::wildcard(), Select::VALID)
            .unwrap();
        assert_eq!(threads.size(), 2);
    }
}
