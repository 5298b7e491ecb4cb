//! The focus manager: the current coordinate, the save/restore stack, and
//! the "nearest valid point" resolver behind focus switching.

use crate::api::DebugApi;
use crate::coords::Coords;
use crate::error::Error;
use crate::host::HostDebugger;
use crate::iterator::{IteratorKind, Select};
use crate::session::CudaCore;

/// The current focus and its save/restore stack.
#[derive(Debug, Default)]
pub(crate) struct FocusState {
    current: Option<Coords>,
    saved: Vec<Option<Coords>>,
}

impl FocusState {
    pub(crate) fn current(&self) -> Option<&Coords> {
        self.current.as_ref()
    }

    pub(crate) fn set_current(&mut self, coords: Coords) {
        self.current = Some(coords);
    }

    pub(crate) fn invalidate(&mut self) {
        self.current = None;
    }

    pub(crate) fn save(&mut self) {
        self.saved.push(self.current);
    }

    pub(crate) fn restore(&mut self) {
        if let Some(saved) = self.saved.pop() {
            self.current = saved;
        }
    }
}

/// The slots filled by [`CudaCore::find_valid`].
#[derive(Debug, Default, Clone)]
pub struct Candidates {
    /// A valid point honoring every concrete field of the request, first
    /// in physical order.
    pub exact_physical: Option<Coords>,
    /// Same, first in logical order.
    pub exact_logical: Option<Coords>,
    /// The valid point physically nearest to the request.
    pub closest_physical: Option<Coords>,
    /// The valid point logically nearest to the request.
    pub closest_logical: Option<Coords>,
}

fn physical_distance(request: &Coords, point: &Coords) -> [u64; 4] {
    let d = |r: crate::coords::Coord<u32>, p: crate::coords::Coord<u32>| match (r.exact(), p.exact())
    {
        (Some(r), Some(p)) => (r as u64).abs_diff(p as u64),
        _ => 0,
    };
    [
        d(request.dev, point.dev),
        d(request.sm, point.sm),
        d(request.wp, point.wp),
        d(request.ln, point.ln),
    ]
}

fn logical_distance(request: &Coords, point: &Coords) -> [u64; 7] {
    let d32 = |r: crate::coords::Coord<u32>, p: crate::coords::Coord<u32>| match (r.exact(), p.exact()) {
        (Some(r), Some(p)) => (r as u64).abs_diff(p as u64),
        _ => 0,
    };
    let d64 = |r: crate::coords::Coord<u64>, p: crate::coords::Coord<u64>| match (r.exact(), p.exact()) {
        (Some(r), Some(p)) => r.abs_diff(p),
        _ => 0,
    };
    [
        d64(request.kernel_id, point.kernel_id),
        d32(request.block_idx.z, point.block_idx.z),
        d32(request.block_idx.y, point.block_idx.y),
        d32(request.block_idx.x, point.block_idx.x),
        d32(request.thread_idx.z, point.thread_idx.z),
        d32(request.thread_idx.y, point.thread_idx.y),
        d32(request.thread_idx.x, point.thread_idx.x),
    ]
}

impl<A: DebugApi, H: HostDebugger> CudaCore<A, H> {
    pub fn focus_get_current(&self) -> Option<Coords> {
        self.focus.current().copied()
    }

    pub fn focus_set_current(&mut self, coords: Coords) {
        self.focus.set_current(coords);
    }

    pub fn focus_invalidate(&mut self) {
        self.focus.invalidate();
    }

    pub fn focus_save(&mut self) {
        self.focus.save();
    }

    pub fn focus_restore(&mut self) {
        self.focus.restore();
    }

    /// Whether the focus currently rests on a device point.
    pub fn focus_is_device(&self) -> bool {
        self.focus.current().map(|c| c.valid).unwrap_or(false)
    }

    /// Whether a point agrees with the current focus on every field the
    /// point specifies. Used by the info views to mark the focus row.
    pub(crate) fn coords_is_current(&self, coords: &Coords) -> bool {
        match self.focus.current() {
            Some(current) if current.valid => coords.satisfied_by(current),
            _ => false,
        }
    }

    /// Resolve a (partially specified) request against the valid points on
    /// the hardware, filling one candidate per resolution strategy.
    pub fn find_valid(&mut self, request: &Coords) -> Result<Candidates, Error<A::Error>> {
        let points: Vec<Coords> = self
            .iterate(IteratorKind::Threads, &Coords::wildcard(), Select::VALID)?
            .collect();

        let mut candidates = Candidates::default();

        for point in &points {
            if request.satisfied_by(point) {
                let better_physical = match &candidates.exact_physical {
                    None => true,
                    Some(best) => Coords::compare_physical(point, best).is_lt(),
                };
                if better_physical {
                    candidates.exact_physical = Some(*point);
                }

                let better_logical = match &candidates.exact_logical {
                    None => true,
                    Some(best) => Coords::compare_logical(point, best).is_lt(),
                };
                if better_logical {
                    candidates.exact_logical = Some(*point);
                }
            }

            let better_closest_physical = match &candidates.closest_physical {
                None => true,
                Some(best) => {
                    let (dp, db) = (
                        physical_distance(request, point),
                        physical_distance(request, best),
                    );
                    dp < db || (dp == db && Coords::compare_physical(point, best).is_lt())
                }
            };
            if better_closest_physical {
                candidates.closest_physical = Some(*point);
            }

            let better_closest_logical = match &candidates.closest_logical {
                None => true,
                Some(best) => {
                    let (dp, db) = (
                        logical_distance(request, point),
                        logical_distance(request, best),
                    );
                    dp < db || (dp == db && Coords::compare_logical(point, best).is_lt())
                }
            };
            if better_closest_logical {
                candidates.closest_logical = Some(*point);
            }
        }

        Ok(candidates)
    }

    /// Point symbol lookups at the ELF image of a kernel's module, and
    /// make that kernel's context the UI-current one.
    pub(crate) fn kernel_load_elf_images(&mut self, kernel_id: u64) {
        let Some(kernel) = self.kernels.find_by_id(kernel_id) else {
            return;
        };
        let (dev, context_id, module_id) =
            (kernel.dev_id(), kernel.context_id(), kernel.module_id());

        self.current_context = Some(context_id);

        let elf = self.system.devices[dev as usize]
            .contexts
            .find_by_id(context_id)
            .and_then(|c| c.modules().find_by_id(module_id))
            .map(|m| *m.elf_image());
        if let Some(elf) = elf {
            self.host.load_elf_image(module_id, &elf);
        }
    }
}
