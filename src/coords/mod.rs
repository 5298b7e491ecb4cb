//! The coordinate algebra.
//!
//! A debugger focus point lives in two spaces at once: the *physical* space
//! (device, SM, warp, lane) describing where on the hardware a thread runs,
//! and the *logical* space (kernel, grid, block index, thread index)
//! describing which software thread it is. Filters, focus switches, and the
//! `info cuda` views all operate on [`Coords`], an 8-tuple where every field
//! independently carries a concrete value, a wildcard, a reference to the
//! current focus, or nothing at all.

use core::cmp::Ordering;
use core::fmt;

use crate::common::CuDim3;

pub mod parser;

/// One field of a coordinate tuple.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coord<T> {
    /// A concrete value.
    Exact(T),
    /// Matches any value.
    Wildcard,
    /// To be replaced by the corresponding field of the current focus.
    Current,
    /// Not specified at all.
    Invalid,
}

impl<T: Copy + PartialEq> Coord<T> {
    pub fn exact(&self) -> Option<T> {
        match *self {
            Coord::Exact(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_exact(&self) -> bool {
        matches!(self, Coord::Exact(_))
    }

    /// Whether a concrete value satisfies this field when used as a filter.
    ///
    /// `Invalid` and `Current` never match: filters must be evaluated with
    /// [`Coords::evaluate_current`] before use.
    pub fn matches(&self, value: T) -> bool {
        match *self {
            Coord::Exact(v) => v == value,
            Coord::Wildcard => true,
            Coord::Current | Coord::Invalid => false,
        }
    }
}

impl<T: Copy + Into<u64>> Coord<T> {
    /// Ordering key. Concrete values sort first, in value order; the special
    /// values sort above every concrete value, mirroring the out-of-band
    /// sentinel encoding used on the wire.
    fn key(&self) -> u128 {
        const BASE: u128 = 1 << 64;
        match *self {
            Coord::Exact(v) => v.into() as u128,
            Coord::Wildcard => BASE,
            Coord::Current => BASE + 1,
            Coord::Invalid => BASE + 2,
        }
    }
}

impl<T: fmt::Display> fmt::Display for Coord<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Coord::Exact(v) => write!(f, "{}", v),
            Coord::Wildcard => write!(f, "*"),
            Coord::Current => write!(f, "current"),
            Coord::Invalid => write!(f, "?"),
        }
    }
}

/// A 3-vector of coordinate fields, used for block and thread indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordDim3 {
    pub x: Coord<u32>,
    pub y: Coord<u32>,
    pub z: Coord<u32>,
}

impl CoordDim3 {
    pub const WILDCARD: CoordDim3 = CoordDim3 {
        x: Coord::Wildcard,
        y: Coord::Wildcard,
        z: Coord::Wildcard,
    };

    pub const CURRENT: CoordDim3 = CoordDim3 {
        x: Coord::Current,
        y: Coord::Current,
        z: Coord::Current,
    };

    pub const INVALID: CoordDim3 = CoordDim3 {
        x: Coord::Invalid,
        y: Coord::Invalid,
        z: Coord::Invalid,
    };

    pub fn exact(dim: CuDim3) -> CoordDim3 {
        CoordDim3 {
            x: Coord::Exact(dim.x),
            y: Coord::Exact(dim.y),
            z: Coord::Exact(dim.z),
        }
    }

    pub fn as_dim3(&self) -> Option<CuDim3> {
        Some(CuDim3 {
            x: self.x.exact()?,
            y: self.y.exact()?,
            z: self.z.exact()?,
        })
    }

    pub fn matches(&self, dim: CuDim3) -> bool {
        self.x.matches(dim.x) && self.y.matches(dim.y) && self.z.matches(dim.z)
    }

    fn contains_current(&self) -> bool {
        matches!(self.x, Coord::Current)
            || matches!(self.y, Coord::Current)
            || matches!(self.z, Coord::Current)
    }

    fn contains_wildcard(&self) -> bool {
        matches!(self.x, Coord::Wildcard)
            || matches!(self.y, Coord::Wildcard)
            || matches!(self.z, Coord::Wildcard)
    }
}

impl fmt::Display for CoordDim3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{},{})", self.x, self.y, self.z)
    }
}

/// A full coordinate tuple: four physical fields, four logical fields, and a
/// flag marking whether the tuple as a whole denotes a usable point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Coords {
    pub valid: bool,
    pub dev: Coord<u32>,
    pub sm: Coord<u32>,
    pub wp: Coord<u32>,
    pub ln: Coord<u32>,
    pub kernel_id: Coord<u64>,
    pub grid_id: Coord<u64>,
    pub block_idx: CoordDim3,
    pub thread_idx: CoordDim3,
}

/// Why a coordinate tuple failed [`Coords::check_fully_defined`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordsCheckError {
    /// The tuple still contains a `current` field; it has not been evaluated
    /// against the focus.
    UnevaluatedCurrent,
    /// A required field is a wildcard.
    Undefined(&'static str),
}

impl Coords {
    /// Every field a wildcard. The canonical "no filter".
    pub fn wildcard() -> Coords {
        Coords {
            valid: false,
            dev: Coord::Wildcard,
            sm: Coord::Wildcard,
            wp: Coord::Wildcard,
            ln: Coord::Wildcard,
            kernel_id: Coord::Wildcard,
            grid_id: Coord::Wildcard,
            block_idx: CoordDim3::WILDCARD,
            thread_idx: CoordDim3::WILDCARD,
        }
    }

    /// Every field unspecified.
    pub fn invalid() -> Coords {
        Coords {
            valid: false,
            dev: Coord::Invalid,
            sm: Coord::Invalid,
            wp: Coord::Invalid,
            ln: Coord::Invalid,
            kernel_id: Coord::Invalid,
            grid_id: Coord::Invalid,
            block_idx: CoordDim3::INVALID,
            thread_idx: CoordDim3::INVALID,
        }
    }

    /// Every field referring to the current focus.
    pub fn current() -> Coords {
        Coords {
            valid: false,
            dev: Coord::Current,
            sm: Coord::Current,
            wp: Coord::Current,
            ln: Coord::Current,
            kernel_id: Coord::Current,
            grid_id: Coord::Current,
            block_idx: CoordDim3::CURRENT,
            thread_idx: CoordDim3::CURRENT,
        }
    }

    /// A fully concrete point.
    #[allow(clippy::too_many_arguments)]
    pub fn point(
        dev: u32,
        sm: u32,
        wp: u32,
        ln: u32,
        kernel_id: u64,
        grid_id: u64,
        block_idx: CuDim3,
        thread_idx: CuDim3,
    ) -> Coords {
        Coords {
            valid: true,
            dev: Coord::Exact(dev),
            sm: Coord::Exact(sm),
            wp: Coord::Exact(wp),
            ln: Coord::Exact(ln),
            kernel_id: Coord::Exact(kernel_id),
            grid_id: Coord::Exact(grid_id),
            block_idx: CoordDim3::exact(block_idx),
            thread_idx: CoordDim3::exact(thread_idx),
        }
    }

    fn physical_key(&self) -> [u128; 4] {
        [self.dev.key(), self.sm.key(), self.wp.key(), self.ln.key()]
    }

    /// Logical sort key: kernel id, then block index (z, y, x), then thread
    /// index (z, y, x). This order makes the row-major successor of
    /// [`increment_thread`](Coords::increment_thread) adjacent in the sort,
    /// which is what the coalesced views rely on.
    fn logical_key(&self) -> [u128; 7] {
        [
            self.kernel_id.key(),
            self.block_idx.z.key(),
            self.block_idx.y.key(),
            self.block_idx.x.key(),
            self.thread_idx.z.key(),
            self.thread_idx.y.key(),
            self.thread_idx.x.key(),
        ]
    }

    /// Total order over the physical fields (dev, sm, warp, lane).
    pub fn compare_physical(a: &Coords, b: &Coords) -> Ordering {
        a.physical_key().cmp(&b.physical_key())
    }

    /// Total order over the logical fields.
    pub fn compare_logical(a: &Coords, b: &Coords) -> Ordering {
        a.logical_key().cmp(&b.logical_key())
    }

    pub fn contains_current(&self) -> bool {
        matches!(self.dev, Coord::Current)
            || matches!(self.sm, Coord::Current)
            || matches!(self.wp, Coord::Current)
            || matches!(self.ln, Coord::Current)
            || matches!(self.kernel_id, Coord::Current)
            || matches!(self.grid_id, Coord::Current)
            || self.block_idx.contains_current()
            || self.thread_idx.contains_current()
    }

    /// Replace every `current` field by the corresponding field of the
    /// given focus; with no focus, `current` degrades to a wildcard.
    ///
    /// `physical_dominates` is set when the request came in through a
    /// physical selector. In that case, if the substituted physical fields
    /// no longer agree with the focus, any logical `current` field is
    /// relaxed to a wildcard rather than pinned to the stale logical
    /// position of the old focus.
    pub fn evaluate_current(&mut self, focus: Option<&Coords>, physical_dominates: bool) {
        let focus = match focus {
            Some(f) if f.valid => *f,
            _ => Coords::wildcard(),
        };

        let subst_u32 = |c: &mut Coord<u32>, f: Coord<u32>| {
            if matches!(*c, Coord::Current) {
                *c = f;
            }
        };
        let subst_u64 = |c: &mut Coord<u64>, f: Coord<u64>| {
            if matches!(*c, Coord::Current) {
                *c = f;
            }
        };

        subst_u32(&mut self.dev, focus.dev);
        subst_u32(&mut self.sm, focus.sm);
        subst_u32(&mut self.wp, focus.wp);
        subst_u32(&mut self.ln, focus.ln);

        let physical_retarget = physical_dominates
            && (retargeted(self.dev, focus.dev)
                || retargeted(self.sm, focus.sm)
                || retargeted(self.wp, focus.wp)
                || retargeted(self.ln, focus.ln));

        let logical_focus = if physical_retarget {
            Coords::wildcard()
        } else {
            focus
        };

        subst_u64(&mut self.kernel_id, logical_focus.kernel_id);
        subst_u64(&mut self.grid_id, logical_focus.grid_id);
        subst_u32(&mut self.block_idx.x, logical_focus.block_idx.x);
        subst_u32(&mut self.block_idx.y, logical_focus.block_idx.y);
        subst_u32(&mut self.block_idx.z, logical_focus.block_idx.z);
        subst_u32(&mut self.thread_idx.x, logical_focus.thread_idx.x);
        subst_u32(&mut self.thread_idx.y, logical_focus.thread_idx.y);
        subst_u32(&mut self.thread_idx.z, logical_focus.thread_idx.z);
    }

    /// Verify that the tuple is usable by a consumer with the given
    /// requirements.
    ///
    /// A leftover `current` field is always an error: the tuple must go
    /// through [`evaluate_current`](Coords::evaluate_current) first. A
    /// required field must not be a wildcard unless `allow_partial` is set.
    /// Unspecified (`Invalid`) fields never fail the check: they mean the
    /// consumer did not ask about that axis at all.
    pub fn check_fully_defined(
        &self,
        physical_required: bool,
        logical_required: bool,
        allow_partial: bool,
    ) -> Result<(), CoordsCheckError> {
        if self.contains_current() {
            return Err(CoordsCheckError::UnevaluatedCurrent);
        }

        if allow_partial {
            return Ok(());
        }

        if physical_required {
            for (name, c) in [
                ("device", self.dev),
                ("sm", self.sm),
                ("warp", self.wp),
                ("lane", self.ln),
            ] {
                if matches!(c, Coord::Wildcard) {
                    return Err(CoordsCheckError::Undefined(name));
                }
            }
        }

        if logical_required {
            if matches!(self.kernel_id, Coord::Wildcard) {
                return Err(CoordsCheckError::Undefined("kernel"));
            }
            if matches!(self.grid_id, Coord::Wildcard) {
                return Err(CoordsCheckError::Undefined("grid"));
            }
            if self.block_idx.contains_wildcard() {
                return Err(CoordsCheckError::Undefined("block"));
            }
            if self.thread_idx.contains_wildcard() {
                return Err(CoordsCheckError::Undefined("thread"));
            }
        }

        Ok(())
    }

    /// Whether `point` honors every concrete field of this request.
    /// Non-concrete request fields constrain nothing.
    pub fn satisfied_by(&self, point: &Coords) -> bool {
        let field_u32 = |req: Coord<u32>, got: Coord<u32>| match req {
            Coord::Exact(v) => got == Coord::Exact(v),
            _ => true,
        };
        let field_u64 = |req: Coord<u64>, got: Coord<u64>| match req {
            Coord::Exact(v) => got == Coord::Exact(v),
            _ => true,
        };

        field_u32(self.dev, point.dev)
            && field_u32(self.sm, point.sm)
            && field_u32(self.wp, point.wp)
            && field_u32(self.ln, point.ln)
            && field_u64(self.kernel_id, point.kernel_id)
            && field_u64(self.grid_id, point.grid_id)
            && field_u32(self.block_idx.x, point.block_idx.x)
            && field_u32(self.block_idx.y, point.block_idx.y)
            && field_u32(self.block_idx.z, point.block_idx.z)
            && field_u32(self.thread_idx.x, point.thread_idx.x)
            && field_u32(self.thread_idx.y, point.thread_idx.y)
            && field_u32(self.thread_idx.z, point.thread_idx.z)
    }

    /// Step the block index to its row-major successor within `grid_dim`.
    ///
    /// Returns `false` (and marks the block index unspecified) once the last
    /// block of the grid has been passed.
    pub fn increment_block(&mut self, grid_dim: CuDim3) -> bool {
        let Some(mut b) = self.block_idx.as_dim3() else {
            return false;
        };

        if b.x + 1 < grid_dim.x {
            b.x += 1;
        } else if b.y + 1 < grid_dim.y {
            b.x = 0;
            b.y += 1;
        } else if b.z + 1 < grid_dim.z {
            b.x = 0;
            b.y = 0;
            b.z += 1;
        } else {
            self.block_idx = CoordDim3::INVALID;
            return false;
        }

        self.block_idx = CoordDim3::exact(b);
        true
    }

    /// Step the thread index to its row-major successor within `block_dim`,
    /// carrying into the next block of `grid_dim` when the block is
    /// exhausted.
    pub fn increment_thread(&mut self, grid_dim: CuDim3, block_dim: CuDim3) -> bool {
        let Some(mut t) = self.thread_idx.as_dim3() else {
            return false;
        };

        if t.x + 1 < block_dim.x {
            t.x += 1;
        } else if t.y + 1 < block_dim.y {
            t.x = 0;
            t.y += 1;
        } else if t.z + 1 < block_dim.z {
            t.x = 0;
            t.y = 0;
            t.z += 1;
        } else {
            self.thread_idx = CoordDim3::exact(CuDim3::new(0, 0, 0));
            return self.increment_block(grid_dim);
        }

        self.thread_idx = CoordDim3::exact(t);
        true
    }

    /// The human-readable rendering used by the `cuda` query and switch
    /// commands. Only concrete fields are printed.
    pub fn to_fancy_string(&self) -> String {
        let mut parts: Vec<String> = Vec::new();

        if let Some(v) = self.kernel_id.exact() {
            parts.push(format!("kernel {}", v));
        }
        if let Some(v) = self.grid_id.exact() {
            parts.push(format!("grid {}", v));
        }
        if let Some(v) = self.block_idx.as_dim3() {
            parts.push(format!("block {}", v));
        }
        if let Some(v) = self.thread_idx.as_dim3() {
            parts.push(format!("thread {}", v));
        }
        if let Some(v) = self.dev.exact() {
            parts.push(format!("device {}", v));
        }
        if let Some(v) = self.sm.exact() {
            parts.push(format!("sm {}", v));
        }
        if let Some(v) = self.wp.exact() {
            parts.push(format!("warp {}", v));
        }
        if let Some(v) = self.ln.exact() {
            parts.push(format!("lane {}", v));
        }

        parts.join(", ")
    }
}

fn retargeted(requested: Coord<u32>, focus: Coord<u32>) -> bool {
    match (requested, focus) {
        (Coord::Exact(r), Coord::Exact(f)) => r != f,
        _ => false,
    }
}
