//! The host-debugger port: callbacks the core invokes on the embedding
//! debugger, and the tabular sink the `info cuda` views render into.

use crate::common::{DevId, ElfImage};
use crate::coords::Coords;

/// A resolved source position for a device code address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLine {
    pub filename: String,
    pub line: u32,
}

/// Callbacks into the embedding debugger.
///
/// Every method has a no-op default so embedders (and tests) only wire up
/// the surfaces they care about. Breakpoint storage in particular stays on
/// the host side; the core only drives the resolve/unresolve/cleanup
/// lifecycle.
pub trait HostDebugger {
    /// Try to resolve pending breakpoints against a newly loaded ELF image.
    fn resolve_breakpoints(&mut self, _elf_image: &ElfImage) {}

    /// Return breakpoints resolved inside the given context to their
    /// pending state (the context is going away).
    fn unresolve_breakpoints(&mut self, _context_id: u64) {}

    /// Pull all inserted breakpoints out of the inferior.
    fn remove_breakpoints(&mut self) {}

    /// Re-insert all breakpoints into the inferior.
    fn insert_breakpoints(&mut self) {}

    /// Plant an auto-breakpoint (e.g. break-on-launch) at `pc`, tagged with
    /// its owning context so it can be swept when the context dies.
    fn create_auto_breakpoint(&mut self, _pc: u64, _context_id: u64) {}

    /// Remove every auto-breakpoint tagged with the given context.
    fn remove_auto_breakpoints(&mut self, _context_id: u64) {}

    /// Whether a breakpoint is planted at the given code address.
    fn breakpoint_here(&mut self, _pc: u64) -> bool {
        false
    }

    /// Resolve the (demangled) kernel name at an entry point.
    fn kernel_name_from_pc(&mut self, pc: u64) -> String {
        format!("??(0x{:x})", pc)
    }

    /// Source line lookup for the threads view.
    fn find_pc_line(&mut self, _pc: u64) -> Option<SourceLine> {
        None
    }

    /// Make the given module's ELF image the one symbol lookups go
    /// through.
    fn load_elf_image(&mut self, _module_id: u64, _elf_image: &ElfImage) {}

    /// Drop a module's ELF image from the symbol machinery.
    fn unload_elf_image(&mut self, _module_id: u64, _elf_image: &ElfImage) {}

    /// Retarget the host debugger's thread/frame machinery at a device
    /// point.
    fn switch_to_cuda_thread(&mut self, _coords: &Coords) {}

    /// Refresh `$cuda_…` convenience variables after a focus change.
    fn update_convenience_variables(&mut self, _coords: &Coords) {}

    /// Refresh runtime symbols after a focus change.
    fn update_runtime_symbols(&mut self) {}

    /// Print the newly selected frame after a focus change.
    fn print_stack_frame(&mut self) {}

    /// Forget the current source line (a kernel just finished).
    fn clear_current_source_line(&mut self) {}

    /// Tear down auto-display expressions tied to device state.
    fn clear_displays(&mut self) {}

    /// Whether the device is already driving graphics (the gpu-busy
    /// check).
    fn device_used_for_graphics(&mut self, _dev: DevId) -> bool {
        false
    }

    /// Free-form user-visible output (event banners and the like).
    fn print_message(&mut self, _text: &str) {}
}

/// Column alignment in an [`InfoSink`] table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Align {
    Left,
    Right,
}

/// The tabular/text sink the `info cuda` views render into.
///
/// Mirrors the host UI's table builder: a begin/header/body preamble, one
/// row tuple per record, then end. Widths are precomputed by the presenter
/// so dumb sinks can simply pad.
pub trait InfoSink {
    fn table_begin(&mut self, name: &str, num_columns: usize, num_rows: usize);
    fn table_header(&mut self, width: usize, align: Align, field: &str, title: &str);
    fn table_body(&mut self);
    fn row_begin(&mut self, name: &str);
    fn field_string(&mut self, field: &str, value: &str);
    fn field_int(&mut self, field: &str, value: u64);
    fn field_fmt(&mut self, field: &str, value: core::fmt::Arguments<'_>);
    fn row_end(&mut self);
    fn table_end(&mut self);

    /// Plain text inside a table flow (row terminators and the like).
    fn text(&mut self, text: &str);

    /// Out-of-band message (group banners, empty-list notices).
    fn message(&mut self, text: &str);
}
