//! Debugger options mirrored from the host's `set cuda …` settings.

/// The subset of host-side options the core consults.
///
/// The host debugger owns the option storage and UI; it pushes the current
/// values into the core whenever they change.
#[derive(Debug, Clone)]
pub struct DebugOptions {
    /// Print a banner on every context create/destroy/push/pop event.
    pub show_context_events: bool,
    /// Print a banner on every kernel launch/termination.
    pub show_kernel_events: bool,
    /// Plant an auto-breakpoint at the entry of every application kernel.
    pub break_on_launch_application: bool,
    /// Plant an auto-breakpoint at the entry of every system kernel.
    pub break_on_launch_system: bool,
    /// On context create, refuse to debug a GPU already driving graphics.
    pub gpu_busy_check: bool,
    /// Software preemption widens single-step invalidation to the whole
    /// device.
    pub software_preemption: bool,
    /// Kernel launch notifications may be deferred; kernels are then
    /// registered lazily on first warp sighting.
    pub defer_kernel_launch_notifications: bool,
    /// Collapse contiguous rows in the blocks/threads views.
    pub coalescing: bool,
    /// Verbose tracing of the notification channel.
    pub debug_notifications: bool,
}

impl Default for DebugOptions {
    fn default() -> DebugOptions {
        DebugOptions {
            show_context_events: false,
            show_kernel_events: false,
            break_on_launch_application: false,
            break_on_launch_system: false,
            gpu_busy_check: false,
            software_preemption: false,
            defer_kernel_launch_notifications: false,
            coalescing: true,
            debug_notifications: false,
        }
    }
}
