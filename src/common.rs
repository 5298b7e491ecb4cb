//! Types shared between the state mirror, the registries, and the ports.

use core::fmt;

/// Physical device index.
pub type DevId = u32;
/// Physical SM index within a device.
pub type SmId = u32;
/// Physical warp index within an SM.
pub type WpId = u32;
/// Physical lane index within a warp.
pub type LnId = u32;

/// Host (inferior) thread id, as reported by the debug API.
pub type HostTid = u32;

/// The value the debug API uses to report "no usable thread id".
pub const INVALID_HOST_TID: HostTid = !0;

/// A 3-dimensional CUDA index or extent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct CuDim3 {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl CuDim3 {
    pub const fn new(x: u32, y: u32, z: u32) -> CuDim3 {
        CuDim3 { x, y, z }
    }
}

impl fmt::Display for CuDim3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{},{})", self.x, self.y, self.z)
    }
}

/// Whether a kernel was launched by the application or by the system (e.g.
/// the device runtime launching on behalf of a parent kernel).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelType {
    Application,
    System,
}

/// Where a kernel launch originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelOrigin {
    Cpu,
    Gpu,
}

/// Device exception reported for a lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LaneException {
    #[default]
    None,
    IllegalInstruction,
    MisalignedAddress,
    InvalidAddressSpace,
    InvalidPc,
    StackOverflow,
    IllegalAddress,
    HardwareError,
    Assert,
}

impl LaneException {
    pub fn is_none(&self) -> bool {
        matches!(self, LaneException::None)
    }
}

/// PTX storage segment associated with a memcheck error address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageSegment {
    #[default]
    Unspecified,
    Global,
    Shared,
    Local,
}

/// Attach/detach progress, owned by the debug API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachState {
    NotStarted,
    InProgress,
    AppReady,
    Detaching,
    DetachComplete,
}

/// The debugger-internal clock.
///
/// Ticks once per complete event-drain-and-resume cycle, so two timestamps
/// are equal exactly when they were taken during the same stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct CudaClock(pub u64);

impl CudaClock {
    pub fn tick(&mut self) {
        self.0 = self.0.wrapping_add(1);
        if self.0 == 0 {
            log::warn!("internal debug clock counter wrapped around");
        }
    }
}

/// A relocated device ELF image, as handed over by the debug API.
///
/// `image` is an opaque handle (in a live session, the address of the image
/// in the debugger's address space); the pair also defines the text range
/// used to map code addresses back to their module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElfImage {
    pub image: u64,
    pub size: u64,
}

impl ElfImage {
    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.image && addr < self.image.saturating_add(self.size)
    }
}

/// Host signal numbers, transcribed from GDB's signal numbering.
#[repr(transparent)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Signal(pub u8);

#[rustfmt::skip]
impl Signal {
    #[doc = "Interrupt"]             pub const SIGINT:  Self = Self(2);
    #[doc = "Trace/breakpoint trap"] pub const SIGTRAP: Self = Self(5);
    #[doc = "Killed"]                pub const SIGKILL: Self = Self(9);
    #[doc = "Segmentation fault"]    pub const SIGSEGV: Self = Self(11);
    #[doc = "Stopped (signal)"]      pub const SIGSTOP: Self = Self(17);
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            Signal::SIGINT => "SIGINT",
            Signal::SIGTRAP => "SIGTRAP",
            Signal::SIGKILL => "SIGKILL",
            Signal::SIGSEGV => "SIGSEGV",
            Signal::SIGSTOP => "SIGSTOP",
            _ => return write!(f, "SIG{}", self.0),
        };
        write!(f, "{}", s)
    }
}

/// Why the inferior stopped, as reported by the host-side wait machinery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus {
    Stopped(Signal),
    Exited(i32),
    Signalled(Signal),
}
