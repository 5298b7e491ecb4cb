//! The debug session core: one value owning the state mirror, the
//! registries, the focus, and the two ports.

use crate::api::DebugApi;
use crate::common::CudaClock;
use crate::focus::FocusState;
use crate::host::HostDebugger;
use crate::kernels::KernelRegistry;
use crate::options::DebugOptions;
use crate::state::SystemState;

/// The core of the CUDA debugger extension.
///
/// Sits between the low-level debug API (`A`) and the embedding host
/// debugger (`H`), maintaining a lazily-populated cached view of every
/// device, SM, warp, and lane, the context/module/kernel registries, and
/// the current focus coordinate.
///
/// All operations are single-threaded: the host drives the core strictly
/// between inferior resumes. The one cross-thread object, the notification
/// channel, lives outside this struct (see
/// [`Notifications`](crate::notifications::Notifications)).
pub struct CudaCore<A: DebugApi, H: HostDebugger> {
    pub(crate) api: A,
    pub(crate) host: H,
    pub(crate) options: DebugOptions,
    pub(crate) system: SystemState,
    pub(crate) kernels: KernelRegistry,
    pub(crate) focus: FocusState,
    pub(crate) clock: CudaClock,
    pub(crate) current_context: Option<u64>,
    pub(crate) saved_contexts: Vec<Option<u64>>,
    pub(crate) initialized: bool,
}

impl<A: DebugApi, H: HostDebugger> CudaCore<A, H> {
    pub fn new(api: A, host: H, options: DebugOptions) -> CudaCore<A, H> {
        CudaCore {
            api,
            host,
            options,
            system: SystemState::default(),
            kernels: KernelRegistry::default(),
            focus: FocusState::default(),
            clock: CudaClock::default(),
            current_context: None,
            saved_contexts: Vec::new(),
            initialized: false,
        }
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn api_mut(&mut self) -> &mut A {
        &mut self.api
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn options(&self) -> &DebugOptions {
        &self.options
    }

    pub fn options_mut(&mut self) -> &mut DebugOptions {
        &mut self.options
    }

    pub fn kernels(&self) -> &KernelRegistry {
        &self.kernels
    }

    /// The debugger-internal clock. The embedding debugger ticks it via
    /// [`clock_increment`](Self::clock_increment) exactly once per
    /// event-drain-and-resume cycle, so equal timestamps mean "observed in
    /// the same stop".
    pub fn clock(&self) -> CudaClock {
        self.clock
    }

    pub fn clock_increment(&mut self) {
        self.clock.tick();
    }

    /// The context the UI is currently working in, if any.
    pub fn current_context(&self) -> Option<u64> {
        self.current_context
    }

    pub fn set_current_context(&mut self, context_id: Option<u64>) {
        self.current_context = context_id;
    }

    pub(crate) fn save_current_context(&mut self) {
        self.saved_contexts.push(self.current_context);
    }

    pub(crate) fn restore_current_context(&mut self) {
        if let Some(saved) = self.saved_contexts.pop() {
            self.current_context = saved;
        }
    }
}
