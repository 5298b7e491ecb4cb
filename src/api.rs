//! The debug-API port: the set of capabilities the core consumes from the
//! low-level hardware debug library.
//!
//! Every call is synchronous from the core's point of view. Implementations
//! wrap the vendor debug API in a live session, or a scripted fake in tests.

use crate::common::{
    AttachState, CuDim3, DevId, LaneException, LnId, SmId, StorageSegment, WpId,
};
use crate::events::CudaEvent;

/// Static description of a running grid, as returned by
/// [`DebugApi::get_grid_info`]. This is the record the core falls back to
/// when kernel launch notifications are deferred and a warp is sighted
/// before its kernel was registered.
#[derive(Debug, Clone)]
pub struct GridInfo {
    pub grid_id: u64,
    pub context_id: u64,
    pub module_id: u64,
    pub function_entry: u64,
    pub grid_dim: CuDim3,
    pub block_dim: CuDim3,
    pub kind: crate::common::KernelType,
    pub parent_grid_id: u64,
    pub origin: crate::common::KernelOrigin,
}

/// Which event queue to drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventQueueKind {
    Sync,
    Async,
}

/// The set of operations the core requires from the hardware debug API.
pub trait DebugApi {
    /// An API-specific unrecoverable error, propagated through the core
    /// unchanged.
    type Error: core::fmt::Debug;

    fn get_num_devices(&mut self) -> Result<u32, Self::Error>;
    fn get_num_sms(&mut self, dev: DevId) -> Result<u32, Self::Error>;
    fn get_num_warps(&mut self, dev: DevId) -> Result<u32, Self::Error>;
    fn get_num_lanes(&mut self, dev: DevId) -> Result<u32, Self::Error>;
    fn get_num_registers(&mut self, dev: DevId) -> Result<u32, Self::Error>;
    fn get_device_type(&mut self, dev: DevId) -> Result<String, Self::Error>;
    fn get_sm_type(&mut self, dev: DevId) -> Result<String, Self::Error>;

    fn read_valid_warps(&mut self, dev: DevId, sm: SmId) -> Result<u64, Self::Error>;
    fn read_broken_warps(&mut self, dev: DevId, sm: SmId) -> Result<u64, Self::Error>;
    fn read_valid_lanes(&mut self, dev: DevId, sm: SmId, wp: WpId) -> Result<u32, Self::Error>;
    fn read_active_lanes(&mut self, dev: DevId, sm: SmId, wp: WpId) -> Result<u32, Self::Error>;
    fn read_grid_id(&mut self, dev: DevId, sm: SmId, wp: WpId) -> Result<u64, Self::Error>;
    fn read_block_idx(&mut self, dev: DevId, sm: SmId, wp: WpId) -> Result<CuDim3, Self::Error>;
    fn read_thread_idx(
        &mut self,
        dev: DevId,
        sm: SmId,
        wp: WpId,
        ln: LnId,
    ) -> Result<CuDim3, Self::Error>;
    fn read_pc(&mut self, dev: DevId, sm: SmId, wp: WpId, ln: LnId) -> Result<u64, Self::Error>;
    fn read_virtual_pc(
        &mut self,
        dev: DevId,
        sm: SmId,
        wp: WpId,
        ln: LnId,
    ) -> Result<u64, Self::Error>;
    fn read_lane_exception(
        &mut self,
        dev: DevId,
        sm: SmId,
        wp: WpId,
        ln: LnId,
    ) -> Result<LaneException, Self::Error>;
    fn read_register(
        &mut self,
        dev: DevId,
        sm: SmId,
        wp: WpId,
        ln: LnId,
        regno: u32,
    ) -> Result<u32, Self::Error>;
    fn read_call_depth(
        &mut self,
        dev: DevId,
        sm: SmId,
        wp: WpId,
        ln: LnId,
    ) -> Result<i32, Self::Error>;
    fn read_syscall_call_depth(
        &mut self,
        dev: DevId,
        sm: SmId,
        wp: WpId,
        ln: LnId,
    ) -> Result<i32, Self::Error>;
    fn read_virtual_return_address(
        &mut self,
        dev: DevId,
        sm: SmId,
        wp: WpId,
        ln: LnId,
        level: i32,
    ) -> Result<u64, Self::Error>;

    /// Bitmap of SMs on which an exception is pending.
    fn read_device_exception_state(&mut self, dev: DevId) -> Result<u64, Self::Error>;

    fn memcheck_read_error_address(
        &mut self,
        dev: DevId,
        sm: SmId,
        wp: WpId,
        ln: LnId,
    ) -> Result<(u64, StorageSegment), Self::Error>;

    /// Single-step one warp; returns the mask of warps that actually
    /// stepped (the hardware may step more than the one requested).
    fn single_step_warp(&mut self, dev: DevId, sm: SmId, wp: WpId) -> Result<u64, Self::Error>;

    fn suspend_device(&mut self, dev: DevId) -> Result<(), Self::Error>;
    fn resume_device(&mut self, dev: DevId) -> Result<(), Self::Error>;

    fn get_grid_info(&mut self, dev: DevId, grid_id: u64) -> Result<GridInfo, Self::Error>;

    /// Pop the next event from the given queue. The end of the queue is
    /// signalled by [`CudaEvent::Invalid`].
    fn get_next_event(&mut self, kind: EventQueueKind) -> Result<CudaEvent, Self::Error>;

    fn get_attach_state(&mut self) -> AttachState;
    fn set_attach_state(&mut self, state: AttachState);

    /// Bulk-fetch support, present when the session runs over a remote
    /// transport that can batch per-warp/per-lane reads into one round
    /// trip. Absent by default.
    fn support_batch(&mut self) -> Option<&mut dyn BatchTransport<Error = Self::Error>> {
        None
    }
}

/// Debug-API extension - batched attribute reads over a remote transport.
///
/// The mirror calls each of these once per SM (or warp) before the first
/// per-warp/per-lane read, and latches every returned value, so one RPC
/// replaces up to `num_warps` (or `num_lanes`) individual reads. A failed
/// bulk fetch is not fatal; the mirror falls through to per-point reads.
pub trait BatchTransport {
    type Error;

    /// Grid ids of every valid warp in the SM.
    fn update_grid_id_in_sm(
        &mut self,
        dev: DevId,
        sm: SmId,
    ) -> Result<Vec<(WpId, u64)>, Self::Error>;

    /// Block indices of every valid warp in the SM.
    fn update_block_idx_in_sm(
        &mut self,
        dev: DevId,
        sm: SmId,
    ) -> Result<Vec<(WpId, CuDim3)>, Self::Error>;

    /// Thread indices of every valid lane in the warp.
    fn update_thread_idx_in_warp(
        &mut self,
        dev: DevId,
        sm: SmId,
        wp: WpId,
    ) -> Result<Vec<(LnId, CuDim3)>, Self::Error>;
}
