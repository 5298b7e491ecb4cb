//! The device state mirror.
//!
//! A hierarchical, lazily-populated cache of everything the debug API can
//! report about the hardware: system → device → SM → warp → lane. Every
//! cached attribute is an `Option`, where `None` means "not fetched since
//! the last invalidation" — never "zero". The caches are torn down on every
//! resume and single-step, so a getter either serves the latched value or
//! performs exactly one debug-API read and latches it.

use crate::api::DebugApi;
use crate::common::{CuDim3, CudaClock, DevId, LaneException};
use crate::contexts::ContextRegistry;
use crate::error::Error;
use crate::host::HostDebugger;
use crate::session::CudaCore;

mod device;
mod lane;
mod sm;
mod warp;

/// Per-lane cached attributes.
#[derive(Debug, Default, Clone)]
pub(crate) struct LaneState {
    pub(crate) thread_idx: Option<CuDim3>,
    pub(crate) pc: Option<u64>,
    pub(crate) virtual_pc: Option<u64>,
    pub(crate) exception: Option<LaneException>,
    pub(crate) timestamp: Option<CudaClock>,
}

impl LaneState {
    pub(crate) fn invalidate(&mut self) {
        self.thread_idx = None;
        self.pc = None;
        self.virtual_pc = None;
        self.exception = None;
        self.timestamp = None;
    }
}

/// Per-warp cached attributes.
///
/// `kernel_id` caches the result of resolving the warp's grid id against
/// the kernel registry, which may legitimately be "no kernel" — hence the
/// nested `Option`.
#[derive(Debug, Default, Clone)]
pub(crate) struct WarpState {
    pub(crate) block_idx: Option<CuDim3>,
    pub(crate) kernel_id: Option<Option<u64>>,
    pub(crate) grid_id: Option<u64>,
    pub(crate) valid_lanes_mask: Option<u32>,
    pub(crate) active_lanes_mask: Option<u32>,
    pub(crate) timestamp: Option<CudaClock>,
    pub(crate) lanes: Vec<LaneState>,
}

impl WarpState {
    pub(crate) fn invalidate(&mut self) {
        for lane in &mut self.lanes {
            lane.invalidate();
        }
        self.block_idx = None;
        self.kernel_id = None;
        self.grid_id = None;
        self.valid_lanes_mask = None;
        self.active_lanes_mask = None;
        self.timestamp = None;
    }
}

/// Per-SM cached attributes.
#[derive(Debug, Default, Clone)]
pub(crate) struct SmState {
    pub(crate) valid_warps_mask: Option<u64>,
    pub(crate) broken_warps_mask: Option<u64>,
    pub(crate) warps: Vec<WarpState>,
}

impl SmState {
    /// Drop the warp masks; with `recursive`, drop every contained warp's
    /// caches as well.
    pub(crate) fn invalidate(&mut self, recursive: bool) {
        if recursive {
            for warp in &mut self.warps {
                warp.invalidate();
            }
        }
        self.valid_warps_mask = None;
        self.broken_warps_mask = None;
    }
}

/// Per-device cached attributes plus the device's context registry.
#[derive(Debug, Default)]
pub(crate) struct DeviceState {
    pub(crate) dev_type: Option<String>,
    pub(crate) sm_type: Option<String>,
    pub(crate) num_sms: Option<u32>,
    pub(crate) num_warps: Option<u32>,
    pub(crate) num_lanes: Option<u32>,
    pub(crate) num_registers: Option<u32>,
    /// True iff any warp on the device is valid.
    pub(crate) valid: Option<bool>,
    /// The fields above are invalidated on resume; `suspended` is not.
    pub(crate) suspended: bool,
    /// One-shot flag: the per-SM exception bitmap has been applied for the
    /// current suspension.
    pub(crate) exception_state_filtered: bool,
    pub(crate) sms: Vec<SmState>,
    pub(crate) contexts: ContextRegistry,
}

/// System-level cached attributes.
#[derive(Debug, Default)]
pub(crate) struct SystemState {
    pub(crate) num_devices: Option<u32>,
    pub(crate) devices: Vec<DeviceState>,
    pub(crate) suspended_devices_mask: u32,
}

impl<A: DebugApi, H: HostDebugger> CudaCore<A, H> {
    /// Allocate the device array. Must be called once before any other
    /// mirror operation.
    pub fn system_initialize(&mut self) -> Result<(), Error<A::Error>> {
        log::trace!("system: initialize");

        self.system = SystemState::default();
        self.initialized = true;

        let num_devices = self.system_get_num_devices()?;
        self.system
            .devices
            .resize_with(num_devices as usize, DeviceState::default);

        Ok(())
    }

    /// Tear everything down. The mirror is unusable afterwards until
    /// re-initialized.
    pub fn system_finalize(&mut self) {
        log::trace!("system: finalize");

        self.system = SystemState::default();
        self.kernels = Default::default();
        self.focus = Default::default();
        self.current_context = None;
        self.saved_contexts.clear();
        self.initialized = false;
    }

    pub fn system_get_num_devices(&mut self) -> Result<u32, Error<A::Error>> {
        if !self.initialized {
            return Ok(0);
        }

        if let Some(n) = self.system.num_devices {
            return Ok(n);
        }

        let n = self.api.get_num_devices().map_err(Error::api)?;
        self.system.num_devices = Some(n);

        if self.system.devices.len() < n as usize {
            self.system.devices.resize_with(n as usize, DeviceState::default);
        }

        Ok(n)
    }

    /// Pre-seed a device's static descriptors (remote sessions push these
    /// in bulk instead of answering one query at a time).
    pub fn system_set_device_spec(
        &mut self,
        dev: DevId,
        num_sms: u32,
        num_warps: u32,
        num_lanes: u32,
        num_registers: u32,
        dev_type: &str,
        sm_type: &str,
    ) {
        let device = &mut self.system.devices[dev as usize];
        device.num_sms = Some(num_sms);
        device.num_warps = Some(num_warps);
        device.num_lanes = Some(num_lanes);
        device.num_registers = Some(num_registers);
        device.dev_type = Some(dev_type.to_string());
        device.sm_type = Some(sm_type.to_string());
    }

    /// Bitmask of devices currently held suspended.
    pub fn system_get_suspended_devices_mask(&self) -> u32 {
        self.system.suspended_devices_mask
    }

    /// Brute-force pass resolving every CUDA breakpoint that can be
    /// resolved right now, across all ELF images of all contexts. Used when
    /// there is no cheap way to tell which context or module a
    /// freshly-placed breakpoint belongs to.
    pub fn system_resolve_breakpoints(&mut self) -> Result<(), Error<A::Error>> {
        log::trace!("system: resolve breakpoints");

        for dev in 0..self.system_get_num_devices()? {
            self.device_resolve_breakpoints(dev)?;
        }
        Ok(())
    }

    pub fn system_cleanup_breakpoints(&mut self) -> Result<(), Error<A::Error>> {
        log::trace!("system: clean up breakpoints");

        for dev in 0..self.system_get_num_devices()? {
            self.device_cleanup_breakpoints(dev)?;
        }
        Ok(())
    }

    pub fn system_cleanup_contexts(&mut self) -> Result<(), Error<A::Error>> {
        log::trace!("system: clean up contexts");

        for dev in 0..self.system_get_num_devices()? {
            self.system.devices[dev as usize].contexts = ContextRegistry::default();
        }
        Ok(())
    }

    /// The context whose modules contain the given code address, searched
    /// across every device.
    pub fn system_find_context_by_addr(
        &mut self,
        addr: u64,
    ) -> Result<Option<(DevId, u64)>, Error<A::Error>> {
        for dev in 0..self.system_get_num_devices()? {
            let found = self.system.devices[dev as usize]
                .contexts
                .find_by_address(addr)
                .map(|c| c.id());
            if let Some(context_id) = found {
                return Ok(Some((dev, context_id)));
            }
        }
        Ok(None)
    }

    /// Whether any warp anywhere is stopped at a breakpoint that was hit at
    /// or after `since`. Warps broken before `since` were already reported
    /// on an earlier stop and are not reported again.
    pub fn system_is_broken(&mut self, since: CudaClock) -> Result<bool, Error<A::Error>> {
        let warps: Vec<_> = self
            .iterate(
                crate::iterator::IteratorKind::Warps,
                &crate::coords::Coords::wildcard(),
                crate::iterator::Select::VALID,
            )?
            .collect();

        for c in warps {
            let (dev, sm, wp) = (
                c.dev.exact().unwrap(),
                c.sm.exact().unwrap(),
                c.wp.exact().unwrap(),
            );
            if self.warp_get_timestamp(dev, sm, wp)? < since {
                continue;
            }
            if self.warp_is_broken(dev, sm, wp)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Re-derive which kernels are still on the hardware, and terminate the
    /// ones that were seen running at some point but are gone now.
    pub fn system_update_kernels(&mut self) -> Result<(), Error<A::Error>> {
        self.kernels.reset_presence();

        let warps: Vec<_> = self
            .iterate(
                crate::iterator::IteratorKind::Warps,
                &crate::coords::Coords::wildcard(),
                crate::iterator::Select::VALID,
            )?
            .collect();

        for c in warps {
            if let (Some(dev), Some(grid_id)) = (c.dev.exact(), c.grid_id.exact()) {
                self.kernels.mark_present(dev, grid_id);
            }
        }

        for (dev, grid_id) in self.kernels.vanished() {
            self.kernel_terminate(dev, grid_id);
        }
        Ok(())
    }

    /// Fetch (and cache) the dimensions of a device, sizing the cache
    /// vectors on first use.
    pub(crate) fn device_shape(&mut self, dev: DevId) -> Result<(u32, u32, u32), Error<A::Error>> {
        let num_sms = self.device_get_num_sms(dev)?;
        let num_warps = self.device_get_num_warps(dev)?;
        let num_lanes = self.device_get_num_lanes(dev)?;

        let device = &mut self.system.devices[dev as usize];
        if device.sms.len() < num_sms as usize {
            device.sms.resize_with(num_sms as usize, SmState::default);
        }
        for sm in &mut device.sms {
            if sm.warps.len() < num_warps as usize {
                sm.warps.resize_with(num_warps as usize, WarpState::default);
            }
            for warp in &mut sm.warps {
                if warp.lanes.len() < num_lanes as usize {
                    warp.lanes.resize_with(num_lanes as usize, LaneState::default);
                }
            }
        }

        Ok((num_sms, num_warps, num_lanes))
    }
}

#[cfg(test)]
mod tests {
    use crate::common::CuDim3;
    use crate::coords::Coords;
    use crate::iterator::{IteratorKind, Select};
    use crate::testutil::{core_with_topology, Topology};

    #[test]
    fn num_devices_is_fetched_once() {
        let mut core = core_with_topology(Topology::small());
        assert_eq!(core.system_get_num_devices().unwrap(), 1);
        assert_eq!(core.system_get_num_devices().unwrap(), 1);
        assert_eq!(core.api().calls("get_num_devices"), 1);
    }

    #[test]
    fn active_pc_is_shared_by_all_active_lanes() {
        let mut topo = Topology::small();
        topo.valid_warps.insert((0, 0), 0b1);
        topo.valid_lanes.insert((0, 0, 0), 0xffff_ffff);
        topo.active_lanes.insert((0, 0, 0), 0x0000_000f);
        for ln in 0..32 {
            topo.pcs.insert((0, 0, 0, ln), 0xdead);
        }
        let mut core = core_with_topology(topo);

        assert_eq!(core.lane_get_pc(0, 0, 0, 0).unwrap(), 0xdead);
        // lanes 1-3 are active: served from the propagated cache
        assert_eq!(core.lane_get_pc(0, 0, 0, 1).unwrap(), 0xdead);
        assert_eq!(core.lane_get_pc(0, 0, 0, 2).unwrap(), 0xdead);
        assert_eq!(core.lane_get_pc(0, 0, 0, 3).unwrap(), 0xdead);
        assert_eq!(core.api().calls("read_pc"), 1);

        // lane 4 is divergent: requires its own read
        assert_eq!(core.lane_get_pc(0, 0, 0, 4).unwrap(), 0xdead);
        assert_eq!(core.api().calls("read_pc"), 2);
    }

    #[test]
    fn resume_invalidates_the_whole_subtree() {
        let mut topo = Topology::small();
        topo.with_context = true;
        topo.valid_warps.insert((0, 0), 0b11);
        topo.valid_lanes.insert((0, 0, 0), 0x1);
        topo.active_lanes.insert((0, 0, 0), 0x1);
        topo.pcs.insert((0, 0, 0, 0), 0x80);
        let mut core = core_with_topology(topo);

        assert!(core.device_is_valid(0).unwrap());
        assert_eq!(core.lane_get_pc(0, 0, 0, 0).unwrap(), 0x80);
        let mask_reads = core.api().calls("read_valid_warps");

        core.device_resume(0).unwrap();

        // every cached flag under the device is gone: the next query
        // re-fetches from the API
        assert!(core.device_is_valid(0).unwrap());
        assert!(core.api().calls("read_valid_warps") > mask_reads);
        assert_eq!(core.api().calls("resume_device"), 0, "not suspended: no port resume");
    }

    #[test]
    fn suspend_resume_drive_the_port_and_the_mask() {
        let mut topo = Topology::small();
        topo.with_context = true;
        let mut core = core_with_topology(topo);

        core.device_suspend(0).unwrap();
        assert_eq!(core.api().calls("suspend_device"), 1);
        assert_eq!(core.system_get_suspended_devices_mask(), 0b1);

        core.device_resume(0).unwrap();
        assert_eq!(core.api().calls("resume_device"), 1);
        assert_eq!(core.system_get_suspended_devices_mask(), 0);
    }

    #[test]
    fn suspend_without_context_is_a_no_op() {
        let mut core = core_with_topology(Topology::small());
        core.device_suspend(0).unwrap();
        assert_eq!(core.api().calls("suspend_device"), 0);
        assert_eq!(core.system_get_suspended_devices_mask(), 0);
    }

    #[test]
    fn exception_filter_spares_clean_sms_from_lane_reads() {
        let mut topo = Topology::small();
        topo.with_context = true;
        topo.num_sms = 2;
        topo.valid_warps.insert((0, 0), 0b1);
        topo.valid_warps.insert((0, 1), 0b1);
        topo.valid_lanes.insert((0, 0, 0), 0x1);
        topo.valid_lanes.insert((0, 1, 0), 0x1);
        // only SM 1 has a pending exception
        topo.exception_sm_mask = 0b10;
        let mut core = core_with_topology(topo);

        core.device_filter_exception_state(0).unwrap();

        // SM 0 lanes are pre-filled with "no exception": no API read
        use crate::common::LaneException;
        assert_eq!(
            core.lane_get_exception(0, 0, 0, 0).unwrap(),
            LaneException::None
        );
        assert_eq!(core.api().calls("read_lane_exception"), 0);

        // SM 1 lanes still go to the API
        let _ = core.lane_get_exception(0, 1, 0, 0).unwrap();
        assert_eq!(core.api().calls("read_lane_exception"), 1);

        // one-shot per suspension
        core.device_filter_exception_state(0).unwrap();
        assert_eq!(core.api().calls("read_device_exception_state"), 1);
    }

    #[test]
    fn single_step_invalidates_precisely_without_preemption() {
        let mut topo = Topology::small();
        topo.valid_warps.insert((0, 0), 0b110000);
        topo.valid_lanes.insert((0, 0, 5), 0x1);
        topo.valid_lanes.insert((0, 0, 4), 0x1);
        topo.active_lanes.insert((0, 0, 5), 0x1);
        topo.active_lanes.insert((0, 0, 4), 0x1);
        topo.pcs.insert((0, 0, 5, 0), 0x100);
        topo.pcs.insert((0, 0, 4, 0), 0x200);
        topo.single_step_result = 0b100000;
        let mut core = core_with_topology(topo);

        // warm the caches of warps 4 and 5
        assert_eq!(core.lane_get_pc(0, 0, 5, 0).unwrap(), 0x100);
        assert_eq!(core.lane_get_pc(0, 0, 4, 0).unwrap(), 0x200);
        let pc_reads = core.api().calls("read_pc");

        let mask = core.warp_single_step(0, 0, 5).unwrap();
        assert_eq!(mask, 0b100000);

        // warp 5 was stepped: its caches are cold again
        assert_eq!(core.lane_get_pc(0, 0, 5, 0).unwrap(), 0x100);
        // warp 4 was not: still served from cache
        assert_eq!(core.lane_get_pc(0, 0, 4, 0).unwrap(), 0x200);
        assert_eq!(core.api().calls("read_pc"), pc_reads + 1);
    }

    #[test]
    fn single_step_with_software_preemption_invalidates_the_device() {
        let mut topo = Topology::small();
        topo.valid_warps.insert((0, 0), 0b110000);
        topo.valid_lanes.insert((0, 0, 5), 0x1);
        topo.valid_lanes.insert((0, 0, 4), 0x1);
        topo.active_lanes.insert((0, 0, 5), 0x1);
        topo.active_lanes.insert((0, 0, 4), 0x1);
        topo.pcs.insert((0, 0, 5, 0), 0x100);
        topo.pcs.insert((0, 0, 4, 0), 0x200);
        topo.single_step_result = 0b100000;
        let mut core = core_with_topology(topo);
        core.options_mut().software_preemption = true;

        let _ = core.lane_get_pc(0, 0, 4, 0).unwrap();
        let pc_reads = core.api().calls("read_pc");

        core.warp_single_step(0, 0, 5).unwrap();

        // even the un-stepped warp lost its caches
        let _ = core.lane_get_pc(0, 0, 4, 0).unwrap();
        assert_eq!(core.api().calls("read_pc"), pc_reads + 1);
    }

    #[test]
    fn divergent_is_valid_and_not_active() {
        let mut topo = Topology::small();
        topo.valid_warps.insert((0, 0), 0b1);
        topo.valid_lanes.insert((0, 0, 0), 0b1111);
        topo.active_lanes.insert((0, 0, 0), 0b0011);
        let mut core = core_with_topology(topo);

        assert_eq!(core.warp_get_divergent_lanes_mask(0, 0, 0).unwrap(), 0b1100);
        assert!(!core.lane_is_divergent(0, 0, 0, 0).unwrap());
        assert!(core.lane_is_divergent(0, 0, 0, 2).unwrap());
        assert!(core.lane_is_active(0, 0, 0, 1).unwrap());
        assert!(!core.lane_is_active(0, 0, 0, 3).unwrap());
    }

    #[test]
    fn active_mask_is_a_subset_of_valid_mask_in_views() {
        let mut topo = Topology::small();
        topo.valid_warps.insert((0, 0), 0b1);
        topo.valid_lanes.insert((0, 0, 0), 0b0110);
        topo.active_lanes.insert((0, 0, 0), 0b0110);
        for ln in 1..3 {
            topo.thread_idxs
                .insert((0, 0, 0, ln), CuDim3::new(ln, 0, 0));
        }
        topo.grid_ids.insert((0, 0, 0), 7);
        let mut core = core_with_topology(topo);

        let valid = core.warp_get_valid_lanes_mask(0, 0, 0).unwrap();
        let active = core.warp_get_active_lanes_mask(0, 0, 0).unwrap();
        assert_eq!(active & !valid, 0);

        let lanes: Vec<_> = core
            .iterate(IteratorKind::Lanes, &Coords::wildcard(), Select::VALID)
            .unwrap()
            .collect();
        assert_eq!(lanes.len(), 2);
    }

    #[test]
    fn deferred_launch_registers_the_kernel_on_first_sighting() {
        let mut topo = Topology::small();
        topo.valid_warps.insert((0, 0), 0b1);
        topo.grid_ids.insert((0, 0, 0), 9);
        let mut core = core_with_topology(topo);

        // without the option, an unannounced grid has no kernel
        assert_eq!(core.warp_get_kernel(0, 0, 0).unwrap(), None);

        core.options_mut().defer_kernel_launch_notifications = true;
        core.device_invalidate(0).unwrap();

        let kernel_id = core.warp_get_kernel(0, 0, 0).unwrap();
        assert!(kernel_id.is_some());
        assert_eq!(core.api().calls("get_grid_info"), 1);
        assert!(core.kernels().find_by_grid_id(0, 9).is_some());

        // the registry mutated during a read; the cached resolution now
        // answers without another grid-info query
        assert_eq!(core.warp_get_kernel(0, 0, 0).unwrap(), kernel_id);
        assert_eq!(core.api().calls("get_grid_info"), 1);
    }

    #[test]
    fn lowest_active_lane_and_warp_pcs() {
        let mut topo = Topology::small();
        topo.valid_warps.insert((0, 0), 0b1);
        topo.valid_lanes.insert((0, 0, 0), 0b1111);
        topo.active_lanes.insert((0, 0, 0), 0b1100);
        topo.pcs.insert((0, 0, 0, 2), 0xcafe);
        topo.virtual_pcs.insert((0, 0, 0, 2), 0xf000);
        let mut core = core_with_topology(topo);

        assert_eq!(core.warp_get_lowest_active_lane(0, 0, 0).unwrap(), 2);
        assert_eq!(core.warp_get_active_pc(0, 0, 0).unwrap(), 0xcafe);
        assert_eq!(core.warp_get_active_virtual_pc(0, 0, 0).unwrap(), 0xf000);
    }
}
