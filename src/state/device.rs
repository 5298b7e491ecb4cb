//! Device-level mirror operations.

use crate::api::DebugApi;
use crate::common::DevId;
use crate::error::Error;
use crate::host::HostDebugger;
use crate::kernels::KernelLaunch;
use crate::session::CudaCore;

impl<A: DebugApi, H: HostDebugger> CudaCore<A, H> {
    fn assert_dev(&self, dev: DevId) {
        assert!(
            (dev as usize) < self.system.devices.len(),
            "device {} out of range",
            dev
        );
    }

    pub fn device_get_device_type(&mut self, dev: DevId) -> Result<String, Error<A::Error>> {
        self.assert_dev(dev);

        if let Some(t) = &self.system.devices[dev as usize].dev_type {
            return Ok(t.clone());
        }

        let t = self.api.get_device_type(dev).map_err(Error::api)?;
        self.system.devices[dev as usize].dev_type = Some(t.clone());
        Ok(t)
    }

    pub fn device_get_sm_type(&mut self, dev: DevId) -> Result<String, Error<A::Error>> {
        self.assert_dev(dev);

        if let Some(t) = &self.system.devices[dev as usize].sm_type {
            return Ok(t.clone());
        }

        let t = self.api.get_sm_type(dev).map_err(Error::api)?;
        self.system.devices[dev as usize].sm_type = Some(t.clone());
        Ok(t)
    }

    pub fn device_get_num_sms(&mut self, dev: DevId) -> Result<u32, Error<A::Error>> {
        self.assert_dev(dev);

        if let Some(n) = self.system.devices[dev as usize].num_sms {
            return Ok(n);
        }

        let n = self.api.get_num_sms(dev).map_err(Error::api)?;
        self.system.devices[dev as usize].num_sms = Some(n);
        Ok(n)
    }

    pub fn device_get_num_warps(&mut self, dev: DevId) -> Result<u32, Error<A::Error>> {
        self.assert_dev(dev);

        if let Some(n) = self.system.devices[dev as usize].num_warps {
            return Ok(n);
        }

        let n = self.api.get_num_warps(dev).map_err(Error::api)?;
        self.system.devices[dev as usize].num_warps = Some(n);
        Ok(n)
    }

    pub fn device_get_num_lanes(&mut self, dev: DevId) -> Result<u32, Error<A::Error>> {
        self.assert_dev(dev);

        if let Some(n) = self.system.devices[dev as usize].num_lanes {
            return Ok(n);
        }

        let n = self.api.get_num_lanes(dev).map_err(Error::api)?;
        self.system.devices[dev as usize].num_lanes = Some(n);
        Ok(n)
    }

    pub fn device_get_num_registers(&mut self, dev: DevId) -> Result<u32, Error<A::Error>> {
        self.assert_dev(dev);

        if let Some(n) = self.system.devices[dev as usize].num_registers {
            return Ok(n);
        }

        let n = self.api.get_num_registers(dev).map_err(Error::api)?;
        self.system.devices[dev as usize].num_registers = Some(n);
        Ok(n)
    }

    /// True iff at least one warp on the device is valid.
    pub fn device_is_valid(&mut self, dev: DevId) -> Result<bool, Error<A::Error>> {
        self.assert_dev(dev);

        if !self.initialized {
            return Ok(false);
        }

        if let Some(v) = self.system.devices[dev as usize].valid {
            return Ok(v);
        }

        let mut valid = false;

        if self.device_is_any_context_present(dev) {
            let (num_sms, num_warps, _) = self.device_shape(dev)?;
            'scan: for sm in 0..num_sms {
                for wp in 0..num_warps {
                    if self.warp_is_valid(dev, sm, wp)? {
                        valid = true;
                        break 'scan;
                    }
                }
            }
        }

        self.system.devices[dev as usize].valid = Some(valid);
        Ok(valid)
    }

    /// Bitmask of SMs holding at least one valid warp. Recomputed on
    /// demand from warp validity.
    pub fn device_get_active_sms_mask(&mut self, dev: DevId) -> Result<u64, Error<A::Error>> {
        self.assert_dev(dev);

        let (num_sms, num_warps, _) = self.device_shape(dev)?;
        let mut mask = 0u64;
        for sm in 0..num_sms {
            for wp in 0..num_warps {
                if self.warp_is_valid(dev, sm, wp)? {
                    mask |= 1u64 << sm;
                    break;
                }
            }
        }
        Ok(mask)
    }

    pub fn device_is_any_context_present(&self, dev: DevId) -> bool {
        self.assert_dev(dev);
        self.system.devices[dev as usize]
            .contexts
            .is_any_context_present()
    }

    pub fn device_find_context_by_id(&self, dev: DevId, context_id: u64) -> Option<u64> {
        self.assert_dev(dev);
        self.system.devices[dev as usize]
            .contexts
            .find_by_id(context_id)
            .map(|c| c.id())
    }

    pub fn device_find_context_by_addr(&self, dev: DevId, addr: u64) -> Option<u64> {
        self.assert_dev(dev);
        self.system.devices[dev as usize]
            .contexts
            .find_by_address(addr)
            .map(|c| c.id())
    }

    /// The context at the top of a host thread's stack on this device.
    pub fn active_context_of_thread(&self, dev: DevId, tid: u32) -> Option<u64> {
        self.assert_dev(dev);
        self.system.devices[dev as usize].contexts.active_context(tid)
    }

    /// Drop every cached attribute under the device.
    pub fn device_invalidate(&mut self, dev: DevId) -> Result<(), Error<A::Error>> {
        log::trace!("device {}: invalidate", dev);
        self.assert_dev(dev);

        let num_sms = self.device_get_num_sms(dev)?;
        let device = &mut self.system.devices[dev as usize];
        for sm in 0..(num_sms as usize).min(device.sms.len()) {
            device.sms[sm].invalidate(true);
        }
        device.valid = None;
        device.exception_state_filtered = false;
        Ok(())
    }

    /// Invalidate the device mirror, resume the hardware if it was held
    /// suspended, and clear the system suspended bit.
    pub fn device_resume(&mut self, dev: DevId) -> Result<(), Error<A::Error>> {
        log::trace!("device {}: resume", dev);
        self.assert_dev(dev);

        self.device_invalidate(dev)?;

        if !self.system.devices[dev as usize].suspended {
            return Ok(());
        }

        self.api.resume_device(dev).map_err(Error::api)?;

        self.system.devices[dev as usize].suspended = false;
        self.system.suspended_devices_mask &= !(1 << dev);
        Ok(())
    }

    /// Suspend the hardware. A device with no context has nothing to
    /// debug; the call is a no-op.
    pub fn device_suspend(&mut self, dev: DevId) -> Result<(), Error<A::Error>> {
        log::trace!("device {}: suspend", dev);
        self.assert_dev(dev);

        if !self.device_is_any_context_present(dev) {
            return Ok(());
        }

        self.api.suspend_device(dev).map_err(Error::api)?;

        self.system.devices[dev as usize].suspended = true;
        self.system.suspended_devices_mask |= 1 << dev;
        Ok(())
    }

    /// Read the per-SM exception bitmap once per suspension, and pre-fill
    /// "no exception" into every lane of every SM the bitmap clears, so
    /// those lanes never cost a debug-API read.
    pub fn device_filter_exception_state(&mut self, dev: DevId) -> Result<(), Error<A::Error>> {
        log::trace!("device {}: looking for exception SMs", dev);
        self.assert_dev(dev);

        if !self.device_is_any_context_present(dev) {
            return Ok(());
        }

        if self.system.devices[dev as usize].exception_state_filtered {
            return Ok(());
        }

        let sm_mask = self
            .api
            .read_device_exception_state(dev)
            .map_err(Error::api)?;

        let (num_sms, _, _) = self.device_shape(dev)?;
        for sm in 0..num_sms {
            if (sm_mask >> sm) & 1 == 0 {
                self.sm_set_exception_none(dev, sm);
            }
        }

        self.system.devices[dev as usize].exception_state_filtered = true;
        Ok(())
    }

    pub(crate) fn device_resolve_breakpoints(&mut self, dev: DevId) -> Result<(), Error<A::Error>> {
        log::trace!("device {}: resolve breakpoints", dev);
        self.assert_dev(dev);

        if !self.device_is_any_context_present(dev) {
            return Ok(());
        }

        let device = &mut self.system.devices[dev as usize];
        device.contexts.resolve_breakpoints(&mut self.host);
        Ok(())
    }

    pub(crate) fn device_cleanup_breakpoints(&mut self, dev: DevId) -> Result<(), Error<A::Error>> {
        log::trace!("device {}: clean up breakpoints", dev);
        self.assert_dev(dev);

        let device = &mut self.system.devices[dev as usize];
        device.contexts.cleanup_breakpoints(&mut self.host);
        Ok(())
    }

    /// Register a kernel discovered on the hardware rather than through a
    /// launch notification (deferred launch notifications). The grid info
    /// query supplies what the missed notification would have carried.
    pub(crate) fn device_create_kernel(
        &mut self,
        dev: DevId,
        grid_id: u64,
    ) -> Result<(), Error<A::Error>> {
        let info = self.api.get_grid_info(dev, grid_id).map_err(Error::api)?;
        let name = self.host.kernel_name_from_pc(info.function_entry);

        self.register_kernel(KernelLaunch {
            dev_id: dev,
            grid_id,
            context_id: info.context_id,
            module_id: info.module_id,
            name,
            entry_pc: info.function_entry,
            grid_dim: info.grid_dim,
            block_dim: info.block_dim,
            kind: info.kind,
            parent_grid_id: info.parent_grid_id,
            origin: info.origin,
        });
        Ok(())
    }
}
