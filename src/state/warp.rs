//! Warp-level mirror operations.

use crate::api::DebugApi;
use crate::common::{CuDim3, CudaClock, DevId, SmId, WpId};
use crate::error::Error;
use crate::host::HostDebugger;
use crate::session::CudaCore;

impl<A: DebugApi, H: HostDebugger> CudaCore<A, H> {
    fn assert_warp(&mut self, dev: DevId, sm: SmId, wp: WpId) -> Result<(), Error<A::Error>> {
        let (num_sms, num_warps, _) = self.device_shape(dev)?;
        assert!(sm < num_sms, "sm {} out of range on device {}", sm, dev);
        assert!(wp < num_warps, "warp {} out of range on device {}", wp, dev);
        Ok(())
    }

    pub fn warp_is_valid(&mut self, dev: DevId, sm: SmId, wp: WpId) -> Result<bool, Error<A::Error>> {
        self.assert_warp(dev, sm, wp)?;
        let mask = self.sm_get_valid_warps_mask(dev, sm)?;
        Ok((mask >> wp) & 1 == 1)
    }

    pub fn warp_is_broken(&mut self, dev: DevId, sm: SmId, wp: WpId) -> Result<bool, Error<A::Error>> {
        self.assert_warp(dev, sm, wp)?;
        let mask = self.sm_get_broken_warps_mask(dev, sm)?;
        Ok((mask >> wp) & 1 == 1)
    }

    pub fn warp_get_grid_id(&mut self, dev: DevId, sm: SmId, wp: WpId) -> Result<u64, Error<A::Error>> {
        self.assert_warp(dev, sm, wp)?;

        // in a remote session, fetch the grid id of every valid warp in
        // the SM with one round trip
        let cold = self.system.devices[dev as usize].sms[sm as usize].warps[wp as usize]
            .grid_id
            .is_none();
        if cold && self.sm_is_valid(dev, sm)? {
            if let Some(updates) = {
                let api = &mut self.api;
                match api.support_batch() {
                    Some(batch) => batch.update_grid_id_in_sm(dev, sm).ok(),
                    None => None,
                }
            } {
                for (wp_id, grid_id) in updates {
                    self.warp_set_grid_id(dev, sm, wp_id, grid_id)?;
                }
            }
        }

        if let Some(grid_id) =
            self.system.devices[dev as usize].sms[sm as usize].warps[wp as usize].grid_id
        {
            return Ok(grid_id);
        }

        let grid_id = self.api.read_grid_id(dev, sm, wp).map_err(Error::api)?;
        self.system.devices[dev as usize].sms[sm as usize].warps[wp as usize].grid_id =
            Some(grid_id);
        Ok(grid_id)
    }

    /// The kernel this warp belongs to, as a kernel-registry id.
    ///
    /// With deferred launch notifications a warp may be sighted before its
    /// kernel was ever announced; the kernel record is then synthesized on
    /// the spot from a grid-info query. Callers must therefore be prepared
    /// for the kernel registry to grow during this read.
    pub fn warp_get_kernel(
        &mut self,
        dev: DevId,
        sm: SmId,
        wp: WpId,
    ) -> Result<Option<u64>, Error<A::Error>> {
        self.assert_warp(dev, sm, wp)?;

        if let Some(kernel_id) =
            self.system.devices[dev as usize].sms[sm as usize].warps[wp as usize].kernel_id
        {
            return Ok(kernel_id);
        }

        let grid_id = self.warp_get_grid_id(dev, sm, wp)?;
        let mut kernel_id = self.kernels.find_by_grid_id(dev, grid_id).map(|k| k.id());

        if kernel_id.is_none() && self.options.defer_kernel_launch_notifications {
            self.device_create_kernel(dev, grid_id)?;
            kernel_id = self.kernels.find_by_grid_id(dev, grid_id).map(|k| k.id());
        }

        self.system.devices[dev as usize].sms[sm as usize].warps[wp as usize].kernel_id =
            Some(kernel_id);
        Ok(kernel_id)
    }

    pub fn warp_get_block_idx(
        &mut self,
        dev: DevId,
        sm: SmId,
        wp: WpId,
    ) -> Result<CuDim3, Error<A::Error>> {
        self.assert_warp(dev, sm, wp)?;

        let cold = self.system.devices[dev as usize].sms[sm as usize].warps[wp as usize]
            .block_idx
            .is_none();
        if cold && self.sm_is_valid(dev, sm)? {
            if let Some(updates) = {
                let api = &mut self.api;
                match api.support_batch() {
                    Some(batch) => batch.update_block_idx_in_sm(dev, sm).ok(),
                    None => None,
                }
            } {
                for (wp_id, block_idx) in updates {
                    self.warp_set_block_idx(dev, sm, wp_id, block_idx)?;
                }
            }
        }

        if let Some(block_idx) =
            self.system.devices[dev as usize].sms[sm as usize].warps[wp as usize].block_idx
        {
            return Ok(block_idx);
        }

        let block_idx = self.api.read_block_idx(dev, sm, wp).map_err(Error::api)?;
        self.system.devices[dev as usize].sms[sm as usize].warps[wp as usize].block_idx =
            Some(block_idx);
        Ok(block_idx)
    }

    /// Mask of lanes holding a live thread. Reading it stamps the warp's
    /// timestamp: this is the first query made about any warp of interest,
    /// so it marks when the warp was first observed in this stop.
    pub fn warp_get_valid_lanes_mask(
        &mut self,
        dev: DevId,
        sm: SmId,
        wp: WpId,
    ) -> Result<u32, Error<A::Error>> {
        self.assert_warp(dev, sm, wp)?;

        if let Some(mask) =
            self.system.devices[dev as usize].sms[sm as usize].warps[wp as usize].valid_lanes_mask
        {
            return Ok(mask);
        }

        let mask = if self.warp_is_valid(dev, sm, wp)? {
            self.api.read_valid_lanes(dev, sm, wp).map_err(Error::api)?
        } else {
            0
        };

        let clock = self.clock;
        let warp = &mut self.system.devices[dev as usize].sms[sm as usize].warps[wp as usize];
        warp.valid_lanes_mask = Some(mask);
        if warp.timestamp.is_none() {
            warp.timestamp = Some(clock);
        }

        Ok(mask)
    }

    pub fn warp_get_active_lanes_mask(
        &mut self,
        dev: DevId,
        sm: SmId,
        wp: WpId,
    ) -> Result<u32, Error<A::Error>> {
        self.assert_warp(dev, sm, wp)?;

        if let Some(mask) =
            self.system.devices[dev as usize].sms[sm as usize].warps[wp as usize].active_lanes_mask
        {
            return Ok(mask);
        }

        let mask = self.api.read_active_lanes(dev, sm, wp).map_err(Error::api)?;
        self.system.devices[dev as usize].sms[sm as usize].warps[wp as usize].active_lanes_mask =
            Some(mask);
        Ok(mask)
    }

    /// Lanes that are valid but predicated off at the current PC.
    pub fn warp_get_divergent_lanes_mask(
        &mut self,
        dev: DevId,
        sm: SmId,
        wp: WpId,
    ) -> Result<u32, Error<A::Error>> {
        let valid = self.warp_get_valid_lanes_mask(dev, sm, wp)?;
        let active = self.warp_get_active_lanes_mask(dev, sm, wp)?;
        Ok(valid & !active)
    }

    pub fn warp_get_lowest_active_lane(
        &mut self,
        dev: DevId,
        sm: SmId,
        wp: WpId,
    ) -> Result<u32, Error<A::Error>> {
        let active = self.warp_get_active_lanes_mask(dev, sm, wp)?;
        let num_lanes = self.device_get_num_lanes(dev)?;

        let mut ln = 0;
        while ln < num_lanes && (active >> ln) & 1 == 0 {
            ln += 1;
        }
        Ok(ln)
    }

    /// PC of the warp's active lanes (they all share one).
    pub fn warp_get_active_pc(&mut self, dev: DevId, sm: SmId, wp: WpId) -> Result<u64, Error<A::Error>> {
        let ln = self.warp_get_lowest_active_lane(dev, sm, wp)?;
        self.lane_get_pc(dev, sm, wp, ln)
    }

    pub fn warp_get_active_virtual_pc(
        &mut self,
        dev: DevId,
        sm: SmId,
        wp: WpId,
    ) -> Result<u64, Error<A::Error>> {
        let ln = self.warp_get_lowest_active_lane(dev, sm, wp)?;
        self.lane_get_virtual_pc(dev, sm, wp, ln)
    }

    /// When the warp was first observed. Only meaningful for a valid warp
    /// whose valid-lanes mask has been read.
    pub fn warp_get_timestamp(
        &mut self,
        dev: DevId,
        sm: SmId,
        wp: WpId,
    ) -> Result<CudaClock, Error<A::Error>> {
        self.assert_warp(dev, sm, wp)?;
        // stamp on first access
        self.warp_get_valid_lanes_mask(dev, sm, wp)?;

        Ok(self.system.devices[dev as usize].sms[sm as usize].warps[wp as usize]
            .timestamp
            .expect("timestamp is stamped when the valid lanes mask is read"))
    }

    /// Latch a grid id pushed by the remote transport.
    pub(crate) fn warp_set_grid_id(
        &mut self,
        dev: DevId,
        sm: SmId,
        wp: WpId,
        grid_id: u64,
    ) -> Result<(), Error<A::Error>> {
        self.assert_warp(dev, sm, wp)?;
        self.system.devices[dev as usize].sms[sm as usize].warps[wp as usize].grid_id =
            Some(grid_id);
        Ok(())
    }

    /// Latch a block index pushed by the remote transport.
    pub(crate) fn warp_set_block_idx(
        &mut self,
        dev: DevId,
        sm: SmId,
        wp: WpId,
        block_idx: CuDim3,
    ) -> Result<(), Error<A::Error>> {
        self.assert_warp(dev, sm, wp)?;
        self.system.devices[dev as usize].sms[sm as usize].warps[wp as usize].block_idx =
            Some(block_idx);
        Ok(())
    }

    /// Single-step one warp, then invalidate exactly what the step may
    /// have perturbed: the stepped warps' caches and the SM's two masks —
    /// or the whole device when software preemption may have migrated
    /// warps, or when the hardware stepped more warps than asked.
    pub fn warp_single_step(
        &mut self,
        dev: DevId,
        sm: SmId,
        wp: WpId,
    ) -> Result<u64, Error<A::Error>> {
        log::trace!("device {} sm {} warp {}: single-step", dev, sm, wp);
        self.assert_warp(dev, sm, wp)?;

        let stepped_mask = self.api.single_step_warp(dev, sm, wp).map_err(Error::api)?;

        if self.options.software_preemption {
            self.device_invalidate(dev)?;
        } else {
            if stepped_mask & !(1u64 << wp) != 0 {
                log::warn!("Warp(s) other than the current warp had to be single-stepped.");
                self.device_invalidate(dev)?;
            }

            // invalidate the cache for the warps that have been stepped
            let num_warps = self.device_get_num_warps(dev)?;
            for i in 0..num_warps {
                if (stepped_mask >> i) & 1 == 1 {
                    self.system.devices[dev as usize].sms[sm as usize].warps[i as usize]
                        .invalidate();
                }
            }

            // the warp valid mask lives in the SM
            self.system.devices[dev as usize].sms[sm as usize].invalidate(false);
        }

        Ok(stepped_mask)
    }
}
