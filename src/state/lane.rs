//! Lane-level mirror operations.
//!
//! Lane getters (other than `lane_is_valid`) require a valid lane; asking
//! about an invalid lane is a caller bug, not a runtime condition.

use crate::api::DebugApi;
use crate::common::{CuDim3, CudaClock, DevId, LaneException, LnId, SmId, StorageSegment, WpId};
use crate::error::Error;
use crate::host::HostDebugger;
use crate::session::CudaCore;

impl<A: DebugApi, H: HostDebugger> CudaCore<A, H> {
    fn assert_lane(&mut self, dev: DevId, sm: SmId, wp: WpId, ln: LnId) -> Result<(), Error<A::Error>> {
        let (num_sms, num_warps, num_lanes) = self.device_shape(dev)?;
        assert!(sm < num_sms, "sm {} out of range on device {}", sm, dev);
        assert!(wp < num_warps, "warp {} out of range on device {}", wp, dev);
        assert!(ln < num_lanes, "lane {} out of range on device {}", ln, dev);
        Ok(())
    }

    fn assert_lane_valid(
        &mut self,
        dev: DevId,
        sm: SmId,
        wp: WpId,
        ln: LnId,
    ) -> Result<(), Error<A::Error>> {
        assert!(
            self.lane_is_valid(dev, sm, wp, ln)?,
            "lane ({}, {}, {}, {}) is not valid",
            dev,
            sm,
            wp,
            ln
        );
        Ok(())
    }

    /// Whether the lane holds a live thread. The first query about a lane
    /// stamps its timestamp.
    pub fn lane_is_valid(
        &mut self,
        dev: DevId,
        sm: SmId,
        wp: WpId,
        ln: LnId,
    ) -> Result<bool, Error<A::Error>> {
        self.assert_lane(dev, sm, wp, ln)?;

        let mask = self.warp_get_valid_lanes_mask(dev, sm, wp)?;
        let valid = (mask >> ln) & 1 == 1;

        let clock = self.clock;
        let lane =
            &mut self.system.devices[dev as usize].sms[sm as usize].warps[wp as usize].lanes
                [ln as usize];
        if lane.timestamp.is_none() {
            lane.timestamp = Some(clock);
        }

        Ok(valid)
    }

    pub fn lane_is_active(
        &mut self,
        dev: DevId,
        sm: SmId,
        wp: WpId,
        ln: LnId,
    ) -> Result<bool, Error<A::Error>> {
        self.assert_lane_valid(dev, sm, wp, ln)?;
        let mask = self.warp_get_active_lanes_mask(dev, sm, wp)?;
        Ok((mask >> ln) & 1 == 1)
    }

    pub fn lane_is_divergent(
        &mut self,
        dev: DevId,
        sm: SmId,
        wp: WpId,
        ln: LnId,
    ) -> Result<bool, Error<A::Error>> {
        self.assert_lane_valid(dev, sm, wp, ln)?;
        let mask = self.warp_get_divergent_lanes_mask(dev, sm, wp)?;
        Ok((mask >> ln) & 1 == 1)
    }

    pub fn lane_get_thread_idx(
        &mut self,
        dev: DevId,
        sm: SmId,
        wp: WpId,
        ln: LnId,
    ) -> Result<CuDim3, Error<A::Error>> {
        self.assert_lane_valid(dev, sm, wp, ln)?;

        // in a remote session, fetch the thread index of every valid lane
        // in the warp with one round trip
        let cold = self.system.devices[dev as usize].sms[sm as usize].warps[wp as usize].lanes
            [ln as usize]
            .thread_idx
            .is_none();
        if cold && self.warp_is_valid(dev, sm, wp)? {
            if let Some(updates) = {
                let api = &mut self.api;
                match api.support_batch() {
                    Some(batch) => batch.update_thread_idx_in_warp(dev, sm, wp).ok(),
                    None => None,
                }
            } {
                for (ln_id, thread_idx) in updates {
                    self.lane_set_thread_idx(dev, sm, wp, ln_id, thread_idx)?;
                }
            }
        }

        if let Some(thread_idx) = self.system.devices[dev as usize].sms[sm as usize].warps
            [wp as usize]
            .lanes[ln as usize]
            .thread_idx
        {
            return Ok(thread_idx);
        }

        let thread_idx = self
            .api
            .read_thread_idx(dev, sm, wp, ln)
            .map_err(Error::api)?;
        self.system.devices[dev as usize].sms[sm as usize].warps[wp as usize].lanes[ln as usize]
            .thread_idx = Some(thread_idx);
        Ok(thread_idx)
    }

    pub fn lane_get_pc(
        &mut self,
        dev: DevId,
        sm: SmId,
        wp: WpId,
        ln: LnId,
    ) -> Result<u64, Error<A::Error>> {
        self.assert_lane_valid(dev, sm, wp, ln)?;

        if let Some(pc) = self.system.devices[dev as usize].sms[sm as usize].warps[wp as usize]
            .lanes[ln as usize]
            .pc
        {
            return Ok(pc);
        }

        let pc = self.api.read_pc(dev, sm, wp, ln).map_err(Error::api)?;
        self.system.devices[dev as usize].sms[sm as usize].warps[wp as usize].lanes[ln as usize]
            .pc = Some(pc);

        // all active lanes share one PC: one read serves them all
        if self.lane_is_active(dev, sm, wp, ln)? {
            let shared = self.warp_get_valid_lanes_mask(dev, sm, wp)?
                & self.warp_get_active_lanes_mask(dev, sm, wp)?;
            let num_lanes = self.device_get_num_lanes(dev)?;
            let warp = &mut self.system.devices[dev as usize].sms[sm as usize].warps[wp as usize];
            for other in 0..num_lanes {
                if (shared >> other) & 1 == 1 {
                    warp.lanes[other as usize].pc = Some(pc);
                }
            }
        }

        Ok(pc)
    }

    pub fn lane_get_virtual_pc(
        &mut self,
        dev: DevId,
        sm: SmId,
        wp: WpId,
        ln: LnId,
    ) -> Result<u64, Error<A::Error>> {
        self.assert_lane_valid(dev, sm, wp, ln)?;

        if let Some(pc) = self.system.devices[dev as usize].sms[sm as usize].warps[wp as usize]
            .lanes[ln as usize]
            .virtual_pc
        {
            return Ok(pc);
        }

        let pc = self
            .api
            .read_virtual_pc(dev, sm, wp, ln)
            .map_err(Error::api)?;
        self.system.devices[dev as usize].sms[sm as usize].warps[wp as usize].lanes[ln as usize]
            .virtual_pc = Some(pc);

        // all active lanes share one virtual PC
        if self.lane_is_active(dev, sm, wp, ln)? {
            let shared = self.warp_get_valid_lanes_mask(dev, sm, wp)?
                & self.warp_get_active_lanes_mask(dev, sm, wp)?;
            let num_lanes = self.device_get_num_lanes(dev)?;
            let warp = &mut self.system.devices[dev as usize].sms[sm as usize].warps[wp as usize];
            for other in 0..num_lanes {
                if (shared >> other) & 1 == 1 {
                    warp.lanes[other as usize].virtual_pc = Some(pc);
                }
            }
        }

        Ok(pc)
    }

    pub fn lane_get_exception(
        &mut self,
        dev: DevId,
        sm: SmId,
        wp: WpId,
        ln: LnId,
    ) -> Result<LaneException, Error<A::Error>> {
        self.assert_lane_valid(dev, sm, wp, ln)?;

        if let Some(exception) = self.system.devices[dev as usize].sms[sm as usize].warps
            [wp as usize]
            .lanes[ln as usize]
            .exception
        {
            return Ok(exception);
        }

        let exception = self
            .api
            .read_lane_exception(dev, sm, wp, ln)
            .map_err(Error::api)?;
        self.system.devices[dev as usize].sms[sm as usize].warps[wp as usize].lanes[ln as usize]
            .exception = Some(exception);
        Ok(exception)
    }

    /// Registers are volatile across steps and cheap to read; they are not
    /// cached.
    pub fn lane_get_register(
        &mut self,
        dev: DevId,
        sm: SmId,
        wp: WpId,
        ln: LnId,
        regno: u32,
    ) -> Result<u32, Error<A::Error>> {
        self.assert_lane_valid(dev, sm, wp, ln)?;
        self.api
            .read_register(dev, sm, wp, ln, regno)
            .map_err(Error::api)
    }

    pub fn lane_get_call_depth(
        &mut self,
        dev: DevId,
        sm: SmId,
        wp: WpId,
        ln: LnId,
    ) -> Result<i32, Error<A::Error>> {
        self.assert_lane_valid(dev, sm, wp, ln)?;
        self.api
            .read_call_depth(dev, sm, wp, ln)
            .map_err(Error::api)
    }

    pub fn lane_get_syscall_call_depth(
        &mut self,
        dev: DevId,
        sm: SmId,
        wp: WpId,
        ln: LnId,
    ) -> Result<i32, Error<A::Error>> {
        self.assert_lane_valid(dev, sm, wp, ln)?;
        self.api
            .read_syscall_call_depth(dev, sm, wp, ln)
            .map_err(Error::api)
    }

    pub fn lane_get_virtual_return_address(
        &mut self,
        dev: DevId,
        sm: SmId,
        wp: WpId,
        ln: LnId,
        level: i32,
    ) -> Result<u64, Error<A::Error>> {
        self.assert_lane_valid(dev, sm, wp, ln)?;
        self.api
            .read_virtual_return_address(dev, sm, wp, ln, level)
            .map_err(Error::api)
    }

    pub fn lane_get_timestamp(
        &mut self,
        dev: DevId,
        sm: SmId,
        wp: WpId,
        ln: LnId,
    ) -> Result<CudaClock, Error<A::Error>> {
        self.assert_lane_valid(dev, sm, wp, ln)?;

        Ok(
            self.system.devices[dev as usize].sms[sm as usize].warps[wp as usize].lanes
                [ln as usize]
                .timestamp
                .expect("timestamp is stamped by lane_is_valid"),
        )
    }

    /// Address the memcheck machinery flagged, when this lane stopped on
    /// an illegal-address exception; 0 otherwise.
    pub fn lane_get_memcheck_error_address(
        &mut self,
        dev: DevId,
        sm: SmId,
        wp: WpId,
        ln: LnId,
    ) -> Result<u64, Error<A::Error>> {
        self.assert_lane_valid(dev, sm, wp, ln)?;

        if self.lane_get_exception(dev, sm, wp, ln)? != LaneException::IllegalAddress {
            return Ok(0);
        }
        let (addr, _) = self
            .api
            .memcheck_read_error_address(dev, sm, wp, ln)
            .map_err(Error::api)?;
        Ok(addr)
    }

    pub fn lane_get_memcheck_error_address_segment(
        &mut self,
        dev: DevId,
        sm: SmId,
        wp: WpId,
        ln: LnId,
    ) -> Result<StorageSegment, Error<A::Error>> {
        self.assert_lane_valid(dev, sm, wp, ln)?;

        if self.lane_get_exception(dev, sm, wp, ln)? != LaneException::IllegalAddress {
            return Ok(StorageSegment::Unspecified);
        }
        let (_, segment) = self
            .api
            .memcheck_read_error_address(dev, sm, wp, ln)
            .map_err(Error::api)?;
        Ok(segment)
    }

    /// Latch a thread index pushed by the remote transport.
    pub(crate) fn lane_set_thread_idx(
        &mut self,
        dev: DevId,
        sm: SmId,
        wp: WpId,
        ln: LnId,
        thread_idx: CuDim3,
    ) -> Result<(), Error<A::Error>> {
        self.assert_lane(dev, sm, wp, ln)?;
        self.system.devices[dev as usize].sms[sm as usize].warps[wp as usize].lanes[ln as usize]
            .thread_idx = Some(thread_idx);
        Ok(())
    }
}
