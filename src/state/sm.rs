//! SM-level mirror operations.

use crate::api::DebugApi;
use crate::common::{DevId, LaneException, SmId};
use crate::error::Error;
use crate::host::HostDebugger;
use crate::session::CudaCore;

impl<A: DebugApi, H: HostDebugger> CudaCore<A, H> {
    pub fn sm_is_valid(&mut self, dev: DevId, sm: SmId) -> Result<bool, Error<A::Error>> {
        Ok(self.sm_get_valid_warps_mask(dev, sm)? != 0)
    }

    pub fn sm_get_valid_warps_mask(&mut self, dev: DevId, sm: SmId) -> Result<u64, Error<A::Error>> {
        let (num_sms, _, _) = self.device_shape(dev)?;
        assert!(sm < num_sms, "sm {} out of range on device {}", sm, dev);

        if let Some(mask) = self.system.devices[dev as usize].sms[sm as usize].valid_warps_mask {
            return Ok(mask);
        }

        let mask = self.api.read_valid_warps(dev, sm).map_err(Error::api)?;
        self.system.devices[dev as usize].sms[sm as usize].valid_warps_mask = Some(mask);
        Ok(mask)
    }

    pub fn sm_get_broken_warps_mask(
        &mut self,
        dev: DevId,
        sm: SmId,
    ) -> Result<u64, Error<A::Error>> {
        let (num_sms, _, _) = self.device_shape(dev)?;
        assert!(sm < num_sms, "sm {} out of range on device {}", sm, dev);

        if let Some(mask) = self.system.devices[dev as usize].sms[sm as usize].broken_warps_mask {
            return Ok(mask);
        }

        let mask = self.api.read_broken_warps(dev, sm).map_err(Error::api)?;
        self.system.devices[dev as usize].sms[sm as usize].broken_warps_mask = Some(mask);
        Ok(mask)
    }

    /// Pre-fill "no exception" into every lane of the SM.
    pub(crate) fn sm_set_exception_none(&mut self, dev: DevId, sm: SmId) {
        log::trace!("device {} sm {}: setting no exceptions", dev, sm);

        let sm_state = &mut self.system.devices[dev as usize].sms[sm as usize];
        for warp in &mut sm_state.warps {
            for lane in &mut warp.lanes {
                lane.exception = Some(LaneException::None);
            }
        }
    }
}
