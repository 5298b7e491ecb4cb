//! The kernel registry: every kernel launch the debugger knows about,
//! keyed by `(device, grid id)`.
//!
//! The registry is process-wide. Warps reference kernels by grid id and
//! kernels reference their context and module by id, so no entity here
//! holds a pointer into another registry.

use crate::common::{CuDim3, DevId, KernelOrigin, KernelType};

/// A launched kernel instance.
#[derive(Debug, Clone)]
pub struct Kernel {
    id: u64,
    dev_id: DevId,
    grid_id: u64,
    context_id: u64,
    module_id: u64,
    name: String,
    entry_pc: u64,
    grid_dim: CuDim3,
    block_dim: CuDim3,
    kind: KernelType,
    parent_grid_id: u64,
    origin: KernelOrigin,
    launched: bool,
    present: bool,
    dimensions: String,
}

impl Kernel {
    /// Session-unique kernel id (not the grid id).
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn dev_id(&self) -> DevId {
        self.dev_id
    }

    pub fn grid_id(&self) -> u64 {
        self.grid_id
    }

    pub fn context_id(&self) -> u64 {
        self.context_id
    }

    pub fn module_id(&self) -> u64 {
        self.module_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn entry_pc(&self) -> u64 {
        self.entry_pc
    }

    pub fn grid_dim(&self) -> CuDim3 {
        self.grid_dim
    }

    pub fn block_dim(&self) -> CuDim3 {
        self.block_dim
    }

    pub fn kind(&self) -> KernelType {
        self.kind
    }

    pub fn parent_grid_id(&self) -> u64 {
        self.parent_grid_id
    }

    pub fn origin(&self) -> KernelOrigin {
        self.origin
    }

    /// Whether the kernel has ever been sighted on the hardware.
    pub fn has_launched(&self) -> bool {
        self.launched
    }

    /// Whether the kernel is currently on the hardware.
    pub fn is_present(&self) -> bool {
        self.present
    }

    /// Pre-formatted `(gx,gy,gz)x(bx,by,bz)` dimension string.
    pub fn dimensions(&self) -> &str {
        &self.dimensions
    }
}

/// Arguments to [`KernelRegistry::start_kernel`]; one field per attribute
/// of the launch notification.
#[derive(Debug, Clone)]
pub struct KernelLaunch {
    pub dev_id: DevId,
    pub grid_id: u64,
    pub context_id: u64,
    pub module_id: u64,
    pub name: String,
    pub entry_pc: u64,
    pub grid_dim: CuDim3,
    pub block_dim: CuDim3,
    pub kind: KernelType,
    pub parent_grid_id: u64,
    pub origin: KernelOrigin,
}

#[derive(Debug, Default)]
pub struct KernelRegistry {
    kernels: Vec<Kernel>,
    next_id: u64,
}

impl KernelRegistry {
    /// Register a kernel. `(dev_id, grid_id)` must not already be present.
    pub(crate) fn start_kernel(&mut self, launch: KernelLaunch) -> &Kernel {
        assert!(
            self.find_by_grid_id(launch.dev_id, launch.grid_id).is_none(),
            "kernel (dev {}, grid {}) registered twice",
            launch.dev_id,
            launch.grid_id
        );

        let id = self.next_id;
        self.next_id += 1;

        let dimensions = format!("{}x{}", launch.grid_dim, launch.block_dim);

        log::trace!(
            "kernel {}: start dev_id {} grid_id {} entry 0x{:x}",
            id,
            launch.dev_id,
            launch.grid_id,
            launch.entry_pc
        );

        self.kernels.push(Kernel {
            id,
            dev_id: launch.dev_id,
            grid_id: launch.grid_id,
            context_id: launch.context_id,
            module_id: launch.module_id,
            name: launch.name,
            entry_pc: launch.entry_pc,
            grid_dim: launch.grid_dim,
            block_dim: launch.block_dim,
            kind: launch.kind,
            parent_grid_id: launch.parent_grid_id,
            origin: launch.origin,
            launched: false,
            present: false,
            dimensions,
        });
        self.kernels.last().unwrap()
    }

    /// Remove a finished kernel from the registry.
    pub(crate) fn terminate_kernel(&mut self, dev_id: DevId, grid_id: u64) -> Option<Kernel> {
        let idx = self
            .kernels
            .iter()
            .position(|k| k.dev_id == dev_id && k.grid_id == grid_id)?;
        let kernel = self.kernels.remove(idx);
        log::trace!("kernel {}: terminate", kernel.id);
        Some(kernel)
    }

    pub fn find_by_grid_id(&self, dev_id: DevId, grid_id: u64) -> Option<&Kernel> {
        self.kernels
            .iter()
            .find(|k| k.dev_id == dev_id && k.grid_id == grid_id)
    }

    pub fn find_by_id(&self, kernel_id: u64) -> Option<&Kernel> {
        self.kernels.iter().find(|k| k.id == kernel_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Kernel> {
        self.kernels.iter()
    }

    pub fn len(&self) -> usize {
        self.kernels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kernels.is_empty()
    }

    /// The id handed to the most recently registered kernel.
    pub fn latest_kernel_id(&self) -> Option<u64> {
        self.next_id.checked_sub(1)
    }

    pub(crate) fn reset_presence(&mut self) {
        for kernel in &mut self.kernels {
            kernel.present = false;
        }
    }

    pub(crate) fn mark_present(&mut self, dev_id: DevId, grid_id: u64) {
        if let Some(kernel) = self
            .kernels
            .iter_mut()
            .find(|k| k.dev_id == dev_id && k.grid_id == grid_id)
        {
            kernel.launched = true;
            kernel.present = true;
        }
    }

    /// `(dev, grid)` pairs of kernels that were seen on the hardware at
    /// some point but are not there anymore.
    pub(crate) fn vanished(&self) -> Vec<(DevId, u64)> {
        self.kernels
            .iter()
            .filter(|k| k.launched && !k.present)
            .map(|k| (k.dev_id, k.grid_id))
            .collect()
    }
}
