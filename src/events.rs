//! The event processor: drains the debug-API event queues and applies each
//! event to the context, module, and kernel registries.

use crate::api::{DebugApi, EventQueueKind};
use crate::common::{CuDim3, DevId, ElfImage, HostTid, KernelOrigin, KernelType, INVALID_HOST_TID};
use crate::common::AttachState;
use crate::contexts::Context;
use crate::error::Error;
use crate::host::HostDebugger;
use crate::kernels::KernelLaunch;
use crate::session::CudaCore;

/// One notification from the debug API.
///
/// `Invalid` is the end-of-queue marker, not a real event.
#[derive(Debug, Clone)]
pub enum CudaEvent {
    CtxCreate {
        dev: DevId,
        context_id: u64,
        tid: HostTid,
    },
    CtxDestroy {
        dev: DevId,
        context_id: u64,
        tid: HostTid,
    },
    CtxPush {
        dev: DevId,
        context_id: u64,
        tid: HostTid,
    },
    CtxPop {
        dev: DevId,
        context_id: u64,
        tid: HostTid,
    },
    ElfImageLoaded {
        dev: DevId,
        context_id: u64,
        module_id: u64,
        elf_image: ElfImage,
    },
    KernelReady {
        dev: DevId,
        context_id: u64,
        module_id: u64,
        grid_id: u64,
        tid: HostTid,
        entry_pc: u64,
        grid_dim: CuDim3,
        block_dim: CuDim3,
        kind: KernelType,
        parent_grid_id: u64,
        origin: KernelOrigin,
    },
    KernelFinished {
        dev: DevId,
        grid_id: u64,
    },
    InternalError {
        code: u32,
    },
    Timeout,
    AttachComplete,
    DetachComplete,
    Invalid,
}

impl<A: DebugApi, H: HostDebugger> CudaCore<A, H> {
    /// Drain an event queue, then post-process.
    ///
    /// Every event must be consumed before any operation that forces a
    /// state collection across the device, so the drain runs to the
    /// end-of-queue marker before breakpoints are re-evaluated.
    pub fn process_events(&mut self, queue: EventQueueKind) -> Result<(), Error<A::Error>> {
        loop {
            let event = self.api.get_next_event(queue).map_err(Error::api)?;
            if matches!(event, CudaEvent::Invalid) {
                break;
            }
            self.process_event(event)?;
        }

        self.event_post_process();
        Ok(())
    }

    /// Apply one event to the registries.
    pub fn process_event(&mut self, event: CudaEvent) -> Result<(), Error<A::Error>> {
        match event {
            CudaEvent::CtxCreate {
                dev,
                context_id,
                tid,
            } => self.event_create_context(dev, context_id, tid),
            CudaEvent::CtxDestroy {
                dev,
                context_id,
                tid,
            } => self.event_destroy_context(dev, context_id, tid),
            CudaEvent::CtxPush {
                dev,
                context_id,
                tid,
            } => self.event_push_context(dev, context_id, tid),
            CudaEvent::CtxPop {
                dev,
                context_id,
                tid,
            } => self.event_pop_context(dev, context_id, tid),
            CudaEvent::ElfImageLoaded {
                dev,
                context_id,
                module_id,
                elf_image,
            } => self.event_load_elf_image(dev, context_id, module_id, elf_image),
            CudaEvent::KernelReady {
                dev,
                context_id,
                module_id,
                grid_id,
                tid,
                entry_pc,
                grid_dim,
                block_dim,
                kind,
                parent_grid_id,
                origin,
            } => self.event_kernel_ready(
                dev,
                context_id,
                module_id,
                grid_id,
                tid,
                entry_pc,
                grid_dim,
                block_dim,
                kind,
                parent_grid_id,
                origin,
            ),
            CudaEvent::KernelFinished { dev, grid_id } => self.event_kernel_finished(dev, grid_id),
            CudaEvent::InternalError { code } => {
                log::trace!("event: internal error {}", code);
                // Stop the session and surface the error. No cleanup here;
                // that happens on process exit.
                Err(Error::CoreFatal(code))
            }
            CudaEvent::Timeout => {
                log::trace!("event: timeout");
                Ok(())
            }
            CudaEvent::AttachComplete => {
                self.api.set_attach_state(AttachState::AppReady);
                Ok(())
            }
            CudaEvent::DetachComplete => {
                self.api.set_attach_state(AttachState::DetachComplete);
                Ok(())
            }
            CudaEvent::Invalid => unreachable!("end-of-queue marker is not a processable event"),
        }
    }

    /// Launch (kernel ready) events may have changed how host breakpoints
    /// resolve; cycle them once per drain.
    pub(crate) fn event_post_process(&mut self) {
        self.host.remove_breakpoints();
        self.host.insert_breakpoints();
    }

    fn event_create_context(
        &mut self,
        dev: DevId,
        context_id: u64,
        tid: HostTid,
    ) -> Result<(), Error<A::Error>> {
        log::trace!(
            "event: ctx create dev_id={} context=0x{:x} tid={}",
            dev,
            context_id,
            tid
        );

        if tid == INVALID_HOST_TID {
            return Err(Error::InvalidThreadId);
        }

        let contexts = &mut self.system.devices[dev as usize].contexts;
        contexts.add_context(Context::new(context_id, dev));
        contexts.stack_context(context_id, tid);

        if self.options.show_context_events {
            self.host.print_message(&format!(
                "[Context Create of context 0x{:x} on Device {}]",
                context_id, dev
            ));
        }

        if self.options.gpu_busy_check && self.host.device_used_for_graphics(dev) {
            return Err(Error::DeviceUsedForGraphics);
        }

        Ok(())
    }

    fn event_destroy_context(
        &mut self,
        dev: DevId,
        context_id: u64,
        tid: HostTid,
    ) -> Result<(), Error<A::Error>> {
        log::trace!(
            "event: ctx destroy dev_id={} context=0x{:x} tid={}",
            dev,
            context_id,
            tid
        );

        if tid == INVALID_HOST_TID {
            return Err(Error::InvalidThreadId);
        }

        let contexts = &mut self.system.devices[dev as usize].contexts;
        if contexts.active_context(tid) == Some(context_id) {
            contexts.unstack_context(tid);
        }

        if self.current_context == Some(context_id) {
            self.current_context = None;
        }

        self.host.remove_auto_breakpoints(context_id);
        self.host.unresolve_breakpoints(context_id);

        self.system.devices[dev as usize]
            .contexts
            .remove_context(context_id);

        if self.options.show_context_events {
            self.host.print_message(&format!(
                "[Context Destroy of context 0x{:x} on Device {}]",
                context_id, dev
            ));
        }

        Ok(())
    }

    fn event_push_context(
        &mut self,
        dev: DevId,
        context_id: u64,
        tid: HostTid,
    ) -> Result<(), Error<A::Error>> {
        log::trace!(
            "event: ctx push dev_id={} context=0x{:x} tid={}",
            dev,
            context_id,
            tid
        );

        // context push/pop events are ignored while attaching
        if self.api.get_attach_state() != AttachState::NotStarted {
            return Ok(());
        }

        if tid == INVALID_HOST_TID {
            return Err(Error::InvalidThreadId);
        }

        self.system.devices[dev as usize]
            .contexts
            .stack_context(context_id, tid);

        if self.options.show_context_events {
            self.host.print_message(&format!(
                "[Context Push of context 0x{:x} on Device {}]",
                context_id, dev
            ));
        }

        Ok(())
    }

    fn event_pop_context(
        &mut self,
        dev: DevId,
        context_id: u64,
        tid: HostTid,
    ) -> Result<(), Error<A::Error>> {
        log::trace!(
            "event: ctx pop dev_id={} context=0x{:x} tid={}",
            dev,
            context_id,
            tid
        );

        // context push/pop events are ignored while attaching
        if self.api.get_attach_state() != AttachState::NotStarted {
            return Ok(());
        }

        if tid == INVALID_HOST_TID {
            return Err(Error::InvalidThreadId);
        }

        let popped = self.system.devices[dev as usize]
            .contexts
            .unstack_context(tid);
        assert_eq!(
            popped,
            Some(context_id),
            "popped context does not match the pop event"
        );

        if self.options.show_context_events {
            self.host.print_message(&format!(
                "[Context Pop of context 0x{:x} on Device {}]",
                context_id, dev
            ));
        }

        Ok(())
    }

    fn event_load_elf_image(
        &mut self,
        dev: DevId,
        context_id: u64,
        module_id: u64,
        elf_image: ElfImage,
    ) -> Result<(), Error<A::Error>> {
        log::trace!(
            "event: elf image loaded dev_id={} context=0x{:x} module=0x{:x}",
            dev,
            context_id,
            module_id
        );

        let context = self.system.devices[dev as usize]
            .contexts
            .find_by_id_mut(context_id)
            .expect("elf image loaded into an unknown context");
        context.add_module(module_id, elf_image);

        self.current_context = Some(context_id);

        // try to resolve pending breakpoints now that a new module is
        // loaded
        self.host.resolve_breakpoints(&elf_image);

        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn event_kernel_ready(
        &mut self,
        dev: DevId,
        context_id: u64,
        module_id: u64,
        grid_id: u64,
        tid: HostTid,
        entry_pc: u64,
        grid_dim: CuDim3,
        block_dim: CuDim3,
        kind: KernelType,
        parent_grid_id: u64,
        origin: KernelOrigin,
    ) -> Result<(), Error<A::Error>> {
        log::trace!(
            "event: kernel ready dev_id={} context=0x{:x} module=0x{:x} grid_id={} tid={}",
            dev,
            context_id,
            module_id,
            grid_id,
            tid
        );

        if tid == INVALID_HOST_TID {
            return Err(Error::InvalidThreadId);
        }

        let name = self.host.kernel_name_from_pc(entry_pc);
        self.register_kernel(KernelLaunch {
            dev_id: dev,
            grid_id,
            context_id,
            module_id,
            name,
            entry_pc,
            grid_dim,
            block_dim,
            kind,
            parent_grid_id,
            origin,
        });
        self.current_context = Some(context_id);

        let break_on_launch = match kind {
            KernelType::Application => self.options.break_on_launch_application,
            KernelType::System => self.options.break_on_launch_system,
        };
        if break_on_launch {
            self.host.create_auto_breakpoint(entry_pc, context_id);
        }

        Ok(())
    }

    fn event_kernel_finished(&mut self, dev: DevId, grid_id: u64) -> Result<(), Error<A::Error>> {
        log::trace!("event: kernel finished dev_id={} grid_id={}", dev, grid_id);

        self.kernel_terminate(dev, grid_id);

        self.host.clear_current_source_line();
        self.host.clear_displays();

        Ok(())
    }

    /// Register a kernel, printing the launch banner when asked to.
    pub(crate) fn register_kernel(&mut self, launch: KernelLaunch) {
        let kernel = self.kernels.start_kernel(launch);
        if self.options.show_kernel_events {
            let banner = format!(
                "[Launch of CUDA Kernel {} ({}<<<{}>>>) on Device {}]",
                kernel.id(),
                kernel.name(),
                kernel.dimensions(),
                kernel.dev_id()
            );
            self.host.print_message(&banner);
        }
    }

    /// Remove a kernel, printing the termination banner when asked to.
    pub(crate) fn kernel_terminate(&mut self, dev: DevId, grid_id: u64) {
        let kernel = self
            .kernels
            .terminate_kernel(dev, grid_id)
            .expect("terminating a kernel that was never registered");
        if self.options.show_kernel_events {
            let banner = format!(
                "[Termination of CUDA Kernel {} ({}<<<{}>>>) on Device {}]",
                kernel.id(),
                kernel.name(),
                kernel.dimensions(),
                kernel.dev_id()
            );
            self.host.print_message(&banner);
        }
    }
}
