//! GPU execution contexts and the per-device context registry.
//!
//! Each device owns an unordered list of contexts plus one LIFO stack per
//! host thread; the top of a thread's stack is that thread's active
//! context. Contexts are referenced everywhere else by id, never by
//! pointer, so the registry is the single owner.

use std::collections::HashMap;

use crate::common::{ElfImage, HostTid};
use crate::host::HostDebugger;
use crate::modules::{Module, ModuleRegistry};

/// A GPU execution context.
#[derive(Debug)]
pub struct Context {
    context_id: u64,
    dev_id: u32,
    modules: ModuleRegistry,
}

impl Context {
    pub(crate) fn new(context_id: u64, dev_id: u32) -> Context {
        log::trace!(
            "create context dev_id {} context_id 0x{:x}",
            dev_id,
            context_id
        );
        Context {
            context_id,
            dev_id,
            modules: ModuleRegistry::default(),
        }
    }

    pub fn id(&self) -> u64 {
        self.context_id
    }

    pub fn dev_id(&self) -> u32 {
        self.dev_id
    }

    pub fn modules(&self) -> &ModuleRegistry {
        &self.modules
    }

    pub(crate) fn add_module(&mut self, module_id: u64, elf_image: ElfImage) -> &Module {
        self.modules
            .add(Module::new(self.context_id, module_id, elf_image));
        self.modules.find_by_id(module_id).unwrap()
    }
}

/// The contexts of one device.
#[derive(Debug, Default)]
pub struct ContextRegistry {
    contexts: Vec<Context>,
    stacks: HashMap<HostTid, Vec<u64>>,
}

impl ContextRegistry {
    pub(crate) fn add_context(&mut self, context: Context) {
        self.contexts.push(context);
    }

    /// Remove a context from the list and from every thread's stack.
    pub(crate) fn remove_context(&mut self, context_id: u64) -> Option<Context> {
        for stack in self.stacks.values_mut() {
            stack.retain(|id| *id != context_id);
        }

        let idx = self.contexts.iter().position(|c| c.id() == context_id)?;
        Some(self.contexts.remove(idx))
    }

    /// Push a context on a host thread's stack.
    pub(crate) fn stack_context(&mut self, context_id: u64, tid: HostTid) {
        assert!(
            self.find_by_id(context_id).is_some(),
            "stacked context 0x{:x} is not registered on this device",
            context_id
        );
        self.stacks.entry(tid).or_default().push(context_id);
    }

    /// Pop the topmost context from a host thread's stack.
    pub(crate) fn unstack_context(&mut self, tid: HostTid) -> Option<u64> {
        self.stacks.get_mut(&tid)?.pop()
    }

    /// The context at the top of a host thread's stack.
    pub fn active_context(&self, tid: HostTid) -> Option<u64> {
        self.stacks.get(&tid)?.last().copied()
    }

    pub fn find_by_id(&self, context_id: u64) -> Option<&Context> {
        self.contexts.iter().find(|c| c.id() == context_id)
    }

    pub(crate) fn find_by_id_mut(&mut self, context_id: u64) -> Option<&mut Context> {
        self.contexts.iter_mut().find(|c| c.id() == context_id)
    }

    /// The context owning the module whose ELF text range contains `addr`.
    pub fn find_by_address(&self, addr: u64) -> Option<&Context> {
        self.contexts
            .iter()
            .find(|c| c.modules.find_by_address(addr).is_some())
    }

    pub fn is_any_context_present(&self) -> bool {
        !self.contexts.is_empty()
    }

    /// Whether the context sits at the top of any host thread's stack.
    pub fn is_active_context(&self, context_id: u64) -> bool {
        self.stacks
            .values()
            .any(|stack| stack.last() == Some(&context_id))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Context> {
        self.contexts.iter()
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    /// Offer every module's ELF image to the host breakpoint resolver.
    pub(crate) fn resolve_breakpoints<H: HostDebugger>(&self, host: &mut H) {
        for context in &self.contexts {
            for module in context.modules.iter() {
                host.resolve_breakpoints(module.elf_image());
            }
        }
    }

    /// Unresolve host breakpoints for every context, in turn.
    pub(crate) fn cleanup_breakpoints<H: HostDebugger>(&self, host: &mut H) {
        for context in &self.contexts {
            host.unresolve_breakpoints(context.id());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stack_top_is_the_active_context() {
        let mut reg = ContextRegistry::default();
        reg.add_context(Context::new(0xa, 0));
        reg.add_context(Context::new(0xb, 0));

        reg.stack_context(0xa, 100);
        reg.stack_context(0xb, 100);
        assert_eq!(reg.active_context(100), Some(0xb));

        assert_eq!(reg.unstack_context(100), Some(0xb));
        assert_eq!(reg.active_context(100), Some(0xa));

        assert_eq!(reg.unstack_context(100), Some(0xa));
        assert_eq!(reg.active_context(100), None);
        assert_eq!(reg.unstack_context(100), None);
    }

    #[test]
    fn stacks_are_per_thread() {
        let mut reg = ContextRegistry::default();
        reg.add_context(Context::new(0xa, 0));

        reg.stack_context(0xa, 100);
        assert_eq!(reg.active_context(100), Some(0xa));
        assert_eq!(reg.active_context(200), None);
    }

    #[test]
    fn remove_purges_every_stack() {
        let mut reg = ContextRegistry::default();
        reg.add_context(Context::new(0xa, 0));
        reg.stack_context(0xa, 100);
        reg.stack_context(0xa, 200);

        let removed = reg.remove_context(0xa).unwrap();
        assert_eq!(removed.id(), 0xa);
        assert_eq!(reg.active_context(100), None);
        assert_eq!(reg.active_context(200), None);
        assert!(reg.is_empty());
    }
}
