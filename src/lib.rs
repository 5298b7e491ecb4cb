//! An implementation-agnostic core for a CUDA debugger extension.
//!
//! `cudbg-core` sits between a low-level hardware debug API and a
//! higher-level host debugger, and owns the hard middle of GPU debugging:
//!
//! - a hierarchical, lazily-populated **state mirror** of every device, SM,
//!   warp, and lane, with strict invalidation on resume and single-step
//! - the **context / module / kernel registries** tracking the host-side
//!   notion of GPU execution state
//! - an **event processor** draining the debug API's notification queues
//! - a SIGTRAP-based **notification channel** with blocked/pending/aliased
//!   semantics
//! - a **coordinate algebra** (logical ↔ physical, wildcards, nearest-match
//!   resolution) shared by filters and focus switching
//! - the **iterators and `info cuda` views** built on top of it all
//!
//! The two integration points are traits: [`DebugApi`](api::DebugApi) is
//! the set of capabilities consumed from the hardware debug library, and
//! [`HostDebugger`](host::HostDebugger) is the set of callbacks invoked on
//! the embedding debugger (breakpoints, symbol lookups, UI sinks). A
//! [`CudaCore`] value owns both plus all mirrored state.
//!
//! Everything is single-threaded by design — the host drives the core
//! strictly between inferior resumes — except the
//! [`Notifications`](notifications::Notifications) channel, which is fed
//! from the debug API's callback thread and drained from the main thread
//! under a mutex.

pub mod api;
pub mod common;
pub mod contexts;
pub mod coords;
pub mod events;
pub mod host;
pub mod iterator;
pub mod kernels;
pub mod modules;
pub mod notifications;
pub mod options;

mod commands;
mod error;
mod focus;
mod session;
mod state;

#[cfg(test)]
pub(crate) mod testutil;

pub use error::Error;
pub use focus::Candidates;
pub use session::CudaCore;
