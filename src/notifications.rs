//! The SIGTRAP-based notification channel between the debug-API callback
//! thread (the producer) and the main debugger thread (the consumer).
//!
//! Three booleans track the channel: `pending_send`, `sent`, and
//! `received`. From the producer's point of view the channel is in one of
//! three states:
//!
//! ```text
//!     ready   == !sent && !pending_send
//!     pending == !sent &&  pending_send
//!     sent    ==  sent && !pending_send
//!    (illegal ==  sent &&  pending_send)
//! ```
//!
//! From the consumer's point of view:
//!
//! ```text
//!     none     == !sent && !received
//!     received ==  sent &&  received
//!     pending  ==  sent && !received
//!    (illegal  == !sent &&  received)
//! ```
//!
//! While `blocked`, a notification cannot be sent; it is buffered as
//! `pending_send` and goes out when the channel is unblocked. A
//! notification arriving while a previous one is still being serviced is
//! marked as an `aliased_event`: it is examined before the inferior is
//! resumed and no second trap signal is sent for it.

use std::sync::Mutex;

use crate::common::{HostTid, Signal, WaitStatus};

/// Trap delivery port. Implemented over `tkill` in a live session, over a
/// recording fake in tests.
pub trait NotifyTarget {
    /// Whether the platform can target an individual thread.
    fn supports_tid(&self) -> bool;

    /// Deliver a trap signal to one host thread. Returns `true` on
    /// successful delivery.
    fn notify_thread(&self, tid: HostTid) -> bool;

    /// Every host thread of the inferior, used as fallback recipients.
    fn host_threads(&self) -> Vec<HostTid>;
}

/// What the debug-API callback hands over when it raises a notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct NotifyPayload {
    /// Preferred recipient thread, `0` when the producer has no opinion.
    pub tid: HostTid,
    /// Set when this is a timeout retry rather than a fresh notification.
    pub timeout: bool,
}

#[derive(Debug, Default)]
struct NotificationState {
    blocked: bool,
    pending_send: bool,
    aliased_event: bool,
    sent: bool,
    received: bool,
    tid: HostTid,
    pending_send_data: NotifyPayload,
}

/// The notification channel. Every public operation holds the internal
/// mutex for the full duration of its body.
pub struct Notifications<N: NotifyTarget> {
    target: N,
    verbose: bool,
    state: Mutex<NotificationState>,
}

impl<N: NotifyTarget> Notifications<N> {
    pub fn new(target: N, verbose: bool) -> Notifications<N> {
        Notifications {
            target,
            verbose,
            state: Mutex::new(NotificationState::default()),
        }
    }

    fn trace(&self, msg: &str) {
        if self.verbose {
            log::trace!("notifications -- {}", msg);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, NotificationState> {
        self.state.lock().expect("notification mutex poisoned")
    }

    /// Deliver a trap, preferring the producer-designated thread and
    /// falling back to the first host thread that accepts delivery.
    /// Called with the state lock held.
    fn send(&self, state: &mut NotificationState, payload: &NotifyPayload) {
        if self.target.supports_tid() && payload.tid != 0 && self.target.notify_thread(payload.tid)
        {
            self.trace("sent to the designated host thread");
            state.tid = payload.tid;
            state.sent = true;
            return;
        }

        for tid in self.target.host_threads() {
            if self.target.notify_thread(tid) {
                self.trace("sent to the first valid host thread");
                state.tid = tid;
                state.sent = true;
                return;
            }
        }

        self.trace("send FAILED: no host thread accepted delivery");
    }

    /// Raise a notification.
    pub fn notify(&self, payload: NotifyPayload) {
        let mut state = self.lock();

        if payload.timeout {
            // Was there a timeout waiting for a response?
            if state.sent && !state.received {
                self.trace("timeout: resending notification");
                self.send(&mut state, &payload);
            }
        } else if state.sent {
            self.trace("aliased event: will examine before resuming");
            state.aliased_event = true;
        } else if state.pending_send {
            self.trace("ignoring: another notification is already pending");
        } else if state.blocked {
            self.trace("blocked: marking notification as pending_send");
            state.pending_send = true;
            state.pending_send_data = payload;
        } else {
            self.send(&mut state, &payload);
        }
    }

    /// Stop notifications from being sent; they buffer as pending.
    pub fn block(&self) {
        self.lock().blocked = true;
    }

    /// Unblock, sending the buffered notification if there is one.
    pub fn accept(&self) {
        let mut state = self.lock();

        state.blocked = false;

        if state.pending_send {
            self.trace("accept: sending pending notification");
            let payload = state.pending_send_data;
            self.send(&mut state, &payload);
            state.pending_send = false;
            state.pending_send_data = NotifyPayload::default();
        }
    }

    /// Called on every inferior stop: decide whether this stop is our
    /// notification trap.
    pub fn analyze(&self, stopped_tid: HostTid, status: &WaitStatus, trap_expected: bool) {
        let mut state = self.lock();

        // A notification is deemed received when its trap signal is the
        // reason we stopped.
        if state.sent
            && state.tid == stopped_tid
            && *status == WaitStatus::Stopped(Signal::SIGTRAP)
            && !trap_expected
        {
            self.trace("received notification");
            state.received = true;
        }
    }

    /// The received notification has been fully serviced.
    pub fn mark_consumed(&self) {
        let mut state = self.lock();

        if state.received {
            self.trace("consuming notification");
            state.sent = false;
            state.received = false;
            state.tid = 0;
        }
    }

    /// A trap was sent but its stop has not been attributed yet.
    pub fn pending(&self) -> bool {
        let state = self.lock();
        state.sent && !state.received
    }

    pub fn received(&self) -> bool {
        self.lock().received
    }

    pub fn aliased_event(&self) -> bool {
        self.lock().aliased_event
    }

    pub fn reset_aliased_event(&self) {
        self.lock().aliased_event = false;
    }

    /// Drop a buffered (producer-pending) notification without sending it.
    pub fn consume_pending(&self) {
        self.lock().pending_send = false;
    }

    /// Return the channel to its initial state, keeping the target.
    pub fn reset(&self) {
        let mut state = self.lock();
        *state = NotificationState::default();
    }
}

/// [`NotifyTarget`] delivering real SIGTRAPs to the inferior's threads.
pub struct SigtrapNotifier;

impl NotifyTarget for SigtrapNotifier {
    fn supports_tid(&self) -> bool {
        cfg!(target_os = "linux")
    }

    fn notify_thread(&self, tid: HostTid) -> bool {
        #[cfg(target_os = "linux")]
        unsafe {
            libc::syscall(libc::SYS_tkill, tid as libc::c_long, libc::SIGTRAP) == 0
        }
        #[cfg(not(target_os = "linux"))]
        unsafe {
            libc::kill(tid as libc::pid_t, libc::SIGTRAP) == 0
        }
    }

    fn host_threads(&self) -> Vec<HostTid> {
        #[cfg(target_os = "linux")]
        {
            std::fs::read_dir("/proc/self/task")
                .map(|entries| {
                    entries
                        .filter_map(|e| e.ok()?.file_name().to_str()?.parse().ok())
                        .collect()
                })
                .unwrap_or_default()
        }
        #[cfg(not(target_os = "linux"))]
        {
            Vec::new()
        }
    }
}
