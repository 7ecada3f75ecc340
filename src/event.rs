use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

/// Identifier handed out by [`DeadlineEngine::schedule`](crate::DeadlineEngine::schedule).
///
/// Ids are allocated from a monotonically increasing counter and are never
/// reused by the engine that issued them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventId(u64);

impl EventId {
    /// The raw counter value.
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl From<u64> for EventId {
    fn from(raw: u64) -> Self {
        EventId(raw)
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// One registered deadline.
///
/// `fired` and `cancelled` only ever go from `false` to `true`.  Both are
/// readable without the gate so scans and `size()` stay lock-free, but
/// `fired` is only written while `gate` is held, and delivery re-checks both
/// flags under `gate`.
pub(crate) struct ScheduledEvent {
    deadline: i64,
    fired: AtomicBool,
    cancelled: AtomicBool,
    gate: Mutex<()>,
}

impl ScheduledEvent {
    pub(crate) fn new(deadline: i64) -> Self {
        ScheduledEvent {
            deadline,
            fired: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            gate: Mutex::new(()),
        }
    }

    /// Expired strictly before `now`; a deadline equal to `now` is not due.
    #[inline]
    pub(crate) fn is_due(&self, now: i64) -> bool {
        self.deadline < now
    }

    #[inline]
    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn is_pending(&self) -> bool {
        !self.fired.load(Ordering::Acquire) && !self.is_cancelled()
    }

    pub(crate) fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Runs `deliver` and marks the event fired, unless it already fired or
    /// was cancelled.  Returns `true` if `deliver` ran.
    ///
    /// The check, the delivery and the `fired` store all happen under the
    /// event's own gate, so racing polls deliver it at most once.  A caller
    /// that finds the gate taken returns `false` at once: the holder is
    /// already delivering this event, possibly from inside its own handler.
    /// If `deliver` unwinds, the gate is released and the event stays
    /// pending.
    pub(crate) fn fire_once(&self, deliver: impl FnOnce()) -> bool {
        let _gate = match self.gate.try_lock() {
            Some(gate) => gate,
            None => return false,
        };
        if self.fired.load(Ordering::Acquire) || self.cancelled.load(Ordering::SeqCst) {
            return false;
        }
        deliver();
        self.fired.store(true, Ordering::Release);
        true
    }
}
