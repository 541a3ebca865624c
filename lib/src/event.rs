//! Signal/pulse event for blocking waits with a bounded timeout.
//!
//! An [`Event`] carries a level (`signaled`) and an edge counter
//! (`generation`).  Waiters take a [`WaitTicket`] *before* re-checking the
//! condition they care about, then wait on that ticket; any pulse or signal
//! issued after the ticket was taken releases them.  This closes the window
//! between "condition false" and "start waiting" without holding a lock.
//!
//! A waiter parks through [`Platform::block_until`]; a signal or pulse that
//! finds waiters releases them through [`Platform::wake_waiters`].
//!
//! # Signal options
//!
//! - [`SignalOption::Unsignal`]: drop the level.  Pending tickets stay valid.
//! - [`SignalOption::SignalAll`]: raise the level and bump the generation;
//!   every current and future waiter returns immediately until unsignaled.
//! - [`SignalOption::Pulse`]: bump the generation only, releasing waiters
//!   holding an older ticket.
//!
//! # Usage
//!
//! ```rust,ignore
//! loop {
//!     let ticket = event.ticket();
//!     if condition() { break; }
//!     if event.wait(ticket, 1000, platform) == WaitResult::TimedOut { retry(); }
//! }
//!
//! // Producer side:
//! event.signal(SignalOption::Pulse, platform);
//! ```

use core::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use crate::platform::Platform;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SignalOption {
    Unsignal,
    SignalAll,
    Pulse,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitResult {
    Signaled,
    TimedOut,
}

/// Snapshot of an event's generation, taken before checking a condition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WaitTicket(u64);

pub struct Event {
    signaled: AtomicBool,
    generation: AtomicU64,
    /// Tasks inside [`Event::wait`].
    waiters: AtomicUsize,
}

impl Event {
    pub const fn new() -> Self {
        Self {
            signaled: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            waiters: AtomicUsize::new(0),
        }
    }

    /// Apply `option`, waking parked waiters through `platform` when the
    /// event fires.
    pub fn signal(&self, option: SignalOption, platform: &dyn Platform) {
        match option {
            SignalOption::Unsignal => {
                self.signaled.store(false, Ordering::SeqCst);
                return;
            }
            SignalOption::SignalAll => {
                self.signaled.store(true, Ordering::SeqCst);
                self.generation.fetch_add(1, Ordering::SeqCst);
            }
            SignalOption::Pulse => {
                self.generation.fetch_add(1, Ordering::SeqCst);
            }
        }

        // Pairs with the registration in `wait`: either the waiter sees the
        // new generation or we see the waiter.
        if self.waiters.load(Ordering::SeqCst) != 0 {
            platform.wake_waiters();
        }
    }

    #[inline]
    pub fn is_signaled(&self) -> bool {
        self.signaled.load(Ordering::SeqCst)
    }

    #[inline]
    pub fn has_waiters(&self) -> bool {
        self.waiters.load(Ordering::SeqCst) != 0
    }

    #[inline]
    pub fn ticket(&self) -> WaitTicket {
        WaitTicket(self.generation.load(Ordering::SeqCst))
    }

    /// `true` if the event was signaled or pulsed since `ticket` was taken.
    #[inline]
    pub fn fired_since(&self, ticket: WaitTicket) -> bool {
        self.is_signaled() || self.generation.load(Ordering::SeqCst) != ticket.0
    }

    /// Park until the event fires past `ticket` or `timeout_ms` elapses.
    pub fn wait(&self, ticket: WaitTicket, timeout_ms: u64, platform: &dyn Platform) -> WaitResult {
        let deadline = platform.monotonic_ms().saturating_add(timeout_ms);
        self.waiters.fetch_add(1, Ordering::SeqCst);
        let result = loop {
            if self.fired_since(ticket) {
                break WaitResult::Signaled;
            }
            if platform.monotonic_ms() >= deadline {
                break WaitResult::TimedOut;
            }
            platform.block_until(deadline);
        };

        self.waiters.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

impl Default for Event {
    fn default() -> Self {
        Self::new()
    }
}
