//! Platform services consumed by the network core.
//!
//! The core never reads hardware timers itself.  The embedder hands a
//! [`Platform`] implementation to the core at construction time; everything
//! time-related goes through it, including parking a waiter and waking it
//! again.

/// Clock and scheduling hooks supplied by the embedder.
pub trait Platform: Send + Sync {
    /// Monotonic time in milliseconds.  Must never go backwards.
    fn monotonic_ms(&self) -> u64;

    /// Free-running counter used to seed ephemeral port selection.
    ///
    /// Only its low bits matter; it need not be in any particular unit.
    fn time_counter(&self) -> u64 {
        self.monotonic_ms()
    }

    /// Back off while polling a condition.
    ///
    /// The default spins; a scheduler-aware embedder should yield here.
    fn relax(&self) {
        core::hint::spin_loop();
    }

    /// Park the calling task until [`wake_waiters`](Self::wake_waiters) is
    /// called or the clock reaches `deadline_ms`.
    ///
    /// Early returns are allowed.  A wake issued after the caller last
    /// checked its condition but before it parked must not be lost: keep a
    /// pending-wakeup flag the next park consumes.  Without a scheduler the
    /// default backs off once and returns, turning waits into polls.
    fn block_until(&self, deadline_ms: u64) {
        let _ = deadline_ms;
        self.relax();
    }

    /// Release every task parked in [`block_until`](Self::block_until).
    fn wake_waiters(&self) {}
}
