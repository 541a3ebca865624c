//! Support library for the netcore workspace: logging, the platform service
//! trait, the translation wait event, and the test harness.

#![cfg_attr(not(test), no_std)]

pub mod event;
pub mod klog;
pub mod platform;
pub mod testing;


#[doc(hidden)]
pub use paste;

pub use event::{Event, SignalOption, WaitResult, WaitTicket};
pub use klog::{
    KlogBackend, KlogLevel, klog_get_level, klog_init, klog_register_backend, klog_set_level,
    klog_unregister_backend,
};
pub use platform::Platform;
