//! netcore shared ABI types
//!
//! This crate provides the canonical definitions for the types exchanged
//! between the network core, its plugins, and the outer control surfaces:
//! - Network domains and network addresses
//! - The network device information structure and its flags
//!
//! Types that cross the boundary are `#[repr(C)]` for layout stability.

#![no_std]
#![forbid(unsafe_code)]

pub mod device;
pub mod net;

pub use device::*;
pub use net::*;
