//! Tunables for the network core.

use netcore_lib::KlogLevel;

/// Total time `translate_address` waits for a resolution before giving up.
pub const ADDRESS_TRANSLATION_TIMEOUT_MS: u64 = 5000;

/// Interval between repeated resolution requests while waiting.
pub const ADDRESS_TRANSLATION_RETRY_INTERVAL_MS: u64 = 1000;

/// First port of the IANA dynamic range.
pub const EPHEMERAL_PORT_START: u32 = 49152;

/// One past the last ephemeral port.
pub const EPHEMERAL_PORT_END: u32 = 65536;

pub const EPHEMERAL_PORT_COUNT: u32 = EPHEMERAL_PORT_END - EPHEMERAL_PORT_START;

/// Oldest `LinkProperties` layout `add_link` accepts.
pub const NET_LINK_PROPERTIES_VERSION: u32 = 1;

/// Runtime configuration applied by `NetCore::new`.
#[derive(Clone, Copy, Debug)]
pub struct NetCoreConfig {
    /// Emit per-bind debug traces.
    pub debug: bool,
    /// Level for the process-wide logger. `None` leaves it as it is.
    pub log_level: Option<KlogLevel>,
    /// First port handed out by ephemeral assignment.
    pub ephemeral_port_start: u32,
    /// Size of the ephemeral range. Must be nonzero and end at or below 65536.
    pub ephemeral_port_count: u32,
}

impl NetCoreConfig {
    pub const fn new() -> Self {
        Self {
            debug: false,
            log_level: None,
            ephemeral_port_start: EPHEMERAL_PORT_START,
            ephemeral_port_count: EPHEMERAL_PORT_COUNT,
        }
    }

    /// `true` if the ephemeral range fits in the 16-bit port space.
    pub const fn ephemeral_range_valid(&self) -> bool {
        self.ephemeral_port_count != 0
            && self.ephemeral_port_start != 0
            && self.ephemeral_port_start as u64 + self.ephemeral_port_count as u64 <= EPHEMERAL_PORT_END as u64
    }
}

impl Default for NetCoreConfig {
    fn default() -> Self {
        Self::new()
    }
}
