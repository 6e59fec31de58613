//! Constants used throughout the exporter
//!
//! This module centralizes protocol values and validation thresholds
//! to avoid magic numbers scattered across the query stack.

use std::time::Duration;

/// Query behavior constants
pub mod query {
    use super::Duration;

    /// Delay between consecutive samples of a multi-sample query
    pub const DELAY_BETWEEN_SAMPLES: Duration = Duration::from_millis(100);

    /// Default timeout for a single NTP exchange
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

    /// Default deadline for a DNS resolution when the caller set none
    pub const DEFAULT_RESOLVE_TIMEOUT: Duration = Duration::from_secs(10);
}

/// NTP wire protocol constants
pub mod protocol {
    /// UDP port NTP servers listen on
    pub const NTP_PORT: u16 = 123;

    /// Size of an NTP packet without extensions
    pub const PACKET_SIZE: usize = 48;

    /// Client association mode (RFC 5905 §3)
    pub const MODE_CLIENT: u8 = 3;

    /// Server association mode
    pub const MODE_SERVER: u8 = 4;

    /// Seconds between the NTP prime epoch (1900) and the Unix epoch (1970)
    pub const NTP_UNIX_OFFSET: u64 = 2_208_988_800;
}

/// Validation thresholds
pub mod validation {
    use super::Duration;

    /// Offsets at or beyond this are flagged as clock skew warnings
    pub const MAX_CLOCK_SKEW: Duration = Duration::from_secs(3600);

    /// Round-trip times above this are flagged as warnings
    pub const MAX_ACCEPTABLE_RTT: Duration = Duration::from_secs(10);

    /// Lowest stratum a usable server may report
    pub const MIN_VALID_STRATUM: u8 = 1;

    /// Highest stratum a usable server may report
    pub const MAX_VALID_STRATUM: u8 = 15;
}

/// Linux kernel clock status bits and state codes (struct timex)
pub mod kernel {
    /// Clock synchronized
    pub const TIME_OK: i32 = 0;
    /// Insert leap second
    pub const TIME_INS: i32 = 1;
    /// Delete leap second
    pub const TIME_DEL: i32 = 2;
    /// Leap second in progress
    pub const TIME_OOP: i32 = 3;
    /// Leap second has occurred
    pub const TIME_WAIT: i32 = 4;
    /// Clock not synchronized
    pub const TIME_ERROR: i32 = 5;

    /// Insert leap second pending
    pub const STA_INS: i32 = 0x0010;
    /// Delete leap second pending
    pub const STA_DEL: i32 = 0x0020;
    /// Clock unsynchronized
    pub const STA_UNSYNC: i32 = 0x0040;
    /// PPS signal present
    pub const STA_PPSSIGNAL: i32 = 0x0100;
    /// Clock hardware fault
    pub const STA_CLOCKERR: i32 = 0x1000;
}
