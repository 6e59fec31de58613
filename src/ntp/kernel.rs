//! Local kernel NTP discipline state
//!
//! On Linux the state comes from the adjtimex syscall invoked in read-only
//! mode (modes = 0). Other platforms get a total stub: `read` fails with
//! `Unsupported`, predicates are `false`, duration accessors are zero.
//!
//! Kernel time fields arrive in microseconds; frequency is scaled ppm where
//! 65536 equals 1 ppm.

use std::time::Duration;

use thiserror::Error;

use crate::constants::kernel::{
    STA_CLOCKERR, STA_UNSYNC, TIME_DEL, TIME_ERROR, TIME_INS, TIME_OK, TIME_OOP, TIME_WAIT,
};
#[cfg(target_os = "linux")]
use crate::constants::kernel::{STA_DEL, STA_INS, STA_PPSSIGNAL};

/// Failures reading the kernel clock state
#[derive(Debug, Error)]
pub enum KernelError {
    /// Not a Linux host
    #[error("kernel timex reading is not supported on this platform (Linux only)")]
    Unsupported,

    /// Reader constructed with kernel monitoring turned off
    #[error("kernel reader is disabled")]
    Disabled,

    /// The adjtimex syscall itself failed
    #[error("adjtimex syscall failed: {0}")]
    Syscall(#[source] std::io::Error),
}

/// Categorical synchronization state derived from the status bitmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncStatus {
    Synchronized,
    Unsynchronized,
    ClockError,
    LeapInsertPending,
    LeapDeletePending,
    LeapInProgress,
    LeapOccurred,
    Error,
    #[default]
    Unknown,
}

impl SyncStatus {
    /// Derive the categorical state from the raw status bits.
    #[must_use]
    pub fn from_status_bits(status: i32) -> Self {
        if status & STA_UNSYNC != 0 {
            return Self::Unsynchronized;
        }
        if status & STA_CLOCKERR != 0 {
            return Self::ClockError;
        }
        match status & 0x7 {
            TIME_OK => Self::Synchronized,
            TIME_INS => Self::LeapInsertPending,
            TIME_DEL => Self::LeapDeletePending,
            TIME_OOP => Self::LeapInProgress,
            TIME_WAIT => Self::LeapOccurred,
            TIME_ERROR => Self::Error,
            _ => Self::Unknown,
        }
    }

    /// Stable label used for the sync-status metric.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Synchronized => "synchronized",
            Self::Unsynchronized => "unsynchronized",
            Self::ClockError => "clock_error",
            Self::LeapInsertPending => "leap_insert_pending",
            Self::LeapDeletePending => "leap_delete_pending",
            Self::LeapInProgress => "leap_in_progress",
            Self::LeapOccurred => "leap_occurred",
            Self::Error => "error",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of the kernel NTP discipline state.
#[derive(Debug, Clone, Copy, Default)]
pub struct KernelTimex {
    /// Clock offset in seconds (signed)
    pub offset_seconds: f64,
    /// Frequency adjustment in scaled ppm (65536 = 1 ppm)
    pub frequency: i64,
    /// Maximum error bound
    pub max_error: Duration,
    /// Estimated error
    pub est_error: Duration,
    /// Clock precision
    pub precision: Duration,
    /// Raw status bitmask
    pub status_code: i32,
    /// Categorical state derived from `status_code`
    pub sync_status: SyncStatus,
}

impl KernelTimex {
    /// Frequency adjustment in plain ppm.
    #[must_use]
    pub fn frequency_ppm(&self) -> f64 {
        self.frequency as f64 / 65536.0
    }

    /// Whether the kernel clock is disciplined.
    #[must_use]
    #[cfg(target_os = "linux")]
    pub fn is_synchronized(&self) -> bool {
        self.status_code & STA_UNSYNC == 0
    }

    /// Whether a leap second is pending (insert or delete).
    #[must_use]
    #[cfg(target_os = "linux")]
    pub fn has_leap_second(&self) -> bool {
        self.status_code & (STA_INS | STA_DEL) != 0
    }

    /// Whether a PPS signal is driving the clock.
    #[must_use]
    #[cfg(target_os = "linux")]
    pub fn is_pps_active(&self) -> bool {
        self.status_code & STA_PPSSIGNAL != 0
    }

    #[must_use]
    #[cfg(not(target_os = "linux"))]
    pub fn is_synchronized(&self) -> bool {
        false
    }

    #[must_use]
    #[cfg(not(target_os = "linux"))]
    pub fn has_leap_second(&self) -> bool {
        false
    }

    #[must_use]
    #[cfg(not(target_os = "linux"))]
    pub fn is_pps_active(&self) -> bool {
        false
    }
}

/// Reader for the kernel NTP state.
#[derive(Debug, Clone, Copy)]
pub struct KernelReader {
    enabled: bool,
}

impl KernelReader {
    #[must_use]
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    /// Read the current kernel state via adjtimex in read-only mode.
    #[cfg(target_os = "linux")]
    pub fn read(&self) -> Result<KernelTimex, KernelError> {
        if !self.enabled {
            return Err(KernelError::Disabled);
        }

        let mut tx: libc::timex = unsafe { std::mem::zeroed() };
        // modes = 0: read-only, no clock adjustment.
        let rc = unsafe { libc::adjtimex(&mut tx) };
        if rc == -1 {
            return Err(KernelError::Syscall(std::io::Error::last_os_error()));
        }

        let micros_to_duration = |v: i64| Duration::from_micros(v.max(0) as u64);
        let status = tx.status;

        Ok(KernelTimex {
            offset_seconds: tx.offset as f64 / 1e6,
            frequency: tx.freq as i64,
            max_error: micros_to_duration(tx.maxerror as i64),
            est_error: micros_to_duration(tx.esterror as i64),
            precision: micros_to_duration(tx.precision as i64),
            status_code: status,
            sync_status: SyncStatus::from_status_bits(status),
        })
    }

    /// Kernel state is unavailable off Linux.
    #[cfg(not(target_os = "linux"))]
    pub fn read(&self) -> Result<KernelTimex, KernelError> {
        if !self.enabled {
            return Err(KernelError::Disabled);
        }
        Err(KernelError::Unsupported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_status_from_bits() {
        assert_eq!(
            SyncStatus::from_status_bits(STA_UNSYNC),
            SyncStatus::Unsynchronized
        );
        // Unsync wins over everything else.
        assert_eq!(
            SyncStatus::from_status_bits(STA_UNSYNC | STA_CLOCKERR),
            SyncStatus::Unsynchronized
        );
        assert_eq!(
            SyncStatus::from_status_bits(STA_CLOCKERR),
            SyncStatus::ClockError
        );
        assert_eq!(SyncStatus::from_status_bits(0), SyncStatus::Synchronized);
        assert_eq!(
            SyncStatus::from_status_bits(TIME_INS),
            SyncStatus::LeapInsertPending
        );
        assert_eq!(
            SyncStatus::from_status_bits(TIME_DEL),
            SyncStatus::LeapDeletePending
        );
        assert_eq!(
            SyncStatus::from_status_bits(TIME_OOP),
            SyncStatus::LeapInProgress
        );
        assert_eq!(
            SyncStatus::from_status_bits(TIME_WAIT),
            SyncStatus::LeapOccurred
        );
        assert_eq!(SyncStatus::from_status_bits(TIME_ERROR), SyncStatus::Error);
        assert_eq!(SyncStatus::from_status_bits(0x6), SyncStatus::Unknown);
    }

    #[test]
    fn sync_status_labels() {
        assert_eq!(SyncStatus::Synchronized.as_str(), "synchronized");
        assert_eq!(SyncStatus::Unsynchronized.as_str(), "unsynchronized");
        assert_eq!(SyncStatus::ClockError.as_str(), "clock_error");
        assert_eq!(SyncStatus::LeapInsertPending.to_string(), "leap_insert_pending");
    }

    #[test]
    fn frequency_scaling() {
        let timex = KernelTimex {
            frequency: 65536,
            ..KernelTimex::default()
        };
        assert!((timex.frequency_ppm() - 1.0).abs() < 1e-12);

        let timex = KernelTimex {
            frequency: -3 * 65536,
            ..KernelTimex::default()
        };
        assert!((timex.frequency_ppm() + 3.0).abs() < 1e-12);
    }

    #[test]
    fn disabled_reader_fails() {
        let reader = KernelReader::new(false);
        assert!(matches!(reader.read(), Err(KernelError::Disabled)));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn linux_predicates_follow_status_bits() {
        let synced = KernelTimex {
            status_code: 0,
            ..KernelTimex::default()
        };
        assert!(synced.is_synchronized());
        assert!(!synced.has_leap_second());

        let unsynced = KernelTimex {
            status_code: STA_UNSYNC,
            ..KernelTimex::default()
        };
        assert!(!unsynced.is_synchronized());

        let leaping = KernelTimex {
            status_code: STA_INS,
            ..KernelTimex::default()
        };
        assert!(leaping.has_leap_second());

        let pps = KernelTimex {
            status_code: STA_PPSSIGNAL,
            ..KernelTimex::default()
        };
        assert!(pps.is_pps_active());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn linux_read_returns_state_or_syscall_error() {
        // adjtimex in read-only mode is usually permitted, but sandboxes may
        // filter it; accept either outcome without flaking.
        let reader = KernelReader::new(true);
        match reader.read() {
            Ok(timex) => {
                assert!(timex.frequency_ppm().is_finite());
                let _ = timex.sync_status.as_str();
            }
            Err(KernelError::Syscall(_)) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(not(target_os = "linux"))]
    #[test]
    fn non_linux_read_is_unsupported() {
        let reader = KernelReader::new(true);
        assert!(matches!(reader.read(), Err(KernelError::Unsupported)));
    }

    #[cfg(not(target_os = "linux"))]
    #[test]
    fn non_linux_predicates_are_false() {
        let timex = KernelTimex::default();
        assert!(!timex.is_synchronized());
        assert!(!timex.has_leap_second());
        assert!(!timex.is_pps_active());
    }
}
