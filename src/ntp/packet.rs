//! RFC 5905 packet encoding and decoding
//!
//! Only the 48-byte header is handled; extension fields and MACs are outside
//! what a monitoring exchange needs. Field layout follows RFC 5905 §7.3:
//!
//! ```ignore
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |LI | VN  |Mode |    Stratum    |     Poll      |  Precision    |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                          Root Delay                           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                       Root Dispersion                         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Reference ID                           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                     Reference Timestamp (64)                  |
//! |                      Origin Timestamp (64)                    |
//! |                      Receive Timestamp (64)                   |
//! |                      Transmit Timestamp (64)                  |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Root delay and dispersion use the unsigned 16.16 short format; timestamps
//! use the unsigned 32.32 format with the 1900 prime epoch.

use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

use crate::constants::protocol::{NTP_UNIX_OFFSET, PACKET_SIZE};

/// Structural problems with received packet bytes
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PacketError {
    /// Fewer bytes than the fixed NTP header
    #[error("packet too short: {len} bytes (need {PACKET_SIZE})")]
    TooShort { len: usize },
}

/// A decoded NTP header
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Packet {
    /// Leap indicator (2 bits, value 3 = unsynchronized)
    pub leap: u8,
    /// Protocol version (3 bits)
    pub version: u8,
    /// Association mode (3 bits)
    pub mode: u8,
    /// Stratum (0 = kiss-of-death carrier, 16 = unsynchronized)
    pub stratum: u8,
    /// Poll interval as a signed log2-seconds exponent
    pub poll: i8,
    /// Clock precision as a signed log2-seconds exponent
    pub precision: i8,
    /// Root delay in 16.16 short format
    pub root_delay: u32,
    /// Root dispersion in 16.16 short format
    pub root_dispersion: u32,
    /// Reference identifier (stratum-0: ASCII kiss code)
    pub reference_id: u32,
    /// Reference timestamp, raw 32.32 format
    pub reference_ts: u64,
    /// Origin timestamp (T1 echoed by the server), raw 32.32 format
    pub origin_ts: u64,
    /// Receive timestamp (T2), raw 32.32 format
    pub receive_ts: u64,
    /// Transmit timestamp (T3), raw 32.32 format
    pub transmit_ts: u64,
}

impl Packet {
    /// Build a client request for the given protocol version.
    ///
    /// The transmit timestamp carries the client's send time (T1); everything
    /// else is zero as RFC 5905 prescribes for client mode.
    #[must_use]
    pub fn client_request(version: u8, transmit_ts: u64) -> Self {
        Self {
            leap: 0,
            version,
            mode: crate::constants::protocol::MODE_CLIENT,
            transmit_ts,
            ..Self::default()
        }
    }

    /// Serialize to the 48-byte wire form.
    #[must_use]
    pub fn encode(&self) -> [u8; PACKET_SIZE] {
        let mut buf = [0u8; PACKET_SIZE];
        buf[0] = (self.leap & 0x3) << 6 | (self.version & 0x7) << 3 | (self.mode & 0x7);
        buf[1] = self.stratum;
        buf[2] = self.poll as u8;
        buf[3] = self.precision as u8;
        buf[4..8].copy_from_slice(&self.root_delay.to_be_bytes());
        buf[8..12].copy_from_slice(&self.root_dispersion.to_be_bytes());
        buf[12..16].copy_from_slice(&self.reference_id.to_be_bytes());
        buf[16..24].copy_from_slice(&self.reference_ts.to_be_bytes());
        buf[24..32].copy_from_slice(&self.origin_ts.to_be_bytes());
        buf[32..40].copy_from_slice(&self.receive_ts.to_be_bytes());
        buf[40..48].copy_from_slice(&self.transmit_ts.to_be_bytes());
        buf
    }

    /// Parse the fixed header from received bytes. Trailing extension bytes
    /// are ignored.
    pub fn decode(buf: &[u8]) -> Result<Self, PacketError> {
        if buf.len() < PACKET_SIZE {
            return Err(PacketError::TooShort { len: buf.len() });
        }

        let be_u32 = |at: usize| u32::from_be_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]]);
        let be_u64 = |at: usize| {
            (u64::from(be_u32(at)) << 32) | u64::from(be_u32(at + 4))
        };

        Ok(Self {
            leap: buf[0] >> 6,
            version: (buf[0] >> 3) & 0x7,
            mode: buf[0] & 0x7,
            stratum: buf[1],
            poll: buf[2] as i8,
            precision: buf[3] as i8,
            root_delay: be_u32(4),
            root_dispersion: be_u32(8),
            reference_id: be_u32(12),
            reference_ts: be_u64(16),
            origin_ts: be_u64(24),
            receive_ts: be_u64(32),
            transmit_ts: be_u64(40),
        })
    }

    /// Kiss code carried in the reference identifier of a stratum-0 reply.
    ///
    /// Returns the 4-character ASCII tag verbatim, or `None` when the packet
    /// is not stratum 0 or the bytes are not printable ASCII.
    #[must_use]
    pub fn kiss_code(&self) -> Option<String> {
        if self.stratum != 0 {
            return None;
        }
        let bytes = self.reference_id.to_be_bytes();
        if bytes.iter().all(|&b| (0x21..=0x7e).contains(&b)) {
            Some(bytes.iter().map(|&b| b as char).collect())
        } else {
            None
        }
    }
}

/// Convert a 16.16 short-format value to a duration.
#[must_use]
pub fn short_to_duration(raw: u32) -> Duration {
    let seconds = u64::from(raw >> 16);
    let nanos = (u64::from(raw & 0xffff) * 1_000_000_000) >> 16;
    Duration::new(seconds, nanos as u32)
}

/// Convert a signed log2-seconds exponent (poll, precision fields) to a
/// duration. Exponents are clamped to ±31 to keep the conversion finite.
#[must_use]
pub fn exponent_to_duration(exp: i8) -> Duration {
    let exp = i32::from(exp).clamp(-31, 31);
    if exp >= 0 {
        Duration::from_secs(1u64 << exp)
    } else {
        Duration::from_secs_f64(2f64.powi(exp))
    }
}

/// Convert a raw 32.32 NTP timestamp to nanoseconds since the Unix epoch.
///
/// A zero timestamp means "unknown" on the wire and maps to `None`. Era 0
/// is assumed; the seconds field wraps in 2036 and this exporter's
/// measurements are all relative, so no era pivot is carried.
#[must_use]
pub fn timestamp_to_unix_nanos(raw: u64) -> Option<i128> {
    if raw == 0 {
        return None;
    }
    let seconds = i128::from(raw >> 32) - i128::from(NTP_UNIX_OFFSET);
    let frac_nanos = (i128::from(raw & 0xffff_ffff) * 1_000_000_000) >> 32;
    Some(seconds * 1_000_000_000 + frac_nanos)
}

/// Convert a system time to the raw 32.32 NTP timestamp format.
#[must_use]
pub fn system_time_to_timestamp(t: SystemTime) -> u64 {
    let since_unix = t.duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO);
    let seconds = since_unix.as_secs() + NTP_UNIX_OFFSET;
    let fraction = (u64::from(since_unix.subsec_nanos()) << 32) / 1_000_000_000;
    (seconds << 32) | fraction
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_roundtrip() {
        let packet = Packet {
            leap: 1,
            version: 4,
            mode: 4,
            stratum: 2,
            poll: 6,
            precision: -23,
            root_delay: 0x0001_8000,
            root_dispersion: 0x0000_4000,
            reference_id: 0x0a00_0001,
            reference_ts: 0xdead_beef_0000_0001,
            origin_ts: 1,
            receive_ts: 2,
            transmit_ts: 3,
        };

        let decoded = Packet::decode(&packet.encode()).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn first_byte_packing() {
        let packet = Packet::client_request(3, 42);
        let buf = packet.encode();
        // LI=0, VN=3, Mode=3 => 0b00_011_011
        assert_eq!(buf[0], 0b0001_1011);

        let decoded = Packet::decode(&buf).unwrap();
        assert_eq!(decoded.leap, 0);
        assert_eq!(decoded.version, 3);
        assert_eq!(decoded.mode, 3);
        assert_eq!(decoded.transmit_ts, 42);
    }

    #[test]
    fn decode_rejects_short_buffer() {
        assert_eq!(
            Packet::decode(&[0u8; 47]),
            Err(PacketError::TooShort { len: 47 })
        );
    }

    #[test]
    fn decode_ignores_trailing_extensions() {
        let packet = Packet::client_request(4, 7);
        let mut buf = packet.encode().to_vec();
        buf.extend_from_slice(&[0u8; 20]);
        assert_eq!(Packet::decode(&buf).unwrap().transmit_ts, 7);
    }

    #[test]
    fn kiss_code_on_stratum_zero() {
        let packet = Packet {
            stratum: 0,
            reference_id: u32::from_be_bytes(*b"RATE"),
            ..Packet::default()
        };
        assert_eq!(packet.kiss_code().as_deref(), Some("RATE"));
    }

    #[test]
    fn kiss_code_absent_for_nonzero_stratum() {
        let packet = Packet {
            stratum: 2,
            reference_id: u32::from_be_bytes(*b"RATE"),
            ..Packet::default()
        };
        assert_eq!(packet.kiss_code(), None);
    }

    #[test]
    fn kiss_code_requires_printable_ascii() {
        let packet = Packet {
            stratum: 0,
            reference_id: 0x0102_0304,
            ..Packet::default()
        };
        assert_eq!(packet.kiss_code(), None);
    }

    #[test]
    fn short_format_conversions() {
        assert_eq!(short_to_duration(0), Duration::ZERO);
        assert_eq!(short_to_duration(0x0001_0000), Duration::from_secs(1));
        // 0x8000 / 0x10000 == 0.5 s
        assert_eq!(short_to_duration(0x0000_8000), Duration::from_millis(500));
    }

    #[test]
    fn exponent_conversions() {
        assert_eq!(exponent_to_duration(0), Duration::from_secs(1));
        assert_eq!(exponent_to_duration(6), Duration::from_secs(64));
        let precision = exponent_to_duration(-20);
        assert!(precision < Duration::from_micros(2));
        assert!(precision > Duration::from_nanos(900));
    }

    #[test]
    fn zero_timestamp_is_unknown() {
        assert_eq!(timestamp_to_unix_nanos(0), None);
    }

    #[test]
    fn timestamp_conversion_matches_unix_epoch() {
        // NTP timestamp for the Unix epoch: 2_208_988_800 seconds, no fraction.
        let raw = 2_208_988_800u64 << 32;
        assert_eq!(timestamp_to_unix_nanos(raw), Some(0));
    }

    #[test]
    fn system_time_roundtrip_within_precision() {
        let now = SystemTime::now();
        let raw = system_time_to_timestamp(now);
        let nanos = timestamp_to_unix_nanos(raw).unwrap();
        let expected = now
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos() as i128;
        // 32-bit fraction resolves ~0.23 ns; conversion rounding stays < 1 ns
        assert!((nanos - expected).abs() < 2);
    }
}
