//! Wire layout of benchmark payloads.
//!
//! ```text
//! [0, 9)   send timestamp, ns since the Unix epoch (0 = withheld)
//! [9, 18)  FIN marker (0 = data, non-zero = end of stream)
//! [18, ..) zero filler up to the requested message size
//! ```
//!
//! Both header fields are zig-zag encoded LEB128 varints, the same encoding
//! Go's `encoding/binary` uses for signed varints, so payloads interoperate
//! with consumers written against that format. A nanosecond timestamp needs
//! at most 63 significant bits after zig-zag encoding, which fits the 9-byte
//! slot exactly.

use crate::utils::current_timestamp_ns;
use std::ops::Range;
use thiserror::Error;

/// Length of the fixed header; payloads shorter than this are rejected.
pub const HEADER_LEN: usize = 18;

pub const TIMESTAMP_SLOT: Range<usize> = 0..9;
pub const FIN_SLOT: Range<usize> = 9..18;

/// Value written to the FIN slot by the drain phase.
pub const FIN_MARKER: i64 = 0xFF;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EnvelopeError {
    #[error("payload of {len} bytes is shorter than the {HEADER_LEN}-byte header")]
    Truncated { len: usize },

    #[error("{field} varint is not terminated within its slot")]
    Malformed { field: &'static str },

    #[error("{field} value {value} does not fit in a 9-byte varint")]
    ValueTooLarge { field: &'static str, value: i64 },
}

/// Decoded header of a benchmark payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Envelope {
    pub timestamp_ns: i64,
    pub fin: i64,
}

impl Envelope {
    /// Header stamped with the current wall-clock time.
    pub fn stamped_now(fin: i64) -> Self {
        Self {
            timestamp_ns: current_timestamp_ns() as i64,
            fin,
        }
    }

    pub fn is_fin(&self) -> bool {
        self.fin != 0
    }

    pub fn has_timestamp(&self) -> bool {
        self.timestamp_ns != 0
    }

    /// Encode into a zero-filled buffer of `size` bytes.
    ///
    /// Sizes below [`HEADER_LEN`] still produce a full header.
    pub fn encode(&self, size: usize) -> Result<Vec<u8>, EnvelopeError> {
        let mut payload = vec![0u8; size.max(HEADER_LEN)];
        self.write_header(&mut payload)?;
        Ok(payload)
    }

    /// Overwrite the header of an existing buffer of at least [`HEADER_LEN`]
    /// bytes, leaving the filler untouched.
    pub fn write_header(&self, payload: &mut [u8]) -> Result<(), EnvelopeError> {
        if payload.len() < HEADER_LEN {
            return Err(EnvelopeError::Truncated { len: payload.len() });
        }
        put_varint(&mut payload[TIMESTAMP_SLOT], self.timestamp_ns, "timestamp")?;
        put_varint(&mut payload[FIN_SLOT], self.fin, "fin")?;
        Ok(())
    }

    /// Decode the header of an inbound payload.
    pub fn decode(payload: &[u8]) -> Result<Self, EnvelopeError> {
        if payload.len() < HEADER_LEN {
            return Err(EnvelopeError::Truncated { len: payload.len() });
        }
        Ok(Self {
            timestamp_ns: read_varint(&payload[TIMESTAMP_SLOT], "timestamp")?,
            fin: read_varint(&payload[FIN_SLOT], "fin")?,
        })
    }
}

fn put_varint(slot: &mut [u8], value: i64, field: &'static str) -> Result<(), EnvelopeError> {
    let mut remaining = ((value << 1) ^ (value >> 63)) as u64;
    for byte in slot.iter_mut() {
        if remaining < 0x80 {
            *byte = remaining as u8;
            return Ok(());
        }
        *byte = (remaining as u8) | 0x80;
        remaining >>= 7;
    }
    Err(EnvelopeError::ValueTooLarge { field, value })
}

fn read_varint(slot: &[u8], field: &'static str) -> Result<i64, EnvelopeError> {
    let mut unsigned: u64 = 0;
    for (i, &byte) in slot.iter().enumerate() {
        unsigned |= u64::from(byte & 0x7f) << (7 * i);
        if byte < 0x80 {
            let value = (unsigned >> 1) as i64 ^ -((unsigned & 1) as i64);
            return Ok(value);
        }
    }
    Err(EnvelopeError::Malformed { field })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_preserves_header() {
        let envelope = Envelope {
            timestamp_ns: 1_726_000_000_123_456_789,
            fin: FIN_MARKER,
        };
        let payload = envelope.encode(128).unwrap();
        assert_eq!(payload.len(), 128);
        assert_eq!(Envelope::decode(&payload).unwrap(), envelope);
    }

    #[test]
    fn test_current_time_fits_timestamp_slot() {
        let envelope = Envelope::stamped_now(0);
        let payload = envelope.encode(HEADER_LEN).unwrap();
        let decoded = Envelope::decode(&payload).unwrap();
        assert_eq!(decoded.timestamp_ns, envelope.timestamp_ns);
        assert!(decoded.has_timestamp());
        assert!(!decoded.is_fin());
    }

    #[test]
    fn test_matches_go_signed_varint_layout() {
        // binary.PutVarint(buf, 0xff) == [0xfe, 0x03]
        let payload = Envelope { timestamp_ns: 0, fin: 0xff }.encode(32).unwrap();
        assert_eq!(&payload[0..2], &[0x00, 0x00]);
        assert_eq!(&payload[9..11], &[0xfe, 0x03]);

        // binary.PutVarint(buf, -1) == [0x01]
        let payload = Envelope { timestamp_ns: -1, fin: 0 }.encode(32).unwrap();
        assert_eq!(payload[0], 0x01);
        assert_eq!(Envelope::decode(&payload).unwrap().timestamp_ns, -1);
    }

    #[test]
    fn test_filler_is_zeroed() {
        let payload = Envelope::stamped_now(0).encode(1024).unwrap();
        assert!(payload[HEADER_LEN..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_small_size_still_carries_header() {
        let payload = Envelope { timestamp_ns: 5, fin: 1 }.encode(4).unwrap();
        assert_eq!(payload.len(), HEADER_LEN);
        assert!(Envelope::decode(&payload).unwrap().is_fin());
    }

    #[test]
    fn test_undersized_payload_is_rejected() {
        assert_eq!(
            Envelope::decode(&[0u8; 10]),
            Err(EnvelopeError::Truncated { len: 10 })
        );
        assert_eq!(
            Envelope::decode(&[]),
            Err(EnvelopeError::Truncated { len: 0 })
        );
    }

    #[test]
    fn test_unterminated_varint_is_malformed() {
        let mut payload = vec![0u8; HEADER_LEN];
        payload[TIMESTAMP_SLOT].fill(0x80);
        assert_eq!(
            Envelope::decode(&payload),
            Err(EnvelopeError::Malformed { field: "timestamp" })
        );
    }

    #[test]
    fn test_oversized_value_is_rejected_on_encode() {
        let envelope = Envelope {
            timestamp_ns: i64::MAX,
            fin: 0,
        };
        assert!(matches!(
            envelope.encode(64),
            Err(EnvelopeError::ValueTooLarge { field: "timestamp", .. })
        ));
    }
}
