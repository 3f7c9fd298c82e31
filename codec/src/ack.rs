//! Snapshot acknowledgements and the sliding received-tick window.

use bitstream::{BitReader, BitWriter, ChangeMask};

use crate::error::{CodecError, CodecResult};
use crate::types::NetworkTick;

/// Width of the received-tick window.
pub const ACK_WINDOW_BITS: usize = 64;

/// Sliding bitmask of received snapshot ticks.
///
/// Bit `i` means "tick `latest - i` was received".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckWindow {
    latest: NetworkTick,
    mask: ChangeMask,
}

impl Default for AckWindow {
    fn default() -> Self {
        Self::new()
    }
}

impl AckWindow {
    #[must_use]
    pub fn new() -> Self {
        Self {
            latest: NetworkTick::INVALID,
            mask: ChangeMask::new(ACK_WINDOW_BITS),
        }
    }

    /// Newest received tick.
    #[must_use]
    pub const fn latest(&self) -> NetworkTick {
        self.latest
    }

    /// Marks a single tick as received.
    pub fn record(&mut self, tick: NetworkTick) {
        self.merge(tick, 1);
    }

    /// Merges a remote acknowledgement: `bits` is relative to `latest`.
    pub fn merge(&mut self, latest: NetworkTick, bits: u64) {
        if !latest.is_valid() {
            return;
        }
        let offset = if !self.latest.is_valid() {
            self.latest = latest;
            0
        } else if latest.is_newer_than(self.latest) {
            self.mask.shift_up(latest.ticks_since(self.latest).unsigned_abs() as usize);
            self.latest = latest;
            0
        } else {
            self.latest.ticks_since(latest).unsigned_abs() as usize
        };
        for i in 0..ACK_WINDOW_BITS {
            if (bits >> i) & 1 == 1 && i + offset < ACK_WINDOW_BITS {
                // In range by the check above.
                let _ = self.mask.set(i + offset, true);
            }
        }
    }

    /// `true` if `tick` is inside the window and was received.
    #[must_use]
    pub fn contains(&self, tick: NetworkTick) -> bool {
        if !self.latest.is_valid() || !tick.is_valid() {
            return false;
        }
        let distance = self.latest.ticks_since(tick);
        usize::try_from(distance)
            .ok()
            .filter(|&d| d < ACK_WINDOW_BITS)
            .is_some_and(|d| self.mask.get(d).unwrap_or(false))
    }

    /// The window as a 64-bit mask relative to [`AckWindow::latest`].
    #[must_use]
    pub fn bits(&self) -> u64 {
        let words = self.mask.words();
        u64::from(words[0]) | u64::from(words[1]) << 32
    }

    /// Builds the acknowledgement a client sends back.
    #[must_use]
    pub fn to_ack(&self, timestamp_ms: u32) -> SnapshotAck {
        SnapshotAck {
            latest: self.latest,
            received: self.bits(),
            timestamp_ms,
        }
    }
}

/// Body of the `SnapshotAck` section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotAck {
    pub latest: NetworkTick,
    pub received: u64,
    /// Client clock, echoed back for round-trip estimation.
    pub timestamp_ms: u32,
}

impl SnapshotAck {
    /// Encoded size in bytes.
    pub const ENCODED_LEN: usize = 17;

    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut w = BitWriter::with_capacity(Self::ENCODED_LEN);
        // Aligned writes into a growable buffer cannot fail.
        let _ = w.write_u8_aligned(u8::from(self.latest.is_valid()));
        let _ = w.write_u32_aligned(self.latest.value());
        let _ = w.write_u64_aligned(self.received);
        let _ = w.write_u32_aligned(self.timestamp_ms);
        w.finish()
    }

    pub fn decode(body: &[u8]) -> CodecResult<Self> {
        let mut r = BitReader::new(body);
        let valid = r.read_u8_aligned()? != 0;
        let value = r.read_u32_aligned()?;
        let received = r.read_u64_aligned()?;
        let timestamp_ms = r.read_u32_aligned()?;
        if !r.is_empty() {
            return Err(CodecError::TrailingSectionData {
                section: wire::SectionTag::SnapshotAck,
                remaining_bits: r.bits_remaining(),
            });
        }
        Ok(Self {
            latest: if valid {
                NetworkTick::new(value)
            } else {
                NetworkTick::INVALID
            },
            received,
            timestamp_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(v: u32) -> NetworkTick {
        NetworkTick::new(v)
    }

    #[test]
    fn window_slides_with_newer_ticks() {
        let mut w = AckWindow::new();
        w.record(t(10));
        w.record(t(12));
        assert!(w.contains(t(10)));
        assert!(w.contains(t(12)));
        assert!(!w.contains(t(11)));
        assert_eq!(w.bits(), 0b101);

        w.record(t(11));
        assert_eq!(w.bits(), 0b111);
        assert_eq!(w.latest(), t(12));
    }

    #[test]
    fn old_ticks_fall_out_of_the_window() {
        let mut w = AckWindow::new();
        w.record(t(1));
        w.record(t(1 + ACK_WINDOW_BITS as u32));
        assert!(!w.contains(t(1)));
        w.record(t(0));
        assert!(!w.contains(t(0)));
    }

    #[test]
    fn merge_remote_ack() {
        let mut server = AckWindow::new();
        server.merge(t(100), 0b1011);
        assert!(server.contains(t(100)));
        assert!(server.contains(t(99)));
        assert!(!server.contains(t(98)));
        assert!(server.contains(t(97)));

        // A reordered older ack still contributes.
        server.merge(t(95), 0b1);
        assert!(server.contains(t(95)));
        assert_eq!(server.latest(), t(100));
    }

    #[test]
    fn ack_body_roundtrip() {
        let ack = SnapshotAck {
            latest: t(77),
            received: 0xF0F0,
            timestamp_ms: 1234,
        };
        let body = ack.encode();
        assert_eq!(body.len(), SnapshotAck::ENCODED_LEN);
        assert_eq!(SnapshotAck::decode(&body).unwrap(), ack);

        let mut long = body.clone();
        long.push(0);
        assert!(matches!(
            SnapshotAck::decode(&long),
            Err(CodecError::TrailingSectionData { .. })
        ));
        assert!(SnapshotAck::decode(&body[..4]).is_err());
    }

    #[test]
    fn empty_window_ack_is_invalid() {
        let ack = AckWindow::new().to_ack(5);
        let decoded = SnapshotAck::decode(&ack.encode()).unwrap();
        assert!(!decoded.latest.is_valid());
    }
}
