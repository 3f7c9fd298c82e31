//! Packet header types and constants.

/// Magic number identifying ghostline packets.
///
/// This value is fixed and must never change across versions.
pub const MAGIC: u32 = 0x4748_5354; // "GHST" in ASCII

/// Current wire format version.
pub const VERSION: u16 = 1;

/// Header size in bytes (24 total).
pub const HEADER_SIZE: usize = 4 + 2 + 2 + 8 + 4 + 4;

/// Packet kind flags. Exactly one kind bit is set on a valid packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PacketFlags(u16);

impl PacketFlags {
    /// Server to client ghost snapshot.
    pub const SNAPSHOT: u16 = 1 << 0;

    /// Client to server input commands plus snapshot ack.
    pub const COMMAND: u16 = 1 << 1;

    /// Reliable RPC traffic, either direction.
    pub const RPC: u16 = 1 << 2;

    /// Reserved bits mask (must be zero in version 1).
    const RESERVED_MASK: u16 = !0b111;

    /// Creates new flags from a raw value.
    #[must_use]
    pub const fn from_raw(raw: u16) -> Self {
        Self(raw)
    }

    /// Returns the raw flag bits.
    #[must_use]
    pub const fn raw(self) -> u16 {
        self.0
    }

    #[must_use]
    pub const fn is_snapshot(self) -> bool {
        self.0 & Self::SNAPSHOT != 0
    }

    #[must_use]
    pub const fn is_command(self) -> bool {
        self.0 & Self::COMMAND != 0
    }

    #[must_use]
    pub const fn is_rpc(self) -> bool {
        self.0 & Self::RPC != 0
    }

    /// Returns `true` if exactly one kind bit is set and no reserved bits are.
    #[must_use]
    pub const fn is_valid(self) -> bool {
        let kinds = self.0 & !Self::RESERVED_MASK;
        self.0 & Self::RESERVED_MASK == 0 && kinds.count_ones() == 1
    }

    #[must_use]
    pub const fn snapshot() -> Self {
        Self(Self::SNAPSHOT)
    }

    #[must_use]
    pub const fn command() -> Self {
        Self(Self::COMMAND)
    }

    #[must_use]
    pub const fn rpc() -> Self {
        Self(Self::RPC)
    }
}

/// Packet header (version 1).
///
/// This struct represents the header fields *after* the magic number.
/// The magic number is validated separately during decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Wire format version.
    pub version: u16,
    /// Packet kind flags.
    pub flags: PacketFlags,
    /// Registry hash for compatibility checking.
    pub schema_hash: u64,
    /// Server tick for snapshots, newest input tick for commands.
    pub tick: u32,
    /// Payload length in bytes.
    pub payload_len: u32,
}

impl PacketHeader {
    /// Creates a header with the current version.
    #[must_use]
    pub const fn new(flags: PacketFlags, schema_hash: u64, tick: u32, payload_len: u32) -> Self {
        Self {
            version: VERSION,
            flags,
            schema_hash,
            tick,
            payload_len,
        }
    }

    /// Creates a header for a snapshot packet.
    #[must_use]
    pub const fn snapshot(schema_hash: u64, tick: u32, payload_len: u32) -> Self {
        Self::new(PacketFlags::snapshot(), schema_hash, tick, payload_len)
    }

    /// Creates a header for a command packet.
    #[must_use]
    pub const fn command(schema_hash: u64, tick: u32, payload_len: u32) -> Self {
        Self::new(PacketFlags::command(), schema_hash, tick, payload_len)
    }

    /// Creates a header for an RPC packet.
    #[must_use]
    pub const fn rpc(schema_hash: u64, tick: u32, payload_len: u32) -> Self {
        Self::new(PacketFlags::rpc(), schema_hash, tick, payload_len)
    }
}
