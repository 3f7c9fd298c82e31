//! Packet decoding and section framing.

use crate::error::{DecodeError, EncodeError, LimitKind, SectionFramingError, WireResult};
use crate::header::{PacketFlags, PacketHeader, HEADER_SIZE, MAGIC, VERSION};
use crate::limits::Limits;

/// Section tags for version 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
#[repr(u8)]
pub enum SectionTag {
    /// Bit-packed ghost records.
    GhostSnapshot = 1,
    /// Ghost ids removed from the receiver's view.
    GhostDespawn = 2,
    /// Timestamp echo for round-trip estimation.
    TimeSync = 3,
    /// Client acknowledgement of received snapshot ticks.
    SnapshotAck = 4,
    /// Redundant input command frames.
    Commands = 5,
    /// Sequenced reliable RPC messages.
    Rpc = 6,
}

impl SectionTag {
    /// Parses a section tag from a raw byte.
    pub fn parse(tag: u8) -> Result<Self, DecodeError> {
        match tag {
            1 => Ok(Self::GhostSnapshot),
            2 => Ok(Self::GhostDespawn),
            3 => Ok(Self::TimeSync),
            4 => Ok(Self::SnapshotAck),
            5 => Ok(Self::Commands),
            6 => Ok(Self::Rpc),
            _ => Err(DecodeError::UnknownSectionTag { tag }),
        }
    }

    /// Returns `true` if a packet with `flags` may carry this section.
    #[must_use]
    pub const fn allowed_in(self, flags: PacketFlags) -> bool {
        match self {
            Self::GhostSnapshot | Self::GhostDespawn | Self::TimeSync => flags.is_snapshot(),
            Self::SnapshotAck | Self::Commands => flags.is_command(),
            Self::Rpc => flags.is_rpc(),
        }
    }
}

/// A section within a wire packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireSection<'a> {
    pub tag: SectionTag,
    pub body: &'a [u8],
}

/// A decoded wire packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WirePacket<'a> {
    pub header: PacketHeader,
    pub sections: Vec<WireSection<'a>>,
}

impl<'a> WirePacket<'a> {
    /// Returns the body of the first section with `tag`.
    #[must_use]
    pub fn section(&self, tag: SectionTag) -> Option<&'a [u8]> {
        self.sections.iter().find(|s| s.tag == tag).map(|s| s.body)
    }
}

/// Decodes a wire packet into header + section slices.
pub fn decode_packet<'a>(buf: &'a [u8], limits: &Limits) -> WireResult<WirePacket<'a>> {
    if buf.len() < HEADER_SIZE {
        return Err(DecodeError::PacketTooSmall {
            actual: buf.len(),
            required: HEADER_SIZE,
        });
    }
    if buf.len() > limits.max_packet_bytes {
        return Err(DecodeError::LimitsExceeded {
            kind: LimitKind::PacketBytes,
            limit: limits.max_packet_bytes,
            actual: buf.len(),
        });
    }

    let magic = u32::from_le_bytes(le_array(buf, 0));
    if magic != MAGIC {
        return Err(DecodeError::InvalidMagic { found: magic });
    }

    let version = u16::from_le_bytes(le_array(buf, 4));
    if version != VERSION {
        return Err(DecodeError::UnsupportedVersion { found: version });
    }

    let flags_raw = u16::from_le_bytes(le_array(buf, 6));
    let flags = PacketFlags::from_raw(flags_raw);
    if !flags.is_valid() {
        return Err(DecodeError::InvalidFlags { flags: flags_raw });
    }

    let schema_hash = u64::from_le_bytes(le_array(buf, 8));
    let tick = u32::from_le_bytes(le_array(buf, 16));
    let payload_len = u32::from_le_bytes(le_array(buf, 20));

    let actual_payload_len = buf.len() - HEADER_SIZE;
    if payload_len as usize != actual_payload_len {
        return Err(DecodeError::PayloadLengthMismatch {
            header_len: payload_len,
            actual_len: actual_payload_len,
        });
    }

    let header = PacketHeader {
        version,
        flags,
        schema_hash,
        tick,
        payload_len,
    };

    let sections = decode_sections(&buf[HEADER_SIZE..], limits)?;
    if let Some(bad) = sections.iter().find(|s| !s.tag.allowed_in(flags)) {
        return Err(DecodeError::UnexpectedSection {
            tag: bad.tag,
            flags: flags_raw,
        });
    }

    Ok(WirePacket { header, sections })
}

/// Decodes sections from a payload buffer (no packet header).
pub fn decode_sections<'a>(payload: &'a [u8], limits: &Limits) -> WireResult<Vec<WireSection<'a>>> {
    let mut offset = 0usize;
    let mut sections = Vec::new();

    while offset < payload.len() {
        if sections.len() >= limits.max_sections {
            return Err(DecodeError::LimitsExceeded {
                kind: LimitKind::SectionCount,
                limit: limits.max_sections,
                actual: sections.len() + 1,
            });
        }

        let tag = payload[offset];
        offset += 1;
        let (len, new_offset) = read_varu32(payload, offset)?;
        offset = new_offset;
        let len_usize = len as usize;

        if len_usize > limits.max_section_len {
            return Err(DecodeError::LimitsExceeded {
                kind: LimitKind::SectionLength,
                limit: limits.max_section_len,
                actual: len_usize,
            });
        }
        if offset + len_usize > payload.len() {
            return Err(SectionFramingError::Truncated {
                needed: offset + len_usize,
                available: payload.len(),
            }
            .into());
        }

        let tag = SectionTag::parse(tag)?;
        let body = &payload[offset..offset + len_usize];
        sections.push(WireSection { tag, body });
        offset += len_usize;
    }

    Ok(sections)
}

/// Encodes a packet header into the provided output buffer.
pub fn encode_header(header: &PacketHeader, out: &mut [u8]) -> Result<usize, EncodeError> {
    if out.len() < HEADER_SIZE {
        return Err(EncodeError::BufferTooSmall {
            needed: HEADER_SIZE,
            available: out.len(),
        });
    }

    out[0..4].copy_from_slice(&MAGIC.to_le_bytes());
    out[4..6].copy_from_slice(&header.version.to_le_bytes());
    out[6..8].copy_from_slice(&header.flags.raw().to_le_bytes());
    out[8..16].copy_from_slice(&header.schema_hash.to_le_bytes());
    out[16..20].copy_from_slice(&header.tick.to_le_bytes());
    out[20..24].copy_from_slice(&header.payload_len.to_le_bytes());

    Ok(HEADER_SIZE)
}

/// Encodes a single section into the provided output buffer.
pub fn encode_section(tag: SectionTag, body: &[u8], out: &mut [u8]) -> Result<usize, EncodeError> {
    let needed = section_encoded_len(body.len())?;
    if out.len() < needed {
        return Err(EncodeError::BufferTooSmall {
            needed,
            available: out.len(),
        });
    }

    out[0] = tag as u8;
    let mut offset = 1;
    offset += write_varu32(body.len() as u32, &mut out[offset..]);
    out[offset..offset + body.len()].copy_from_slice(body);
    Ok(needed)
}

/// Bytes a section with a `body_len` body occupies on the wire.
pub fn section_encoded_len(body_len: usize) -> Result<usize, EncodeError> {
    let len_u32 =
        u32::try_from(body_len).map_err(|_| EncodeError::LengthOverflow { length: body_len })?;
    Ok(1 + varu32_len(len_u32) + body_len)
}

/// Accumulates sections and produces a framed packet.
#[derive(Debug, Clone)]
pub struct PacketWriter {
    flags: PacketFlags,
    schema_hash: u64,
    tick: u32,
    payload: Vec<u8>,
}

impl PacketWriter {
    #[must_use]
    pub const fn new(flags: PacketFlags, schema_hash: u64, tick: u32) -> Self {
        Self {
            flags,
            schema_hash,
            tick,
            payload: Vec::new(),
        }
    }

    /// Total packet size if finished now.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// Appends a section. Empty bodies are still framed.
    pub fn push_section(&mut self, tag: SectionTag, body: &[u8]) -> Result<(), EncodeError> {
        let start = self.payload.len();
        let len = section_encoded_len(body.len())?;
        self.payload.resize(start + len, 0);
        encode_section(tag, body, &mut self.payload[start..])?;
        Ok(())
    }

    /// Produces the packet bytes, rejecting anything above `budget` bytes.
    pub fn finish(self, budget: usize) -> Result<Vec<u8>, EncodeError> {
        let size = self.encoded_len();
        if size > budget {
            return Err(EncodeError::PacketTooLarge { size, budget });
        }
        let payload_len = u32::try_from(self.payload.len()).map_err(|_| {
            EncodeError::LengthOverflow {
                length: self.payload.len(),
            }
        })?;
        let header = PacketHeader::new(self.flags, self.schema_hash, self.tick, payload_len);
        let mut out = vec![0u8; size];
        encode_header(&header, &mut out)?;
        out[HEADER_SIZE..].copy_from_slice(&self.payload);
        Ok(out)
    }
}

fn le_array<const N: usize>(buf: &[u8], offset: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&buf[offset..offset + N]);
    out
}

fn read_varu32(buf: &[u8], mut offset: usize) -> Result<(u32, usize), DecodeError> {
    let mut value = 0u32;
    let mut shift = 0u32;
    for _ in 0..5 {
        let Some(&byte) = buf.get(offset) else {
            return Err(SectionFramingError::Truncated {
                needed: offset + 1,
                available: buf.len(),
            }
            .into());
        };
        offset += 1;
        value |= u32::from(byte & 0x7F) << shift;
        if byte & 0x80 == 0 {
            return Ok((value, offset));
        }
        shift += 7;
    }
    Err(SectionFramingError::InvalidVarint.into())
}

fn write_varu32(mut value: u32, out: &mut [u8]) -> usize {
    let mut offset = 0;
    loop {
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        out[offset] = byte;
        offset += 1;
        if value == 0 {
            break;
        }
    }
    offset
}

const fn varu32_len(mut value: u32) -> usize {
    let mut len = 1;
    while value >= 0x80 {
        value >>= 7;
        len += 1;
    }
    len
}
