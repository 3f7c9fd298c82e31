//! Wire framing and packet layout for ghostline.
//!
//! This crate handles the binary wire format: packet headers, section framing,
//! and limit enforcement. It does not know about ghosts or commands, only the
//! structure of packets.
//!
//! # Packet layout
//!
//! ```text
//! magic u32 | version u16 | flags u16 | schema_hash u64 | tick u32 | payload_len u32
//! section*  = tag u8 | varu32 len | body
//! ```
//!
//! All multi-byte header fields are little-endian. Exactly one packet kind
//! flag (snapshot, command, rpc) is set, and each kind only carries its own
//! section tags.

mod error;
mod header;
mod limits;
mod packet;

pub use error::{DecodeError, EncodeError, LimitKind, SectionFramingError, WireResult};
pub use header::{PacketFlags, PacketHeader, HEADER_SIZE, MAGIC, VERSION};
pub use limits::Limits;
pub use packet::{
    decode_packet, decode_sections, encode_header, encode_section, section_encoded_len,
    PacketWriter, SectionTag, WirePacket, WireSection,
};
