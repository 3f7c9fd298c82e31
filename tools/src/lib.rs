//! Introspection and debugging tools for ghostline packets.
//!
//! This crate inspects captured packets without needing the registry that
//! produced them:
//!
//! - Decode the wire header and section framing
//! - Count records, despawns, command frames and rpc messages per section
//! - Compare schema descriptors dumped by two builds
//!
//! # Design Principles
//!
//! - **First-class tooling** - These tools are part of the product, not afterthoughts.
//! - **Human-readable output** - Make it easy to understand what the codec is doing.

use anyhow::{bail, Context, Result};
use bitstream::BitReader;
use codec::SnapshotAck;
use schema::SchemaDescriptor;
use serde::Serialize;
use wire::{decode_packet, Limits, PacketFlags, PacketHeader, SectionTag};

/// Header fields of an inspected packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HeaderReport {
    pub version: u16,
    pub flags: u16,
    pub kind: &'static str,
    pub schema_hash: u64,
    pub tick: u32,
    pub payload_len: u32,
}

impl From<PacketHeader> for HeaderReport {
    fn from(header: PacketHeader) -> Self {
        Self {
            version: header.version,
            flags: header.flags.raw(),
            kind: packet_kind(header.flags),
            schema_hash: header.schema_hash,
            tick: header.tick,
            payload_len: header.payload_len,
        }
    }
}

/// One section of an inspected packet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SectionReport {
    pub tag: String,
    pub byte_len: usize,
    /// Leading item count, when the section has one.
    pub items: Option<u32>,
}

/// Acknowledgement carried by a command packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AckReport {
    /// `None` when the client has not received a snapshot yet.
    pub latest: Option<u32>,
    pub received: u64,
    pub timestamp_ms: u32,
}

/// Structure and sizes of a single packet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InspectReport {
    pub header: HeaderReport,
    pub total_len: usize,
    pub sections: Vec<SectionReport>,
    pub ack: Option<AckReport>,
}

const fn packet_kind(flags: PacketFlags) -> &'static str {
    if flags.is_snapshot() {
        "snapshot"
    } else if flags.is_command() {
        "command"
    } else if flags.is_rpc() {
        "rpc"
    } else {
        "unknown"
    }
}

/// Decodes the framing of `bytes` and summarizes every section.
pub fn inspect_packet(bytes: &[u8], limits: &Limits) -> Result<InspectReport> {
    let packet = decode_packet(bytes, limits).context("decode wire packet")?;
    let mut ack = None;
    let mut sections = Vec::with_capacity(packet.sections.len());
    for section in &packet.sections {
        if section.tag == SectionTag::SnapshotAck {
            let decoded = SnapshotAck::decode(section.body).context("decode ack section")?;
            ack = Some(AckReport {
                latest: decoded.latest.is_valid().then_some(decoded.latest.value()),
                received: decoded.received,
                timestamp_ms: decoded.timestamp_ms,
            });
        }
        sections.push(SectionReport {
            tag: format!("{:?}", section.tag),
            byte_len: section.body.len(),
            items: section_items(section.tag, section.body)
                .with_context(|| format!("read {:?} section", section.tag))?,
        });
    }
    Ok(InspectReport {
        header: packet.header.into(),
        total_len: bytes.len(),
        sections,
        ack,
    })
}

fn section_items(tag: SectionTag, body: &[u8]) -> Result<Option<u32>> {
    let mut reader = BitReader::new(body);
    let count = match tag {
        SectionTag::GhostSnapshot | SectionTag::GhostDespawn | SectionTag::Commands => {
            reader.read_varu32()?
        }
        SectionTag::Rpc => {
            // Receiver ack precedes the message count.
            let _next_expected = reader.read_u16_aligned()?;
            reader.read_varu32()?
        }
        _ => return Ok(None),
    };
    Ok(Some(count))
}

/// Renders a report the way the `inspect` command prints it.
#[must_use]
pub fn format_report(report: &InspectReport) -> String {
    let header = report.header;
    let mut out = format!(
        "version: {} flags: 0x{:04x} ({}) schema_hash: 0x{:016x}\n",
        header.version, header.flags, header.kind, header.schema_hash
    );
    out.push_str(&format!(
        "tick: {} payload_len: {} bytes total: {} bytes\n",
        header.tick, header.payload_len, report.total_len
    ));
    out.push_str("sections:\n");
    for section in &report.sections {
        let count = section
            .items
            .map_or_else(|| "count n/a".to_owned(), |n| format!("{n} items"));
        out.push_str(&format!(
            "  {}: {count} ({} bytes)\n",
            section.tag, section.byte_len
        ));
    }
    if let Some(ack) = report.ack {
        let latest = ack
            .latest
            .map_or_else(|| "none".to_owned(), |tick| tick.to_string());
        out.push_str(&format!(
            "ack: latest {latest} mask 0x{:016x} at {} ms\n",
            ack.received, ack.timestamp_ms
        ));
    }
    out
}

/// Parses a descriptor dumped with `serde_json`.
pub fn parse_descriptor(json: &str) -> Result<SchemaDescriptor> {
    serde_json::from_str(json).context("parse descriptor json")
}

/// Fails with the first mismatch when `found` differs from `expected`.
pub fn check_descriptors(found: &SchemaDescriptor, expected: &SchemaDescriptor) -> Result<()> {
    if let Err(mismatch) = found.check(expected) {
        bail!("descriptors differ: {mismatch}");
    }
    Ok(())
}
