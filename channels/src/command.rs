//! Input command buffers and redundant command packets.
//!
//! The client stores one command per predicted tick and sends the newest few
//! frames in every packet, so a single lost packet never loses an input. The
//! server files arriving frames by tick and hands the simulation exactly the
//! frame for the tick it is processing.

use std::fmt;
use std::num::NonZeroUsize;

use bitstream::{BitReader, BitResult, BitWriter};
use codec::{ConnectionId, NetworkTick, SnapshotAck, WireLimits};
use log::{debug, error, trace};
use schema::Representation;
use wire::{
    decode_packet, section_encoded_len, PacketFlags, PacketWriter, SectionTag, HEADER_SIZE,
};

use crate::config::CommandConfig;
use crate::error::{CommandError, CommandResult};

/// Default number of frames a [`CommandBuffer`] holds.
pub const DEFAULT_COMMAND_BUFFER_CAPACITY: usize = 64;

/// Default number of frames repeated in every command packet.
pub const DEFAULT_COMMAND_REDUNDANCY: usize = 4;

/// An input command that can travel in a command packet.
pub trait Command: Clone + fmt::Debug + Send + 'static {
    fn write(&self, writer: &mut BitWriter) -> BitResult<()>;

    fn read(reader: &mut BitReader<'_>) -> BitResult<Self>;
}

/// Result of [`CommandBuffer::add`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Inserted,
    /// A frame for the same tick was overwritten.
    Replaced,
    /// The tick is older than everything the buffer can hold.
    TooOld,
    InvalidTick,
}

/// Fixed-capacity ring of commands keyed by tick.
#[derive(Debug, Clone)]
pub struct CommandBuffer<T> {
    slots: Vec<Option<(NetworkTick, T)>>,
    latest: NetworkTick,
    len: usize,
}

impl<T> CommandBuffer<T> {
    #[must_use]
    pub fn new(capacity: NonZeroUsize) -> Self {
        let mut slots = Vec::with_capacity(capacity.get());
        slots.resize_with(capacity.get(), || None);
        Self {
            slots,
            latest: NetworkTick::INVALID,
            len: 0,
        }
    }

    #[must_use]
    pub fn with_default_capacity() -> Self {
        Self::new(NonZeroUsize::new(DEFAULT_COMMAND_BUFFER_CAPACITY).unwrap_or(NonZeroUsize::MIN))
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Newest tick ever stored.
    #[must_use]
    pub const fn latest_tick(&self) -> NetworkTick {
        self.latest
    }

    fn slot(&self, tick: NetworkTick) -> usize {
        tick.value() as usize % self.slots.len()
    }

    /// Stores `command` for `tick`, overwriting whatever older frame shared
    /// its slot.
    pub fn add(&mut self, tick: NetworkTick, command: T) -> AddOutcome {
        if !tick.is_valid() {
            return AddOutcome::InvalidTick;
        }
        if self.latest.is_valid() {
            let age = self.latest.ticks_since(tick);
            if age >= 0 && age.unsigned_abs() as usize >= self.slots.len() {
                return AddOutcome::TooOld;
            }
        }
        if !self.latest.is_valid() || tick.is_newer_than(self.latest) {
            self.latest = tick;
        }
        let index = self.slot(tick);
        let outcome = match &self.slots[index] {
            Some((stored, _)) if *stored == tick => AddOutcome::Replaced,
            Some(_) => AddOutcome::Inserted,
            None => {
                self.len += 1;
                AddOutcome::Inserted
            }
        };
        self.slots[index] = Some((tick, command));
        outcome
    }

    /// The frame stored for exactly `tick`; a neighbouring tick never answers.
    #[must_use]
    pub fn get_data_at_tick(&self, tick: NetworkTick) -> Option<&T> {
        if !tick.is_valid() {
            return None;
        }
        match &self.slots[self.slot(tick)] {
            Some((stored, command)) if *stored == tick => Some(command),
            _ => None,
        }
    }

    #[must_use]
    pub fn contains(&self, tick: NetworkTick) -> bool {
        self.get_data_at_tick(tick).is_some()
    }

    /// The newest frame at or before `tick`, for prediction when the exact
    /// frame is missing.
    #[must_use]
    pub fn latest_at_or_before(&self, tick: NetworkTick) -> Option<(NetworkTick, &T)> {
        self.slots
            .iter()
            .flatten()
            .filter(|(stored, _)| tick.ticks_since(*stored) >= 0 && tick.is_valid())
            .min_by_key(|(stored, _)| tick.ticks_since(*stored))
            .map(|(stored, command)| (*stored, command))
    }

    /// Up to `count` frames walking back from the newest tick, newest first.
    #[must_use]
    pub fn newest(&self, count: usize) -> Vec<(NetworkTick, &T)> {
        if !self.latest.is_valid() {
            return Vec::new();
        }
        (0..self.slots.len())
            .filter_map(|back| {
                let tick = self.latest.subtract(u32::try_from(back).ok()?);
                self.get_data_at_tick(tick).map(|command| (tick, command))
            })
            .take(count)
            .collect()
    }

    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            *slot = None;
        }
        self.latest = NetworkTick::INVALID;
        self.len = 0;
    }
}

/// A decoded command packet.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandPacket<T> {
    /// Tick of the newest frame the client had when sending.
    pub tick: NetworkTick,
    pub ack: Option<SnapshotAck>,
    /// Newest first.
    pub frames: Vec<(NetworkTick, T)>,
}

/// Encodes the newest frames of `buffer` together with the snapshot ack.
///
/// Commands larger than `max_command_bytes` are dropped with an error log;
/// the rest of the packet still goes out so the ack is never held back.
pub fn encode_commands<T: Command>(
    buffer: &CommandBuffer<T>,
    ack: &SnapshotAck,
    schema_hash: u64,
    config: &CommandConfig,
) -> CommandResult<Vec<u8>> {
    let ack_body = ack.encode();
    let fixed = HEADER_SIZE + section_encoded_len(ack_body.len())?;

    let mut encoded: Vec<(NetworkTick, Vec<u8>)> = Vec::new();
    let mut frames_len = 0usize;
    for (tick, command) in buffer.newest(config.redundancy) {
        let mut writer = BitWriter::new();
        command.write(&mut writer)?;
        let payload = writer.finish();
        if payload.len() > config.max_command_bytes {
            error!(
                "dropping command for tick {tick}: {} bytes exceeds {} bytes",
                payload.len(),
                config.max_command_bytes
            );
            continue;
        }
        // tick + length prefix + payload
        let frame_len = 4 + varu32_len(payload.len()) + payload.len();
        let body_len = 1 + frames_len + frame_len;
        if fixed + section_encoded_len(body_len)? > config.max_packet_bytes {
            debug!("command packet budget reached after {} frames", encoded.len());
            break;
        }
        frames_len += frame_len;
        encoded.push((tick, payload));
    }

    let mut body = BitWriter::with_capacity(1 + frames_len);
    body.write_varu32(u32::try_from(encoded.len()).unwrap_or(u32::MAX))?;
    for (tick, payload) in &encoded {
        body.write_u32_aligned(tick.value())?;
        body.write_varu32(u32::try_from(payload.len()).unwrap_or(u32::MAX))?;
        body.write_bytes_aligned(payload)?;
    }

    let tick = buffer.latest_tick().value();
    let mut packet = PacketWriter::new(PacketFlags::command(), schema_hash, tick);
    packet.push_section(SectionTag::SnapshotAck, &ack_body)?;
    packet.push_section(SectionTag::Commands, &body.finish())?;
    Ok(packet.finish(config.max_packet_bytes)?)
}

fn varu32_len(value: usize) -> usize {
    let mut len = 1;
    let mut rest = value >> 7;
    while rest != 0 {
        len += 1;
        rest >>= 7;
    }
    len
}

/// Decodes a command packet. Nothing is returned unless the whole packet is
/// valid.
pub fn decode_commands<T: Command>(
    bytes: &[u8],
    schema_hash: u64,
    limits: &WireLimits,
    max_frames: usize,
) -> CommandResult<CommandPacket<T>> {
    let packet = decode_packet(bytes, limits)?;
    let header = packet.header;
    if !header.flags.is_command() {
        return Err(CommandError::NotCommandPacket {
            flags: header.flags.raw(),
        });
    }
    if header.schema_hash != schema_hash {
        return Err(CommandError::ProtocolMismatch {
            expected: schema_hash,
            found: header.schema_hash,
        });
    }

    let ack = packet
        .section(SectionTag::SnapshotAck)
        .map(SnapshotAck::decode)
        .transpose()?;

    let mut frames = Vec::new();
    if let Some(body) = packet.section(SectionTag::Commands) {
        let mut reader = BitReader::new(body);
        let count = reader.read_varu32()? as usize;
        if count > max_frames {
            return Err(CommandError::TooManyFrames {
                count,
                limit: max_frames,
            });
        }
        for _ in 0..count {
            let tick = NetworkTick::new(reader.read_u32_aligned()?);
            let len = reader.read_varu32()? as usize;
            let payload = reader.read_bytes_aligned(len)?;
            let command = T::read(&mut BitReader::new(payload))?;
            frames.push((tick, command));
        }
        if !reader.is_empty() {
            return Err(CommandError::TrailingData {
                remaining_bits: reader.bits_remaining(),
            });
        }
    }

    Ok(CommandPacket {
        tick: NetworkTick::new(header.tick),
        ack,
        frames,
    })
}

/// Arrival accounting of a [`CommandReceiver`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CommandStats {
    /// Frames stored for the first time.
    pub arrivals: u64,
    /// Redundant resends of a frame already stored.
    pub duplicates: u64,
    /// First arrivals for a tick the simulation already processed.
    pub late: u64,
    /// Frames older than the retained window.
    pub discarded: u64,
}

/// Server-side store of one connection's commands.
#[derive(Debug, Clone)]
pub struct CommandReceiver<T> {
    buffer: CommandBuffer<T>,
    processed: NetworkTick,
    stats: CommandStats,
}

impl<T: Command> CommandReceiver<T> {
    #[must_use]
    pub fn new(config: &CommandConfig) -> Self {
        Self {
            buffer: CommandBuffer::new(config.capacity),
            processed: NetworkTick::INVALID,
            stats: CommandStats::default(),
        }
    }

    /// Files every frame of a decoded packet.
    pub fn receive(&mut self, packet: CommandPacket<T>) {
        for (tick, command) in packet.frames {
            self.receive_frame(tick, command);
        }
    }

    pub fn receive_frame(&mut self, tick: NetworkTick, command: T) {
        if self.buffer.contains(tick) {
            self.stats.duplicates += 1;
            return;
        }
        if self.processed.is_valid() && !tick.is_newer_than(self.processed) {
            trace!("late command for tick {tick}, processed {}", self.processed);
            self.stats.late += 1;
            return;
        }
        match self.buffer.add(tick, command) {
            AddOutcome::Inserted | AddOutcome::Replaced => self.stats.arrivals += 1,
            AddOutcome::TooOld | AddOutcome::InvalidTick => self.stats.discarded += 1,
        }
    }

    /// The command for the tick being simulated. Marks the tick processed.
    pub fn command_for_tick(&mut self, tick: NetworkTick) -> Option<&T> {
        if tick.is_valid() && (!self.processed.is_valid() || tick.is_newer_than(self.processed)) {
            self.processed = tick;
        }
        self.buffer.get_data_at_tick(tick)
    }

    #[must_use]
    pub fn get_data_at_tick(&self, tick: NetworkTick) -> Option<&T> {
        self.buffer.get_data_at_tick(tick)
    }

    #[must_use]
    pub fn latest_at_or_before(&self, tick: NetworkTick) -> Option<(NetworkTick, &T)> {
        self.buffer.latest_at_or_before(tick)
    }

    #[must_use]
    pub const fn last_processed(&self) -> NetworkTick {
        self.processed
    }

    #[must_use]
    pub const fn stats(&self) -> CommandStats {
        self.stats
    }

    #[must_use]
    pub const fn buffer(&self) -> &CommandBuffer<T> {
        &self.buffer
    }
}

/// Decides whether a ghost's commands are sourced automatically for a
/// connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AutoCommandTarget {
    pub enabled: bool,
}

impl AutoCommandTarget {
    /// Enabled, owned by `connection`, and predicted there.
    #[must_use]
    pub fn is_sourced(
        self,
        connection: ConnectionId,
        owner: Option<ConnectionId>,
        representation: Representation,
    ) -> bool {
        self.enabled
            && owner == Some(connection)
            && representation == Representation::Predicted
    }
}
