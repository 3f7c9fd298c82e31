#![no_main]

use std::sync::Arc;

use bitstream::{BitReader, BitResult, BitWriter};
use channels::{decode_commands, Command, Rpc, RpcConfig, RpcHub, RpcRegistry};
use codec::{ConnectionId, NetworkTick};
use libfuzzer_sys::fuzz_target;
use wire::{PacketFlags, PacketWriter, SectionTag};

#[derive(Debug, Clone)]
struct Input(u32);

impl Command for Input {
    fn write(&self, writer: &mut BitWriter) -> BitResult<()> {
        writer.write_varu32(self.0)
    }

    fn read(reader: &mut BitReader<'_>) -> BitResult<Self> {
        Ok(Self(reader.read_varu32()?))
    }
}

struct Note(u32);

impl Rpc for Note {
    const NAME: &'static str = "note";

    fn write(&self, writer: &mut BitWriter) -> BitResult<()> {
        writer.write_varu32(self.0)
    }

    fn read(reader: &mut BitReader<'_>) -> BitResult<Self> {
        Ok(Self(reader.read_varu32()?))
    }
}

const PEER: ConnectionId = ConnectionId(1);

fuzz_target!(|data: &[u8]| {
    let limits = wire::Limits::for_testing();
    let Some((&split, rest)) = data.split_first() else {
        return;
    };
    let (command_body, rpc_body) = rest.split_at(usize::from(split).min(rest.len()));

    let mut writer = PacketWriter::new(PacketFlags::command(), 0, 1);
    if writer.push_section(SectionTag::Commands, command_body).is_ok() {
        if let Ok(bytes) = writer.finish(limits.max_packet_bytes) {
            let _ = decode_commands::<Input>(&bytes, 0, &limits, 8);
        }
    }

    let Ok(registry) = RpcRegistry::builder().register::<Note>().build() else {
        return;
    };
    let registry = Arc::new(registry);
    let mut hub = RpcHub::new(Arc::clone(&registry), RpcConfig::for_testing());
    hub.connect(PEER);
    let mut writer = PacketWriter::new(PacketFlags::rpc(), registry.hash(), 1);
    if writer.push_section(SectionTag::Rpc, rpc_body).is_ok() {
        if let Ok(bytes) = writer.finish(limits.max_packet_bytes) {
            let _ = hub.receive(PEER, &bytes, NetworkTick::new(1));
            let _ = hub.take::<Note>();
            let _ = hub.flush(NetworkTick::new(2));
        }
    }
});
