//! Input commands and reliable rpcs for ghostline.
//!
//! Commands travel client to server every tick, repeated across packets so
//! that losing one packet never loses an input. Rpcs travel either way on a
//! reliable ordered channel per connection.
//!
//! # Features
//!
//! - Tick-keyed command ring with exact lookup and fallback to the newest
//!   earlier frame
//! - Command packets carrying the snapshot ack and the newest frames
//! - Server-side arrival accounting (duplicates, late, discarded)
//! - Rpc registry with stable name-ordered ids and a compatibility hash
//! - Reliable ordered rpc channels with cumulative acks and resend
//! - Broadcast or targeted rpc sends and a short-lived inbox
//!
//! # Design Principles
//!
//! - **Untrusted input** - Packets are decoded fully before any state changes.
//! - **No panics on lifecycle races** - Sends to closing connections fail
//!   with an error.

mod channel;
mod command;
mod config;
mod error;
mod hub;
mod inbox;
mod rpc;
mod sequence;

pub use channel::{RpcChannel, RpcChannelStats};
pub use command::{
    decode_commands, encode_commands, AddOutcome, AutoCommandTarget, Command, CommandBuffer,
    CommandPacket, CommandReceiver, CommandStats, DEFAULT_COMMAND_BUFFER_CAPACITY,
    DEFAULT_COMMAND_REDUNDANCY,
};
pub use config::{CommandConfig, RpcConfig};
pub use error::{CommandError, CommandResult, RpcError, RpcResult};
pub use hub::{RpcHub, RpcTarget};
pub use inbox::{ReceivedRpc, RpcInbox};
pub use rpc::{RawRpc, Rpc, RpcKind, RpcRegistry, RpcRegistryBuilder};
pub use sequence::{sequence_greater_than, sequence_less_than, wrapping_diff};
