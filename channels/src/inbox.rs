//! Received rpcs waiting for the application.

use codec::{ConnectionId, NetworkTick};
use log::warn;

use crate::error::RpcResult;
use crate::rpc::{RawRpc, Rpc, RpcRegistry};

/// A decoded rpc with the connection that sent it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedRpc<R> {
    pub source: ConnectionId,
    /// Local tick the rpc arrived on.
    pub tick: NetworkTick,
    pub rpc: R,
}

#[derive(Debug, Clone)]
struct Entry {
    source: ConnectionId,
    tick: NetworkTick,
    raw: RawRpc,
}

/// Short-lived store of received rpcs.
///
/// Entries are meant to be taken on the tick they arrive or the next one.
/// [`RpcInbox::expire`] drops anything older with a warning.
#[derive(Debug, Clone)]
pub struct RpcInbox {
    entries: Vec<Entry>,
    stale_after_ticks: u32,
    expired: u64,
}

impl RpcInbox {
    #[must_use]
    pub const fn new(stale_after_ticks: u32) -> Self {
        Self {
            entries: Vec::new(),
            stale_after_ticks,
            expired: 0,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total entries dropped unconsumed.
    #[must_use]
    pub const fn expired(&self) -> u64 {
        self.expired
    }

    pub fn push(&mut self, source: ConnectionId, tick: NetworkTick, raw: RawRpc) {
        self.entries.push(Entry { source, tick, raw });
    }

    /// Removes and decodes every entry of type `R`, in arrival order.
    ///
    /// Entries that fail to decode are logged and dropped.
    pub fn take<R: Rpc>(&mut self, registry: &RpcRegistry) -> RpcResult<Vec<ReceivedRpc<R>>> {
        let kind = registry.kind_of::<R>()?;
        let mut taken = Vec::new();
        let mut kept = Vec::with_capacity(self.entries.len());
        for entry in self.entries.drain(..) {
            if entry.raw.kind != kind {
                kept.push(entry);
                continue;
            }
            match registry.decode::<R>(&entry.raw) {
                Ok(Some(rpc)) => taken.push(ReceivedRpc {
                    source: entry.source,
                    tick: entry.tick,
                    rpc,
                }),
                Ok(None) => {}
                Err(err) => warn!("dropping malformed rpc `{}` from {}: {err}", R::NAME, entry.source),
            }
        }
        self.entries = kept;
        Ok(taken)
    }

    /// Drops entries that arrived more than `stale_after_ticks` before `now`.
    pub fn expire(&mut self, now: NetworkTick, registry: &RpcRegistry) -> usize {
        let limit = i64::from(self.stale_after_ticks);
        let before = self.entries.len();
        self.entries.retain(|entry| {
            let age = i64::from(now.ticks_since(entry.tick));
            if age > limit {
                warn!(
                    "dropping stale rpc `{}` from {}: unconsumed for {age} ticks",
                    registry.name(entry.raw.kind).unwrap_or("?"),
                    entry.source
                );
                false
            } else {
                true
            }
        });
        let dropped = before - self.entries.len();
        self.expired += dropped as u64;
        dropped
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::tests::{registry, Chat, Emote};

    #[test]
    fn take_removes_only_the_requested_type() {
        let registry = registry();
        let mut inbox = RpcInbox::new(1);
        let tick = NetworkTick::new(5);
        inbox.push(ConnectionId(1), tick, registry.encode(&Chat(1)).unwrap());
        inbox.push(ConnectionId(2), tick, registry.encode(&Emote(9)).unwrap());
        inbox.push(ConnectionId(3), tick, registry.encode(&Chat(2)).unwrap());

        let chats = inbox.take::<Chat>(&registry).unwrap();
        assert_eq!(chats.len(), 2);
        assert_eq!(chats[0].source, ConnectionId(1));
        assert_eq!(chats[1].rpc, Chat(2));
        assert_eq!(inbox.len(), 1);
    }

    #[test]
    fn unconsumed_entries_expire_after_the_following_tick() {
        let _ = env_logger::builder().is_test(true).try_init();
        let registry = registry();
        let mut inbox = RpcInbox::new(1);
        inbox.push(ConnectionId(1), NetworkTick::new(10), registry.encode(&Chat(1)).unwrap());
        assert_eq!(inbox.expire(NetworkTick::new(10), &registry), 0);
        assert_eq!(inbox.expire(NetworkTick::new(11), &registry), 0);
        assert_eq!(inbox.expire(NetworkTick::new(12), &registry), 1);
        assert!(inbox.is_empty());
        assert_eq!(inbox.expired(), 1);
    }

    #[test]
    fn malformed_payload_is_dropped() {
        let registry = registry();
        let mut inbox = RpcInbox::new(1);
        let kind = registry.kind_of::<Emote>().unwrap();
        inbox.push(
            ConnectionId(1),
            NetworkTick::new(0),
            RawRpc {
                kind,
                payload: Vec::new(),
            },
        );
        assert!(inbox.take::<Emote>(&registry).unwrap().is_empty());
        assert!(inbox.is_empty());
    }
}
