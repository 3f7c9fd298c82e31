//! Per-connection ghost relevancy.

use std::collections::HashSet;

use codec::{ConnectionId, GhostId};

/// How the relevancy set is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RelevancyMode {
    /// Every ghost is relevant to every connection.
    #[default]
    Disabled,
    /// Only listed pairs are relevant.
    AllowList,
    /// Listed pairs are irrelevant; everything else is relevant.
    DenyList,
}

/// The relevancy filter: a mode tag carrying its `(connection, ghost)` set.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Relevancy {
    #[default]
    Disabled,
    AllowList(HashSet<(ConnectionId, GhostId)>),
    DenyList(HashSet<(ConnectionId, GhostId)>),
}

impl Relevancy {
    #[must_use]
    pub const fn mode(&self) -> RelevancyMode {
        match self {
            Self::Disabled => RelevancyMode::Disabled,
            Self::AllowList(_) => RelevancyMode::AllowList,
            Self::DenyList(_) => RelevancyMode::DenyList,
        }
    }

    /// Switches mode. The set is always cleared, even when the mode is
    /// unchanged.
    pub fn set_mode(&mut self, mode: RelevancyMode) {
        log::debug!("relevancy mode {:?} -> {mode:?}", self.mode());
        *self = match mode {
            RelevancyMode::Disabled => Self::Disabled,
            RelevancyMode::AllowList => Self::AllowList(HashSet::new()),
            RelevancyMode::DenyList => Self::DenyList(HashSet::new()),
        };
    }

    /// Adds a pair. Ignored while disabled.
    pub fn insert(&mut self, connection: ConnectionId, ghost: GhostId) -> bool {
        let inserted = self
            .set_mut()
            .is_some_and(|set| set.insert((connection, ghost)));
        if inserted {
            log::debug!("relevancy insert {connection} {ghost}");
        }
        inserted
    }

    pub fn remove(&mut self, connection: ConnectionId, ghost: GhostId) -> bool {
        let removed = self
            .set_mut()
            .is_some_and(|set| set.remove(&(connection, ghost)));
        if removed {
            log::debug!("relevancy remove {connection} {ghost}");
        }
        removed
    }

    #[must_use]
    pub fn contains(&self, connection: ConnectionId, ghost: GhostId) -> bool {
        self.set().is_some_and(|set| set.contains(&(connection, ghost)))
    }

    pub fn clear(&mut self) {
        if let Some(set) = self.set_mut() {
            set.clear();
        }
    }

    /// Drops every pair of one connection.
    pub fn clear_connection(&mut self, connection: ConnectionId) {
        if let Some(set) = self.set_mut() {
            set.retain(|(c, _)| *c != connection);
        }
    }

    /// Drops every pair naming `ghost`.
    pub fn clear_ghost(&mut self, ghost: GhostId) {
        if let Some(set) = self.set_mut() {
            set.retain(|(_, g)| *g != ghost);
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.set().map_or(0, HashSet::len)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `ghost` should be sent to `connection`.
    #[must_use]
    pub fn is_relevant(&self, connection: ConnectionId, ghost: GhostId) -> bool {
        match self {
            Self::Disabled => true,
            Self::AllowList(set) => set.contains(&(connection, ghost)),
            Self::DenyList(set) => !set.contains(&(connection, ghost)),
        }
    }

    const fn set(&self) -> Option<&HashSet<(ConnectionId, GhostId)>> {
        match self {
            Self::Disabled => None,
            Self::AllowList(set) | Self::DenyList(set) => Some(set),
        }
    }

    fn set_mut(&mut self) -> Option<&mut HashSet<(ConnectionId, GhostId)>> {
        match self {
            Self::Disabled => None,
            Self::AllowList(set) | Self::DenyList(set) => Some(set),
        }
    }
}
