//! Core identifiers shared by the server and client.

use std::fmt;

/// A wrapping 32-bit simulation tick with an explicit invalid sentinel.
///
/// Ordering between ticks goes through [`NetworkTick::ticks_since`], which is
/// the signed wrap-aware distance. Raw comparison of tick values is never
/// meaningful once the counter wraps.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NetworkTick {
    value: u32,
    valid: bool,
}

impl NetworkTick {
    /// The invalid tick.
    pub const INVALID: Self = Self {
        value: 0,
        valid: false,
    };

    #[must_use]
    pub const fn new(value: u32) -> Self {
        Self { value, valid: true }
    }

    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.valid
    }

    /// Raw tick value; zero for the invalid tick.
    #[must_use]
    pub const fn value(self) -> u32 {
        self.value
    }

    /// Advances by one tick, wrapping. The invalid tick stays invalid.
    pub fn increment(&mut self) {
        if self.valid {
            self.value = self.value.wrapping_add(1);
        }
    }

    #[must_use]
    pub const fn add(self, ticks: u32) -> Self {
        if self.valid {
            Self::new(self.value.wrapping_add(ticks))
        } else {
            self
        }
    }

    #[must_use]
    pub const fn subtract(self, ticks: u32) -> Self {
        if self.valid {
            Self::new(self.value.wrapping_sub(ticks))
        } else {
            self
        }
    }

    /// Signed distance from `older` to `self`. Positive when `self` is newer.
    ///
    /// Both ticks must be valid; an invalid operand yields zero.
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub const fn ticks_since(self, older: Self) -> i32 {
        if !self.valid || !older.valid {
            return 0;
        }
        self.value.wrapping_sub(older.value) as i32
    }

    /// `true` if both ticks are valid and `self` is strictly newer.
    #[must_use]
    pub const fn is_newer_than(self, other: Self) -> bool {
        self.valid && other.valid && self.ticks_since(other) > 0
    }

    /// The newer of two ticks, treating invalid ticks as oldest.
    #[must_use]
    pub const fn newest(self, other: Self) -> Self {
        if !other.valid || (self.valid && !other.is_newer_than(self)) {
            self
        } else {
            other
        }
    }
}

impl Default for NetworkTick {
    fn default() -> Self {
        Self::INVALID
    }
}

impl fmt::Debug for NetworkTick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.valid {
            write!(f, "NetworkTick({})", self.value)
        } else {
            write!(f, "NetworkTick(invalid)")
        }
    }
}

impl fmt::Display for NetworkTick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.valid {
            write!(f, "{}", self.value)
        } else {
            write!(f, "invalid")
        }
    }
}

/// Server-assigned identifier of an active ghost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GhostId(u32);

impl GhostId {
    /// Set on ids derived from scene content rather than spawn order.
    pub const PRESPAWN_BIT: u32 = 0x8000_0000;

    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    #[must_use]
    pub const fn is_prespawn(self) -> bool {
        self.0 & Self::PRESPAWN_BIT != 0
    }
}

impl fmt::Display for GhostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_prespawn() {
            write!(f, "prespawn#{}", self.0 & !Self::PRESPAWN_BIT)
        } else {
            write!(f, "#{}", self.0)
        }
    }
}

/// Stable wire form of an entity reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GhostRef {
    pub ghost_id: GhostId,
    pub spawn_tick: NetworkTick,
}

impl GhostRef {
    #[must_use]
    pub const fn new(ghost_id: GhostId, spawn_tick: NetworkTick) -> Self {
        Self {
            ghost_id,
            spawn_tick,
        }
    }
}

/// Connection handle shared by the server and the channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ConnectionId(pub u32);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn{}", self.0)
    }
}
