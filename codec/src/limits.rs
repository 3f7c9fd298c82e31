//! Limits for codec-level decoding.

/// Codec-specific limits enforced while decoding snapshot packets.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CodecLimits {
    /// Maximum number of top-level ghost records in one packet.
    pub max_ghosts_per_snapshot: usize,
    /// Maximum number of despawn notices in one packet.
    pub max_despawns_per_snapshot: usize,
    /// Maximum number of group children inside one record.
    pub max_children_per_ghost: usize,
}

impl Default for CodecLimits {
    fn default() -> Self {
        Self {
            max_ghosts_per_snapshot: 4096,
            max_despawns_per_snapshot: 4096,
            max_children_per_ghost: 64,
        }
    }
}

impl CodecLimits {
    /// Creates limits suitable for testing with smaller values.
    #[must_use]
    pub const fn for_testing() -> Self {
        Self {
            max_ghosts_per_snapshot: 64,
            max_despawns_per_snapshot: 64,
            max_children_per_ghost: 8,
        }
    }

    /// Creates limits with no restrictions (use with caution).
    #[must_use]
    pub const fn unlimited() -> Self {
        Self {
            max_ghosts_per_snapshot: usize::MAX,
            max_despawns_per_snapshot: usize::MAX,
            max_children_per_ghost: usize::MAX,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn testing_limits_smaller() {
        let test_limits = CodecLimits::for_testing();
        let default_limits = CodecLimits::default();
        assert!(test_limits.max_ghosts_per_snapshot < default_limits.max_ghosts_per_snapshot);
        assert!(test_limits.max_children_per_ghost < default_limits.max_children_per_ghost);
    }

    #[test]
    fn unlimited_limits() {
        let limits = CodecLimits::unlimited();
        assert_eq!(limits.max_ghosts_per_snapshot, usize::MAX);
        assert_eq!(limits.max_despawns_per_snapshot, usize::MAX);
    }
}
