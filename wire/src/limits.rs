//! Configurable limits for bounded decoding.

/// Wire-level limits for packet decoding.
///
/// Checked before any section body is parsed. Record, despawn and command
/// counts inside a body are bounded by `codec::CodecLimits` and the channel
/// configs.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Limits {
    /// Maximum packet size in bytes.
    pub max_packet_bytes: usize,

    /// Maximum number of sections in a packet.
    pub max_sections: usize,

    /// Maximum length of a single section body in bytes.
    pub max_section_len: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_packet_bytes: 64 * 1024,
            // A snapshot carries despawns, ghosts and time sync.
            max_sections: 8,
            max_section_len: 32 * 1024,
        }
    }
}

impl Limits {
    /// Small limits that keep test packets near real MTU sizes.
    #[must_use]
    pub const fn for_testing() -> Self {
        Self {
            max_packet_bytes: 4096,
            max_sections: 4,
            max_section_len: 2048,
        }
    }

    /// No limits. Only for trusted local captures.
    #[must_use]
    pub const fn unlimited() -> Self {
        Self {
            max_packet_bytes: usize::MAX,
            max_sections: usize::MAX,
            max_section_len: usize::MAX,
        }
    }
}
