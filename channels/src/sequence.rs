//! Wrap-aware comparisons of 16-bit RPC sequence numbers.

/// Half the sequence space. Distances beyond it are read as wrapped.
const HALF: u16 = u16::MAX / 2 + 1;

/// `true` if `s1` is newer than `s2`, accounting for wrap-around.
#[must_use]
pub const fn sequence_greater_than(s1: u16, s2: u16) -> bool {
    ((s1 > s2) && (s1 - s2 <= HALF)) || ((s1 < s2) && (s2 - s1 > HALF))
}

/// `true` if `s1` is older than `s2`, accounting for wrap-around.
#[must_use]
pub const fn sequence_less_than(s1: u16, s2: u16) -> bool {
    sequence_greater_than(s2, s1)
}

/// Signed distance from `a` to `b`; positive when `b` is newer.
#[must_use]
#[allow(clippy::cast_possible_wrap)]
pub const fn wrapping_diff(a: u16, b: u16) -> i16 {
    b.wrapping_sub(a) as i16
}
