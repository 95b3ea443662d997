//! Sequence-number arithmetic on the 2^32 ring.
//!
//! Two sequence numbers are compared by the sign of their wrapping
//! difference, which is correct as long as they are less than 2^31 apart.
//! Every window is far smaller than that.

/// `a < b` in wrap-around space.
#[inline]
pub fn seq_lt(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) < 0
}

/// `a <= b` in wrap-around space.
#[inline]
pub fn seq_le(a: u32, b: u32) -> bool {
    a == b || seq_lt(a, b)
}

/// `a > b` in wrap-around space.
#[inline]
pub fn seq_gt(a: u32, b: u32) -> bool {
    seq_lt(b, a)
}

/// `start <= seq < start + len` in wrap-around space.
#[inline]
pub fn seq_in_range(seq: u32, start: u32, len: u32) -> bool {
    seq.wrapping_sub(start) < len
}
