/// Half of the 16-bit sequence space. Two sequence numbers at least this far
/// apart are assumed to have wrapped around.
pub const SEQUENCE_WRAP_THRESHOLD: u16 = 32768;

#[inline]
pub fn sequence_greater_than(s1: u16, s2: u16) -> bool {
    ((s1 > s2) && (s1 - s2 < SEQUENCE_WRAP_THRESHOLD))
        || ((s1 < s2) && (s2 - s1 >= SEQUENCE_WRAP_THRESHOLD))
}

#[inline]
pub fn sequence_less_than(s1: u16, s2: u16) -> bool {
    sequence_greater_than(s2, s1)
}
