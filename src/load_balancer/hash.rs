//! Client-identity hashing for deterministic backend assignment.

/// 32-bit rolling hash over UTF-16 code units.
///
/// `hash = hash * 31 + unit`, wrapped to a signed 32-bit integer at every
/// step, then the absolute value. `i32::MIN` maps to `2^31`.
pub fn rolling_hash(input: &str) -> u32 {
    input
        .encode_utf16()
        .fold(0i32, |hash, unit| hash.wrapping_mul(31).wrapping_add(i32::from(unit)))
        .unsigned_abs()
}

/// Index into a pool of `len` backends for `identity`. `len` must be non-zero.
pub fn bucket(identity: &str, len: usize) -> usize {
    rolling_hash(identity) as usize % len
}
