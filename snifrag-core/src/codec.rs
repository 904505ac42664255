//! Byte codec helpers shared by the TLS parser and the fragmenter

use rand::Rng;
use std::ops::Range;

/// Big-endian u16 decode
pub fn be16(bytes: [u8; 2]) -> u16 {
    (u16::from(bytes[0]) << 8) | u16::from(bytes[1])
}

/// Big-endian u32 decode, zero-extended when fewer than four bytes are given.
/// TLS handshake lengths are three bytes wide, which is where this earns its
/// keep.
pub fn be32(bytes: &[u8]) -> u32 {
    debug_assert!(bytes.len() <= 4);
    bytes.iter().fold(0u32, |acc, &b| (acc << 8) | u32::from(b))
}

/// Big-endian u16 encode
pub fn be16_encode(value: u16) -> [u8; 2] {
    value.to_be_bytes()
}

/// Partition `range` into consecutive sub-ranges of length >= `min_len`
/// (the trailing residue may be shorter, but never empty). At least one cut
/// lands whenever the range is long enough for two pieces.
pub fn random_slice<R: Rng>(range: Range<usize>, min_len: usize, rng: &mut R) -> Vec<Range<usize>> {
    debug_assert!(min_len >= 1);
    let mut out = Vec::new();
    let mut start = range.start;
    let end = range.end;

    while end - start >= 2 * min_len {
        let take = rng.gen_range(min_len..=(end - start - min_len));
        out.push(start..start + take);
        start += take;
    }
    if start < end {
        out.push(start..end);
    }
    out
}
