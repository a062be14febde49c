/// Seeds of the four FNV-1a lanes making up a digest.
const LANE_SEEDS: [u64; 4] = [
    0xcbf29ce484222325,
    0x9e3779b97f4a7c15,
    0xd6e8feb86659fd93,
    0xa0761d6478bd642f,
];
const FNV_PRIME: u64 = 0x100000001b3;

/// Stable 256-bit digest for identities and layout profiles.
///
/// Not cryptographic; only stability across processes and platforms matters.
pub(crate) fn digest32(bytes: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    for (lane, seed) in out.chunks_exact_mut(8).zip(LANE_SEEDS) {
        let hash = bytes
            .iter()
            .fold(seed, |hash, byte| (hash ^ u64::from(*byte)).wrapping_mul(FNV_PRIME));
        lane.copy_from_slice(&hash.to_le_bytes());
    }
    out
}

/// Lowercase hex rendering of `bytes`.
pub(crate) fn to_hex(bytes: &[u8]) -> String {
    use core::fmt::Write;

    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{:02x}", byte);
    }
    out
}
