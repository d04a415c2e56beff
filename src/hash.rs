//! Fast non-cryptographic hashing of tracked text regions.
//!
//! The integrity database stores xxh64 digests. This is tamper *detection*
//! for accidental or malicious changes, not a cryptographic commitment; the
//! hash only needs to be cheap enough to recompute inside a patch-completion
//! handler.

use xxhash_rust::xxh64::xxh64;

use crate::platform;

/// Seed for all region and aggregate hashes. Changing it invalidates every
/// stored digest, so it is fixed for the lifetime of the subsystem.
const HASH_SEED: u64 = 0;

/// Hash a byte slice.
#[inline]
pub fn fast_hash(data: &[u8]) -> u64 {
    xxh64(data, HASH_SEED)
}

/// Hash `size` bytes of code starting at `addr`.
///
/// Returns `None` if the range cannot be read; the caller keeps the previous
/// digest in that case.
pub fn hash_range(addr: u64, size: u64) -> Option<u64> {
    let bytes = platform::read_code(addr, size as usize)?;
    Some(fast_hash(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform;

    #[test]
    fn test_fast_hash_is_stable() {
        let data = [0x90u8; 64];
        assert_eq!(fast_hash(&data), fast_hash(&data));
    }

    #[test]
    fn test_fast_hash_detects_single_byte_change() {
        let mut data = [0x90u8; 64];
        let before = fast_hash(&data);
        data[17] = 0xcc;
        assert_ne!(before, fast_hash(&data));
    }

    #[test]
    fn test_hash_range_reads_through_platform() {
        platform::mock_map_region(0x9400_0000, &[0x42; 32]);

        let h = hash_range(0x9400_0000, 32);
        assert_eq!(h, Some(fast_hash(&[0x42; 32])));
        assert_eq!(hash_range(0x9500_0000, 8), None);

        platform::mock_unmap_region(0x9400_0000);
    }
}
