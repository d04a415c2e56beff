//! Platform abstraction layer for reading executable memory.
//!
//! This module provides an abstraction over code-memory access to allow
//! testing in user space. In a kernel build the hash engine reads tracked
//! text ranges through raw pointers; on the host, tests register synthetic
//! regions backed by byte buffers and patch them to simulate jump-label
//! writes.

use alloc::vec::Vec;

/// Code memory operations trait.
///
/// Abstracts over how region bytes are obtained so the hash propagation
/// engine can run unmodified in mock testing.
pub trait MemoryOps {
    /// Read `len` bytes of code starting at `addr`.
    ///
    /// Returns `None` if the range is not readable (mock: not registered).
    fn read_code(addr: u64, len: usize) -> Option<Vec<u8>>;
}

// =============================================================================
// Real Implementation (kernel environment)
// =============================================================================

/// Real memory operations: raw-pointer reads of kernel text.
///
/// At completion time the patched range is static again, so no lock and no
/// temporary copy of the section is required before hashing.
#[cfg(all(not(test), feature = "kernel"))]
pub struct RealMemory;

#[cfg(all(not(test), feature = "kernel"))]
impl MemoryOps for RealMemory {
    fn read_code(addr: u64, len: usize) -> Option<Vec<u8>> {
        if addr == 0 || len == 0 {
            return None;
        }
        // The caller guarantees [addr, addr+len) is a mapped text range.
        let bytes = unsafe { core::slice::from_raw_parts(addr as usize as *const u8, len) };
        Some(bytes.to_vec())
    }
}

// =============================================================================
// Mock Implementation (test environment or no kernel feature)
// =============================================================================

#[cfg(any(test, not(feature = "kernel")))]
mod mock {
    use alloc::collections::BTreeMap;
    use alloc::vec::Vec;
    use spin::Mutex;

    /// Synthetic code regions keyed by base address.
    pub(super) static MOCK_REGIONS: Mutex<BTreeMap<u64, Vec<u8>>> = Mutex::new(BTreeMap::new());
}

/// Mock memory operations for testing.
#[cfg(any(test, not(feature = "kernel")))]
pub struct MockMemory;

#[cfg(any(test, not(feature = "kernel")))]
impl MemoryOps for MockMemory {
    fn read_code(addr: u64, len: usize) -> Option<Vec<u8>> {
        if len == 0 {
            return None;
        }
        let regions = mock::MOCK_REGIONS.lock();
        // Find the region containing addr: last region starting at or below it.
        let (base, bytes) = regions.range(..=addr).next_back()?;
        let offset = (addr - base) as usize;
        if offset + len > bytes.len() {
            return None;
        }
        Some(bytes[offset..offset + len].to_vec())
    }
}

/// Register a synthetic code region for testing.
///
/// Replaces any region previously registered at the same base address.
#[cfg(any(test, not(feature = "kernel")))]
pub fn mock_map_region(base: u64, bytes: &[u8]) {
    mock::MOCK_REGIONS.lock().insert(base, bytes.to_vec());
}

/// Overwrite bytes inside a registered mock region, simulating a patch.
///
/// Returns `false` if no region covers the written range.
#[cfg(any(test, not(feature = "kernel")))]
pub fn mock_patch(addr: u64, new_bytes: &[u8]) -> bool {
    let mut regions = mock::MOCK_REGIONS.lock();
    let Some((base, bytes)) = regions.range_mut(..=addr).next_back() else {
        return false;
    };
    let offset = (addr - base) as usize;
    if offset + new_bytes.len() > bytes.len() {
        return false;
    }
    bytes[offset..offset + new_bytes.len()].copy_from_slice(new_bytes);
    true
}

/// Remove a synthetic code region.
#[cfg(any(test, not(feature = "kernel")))]
pub fn mock_unmap_region(base: u64) {
    mock::MOCK_REGIONS.lock().remove(&base);
}

// =============================================================================
// Platform Type Alias
// =============================================================================

/// The active memory implementation.
///
/// In kernel environment: RealMemory (raw-pointer reads)
/// In test environment or without the `kernel` feature: MockMemory
#[cfg(all(not(test), feature = "kernel"))]
pub type Memory = RealMemory;

#[cfg(any(test, not(feature = "kernel")))]
pub type Memory = MockMemory;

// =============================================================================
// Convenience Functions
// =============================================================================

/// Read `len` bytes of code starting at `addr`.
#[inline]
pub fn read_code(addr: u64, len: usize) -> Option<Vec<u8>> {
    Memory::read_code(addr, len)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_read_within_region() {
        mock_map_region(0x9000_0000, &[1, 2, 3, 4, 5, 6, 7, 8]);

        assert_eq!(read_code(0x9000_0000, 4), Some([1, 2, 3, 4].to_vec()));
        assert_eq!(read_code(0x9000_0004, 4), Some([5, 6, 7, 8].to_vec()));

        mock_unmap_region(0x9000_0000);
    }

    #[test]
    fn test_mock_read_out_of_bounds() {
        mock_map_region(0x9100_0000, &[0xaa; 16]);

        assert_eq!(read_code(0x9100_0000, 17), None);
        assert_eq!(read_code(0x9200_0000, 1), None);
        assert_eq!(read_code(0x9100_0000, 0), None);

        mock_unmap_region(0x9100_0000);
    }

    #[test]
    fn test_mock_patch_changes_bytes() {
        mock_map_region(0x9300_0000, &[0x90; 8]);

        assert!(mock_patch(0x9300_0002, &[0xeb, 0x05]));
        assert_eq!(
            read_code(0x9300_0000, 8),
            Some([0x90, 0x90, 0xeb, 0x05, 0x90, 0x90, 0x90, 0x90].to_vec())
        );

        // Writes past the end of the region are rejected.
        assert!(!mock_patch(0x9300_0007, &[0, 0]));

        mock_unmap_region(0x9300_0000);
    }
}
