//! Module-side allocator for host-delivered data
//!
//! The host calls `proxy_on_memory_allocate(size)` whenever it needs to hand
//! the guest a variable-length result, writes the bytes into the returned
//! region, and passes `(pointer, size)` back through a return slot. The guest
//! then owns the region and adopts it with [`reclaim`].

use std::alloc::{alloc, handle_alloc_error, Layout};
use std::ptr::NonNull;

/// Allocate `size` bytes in the module's linear memory
///
/// Zero-sized requests return a dangling, well-aligned pointer that must not
/// be dereferenced. Allocator exhaustion aborts the instance.
pub fn allocate(size: usize) -> *mut u8 {
    if size == 0 {
        return NonNull::<u8>::dangling().as_ptr();
    }
    let layout = match Layout::array::<u8>(size) {
        Ok(layout) => layout,
        Err(_) => crate::dispatcher::fatal(format!(
            "allocation of {size} bytes exceeds the address space"
        )),
    };
    // SAFETY: layout has a non-zero size
    let ptr = unsafe { alloc(layout) };
    if ptr.is_null() {
        handle_alloc_error(layout);
    }
    ptr
}

/// Take ownership of a region produced by [`allocate`]
///
/// # Safety
/// `ptr` must come from [`allocate`] called with exactly `size`, and must not
/// be reclaimed twice.
pub unsafe fn reclaim(ptr: *mut u8, size: usize) -> Vec<u8> {
    if ptr.is_null() || size == 0 {
        return Vec::new();
    }
    Vec::from_raw_parts(ptr, size, size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_and_reclaim() {
        let ptr = allocate(16);
        assert!(!ptr.is_null());

        // SAFETY: 16 bytes were just allocated at ptr
        unsafe { std::ptr::copy_nonoverlapping(b"host-owned bytes".as_ptr(), ptr, 16) };
        let data = unsafe { reclaim(ptr, 16) };
        assert_eq!(data, b"host-owned bytes".to_vec());
    }

    #[test]
    fn test_zero_sized_allocation() {
        let ptr = allocate(0);
        assert!(!ptr.is_null());
        let data = unsafe { reclaim(ptr, 0) };
        assert!(data.is_empty());
    }

    #[test]
    fn test_reclaim_null() {
        let data = unsafe { reclaim(std::ptr::null_mut(), 8) };
        assert!(data.is_empty());
    }
}
